//! Integration tests for the measurement sequencer against mock hardware.
//!
//! Every test runs under paused tokio time: the mock motors and the mock
//! count source both follow the virtual clock.

use photon_daq::acquisition::{
    ActuatorSynchronizer, ChannelLatch, MeasurementSequencer, SequencerState, SequencerTiming,
};
use photon_daq::analysis::statistics::SeriesStats;
use photon_daq::analysis::tomography::{reconstruct_from_counts, DensityMatrix};
use photon_daq::config::{DaqConfig, MotionConfig};
use photon_daq::data::{read_run, CsvWriter};
use photon_daq::experiment::{Channel, ExperimentVariant, Projection};
use photon_daq::hardware::{
    CountSource, FixedCounts, MockCountSource, MockMotorController, StateCounts,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct Rig {
    motors: Arc<MockMotorController>,
    source: MockCountSource,
    sequencer: MeasurementSequencer,
}

fn rig(variant: ExperimentVariant, rho: DensityMatrix, noise: f64) -> Rig {
    let config = DaqConfig::default();
    let motion = MotionConfig::default();
    let motors = Arc::new(MockMotorController::new());
    let source = MockCountSource::new(Arc::new(StateCounts::new(rho, 1000.0)))
        .with_optics(motors.clone(), motion.clone())
        .with_noise(noise);

    let latch = Arc::new(ChannelLatch::new(variant.channels().iter().copied()));
    source.register(latch.clone()).unwrap();

    let timing = SequencerTiming::from_config(&config, &variant);
    let sync = ActuatorSynchronizer::new(motors.clone(), motion.steps_per_revolution);
    let sequencer = MeasurementSequencer::new(variant, latch, timing).with_synchronizer(sync, motion);
    Rig {
        motors,
        source,
        sequencer,
    }
}

#[tokio::test(start_paused = true)]
async fn test_settings_measured_in_order_after_optics_settle() {
    let rho = DensityMatrix::from_projections(&[Projection::P]);
    let rig = rig(ExperimentVariant::single_qubit(), rho, 0.0);

    let run = rig.sequencer.run_all(4).await.unwrap();
    rig.source.unregister().unwrap();

    let labels: Vec<&str> = run.settings.iter().map(|s| s.label()).collect();
    assert_eq!(labels, ["H", "V", "P", "M", "R", "L"]);
    assert_eq!(rig.sequencer.state(), SequencerState::Complete);

    // Motors were commanded setting by setting, in order.
    let motion = MotionConfig::default();
    let expected: Vec<(u8, i64)> = rig
        .sequencer
        .variant()
        .settings()
        .iter()
        .flat_map(|s| s.targets(&motion))
        .collect();
    assert_eq!(rig.motors.history().await, expected);

    // Counts match the optics each setting asked for, so nothing sampled
    // while the optics were moving leaked into a series.
    let expected_counts = [("H", 500), ("V", 500), ("P", 1000), ("M", 0), ("R", 500), ("L", 500)];
    for (label, count) in expected_counts {
        let series = run.setting(label).unwrap();
        assert_eq!(series.len(), 4);
        assert!(series.settle.as_ref().unwrap().all_settled());
        assert!(series.failure.is_none());
        assert!(
            series.samples(Channel::Ch1).iter().all(|&v| v == count),
            "{label}: {:?}",
            series.samples(Channel::Ch1)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_state_transitions_are_broadcast_in_order() {
    let rho = DensityMatrix::from_projections(&[Projection::H]);
    let rig = rig(ExperimentVariant::single_qubit(), rho, 0.0);

    // Every state is held across a motor poll or a sample sleep, so the
    // watcher sees each one.
    let mut rx = rig.sequencer.subscribe();
    let initial = rx.borrow_and_update().clone();
    let watcher = tokio::spawn(async move {
        let mut seen = vec![initial];
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let done = state == SequencerState::Complete;
            seen.push(state);
            if done {
                break;
            }
        }
        seen
    });

    rig.sequencer.run_all(2).await.unwrap();
    rig.source.unregister().unwrap();
    let seen = watcher.await.unwrap();

    let mut expected = vec![SequencerState::NotStarted];
    for label in ["H", "V", "P", "M", "R", "L"] {
        expected.push(SequencerState::MovingActuators {
            setting: label.to_string(),
        });
        expected.push(SequencerState::Acquiring {
            setting: label.to_string(),
        });
    }
    expected.push(SequencerState::Complete);
    assert_eq!(seen, expected);
}

#[tokio::test(start_paused = true)]
async fn test_single_qubit_run_saved_statistics_match_reference() {
    let rho = DensityMatrix::from_projections(&[Projection::R]);
    let rig = rig(ExperimentVariant::single_qubit(), rho, 3.0);
    let n_sigma = 2.0;

    let run = rig.sequencer.run_all(10).await.unwrap();
    rig.source.unregister().unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("single_qubit.csv");
    CsvWriter::new(&path, n_sigma).write(&run).unwrap();
    let saved = read_run(&path).unwrap();

    assert_eq!(saved.settings.len(), 6);
    for series in &run.settings {
        let samples = series.samples(Channel::Ch1);
        assert_eq!(samples.len(), 10);

        // reference: mean and n_sigma/sqrt(n) * sample std
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<i64>() as f64 / n;
        let var = samples.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let error = n_sigma / n.sqrt() * var.sqrt();

        let stored = saved.setting(series.label()).unwrap();
        let stats: SeriesStats = stored.stats[&Channel::Ch1];
        assert!((stats.mean - mean).abs() < 1e-9, "{}: {} vs {mean}", series.label(), stats.mean);
        assert!((stats.error - error).abs() < 1e-9, "{}: {} vs {error}", series.label(), stats.error);
        assert_eq!(stored.samples[&Channel::Ch1], samples);
    }

    // the saved averages still describe a right-circular state
    let variant = ExperimentVariant::single_qubit();
    let rec = reconstruct_from_counts(&variant, &saved.averages(Channel::Ch1)).unwrap();
    assert!(rec.stokes.get("TY").unwrap() > 0.9);
    assert!(rec.stokes.get("TZ").unwrap().abs() < 0.2);
}

#[tokio::test(start_paused = true)]
async fn test_latch_timeout_ends_only_the_affected_setting() {
    let config = DaqConfig::default();
    let variant = ExperimentVariant::hbt();
    let latch = Arc::new(ChannelLatch::new(variant.channels().iter().copied()));
    let mut timing = SequencerTiming::from_config(&config, &variant);
    timing.latch_timeout = Duration::from_millis(250);

    // nothing is registered on the latch, so no sample ever arrives
    let sequencer = MeasurementSequencer::new(variant, latch, timing);
    let run = sequencer.run_all(5).await.unwrap();

    assert_eq!(run.failed_settings(), vec!["HBT"]);
    let series = run.setting("HBT").unwrap();
    assert!(series.is_empty());
    assert!(series.failure.as_ref().unwrap().contains("Timed out"));
    assert_eq!(sequencer.state(), SequencerState::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_static_variant_runs_without_motors() {
    let config = DaqConfig::default();
    let variant = ExperimentVariant::base();
    let latch = Arc::new(ChannelLatch::new(variant.channels().iter().copied()));
    let source = MockCountSource::new(Arc::new(FixedCounts::uniform(42.0)));
    source.register(latch.clone()).unwrap();

    let timing = SequencerTiming::from_config(&config, &variant);
    let sequencer = MeasurementSequencer::new(variant, latch, timing);
    let run = sequencer.run_all(3).await.unwrap();
    source.unregister().unwrap();

    let series = run.setting("BASE").unwrap();
    assert!(series.settle.is_none());
    for channel in [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4] {
        assert_eq!(series.samples(channel), [42, 42, 42]);
    }
}
