//! Measurement sequencer.
//!
//! Walks the settings of an experiment in order. For each setting the optics
//! are moved and awaited first, the latch is cleared of anything sampled
//! during the move, and only then are `samples_per_setting` complete sample
//! sets drained. A setting is finished before the next one starts and is
//! never retried.
//!
//! ```text
//! NotStarted ──> ( MovingActuators ──> Acquiring )* ──> Complete
//! ```

use crate::acquisition::latch::{ChannelLatch, Sample};
use crate::acquisition::motion::{ActuatorSynchronizer, SettleReport};
use crate::analysis::statistics::{mean, SeriesStats};
use crate::config::{DaqConfig, MotionConfig};
use crate::error::{AppResult, DaqError};
use crate::experiment::{Channel, ExperimentVariant, Setting, VariantKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Sequencer lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerState {
    /// `run` has not been called
    NotStarted,
    /// Waiting for optics of a setting
    MovingActuators {
        /// Setting label
        setting: String,
    },
    /// Draining samples of a setting
    Acquiring {
        /// Setting label
        setting: String,
    },
    /// All settings processed
    Complete,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerState::NotStarted => write!(f, "NotStarted"),
            SequencerState::MovingActuators { setting } => write!(f, "MovingActuators({setting})"),
            SequencerState::Acquiring { setting } => write!(f, "Acquiring({setting})"),
            SequencerState::Complete => write!(f, "Complete"),
        }
    }
}

/// Timing knobs of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerTiming {
    /// Pause after every sample
    pub sample_interval: Duration,
    /// Longest wait for the optics of one setting
    pub settle_timeout: Duration,
    /// Longest wait for one complete sample set
    pub latch_timeout: Duration,
}

impl SequencerTiming {
    /// Timing for `variant` from the loaded configuration.
    pub fn from_config(config: &DaqConfig, variant: &ExperimentVariant) -> Self {
        let sample_interval = match variant.kind() {
            VariantKind::SingleQubit | VariantKind::TwoQubit => config.acquisition.sample_interval,
            VariantKind::Hbt | VariantKind::Base => config.acquisition.static_sample_interval,
        };
        Self {
            sample_interval,
            settle_timeout: config.motion.settle_timeout,
            latch_timeout: config.acquisition.latch_timeout,
        }
    }
}

/// Samples collected for one setting.
#[derive(Debug, Clone)]
pub struct SettingSeries {
    /// The setting
    pub setting: Setting,
    /// Consumed samples per channel, in arrival order
    pub series: BTreeMap<Channel, Vec<Sample>>,
    /// Optics outcome, `None` for settings without motion
    pub settle: Option<SettleReport>,
    /// Why acquisition stopped early, if it did
    pub failure: Option<String>,
}

impl SettingSeries {
    /// Empty series for `channels`.
    pub fn new(setting: Setting, channels: &[Channel]) -> Self {
        Self {
            setting,
            series: channels.iter().map(|&c| (c, Vec::new())).collect(),
            settle: None,
            failure: None,
        }
    }

    /// Setting label.
    pub fn label(&self) -> &str {
        self.setting.label()
    }

    /// Samples of `channel` (empty when not acquired).
    pub fn samples(&self, channel: Channel) -> &[Sample] {
        self.series.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of complete sample sets.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).min().unwrap_or(0)
    }

    /// No samples were collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean of `channel`, 0 when nothing was collected.
    pub fn mean(&self, channel: Channel) -> f64 {
        let values: Vec<f64> = self.samples(channel).iter().map(|&v| v as f64).collect();
        if values.is_empty() {
            0.0
        } else {
            mean(&values)
        }
    }

    /// Mean and error bar of `channel`.
    pub fn stats(&self, channel: Channel, n_sigma: f64) -> SeriesStats {
        SeriesStats::from_samples(self.samples(channel), n_sigma)
    }
}

/// Everything one run collected.
#[derive(Debug, Clone)]
pub struct AcquisitionRun {
    /// Unique run id
    pub run_id: Uuid,
    /// Experiment kind
    pub variant: VariantKind,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Requested samples per setting
    pub samples_per_setting: usize,
    /// Channels acquired, in column order
    pub channels: Vec<Channel>,
    /// Per-setting series in measurement order
    pub settings: Vec<SettingSeries>,
}

impl AcquisitionRun {
    /// Series of the setting labelled `label`.
    pub fn setting(&self, label: &str) -> Option<&SettingSeries> {
        self.settings.iter().find(|s| s.label() == label)
    }

    /// Per-setting mean of `channel`, keyed by label.
    pub fn means(&self, channel: Channel) -> BTreeMap<String, f64> {
        self.settings
            .iter()
            .map(|s| (s.label().to_string(), s.mean(channel)))
            .collect()
    }

    /// Labels of settings that ended early.
    pub fn failed_settings(&self) -> Vec<&str> {
        self.settings
            .iter()
            .filter(|s| s.failure.is_some())
            .map(SettingSeries::label)
            .collect()
    }
}

/// Drives one experiment through its settings.
pub struct MeasurementSequencer {
    variant: ExperimentVariant,
    latch: Arc<ChannelLatch>,
    synchronizer: Option<(ActuatorSynchronizer, MotionConfig)>,
    timing: SequencerTiming,
    state: watch::Sender<SequencerState>,
}

impl MeasurementSequencer {
    /// Sequencer for `variant`, draining `latch`.
    pub fn new(variant: ExperimentVariant, latch: Arc<ChannelLatch>, timing: SequencerTiming) -> Self {
        let (state, _) = watch::channel(SequencerState::NotStarted);
        Self {
            variant,
            latch,
            synchronizer: None,
            timing,
            state,
        }
    }

    /// Attach the actuators; required for variants that move optics.
    pub fn with_synchronizer(mut self, synchronizer: ActuatorSynchronizer, motion: MotionConfig) -> Self {
        self.synchronizer = Some((synchronizer, motion));
        self
    }

    /// Experiment being run.
    pub fn variant(&self) -> &ExperimentVariant {
        &self.variant
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SequencerState> {
        self.state.subscribe()
    }

    /// Run every setting of the variant with `samples_per_setting` samples each.
    pub async fn run_all(&self, samples_per_setting: usize) -> AppResult<AcquisitionRun> {
        let settings = self.variant.settings().to_vec();
        self.run(&settings, samples_per_setting).await
    }

    /// Run `settings` in order with `samples_per_setting` samples each.
    ///
    /// A latch timeout ends only the affected setting; actuator timeouts are
    /// warnings. Failing to command a motor aborts the run.
    pub async fn run(&self, settings: &[Setting], samples_per_setting: usize) -> AppResult<AcquisitionRun> {
        if self.variant.requires_motion() && self.synchronizer.is_none() {
            return Err(DaqError::Configuration(format!(
                "{} moves optics but no motor controller is attached",
                self.variant.name()
            )));
        }

        let mut run = AcquisitionRun {
            run_id: Uuid::new_v4(),
            variant: self.variant.kind(),
            started_at: Utc::now(),
            samples_per_setting,
            channels: self.variant.channels().to_vec(),
            settings: Vec::with_capacity(settings.len()),
        };
        info!(
            run_id = %run.run_id,
            experiment = self.variant.name(),
            settings = settings.len(),
            samples_per_setting,
            "Starting acquisition"
        );

        let started = Instant::now();
        for (idx, setting) in settings.iter().enumerate() {
            let span = info_span!("setting", label = %setting, index = idx + 1, total = settings.len());
            let series = self
                .measure_setting(setting, samples_per_setting)
                .instrument(span)
                .await?;
            run.settings.push(series);

            let done = idx + 1;
            let per_setting = started.elapsed() / done as u32;
            let eta = per_setting * (settings.len() - done) as u32;
            info!(
                setting = %setting,
                progress = %format!("{done}/{}", settings.len()),
                eta = %format_hms(eta),
                "Setting complete"
            );
        }

        self.state.send_replace(SequencerState::Complete);
        info!(
            run_id = %run.run_id,
            elapsed = %format_hms(started.elapsed()),
            failed = ?run.failed_settings(),
            "Acquisition complete"
        );
        Ok(run)
    }

    async fn measure_setting(&self, setting: &Setting, samples_per_setting: usize) -> AppResult<SettingSeries> {
        let channels = self.variant.channels();
        let mut series = SettingSeries::new(setting.clone(), channels);

        if let Some((synchronizer, motion)) = &self.synchronizer {
            let targets = setting.targets(motion);
            if !targets.is_empty() {
                self.state.send_replace(SequencerState::MovingActuators {
                    setting: setting.label().to_string(),
                });
                let report = synchronizer
                    .move_and_wait(&targets, self.timing.settle_timeout)
                    .await?;
                info!(angles = ?setting.component_angles(), "Motors set");
                series.settle = Some(report);
            }
        }

        // Anything latched while the optics were moving belongs to the old setting.
        self.latch.clear();
        self.state.send_replace(SequencerState::Acquiring {
            setting: setting.label().to_string(),
        });

        for sample in 0..samples_per_setting {
            match self.latch.take_all(channels, self.timing.latch_timeout).await {
                Ok(values) => {
                    for (channel, value) in channels.iter().zip(values) {
                        if let Some(s) = series.series.get_mut(channel) {
                            s.push(value);
                        }
                    }
                }
                Err(e) if e.can_recover() => {
                    warn!(
                        setting = %setting,
                        collected = sample,
                        requested = samples_per_setting,
                        error = %e,
                        "Abandoning setting"
                    );
                    series.failure = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            }
            sleep(self.timing.sample_interval).await;
        }
        Ok(series)
    }
}

/// Format a duration as `H:MM:SS`.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_hms(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn series_len_is_shortest_channel() {
        let mut series = SettingSeries::new(Setting::fixed("HBT"), &[Channel::Ch1, Channel::Ch2]);
        series.series.get_mut(&Channel::Ch1).unwrap().extend([1, 2, 3]);
        series.series.get_mut(&Channel::Ch2).unwrap().extend([4, 5]);
        assert_eq!(series.len(), 2);
        assert!((series.mean(Channel::Ch1) - 2.0).abs() < 1e-12);
        assert_eq!(series.mean(Channel::Ch3), 0.0);
    }

    #[tokio::test]
    async fn motion_variant_without_motors_is_rejected() {
        let variant = ExperimentVariant::single_qubit();
        let latch = Arc::new(ChannelLatch::new(variant.channels().iter().copied()));
        let timing = SequencerTiming::from_config(&DaqConfig::default(), &variant);
        let sequencer = MeasurementSequencer::new(variant, latch, timing);
        assert!(matches!(
            sequencer.run_all(1).await,
            Err(DaqError::Configuration(_))
        ));
        assert_eq!(sequencer.state(), SequencerState::NotStarted);
    }
}
