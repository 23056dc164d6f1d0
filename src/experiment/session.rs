//! One experiment run against a set of hardware capabilities.
//!
//! The session owns the connection lifecycle: it brings the device link up,
//! binds a fresh latch to the count source, lets the sequencer walk the
//! settings, then unbinds and disconnects whatever happened in between.

use crate::acquisition::{
    AcquisitionRun, ActuatorSynchronizer, ChannelLatch, MeasurementSequencer, SequencerTiming,
};
use crate::config::{DaqConfig, MotionConfig};
use crate::error::{AppResult, DaqError};
use crate::experiment::{Component, ExperimentVariant};
use crate::hardware::{CountSource, DeviceLink, MotorController};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

/// Hardware capabilities a session drives.
#[derive(Clone)]
pub struct Hardware {
    /// Connection to the counting unit
    pub link: Arc<dyn DeviceLink>,
    /// Detector event stream
    pub source: Arc<dyn CountSource>,
    /// Motor driver, needed by experiments that move optics
    pub motors: Option<Arc<dyn MotorController>>,
}

/// A configured experiment ready to acquire.
pub struct ExperimentSession {
    config: DaqConfig,
    variant: ExperimentVariant,
    hardware: Hardware,
}

impl ExperimentSession {
    /// Check that `variant` is consistent and `hardware` can run it.
    pub fn new(config: DaqConfig, variant: ExperimentVariant, hardware: Hardware) -> AppResult<Self> {
        variant.validate()?;
        if variant.requires_motion() && hardware.motors.is_none() {
            return Err(DaqError::Configuration(format!(
                "{} needs a motor driver",
                variant.name()
            )));
        }
        Ok(Self {
            config,
            variant,
            hardware,
        })
    }

    /// Experiment this session runs.
    pub fn variant(&self) -> &ExperimentVariant {
        &self.variant
    }

    fn sequencer(&self, latch: Arc<ChannelLatch>) -> MeasurementSequencer {
        let timing = SequencerTiming::from_config(&self.config, &self.variant);
        let sequencer = MeasurementSequencer::new(self.variant.clone(), latch, timing);
        match &self.hardware.motors {
            Some(motors) if self.variant.requires_motion() => {
                let motion = &self.config.motion;
                let synchronizer =
                    ActuatorSynchronizer::new(Arc::clone(motors), motion.steps_per_revolution)
                        .with_tolerance(motion.tolerance_steps)
                        .with_poll_interval(motion.poll_interval);
                sequencer.with_synchronizer(synchronizer, motion.clone())
            }
            _ => sequencer,
        }
    }

    /// Connect, acquire every setting, disconnect.
    ///
    /// A refused connection ends the session before anything is measured.
    pub async fn acquire(&self, samples_per_setting: usize) -> AppResult<AcquisitionRun> {
        if samples_per_setting == 0 {
            return Err(DaqError::Configuration(
                "samples_per_setting must be at least 1".into(),
            ));
        }

        let address = self.config.device.address.as_str();
        self.hardware
            .link
            .connect(address)
            .await
            .map_err(|e| DaqError::Connection {
                address: address.to_string(),
                reason: format!("{e:#}"),
            })?;
        info!(address, experiment = self.variant.name(), "Connected");

        let latch = Arc::new(
            ChannelLatch::new(self.variant.channels().iter().copied())
                .with_poll_interval(self.config.acquisition.latch_poll),
        );
        let result = match self.hardware.source.register(Arc::clone(&latch)) {
            Ok(()) => {
                let run = self.sequencer(latch).run_all(samples_per_setting).await;
                if let Err(e) = self.hardware.source.unregister() {
                    warn!(error = %e, "Failed to unregister count source");
                }
                run
            }
            Err(e) => Err(DaqError::Instrument(format!(
                "Count source refused registration: {e:#}"
            ))),
        };

        if let Err(e) = self.hardware.link.disconnect().await {
            warn!(error = %e, "Failed to disconnect");
        }
        result
    }
}

/// Wiring instructions for the configured motor ports.
pub fn explain_setup(motion: &MotionConfig) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "Set up the counting unit as assumed here. Single- and two-qubit tomography share the\n\
         wiring; single-qubit tomography only uses qubit 1's wave plate, polarizer and APD 1.\n"
    );
    let _ = writeln!(text, "Motor ports:");
    let mut ports: Vec<(u8, &str)> = [
        (Component::Qwp1, "quarter-wave plate, qubit 1"),
        (Component::Pol1, "polarizer, qubit 1"),
        (Component::Qwp2, "quarter-wave plate, qubit 2"),
        (Component::Pol2, "polarizer, qubit 2"),
    ]
    .into_iter()
    .map(|(c, name)| (motion.ports.port(c), name))
    .collect();
    ports.sort_unstable();
    for (port, name) in ports {
        let _ = writeln!(text, "\tport {port}: {name}");
    }
    let _ = writeln!(
        text,
        "\nMotors turn {} steps per revolution; every optic reads 0° at step 0.\n",
        motion.steps_per_revolution
    );
    let _ = writeln!(text, "Detectors:");
    let _ = writeln!(text, "\tqubit 1 fiber -> APD 1 (ch1)");
    let _ = writeln!(text, "\tqubit 2 fiber -> APD 2 (ch2)");
    let _ = writeln!(text, "\tHBT: beam splitter outputs -> APD 2 and APD 3, herald on APD 1");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_text_follows_configured_ports() {
        let mut motion = MotionConfig::default();
        let text = explain_setup(&motion);
        assert!(text.contains("port 1: quarter-wave plate, qubit 2"));
        assert!(text.contains("port 2: quarter-wave plate, qubit 1"));

        motion.ports.qwp1 = 4;
        motion.ports.pol2 = 2;
        let text = explain_setup(&motion);
        assert!(text.contains("port 4: quarter-wave plate, qubit 1"));
        assert!(text.contains("port 2: polarizer, qubit 2"));
    }
}
