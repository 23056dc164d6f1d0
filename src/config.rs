//! Configuration System using Figment
//!
//! Strongly-typed configuration for acquisition, motion and analysis.
//! Configuration is layered from:
//! 1. Built-in defaults (the values the apparatus is normally run with)
//! 2. A TOML file (default `config/photon_daq.toml`, missing file is fine)
//! 3. Environment variables prefixed with `PHOTON_DAQ_`, sections separated
//!    by a double underscore (`PHOTON_DAQ_MOTION__SETTLE_TIMEOUT=8s`)
//!
//! # Example
//! ```no_run
//! use photon_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! println!("Samples per setting: {}", config.acquisition.samples_per_setting);
//! # Ok::<(), photon_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::experiment::Component;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/photon_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device link settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Sample acquisition settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Actuator settings
    #[serde(default)]
    pub motion: MotionConfig,
    /// Output file settings
    #[serde(default)]
    pub output: OutputConfig,
    /// HBT calibration
    #[serde(default)]
    pub hbt: HbtConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Counting unit connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Network address of the counting unit
    #[serde(default = "default_address")]
    pub address: String,
}

/// Sample acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Samples drained from the latch for every setting
    #[serde(default = "default_samples_per_setting")]
    pub samples_per_setting: usize,
    /// Pause between samples during tomography
    #[serde(default = "default_tomography_interval", with = "humantime_serde")]
    pub sample_interval: Duration,
    /// Pause between samples for the single-setting experiments (HBT, base)
    #[serde(default = "default_static_interval", with = "humantime_serde")]
    pub static_sample_interval: Duration,
    /// Latch re-check interval while waiting for samples
    #[serde(default = "default_latch_poll", with = "humantime_serde")]
    pub latch_poll: Duration,
    /// Longest wait for one complete sample set before the setting is abandoned
    #[serde(default = "default_latch_timeout", with = "humantime_serde")]
    pub latch_timeout: Duration,
}

/// Motor port assignment for the four optics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MotorPorts {
    /// Quarter-wave plate, qubit 1
    pub qwp1: u8,
    /// Polarizer, qubit 1
    pub pol1: u8,
    /// Quarter-wave plate, qubit 2
    pub qwp2: u8,
    /// Polarizer, qubit 2
    pub pol2: u8,
}

impl MotorPorts {
    /// Motor port driving `component`.
    pub fn port(&self, component: Component) -> u8 {
        match component {
            Component::Qwp1 => self.qwp1,
            Component::Pol1 => self.pol1,
            Component::Qwp2 => self.qwp2,
            Component::Pol2 => self.pol2,
        }
    }
}

impl Default for MotorPorts {
    fn default() -> Self {
        Self {
            qwp1: 2,
            pol1: 3,
            qwp2: 1,
            pol2: 4,
        }
    }
}

/// Actuator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Motor steps per full revolution
    #[serde(default = "default_steps_per_revolution")]
    pub steps_per_revolution: u32,
    /// Settled when within this many steps of the target
    #[serde(default = "default_tolerance_steps")]
    pub tolerance_steps: i64,
    /// Position polling interval while waiting for motors
    #[serde(default = "default_motion_poll", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Maximum wait for all motors to settle
    #[serde(default = "default_settle_timeout", with = "humantime_serde")]
    pub settle_timeout: Duration,
    /// Which optic is on which port
    #[serde(default)]
    pub ports: MotorPorts,
}

/// Output file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// File name without the `.csv` extension
    #[serde(default = "default_file_base")]
    pub file_base: String,
    /// Error bars are this many standard errors wide
    #[serde(default = "default_n_sigma")]
    pub n_sigma: f64,
}

/// HBT g²(0) calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HbtConfig {
    /// Coincidence window of the counting unit
    #[serde(default = "default_coincidence_window", with = "humantime_serde")]
    pub coincidence_window: Duration,
    /// Integration window each reported count covers
    #[serde(default = "default_count_window", with = "humantime_serde")]
    pub count_window: Duration,
}

// Default value functions
fn default_app_name() -> String {
    "photon_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address() -> String {
    "192.168.0.1".to_string()
}

fn default_samples_per_setting() -> usize {
    100
}

fn default_tomography_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_static_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_latch_poll() -> Duration {
    Duration::from_millis(10)
}

fn default_latch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_steps_per_revolution() -> u32 {
    4800
}

fn default_tolerance_steps() -> i64 {
    1
}

fn default_motion_poll() -> Duration {
    Duration::from_millis(50)
}

fn default_settle_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_file_base() -> String {
    "tomography_counts".to_string()
}

fn default_n_sigma() -> f64 {
    2.0
}

fn default_coincidence_window() -> Duration {
    // 2 x 10000 ps
    Duration::from_nanos(20)
}

fn default_count_window() -> Duration {
    Duration::from_millis(100)
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            samples_per_setting: default_samples_per_setting(),
            sample_interval: default_tomography_interval(),
            static_sample_interval: default_static_interval(),
            latch_poll: default_latch_poll(),
            latch_timeout: default_latch_timeout(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            steps_per_revolution: default_steps_per_revolution(),
            tolerance_steps: default_tolerance_steps(),
            poll_interval: default_motion_poll(),
            settle_timeout: default_settle_timeout(),
            ports: MotorPorts::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_base: default_file_base(),
            n_sigma: default_n_sigma(),
        }
    }
}

impl Default for HbtConfig {
    fn default() -> Self {
        Self {
            coincidence_window: default_coincidence_window(),
            count_window: default_count_window(),
        }
    }
}

impl DaqConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables override the file, e.g.
    /// `PHOTON_DAQ_ACQUISITION__SAMPLES_PER_SETTING=20`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::load_with(path, |_| {})
    }

    /// Load like [`DaqConfig::load_from`], applying `overrides` (command-line
    /// flags) before validation so they can replace invalid file values.
    pub fn load_with<P, F>(path: P, overrides: F) -> AppResult<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut DaqConfig),
    {
        let mut config: DaqConfig = Figment::from(Serialized::defaults(DaqConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PHOTON_DAQ_").split("__"))
            .extract()?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.samples_per_setting == 0 {
            return Err(DaqError::Configuration(
                "samples_per_setting must be at least 1".into(),
            ));
        }

        for (name, value) in [
            ("acquisition.latch_poll", self.acquisition.latch_poll),
            ("acquisition.latch_timeout", self.acquisition.latch_timeout),
            ("motion.poll_interval", self.motion.poll_interval),
            ("motion.settle_timeout", self.motion.settle_timeout),
            ("hbt.coincidence_window", self.hbt.coincidence_window),
            ("hbt.count_window", self.hbt.count_window),
        ] {
            if value.is_zero() {
                return Err(DaqError::Configuration(format!("{name} must be > 0")));
            }
        }

        if self.motion.steps_per_revolution == 0 {
            return Err(DaqError::Configuration(
                "steps_per_revolution must be > 0".into(),
            ));
        }

        if self.motion.tolerance_steps < 0 {
            return Err(DaqError::Configuration(
                "tolerance_steps must not be negative".into(),
            ));
        }

        if !(self.output.n_sigma > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid n_sigma {}. Must be > 0",
                self.output.n_sigma
            )));
        }

        let ports = self.motion.ports;
        let mut seen = HashSet::new();
        for port in [ports.qwp1, ports.pol1, ports.qwp2, ports.pol2] {
            if !seen.insert(port) {
                return Err(DaqError::Configuration(format!(
                    "Motor port {port} is assigned to more than one optic"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_apparatus() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.motion.steps_per_revolution, 4800);
        assert_eq!(config.motion.ports.port(Component::Qwp2), 1);
        assert_eq!(config.motion.settle_timeout, Duration::from_secs(5));
        assert_eq!(config.hbt.coincidence_window, Duration::from_nanos(20));
        assert_eq!(config.output.n_sigma, 2.0);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[acquisition]
samples_per_setting = 12
latch_timeout = "2s"

[motion]
settle_timeout = "750ms"
"#
        )
        .unwrap();

        let config = DaqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.acquisition.samples_per_setting, 12);
        assert_eq!(config.acquisition.latch_timeout, Duration::from_secs(2));
        assert_eq!(config.motion.settle_timeout, Duration::from_millis(750));
        // untouched sections keep their defaults
        assert_eq!(config.acquisition.sample_interval, Duration::from_millis(50));
        assert_eq!(config.motion.ports, MotorPorts::default());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = DaqConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.acquisition.samples_per_setting, 100);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DaqConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_motor_ports() {
        let mut config = DaqConfig::default();
        config.motion.ports.pol2 = config.motion.ports.qwp1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = DaqConfig::default();
        config.motion.settle_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
