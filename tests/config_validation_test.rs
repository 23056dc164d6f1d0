//! Tests for loading and validating configuration files.

use photon_daq::config::DaqConfig;
use photon_daq::error::DaqError;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/photon_daq.toml");
    let config = DaqConfig::load_from(&path).unwrap();
    let defaults = DaqConfig::default();

    assert_eq!(config.acquisition.samples_per_setting, defaults.acquisition.samples_per_setting);
    assert_eq!(config.acquisition.sample_interval, defaults.acquisition.sample_interval);
    assert_eq!(config.acquisition.latch_timeout, defaults.acquisition.latch_timeout);
    assert_eq!(config.motion.settle_timeout, defaults.motion.settle_timeout);
    assert_eq!(config.motion.ports, defaults.motion.ports);
    assert_eq!(config.hbt.coincidence_window, Duration::from_nanos(20));
    assert_eq!(config.hbt.count_window, Duration::from_millis(100));
    assert_eq!(config.device.address, "192.168.0.1");
}

#[test]
fn test_unparseable_duration_rejected() {
    let file = write_config("[motion]\nsettle_timeout = \"soon\"\n");
    assert!(matches!(DaqConfig::load_from(file.path()), Err(DaqError::Config(_))));
}

#[test]
fn test_non_positive_n_sigma_rejected() {
    let file = write_config("[output]\nn_sigma = 0.0\n");
    let err = DaqConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, DaqError::Configuration(_)));
    assert!(err.to_string().contains("n_sigma"));
}

#[test]
fn test_port_collision_rejected() {
    let file = write_config("[motion.ports]\nqwp1 = 1\nqwp2 = 1\n");
    let err = DaqConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("Motor port 1"));
}

#[test]
fn test_zero_samples_rejected() {
    let file = write_config("[acquisition]\nsamples_per_setting = 0\n");
    assert!(matches!(
        DaqConfig::load_from(file.path()),
        Err(DaqError::Configuration(_))
    ));
}

#[test]
fn test_override_replaces_invalid_file_value_before_validation() {
    let file = write_config("[application]\nlog_level = \"loud\"\n");
    assert!(matches!(
        DaqConfig::load_from(file.path()),
        Err(DaqError::Configuration(_))
    ));

    let config = DaqConfig::load_with(file.path(), |config| {
        config.application.log_level = "debug".into();
    })
    .unwrap();
    assert_eq!(config.application.log_level, "debug");
}

#[test]
fn test_invalid_override_is_still_rejected() {
    let file = write_config("");
    let err = DaqConfig::load_with(file.path(), |config| {
        config.application.log_level = "loud".into();
    })
    .unwrap_err();
    assert!(err.to_string().contains("log_level"));
}
