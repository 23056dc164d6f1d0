//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place where every failure an
//! acquisition or analysis pass can hit is named, from configuration and I/O
//! problems to the analysis conditions that make a reconstruction meaningless.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: file parsing (figment) and semantic
//!   validation failures. Both are raised before any hardware is touched.
//! - **`Connection`**: the device link could not be established. Fatal, the run
//!   aborts before acquisition.
//! - **`Instrument`**: a driver call failed (e.g. a motor target was rejected).
//! - **`LatchTimeout`**: the detector stream did not deliver a complete set of
//!   samples in time. The sequencer downgrades this to a per-setting failure.
//! - **`ZeroGroupTotal`**: a measurement basis collected no counts at all, so no
//!   probabilities can be assigned. Fatal for the analysis pass.
//! - **`Analysis`** / **`MissingSetting`** / **`Parse`**: other conditions that
//!   end an analysis pass or an offline file read.
//!
//! Questionable-but-valid results (timed-out actuators, zero-count outcomes,
//! non-physical density matrices) are never errors; they surface as warnings
//! and diagnostics on the `Ok` path.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every failure the acquisition and analysis layers can report.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds an invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Device link could not be established.
    #[error("Failed to connect to device at {address}: {reason}")]
    Connection {
        /// Address the link was attempted on.
        address: String,
        /// Driver-reported reason.
        reason: String,
    },

    /// A driver call failed.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// The latch did not hold a complete sample set before the deadline.
    #[error("Timed out after {waited:?} waiting for samples on {channels}")]
    LatchTimeout {
        /// Channels that were still empty.
        channels: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A setting group summed to zero counts.
    #[error("No total count for basis group {group}")]
    ZeroGroupTotal {
        /// Group name.
        group: String,
    },

    /// A setting label is unknown to the experiment.
    #[error("Unknown setting '{0}'")]
    MissingSetting(String),

    /// Analysis could not produce a result.
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// A saved data file is malformed.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the run can continue past this error.
    ///
    /// Only conditions local to one setting are recoverable; everything else
    /// ends the run or the analysis pass.
    pub fn can_recover(&self) -> bool {
        matches!(self, DaqError::LatchTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_timeout_is_recoverable() {
        let err = DaqError::LatchTimeout {
            channels: "ch1, coinc12".into(),
            waited: Duration::from_secs(10),
        };
        assert!(err.can_recover());
        assert!(err.to_string().contains("coinc12"));
    }

    #[test]
    fn zero_group_total_is_terminal() {
        let err = DaqError::ZeroGroupTotal {
            group: "ZZ".into(),
        };
        assert!(!err.can_recover());
        assert_eq!(err.to_string(), "No total count for basis group ZZ");
    }

    #[test]
    fn connection_error_names_address() {
        let err = DaqError::Connection {
            address: "192.168.0.1".into(),
            reason: "error 3".into(),
        };
        assert!(!err.can_recover());
        assert!(err.to_string().contains("192.168.0.1"));
    }
}
