//! Hanbury Brown–Twiss second-order correlation at zero delay.
//!
//! With singles rates `R2`, `R3` and coincidence rate `Rc` inside a
//! coincidence window `τc`, accidental coincidences occur at `R2·R3·τc`, so
//!
//! ```text
//! g2(0) = Rc / (R2 · R3 · τc)
//! ```
//!
//! Rates are counts per sample divided by the counting window of one sample.

use crate::acquisition::AcquisitionRun;
use crate::config::HbtConfig;
use crate::error::{AppResult, DaqError};
use crate::experiment::Channel;
use serde::Serialize;
use std::time::Duration;

/// Timing constants of the coincidence unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HbtCalibration {
    /// Coincidence window
    pub coincidence_window: Duration,
    /// Integration time of one sample
    pub count_window: Duration,
}

impl Default for HbtCalibration {
    fn default() -> Self {
        Self::from(&HbtConfig::default())
    }
}

impl From<&HbtConfig> for HbtCalibration {
    fn from(config: &HbtConfig) -> Self {
        Self {
            coincidence_window: config.coincidence_window,
            count_window: config.count_window,
        }
    }
}

/// Outcome of one g²(0) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HbtResult {
    /// Singles rate on APD 2 (1/s)
    pub rate_2: f64,
    /// Singles rate on APD 3 (1/s)
    pub rate_3: f64,
    /// Coincidence rate between APD 2 and 3 (1/s)
    pub coincidence_rate: f64,
    /// Expected accidental coincidence rate (1/s)
    pub accidental_rate: f64,
    /// g²(0)
    pub g2: f64,
}

/// g²(0) from mean counts per sample.
pub fn g2_zero(
    mean_ch2: f64,
    mean_ch3: f64,
    mean_coinc23: f64,
    calibration: &HbtCalibration,
) -> AppResult<HbtResult> {
    let window = calibration.count_window.as_secs_f64();
    let tau = calibration.coincidence_window.as_secs_f64();
    if window <= 0.0 || tau <= 0.0 {
        return Err(DaqError::Analysis(
            "HBT calibration windows must be positive".into(),
        ));
    }

    let rate_2 = mean_ch2 / window;
    let rate_3 = mean_ch3 / window;
    let coincidence_rate = mean_coinc23 / window;
    let accidental_rate = rate_2 * rate_3 * tau;
    if accidental_rate <= 0.0 {
        return Err(DaqError::Analysis(format!(
            "No singles on ch2/ch3 (means {mean_ch2}, {mean_ch3}), g2 undefined"
        )));
    }

    Ok(HbtResult {
        rate_2,
        rate_3,
        coincidence_rate,
        accidental_rate,
        g2: coincidence_rate / accidental_rate,
    })
}

/// g²(0) of the single setting of an HBT run.
pub fn g2_from_run(run: &AcquisitionRun, calibration: &HbtCalibration) -> AppResult<HbtResult> {
    let series = run
        .settings
        .first()
        .ok_or_else(|| DaqError::Analysis("HBT run collected no setting".into()))?;
    g2_zero(
        series.mean(Channel::Ch2),
        series.mean(Channel::Ch3),
        series.mean(Channel::Coinc23),
        calibration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poissonian_light_gives_one() {
        let cal = HbtCalibration::default();
        // 1e5 /s on each detector, 20 ns window → 200 accidentals /s → 20 per 100 ms
        let result = g2_zero(10_000.0, 10_000.0, 20.0, &cal).unwrap();
        assert!((result.rate_2 - 1e5).abs() < 1e-6);
        assert!((result.accidental_rate - 200.0).abs() < 1e-6);
        assert!((result.g2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn antibunched_source_is_below_one() {
        let result = g2_zero(10_000.0, 10_000.0, 5.0, &HbtCalibration::default()).unwrap();
        assert!(result.g2 < 0.5);
    }

    #[test]
    fn missing_singles_is_an_error() {
        assert!(matches!(
            g2_zero(0.0, 500.0, 3.0, &HbtCalibration::default()),
            Err(DaqError::Analysis(_))
        ));
    }
}
