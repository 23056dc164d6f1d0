//! Series statistics.

use serde::{Deserialize, Serialize};

/// Arithmetic mean. `NaN` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 in the denominator).
///
/// `None` with fewer than two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Mean of a count series with an n-sigma standard-error bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    /// Mean count
    pub mean: f64,
    /// `n_sigma / sqrt(n) * std`, 0 with fewer than two samples
    pub error: f64,
    /// Number of samples
    pub n: usize,
}

impl SeriesStats {
    /// Statistics of `samples`; all zero for an empty series.
    pub fn from_samples(samples: &[i64], n_sigma: f64) -> Self {
        let values: Vec<f64> = samples.iter().map(|&v| v as f64).collect();
        if values.is_empty() {
            return Self {
                mean: 0.0,
                error: 0.0,
                n: 0,
            };
        }
        let error = sample_std(&values)
            .map(|std| n_sigma / (values.len() as f64).sqrt() * std)
            .unwrap_or(0.0);
        Self {
            mean: mean(&values),
            error,
            n: values.len(),
        }
    }
}
