//! Analysis of acquired counts.
//!
//! - `statistics`: mean and n-sigma error bars of a sample series
//! - `frequency`: per-group normalization of counts into frequencies
//! - `tomography`: linear-inversion state reconstruction and diagnostics
//! - `hbt`: second-order correlation g²(0)

pub mod frequency;
pub mod hbt;
pub mod statistics;
pub mod tomography;

pub use frequency::{normalize, FrequencyTable};
pub use hbt::{g2_from_run, g2_zero, HbtCalibration, HbtResult};
pub use statistics::SeriesStats;
pub use tomography::{
    reconstruct, reconstruct_from_counts, DensityMatrix, Diagnostics, Pauli, Reconstruction,
    ReconstructionReport, StokesParameters,
};
