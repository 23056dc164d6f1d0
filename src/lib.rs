//! # Photon DAQ Core Library
//!
//! Acquisition and analysis for polarization-qubit experiments on a
//! photon-counting unit with motorized wave plates and polarizers. The
//! library is shared by the `photon_daq` command-line frontend and the
//! integration tests.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: the channel latch fed by the counting unit's event
//!   stream, the actuator synchronizer, and the measurement sequencer that
//!   walks an experiment's settings.
//! - **`analysis`**: series statistics, per-basis frequency normalization,
//!   linear state tomography with physicality diagnostics, and HBT g²(0).
//! - **`config`**: figment-based configuration (defaults, TOML file,
//!   `PHOTON_DAQ_` environment variables).
//! - **`data`**: CSV persistence of runs and the reader used for offline
//!   re-analysis.
//! - **`error`**: the crate-wide `DaqError` enum.
//! - **`experiment`**: experiment variant descriptors (channels, settings,
//!   basis groups, optics) and the session that runs one against hardware.
//! - **`hardware`**: capability traits the acquisition core drives, plus mock
//!   devices.
//! - **`logging`**: `tracing` subscriber setup.

pub mod acquisition;
pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod logging;
