//! Persistence of acquisition runs.

pub mod storage;

pub use storage::{read_run, CsvWriter, SavedRun, SavedSetting};
