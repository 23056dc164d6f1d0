//! Hardware abstraction.
//!
//! The acquisition core only sees the capability traits in [`capabilities`].
//! [`mock`] provides simulated devices for running without the apparatus.

pub mod capabilities;
pub mod mock;

pub use capabilities::{CountSource, DeviceLink, MotorController};
pub use mock::{
    CountModel, FixedCounts, MockCountSource, MockDeviceLink, MockMotorController, StateCounts,
};
