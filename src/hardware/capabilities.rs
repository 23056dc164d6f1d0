//! Hardware Capabilities
//!
//! Small capability traits the acquisition core talks to. A concrete adapter
//! for the counting unit implements whichever of these it supports and is
//! chosen once at startup; the core never probes a driver for method names.
//!
//! - `DeviceLink` – bring the hardware link up and down
//! - `MotorController` – command and poll the motorized optics
//! - `CountSource` – deliver detector count events into a latch
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait]) where it talks to hardware
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park<M: MotorController>(motors: &M) -> Result<()> {
//!     for motor in 1..=4 {
//!         motors.set_target(motor, 0).await?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::acquisition::latch::ChannelLatch;
use crate::acquisition::motion::MotorId;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Capability: Device Link
///
/// Connection lifecycle of the counting unit.
///
/// # Contract
/// - `connect` fails with a driver-specific reason when the link cannot be
///   established; callers treat this as fatal
/// - `disconnect` is only called after a successful `connect`
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Establish the link
    async fn connect(&self, address: &str) -> Result<()>;

    /// Tear the link down
    async fn disconnect(&self) -> Result<()>;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;
}

/// Capability: Motor Control
///
/// Stepper motors holding wave plates and polarizers.
///
/// # Contract
/// - Positions are in device steps
/// - `set_target` initiates motion and returns immediately (fire-and-forget)
/// - `current_position` may be polled while the motor is moving
#[async_trait]
pub trait MotorController: Send + Sync {
    /// Command `motor` to move to `steps`
    async fn set_target(&self, motor: MotorId, steps: i64) -> Result<()>;

    /// Current position of `motor` in steps
    async fn current_position(&self, motor: MotorId) -> Result<i64>;
}

/// Capability: Count Delivery
///
/// Source of asynchronous detector events. The source owns its own execution
/// context and pushes every event into the registered latch through
/// [`ChannelLatch::on_event`].
pub trait CountSource: Send + Sync {
    /// Start delivering events into `latch`
    fn register(&self, latch: Arc<ChannelLatch>) -> Result<()>;

    /// Stop delivering events
    fn unregister(&self) -> Result<()>;
}
