//! Acquisition core: the channel latch shared with the event source, the
//! actuator synchronizer, and the sequencer that drives both through the
//! settings of an experiment.

pub mod latch;
pub mod motion;
pub mod sequencer;

pub use latch::{ChannelLatch, CountEvent, Sample};
pub use motion::{
    degrees_to_steps, steps_to_degrees, ActuatorStatus, ActuatorSynchronizer, MotorId,
    SettleReport, TargetAssignment,
};
pub use sequencer::{
    AcquisitionRun, MeasurementSequencer, SequencerState, SequencerTiming, SettingSeries,
};
