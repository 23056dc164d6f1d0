//! Experiment descriptors and the session that runs them.

pub mod session;
pub mod variant;

pub use session::{explain_setup, ExperimentSession, Hardware};
pub use variant::{
    Basis, Channel, Component, ExperimentVariant, OpticsAngles, Projection, Setting, SettingGroup,
    VariantKind,
};
