//! Engine State Model
//!
//! Typed telemetry and protection state, and the projection of decoded
//! responses into events for collaborators.

mod parameters;
mod projector;
mod status;

pub use parameters::{CriticalFlags, EngineParameters};
pub use projector::{Projection, Projector};
pub use status::{ProtectionStatus, RegulatorFlags};
