//! # Anima Limbic
//!
//! Fast state regulation for the background core:
//!
//! - [`StateRegulator`]: the only writer of the regulatory state vector.
//!   Every update is checked against the structural invariants and rejected
//!   (fail-closed) if it would break one.
//! - [`PressureEmitter`]: bounded emission of internal pressure during idle
//!   stretches.
//! - [`HeartbeatConfig`]: pacing of the idle heartbeat.

mod heartbeat;
mod pressure;
mod regulator;

pub use heartbeat::HeartbeatConfig;
pub use pressure::{DriveState, PressureEmitter};
pub use regulator::{validate_transition, StateRegulator, StateUpdate, UpdateCause};
