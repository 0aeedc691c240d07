//! Error taxonomy of the regulatory core.
//!
//! Local, recoverable conditions (quarantine, rejected updates) are absorbed
//! by the component that detects them. Nothing here is allowed to crash the
//! core.

use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Intake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuarantineReason {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
    #[error("sequence {got} from `{origin}` does not follow {last}")]
    OutOfOrder { origin: String, last: u64, got: u64 },
    #[error("novelty score {0} outside [0, 1]")]
    InvalidNovelty(f32),
    #[error("duplicate event id `{0}`")]
    DuplicateId(String),
    #[error("source `{0}` is reserved for self-generated events")]
    ReservedSource(String),
}

/// Malformed or out-of-order input. Logged and dropped; processing continues.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("event `{}` quarantined at cycle {cycle}: {reason}", .event_id.as_deref().unwrap_or("<no id>"))]
pub struct QuarantineError {
    pub event_id: Option<String>,
    pub reason: QuarantineReason,
    /// Core cycle when the event was seen (the cycle does not advance for it)
    pub cycle: u64,
}

// ============================================================================
// Regulator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViolationKind {
    #[error("confidence floor would fall from {from:.4} to {to:.4} without a severe failure")]
    FloorLowered { from: f32, to: f32 },
    #[error("arousal would jump from {from:.4} to {to:.4} (bound {bound:.4})")]
    ArousalJump { from: f32, to: f32, bound: f32 },
    #[error("confidence {confidence:.4} would sit below its floor {floor:.4}")]
    BelowFloor { confidence: f32, floor: f32 },
    #[error("`{0}` would become non-finite")]
    NonFinite(&'static str),
    #[error("`{field}` = {value} leaves its bounds")]
    OutOfBounds { field: &'static str, value: f32 },
}

/// An update that would break a core invariant. Rejected; the prior state is kept.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("structural violation at cycle {cycle}: {kind}")]
pub struct StructuralViolation {
    pub cycle: u64,
    pub kind: ViolationKind,
}

// ============================================================================
// Memory
// ============================================================================

/// Episodic/semantic inconsistency. Halts consolidation only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryIntegrityError {
    #[error("episodic record `{0}` is not present in the log")]
    MissingRecord(String),
    #[error("episodic record `{id}` was already consolidated into batch {batch}")]
    AlreadyConsolidated { id: String, batch: Uuid },
    #[error("episodic id `{0}` appended twice")]
    DuplicateRecord(String),
    #[error("consolidation is halted after an earlier integrity failure")]
    Halted,
}

// ============================================================================
// Milestones
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("milestone level {requested} requested outside the evidence path; manual transitions are never accepted")]
    ManualTransition { requested: u8 },
    #[error("evidence from cycle {evidence} is older than the gate's last evaluation at cycle {gate}")]
    StaleSnapshot { evidence: u64, gate: u64 },
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid threshold `{field}`: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
