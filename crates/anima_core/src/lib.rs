//! # Anima Core
//!
//! Types shared by every part of the background regulatory core: the event
//! schema, the regulatory state vector, alerts, pressure events, the cycle
//! clock, configuration and the error taxonomy.

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod pressure;
pub mod snapshot;
pub mod state;

pub use alert::{AlertKind, HealthAlert, Severity};
pub use clock::{CycleClock, CycleCounter};
pub use config::{
    AnimaConfig, ConsolidationConfig, HealthConfig, IntakeConfig, PreferenceConfig,
    PressureConfig, RegulatorConfig, RuntimeConfig,
};
pub use error::{
    ConfigError, GateError, MemoryIntegrityError, QuarantineError, QuarantineReason,
    StructuralViolation, ViolationKind,
};
pub use event::{EventKind, EventRecord, EventSignals, RawEvent};
pub use pressure::{Drive, PressureEvent, PressureKind, PRESSURE_SOURCE};
pub use snapshot::SnapshotCell;
pub use state::EmotionalState;
