//! # Anima Memory
//!
//! Everything the core remembers:
//!
//! - [`EventIntake`] validates raw events, owns the cycle clock and appends
//!   to the [`EpisodicLog`].
//! - [`ConsolidationScheduler`] folds episodic records into
//!   [`SemanticRecord`]s and steps [`PreferenceGradient`]s.
//! - [`SqliteArchive`] keeps a durable append-only copy for replay and audit.

pub mod consolidation;
pub mod episodic;
pub mod intake;
pub mod preference;
pub mod sqlite;

pub use consolidation::{
    signature, ConsolidationBatch, ConsolidationScheduler, ConsolidationTrigger, PatternSummary,
    SemanticRecord,
};
pub use episodic::{EpisodicEntry, EpisodicLog, EpisodicReader};
pub use intake::EventIntake;
pub use preference::{PreferenceBook, PreferenceGradient, StrainObservation};
pub use sqlite::{ArchiveCounts, SqliteArchive};
