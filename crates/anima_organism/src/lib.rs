//! # Anima Organism
//!
//! The background regulatory core assembled from its parts:
//!
//! - [`HealthMonitor`] watches the trajectory for pathological dynamics.
//! - [`MilestoneGate`] unlocks capability levels from evidence only and
//!   rolls back on fatal alerts.
//! - [`RegulatoryCore`] runs one cycle per event or heartbeat.
//! - [`CoreHandle`] keeps a core alive on a tokio task.

pub mod coordinator;
pub mod health;
pub mod milestone;
pub mod runtime;

pub use coordinator::{CoreSnapshot, CycleReport, RegulatoryCore};
pub use health::{HealthMonitor, HealthSnapshot, HealthView};
pub use milestone::{
    Condition, Milestone, MilestoneEvidence, MilestoneGate, MilestoneLevel, MilestonePolicy,
    MilestoneRequirements, MilestoneSnapshot, MilestoneTransition, TransitionKind,
};
pub use runtime::{archive_report, CoreHandle};
