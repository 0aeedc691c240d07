//! Health alerts surfaced by the monitor.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Arousal stopped coming down while elevated
    RunawayArousal,
    /// Confidence floor fell without a severe failure
    FloorViolation,
    /// Consolidation frequency above the rate cap
    WriteStorm,
    /// A preference gradient saturated and stopped responding
    PreferenceLock,
    /// Disturbance cycles shrinking without the floor rising
    ZenoCollapse,
    /// Episodic/semantic inconsistency found during consolidation
    MemoryIntegrity,
}

impl AlertKind {
    pub fn severity(self) -> Severity {
        match self {
            AlertKind::WriteStorm | AlertKind::PreferenceLock => Severity::Warning,
            AlertKind::RunawayArousal
            | AlertKind::FloorViolation
            | AlertKind::ZenoCollapse
            | AlertKind::MemoryIntegrity => Severity::Fatal,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertKind::RunawayArousal => "runaway_arousal",
            AlertKind::FloorViolation => "floor_violation",
            AlertKind::WriteStorm => "write_storm",
            AlertKind::PreferenceLock => "preference_lock",
            AlertKind::ZenoCollapse => "zeno_collapse",
            AlertKind::MemoryIntegrity => "memory_integrity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    /// Forces a milestone rollback in the same cycle
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub cycle: u64,
    pub evidence: String,
}

impl HealthAlert {
    pub fn new(kind: AlertKind, cycle: u64, evidence: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            cycle,
            evidence: evidence.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}
