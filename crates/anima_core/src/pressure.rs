//! Internal motivational events.
//!
//! Pressure events travel on their own channel and re-enter intake as
//! `internal` events from [`PRESSURE_SOURCE`]. They are never external
//! actions.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use crate::event::{EventKind, RawEvent};

/// Source tag of every self-generated pressure event.
pub const PRESSURE_SOURCE: &str = "pressure_emitter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Drive {
    /// Unresolved arousal / uncertainty
    Stability,
    /// Accumulated curiosity pressure
    Curiosity,
    /// Drive to keep experience flowing during long silence
    Continuity,
}

impl fmt::Display for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Drive::Stability => "stability",
            Drive::Curiosity => "curiosity",
            Drive::Continuity => "continuity",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureKind {
    Nudge,
    /// Idle period far beyond the threshold
    Escalation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureEvent {
    pub id: Uuid,
    pub kind: PressureKind,
    pub drive: Drive,
    pub magnitude: f32,
    pub cycle: u64,
    /// Sequence number on the emitter's own source stream
    pub sequence: u64,
}

impl PressureEvent {
    /// Wire form used to feed the event back through intake.
    pub fn to_raw(&self) -> RawEvent {
        RawEvent::new(
            self.id.to_string(),
            PRESSURE_SOURCE,
            self.sequence,
            EventKind::Internal,
        )
        .with_payload(json!({
            "pressure_kind": self.kind,
            "drive": self.drive,
            "magnitude": self.magnitude,
            "emitted_at_cycle": self.cycle,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_raw_is_internal_from_emitter() {
        let ev = PressureEvent {
            id: Uuid::new_v4(),
            kind: PressureKind::Nudge,
            drive: Drive::Curiosity,
            magnitude: 0.4,
            cycle: 50,
            sequence: 1,
        };
        let raw = ev.to_raw();
        assert_eq!(raw.source.as_deref(), Some(PRESSURE_SOURCE));
        assert_eq!(raw.kind.as_deref(), Some("internal"));
        assert_eq!(raw.sequence, Some(1));
        assert_eq!(raw.payload["drive"], "curiosity");
        assert_eq!(raw.novelty_score, None);
    }
}
