//! anima_bench - long trajectories through the whole regulatory core.
//!
//! Drives a [`RegulatoryCore`] through scripted and randomized event
//! streams and checks the emergent behavior:
//! - quiet low-novelty streams settle to baseline with no alerts or unlocks
//! - a burst of prediction failures followed by stabilization raises the floor
//! - forced escalation is caught and the milestone gate rolls back
//! - long silence yields a bounded stream of pressure events
//! - noisy random streams never break an invariant

use anima_core::{EventKind, RawEvent};
use anima_organism::{CycleReport, RegulatoryCore};
use serde_json::{json, Value};

/// Builds well-formed events for one source with a running sequence.
pub struct EventScript {
    source: String,
    sequence: u64,
}

impl EventScript {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            sequence: 0,
        }
    }

    pub fn next(&mut self, kind: EventKind, novelty: f32, payload: Value) -> RawEvent {
        self.sequence += 1;
        RawEvent::new(
            format!("{}-{}", self.source, self.sequence),
            self.source.clone(),
            self.sequence,
            kind,
        )
        .with_novelty(novelty)
        .with_payload(payload)
        .with_timestamp(self.sequence as i64)
    }
}

/// Run `count` idle heartbeats, draining internal pressure after each.
pub fn idle(core: &mut RegulatoryCore, count: u64) -> Vec<CycleReport> {
    let mut reports = Vec::new();
    for _ in 0..count {
        reports.push(core.heartbeat());
        reports.extend(core.drain_internal());
    }
    reports
}

/// A quiet, successful observation.
pub fn calm_payload() -> Value {
    json!({ "ok": true })
}
