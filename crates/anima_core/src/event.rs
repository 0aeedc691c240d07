//! Event schema shared by every collaborator of the core.
//!
//! Upstream collaborators (embodiment, cognition, world, SLED) deliver
//! [`RawEvent`]s. Intake validates them into immutable [`EventRecord`]s.
//! The core never interprets event *content*: everything it reacts to is
//! pulled out as structural [`EventSignals`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::pressure::PRESSURE_SOURCE;

/// High-level classification of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Something perceived
    Observation,
    /// Something attempted
    Action,
    /// Result of an action
    Outcome,
    /// Drive change, thought, self-generated pressure
    Internal,
    /// Startup, shutdown, warnings
    System,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Observation => "observation",
            EventKind::Action => "action",
            EventKind::Outcome => "outcome",
            EventKind::Internal => "internal",
            EventKind::System => "system",
        }
    }

    /// Parse the wire name of a kind. Case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "observation" => Some(EventKind::Observation),
            "action" => Some(EventKind::Action),
            "outcome" => Some(EventKind::Outcome),
            "internal" => Some(EventKind::Internal),
            "system" => Some(EventKind::System),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as delivered by a collaborator, before validation.
///
/// Every field is optional on the wire so that malformed input can be
/// deserialized and then quarantined instead of failing at the parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub id: Option<String>,
    pub sequence: Option<u64>,
    pub source: Option<String>,
    pub kind: Option<String>,
    pub payload: Value,
    #[serde(alias = "noveltyScore")]
    pub novelty_score: Option<f32>,
    pub timestamp: Option<i64>,
}

impl RawEvent {
    /// Build a well-formed event with an empty payload.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        sequence: u64,
        kind: EventKind,
    ) -> Self {
        Self {
            id: Some(id.into()),
            sequence: Some(sequence),
            source: Some(source.into()),
            kind: Some(kind.as_str().to_string()),
            payload: Value::Object(Default::default()),
            novelty_score: None,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_novelty(mut self, novelty: f32) -> Self {
        self.novelty_score = Some(novelty);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A validated, immutable entry of the episodic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub sequence: u64,
    pub source: String,
    pub kind: EventKind,
    pub payload: Value,
    pub novelty_score: Option<f32>,
    /// Collaborator-supplied timestamp. Informational only, never drives a transition.
    pub timestamp: i64,
    /// Core cycle at which the record was accepted.
    pub cycle: u64,
}

impl EventRecord {
    pub fn signals(&self) -> EventSignals {
        EventSignals::extract(self)
    }

    /// True for pressure events the core synthesized itself.
    pub fn is_self_generated(&self) -> bool {
        self.kind == EventKind::Internal && self.source == PRESSURE_SOURCE
    }
}

/// Structural features of an event, supplied by upstream collaborators.
///
/// Payload conventions: `ok` (bool), `prediction_failure` (bool),
/// `severe_failure` (bool), `contradiction` / `surprise` /
/// `pattern_stability` (0..1), `subject` (string) and `strain_delta`
/// (negative = strain reduced). Out-of-range numbers are clamped,
/// non-finite numbers ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSignals {
    pub novelty: f32,
    pub contradiction: f32,
    pub surprise: f32,
    pub failure: bool,
    pub success: bool,
    pub severe_failure: bool,
    pub pattern_stability: Option<f32>,
    pub subject: Option<String>,
    pub strain_delta: Option<f32>,
}

impl EventSignals {
    pub fn extract(record: &EventRecord) -> Self {
        let payload = &record.payload;
        let ok = payload.get("ok").and_then(Value::as_bool);
        let prediction_failure = flag(payload, "prediction_failure");
        let severe_failure = flag(payload, "severe_failure");

        Self {
            novelty: record
                .novelty_score
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            contradiction: unit(payload, "contradiction").unwrap_or(0.0),
            surprise: unit(payload, "surprise").unwrap_or(0.0),
            failure: ok == Some(false) || prediction_failure || severe_failure,
            success: ok == Some(true),
            severe_failure,
            pattern_stability: unit(payload, "pattern_stability"),
            subject: payload
                .get("subject")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            strain_delta: finite(payload, "strain_delta").map(|v| v.clamp(-1.0, 1.0)),
        }
    }
}

fn flag(payload: &Value, key: &str) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn finite(payload: &Value, key: &str) -> Option<f32> {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .filter(|v| v.is_finite())
}

fn unit(payload: &Value, key: &str) -> Option<f32> {
    finite(payload, key).map(|v| v.clamp(0.0, 1.0))
}
