//! Event intake.
//!
//! Validates raw events into [`EventRecord`]s, owns the cycle clock and
//! appends accepted records to the episodic log. Bad input is quarantined:
//! logged, kept in a bounded inspection log and dropped. Quarantine never
//! advances the cycle.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anima_core::{
    CycleClock, CycleCounter, EventKind, EventRecord, IntakeConfig, PressureEvent,
    QuarantineError, QuarantineReason, RawEvent, PRESSURE_SOURCE,
};

use crate::episodic::EpisodicLog;

pub struct EventIntake {
    config: IntakeConfig,
    clock: Box<dyn CycleClock>,
    log: EpisodicLog,
    /// Highest accepted sequence per source
    last_sequence: HashMap<String, u64>,
    quarantine: VecDeque<QuarantineError>,
    quarantined_total: u64,
}

impl EventIntake {
    pub fn new(config: IntakeConfig, log: EpisodicLog) -> Self {
        Self::with_clock(config, log, Box::new(CycleCounter::new()))
    }

    pub fn with_clock(config: IntakeConfig, log: EpisodicLog, clock: Box<dyn CycleClock>) -> Self {
        Self {
            config,
            clock,
            log,
            last_sequence: HashMap::new(),
            quarantine: VecDeque::new(),
            quarantined_total: 0,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.clock.current()
    }

    pub fn log(&self) -> &EpisodicLog {
        &self.log
    }

    pub fn quarantined_total(&self) -> u64 {
        self.quarantined_total
    }

    /// Recently quarantined events, oldest first.
    pub fn quarantined(&self) -> impl Iterator<Item = &QuarantineError> {
        self.quarantine.iter()
    }

    /// Accept an event from an external collaborator.
    pub fn ingest(&mut self, raw: RawEvent) -> Result<Arc<EventRecord>, QuarantineError> {
        if raw.source.as_deref() == Some(PRESSURE_SOURCE) {
            let source = PRESSURE_SOURCE.to_string();
            return Err(self.quarantine(raw.id, QuarantineReason::ReservedSource(source)));
        }
        self.accept(raw)
    }

    /// Feed a self-generated pressure event back through intake.
    pub fn ingest_pressure(
        &mut self,
        event: &PressureEvent,
    ) -> Result<Arc<EventRecord>, QuarantineError> {
        self.accept(event.to_raw())
    }

    /// Advance the clock for an idle heartbeat and return the new cycle.
    pub fn tick_heartbeat(&mut self) -> u64 {
        self.clock.tick()
    }

    fn accept(&mut self, raw: RawEvent) -> Result<Arc<EventRecord>, QuarantineError> {
        let id = raw.id.clone();
        let validated = self.validate(raw);
        let (record, source) = match validated {
            Ok(ok) => ok,
            Err(reason) => return Err(self.quarantine(id, reason)),
        };

        let cycle = self.clock.tick();
        let sequence = record.sequence;
        let record = EventRecord { cycle, ..record };

        match self.log.append(record) {
            Ok(record) => {
                self.last_sequence.insert(source, sequence);
                tracing::debug!(
                    "Accepted {} event `{}` from {} at cycle {}",
                    record.kind,
                    record.id,
                    record.source,
                    cycle
                );
                Ok(record)
            }
            // Only reachable if the log was appended to behind intake's back
            Err(_) => {
                let reason = QuarantineReason::DuplicateId(id.clone().unwrap_or_default());
                Err(self.quarantine(id, reason))
            }
        }
    }

    fn validate(&self, raw: RawEvent) -> Result<(EventRecord, String), QuarantineReason> {
        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(QuarantineReason::MissingField("id"))?;
        let source = raw
            .source
            .filter(|s| !s.trim().is_empty())
            .ok_or(QuarantineReason::MissingField("source"))?;
        let sequence = raw.sequence.ok_or(QuarantineReason::MissingField("sequence"))?;
        let kind_name = raw.kind.ok_or(QuarantineReason::MissingField("kind"))?;
        let kind = EventKind::parse(&kind_name).ok_or(QuarantineReason::UnknownKind(kind_name))?;
        let timestamp = raw
            .timestamp
            .ok_or(QuarantineReason::MissingField("timestamp"))?;

        if let Some(novelty) = raw.novelty_score {
            if !novelty.is_finite() || !(0.0..=1.0).contains(&novelty) {
                return Err(QuarantineReason::InvalidNovelty(novelty));
            }
        }

        if self.log.contains(&id) {
            return Err(QuarantineReason::DuplicateId(id));
        }

        if let Some(&last) = self.last_sequence.get(&source) {
            if sequence <= last {
                return Err(QuarantineReason::OutOfOrder {
                    origin: source,
                    last,
                    got: sequence,
                });
            }
        }

        let record = EventRecord {
            id,
            sequence,
            source: source.clone(),
            kind,
            payload: raw.payload,
            novelty_score: raw.novelty_score,
            timestamp,
            cycle: 0,
        };
        Ok((record, source))
    }

    fn quarantine(&mut self, event_id: Option<String>, reason: QuarantineReason) -> QuarantineError {
        let err = QuarantineError {
            event_id,
            reason,
            cycle: self.clock.current(),
        };
        tracing::warn!("{}", err);

        self.quarantine.push_back(err.clone());
        while self.quarantine.len() > self.config.quarantine_log_capacity {
            self.quarantine.pop_front();
        }
        self.quarantined_total += 1;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_core::{Drive, PressureKind};
    use serde_json::json;
    use uuid::Uuid;

    fn intake() -> EventIntake {
        EventIntake::new(IntakeConfig::default(), EpisodicLog::new())
    }

    fn raw(id: &str, source: &str, seq: u64) -> RawEvent {
        RawEvent::new(id, source, seq, EventKind::Observation)
    }

    #[test]
    fn test_accept_assigns_cycles() {
        let mut intake = intake();
        let a = intake.ingest(raw("a", "world", 1)).unwrap();
        let b = intake.ingest(raw("b", "sled", 1)).unwrap();
        assert_eq!(a.cycle, 1);
        assert_eq!(b.cycle, 2);
        assert_eq!(intake.cycle(), 2);
        assert_eq!(intake.log().len(), 2);
    }

    #[test]
    fn test_out_of_order_is_quarantined_without_tick() {
        let mut intake = intake();
        intake.ingest(raw("a", "world", 5)).unwrap();
        let err = intake.ingest(raw("b", "world", 5)).unwrap_err();
        assert!(matches!(err.reason, QuarantineReason::OutOfOrder { last: 5, got: 5, .. }));
        assert_eq!(err.cycle, 1);
        assert_eq!(intake.cycle(), 1);
        assert_eq!(intake.quarantined_total(), 1);

        // Sequences are tracked per source
        assert!(intake.ingest(raw("c", "cognition", 1)).is_ok());
    }

    #[test]
    fn test_malformed_events_are_quarantined() {
        let mut intake = intake();

        let missing_id = RawEvent {
            id: None,
            ..raw("x", "world", 1)
        };
        assert_eq!(
            intake.ingest(missing_id).unwrap_err().reason,
            QuarantineReason::MissingField("id")
        );

        let bad_kind = RawEvent {
            kind: Some("dream".to_string()),
            ..raw("y", "world", 1)
        };
        assert!(matches!(
            intake.ingest(bad_kind).unwrap_err().reason,
            QuarantineReason::UnknownKind(_)
        ));

        let no_timestamp = RawEvent {
            timestamp: None,
            ..raw("z", "world", 1)
        };
        assert_eq!(
            intake.ingest(no_timestamp).unwrap_err().reason,
            QuarantineReason::MissingField("timestamp")
        );

        let nan = raw("n", "world", 1).with_novelty(f32::NAN);
        assert!(matches!(
            intake.ingest(nan).unwrap_err().reason,
            QuarantineReason::InvalidNovelty(_)
        ));

        assert_eq!(intake.cycle(), 0);
        assert!(intake.log().is_empty());
        assert_eq!(intake.quarantined().count(), 4);
    }

    #[test]
    fn test_duplicate_id_is_quarantined() {
        let mut intake = intake();
        intake.ingest(raw("a", "world", 1)).unwrap();
        let err = intake.ingest(raw("a", "world", 2)).unwrap_err();
        assert_eq!(err.reason, QuarantineReason::DuplicateId("a".to_string()));
    }

    #[test]
    fn test_reserved_source_only_via_pressure_path() {
        let mut intake = intake();
        let spoofed = RawEvent::new("p", PRESSURE_SOURCE, 1, EventKind::Internal)
            .with_payload(json!({"magnitude": 1.0}));
        assert!(matches!(
            intake.ingest(spoofed).unwrap_err().reason,
            QuarantineReason::ReservedSource(_)
        ));

        let pressure = PressureEvent {
            id: Uuid::new_v4(),
            kind: PressureKind::Nudge,
            drive: Drive::Continuity,
            magnitude: 0.3,
            cycle: 0,
            sequence: 1,
        };
        let record = intake.ingest_pressure(&pressure).unwrap();
        assert!(record.is_self_generated());
    }

    #[test]
    fn test_quarantine_log_is_bounded() {
        let mut intake = EventIntake::new(
            IntakeConfig {
                quarantine_log_capacity: 3,
            },
            EpisodicLog::new(),
        );
        for _ in 0..10 {
            let _ = intake.ingest(RawEvent::default());
        }
        assert_eq!(intake.quarantined().count(), 3);
        assert_eq!(intake.quarantined_total(), 10);
    }

    #[test]
    fn test_heartbeat_advances_clock() {
        let mut intake = intake();
        assert_eq!(intake.tick_heartbeat(), 1);
        let record = intake.ingest(raw("a", "world", 1)).unwrap();
        assert_eq!(record.cycle, 2);
    }
}
