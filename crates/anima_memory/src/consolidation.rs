//! Consolidation - folding episodic experience into semantic records
//!
//! The scheduler decides *when* to consolidate from structural signals only:
//!
//! - density of unconsolidated events in a sliding cycle window
//! - a cluster of near-duplicate events (same source, kind, payload shape and
//!   novelty bucket)
//! - arousal that has just started to fall after a local peak
//! - a long idle stretch while uncertainty or arousal stay elevated
//!
//! A batch merges the oldest unconsolidated records into one
//! [`SemanticRecord`], steps preference gradients and marks the sources as
//! consolidated. Batches are rate limited; a trigger that arrives too early is
//! coalesced into a single pending slot and served at the next opportunity.
//! The scheduler is only ever driven through `&mut self` by the core's single
//! owner, so two batches can never be in flight at once.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use anima_core::{
    ConsolidationConfig, EmotionalState, EventRecord, MemoryIntegrityError, PreferenceConfig,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::episodic::EpisodicLog;
use crate::preference::{PreferenceBook, StrainObservation};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsolidationTrigger {
    Density { events: usize },
    Repetition { signature: String, count: usize },
    ArousalPeak { peak: f32 },
    IdleInstability { idle_cycles: u64 },
}

impl ConsolidationTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            ConsolidationTrigger::Density { .. } => "density",
            ConsolidationTrigger::Repetition { .. } => "repetition",
            ConsolidationTrigger::ArousalPeak { .. } => "arousal_peak",
            ConsolidationTrigger::IdleInstability { .. } => "idle_instability",
        }
    }
}

impl fmt::Display for ConsolidationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidationTrigger::Density { events } => write!(f, "density ({} events)", events),
            ConsolidationTrigger::Repetition { signature, count } => {
                write!(f, "repetition ({} x {})", count, signature)
            }
            ConsolidationTrigger::ArousalPeak { peak } => write!(f, "arousal peak ({:.3})", peak),
            ConsolidationTrigger::IdleInstability { idle_cycles } => {
                write!(f, "idle instability ({} cycles)", idle_cycles)
            }
        }
    }
}

/// Audit record of one consolidation. Immutable and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationBatch {
    pub id: Uuid,
    pub source_event_ids: BTreeSet<String>,
    pub resulting_semantic_id: Uuid,
    pub created_at_cycle: u64,
    pub trigger: ConsolidationTrigger,
}

/// Aggregate of the events sharing one signature inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub signature: String,
    pub count: usize,
    /// Exact duplicates collapse into one
    pub distinct_payloads: usize,
    pub first_cycle: u64,
    pub last_cycle: u64,
    pub span: u64,
    pub novelty_mean: f32,
    pub novelty_variance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub patterns: Vec<PatternSummary>,
    pub source_event_count: usize,
    pub created_at_cycle: u64,
}

/// Near-duplicate key: source, kind, payload key set and novelty bucket.
pub fn signature(record: &EventRecord, buckets: u32) -> String {
    let mut keys: Vec<&str> = record
        .payload
        .as_object()
        .map(|map| map.keys().map(String::as_str).collect())
        .unwrap_or_default();
    keys.sort_unstable();

    let bucket = match record.novelty_score {
        Some(n) if n.is_finite() => {
            let b = (n.clamp(0.0, 1.0) * buckets as f32) as u32;
            b.min(buckets.saturating_sub(1)).to_string()
        }
        _ => "-".to_string(),
    };

    format!("{}|{}|{}|n{}", record.source, record.kind, keys.join(","), bucket)
}

#[derive(Default)]
struct PatternAcc {
    count: usize,
    payloads: HashSet<String>,
    first_cycle: u64,
    last_cycle: u64,
    // Welford running moments over novelty
    novelty_n: usize,
    novelty_mean: f64,
    novelty_m2: f64,
}

impl PatternAcc {
    fn push(&mut self, record: &EventRecord) {
        if self.count == 0 {
            self.first_cycle = record.cycle;
        }
        self.count += 1;
        self.first_cycle = self.first_cycle.min(record.cycle);
        self.last_cycle = self.last_cycle.max(record.cycle);
        self.payloads.insert(record.payload.to_string());

        if let Some(n) = record.novelty_score.filter(|n| n.is_finite()) {
            self.novelty_n += 1;
            let x = f64::from(n);
            let delta = x - self.novelty_mean;
            self.novelty_mean += delta / self.novelty_n as f64;
            self.novelty_m2 += delta * (x - self.novelty_mean);
        }
    }

    fn finish(self, signature: String) -> PatternSummary {
        let variance = if self.novelty_n > 0 {
            self.novelty_m2 / self.novelty_n as f64
        } else {
            0.0
        };
        PatternSummary {
            signature,
            count: self.count,
            distinct_payloads: self.payloads.len(),
            first_cycle: self.first_cycle,
            last_cycle: self.last_cycle,
            span: self.last_cycle - self.first_cycle,
            novelty_mean: self.novelty_mean as f32,
            novelty_variance: variance as f32,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct ConsolidationScheduler {
    config: ConsolidationConfig,
    preferences: PreferenceBook,
    batches: Vec<ConsolidationBatch>,
    semantic: Vec<SemanticRecord>,

    /// Coalesced trigger waiting for the rate cap to pass
    pending: Option<ConsolidationTrigger>,
    last_batch_cycle: Option<u64>,
    halted: Option<MemoryIntegrityError>,

    last_arousal: Option<f32>,
    climbing: bool,
    peak: Option<f32>,

    /// Log position up to which appends have been counted
    seen: usize,
    /// Unconsolidated records per signature
    open_signatures: BTreeMap<String, usize>,
}

impl ConsolidationScheduler {
    pub fn new(config: ConsolidationConfig, preference: PreferenceConfig) -> Self {
        Self {
            config,
            preferences: PreferenceBook::new(preference),
            batches: Vec::new(),
            semantic: Vec::new(),
            pending: None,
            last_batch_cycle: None,
            halted: None,
            last_arousal: None,
            climbing: false,
            peak: None,
            seen: 0,
            open_signatures: BTreeMap::new(),
        }
    }

    pub fn batches(&self) -> &[ConsolidationBatch] {
        &self.batches
    }

    pub fn semantic_records(&self) -> &[SemanticRecord] {
        &self.semantic
    }

    pub fn preferences(&self) -> &PreferenceBook {
        &self.preferences
    }

    pub fn pending(&self) -> Option<&ConsolidationTrigger> {
        self.pending.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&MemoryIntegrityError> {
        self.halted.as_ref()
    }

    /// Patterns that recurred at least `repetition_threshold` times in a batch.
    pub fn repeated_pattern_count(&self) -> usize {
        self.semantic
            .iter()
            .flat_map(|s| s.patterns.iter())
            .filter(|p| p.count >= self.config.repetition_threshold)
            .count()
    }

    /// Feed every committed state so arousal peaks can be detected.
    pub fn observe(&mut self, state: &EmotionalState) {
        if let Some(last) = self.last_arousal {
            if state.arousal > last {
                self.climbing = true;
            } else if state.arousal < last && self.climbing {
                self.climbing = false;
                if last >= self.config.peak_min_arousal {
                    self.peak = Some(last);
                }
            }
        }
        self.last_arousal = Some(state.arousal);
    }

    /// Run at most one batch for `cycle`.
    pub fn maybe_consolidate(
        &mut self,
        log: &EpisodicLog,
        state: &EmotionalState,
        idle_cycles: u64,
        cycle: u64,
    ) -> Result<Option<ConsolidationBatch>, MemoryIntegrityError> {
        if self.halted.is_some() {
            return Ok(None);
        }

        self.track_appends(log);
        let fired = self.detect(log, state, idle_cycles, cycle);

        let throttled = self
            .last_batch_cycle
            .map(|last| cycle.saturating_sub(last) < self.config.min_cycles_between_batches)
            .unwrap_or(false);
        if throttled {
            if let Some(trigger) = fired {
                if self.pending.is_none() {
                    tracing::debug!("Consolidation trigger {} coalesced (rate cap)", trigger);
                    self.pending = Some(trigger);
                }
            }
            return Ok(None);
        }

        let Some(trigger) = self.pending.take().or(fired) else {
            return Ok(None);
        };
        let open = log.unconsolidated_len();
        if open < self.config.min_batch_events {
            tracing::debug!(
                "Consolidation trigger {} dropped: only {} unconsolidated events",
                trigger,
                open
            );
            return Ok(None);
        }

        let records = log.oldest_unconsolidated(self.config.max_batch_events);
        self.consolidate_records(log, &records, trigger, cycle)
            .map(Some)
    }

    /// Merge `records` into one semantic record and mark them consolidated.
    ///
    /// Any inconsistency between `records` and the log halts the scheduler.
    pub fn consolidate_records(
        &mut self,
        log: &EpisodicLog,
        records: &[Arc<EventRecord>],
        trigger: ConsolidationTrigger,
        cycle: u64,
    ) -> Result<ConsolidationBatch, MemoryIntegrityError> {
        if let Some(reason) = &self.halted {
            tracing::debug!("Consolidation skipped: halted ({})", reason);
            return Err(MemoryIntegrityError::Halted);
        }

        match self.build_batch(log, records, trigger, cycle) {
            Ok(batch) => Ok(batch),
            Err(e) => {
                tracing::error!("Consolidation halted: {}", e);
                self.halted = Some(e.clone());
                self.pending = None;
                Err(e)
            }
        }
    }

    fn build_batch(
        &mut self,
        log: &EpisodicLog,
        records: &[Arc<EventRecord>],
        trigger: ConsolidationTrigger,
        cycle: u64,
    ) -> Result<ConsolidationBatch, MemoryIntegrityError> {
        for record in records {
            match log.get(&record.id) {
                Some(entry) if *entry.record == **record => {}
                _ => return Err(MemoryIntegrityError::MissingRecord(record.id.clone())),
            }
        }

        self.track_appends(log);
        let batch_id = Uuid::new_v4();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        // Marking validates every id first, so a failure writes nothing
        log.mark_consolidated(&ids, batch_id)?;
        for record in records {
            self.release_signature(record);
        }

        let semantic = self.merge(records, batch_id, cycle);
        let observations: Vec<StrainObservation> = records
            .iter()
            .filter_map(|r| {
                let signals = r.signals();
                Some(StrainObservation {
                    subject: signals.subject?,
                    strain_delta: signals.strain_delta?,
                })
            })
            .collect();
        self.preferences.apply_batch(&observations, cycle);

        let batch = ConsolidationBatch {
            id: batch_id,
            source_event_ids: ids.into_iter().collect(),
            resulting_semantic_id: semantic.id,
            created_at_cycle: cycle,
            trigger,
        };

        tracing::info!(
            "Consolidated {} events into {} patterns at cycle {} ({})",
            batch.source_event_ids.len(),
            semantic.patterns.len(),
            cycle,
            batch.trigger
        );

        self.semantic.push(semantic);
        self.batches.push(batch.clone());
        self.last_batch_cycle = Some(cycle);
        Ok(batch)
    }

    fn merge(&self, records: &[Arc<EventRecord>], batch_id: Uuid, cycle: u64) -> SemanticRecord {
        let mut groups: BTreeMap<String, PatternAcc> = BTreeMap::new();
        for record in records {
            groups
                .entry(signature(record, self.config.novelty_buckets))
                .or_default()
                .push(record);
        }

        SemanticRecord {
            id: Uuid::new_v4(),
            batch_id,
            patterns: groups
                .into_iter()
                .map(|(signature, acc)| acc.finish(signature))
                .collect(),
            source_event_count: records.len(),
            created_at_cycle: cycle,
        }
    }

    /// Count signatures of records appended since the last call.
    fn track_appends(&mut self, log: &EpisodicLog) {
        let fresh = log.appended_since(self.seen);
        self.seen += fresh.len();
        for entry in fresh.iter().filter(|e| e.consolidated_into.is_none()) {
            *self
                .open_signatures
                .entry(signature(&entry.record, self.config.novelty_buckets))
                .or_default() += 1;
        }
    }

    fn release_signature(&mut self, record: &EventRecord) {
        let key = signature(record, self.config.novelty_buckets);
        if let Some(count) = self.open_signatures.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.open_signatures.remove(&key);
            }
        }
    }

    fn detect(
        &mut self,
        log: &EpisodicLog,
        state: &EmotionalState,
        idle_cycles: u64,
        cycle: u64,
    ) -> Option<ConsolidationTrigger> {
        let c = &self.config;

        let window_start = cycle.saturating_sub(c.density_window_cycles);
        let dense = log.unconsolidated_after(window_start);
        if dense >= c.density_threshold {
            return Some(ConsolidationTrigger::Density { events: dense });
        }

        if let Some((signature, count)) = self
            .open_signatures
            .iter()
            .filter(|(_, n)| **n >= c.repetition_threshold)
            .max_by_key(|(_, n)| **n)
        {
            return Some(ConsolidationTrigger::Repetition {
                signature: signature.clone(),
                count: *count,
            });
        }

        if let Some(peak) = self.peak.take() {
            return Some(ConsolidationTrigger::ArousalPeak { peak });
        }

        let unstable = state.uncertainty >= c.idle_uncertainty_threshold
            || state.arousal >= c.idle_arousal_threshold;
        if idle_cycles >= c.idle_trigger_cycles && unstable {
            return Some(ConsolidationTrigger::IdleInstability { idle_cycles });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_core::EventKind;
    use serde_json::{json, Value};

    fn record(id: usize, cycle: u64, payload: Value, novelty: Option<f32>) -> EventRecord {
        EventRecord {
            id: format!("e{}", id),
            sequence: id as u64,
            source: "world".to_string(),
            kind: EventKind::Observation,
            payload,
            novelty_score: novelty,
            timestamp: 0,
            cycle,
        }
    }

    fn scheduler() -> ConsolidationScheduler {
        ConsolidationScheduler::new(ConsolidationConfig::default(), PreferenceConfig::default())
    }

    fn calm() -> EmotionalState {
        EmotionalState {
            uncertainty: 0.1,
            arousal: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_signature_ignores_values_but_not_shape() {
        let a = record(1, 1, json!({"x": 1, "y": 2}), Some(0.31));
        let b = record(2, 2, json!({"y": 9, "x": 4}), Some(0.39));
        let c = record(3, 3, json!({"x": 1}), Some(0.31));
        let d = record(4, 4, json!({"x": 1, "y": 2}), Some(0.95));
        assert_eq!(signature(&a, 10), signature(&b, 10));
        assert_ne!(signature(&a, 10), signature(&c, 10));
        assert_ne!(signature(&a, 10), signature(&d, 10));
        assert_eq!(signature(&record(5, 5, json!({}), Some(1.0)), 10), "world|observation||n9");
    }

    #[test]
    fn test_repetition_triggers_and_merges_duplicates() {
        let log = EpisodicLog::new();
        for i in 0..5 {
            log.append(record(i, i as u64 + 1, json!({"touch": "wall"}), Some(0.1)))
                .unwrap();
        }
        let mut sched = scheduler();
        let batch = sched
            .maybe_consolidate(&log, &calm(), 0, 5)
            .unwrap()
            .expect("repetition should trigger");
        assert_eq!(batch.trigger.name(), "repetition");
        assert_eq!(batch.source_event_ids.len(), 5);

        let semantic = &sched.semantic_records()[0];
        assert_eq!(semantic.id, batch.resulting_semantic_id);
        assert_eq!(semantic.patterns.len(), 1);
        let pattern = &semantic.patterns[0];
        assert_eq!(pattern.count, 5);
        assert_eq!(pattern.distinct_payloads, 1);
        assert_eq!(pattern.span, 4);
        assert!(pattern.novelty_variance.abs() < 1e-6);
        assert_eq!(sched.repeated_pattern_count(), 1);

        // Source events stay in the log, marked
        assert_eq!(log.len(), 5);
        assert_eq!(log.consolidated_count(), 5);
    }

    #[test]
    fn test_rerun_on_consolidated_input_is_noop() {
        let log = EpisodicLog::new();
        for i in 0..30 {
            log.append(record(i, i as u64 + 1, json!({"i": i}), Some(0.5)))
                .unwrap();
        }
        let mut sched = scheduler();
        assert!(sched.maybe_consolidate(&log, &calm(), 0, 30).unwrap().is_some());
        assert!(log.unconsolidated().is_empty());

        for cycle in 31..200 {
            assert!(sched.maybe_consolidate(&log, &calm(), 0, cycle).unwrap().is_none());
        }
        assert_eq!(sched.batches().len(), 1);
    }

    #[test]
    fn test_consolidated_records_leave_the_clusters() {
        let log = EpisodicLog::new();
        let mut sched = scheduler();
        for i in 0..5 {
            log.append(record(i, i as u64 + 1, json!({"touch": "wall"}), Some(0.1)))
                .unwrap();
        }
        assert!(sched.maybe_consolidate(&log, &calm(), 0, 5).unwrap().is_some());

        // Four fresh repeats: the five already merged must not count
        for i in 5..9 {
            log.append(record(i, i as u64 + 1, json!({"touch": "wall"}), Some(0.1)))
                .unwrap();
        }
        assert!(sched.maybe_consolidate(&log, &calm(), 0, 30).unwrap().is_none());

        log.append(record(9, 31, json!({"touch": "wall"}), Some(0.1)))
            .unwrap();
        let batch = sched.maybe_consolidate(&log, &calm(), 0, 31).unwrap().unwrap();
        assert_eq!(
            batch.trigger,
            ConsolidationTrigger::Repetition {
                signature: "world|observation|touch|n1".to_string(),
                count: 5,
            }
        );
        assert_eq!(log.unconsolidated_len(), 0);
    }

    #[test]
    fn test_rate_cap_coalesces_triggers() {
        let log = EpisodicLog::new();
        let mut sched = scheduler();
        let mut batches = 0;
        for i in 0..200usize {
            let cycle = i as u64 + 1;
            log.append(record(i, cycle, json!({"same": true}), Some(0.1)))
                .unwrap();
            if sched.maybe_consolidate(&log, &calm(), 0, cycle).unwrap().is_some() {
                batches += 1;
            }
        }
        let cycles: Vec<u64> = sched.batches().iter().map(|b| b.created_at_cycle).collect();
        for pair in cycles.windows(2) {
            assert!(pair[1] - pair[0] >= 16);
        }
        assert_eq!(batches, cycles.len());
        assert!(batches >= 10);
    }

    #[test]
    fn test_arousal_peak_trigger() {
        let log = EpisodicLog::new();
        for i in 0..3 {
            log.append(record(i, i as u64 + 1, json!({"k": i}), None)).unwrap();
        }
        let mut sched = scheduler();
        for arousal in [0.2, 0.4, 0.6, 0.55] {
            sched.observe(&EmotionalState {
                arousal,
                ..Default::default()
            });
        }
        let batch = sched.maybe_consolidate(&log, &calm(), 0, 4).unwrap().unwrap();
        assert_eq!(batch.trigger, ConsolidationTrigger::ArousalPeak { peak: 0.6 });
    }

    #[test]
    fn test_idle_instability_trigger() {
        let log = EpisodicLog::new();
        for i in 0..3 {
            log.append(record(i, i as u64 + 1, json!({"k": i}), None)).unwrap();
        }
        let mut sched = scheduler();
        let uneasy = EmotionalState {
            uncertainty: 0.8,
            ..Default::default()
        };
        assert!(sched.maybe_consolidate(&log, &uneasy, 19, 22).unwrap().is_none());
        let batch = sched.maybe_consolidate(&log, &uneasy, 20, 23).unwrap().unwrap();
        assert_eq!(batch.trigger.name(), "idle_instability");
    }

    #[test]
    fn test_integrity_failure_halts_consolidation() {
        let log = EpisodicLog::new();
        let records: Vec<_> = (0..3)
            .map(|i| log.append(record(i, i as u64 + 1, json!({}), None)).unwrap())
            .collect();
        let mut sched = scheduler();
        let trigger = ConsolidationTrigger::Density { events: 3 };
        sched
            .consolidate_records(&log, &records, trigger.clone(), 3)
            .unwrap();

        let err = sched
            .consolidate_records(&log, &records, trigger.clone(), 40)
            .unwrap_err();
        assert!(matches!(err, MemoryIntegrityError::AlreadyConsolidated { .. }));
        assert!(sched.is_halted());

        // Raw log preserved, no further batches
        assert_eq!(log.len(), 3);
        log.append(record(10, 41, json!({}), None)).unwrap();
        assert!(sched.maybe_consolidate(&log, &calm(), 100, 80).unwrap().is_none());
        assert_eq!(sched.batches().len(), 1);
    }

    #[test]
    fn test_unknown_record_is_integrity_error() {
        let log = EpisodicLog::new();
        let stranger = Arc::new(record(99, 1, json!({}), None));
        let mut sched = scheduler();
        let err = sched
            .consolidate_records(&log, &[stranger], ConsolidationTrigger::Density { events: 1 }, 1)
            .unwrap_err();
        assert_eq!(err, MemoryIntegrityError::MissingRecord("e99".to_string()));
    }

    #[test]
    fn test_strain_observations_reach_preferences() {
        let log = EpisodicLog::new();
        for i in 0..6 {
            log.append(record(
                i,
                i as u64 + 1,
                json!({"subject": "lamp", "strain_delta": -0.6}),
                Some(0.2),
            ))
            .unwrap();
        }
        let mut sched = scheduler();
        sched.maybe_consolidate(&log, &calm(), 0, 6).unwrap().unwrap();
        let g = sched.preferences().get("lamp").unwrap();
        assert_eq!(g.observation_count, 6);
        assert!(g.strain_ema > 0.0);
    }
}
