//! Regulatory core - one cycle per call
//!
//! [`RegulatoryCore`] owns every component and threads a cycle through them
//! in a fixed order:
//!
//! 1. intake (validate, advance the clock, append to the episodic log)
//! 2. state regulation
//! 3. consolidation
//! 4. health evaluation; fatal alerts reach the milestone gate at once
//! 5. milestone evaluation (external event cycles only)
//! 6. pressure emission (heartbeat cycles only)
//!
//! Self-generated pressure events wait in a dedicated internal queue and are
//! processed as their own cycles by [`RegulatoryCore::drain_internal`].

use std::collections::VecDeque;
use std::sync::Arc;

use anima_core::{
    AnimaConfig, ConfigError, EmotionalState, EventRecord, GateError, HealthAlert, PressureEvent,
    QuarantineError, RawEvent, SnapshotCell, StructuralViolation,
};
use anima_limbic::{DriveState, PressureEmitter, StateRegulator, StateUpdate, UpdateCause};
use anima_memory::{
    ConsolidationBatch, ConsolidationScheduler, EpisodicLog, EpisodicReader, EventIntake,
    SemanticRecord,
};
use serde::{Deserialize, Serialize};

use crate::health::{HealthMonitor, HealthSnapshot, HealthView};
use crate::milestone::{
    MilestoneEvidence, MilestoneGate, MilestoneLevel, MilestoneSnapshot, MilestoneTransition,
};

/// Events considered by the advisory health snapshot.
const SNAPSHOT_WINDOW: usize = 64;

/// Everything that happened in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub cause: UpdateCause,
    /// The record accepted this cycle; `None` for heartbeats
    pub accepted: Option<Arc<EventRecord>>,
    /// State after the cycle (unchanged if the update was rejected)
    pub state: EmotionalState,
    pub violation: Option<StructuralViolation>,
    pub batch: Option<ConsolidationBatch>,
    pub semantic: Option<SemanticRecord>,
    /// Alerts raised this cycle
    pub alerts: Vec<HealthAlert>,
    pub transitions: Vec<MilestoneTransition>,
    /// Pressure queued for the internal channel
    pub pressure: Option<PressureEvent>,
}

/// Read-only view published after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSnapshot {
    pub cycle: u64,
    pub state: EmotionalState,
    pub idle_cycles: u64,
    pub milestone: MilestoneSnapshot,
    pub episodic_events: usize,
    pub batches: usize,
    pub alerts: usize,
    pub consolidation_halted: bool,
}

pub struct RegulatoryCore {
    config: AnimaConfig,
    intake: EventIntake,
    regulator: StateRegulator,
    scheduler: ConsolidationScheduler,
    health: HealthMonitor,
    gate: MilestoneGate,
    emitter: PressureEmitter,

    /// Committed updates, oldest first, bounded by `health.history_capacity`
    history: VecDeque<StateUpdate>,
    internal: VecDeque<PressureEvent>,
    published: SnapshotCell<CoreSnapshot>,
}

impl RegulatoryCore {
    pub fn new(config: AnimaConfig) -> Result<Self, ConfigError> {
        Self::with_gate(config, MilestoneGate::new())
    }

    /// Build a core around a custom milestone gate.
    pub fn with_gate(config: AnimaConfig, gate: MilestoneGate) -> Result<Self, ConfigError> {
        config.validate()?;

        let log = EpisodicLog::new();
        let intake = EventIntake::new(config.intake.clone(), log);
        let regulator = StateRegulator::new(config.regulator.clone());
        let scheduler =
            ConsolidationScheduler::new(config.consolidation.clone(), config.preference.clone());
        let health = HealthMonitor::new(config.health.clone());
        let emitter = PressureEmitter::new(config.pressure.clone());

        let initial = CoreSnapshot {
            cycle: 0,
            state: regulator.state(),
            idle_cycles: 0,
            milestone: gate.snapshot(),
            episodic_events: 0,
            batches: 0,
            alerts: 0,
            consolidation_halted: false,
        };

        Ok(Self {
            config,
            intake,
            regulator,
            scheduler,
            health,
            gate,
            emitter,
            history: VecDeque::new(),
            internal: VecDeque::new(),
            published: SnapshotCell::new(initial),
        })
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub fn config(&self) -> &AnimaConfig {
        &self.config
    }

    pub fn cycle(&self) -> u64 {
        self.intake.cycle()
    }

    pub fn state(&self) -> EmotionalState {
        self.regulator.state()
    }

    pub fn idle_cycles(&self) -> u64 {
        self.regulator.idle_cycles()
    }

    pub fn regulator(&self) -> &StateRegulator {
        &self.regulator
    }

    pub fn scheduler(&self) -> &ConsolidationScheduler {
        &self.scheduler
    }

    pub fn intake(&self) -> &EventIntake {
        &self.intake
    }

    pub fn episodic(&self) -> EpisodicReader {
        self.intake.log().reader()
    }

    pub fn alerts(&self) -> &[HealthAlert] {
        self.health.alerts()
    }

    pub fn milestones(&self) -> &MilestoneGate {
        &self.gate
    }

    pub fn milestone_snapshot(&self) -> MilestoneSnapshot {
        self.gate.snapshot()
    }

    /// Committed updates kept for trend detection.
    pub fn history(&self) -> &VecDeque<StateUpdate> {
        &self.history
    }

    /// Pressure events waiting on the internal channel.
    pub fn pending_internal(&self) -> usize {
        self.internal.len()
    }

    /// Handle for lock-free readers on other threads.
    pub fn snapshots(&self) -> SnapshotCell<CoreSnapshot> {
        self.published.clone()
    }

    pub fn snapshot(&self) -> Arc<CoreSnapshot> {
        self.published.load()
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let recent = self.episodic().recent(SNAPSHOT_WINDOW);
        self.health.snapshot(&self.regulator.state(), &recent)
    }

    /// Milestone transitions only ever come from evidence.
    pub fn request_milestone(&self, level: MilestoneLevel) -> Result<(), GateError> {
        self.gate.request_transition(level)
    }

    // ========================================================================
    // Write side
    // ========================================================================

    /// Run one cycle for an external event.
    ///
    /// Quarantined input does not advance the cycle and changes nothing else.
    pub fn ingest(&mut self, raw: RawEvent) -> Result<CycleReport, QuarantineError> {
        let record = self.intake.ingest(raw)?;
        Ok(self.process_record(record))
    }

    /// Run one idle heartbeat cycle.
    pub fn heartbeat(&mut self) -> CycleReport {
        let cycle = self.intake.tick_heartbeat();
        let result = self.regulator.heartbeat(cycle);
        let mut report = self.run_cycle(cycle, UpdateCause::Heartbeat, None, result);

        let idle = self.regulator.idle_cycles();
        let drives = DriveState::from_state(&report.state, idle);
        if let Some(pressure) = self.emitter.tick(idle, &drives, cycle) {
            self.internal.push_back(pressure.clone());
            report.pressure = Some(pressure);
        }
        report
    }

    /// Process queued pressure events, one cycle each.
    pub fn drain_internal(&mut self) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        while let Some(pressure) = self.internal.pop_front() {
            match self.intake.ingest_pressure(&pressure) {
                Ok(record) => reports.push(self.process_record(record)),
                // Only possible if the emitter broke its own sequence
                Err(e) => tracing::error!("Internal pressure event dropped: {}", e),
            }
        }
        reports
    }

    fn process_record(&mut self, record: Arc<EventRecord>) -> CycleReport {
        let cycle = record.cycle;
        let result = self.regulator.apply(&record);
        let cause = if record.is_self_generated() {
            UpdateCause::Pressure
        } else {
            UpdateCause::Event
        };
        self.run_cycle(cycle, cause, Some(record), result)
    }

    fn run_cycle(
        &mut self,
        cycle: u64,
        cause: UpdateCause,
        accepted: Option<Arc<EventRecord>>,
        result: Result<StateUpdate, StructuralViolation>,
    ) -> CycleReport {
        let violation = match result {
            Ok(update) => {
                self.scheduler.observe(&update.state);
                self.history.push_back(update);
                while self.history.len() > self.config.health.history_capacity {
                    self.history.pop_front();
                }
                None
            }
            Err(v) => Some(v),
        };
        let state = self.regulator.state();

        // Consolidation
        let (batch, semantic) = match self.scheduler.maybe_consolidate(
            self.intake.log(),
            &state,
            self.regulator.idle_cycles(),
            cycle,
        ) {
            Ok(Some(batch)) => {
                let semantic = self.scheduler.semantic_records().last().cloned();
                (Some(batch), semantic)
            }
            Ok(None) => (None, None),
            // The scheduler halts itself; the health pass turns it into an alert
            Err(_) => (None, None),
        };

        // Health
        let view = HealthView {
            cycle,
            updates: &self.history,
            batches: self.scheduler.batches(),
            preferences: self.scheduler.preferences(),
            violation: violation.as_ref(),
            integrity: self.scheduler.halt_reason(),
            floor_ceiling: self.config.regulator.floor_max,
        };
        let current: Vec<HealthAlert> = self.health.evaluate(view).collect();
        let alerts = self.health.record(current);

        // Fatal alerts land before any unlock evaluation
        let mut transitions: Vec<MilestoneTransition> = alerts
            .iter()
            .filter(|a| a.is_fatal())
            .filter_map(|a| self.gate.on_fatal(a))
            .collect();

        let fatal_now = alerts.iter().any(|a| a.is_fatal());
        if cause == UpdateCause::Event && !fatal_now {
            let evidence = self.evidence(cycle);
            match self.gate.evaluate(&evidence) {
                Ok(Some(t)) => transitions.push(t),
                Ok(None) => {}
                Err(e) => tracing::warn!("Milestone evaluation skipped: {}", e),
            }
        }

        self.publish(cycle, state);

        CycleReport {
            cycle,
            cause,
            accepted,
            state,
            violation,
            batch,
            semantic,
            alerts,
            transitions,
            pressure: None,
        }
    }

    fn evidence(&self, cycle: u64) -> MilestoneEvidence {
        let state = self.regulator.state();
        MilestoneEvidence {
            cycle,
            event_count: self.intake.log().len() as u64,
            recovered_disturbances: self.regulator.recovered_disturbances(),
            repeated_patterns: self.scheduler.repeated_pattern_count() as u64,
            semantic_records: self.scheduler.semantic_records().len() as u64,
            formed_preferences: self.scheduler.preferences().formed_count() as u64,
            confidence_floor: state.confidence_floor,
            uncertainty: state.uncertainty,
        }
    }

    fn publish(&self, cycle: u64, state: EmotionalState) {
        self.published.publish(CoreSnapshot {
            cycle,
            state,
            idle_cycles: self.regulator.idle_cycles(),
            milestone: self.gate.snapshot(),
            episodic_events: self.intake.log().len(),
            batches: self.scheduler.batches().len(),
            alerts: self.health.alerts().len(),
            consolidation_halted: self.scheduler.is_halted(),
        });
    }
}
