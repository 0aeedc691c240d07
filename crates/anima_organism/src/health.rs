//! Health monitoring
//!
//! Detectors run over the recent trajectory every cycle. Evaluation is pure
//! and lazy: [`HealthMonitor::evaluate`] yields the conditions that currently
//! hold, [`HealthMonitor::record`] appends the ones that just started to the
//! alert log. A condition that stays true is reported once until it clears.

use std::collections::{HashSet, VecDeque};

use anima_core::{
    AlertKind, EmotionalState, EventKind, HealthAlert, HealthConfig, MemoryIntegrityError,
    StructuralViolation, ViolationKind,
};
use anima_limbic::StateUpdate;
use anima_memory::{ConsolidationBatch, EpisodicEntry, PreferenceBook};
use serde::{Deserialize, Serialize};

const TOLERANCE: f32 = 1e-6;

/// Everything the detectors look at for one cycle.
#[derive(Clone, Copy)]
pub struct HealthView<'a> {
    pub cycle: u64,
    /// Committed updates, oldest first
    pub updates: &'a VecDeque<StateUpdate>,
    pub batches: &'a [ConsolidationBatch],
    pub preferences: &'a PreferenceBook,
    /// Update rejected by the regulator this cycle, if any
    pub violation: Option<&'a StructuralViolation>,
    pub integrity: Option<&'a MemoryIntegrityError>,
    /// Highest value the confidence floor may reach
    pub floor_ceiling: f32,
}

type Detector = fn(&HealthConfig, &HealthView<'_>) -> Option<HealthAlert>;

const DETECTORS: [Detector; 6] = [
    runaway_arousal,
    floor_violation,
    write_storm,
    preference_lock,
    zeno_collapse,
    memory_integrity,
];

pub struct HealthMonitor {
    config: HealthConfig,
    log: Vec<HealthAlert>,
    active: HashSet<AlertKind>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            log: Vec::new(),
            active: HashSet::new(),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Conditions that hold right now, one alert per kind at most.
    pub fn evaluate<'a>(&'a self, view: HealthView<'a>) -> impl Iterator<Item = HealthAlert> + 'a {
        DETECTORS
            .into_iter()
            .filter_map(move |detect| detect(&self.config, &view))
    }

    /// Append newly raised alerts to the log and return them.
    pub fn record(&mut self, current: impl IntoIterator<Item = HealthAlert>) -> Vec<HealthAlert> {
        let current: Vec<HealthAlert> = current.into_iter().collect();
        let holding: HashSet<AlertKind> = current.iter().map(|a| a.kind).collect();
        self.active.retain(|kind| holding.contains(kind));

        let mut raised = Vec::new();
        for alert in current {
            if self.active.insert(alert.kind) {
                if alert.is_fatal() {
                    tracing::error!("Health alert {} at cycle {}: {}", alert.kind, alert.cycle, alert.evidence);
                } else {
                    tracing::warn!("Health alert {} at cycle {}: {}", alert.kind, alert.cycle, alert.evidence);
                }
                self.log.push(alert.clone());
                raised.push(alert);
            }
        }
        raised
    }

    /// Evaluate and record in one step.
    pub fn check(&mut self, view: HealthView<'_>) -> Vec<HealthAlert> {
        let current: Vec<HealthAlert> = self.evaluate(view).collect();
        self.record(current)
    }

    /// Every alert ever raised, oldest first.
    pub fn alerts(&self) -> &[HealthAlert] {
        &self.log
    }

    pub fn last_fatal_cycle(&self) -> Option<u64> {
        self.log.iter().rev().find(|a| a.is_fatal()).map(|a| a.cycle)
    }

    /// Advisory risk scores. Never gates anything.
    pub fn snapshot(&self, state: &EmotionalState, recent: &[EpisodicEntry]) -> HealthSnapshot {
        HealthSnapshot::compute(state, recent)
    }
}

// ============================================================================
// Detectors
// ============================================================================

/// Arousal elevated and not coming down for N consecutive updates.
fn runaway_arousal(config: &HealthConfig, view: &HealthView<'_>) -> Option<HealthAlert> {
    let streak = view
        .updates
        .iter()
        .rev()
        .take_while(|u| {
            u.state.arousal >= config.runaway_min_arousal && u.arousal_delta() >= -TOLERANCE
        })
        .count();

    (streak >= config.runaway_cycles).then(|| {
        let arousal = view.updates.back().map(|u| u.state.arousal).unwrap_or_default();
        HealthAlert::new(
            AlertKind::RunawayArousal,
            view.cycle,
            format!(
                "arousal {:.3} has not decreased for {} consecutive updates",
                arousal, streak
            ),
        )
    })
}

/// The floor was lowered, or an attempt to lower it was rejected, without a
/// severe failure.
fn floor_violation(_config: &HealthConfig, view: &HealthView<'_>) -> Option<HealthAlert> {
    if let Some(StructuralViolation {
        cycle,
        kind: ViolationKind::FloorLowered { from, to },
    }) = view.violation
    {
        if *cycle == view.cycle {
            return Some(HealthAlert::new(
                AlertKind::FloorViolation,
                view.cycle,
                format!("rejected an update lowering the floor from {:.4} to {:.4}", from, to),
            ));
        }
    }

    let last = view.updates.back()?;
    (last.cycle == view.cycle && last.floor_delta() < -TOLERANCE && !last.severe_failure).then(|| {
        HealthAlert::new(
            AlertKind::FloorViolation,
            view.cycle,
            format!(
                "confidence floor fell from {:.4} to {:.4} without a severe failure",
                last.previous.confidence_floor, last.state.confidence_floor
            ),
        )
    })
}

fn write_storm(config: &HealthConfig, view: &HealthView<'_>) -> Option<HealthAlert> {
    let window_start = view.cycle.saturating_sub(config.storm_window_cycles);
    let recent = view
        .batches
        .iter()
        .rev()
        .take_while(|b| b.created_at_cycle > window_start)
        .count();

    (recent > config.storm_max_batches).then(|| {
        HealthAlert::new(
            AlertKind::WriteStorm,
            view.cycle,
            format!(
                "{} consolidation batches in the last {} cycles (cap {})",
                recent, config.storm_window_cycles, config.storm_max_batches
            ),
        )
    })
}

fn preference_lock(config: &HealthConfig, view: &HealthView<'_>) -> Option<HealthAlert> {
    let locked: Vec<String> = view
        .preferences
        .gradients()
        .filter(|g| {
            g.unresponsive_since
                .map(|since| view.cycle.saturating_sub(since) >= config.lock_cycles)
                .unwrap_or(false)
        })
        .map(|g| format!("{} ({:+.3})", g.subject_key, g.strain_ema))
        .collect();

    (!locked.is_empty()).then(|| {
        HealthAlert::new(
            AlertKind::PreferenceLock,
            view.cycle,
            format!(
                "saturated and unresponsive for {}+ cycles: {}",
                config.lock_cycles,
                locked.join(", ")
            ),
        )
    })
}

/// One confidence disturbance: from the start of a drop to the start of the next.
struct Disturbance {
    onset: u64,
    /// Confidence just before the drop
    baseline: f32,
    floor: f32,
    /// Best confidence reached before the next drop began
    peak: f32,
}

impl Disturbance {
    fn recovered(&self) -> bool {
        self.peak >= self.baseline - TOLERANCE
    }
}

fn disturbances(updates: &VecDeque<StateUpdate>) -> Vec<Disturbance> {
    let mut found: Vec<Disturbance> = Vec::new();
    let mut dropping = false;
    for update in updates {
        let drop = update.confidence_delta() < -TOLERANCE;
        if drop && !dropping {
            found.push(Disturbance {
                onset: update.cycle,
                baseline: update.previous.confidence,
                floor: update.previous.confidence_floor,
                peak: update.state.confidence,
            });
        } else if let Some(open) = found.last_mut() {
            open.peak = open.peak.max(update.state.confidence);
        }
        dropping = drop;
    }
    found
}

/// Disturbance cycles shortening while recoveries stay partial and the floor
/// stays put below its ceiling.
fn zeno_collapse(config: &HealthConfig, view: &HealthView<'_>) -> Option<HealthAlert> {
    let found = disturbances(view.updates);
    let needed = config.zeno_periods + 1;
    if found.len() < needed {
        return None;
    }
    let tail = &found[found.len() - needed..];

    let periods: Vec<u64> = tail.windows(2).map(|w| w[1].onset - w[0].onset).collect();
    if !periods.windows(2).all(|p| p[1] < p[0]) {
        return None;
    }
    // Every completed cycle in the tail must have fallen short of its baseline
    if tail[..needed - 1].iter().any(Disturbance::recovered) {
        return None;
    }

    let first_floor = tail[0].floor;
    if first_floor >= view.floor_ceiling - TOLERANCE {
        return None;
    }
    let current_floor = view
        .updates
        .back()
        .map(|u| u.state.confidence_floor)
        .unwrap_or(first_floor);
    let floor_rose = tail.iter().any(|d| d.floor > first_floor + TOLERANCE)
        || current_floor > first_floor + TOLERANCE;
    if floor_rose {
        return None;
    }

    Some(HealthAlert::new(
        AlertKind::ZenoCollapse,
        view.cycle,
        format!(
            "disturbance cycles shrinking {:?} without full recovery, floor held at {:.4}",
            periods, first_floor
        ),
    ))
}

fn memory_integrity(_config: &HealthConfig, view: &HealthView<'_>) -> Option<HealthAlert> {
    view.integrity.map(|e| {
        HealthAlert::new(
            AlertKind::MemoryIntegrity,
            view.cycle,
            format!("consolidation halted: {}", e),
        )
    })
}

// ============================================================================
// Advisory snapshot
// ============================================================================

/// Advisory stability report for collaborators and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cycle: u64,
    pub event_count: usize,
    pub state: EmotionalState,
    /// Rapid internal cycling without resolution
    pub zeno_risk: f32,
    /// Sustained activation without recovery
    pub burnout_risk: f32,
    /// Nothing happening while curiosity rises
    pub stagnation_risk: f32,
    pub notes: Vec<String>,
}

impl HealthSnapshot {
    pub fn compute(state: &EmotionalState, recent: &[EpisodicEntry]) -> Self {
        let zeno = zeno_risk(state, recent);
        let burnout = burnout_risk(state);
        let stagnation = stagnation_risk(state, recent);

        let mut notes = Vec::new();
        for (risk, note) in [
            (zeno, "elevated_zeno_risk"),
            (burnout, "elevated_burnout_risk"),
            (stagnation, "elevated_stagnation_risk"),
        ] {
            if risk > 0.7 {
                notes.push(note.to_string());
            }
        }

        Self {
            cycle: state.cycle,
            event_count: recent.len(),
            state: *state,
            zeno_risk: zeno,
            burnout_risk: burnout,
            stagnation_risk: stagnation,
            notes,
        }
    }
}

fn zeno_risk(state: &EmotionalState, recent: &[EpisodicEntry]) -> f32 {
    let internal = recent
        .iter()
        .filter(|e| e.record.kind == EventKind::Internal)
        .count();
    if internal < 5 {
        return 0.0;
    }

    let density = internal as f32 / recent.len().max(1) as f32;
    let mut risk = 0.5 * density;
    if state.arousal > 0.8 && state.confidence < 0.25 {
        risk += 0.5;
    }
    risk.min(1.0)
}

fn burnout_risk(state: &EmotionalState) -> f32 {
    let mut risk = 0.0;
    if state.arousal > 0.85 {
        risk += 0.4;
    }
    if state.confidence < state.confidence_floor + 0.05 {
        risk += 0.4;
    }
    if state.arousal > 0.9 && state.confidence < 0.2 {
        risk += 0.2;
    }
    f32::min(risk, 1.0)
}

fn stagnation_risk(state: &EmotionalState, recent: &[EpisodicEntry]) -> f32 {
    let engaged = recent
        .iter()
        .any(|e| matches!(e.record.kind, EventKind::Observation | EventKind::Action));
    if !engaged && state.curiosity_pressure > 0.6 {
        state.curiosity_pressure.min(1.0)
    } else {
        0.0
    }
}
