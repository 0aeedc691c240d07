//! State regulation
//!
//! The [`StateRegulator`] is the single writer of [`EmotionalState`]. Each
//! accepted event or idle heartbeat produces exactly one candidate update,
//! which is validated against the structural invariants before it is
//! committed. A candidate that fails validation is rejected and the previous
//! state stays in force.
//!
//! Update rules per cycle:
//!
//! - **Arousal** rises with novelty, contradiction, failure and surprise,
//!   bounded by `max_arousal_delta`, then decays toward the baseline. Decay
//!   grows with consecutive idle cycles and never pulls below the baseline.
//! - **Confidence** drops proportionally on failure and recovers only after
//!   `stabilization_cycles` failure-free cycles. Recovery ratchets the floor
//!   upward; only a severe failure may lower it.
//! - **Uncertainty** decays only while pattern stability has held for a full
//!   window of readings, and rises on failure or contradiction.
//! - **Curiosity pressure** accumulates on idle heartbeats and relaxes toward
//!   baseline when a novel event arrives.

use std::collections::VecDeque;

use anima_core::{
    EmotionalState, EventRecord, EventSignals, RegulatorConfig, StructuralViolation,
    ViolationKind,
};
use serde::{Deserialize, Serialize};

/// Float slack used when comparing bounds.
const TOLERANCE: f32 = 1e-6;

/// Rejected updates kept for inspection.
const VIOLATION_LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateCause {
    /// Externally delivered event
    Event,
    /// Self-generated pressure event fed back through intake
    Pressure,
    /// Idle heartbeat
    Heartbeat,
}

/// A committed state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub cycle: u64,
    pub cause: UpdateCause,
    pub previous: EmotionalState,
    pub state: EmotionalState,
    /// The triggering event reported a severe failure
    pub severe_failure: bool,
    /// The triggering event reported any failure
    pub failure: bool,
    /// Arousal moved by decay alone
    pub decay_only: bool,
}

impl StateUpdate {
    pub fn arousal_delta(&self) -> f32 {
        self.state.arousal - self.previous.arousal
    }

    pub fn floor_delta(&self) -> f32 {
        self.state.confidence_floor - self.previous.confidence_floor
    }

    pub fn confidence_delta(&self) -> f32 {
        self.state.confidence - self.previous.confidence
    }
}

/// Validate a candidate transition against the structural invariants.
///
/// Shared by the regulator and by anything that replays stored history.
pub fn validate_transition(
    config: &RegulatorConfig,
    previous: &EmotionalState,
    next: &EmotionalState,
    severe_failure: bool,
    decay_only: bool,
) -> Result<(), ViolationKind> {
    if let Some(field) = next.non_finite_field() {
        return Err(ViolationKind::NonFinite(field));
    }

    for (field, value, min, max) in [
        ("arousal", next.arousal, config.arousal_min, config.arousal_max),
        ("confidence", next.confidence, 0.0, 1.0),
        ("confidence_floor", next.confidence_floor, 0.0, config.floor_max),
        ("uncertainty", next.uncertainty, 0.0, 1.0),
        ("curiosity_pressure", next.curiosity_pressure, 0.0, 1.0),
    ] {
        if value < min - TOLERANCE || value > max + TOLERANCE {
            return Err(ViolationKind::OutOfBounds { field, value });
        }
    }

    if next.confidence_floor < previous.confidence_floor - TOLERANCE && !severe_failure {
        return Err(ViolationKind::FloorLowered {
            from: previous.confidence_floor,
            to: next.confidence_floor,
        });
    }

    if next.confidence < next.confidence_floor - TOLERANCE {
        return Err(ViolationKind::BelowFloor {
            confidence: next.confidence,
            floor: next.confidence_floor,
        });
    }

    let delta = next.arousal - previous.arousal;
    let bound = config.max_arousal_delta;
    if delta > bound + TOLERANCE || (!decay_only && -delta > bound + TOLERANCE) {
        return Err(ViolationKind::ArousalJump {
            from: previous.arousal,
            to: next.arousal,
            bound,
        });
    }

    Ok(())
}

/// Owner of the regulatory state vector.
pub struct StateRegulator {
    config: RegulatorConfig,
    state: EmotionalState,

    /// Consecutive heartbeats since the last external event
    idle_cycles: u64,
    /// Consecutive cycles without a reported failure
    failure_free_cycles: u64,
    /// Most recent pattern-stability readings, newest last
    stability_readings: VecDeque<f32>,

    /// Confidence level in force when the current disturbance began
    open_disturbance: Option<f32>,
    recovered_disturbances: u64,

    violations: VecDeque<StructuralViolation>,
    violation_count: u64,
}

impl StateRegulator {
    pub fn new(config: RegulatorConfig) -> Self {
        let defaults = EmotionalState::default();
        let floor = defaults.confidence_floor.min(config.floor_max);
        let state = EmotionalState {
            arousal: defaults.arousal.clamp(config.arousal_min, config.arousal_max),
            confidence_floor: floor,
            confidence: defaults.confidence.max(floor),
            ..defaults
        };

        Self {
            config,
            state,
            idle_cycles: 0,
            failure_free_cycles: 0,
            stability_readings: VecDeque::new(),
            open_disturbance: None,
            recovered_disturbances: 0,
            violations: VecDeque::new(),
            violation_count: 0,
        }
    }

    pub fn state(&self) -> EmotionalState {
        self.state
    }

    pub fn config(&self) -> &RegulatorConfig {
        &self.config
    }

    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles
    }

    /// Disturbances after which confidence returned to its pre-disturbance level.
    pub fn recovered_disturbances(&self) -> u64 {
        self.recovered_disturbances
    }

    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }

    /// Recently rejected updates, oldest first.
    pub fn violations(&self) -> impl Iterator<Item = &StructuralViolation> {
        self.violations.iter()
    }

    /// Apply one validated event as the update for `record.cycle`.
    pub fn apply(&mut self, record: &EventRecord) -> Result<StateUpdate, StructuralViolation> {
        let signals = record.signals();
        let cause = if record.is_self_generated() {
            UpdateCause::Pressure
        } else {
            UpdateCause::Event
        };
        let previous = self.state;

        // Pressure events do not end an idle streak
        let idle = match cause {
            UpdateCause::Pressure => self.idle_cycles,
            _ => 0,
        };
        let failure_free = if signals.failure {
            0
        } else {
            self.failure_free_cycles.saturating_add(1)
        };

        let impulse = self.arousal_impulse(&signals);
        let raised = (previous.arousal + impulse).min(self.config.arousal_max);
        let arousal = (raised - self.decay(raised, idle))
            .clamp(self.config.arousal_min, self.config.arousal_max);

        let mut next = EmotionalState {
            arousal,
            cycle: record.cycle,
            ..previous
        };

        if cause == UpdateCause::Event {
            self.regulate_confidence(&mut next, &signals, failure_free);
            next.uncertainty = self.next_uncertainty(previous.uncertainty, &signals);
            if signals.novelty >= self.config.novelty_threshold {
                let gap = next.curiosity_pressure - self.config.curiosity_baseline;
                next.curiosity_pressure -= self.config.curiosity_reset * gap;
            }
        }

        let update = self.commit(StateUpdate {
            cycle: record.cycle,
            cause,
            previous,
            state: next,
            severe_failure: signals.severe_failure,
            failure: signals.failure,
            decay_only: impulse <= 0.0,
        })?;

        if cause == UpdateCause::Event {
            self.idle_cycles = 0;
            if let Some(reading) = signals.pattern_stability {
                self.push_stability(reading);
            }
        }
        self.failure_free_cycles = failure_free;

        Ok(update)
    }

    /// Apply an idle heartbeat as the update for `cycle`.
    pub fn heartbeat(&mut self, cycle: u64) -> Result<StateUpdate, StructuralViolation> {
        let previous = self.state;
        let idle = self.idle_cycles.saturating_add(1);

        let arousal = (previous.arousal - self.decay(previous.arousal, idle))
            .clamp(self.config.arousal_min, self.config.arousal_max);
        let curiosity = (previous.curiosity_pressure
            + self.config.curiosity_rise * self.idle_multiplier(idle))
        .min(1.0);

        let next = EmotionalState {
            arousal,
            curiosity_pressure: curiosity,
            cycle,
            ..previous
        };

        let update = self.commit(StateUpdate {
            cycle,
            cause: UpdateCause::Heartbeat,
            previous,
            state: next,
            severe_failure: false,
            failure: false,
            decay_only: true,
        })?;

        self.idle_cycles = idle;
        self.failure_free_cycles = self.failure_free_cycles.saturating_add(1);

        Ok(update)
    }

    // ========================================================================
    // Rules
    // ========================================================================

    fn arousal_impulse(&self, signals: &EventSignals) -> f32 {
        let c = &self.config;
        let failure = if signals.failure { c.failure_gain } else { 0.0 };
        let raw = c.novelty_gain * signals.novelty
            + c.contradiction_gain * signals.contradiction
            + c.surprise_gain * signals.surprise
            + failure;
        raw.min(c.max_arousal_delta).max(0.0)
    }

    fn idle_multiplier(&self, idle: u64) -> f32 {
        (1.0 + idle as f32 * self.config.idle_decay_gain).min(self.config.idle_decay_cap)
    }

    /// Decay toward baseline; never overshoots it.
    fn decay(&self, arousal: f32, idle: u64) -> f32 {
        let room = (arousal - self.config.arousal_baseline).max(0.0);
        (self.config.arousal_decay * self.idle_multiplier(idle)).min(room)
    }

    fn regulate_confidence(
        &self,
        next: &mut EmotionalState,
        signals: &EventSignals,
        failure_free: u64,
    ) {
        let c = &self.config;
        if signals.severe_failure {
            let floor = (next.confidence_floor * (1.0 - c.severe_floor_fraction)).max(0.0);
            next.confidence_floor = floor;
            next.confidence = (next.confidence - c.severe_confidence_drop).max(floor);
        } else if signals.failure {
            let gap = (next.confidence - next.confidence_floor).max(0.0);
            let drop = (c.confidence_drop_fraction * gap).min(c.confidence_drop_max);
            next.confidence -= drop;
        } else if failure_free >= u64::from(c.stabilization_cycles) {
            next.confidence += c.confidence_recovery_rate * (1.0 - next.confidence);
            let candidate = (next.confidence_floor + c.floor_step)
                .min(next.confidence)
                .min(c.floor_max);
            next.confidence_floor = next.confidence_floor.max(candidate);
        }
    }

    fn next_uncertainty(&self, current: f32, signals: &EventSignals) -> f32 {
        let c = &self.config;
        let failure = if signals.failure { 1.0 } else { 0.0 };
        let disturbance = (failure + signals.contradiction).min(1.0);

        let next = if disturbance > 0.0 {
            current + c.uncertainty_rise * disturbance
        } else if self.window_is_stable(signals.pattern_stability) {
            current - c.uncertainty_decay
        } else {
            current
        };
        next.clamp(0.0, 1.0)
    }

    /// True when the incoming reading completes a full window of stable readings.
    fn window_is_stable(&self, incoming: Option<f32>) -> bool {
        let window = self.config.stability_window;
        let threshold = self.config.pattern_stability_threshold;
        let Some(reading) = incoming else {
            return false;
        };
        if reading < threshold || self.stability_readings.len() + 1 < window {
            return false;
        }
        self.stability_readings
            .iter()
            .rev()
            .take(window - 1)
            .all(|r| *r >= threshold)
    }

    fn push_stability(&mut self, reading: f32) {
        self.stability_readings.push_back(reading);
        while self.stability_readings.len() > self.config.stability_window {
            self.stability_readings.pop_front();
        }
    }

    // ========================================================================
    // Commit
    // ========================================================================

    fn commit(&mut self, update: StateUpdate) -> Result<StateUpdate, StructuralViolation> {
        if let Err(kind) = validate_transition(
            &self.config,
            &update.previous,
            &update.state,
            update.severe_failure,
            update.decay_only,
        ) {
            let violation = StructuralViolation {
                cycle: update.cycle,
                kind,
            };
            tracing::warn!("Rejected state update: {}", violation);
            self.violations.push_back(violation.clone());
            if self.violations.len() > VIOLATION_LOG_CAPACITY {
                self.violations.pop_front();
            }
            self.violation_count += 1;
            return Err(violation);
        }

        self.track_disturbance(&update.previous, &update.state);
        self.state = update.state;
        tracing::trace!("State updated ({:?}): {}", update.cause, update.state);
        Ok(update)
    }

    fn track_disturbance(&mut self, previous: &EmotionalState, next: &EmotionalState) {
        match self.open_disturbance {
            None if next.confidence < previous.confidence - TOLERANCE => {
                self.open_disturbance = Some(previous.confidence);
            }
            Some(baseline) if next.confidence >= baseline - TOLERANCE => {
                self.open_disturbance = None;
                self.recovered_disturbances += 1;
                tracing::debug!(
                    "Recovered from disturbance at cycle {} (confidence {:.3} >= {:.3})",
                    next.cycle,
                    next.confidence,
                    baseline
                );
            }
            _ => {}
        }
    }
}
