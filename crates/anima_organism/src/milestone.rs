//! Milestone gate
//!
//! Forward-only capability unlocks earned from evidence. Each level carries
//! the conjunctive condition set that must hold before it can be entered.
//! Fatal health alerts roll the gate back to the last level that was held
//! long enough without trouble, and block unlocks until the organism has
//! been calm again for a while.

use std::fmt;

use anima_core::{GateError, HealthAlert};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneLevel {
    Genesis = 0,
    Explorer = 1,
    Conversational = 2,
    Reflective = 3,
    Autonomous = 4,
}

impl MilestoneLevel {
    pub const ALL: [MilestoneLevel; 5] = [
        MilestoneLevel::Genesis,
        MilestoneLevel::Explorer,
        MilestoneLevel::Conversational,
        MilestoneLevel::Reflective,
        MilestoneLevel::Autonomous,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }
}

impl fmt::Display for MilestoneLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MilestoneLevel::Genesis => "genesis",
            MilestoneLevel::Explorer => "explorer",
            MilestoneLevel::Conversational => "conversational",
            MilestoneLevel::Reflective => "reflective",
            MilestoneLevel::Autonomous => "autonomous",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Evidence & conditions
// ============================================================================

/// Read-only statistics gathered from the regulator and the scheduler,
/// tagged with the cycle they describe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilestoneEvidence {
    pub cycle: u64,
    /// Episodic records accepted so far
    pub event_count: u64,
    /// Confidence dips that later climbed back to their pre-dip level
    pub recovered_disturbances: u64,
    pub repeated_patterns: u64,
    pub semantic_records: u64,
    pub formed_preferences: u64,
    pub confidence_floor: f32,
    pub uncertainty: f32,
}

/// One guard predicate of an exit-condition set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Condition {
    MinEvents(u64),
    RecoveredDisturbances(u64),
    RepeatedPatterns(u64),
    SemanticRecords(u64),
    FormedPreferences(u64),
    FloorAtLeast(f32),
    UncertaintyBelow(f32),
    /// Cycles since the last fatal alert (or since birth)
    StableCycles(u64),
}

impl Condition {
    pub fn is_met(&self, evidence: &MilestoneEvidence, stable_cycles: u64) -> bool {
        match *self {
            Condition::MinEvents(n) => evidence.event_count >= n,
            Condition::RecoveredDisturbances(n) => evidence.recovered_disturbances >= n,
            Condition::RepeatedPatterns(n) => evidence.repeated_patterns >= n,
            Condition::SemanticRecords(n) => evidence.semantic_records >= n,
            Condition::FormedPreferences(n) => evidence.formed_preferences >= n,
            Condition::FloorAtLeast(floor) => evidence.confidence_floor >= floor,
            Condition::UncertaintyBelow(u) => evidence.uncertainty < u,
            Condition::StableCycles(n) => stable_cycles >= n,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::MinEvents(n) => write!(f, "events >= {}", n),
            Condition::RecoveredDisturbances(n) => write!(f, "recovered disturbances >= {}", n),
            Condition::RepeatedPatterns(n) => write!(f, "repeated patterns >= {}", n),
            Condition::SemanticRecords(n) => write!(f, "semantic records >= {}", n),
            Condition::FormedPreferences(n) => write!(f, "formed preferences >= {}", n),
            Condition::FloorAtLeast(x) => write!(f, "confidence floor >= {:.2}", x),
            Condition::UncertaintyBelow(x) => write!(f, "uncertainty < {:.2}", x),
            Condition::StableCycles(n) => write!(f, "stable cycles >= {}", n),
        }
    }
}

/// Conditions to enter each level, indexed by the level entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRequirements {
    pub explorer: Vec<Condition>,
    pub conversational: Vec<Condition>,
    pub reflective: Vec<Condition>,
    pub autonomous: Vec<Condition>,
}

impl Default for MilestoneRequirements {
    fn default() -> Self {
        use Condition::*;
        Self {
            explorer: vec![
                MinEvents(200),
                RecoveredDisturbances(1),
                RepeatedPatterns(1),
                SemanticRecords(2),
                StableCycles(100),
            ],
            conversational: vec![
                MinEvents(1_000),
                RecoveredDisturbances(3),
                RepeatedPatterns(5),
                FormedPreferences(1),
                StableCycles(300),
            ],
            reflective: vec![
                MinEvents(5_000),
                RecoveredDisturbances(10),
                SemanticRecords(20),
                FloorAtLeast(0.15),
                UncertaintyBelow(0.5),
                StableCycles(1_000),
            ],
            autonomous: vec![
                MinEvents(20_000),
                RecoveredDisturbances(25),
                FormedPreferences(5),
                FloorAtLeast(0.3),
                UncertaintyBelow(0.3),
                StableCycles(5_000),
            ],
        }
    }
}

impl MilestoneRequirements {
    fn for_level(&self, level: MilestoneLevel) -> Vec<Condition> {
        match level {
            MilestoneLevel::Genesis => Vec::new(),
            MilestoneLevel::Explorer => self.explorer.clone(),
            MilestoneLevel::Conversational => self.conversational.clone(),
            MilestoneLevel::Reflective => self.reflective.clone(),
            MilestoneLevel::Autonomous => self.autonomous.clone(),
        }
    }
}

/// Fixed policy of the gate. Not part of the runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestonePolicy {
    pub autonomous_enabled: bool,
    /// Cycles a level must be held without a fatal alert to count as stable
    pub confirm_cycles: u64,
    /// Calm cycles after a fatal alert before unlocks resume
    pub restabilize_cycles: u64,
}

impl Default for MilestonePolicy {
    fn default() -> Self {
        Self {
            autonomous_enabled: false,
            confirm_cycles: 200,
            restabilize_cycles: 200,
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub level: MilestoneLevel,
    pub required_conditions: Vec<Condition>,
    pub unlocked: bool,
    pub unlocked_at_cycle: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Unlock,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneTransition {
    pub kind: TransitionKind,
    pub from: MilestoneLevel,
    pub to: MilestoneLevel,
    pub cycle: u64,
}

/// What collaborators get to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSnapshot {
    pub level: MilestoneLevel,
    pub unlocked_set: Vec<MilestoneLevel>,
    pub last_fatal_alert_cycle: Option<u64>,
}

pub struct MilestoneGate {
    milestones: Vec<Milestone>,
    policy: MilestonePolicy,
    level: MilestoneLevel,
    stable_level: MilestoneLevel,
    last_fatal_cycle: Option<u64>,
    /// Newest cycle any input has been accepted for
    last_seen_cycle: u64,
    history: Vec<MilestoneTransition>,
}

impl Default for MilestoneGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MilestoneGate {
    pub fn new() -> Self {
        Self::with_requirements(MilestoneRequirements::default(), MilestonePolicy::default())
    }

    pub fn with_requirements(requirements: MilestoneRequirements, policy: MilestonePolicy) -> Self {
        let milestones = MilestoneLevel::ALL
            .iter()
            .map(|&level| Milestone {
                level,
                required_conditions: requirements.for_level(level),
                unlocked: level == MilestoneLevel::Genesis,
                unlocked_at_cycle: (level == MilestoneLevel::Genesis).then_some(0),
            })
            .collect();

        Self {
            milestones,
            policy,
            level: MilestoneLevel::Genesis,
            stable_level: MilestoneLevel::Genesis,
            last_fatal_cycle: None,
            last_seen_cycle: 0,
            history: Vec::new(),
        }
    }

    pub fn level(&self) -> MilestoneLevel {
        self.level
    }

    /// Highest level held long enough to be a rollback target.
    pub fn stable_level(&self) -> MilestoneLevel {
        self.stable_level
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn history(&self) -> &[MilestoneTransition] {
        &self.history
    }

    pub fn snapshot(&self) -> MilestoneSnapshot {
        MilestoneSnapshot {
            level: self.level,
            unlocked_set: self
                .milestones
                .iter()
                .filter(|m| m.unlocked)
                .map(|m| m.level)
                .collect(),
            last_fatal_alert_cycle: self.last_fatal_cycle,
        }
    }

    pub fn unlocks_halted(&self, cycle: u64) -> bool {
        self.last_fatal_cycle
            .map(|fatal| cycle.saturating_sub(fatal) < self.policy.restabilize_cycles)
            .unwrap_or(false)
    }

    /// Levels can only move through evidence and alerts.
    pub fn request_transition(&self, requested: MilestoneLevel) -> Result<(), GateError> {
        tracing::warn!(
            "Rejected manual milestone transition to {} (current {})",
            requested,
            self.level
        );
        Err(GateError::ManualTransition {
            requested: requested.index(),
        })
    }

    /// Evaluate the current level's exit conditions against `evidence`.
    ///
    /// At most one level is gained per call. Evidence older than anything the
    /// gate has already seen is rejected.
    pub fn evaluate(
        &mut self,
        evidence: &MilestoneEvidence,
    ) -> Result<Option<MilestoneTransition>, GateError> {
        if evidence.cycle < self.last_seen_cycle {
            return Err(GateError::StaleSnapshot {
                evidence: evidence.cycle,
                gate: self.last_seen_cycle,
            });
        }
        self.last_seen_cycle = evidence.cycle;
        self.confirm_stability(evidence.cycle);

        if self.unlocks_halted(evidence.cycle) {
            return Ok(None);
        }
        let Some(next) = self.level.next() else {
            return Ok(None);
        };
        if next == MilestoneLevel::Autonomous && !self.policy.autonomous_enabled {
            return Ok(None);
        }

        let stable_cycles = self.stable_cycles(evidence.cycle);
        let target = &self.milestones[next.index() as usize];
        if !target
            .required_conditions
            .iter()
            .all(|c| c.is_met(evidence, stable_cycles))
        {
            return Ok(None);
        }

        let transition = MilestoneTransition {
            kind: TransitionKind::Unlock,
            from: self.level,
            to: next,
            cycle: evidence.cycle,
        };
        let milestone = &mut self.milestones[next.index() as usize];
        milestone.unlocked = true;
        milestone.unlocked_at_cycle = Some(evidence.cycle);
        self.level = next;
        tracing::info!("Milestone unlocked: {} at cycle {}", next, evidence.cycle);
        self.history.push(transition.clone());
        Ok(Some(transition))
    }

    /// Apply a fatal alert: roll back to the stable level and halt unlocks.
    ///
    /// Non-fatal alerts are ignored.
    pub fn on_fatal(&mut self, alert: &HealthAlert) -> Option<MilestoneTransition> {
        if !alert.is_fatal() {
            return None;
        }
        self.last_fatal_cycle = Some(alert.cycle);
        self.last_seen_cycle = self.last_seen_cycle.max(alert.cycle);

        if self.level == self.stable_level {
            tracing::warn!(
                "Fatal alert {} at cycle {}: holding {}, unlocks halted",
                alert.kind,
                alert.cycle,
                self.level
            );
            return None;
        }

        let from = self.level;
        for milestone in self.milestones.iter_mut().filter(|m| m.level > self.stable_level) {
            milestone.unlocked = false;
            milestone.unlocked_at_cycle = None;
        }
        self.level = self.stable_level;

        let transition = MilestoneTransition {
            kind: TransitionKind::Rollback,
            from,
            to: self.level,
            cycle: alert.cycle,
        };
        tracing::warn!(
            "Fatal alert {} at cycle {}: rolled back {} -> {}",
            alert.kind,
            alert.cycle,
            from,
            self.level
        );
        self.history.push(transition.clone());
        Some(transition)
    }

    fn stable_cycles(&self, cycle: u64) -> u64 {
        cycle.saturating_sub(self.last_fatal_cycle.unwrap_or(0))
    }

    fn confirm_stability(&mut self, cycle: u64) {
        if self.stable_level == self.level {
            return;
        }
        let held_since = self.milestones[self.level.index() as usize]
            .unlocked_at_cycle
            .unwrap_or(cycle)
            .max(self.last_fatal_cycle.unwrap_or(0));
        if cycle.saturating_sub(held_since) >= self.policy.confirm_cycles {
            tracing::debug!("Milestone {} confirmed stable at cycle {}", self.level, cycle);
            self.stable_level = self.level;
        }
    }
}
