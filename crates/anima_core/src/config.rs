use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

// ============================================================================
// Top-level config
// ============================================================================

/// Numeric thresholds of the regulatory core.
///
/// Every value here is a tunable default, not a fixed constant. The surface is
/// deliberately limited to thresholds: unknown keys are rejected, so a file
/// cannot seed emotional state, preference values or milestone levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimaConfig {
    pub intake: IntakeConfig,
    pub regulator: RegulatorConfig,
    pub consolidation: ConsolidationConfig,
    pub preference: PreferenceConfig,
    pub health: HealthConfig,
    pub pressure: PressureConfig,
    pub runtime: RuntimeConfig,
}

impl AnimaConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: AnimaConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Try to load from path; if that fails, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                if let Err(e) = cfg.validate() {
                    tracing::warn!("Ignoring env overrides: {}", e);
                    cfg = Self::default();
                }
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("ANIMA_IDLE_THRESHOLD") {
            self.pressure.idle_threshold = n;
        }
        if let Some(n) = env_parse("ANIMA_PRESSURE_COOLDOWN") {
            self.pressure.cooldown_cycles = n;
        }
        if let Some(n) = env_parse("ANIMA_DENSITY_THRESHOLD") {
            self.consolidation.density_threshold = n;
        }
        if let Some(n) = env_parse("ANIMA_MIN_BATCH_GAP") {
            self.consolidation.min_cycles_between_batches = n;
        }
        if let Some(n) = env_parse("ANIMA_FLOOR_STEP") {
            self.regulator.floor_step = n;
        }
        if let Some(n) = env_parse("ANIMA_STORM_MAX_BATCHES") {
            self.health.storm_max_batches = n;
        }
        if let Some(n) = env_parse("ANIMA_HEARTBEAT_MS") {
            self.runtime.heartbeat_interval_ms = n;
        }
    }

    /// Reject thresholds that would make an invariant meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.intake.validate()?;
        self.regulator.validate()?;
        self.consolidation.validate()?;
        self.preference.validate()?;
        self.health.validate()?;
        self.pressure.validate()?;
        self.runtime.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn unit(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("{} must lie in [0, 1]", value)))
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("{} must be a positive number", value)))
    }
}

fn at_least(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value >= min {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("{} must be at least {}", value, min)))
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntakeConfig {
    /// Quarantined events kept for inspection (oldest dropped first)
    pub quarantine_log_capacity: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            quarantine_log_capacity: 1024,
        }
    }
}

impl IntakeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least(
            "intake.quarantine_log_capacity",
            self.quarantine_log_capacity as u64,
            1,
        )
    }
}

/// Rates are per cycle, never per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegulatorConfig {
    // Arousal
    pub arousal_min: f32,
    pub arousal_max: f32,
    /// Resting level that decay pulls toward
    pub arousal_baseline: f32,
    /// Largest non-decay arousal change a single update may cause
    pub max_arousal_delta: f32,
    pub novelty_gain: f32,
    pub contradiction_gain: f32,
    pub failure_gain: f32,
    pub surprise_gain: f32,
    pub arousal_decay: f32,
    /// Extra decay per consecutive idle cycle, as a fraction of `arousal_decay`
    pub idle_decay_gain: f32,
    /// Upper bound of the idle decay multiplier
    pub idle_decay_cap: f32,

    // Confidence
    pub confidence_drop_max: f32,
    /// Share of the confidence-to-floor gap lost on a failure
    pub confidence_drop_fraction: f32,
    pub confidence_recovery_rate: f32,
    /// Failure-free cycles (K) before recovery starts
    pub stabilization_cycles: u32,
    /// Largest floor rise per recovery step
    pub floor_step: f32,
    pub floor_max: f32,
    /// Floor reduction on a severe failure, as a share of the current floor
    pub severe_floor_fraction: f32,
    pub severe_confidence_drop: f32,

    // Uncertainty
    pub uncertainty_decay: f32,
    pub uncertainty_rise: f32,
    pub pattern_stability_threshold: f32,
    /// Consecutive stable readings required before uncertainty may decay
    pub stability_window: usize,

    // Curiosity pressure
    pub curiosity_baseline: f32,
    pub curiosity_rise: f32,
    /// Share of the distance to baseline removed by a novel event
    pub curiosity_reset: f32,
    pub novelty_threshold: f32,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            arousal_min: 0.02,
            arousal_max: 1.0,
            arousal_baseline: 0.10,
            max_arousal_delta: 0.25,
            novelty_gain: 0.30,
            contradiction_gain: 0.20,
            failure_gain: 0.12,
            surprise_gain: 0.15,
            arousal_decay: 0.03,
            idle_decay_gain: 0.10,
            idle_decay_cap: 3.0,

            confidence_drop_max: 0.05,
            confidence_drop_fraction: 0.20,
            confidence_recovery_rate: 0.08,
            stabilization_cycles: 3,
            floor_step: 0.01,
            floor_max: 0.60,
            severe_floor_fraction: 0.25,
            severe_confidence_drop: 0.15,

            uncertainty_decay: 0.02,
            uncertainty_rise: 0.03,
            pattern_stability_threshold: 0.7,
            stability_window: 5,

            curiosity_baseline: 0.25,
            curiosity_rise: 0.01,
            curiosity_reset: 0.5,
            novelty_threshold: 0.5,
        }
    }
}

impl RegulatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, v) in [
            ("regulator.arousal_min", self.arousal_min),
            ("regulator.arousal_max", self.arousal_max),
            ("regulator.arousal_baseline", self.arousal_baseline),
            ("regulator.novelty_gain", self.novelty_gain),
            ("regulator.contradiction_gain", self.contradiction_gain),
            ("regulator.failure_gain", self.failure_gain),
            ("regulator.surprise_gain", self.surprise_gain),
            ("regulator.arousal_decay", self.arousal_decay),
            ("regulator.idle_decay_gain", self.idle_decay_gain),
            ("regulator.confidence_drop_max", self.confidence_drop_max),
            ("regulator.confidence_drop_fraction", self.confidence_drop_fraction),
            ("regulator.confidence_recovery_rate", self.confidence_recovery_rate),
            ("regulator.floor_step", self.floor_step),
            ("regulator.floor_max", self.floor_max),
            ("regulator.severe_floor_fraction", self.severe_floor_fraction),
            ("regulator.severe_confidence_drop", self.severe_confidence_drop),
            ("regulator.uncertainty_decay", self.uncertainty_decay),
            ("regulator.uncertainty_rise", self.uncertainty_rise),
            ("regulator.pattern_stability_threshold", self.pattern_stability_threshold),
            ("regulator.curiosity_baseline", self.curiosity_baseline),
            ("regulator.curiosity_rise", self.curiosity_rise),
            ("regulator.curiosity_reset", self.curiosity_reset),
            ("regulator.novelty_threshold", self.novelty_threshold),
        ] {
            unit(field, v)?;
        }
        positive("regulator.max_arousal_delta", self.max_arousal_delta)?;
        if !(self.idle_decay_cap.is_finite() && self.idle_decay_cap >= 1.0) {
            return Err(ConfigError::new(
                "regulator.idle_decay_cap",
                "must be a finite multiplier of at least 1",
            ));
        }
        if !(self.arousal_min <= self.arousal_baseline && self.arousal_baseline < self.arousal_max)
        {
            return Err(ConfigError::new(
                "regulator.arousal_baseline",
                "expected arousal_min <= arousal_baseline < arousal_max",
            ));
        }
        at_least("regulator.stability_window", self.stability_window as u64, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsolidationConfig {
    /// Sliding window (in cycles) inspected for density
    pub density_window_cycles: u64,
    /// Unconsolidated events inside the density window that trigger a batch
    pub density_threshold: usize,
    /// Near-duplicate cluster size that triggers a batch
    pub repetition_threshold: usize,
    /// Minimum peak height for the "decay after a local peak" trigger
    pub peak_min_arousal: f32,
    pub idle_trigger_cycles: u64,
    pub idle_uncertainty_threshold: f32,
    pub idle_arousal_threshold: f32,
    pub min_batch_events: usize,
    pub max_batch_events: usize,
    /// Consolidation rate cap: triggers closer than this are coalesced
    pub min_cycles_between_batches: u64,
    /// Number of novelty buckets used by near-duplicate signatures
    pub novelty_buckets: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            density_window_cycles: 32,
            density_threshold: 24,
            repetition_threshold: 5,
            peak_min_arousal: 0.35,
            idle_trigger_cycles: 20,
            idle_uncertainty_threshold: 0.6,
            idle_arousal_threshold: 0.5,
            min_batch_events: 3,
            max_batch_events: 64,
            min_cycles_between_batches: 16,
            novelty_buckets: 10,
        }
    }
}

impl ConsolidationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least("consolidation.density_window_cycles", self.density_window_cycles, 1)?;
        at_least("consolidation.density_threshold", self.density_threshold as u64, 1)?;
        at_least("consolidation.repetition_threshold", self.repetition_threshold as u64, 2)?;
        at_least("consolidation.min_batch_events", self.min_batch_events as u64, 1)?;
        at_least("consolidation.novelty_buckets", self.novelty_buckets as u64, 1)?;
        unit("consolidation.peak_min_arousal", self.peak_min_arousal)?;
        unit("consolidation.idle_uncertainty_threshold", self.idle_uncertainty_threshold)?;
        unit("consolidation.idle_arousal_threshold", self.idle_arousal_threshold)?;
        if self.max_batch_events < self.min_batch_events {
            return Err(ConfigError::new(
                "consolidation.max_batch_events",
                "must not be smaller than min_batch_events",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreferenceConfig {
    /// Observations required before a gradient may leave neutral
    pub min_repetitions: u32,
    pub learning_rate: f32,
    /// Bound on the change a single batch can cause
    pub max_step: f32,
    /// Slow pull toward neutral applied to untouched gradients per batch
    pub decay: f32,
    /// |value| at which a gradient counts as saturated
    pub saturation: f32,
    /// Updates smaller than this on a saturated gradient count as unresponsive
    pub responsiveness_epsilon: f32,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            min_repetitions: 3,
            learning_rate: 0.2,
            max_step: 0.15,
            decay: 0.01,
            saturation: 0.95,
            responsiveness_epsilon: 0.002,
        }
    }
}

impl PreferenceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least("preference.min_repetitions", self.min_repetitions as u64, 1)?;
        unit("preference.learning_rate", self.learning_rate)?;
        positive("preference.max_step", self.max_step)?;
        unit("preference.max_step", self.max_step)?;
        unit("preference.decay", self.decay)?;
        unit("preference.saturation", self.saturation)?;
        unit("preference.responsiveness_epsilon", self.responsiveness_epsilon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Consecutive non-decreasing elevated updates (N) before RunawayArousal
    pub runaway_cycles: usize,
    pub runaway_min_arousal: f32,
    pub storm_window_cycles: u64,
    /// Alert rate cap: batches allowed inside the storm window
    pub storm_max_batches: usize,
    /// Cycles (M) a saturated gradient may stay unresponsive
    pub lock_cycles: u64,
    /// Consecutive shrinking disturbance periods that indicate Zeno collapse
    pub zeno_periods: usize,
    /// State updates retained for trend analysis
    pub history_capacity: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            runaway_cycles: 16,
            runaway_min_arousal: 0.5,
            storm_window_cycles: 64,
            storm_max_batches: 4,
            lock_cycles: 50,
            zeno_periods: 4,
            history_capacity: 512,
        }
    }
}

impl HealthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least("health.runaway_cycles", self.runaway_cycles as u64, 1)?;
        unit("health.runaway_min_arousal", self.runaway_min_arousal)?;
        at_least("health.storm_window_cycles", self.storm_window_cycles, 1)?;
        at_least("health.storm_max_batches", self.storm_max_batches as u64, 1)?;
        at_least("health.lock_cycles", self.lock_cycles, 1)?;
        at_least("health.zeno_periods", self.zeno_periods as u64, 2)?;
        let needed = self.runaway_cycles.max(self.zeno_periods * 2) as u64 + 1;
        at_least("health.history_capacity", self.history_capacity as u64, needed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PressureConfig {
    /// Idle heartbeats before pressure may be emitted
    pub idle_threshold: u64,
    /// Minimum idle heartbeats between two emissions
    pub cooldown_cycles: u64,
    /// Idle multiple of the threshold past which pressure escalates
    pub escalation_factor: u64,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            idle_threshold: 50,
            cooldown_cycles: 50,
            escalation_factor: 4,
        }
    }
}

impl PressureConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least("pressure.idle_threshold", self.idle_threshold, 1)?;
        at_least("pressure.cooldown_cycles", self.cooldown_cycles, 1)?;
        at_least("pressure.escalation_factor", self.escalation_factor, 1)
    }
}

/// Pacing of the async runtime. Wall-clock time only decides when to check
/// for idleness; it never gates a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub heartbeat_interval_ms: u64,
    /// Capacity of the external event channel
    pub event_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 100,
            event_channel_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least("runtime.heartbeat_interval_ms", self.heartbeat_interval_ms, 1)?;
        at_least("runtime.event_channel_capacity", self.event_channel_capacity as u64, 1)
    }
}
