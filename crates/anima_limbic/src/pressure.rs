//! Internal pressure emission
//!
//! During long idle stretches the core emits a bounded stream of pressure
//! events naming its dominant drive. Emission is limited by a cooldown so a
//! silent world cannot turn the core into a busy loop: with a threshold no
//! larger than the cooldown, `n` idle heartbeats yield at most
//! `n / cooldown_cycles` events.

use anima_core::{Drive, EmotionalState, PressureConfig, PressureEvent, PressureKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Idle cycles at which the continuity drive reaches one half.
const CONTINUITY_HALF_LIFE: f32 = 200.0;

/// Strength of each internal drive, all in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveState {
    pub stability: f32,
    pub curiosity: f32,
    pub continuity: f32,
}

impl DriveState {
    pub fn from_state(state: &EmotionalState, idle_cycles: u64) -> Self {
        let idle = idle_cycles as f32;
        Self {
            stability: ((state.arousal + state.uncertainty) / 2.0).clamp(0.0, 1.0),
            curiosity: state.curiosity_pressure.clamp(0.0, 1.0),
            continuity: idle / (idle + CONTINUITY_HALF_LIFE),
        }
    }

    /// Strongest drive; ties resolve in the order stability, curiosity, continuity.
    pub fn dominant(&self) -> (Drive, f32) {
        let mut best = (Drive::Stability, self.stability);
        for candidate in [
            (Drive::Curiosity, self.curiosity),
            (Drive::Continuity, self.continuity),
        ] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best
    }
}

pub struct PressureEmitter {
    config: PressureConfig,
    /// Idle count at the last emission of the current streak
    last_emitted_idle: u64,
    /// Sequence on the emitter's own source stream
    sequence: u64,
}

impl PressureEmitter {
    pub fn new(config: PressureConfig) -> Self {
        Self {
            config,
            last_emitted_idle: 0,
            sequence: 0,
        }
    }

    /// Events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.sequence
    }

    /// Called once per committed heartbeat with the current idle streak.
    pub fn tick(
        &mut self,
        idle_cycles: u64,
        drives: &DriveState,
        cycle: u64,
    ) -> Option<PressureEvent> {
        // A shorter streak than the last emission means external input broke it
        if idle_cycles < self.last_emitted_idle {
            self.last_emitted_idle = 0;
        }

        if idle_cycles < self.config.idle_threshold
            || idle_cycles - self.last_emitted_idle < self.config.cooldown_cycles
        {
            return None;
        }

        let escalation_at = self
            .config
            .idle_threshold
            .saturating_mul(self.config.escalation_factor);
        let kind = if idle_cycles >= escalation_at {
            PressureKind::Escalation
        } else {
            PressureKind::Nudge
        };
        let (drive, magnitude) = drives.dominant();

        self.last_emitted_idle = idle_cycles;
        self.sequence += 1;

        tracing::debug!(
            "Pressure {:?} on {} drive ({:.2}) after {} idle cycles",
            kind,
            drive,
            magnitude,
            idle_cycles
        );

        Some(PressureEvent {
            id: Uuid::new_v4(),
            kind,
            drive,
            magnitude,
            cycle,
            sequence: self.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drives() -> DriveState {
        DriveState {
            stability: 0.2,
            curiosity: 0.7,
            continuity: 0.1,
        }
    }

    #[test]
    fn test_dominant_drive() {
        assert_eq!(drives().dominant(), (Drive::Curiosity, 0.7));
        let tie = DriveState {
            stability: 0.5,
            curiosity: 0.5,
            continuity: 0.5,
        };
        assert_eq!(tie.dominant().0, Drive::Stability);
    }

    #[test]
    fn test_continuity_grows_with_idle() {
        let s = EmotionalState::default();
        assert_eq!(DriveState::from_state(&s, 0).continuity, 0.0);
        assert!(
            DriveState::from_state(&s, 400).continuity > DriveState::from_state(&s, 100).continuity
        );
    }

    #[test]
    fn test_nothing_below_threshold() {
        let mut emitter = PressureEmitter::new(PressureConfig::default());
        for idle in 1..50 {
            assert!(emitter.tick(idle, &drives(), idle).is_none());
        }
        assert!(emitter.tick(50, &drives(), 50).is_some());
    }

    #[test]
    fn test_emission_rate_is_bounded_by_cooldown() {
        let mut emitter = PressureEmitter::new(PressureConfig::default());
        let emitted: Vec<_> = (1..=1000)
            .filter_map(|idle| emitter.tick(idle, &drives(), idle))
            .collect();
        assert_eq!(emitted.len(), 20);
        assert_eq!(emitter.emitted(), 20);
        for pair in emitted.windows(2) {
            assert!(pair[1].cycle - pair[0].cycle >= 50);
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
    }

    #[test]
    fn test_escalates_after_long_silence() {
        let mut emitter = PressureEmitter::new(PressureConfig::default());
        let kinds: Vec<_> = (1..=300)
            .filter_map(|idle| emitter.tick(idle, &drives(), idle))
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds.first(), Some(&PressureKind::Nudge));
        assert_eq!(kinds.last(), Some(&PressureKind::Escalation));
    }

    #[test]
    fn test_broken_streak_restarts_cooldown() {
        let mut emitter = PressureEmitter::new(PressureConfig::default());
        assert!(emitter.tick(50, &drives(), 50).is_some());
        // External input reset the idle count
        assert!(emitter.tick(1, &drives(), 52).is_none());
        assert!(emitter.tick(50, &drives(), 101).is_some());
    }
}
