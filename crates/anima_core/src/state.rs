//! Regulatory state vector.
//!
//! These are control variables, not "human emotion". Values are bounded and
//! change gradually. The regulator is the only writer; everyone else sees
//! copies.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    /// Activation / load level
    pub arousal: f32,
    pub confidence: f32,
    /// Minimum confidence guaranteed by prior recovery. Only a severe failure lowers it.
    pub confidence_floor: f32,
    pub uncertainty: f32,
    /// Internally generated drive that rises while input stagnates
    pub curiosity_pressure: f32,
    pub cycle: u64,
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self {
            arousal: 0.15,
            confidence: 0.30,
            confidence_floor: 0.05,
            uncertainty: 0.85,
            curiosity_pressure: 0.25,
            cycle: 0,
        }
    }
}

impl EmotionalState {
    /// Name of the first non-finite field, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("arousal", self.arousal),
            ("confidence", self.confidence),
            ("confidence_floor", self.confidence_floor),
            ("uncertainty", self.uncertainty),
            ("curiosity_pressure", self.curiosity_pressure),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(name, _)| name)
    }

    /// How far confidence sits above its floor.
    pub fn confidence_margin(&self) -> f32 {
        self.confidence - self.confidence_floor
    }
}

impl fmt::Display for EmotionalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle={} arousal={:.3} confidence={:.3} floor={:.3} uncertainty={:.3} curiosity={:.3}",
            self.cycle,
            self.arousal,
            self.confidence,
            self.confidence_floor,
            self.uncertainty,
            self.curiosity_pressure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_finite_and_above_floor() {
        let s = EmotionalState::default();
        assert_eq!(s.non_finite_field(), None);
        assert!(s.confidence_margin() > 0.0);
    }

    #[test]
    fn test_non_finite_field_detection() {
        let s = EmotionalState {
            uncertainty: f32::INFINITY,
            ..Default::default()
        };
        assert_eq!(s.non_finite_field(), Some("uncertainty"));
    }

    #[test]
    fn test_display_mentions_cycle() {
        let s = EmotionalState {
            cycle: 42,
            ..Default::default()
        };
        assert!(s.to_string().starts_with("cycle=42"));
    }
}
