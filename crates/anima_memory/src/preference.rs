//! Preference gradients
//!
//! A gradient is a like / not-like bias toward a subject, formed only by
//! consolidation from repeated strain evidence. There are no rewards and no
//! goals: repeated strain reduction leans toward *like*, repeated strain
//! increase toward *not-like*. Values move by bounded steps and are never
//! set directly.

use std::collections::BTreeMap;

use anima_core::PreferenceConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceGradient {
    pub subject_key: String,
    /// Smoothed strain bias in [-1, 1]; positive = like
    pub strain_ema: f32,
    pub observation_count: u32,
    /// Enough repetitions have been seen for the bias to move
    pub formed: bool,
    /// Change caused by the last batch that touched this gradient
    pub last_step: f32,
    pub last_updated_cycle: u64,
    /// Cycle since which the gradient has been saturated and unresponsive
    pub unresponsive_since: Option<u64>,
}

impl PreferenceGradient {
    fn neutral(subject_key: &str) -> Self {
        Self {
            subject_key: subject_key.to_string(),
            strain_ema: 0.0,
            observation_count: 0,
            formed: false,
            last_step: 0.0,
            last_updated_cycle: 0,
            unresponsive_since: None,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.strain_ema == 0.0
    }
}

/// One strain-bearing observation extracted from a consolidated event.
#[derive(Debug, Clone, PartialEq)]
pub struct StrainObservation {
    pub subject: String,
    /// Negative = strain reduced
    pub strain_delta: f32,
}

#[derive(Debug, Clone, Default)]
struct Tally {
    count: u32,
    sum: f32,
}

pub struct PreferenceBook {
    config: PreferenceConfig,
    gradients: BTreeMap<String, PreferenceGradient>,
}

impl PreferenceBook {
    pub fn new(config: PreferenceConfig) -> Self {
        Self {
            config,
            gradients: BTreeMap::new(),
        }
    }

    pub fn get(&self, subject: &str) -> Option<&PreferenceGradient> {
        self.gradients.get(subject)
    }

    pub fn gradients(&self) -> impl Iterator<Item = &PreferenceGradient> {
        self.gradients.values()
    }

    /// Formed gradients currently leaning one way.
    pub fn formed_count(&self) -> usize {
        self.gradients
            .values()
            .filter(|g| g.formed && !g.is_neutral())
            .count()
    }

    /// Step every subject observed in one batch; decay the rest.
    ///
    /// Returns the subjects whose value changed.
    pub fn apply_batch(&mut self, observations: &[StrainObservation], cycle: u64) -> Vec<String> {
        let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
        for obs in observations.iter().filter(|o| o.strain_delta.is_finite()) {
            let t = tallies.entry(obs.subject.as_str()).or_default();
            t.count += 1;
            t.sum += obs.strain_delta.clamp(-1.0, 1.0);
        }

        let mut changed = Vec::new();
        for (subject, tally) in &tallies {
            let gradient = self
                .gradients
                .entry(subject.to_string())
                .or_insert_with(|| PreferenceGradient::neutral(subject));
            if step(&self.config, gradient, tally, cycle) {
                changed.push(subject.to_string());
            }
        }

        for gradient in self.gradients.values_mut() {
            if tallies.contains_key(gradient.subject_key.as_str()) || gradient.is_neutral() {
                continue;
            }
            let pull = self.config.decay.min(gradient.strain_ema.abs());
            gradient.strain_ema -= pull * gradient.strain_ema.signum();
            // A drifting gradient is responding, not locked
            if pull > 0.0 || gradient.strain_ema.abs() < self.config.saturation {
                gradient.unresponsive_since = None;
            }
        }

        changed
    }
}

fn step(config: &PreferenceConfig, g: &mut PreferenceGradient, tally: &Tally, cycle: u64) -> bool {
    g.observation_count = g.observation_count.saturating_add(tally.count);
    g.last_updated_cycle = cycle;

    if g.observation_count < config.min_repetitions {
        g.last_step = 0.0;
        return false;
    }
    g.formed = true;

    // Strain reduction pushes toward like
    let direction = -(tally.sum / tally.count as f32);
    let headroom = 1.0 - g.strain_ema * direction.signum();
    let delta = (config.learning_rate * direction * headroom).clamp(-config.max_step, config.max_step);

    let previous = g.strain_ema;
    let mut next = (previous + delta).clamp(-1.0, 1.0);
    let flips = previous != 0.0 && next != 0.0 && next.signum() != previous.signum();
    if flips && tally.count < config.min_repetitions {
        next = 0.0;
    }

    g.strain_ema = next;
    g.last_step = next - previous;

    let saturated = g.strain_ema.abs() >= config.saturation;
    if saturated && g.last_step.abs() < config.responsiveness_epsilon {
        g.unresponsive_since.get_or_insert(cycle);
    } else {
        g.unresponsive_since = None;
    }

    if g.last_step != 0.0 {
        tracing::debug!(
            "Preference `{}` -> {:.3} (step {:+.3}, {} observations)",
            g.subject_key,
            g.strain_ema,
            g.last_step,
            g.observation_count
        );
    }
    g.last_step != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(subject: &str, strain_delta: f32, n: usize) -> Vec<StrainObservation> {
        (0..n)
            .map(|_| StrainObservation {
                subject: subject.to_string(),
                strain_delta,
            })
            .collect()
    }

    #[test]
    fn test_stays_neutral_below_min_repetitions() {
        let mut book = PreferenceBook::new(PreferenceConfig::default());
        book.apply_batch(&obs("lamp", -0.8, 1), 10);
        book.apply_batch(&obs("lamp", -0.8, 1), 20);
        let g = book.get("lamp").unwrap();
        assert_eq!(g.strain_ema, 0.0);
        assert_eq!(g.observation_count, 2);
        assert!(!g.formed);

        book.apply_batch(&obs("lamp", -0.8, 1), 30);
        assert!(book.get("lamp").unwrap().strain_ema > 0.0);
        assert_eq!(book.formed_count(), 1);
    }

    #[test]
    fn test_strain_increase_leans_not_like() {
        let mut book = PreferenceBook::new(PreferenceConfig::default());
        book.apply_batch(&obs("wall", 0.9, 4), 1);
        assert!(book.get("wall").unwrap().strain_ema < 0.0);
    }

    #[test]
    fn test_step_is_bounded() {
        let config = PreferenceConfig {
            learning_rate: 1.0,
            ..Default::default()
        };
        let mut book = PreferenceBook::new(config.clone());
        book.apply_batch(&obs("lamp", -1.0, 20), 1);
        assert!(book.get("lamp").unwrap().strain_ema <= config.max_step + 1e-6);
    }

    #[test]
    fn test_small_batch_cannot_flip_sign() {
        let mut book = PreferenceBook::new(PreferenceConfig::default());
        book.apply_batch(&obs("lamp", -0.2, 3), 1);
        let before = book.get("lamp").unwrap().strain_ema;
        assert!(before > 0.0);

        // Two contrary observations: enough to pull back, not to flip
        book.apply_batch(&obs("lamp", 1.0, 2), 2);
        assert!(book.get("lamp").unwrap().strain_ema >= 0.0);
    }

    #[test]
    fn test_untouched_gradients_decay() {
        let mut book = PreferenceBook::new(PreferenceConfig::default());
        book.apply_batch(&obs("lamp", -1.0, 3), 1);
        let formed = book.get("lamp").unwrap().strain_ema;
        book.apply_batch(&obs("door", -1.0, 1), 2);
        assert!(book.get("lamp").unwrap().strain_ema < formed);
    }

    #[test]
    fn test_saturated_gradient_becomes_unresponsive() {
        let config = PreferenceConfig {
            max_step: 1.0,
            learning_rate: 1.0,
            ..Default::default()
        };
        let mut book = PreferenceBook::new(config);
        for cycle in 1..=10 {
            book.apply_batch(&obs("lamp", -1.0, 3), cycle);
        }
        let g = book.get("lamp").unwrap();
        assert!(g.strain_ema >= 0.95);
        assert!(g.unresponsive_since.is_some());
    }

    #[test]
    fn test_decaying_gradient_is_no_longer_locked() {
        let config = PreferenceConfig {
            max_step: 1.0,
            learning_rate: 1.0,
            ..Default::default()
        };
        let mut book = PreferenceBook::new(config.clone());
        book.apply_batch(&obs("lamp", -1.0, 3), 1);
        book.apply_batch(&obs("lamp", -1.0, 3), 2);
        assert!(book.get("lamp").unwrap().unresponsive_since.is_some());

        for cycle in 3..=77 {
            book.apply_batch(&obs("door", -0.1, 1), cycle);
            let lamp = book.get("lamp").unwrap();
            assert!(lamp.unresponsive_since.is_none(), "still locked at cycle {}", cycle);
        }
        let lamp = book.get("lamp").unwrap();
        assert!(lamp.strain_ema < config.saturation);
        assert!(lamp.formed);
    }
}
