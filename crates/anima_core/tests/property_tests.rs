//! Property-based tests for signal extraction and config validation.

use anima_core::{AnimaConfig, EventKind, EventRecord, EventSignals};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Strategies
// ============================================================================

/// Numbers a careless collaborator might send, including non-finite ones.
fn arb_number() -> impl Strategy<Value = f64> {
    prop_oneof![
        4 => -5.0f64..5.0,
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
        1 => Just(1e300),
    ]
}

fn arb_record() -> impl Strategy<Value = EventRecord> {
    (
        arb_number(),
        arb_number(),
        arb_number(),
        arb_number(),
        proptest::option::of(prop_oneof![-2.0f32..2.0, Just(f32::NAN)]),
        any::<bool>(),
    )
        .prop_map(|(contradiction, surprise, stability, strain, novelty, ok)| EventRecord {
            id: "p1".to_string(),
            sequence: 1,
            source: "world".to_string(),
            kind: EventKind::Observation,
            payload: json!({
                "ok": ok,
                "contradiction": contradiction,
                "surprise": surprise,
                "pattern_stability": stability,
                "strain_delta": strain,
            }),
            novelty_score: novelty,
            timestamp: 0,
            cycle: 1,
        })
}

fn in_unit(v: f32) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Whatever the payload carries, extracted signals are finite and bounded.
    #[test]
    fn prop_signals_are_bounded(record in arb_record()) {
        let signals = EventSignals::extract(&record);
        prop_assert!(in_unit(signals.novelty));
        prop_assert!(in_unit(signals.contradiction));
        prop_assert!(in_unit(signals.surprise));
        if let Some(stability) = signals.pattern_stability {
            prop_assert!(in_unit(stability));
        }
        if let Some(strain) = signals.strain_delta {
            prop_assert!(strain.is_finite() && (-1.0..=1.0).contains(&strain));
        }
        prop_assert_eq!(signals.success, !signals.failure);
    }

    /// The arousal baseline is accepted only between the arousal bounds.
    #[test]
    fn prop_baseline_must_sit_inside_arousal_range(baseline in -1.0f32..2.0) {
        let mut config = AnimaConfig::default();
        config.regulator.arousal_baseline = baseline;
        let expected = config.regulator.arousal_min <= baseline
            && baseline < config.regulator.arousal_max;
        prop_assert_eq!(config.validate().is_ok(), expected);
    }
}
