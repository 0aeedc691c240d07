//! Property-based tests for the milestone gate and the assembled core.

use anima_core::{AlertKind, AnimaConfig, HealthAlert, RawEvent};
use anima_organism::{
    Condition, MilestoneEvidence, MilestoneGate, MilestoneLevel, MilestonePolicy,
    MilestoneRequirements, RegulatoryCore, TransitionKind,
};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum GateInput {
    Evidence { advance: u64, events: u64, recovered: u64 },
    Fatal { advance: u64 },
}

fn arb_gate_input() -> impl Strategy<Value = GateInput> {
    prop_oneof![
        6 => (1u64..40, 0u64..200, 0u64..10).prop_map(|(advance, events, recovered)| {
            GateInput::Evidence { advance, events, recovered }
        }),
        1 => (1u64..40).prop_map(|advance| GateInput::Fatal { advance }),
    ]
}

fn requirements() -> MilestoneRequirements {
    MilestoneRequirements {
        explorer: vec![Condition::MinEvents(20), Condition::StableCycles(30)],
        conversational: vec![Condition::MinEvents(60), Condition::RecoveredDisturbances(2)],
        reflective: vec![Condition::MinEvents(120), Condition::RecoveredDisturbances(5)],
        autonomous: vec![Condition::MinEvents(150)],
    }
}

fn policy() -> MilestonePolicy {
    MilestonePolicy {
        autonomous_enabled: false,
        confirm_cycles: 50,
        restabilize_cycles: 40,
    }
}

#[derive(Debug, Clone)]
enum Input {
    Heartbeat,
    Raw(RawEvent),
}

/// Raw events with every field possibly missing or malformed.
fn arb_raw() -> impl Strategy<Value = RawEvent> {
    (
        proptest::option::weighted(0.95, 0u32..400),
        proptest::option::weighted(0.95, 0u64..400),
        proptest::option::weighted(0.95, prop_oneof![Just("world"), Just("body"), Just("sled")]),
        proptest::option::weighted(
            0.95,
            prop_oneof![Just("observation"), Just("action"), Just("outcome"), Just("bogus")],
        ),
        proptest::option::of(prop_oneof![0.0f32..=1.0, Just(f32::NAN), Just(4.0f32)]),
        (any::<bool>(), proptest::bool::weighted(0.02), 0.0f32..=1.0),
    )
        .prop_map(|(id, sequence, source, kind, novelty, (ok, severe, contradiction))| RawEvent {
            id: id.map(|n| format!("ev-{}", n)),
            sequence,
            source: source.map(str::to_string),
            kind: kind.map(str::to_string),
            payload: json!({
                "ok": ok,
                "severe_failure": severe,
                "contradiction": contradiction,
            }),
            novelty_score: novelty,
            timestamp: Some(0),
        })
}

fn arb_inputs() -> impl Strategy<Value = Vec<Input>> {
    proptest::collection::vec(
        prop_oneof![1 => Just(Input::Heartbeat), 4 => arb_raw().prop_map(Input::Raw)],
        1..250,
    )
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Unlocks only ever step to the next level, against evidence that met
    /// the target's conditions; a fatal alert leaves the gate on its stable level.
    #[test]
    fn prop_gate_moves_one_level_on_evidence(inputs in proptest::collection::vec(arb_gate_input(), 1..80)) {
        let mut gate = MilestoneGate::with_requirements(requirements(), policy());
        let mut cycle = 0u64;
        let mut last_fatal: Option<u64> = None;

        for input in inputs {
            match input {
                GateInput::Evidence { advance, events, recovered } => {
                    cycle += advance;
                    let evidence = MilestoneEvidence {
                        cycle,
                        event_count: events,
                        recovered_disturbances: recovered,
                        ..Default::default()
                    };
                    let before = gate.level();
                    if let Some(t) = gate.evaluate(&evidence).unwrap() {
                        prop_assert_eq!(t.kind, TransitionKind::Unlock);
                        prop_assert_eq!(Some(t.to), before.next());
                        let stable = cycle - last_fatal.unwrap_or(0);
                        let target = &gate.milestones()[t.to.index() as usize];
                        prop_assert!(target.required_conditions.iter().all(|c| c.is_met(&evidence, stable)));
                    } else {
                        prop_assert_eq!(gate.level(), before);
                    }
                }
                GateInput::Fatal { advance } => {
                    cycle += advance;
                    let alert = HealthAlert::new(AlertKind::ZenoCollapse, cycle, "prop");
                    gate.on_fatal(&alert);
                    last_fatal = Some(cycle);
                    prop_assert_eq!(gate.level(), gate.stable_level());
                }
            }
            prop_assert!(gate.level() < MilestoneLevel::Autonomous);
        }
    }

    /// Arbitrary, partly malformed input never breaks the core: quarantine
    /// leaves the cycle alone and the state stays inside its invariants.
    #[test]
    fn prop_core_absorbs_arbitrary_input(inputs in arb_inputs()) {
        let mut core = RegulatoryCore::new(AnimaConfig::default()).unwrap();
        let mut expected_cycle = 0u64;
        let mut floor = core.state().confidence_floor;

        for input in inputs {
            match input {
                Input::Heartbeat => {
                    core.heartbeat();
                    expected_cycle += 1;
                    expected_cycle += core.drain_internal().len() as u64;
                }
                Input::Raw(raw) => {
                    let severe = raw.payload["severe_failure"] == json!(true);
                    if core.ingest(raw).is_ok() {
                        expected_cycle += 1;
                        let state = core.state();
                        if !severe {
                            prop_assert!(state.confidence_floor >= floor - 1e-6);
                        }
                    }
                }
            }

            let state = core.state();
            prop_assert_eq!(core.cycle(), expected_cycle);
            prop_assert!(state.non_finite_field().is_none());
            prop_assert!(state.confidence + 1e-6 >= state.confidence_floor);
            prop_assert!((0.0..=1.0).contains(&state.arousal));
            floor = state.confidence_floor;
        }
    }
}
