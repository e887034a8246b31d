//! Suspending a battle on a player question, persisting everything, and
//! resuming must match a run that never stopped.

use combat_core::battle::{BattleOutcome, BattleTracker};
use combat_core::casualty::{CasualtyDetails, OrderOfLossesCache};
use combat_core::dice::ScriptedRandom;
use combat_core::exec::{CombatStep, ExecutionStack, ExecutionStatus};
use combat_core::game::{GameState, Route, UnitId};
use combat_core::player::{DeferredOracle, PendingRequest};
use combat_test_utils::fixtures::players::{GERMANS, RUSSIANS};
use combat_test_utils::fixtures::territories::{KARELIA, POLAND};
use combat_test_utils::fixtures::unit_types::{ARMOUR, ARTILLERY, INFANTRY};
use combat_test_utils::fixtures::{eastern_front, move_and_fight, placement, Battlefield};
use combat_test_utils::init_test_logging;

/// Attack hits once on the third die; the defence misses with all three.
const SCRIPT: [u32; 6] = [5, 5, 0, 5, 5, 5];

fn setup() -> (Battlefield, ExecutionStack<CombatStep>, UnitId) {
    let mut data = eastern_front();
    data.rules.max_battle_rounds = 1;
    data.placements.extend([
        placement(POLAND, INFANTRY, GERMANS, 2),
        placement(POLAND, ARTILLERY, GERMANS, 1),
        placement(KARELIA, INFANTRY, RUSSIANS, 2),
        placement(KARELIA, ARMOUR, RUSSIANS, 1),
    ]);
    let field = Battlefield::new(data);
    let mut units = field.units(POLAND, INFANTRY);
    units.extend(field.units(POLAND, ARTILLERY));
    let chosen = field.units(KARELIA, ARMOUR)[0];
    let stack = move_and_fight(Route::direct(POLAND, KARELIA), units, GERMANS);
    (field, stack, chosen)
}

#[test]
fn resumed_battle_matches_uninterrupted_run() {
    init_test_logging();

    // Uninterrupted: the answer is already queued.
    let (mut straight, mut stack, chosen) = setup();
    let mut oracle = DeferredOracle::new();
    oracle.answer_casualties(CasualtyDetails::killing(vec![chosen]));
    let mut dice = ScriptedRandom::new(SCRIPT);
    let status = straight
        .run(&mut stack, &mut dice, &mut oracle)
        .expect("straight run");
    assert_eq!(status, ExecutionStatus::Completed);

    // Interrupted: suspend on the question, persist, restore, answer, resume.
    let (mut first, mut stack, chosen) = setup();
    let mut oracle = DeferredOracle::new();
    let mut dice = ScriptedRandom::new(SCRIPT);
    let status = first
        .run(&mut stack, &mut dice, &mut oracle)
        .expect("first half");
    assert_eq!(status, ExecutionStatus::Suspended);
    assert!(matches!(
        stack.current(),
        Some(CombatStep::SelectBattleCasualties { defending: true, .. })
    ));
    let pending = oracle.take_pending();
    assert_eq!(pending.len(), 1);
    assert!(matches!(&pending[0], PendingRequest::Casualties(r) if r.player == RUSSIANS));
    // The attack was rolled before the question; the defence was not.
    assert_eq!(dice.remaining(), 3);

    let stack_bytes = stack.to_bytes().expect("stack");
    let state_bytes = first.state.to_bytes().expect("state");
    let tracker_bytes = first.tracker.to_bytes().expect("tracker");

    let mut resumed = Battlefield {
        state: GameState::from_bytes(&state_bytes).expect("state"),
        rules: first.rules.clone(),
        tracker: BattleTracker::from_bytes(&tracker_bytes).expect("tracker"),
        cache: OrderOfLossesCache::new(first.rules.order_of_losses_cache_capacity),
        history: first.history.clone(),
    };
    let mut stack: ExecutionStack<CombatStep> =
        ExecutionStack::from_bytes(&stack_bytes).expect("stack");
    oracle.answer_casualties(CasualtyDetails::killing(vec![chosen]));
    let status = resumed
        .run(&mut stack, &mut dice, &mut oracle)
        .expect("second half");
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(dice.remaining(), 0);

    assert!(!resumed.state.is_alive(chosen));
    assert_eq!(resumed.state.state_hash(), straight.state.state_hash());
    assert_eq!(resumed.fingerprint(), straight.fingerprint());
    assert_eq!(
        resumed.tracker.records().last().map(|r| r.outcome),
        Some(BattleOutcome::Draw)
    );
}

#[test]
fn wrong_answer_is_reported_and_asked_again() {
    init_test_logging();
    let (mut field, mut stack, chosen) = setup();
    let infantry = field.units(KARELIA, INFANTRY);
    let mut oracle = DeferredOracle::new();
    oracle
        .answer_casualties(CasualtyDetails::killing(vec![chosen, infantry[0]]))
        .answer_casualties(CasualtyDetails::killing(vec![infantry[1]]));
    let mut dice = ScriptedRandom::new(SCRIPT);
    let status = field
        .run(&mut stack, &mut dice, &mut oracle)
        .expect("run");
    assert_eq!(status, ExecutionStatus::Completed);

    assert_eq!(oracle.errors().len(), 1);
    assert_eq!(oracle.errors()[0].0, RUSSIANS);
    assert!(!field.state.is_alive(infantry[1]));
    assert!(field.state.is_alive(infantry[0]));
    assert!(field.state.is_alive(chosen));
}
