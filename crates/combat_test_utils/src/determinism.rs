//! Determinism testing utilities.
//!
//! Provides a harness for verifying that battle resolution produces
//! identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! A battle must resolve identically on every machine that replays it.
//! Sources of non-determinism include:
//!
//! - **Floating-point math**: expected hits use [`combat_core::math::Fixed`].
//!
//! - **HashMap iteration order**: the core keeps every keyed collection in
//!   a `BTreeMap` or `BTreeSet`, and every tie is broken by id.
//!
//! - **System randomness**: dice come from a seeded
//!   [`SeededRandom`] or a [`ScriptedRandom`](combat_core::dice::ScriptedRandom).
//!
//! # Test Levels
//!
//! 1. **Unit tests**: one roll or one selection is reproducible
//! 2. **Property tests**: random armies still resolve deterministically
//! 3. **Integration tests**: full moves and battles are reproducible
//! 4. **Parallel tests**: N runs on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use combat_core::battle::BattleTracker;
use combat_core::dice::SeededRandom;
use combat_core::exec::{CombatStep, ExecutionStack};
use combat_core::game::GameState;
use combat_core::history::HistoryLog;
use combat_core::player::AcceptDefaults;

use crate::fixtures::Battlefield;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
}

impl DeterminismResult {
    fn from_hashes(hashes: Vec<u64>) -> Self {
        Self {
            is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
            hashes,
        }
    }

    /// Get all unique hashes (should be 1 for deterministic resolution).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Battle resolution is non-deterministic!\n\
                 Runs: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a setup and a process several times and compare the hashes.
///
/// # Arguments
///
/// * `runs` - Number of times to run
/// * `setup` - Function to create the initial state
/// * `run` - Function that drives the state to completion
/// * `hash` - Function to compute the state hash
pub fn verify_determinism<S, Setup, Run, HashFn>(
    runs: usize,
    setup: Setup,
    run: Run,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Run: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            run(&mut state);
            hash(&state)
        })
        .collect();
    DeterminismResult::from_hashes(hashes)
}

/// Resolve one battlefield with dice seeded by `seed` and default answers.
///
/// # Panics
///
/// Panics if the run fails or suspends.
#[must_use]
pub fn run_seeded(
    mut field: Battlefield,
    mut stack: ExecutionStack<CombatStep>,
    seed: u64,
) -> Battlefield {
    let mut random = SeededRandom::new(seed);
    let status = field
        .run(&mut stack, &mut random, &mut AcceptDefaults)
        .expect("seeded run should not fail");
    assert!(stack.is_empty(), "seeded run suspended: {status:?}");
    field
}

/// Resolve the same seeded battle `runs` times and compare fingerprints.
///
/// # Example
///
/// ```ignore
/// use combat_test_utils::determinism::verify_seeded_battle;
///
/// let result = verify_seeded_battle(|| setup_invasion(), 42, 5);
/// result.assert_deterministic();
/// ```
pub fn verify_seeded_battle<F>(setup: F, seed: u64, runs: usize) -> DeterminismResult
where
    F: Fn() -> (Battlefield, ExecutionStack<CombatStep>),
{
    let hashes = (0..runs)
        .map(|_| {
            let (field, stack) = setup();
            run_seeded(field, stack, seed).fingerprint()
        })
        .collect();
    DeterminismResult::from_hashes(hashes)
}

/// Resolve the same seeded battle on `runs` scoped threads.
///
/// Catches non-determinism that only shows under different memory layout
/// or scheduling.
pub fn run_parallel_battles_scoped<F>(setup: F, seed: u64, runs: usize) -> DeterminismResult
where
    F: Fn() -> (Battlefield, ExecutionStack<CombatStep>) + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..runs)
            .map(|_| {
                s.spawn(|| {
                    let (field, stack) = setup();
                    run_seeded(field, stack, seed).fingerprint()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    DeterminismResult::from_hashes(hashes)
}

/// Compare two narrations line by line, finding the first difference.
///
/// # Returns
///
/// `None` if they match, `Some(index)` of the first differing entry.
#[must_use]
pub fn find_first_divergence(a: &HistoryLog, b: &HistoryLog) -> Option<usize> {
    let mut left = a.entries().iter();
    let mut right = b.entries().iter();
    let mut index = 0;
    loop {
        match (left.next(), right.next()) {
            (None, None) => return None,
            (Some(x), Some(y)) if x == y => index += 1,
            _ => return Some(index),
        }
    }
}

/// Verify that encoding the board and tracker preserves them exactly.
#[must_use]
pub fn verify_serialization_determinism(state: &GameState, tracker: &BattleTracker) -> bool {
    let Ok(state_bytes) = state.to_bytes() else {
        return false;
    };
    let Ok(tracker_bytes) = tracker.to_bytes() else {
        return false;
    };
    let Ok(restored_state) = GameState::from_bytes(&state_bytes) else {
        return false;
    };
    let Ok(restored_tracker) = BattleTracker::from_bytes(&tracker_bytes) else {
        return false;
    };
    restored_state.state_hash() == state.state_hash()
        && restored_tracker.to_bytes().ok() == Some(tracker_bytes)
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for combat testing.
pub mod strategies {
    use proptest::prelude::*;

    use combat_core::game::{Domain, UnitType, UnitTypeId};

    /// Any seed.
    pub fn arb_seed() -> impl Strategy<Value = u64> {
        any::<u64>()
    }

    /// Dice sides seen in rulesets.
    pub fn arb_dice_sides() -> impl Strategy<Value = u32> {
        prop_oneof![Just(6u32), Just(10u32), Just(12u32), Just(20u32)]
    }

    /// Attack or defense strength on a six-sided die.
    pub fn arb_strength() -> impl Strategy<Value = i32> {
        0i32..=6
    }

    /// Hits scored against a side.
    pub fn arb_hits() -> impl Strategy<Value = u32> {
        0u32..12
    }

    /// A land unit type with random strengths and one or two hit points.
    pub fn arb_land_type(id: u32) -> impl Strategy<Value = UnitType> {
        (arb_strength(), arb_strength(), 1u32..=2).prop_map(move |(attack, defense, hp)| {
            UnitType::new(UnitTypeId(id), format!("land{id}"), Domain::Land)
                .with_combat(attack, defense)
                .with_hit_points(hp)
        })
    }

    /// Up to `max_types` distinct land types with ids from 1.
    pub fn arb_land_types(max_types: u32) -> impl Strategy<Value = Vec<UnitType>> {
        (1..=max_types).prop_flat_map(|n| (1..=n).map(arb_land_type).collect::<Vec<_>>())
    }

    /// Unit counts per type, `types` entries.
    pub fn arb_counts(types: usize, max_each: u32) -> impl Strategy<Value = Vec<u32>> {
        proptest::collection::vec(0..=max_each, types)
    }
}
