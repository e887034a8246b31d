//! Dice and combat power.
//!
//! Power is computed per unit ([`unit_power_and_rolls`], [`aa_power_and_rolls`])
//! and then rolled either with real dice or with low luck, where every full
//! multiple of the die is a guaranteed hit and only the remainder is rolled.
//! All randomness comes from a [`RandomSource`]; every roll is narrated to a
//! [`HistorySink`](crate::history::HistorySink).

mod aa;
mod engine;
mod power;
pub mod random;
mod roll;

pub use aa::{
    aa_power_and_rolls, low_luck_hits, max_aa_attack_and_dice_sides, roll_aa, total_aa_attacks,
    AaAttacks, AaFirePlan, AaPower, AaPowerMap,
};
pub use engine::{ensure_unique, roll_air_battle, roll_dice, roll_n_dice};
pub use power::{
    air_battle_power_and_rolls, total_power_and_rolls, unit_power_and_rolls,
    unit_power_for_sorting, PowerAndRolls, PowerMap, RollContext, TotalPower,
};
pub use random::{RandomSource, RecordingRandom, ScriptedRandom, SeededRandom};
pub use roll::{DiceRoll, Die, DieOutcome, EncodedDiceRoll, EncodedDie, DICE_ENCODING_VERSION};
