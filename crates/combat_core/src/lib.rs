//! # Combat Core
//!
//! Deterministic battle resolution for a turn-based territory wargame.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness (dice come through a [`dice::RandomSource`])
//! - No floating-point math (expected hits use fixed-point)
//!
//! This separation enables:
//! - Suspending a battle mid-way while a player decides, and resuming it
//!   later from bytes
//! - Replaying a battle from its recorded dice
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`game`] - Board, unit types, routes and the change log
//! - [`support`] - Support rules and their resolution
//! - [`dice`] - Power calculation, normal, low-luck and AA rolls
//! - [`casualty`] - Casualty ordering and selection
//! - [`battle`] - Pending battles, their dependencies and take-over
//! - [`exec`] - Resumable execution of combat moves and battles
//! - [`rules`] - Ruleset switches
//! - [`data`] - RON scenario data
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod battle;
pub mod casualty;
pub mod data;
pub mod dice;
pub mod error;
pub mod exec;
pub mod game;
pub mod history;
pub mod math;
pub mod player;
pub mod rules;
pub mod support;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::battle::{
        BattleId, BattleOutcome, BattleRecord, BattleStatus, BattleTracker, BattleType, Bridge,
    };
    pub use crate::casualty::{
        aa_casualties, select_casualties, AaCasualtyQuery, CasualtyDetails, CasualtyQuery,
        CasualtySide, OrderOfLossesCache,
    };
    pub use crate::data::ScenarioData;
    pub use crate::dice::{
        roll_aa, roll_dice, DiceRoll, Die, RandomSource, RollContext, ScriptedRandom,
        SeededRandom,
    };
    pub use crate::error::{CombatError, ConsistencyViolation, Result, RuleRejection};
    pub use crate::exec::{CombatContext, CombatStep, ExecutionStack, ExecutionStatus};
    pub use crate::game::{
        AaStats, Change, CombatUnit, Domain, GameState, Player, PlayerId, Relationship, Route,
        Territory, TerritoryId, Unit, UnitId, UnitType, UnitTypeId,
    };
    pub use crate::history::{HistoryLog, HistoryPayload, HistorySink, NullHistory};
    pub use crate::math::Fixed;
    pub use crate::player::{AcceptDefaults, Decision, DeferredOracle, PlayerOracle, Question};
    pub use crate::rules::BattleRules;
    pub use crate::support::SupportRule;
}
