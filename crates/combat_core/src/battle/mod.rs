//! Battles, their dependencies, and territory take-over.
//!
//! [`BattleTracker`] registers attacks made during combat movement and
//! decides the order battles are fought in. Conquering a territory runs the
//! [`TakeOverRule`] chain from [`standard_rules`] against a [`Bridge`] that
//! lends the board, the ruleset and the history sink.

mod bridge;
mod kind;
mod pending;
mod takeover;
mod tracker;

pub use bridge::Bridge;
pub use kind::{BattleId, BattleOutcome, BattleStatus, BattleType};
pub use pending::{Battle, BattleRecord};
pub use takeover::{
    run_rules, standard_rules, AlliedCapitalLiberation, BombingRaidGuard, CapitalCapture,
    CaptureOrDestroyUnits, ConvoyRoute, MarkArrivedInCombat, NeutralCharge, OwnerResolution,
    OwnershipTransfer, RuleFlow, SeaControl, TakeOver, TakeOverRule,
};
pub use tracker::BattleTracker;
