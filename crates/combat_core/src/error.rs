//! Error types for battle resolution.
//!
//! Errors fall into two classes. A [`ConsistencyViolation`] means the engine
//! itself is wrong (duplicate units, a casualty count that disagrees with the
//! dice, a change that does not match the board) and must abort. A
//! [`RuleRejection`] is a recoverable, player-facing refusal.

use thiserror::Error;

use crate::battle::BattleId;
use crate::game::{PlayerId, TerritoryId, UnitId, UnitTypeId};

/// Result type alias using [`CombatError`].
pub type Result<T> = std::result::Result<T, CombatError>;

/// Top-level error type for the combat core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    /// Logic defect. Never swallowed.
    #[error("Consistency violation: {0}")]
    Consistency(#[from] ConsistencyViolation),

    /// Recoverable refusal surfaced to the acting player.
    #[error("Rejected: {0}")]
    Rejected(#[from] RuleRejection),

    /// Data file parsing or validation error.
    #[error("Failed to load data '{source_name}': {message}")]
    Data {
        /// Name of the data source that failed.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// Binary encoding or decoding failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl CombatError {
    /// Whether this error must abort the current resolution.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Consistency(_) | Self::Serialization(_) => true,
            Self::Rejected(_) | Self::Data { .. } => false,
        }
    }

    /// Wrap a bincode error.
    pub(crate) fn serialization(what: &str, err: impl std::fmt::Display) -> Self {
        Self::Serialization(format!("{what}: {err}"))
    }
}

/// Fatal programming-error assertions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyViolation {
    /// The same unit appears twice in a combatant set.
    #[error("Duplicate units in {context}: {units:?}")]
    DuplicateUnits {
        /// Where the duplicates were found.
        context: String,
        /// The repeated units.
        units: Vec<UnitId>,
    },

    /// Selected casualties disagree with the dice.
    #[error("Casualty count mismatch: expected {expected}, got {actual}")]
    CasualtyCountMismatch {
        /// Hits the dice produced.
        expected: u32,
        /// Casualties produced.
        actual: u32,
    },

    /// AA firing groups do not add up to the capped total.
    #[error("AA attacks do not reconcile: total {total}, normal {normal}, infinite {infinite}, overstack {overstack}")]
    AaGroupMismatch {
        /// Capped total attacks.
        total: u32,
        /// Normal group attacks.
        normal: u32,
        /// Infinite group attacks.
        infinite: u32,
        /// Overstack group attacks.
        overstack: u32,
    },

    /// A change does not match the current board.
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// An operation that must not touch the board produced a change.
    #[error("Unexpected change while {0}")]
    UnexpectedChange(String),

    /// Casualties were asked for units outside the friendly force.
    #[error("Targets not part of the friendly units: {0:?}")]
    MissingTarget(Vec<UnitId>),

    /// Adding the edge would make the battle graph cyclic.
    #[error("Dependency {blocked} -> {blocking} would create a cycle")]
    DependencyCycle {
        /// Battle that would wait.
        blocked: BattleId,
        /// Battle it would wait on.
        blocking: BattleId,
    },

    /// Unit id unknown to the game state.
    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),

    /// Unit type id unknown to the game state.
    #[error("Unknown unit type: {0}")]
    UnknownUnitType(UnitTypeId),

    /// Territory id unknown to the game state.
    #[error("Unknown territory: {0}")]
    UnknownTerritory(TerritoryId),

    /// Player id unknown to the game state.
    #[error("Unknown player: {0}")]
    UnknownPlayer(PlayerId),

    /// Battle id is not pending.
    #[error("Unknown battle: {0}")]
    UnknownBattle(BattleId),

    /// A battle was asked to fight while still blocked.
    #[error("Battle {battle} is blocked by {blocking:?}")]
    BattleBlocked {
        /// The blocked battle.
        battle: BattleId,
        /// Battles it still waits on.
        blocking: Vec<BattleId>,
    },

    /// A territory with targets was taken over while its raid was pending.
    #[error("Bombing raid still pending in {0} during take over")]
    BombingRaidPending(TerritoryId),

    /// A random source returned a value outside the die.
    #[error("Die value {value} out of range for a d{sides}")]
    InvalidDieValue {
        /// The offending value.
        value: u32,
        /// Sides requested.
        sides: u32,
    },

    /// Scripted randomness ran dry.
    #[error("Random source exhausted while drawing for '{0}'")]
    RandomExhausted(String),

    /// Any other broken internal expectation.
    #[error("{0}")]
    IllegalState(String),
}

/// Recoverable, player-facing refusals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleRejection {
    /// The oracle kept returning unusable casualty selections.
    #[error("{player} gave an inconsistent casualty selection {attempts} times: {reason}")]
    InconsistentCasualties {
        /// The selecting player.
        player: PlayerId,
        /// Attempts made.
        attempts: u32,
        /// Last problem reported.
        reason: String,
    },

    /// A paid action could not be afforded.
    #[error("{player} needs {required} PUs but has {available}")]
    InsufficientFunds {
        /// The paying player.
        player: PlayerId,
        /// PUs required.
        required: i32,
        /// PUs available.
        available: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let fatal: CombatError = ConsistencyViolation::CasualtyCountMismatch {
            expected: 2,
            actual: 1,
        }
        .into();
        assert!(fatal.is_fatal());

        let soft: CombatError = RuleRejection::InsufficientFunds {
            player: PlayerId(1),
            required: 3,
            available: 1,
        }
        .into();
        assert!(!soft.is_fatal());
    }

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = CombatError::from(ConsistencyViolation::AaGroupMismatch {
            total: 5,
            normal: 2,
            infinite: 2,
            overstack: 0,
        });
        let text = err.to_string();
        assert!(text.contains("total 5"));
        assert!(text.contains("overstack 0"));
    }
}
