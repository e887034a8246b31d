//! Battle identifiers and classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential battle identifier, unique for the lifetime of a tracker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BattleId(pub u64);

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "battle#{}", self.0)
    }
}

/// What kind of fight happens at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BattleType {
    /// Land or sea combat until one side is gone.
    Normal,
    /// Strategic bombers damage infrastructure.
    BombingRaid,
    /// Interceptors fight bombers before a raid.
    AirRaid,
    /// Air units fight before a normal battle.
    AirBattle,
    /// Territory taken without a fight; nothing left to resolve.
    Finished,
    /// Territory entered without enemies but behind another battle.
    NonFighting,
}

impl BattleType {
    /// Whether this battle belongs to the bombing slot of its territory.
    #[must_use]
    pub const fn is_bombing_run(self) -> bool {
        matches!(self, Self::BombingRaid | Self::AirRaid)
    }

    /// Whether this battle occupies the ground slot of its territory.
    #[must_use]
    pub const fn is_ground(self) -> bool {
        matches!(self, Self::Normal | Self::Finished | Self::NonFighting)
    }

    /// Fight-order phase: air raids, bombing raids, air battles, then the rest.
    #[must_use]
    pub const fn phase(self) -> u8 {
        match self {
            Self::AirRaid => 0,
            Self::BombingRaid => 1,
            Self::AirBattle => 2,
            Self::Normal | Self::Finished | Self::NonFighting => 3,
        }
    }

    /// Whether `self` satisfies a lookup for `wanted`.
    ///
    /// A `Normal` lookup also finds finished and non-fighting battles, since
    /// they share the ground slot.
    #[must_use]
    pub fn matches(self, wanted: Self) -> bool {
        if wanted == Self::Normal {
            self.is_ground()
        } else {
            self == wanted
        }
    }
}

impl fmt::Display for BattleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "Battle",
            Self::BombingRaid => "Bombing Raid",
            Self::AirRaid => "Air Raid",
            Self::AirBattle => "Air Battle",
            Self::Finished => "Conquest",
            Self::NonFighting => "Non-fighting Battle",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a battle: `Created -> Pending -> Fought | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BattleStatus {
    /// Constructed but not yet registered.
    Created,
    /// Waiting to be fought.
    Pending,
    /// Resolved and removed.
    Fought,
    /// Dropped without resolution.
    Cancelled,
}

/// How a battle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BattleOutcome {
    /// Attacker won and took the territory.
    Conquered,
    /// Attacker destroyed the defence but could not take the territory.
    AttackerWon,
    /// Attacker was destroyed or withdrew.
    DefenderWon,
    /// Round limit reached, or both sides destroyed.
    Draw,
    /// Nothing to fight.
    NoCombat,
}
