use serde::{Deserialize, Serialize};

use crate::game::UnitId;

/// Units to kill and units to damage.
///
/// A unit appears in `damaged` once per hit it absorbs without dying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CasualtyDetails {
    /// Units removed.
    pub killed: Vec<UnitId>,
    /// Units taking a hit, repeated per hit.
    pub damaged: Vec<UnitId>,
    /// Chosen by the engine rather than the player.
    pub auto_calculated: bool,
}

impl CasualtyDetails {
    /// Nothing selected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Player-chosen selection that only kills.
    #[must_use]
    pub fn killing(killed: Vec<UnitId>) -> Self {
        Self {
            killed,
            ..Self::default()
        }
    }

    /// Engine-chosen selection.
    #[must_use]
    pub fn automatic(killed: Vec<UnitId>, damaged: Vec<UnitId>) -> Self {
        Self {
            killed,
            damaged,
            auto_calculated: true,
        }
    }

    /// Kill `unit`.
    pub fn add_killed(&mut self, unit: UnitId) {
        self.killed.push(unit);
    }

    /// Damage `unit` once.
    pub fn add_damaged(&mut self, unit: UnitId) {
        self.damaged.push(unit);
    }

    /// Times `unit` is listed as damaged.
    #[must_use]
    pub fn damage_to(&self, unit: UnitId) -> usize {
        self.damaged.iter().filter(|u| **u == unit).count()
    }

    /// Killed plus damage entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.killed.len() + self.damaged.len()
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.killed.is_empty() && self.damaged.is_empty()
    }
}
