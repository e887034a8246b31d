//! Territories and sea zones.

use serde::{Deserialize, Serialize};

use super::ids::{PlayerId, TerritoryId, UnitId, UnitTypeId};

/// Terrain modifier applied to listed unit types fighting in the territory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TerrainBonus {
    /// Affected types. Empty means every type.
    pub unit_types: Vec<UnitTypeId>,
    /// Bonus while attacking.
    pub attack: i32,
    /// Bonus while defending.
    pub defense: i32,
}

/// Redirects ownership when `capturing` takes the territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRedirect {
    /// Player performing the capture.
    pub capturing: PlayerId,
    /// Player that receives the territory instead.
    pub receiving: PlayerId,
}

/// A land territory or sea zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Territory {
    /// Unique identifier.
    pub id: TerritoryId,
    /// Display name.
    pub name: String,
    /// Sea zone rather than land.
    pub is_water: bool,
    /// Current owner; `None` for neutral or unowned.
    pub owner: Option<PlayerId>,
    /// Owner at game start.
    pub original_owner: Option<PlayerId>,
    /// Player whose capital this is.
    pub capital_of: Option<PlayerId>,
    /// PU production.
    pub production: u32,
    /// Sea zone carrying a convoy route.
    pub convoy_route: bool,
    /// Territories whose income depends on this convoy route.
    pub convoy_attached: Vec<TerritoryId>,
    /// Terrain modifiers.
    pub terrain: Vec<TerrainBonus>,
    /// Ownership redirects on capture.
    pub capture_redirects: Vec<CaptureRedirect>,
    /// Maintained by the game state; ignored on input.
    pub(crate) units: Vec<UnitId>,
}

impl Territory {
    /// Land territory owned by `owner` since game start.
    #[must_use]
    pub fn land(id: TerritoryId, name: impl Into<String>, owner: Option<PlayerId>) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            original_owner: owner,
            ..Self::default()
        }
    }

    /// Sea zone.
    #[must_use]
    pub fn sea(id: TerritoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_water: true,
            ..Self::default()
        }
    }

    /// Mark as the capital of `player`.
    #[must_use]
    pub fn with_capital(mut self, player: PlayerId) -> Self {
        self.capital_of = Some(player);
        self
    }

    /// Set PU production.
    #[must_use]
    pub fn with_production(mut self, production: u32) -> Self {
        self.production = production;
        self
    }

    /// Units currently in the territory, in arrival order.
    #[must_use]
    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    /// Summed terrain bonus for a unit type on one side.
    #[must_use]
    pub fn terrain_bonus(&self, unit_type: UnitTypeId, defending: bool) -> i32 {
        self.terrain
            .iter()
            .filter(|b| b.unit_types.is_empty() || b.unit_types.contains(&unit_type))
            .map(|b| if defending { b.defense } else { b.attack })
            .sum()
    }

    /// Where ownership goes when `capturing` takes the territory.
    #[must_use]
    pub fn capture_receiver(&self, capturing: PlayerId) -> PlayerId {
        self.capture_redirects
            .iter()
            .find(|r| r.capturing == capturing)
            .map_or(capturing, |r| r.receiving)
    }
}
