//! Players, their treasuries, and diplomatic relationships.

use serde::{Deserialize, Serialize};

use super::ids::PlayerId;

/// Diplomatic stance between two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Relationship {
    /// Fight together; share territory.
    Allied,
    /// May attack each other.
    #[default]
    War,
    /// Neither allied nor at war.
    Neutral,
}

/// Resources tracked per player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// Production units.
    Pus,
    /// Research tokens.
    TechTokens,
    /// Victory points gained from captured PUs.
    CaptureVps,
}

/// A player (nation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    /// Unique identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Production units in the treasury.
    pub pus: i32,
    /// Research tokens.
    pub tech_tokens: i32,
    /// Victory points from captured PUs.
    pub capture_vps: i32,
    /// Capitals that must stay in hand for the treasury to survive a capital loss.
    pub retain_capital_number: u32,
    /// Captured PUs are destroyed instead of transferred.
    pub destroys_pus: bool,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            id: PlayerId::default(),
            name: String::new(),
            pus: 0,
            tech_tokens: 0,
            capture_vps: 0,
            retain_capital_number: 1,
            destroys_pus: false,
        }
    }
}

impl Player {
    /// New player with an empty treasury.
    #[must_use]
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the treasury.
    #[must_use]
    pub fn with_pus(mut self, pus: i32) -> Self {
        self.pus = pus;
        self
    }

    /// Amount held of `resource`.
    #[must_use]
    pub const fn resource(&self, resource: Resource) -> i32 {
        match resource {
            Resource::Pus => self.pus,
            Resource::TechTokens => self.tech_tokens,
            Resource::CaptureVps => self.capture_vps,
        }
    }

    pub(crate) fn resource_mut(&mut self, resource: Resource) -> &mut i32 {
        match resource {
            Resource::Pus => &mut self.pus,
            Resource::TechTokens => &mut self.tech_tokens,
            Resource::CaptureVps => &mut self.capture_vps,
        }
    }
}
