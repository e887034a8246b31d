//! A complete battle scenario: ruleset, unit types, players and board.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CombatError, Result};
use crate::game::{
    GameState, Player, PlayerId, Relationship, Territory, TerritoryId, UnitType, UnitTypeId,
};
use crate::rules::BattleRules;
use crate::support::SupportRule;

/// Scenario definition.
///
/// # Example RON
///
/// ```ron
/// ScenarioData(
///     name: "Eastern front",
///     rules: (low_luck: true),
///     unit_types: [(id: 1, name: "infantry", domain: Land, attack: 1, defense: 2)],
///     players: [(id: 1, name: "Germans", pus: 40), (id: 2, name: "Russians", pus: 24)],
///     relationships: [(a: 1, b: 2, relationship: War)],
///     territories: [(id: 1, name: "Poland", owner: Some(1))],
///     placements: [(territory: 1, unit_type: 1, owner: 1, count: 3)],
/// )
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioData {
    /// Display name.
    pub name: String,

    /// Ruleset; missing flags keep their defaults.
    #[serde(default)]
    pub rules: BattleRules,

    /// Every unit type on the board.
    pub unit_types: Vec<UnitType>,

    /// Support attachments.
    #[serde(default)]
    pub support_rules: Vec<SupportRule>,

    /// Every player.
    pub players: Vec<Player>,

    /// Explicit relationships. Unlisted pairs are at war.
    #[serde(default)]
    pub relationships: Vec<RelationshipData>,

    /// Land territories and sea zones.
    pub territories: Vec<Territory>,

    /// Starting units.
    #[serde(default)]
    pub placements: Vec<Placement>,
}

/// Stance between two players.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelationshipData {
    /// First player.
    pub a: PlayerId,
    /// Second player.
    pub b: PlayerId,
    /// Their stance, both ways.
    pub relationship: Relationship,
}

/// Units of one type placed at game start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Placement {
    /// Where the units start.
    pub territory: TerritoryId,
    /// Their type.
    pub unit_type: UnitTypeId,
    /// Their owner.
    pub owner: PlayerId,
    /// How many.
    #[serde(default = "default_count")]
    pub count: u32,
}

const fn default_count() -> u32 {
    1
}

impl ScenarioData {
    /// Parse a scenario from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| CombatError::Data {
            source_name: "scenario".to_string(),
            message: e.to_string(),
        })
    }

    /// Encode as pretty RON.
    pub fn to_ron_string(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| CombatError::serialization("scenario", e))
    }

    /// Find a unit type by id.
    #[must_use]
    pub fn get_unit_type(&self, id: UnitTypeId) -> Option<&UnitType> {
        self.unit_types.iter().find(|u| u.id == id)
    }

    /// Find a player by id.
    #[must_use]
    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Find a territory by id.
    #[must_use]
    pub fn get_territory(&self, id: TerritoryId) -> Option<&Territory> {
        self.territories.iter().find(|t| t.id == id)
    }

    /// Validate internal consistency of the scenario.
    ///
    /// Checks for:
    /// - Duplicate ids
    /// - References to unknown types, players and territories
    /// - AA dice that cannot be encoded
    /// - Rule problems reported by [`BattleRules::validate`]
    ///
    /// Returns a list of validation errors.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.rules.validate();

        let mut seen = BTreeSet::new();
        for kind in &self.unit_types {
            if !seen.insert(kind.id) {
                errors.push(format!("Duplicate unit type {}", kind.id));
            }
            if let Some(aa) = &kind.aa {
                if let Some(sides) = aa.die_sides {
                    if sides == 0 || sides > 255 {
                        errors.push(format!(
                            "Unit type '{}' has AA die sides {sides}; must be 1..=255",
                            kind.name
                        ));
                    }
                }
                if aa.targets.is_empty() {
                    errors.push(format!("AA unit type '{}' targets nothing", kind.name));
                }
            }
        }

        let mut seen = BTreeSet::new();
        for player in &self.players {
            if !seen.insert(player.id) {
                errors.push(format!("Duplicate player {}", player.id));
            }
        }

        let mut seen = BTreeSet::new();
        for t in &self.territories {
            if !seen.insert(t.id) {
                errors.push(format!("Duplicate territory {}", t.id));
            }
            for p in [t.owner, t.capital_of].into_iter().flatten() {
                if self.get_player(p).is_none() {
                    errors.push(format!("Territory '{}' references unknown {p}", t.name));
                }
            }
            if t.is_water && t.capital_of.is_some() {
                errors.push(format!("Sea zone '{}' cannot be a capital", t.name));
            }
        }

        for rule in &self.support_rules {
            for id in std::iter::once(&rule.supporter).chain(&rule.recipients) {
                if self.get_unit_type(*id).is_none() {
                    errors.push(format!(
                        "Support rule '{}' references unknown {id}",
                        rule.name
                    ));
                }
            }
        }

        for rel in &self.relationships {
            for p in [rel.a, rel.b] {
                if self.get_player(p).is_none() {
                    errors.push(format!("Relationship references unknown {p}"));
                }
            }
            if rel.a == rel.b {
                errors.push(format!("{} cannot have a relationship with itself", rel.a));
            }
        }

        for placement in &self.placements {
            if self.get_territory(placement.territory).is_none() {
                errors.push(format!("Placement in unknown {}", placement.territory));
            }
            if self.get_unit_type(placement.unit_type).is_none() {
                errors.push(format!("Placement of unknown {}", placement.unit_type));
            }
            if self.get_player(placement.owner).is_none() {
                errors.push(format!("Placement owned by unknown {}", placement.owner));
            }
        }

        errors
    }

    /// Validate and build the board. Unit ids are assigned in placement order.
    pub fn into_state(self) -> Result<(GameState, BattleRules)> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(CombatError::Data {
                source_name: format!("scenario '{}'", self.name),
                message: errors.join("; "),
            });
        }

        let mut b = GameState::builder();
        for kind in self.unit_types {
            b.unit_type(kind);
        }
        for rule in self.support_rules {
            b.support_rule(rule);
        }
        for player in self.players {
            b.player(player);
        }
        for rel in self.relationships {
            b.relationship(rel.a, rel.b, rel.relationship);
        }
        for territory in self.territories {
            b.territory(territory);
        }
        for p in self.placements {
            b.place(p.territory, p.unit_type, p.owner, p.count);
        }
        let state = b.build()?;
        tracing::info!(
            scenario = %self.name,
            hash = state.state_hash(),
            "scenario loaded"
        );
        Ok((state, self.rules))
    }
}
