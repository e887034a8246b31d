//! Unit types, unit instances, and the borrowed combat view over both.

use serde::{Deserialize, Serialize};

use super::ids::{PlayerId, UnitId, UnitTypeId};

/// Where a unit moves and fights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Domain {
    /// Ground forces.
    #[default]
    Land,
    /// Naval forces.
    Sea,
    /// Aircraft.
    Air,
}

/// Anti-aircraft capabilities of a unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AaStats {
    /// Strength when the AA unit is defending.
    pub attack_aa: i32,
    /// Strength when the AA unit is attacking.
    pub offensive_attack_aa: i32,
    /// Shots per firing; `None` means unlimited.
    pub max_attacks: Option<u32>,
    /// Fires in addition to the target-capped groups.
    pub may_overstack: bool,
    /// Overrides the game's dice sides when set.
    pub die_sides: Option<u32>,
    /// Firing category, e.g. `"AA"`. Each category fires separately.
    pub type_aa: String,
    /// Domains this gun may shoot at.
    pub targets: Vec<Domain>,
    /// Hits damage multi-hitpoint targets instead of killing them outright.
    pub damages_instead_of_killing: bool,
    /// Fires at aircraft flying over during movement.
    pub fires_in_move: bool,
}

impl Default for AaStats {
    fn default() -> Self {
        Self {
            attack_aa: 1,
            offensive_attack_aa: 0,
            max_attacks: Some(1),
            may_overstack: false,
            die_sides: None,
            type_aa: "AA".to_string(),
            targets: vec![Domain::Air],
            damages_instead_of_killing: false,
            fires_in_move: true,
        }
    }
}

impl AaStats {
    /// Gun with a capped number of shots per target pool.
    #[must_use]
    pub fn limited(attack_aa: i32, max_attacks: u32) -> Self {
        Self {
            attack_aa,
            max_attacks: Some(max_attacks),
            ..Self::default()
        }
    }

    /// Gun that fires at every valid target.
    #[must_use]
    pub fn infinite(attack_aa: i32) -> Self {
        Self {
            attack_aa,
            max_attacks: None,
            ..Self::default()
        }
    }

    /// Mark the gun as firing beyond the target cap.
    #[must_use]
    pub fn overstacking(mut self) -> Self {
        self.may_overstack = true;
        self
    }

    /// Strength on the given side.
    #[must_use]
    pub const fn strength(&self, defending: bool) -> i32 {
        if defending {
            self.attack_aa
        } else {
            self.offensive_attack_aa
        }
    }

    /// Whether a unit of `domain` is a legal target.
    #[must_use]
    pub fn targets_domain(&self, domain: Domain) -> bool {
        self.targets.contains(&domain)
    }
}

/// Static definition of a unit type.
///
/// Loaded from scenario data; shared by every unit instance of the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitType {
    /// Unique identifier.
    pub id: UnitTypeId,
    /// Display name; also the final tie-breaker in casualty ordering.
    pub name: String,
    /// Where the unit fights.
    pub domain: Domain,
    /// Attack strength.
    pub attack: i32,
    /// Defense strength.
    pub defense: i32,
    /// Dice rolled when attacking.
    pub attack_rolls: u32,
    /// Dice rolled when defending.
    pub defense_rolls: u32,
    /// Strength in air battles when attacking.
    pub air_attack: i32,
    /// Strength in air battles when defending.
    pub air_defense: i32,
    /// Hits needed to kill the unit.
    pub hit_points: u32,
    /// Production cost, used to rank casualties.
    pub cost: u32,
    /// Movement allowance, used to rank casualties.
    pub movement: u32,
    /// Attack bonus when landing amphibiously.
    pub marine_bonus: i32,
    /// Strength when a sea unit bombards a land battle.
    pub bombard: Option<i32>,
    /// Rolls several dice but keeps only the best one.
    pub choose_best_roll: bool,
    /// Factories, airfields and the like: captured rather than fought.
    pub is_infrastructure: bool,
    /// Carries land units; does not control sea zones by itself.
    pub is_transport: bool,
    /// May perform bombing runs.
    pub is_strategic_bomber: bool,
    /// Can be a target of bombing raids.
    pub can_be_damaged: bool,
    /// Cap on bombing damage; zero means uncapped.
    pub max_damage: u32,
    /// Dies after attacking.
    pub is_suicide: bool,
    /// May move through empty enemy territory in one move.
    pub can_blitz: bool,
    /// Removed instead of captured when its territory falls.
    pub destroyed_when_captured: bool,
    /// Damage applied when captured.
    pub when_captured_sustains_damage: u32,
    /// Anti-aircraft capabilities, if any.
    pub aa: Option<AaStats>,
}

impl Default for UnitType {
    fn default() -> Self {
        Self {
            id: UnitTypeId::default(),
            name: String::new(),
            domain: Domain::Land,
            attack: 0,
            defense: 0,
            attack_rolls: 1,
            defense_rolls: 1,
            air_attack: 0,
            air_defense: 0,
            hit_points: 1,
            cost: 0,
            movement: 1,
            marine_bonus: 0,
            bombard: None,
            choose_best_roll: false,
            is_infrastructure: false,
            is_transport: false,
            is_strategic_bomber: false,
            can_be_damaged: false,
            max_damage: 0,
            is_suicide: false,
            can_blitz: false,
            destroyed_when_captured: false,
            when_captured_sustains_damage: 0,
            aa: None,
        }
    }
}

impl UnitType {
    /// New type with one roll, one hitpoint, and no strength.
    #[must_use]
    pub fn new(id: UnitTypeId, name: impl Into<String>, domain: Domain) -> Self {
        Self {
            id,
            name: name.into(),
            domain,
            ..Self::default()
        }
    }

    /// Set attack and defense strength.
    #[must_use]
    pub fn with_combat(mut self, attack: i32, defense: i32) -> Self {
        self.attack = attack;
        self.defense = defense;
        self
    }

    /// Set attack and defense roll counts.
    #[must_use]
    pub fn with_rolls(mut self, attack_rolls: u32, defense_rolls: u32) -> Self {
        self.attack_rolls = attack_rolls;
        self.defense_rolls = defense_rolls;
        self
    }

    /// Set the hit points.
    #[must_use]
    pub fn with_hit_points(mut self, hit_points: u32) -> Self {
        self.hit_points = hit_points;
        self
    }

    /// Set cost and movement.
    #[must_use]
    pub fn with_cost(mut self, cost: u32, movement: u32) -> Self {
        self.cost = cost;
        self.movement = movement;
        self
    }

    /// Set air battle strengths.
    #[must_use]
    pub fn with_air_combat(mut self, air_attack: i32, air_defense: i32) -> Self {
        self.air_attack = air_attack;
        self.air_defense = air_defense;
        self
    }

    /// Attach anti-aircraft capabilities.
    #[must_use]
    pub fn with_aa(mut self, aa: AaStats) -> Self {
        self.aa = Some(aa);
        self
    }

    /// Base strength on the given side, before bonuses.
    #[must_use]
    pub const fn strength(&self, defending: bool) -> i32 {
        if defending {
            self.defense
        } else {
            self.attack
        }
    }

    /// Base roll count on the given side, before support.
    #[must_use]
    pub const fn rolls(&self, defending: bool) -> u32 {
        if defending {
            self.defense_rolls
        } else {
            self.attack_rolls
        }
    }

    /// Whether the type has AA capabilities.
    #[must_use]
    pub const fn is_aa(&self) -> bool {
        self.aa.is_some()
    }
}

/// A unit instance on the board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    /// Unique identifier.
    pub id: UnitId,
    /// Type of the unit.
    pub unit_type: UnitTypeId,
    /// Current owner.
    pub owner: PlayerId,
    /// Hits taken so far.
    pub hits: u32,
    /// Landed from the sea this turn.
    pub was_amphibious: bool,
    /// Took part in a battle this turn.
    pub was_in_combat: bool,
    /// Disabled units are destroyed when their territory falls.
    pub disabled: bool,
    /// Bombing damage carried by infrastructure.
    pub bombing_damage: u32,
}

impl Unit {
    /// Fresh, undamaged unit.
    #[must_use]
    pub const fn new(id: UnitId, unit_type: UnitTypeId, owner: PlayerId) -> Self {
        Self {
            id,
            unit_type,
            owner,
            hits: 0,
            was_amphibious: false,
            was_in_combat: false,
            disabled: false,
            bombing_damage: 0,
        }
    }
}

/// Read-only pairing of a unit with its type, handed to combat algorithms.
#[derive(Debug, Clone, Copy)]
pub struct CombatUnit<'a> {
    /// The unit instance.
    pub unit: &'a Unit,
    /// Its type definition.
    pub kind: &'a UnitType,
}

impl<'a> CombatUnit<'a> {
    /// Pair a unit with its type.
    #[must_use]
    pub const fn new(unit: &'a Unit, kind: &'a UnitType) -> Self {
        Self { unit, kind }
    }

    /// Unit id.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.unit.id
    }

    /// Unit type id.
    #[must_use]
    pub const fn type_id(&self) -> UnitTypeId {
        self.kind.id
    }

    /// Current owner.
    #[must_use]
    pub const fn owner(&self) -> PlayerId {
        self.unit.owner
    }

    /// Hitpoints remaining before the unit dies.
    #[must_use]
    pub const fn hit_points_left(&self) -> u32 {
        self.kind.hit_points.saturating_sub(self.unit.hits)
    }

    /// Domain of the unit type.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.kind.domain
    }

    /// Whether the unit flies.
    #[must_use]
    pub fn is_air(&self) -> bool {
        self.kind.domain == Domain::Air
    }

    /// Whether the unit fights on land.
    #[must_use]
    pub fn is_land(&self) -> bool {
        self.kind.domain == Domain::Land
    }

    /// Whether the unit fights at sea.
    #[must_use]
    pub fn is_sea(&self) -> bool {
        self.kind.domain == Domain::Sea
    }

    /// AA stats, if any.
    #[must_use]
    pub const fn aa(&self) -> Option<&'a AaStats> {
        self.kind.aa.as_ref()
    }

    /// Same type, owner and damage: interchangeable as casualties.
    #[must_use]
    pub fn same_category(&self, other: &CombatUnit<'_>) -> bool {
        self.kind.id == other.kind.id
            && self.unit.owner == other.unit.owner
            && self.unit.hits == other.unit.hits
    }
}

/// Total hitpoints left across a set of units.
#[must_use]
pub fn total_hit_points(units: &[CombatUnit<'_>]) -> u32 {
    units.iter().map(CombatUnit::hit_points_left).sum()
}
