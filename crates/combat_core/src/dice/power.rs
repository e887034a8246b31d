//! Per-unit strength and roll counts for normal combat.
//!
//! Strength starts from the unit type, picks up the marine, bombard,
//! support and terrain modifiers, and is clamped to the die. Rolls start
//! from the type and pick up roll support. Either reaching zero zeroes
//! both, so a unit contributes nothing rather than rolling at strength 0.

use std::collections::BTreeMap;

use crate::game::{CombatUnit, Domain, Territory, UnitId};
use crate::rules::BattleRules;
use crate::support::{AvailableSupport, SupportFaction, SupportGiven, SupportKind, SupportRule};

/// Everything a power computation reads besides the units themselves.
#[derive(Debug, Clone, Copy)]
pub struct RollContext<'a> {
    /// Ruleset switches.
    pub rules: &'a BattleRules,
    /// Support rules in play.
    pub support_rules: &'a [SupportRule],
    /// Battle site, for terrain bonuses.
    pub territory: &'a Territory,
    /// Whether the rolling side defends.
    pub defending: bool,
    /// Units on the rolling side, alive or waiting to die.
    pub friendly: &'a [CombatUnit<'a>],
    /// Units on the other side, alive or waiting to die.
    pub enemy: &'a [CombatUnit<'a>],
}

impl<'a> RollContext<'a> {
    /// Context without support or surrounding units.
    #[must_use]
    pub fn new(rules: &'a BattleRules, territory: &'a Territory, defending: bool) -> Self {
        Self {
            rules,
            support_rules: &[],
            territory,
            defending,
            friendly: &[],
            enemy: &[],
        }
    }

    /// Use `support_rules` with the given sides.
    #[must_use]
    pub fn with_support(
        mut self,
        support_rules: &'a [SupportRule],
        friendly: &'a [CombatUnit<'a>],
        enemy: &'a [CombatUnit<'a>],
    ) -> Self {
        self.support_rules = support_rules;
        self.friendly = friendly;
        self.enemy = enemy;
        self
    }

    /// Same battle seen from the other side.
    #[must_use]
    pub fn opposite(&self) -> Self {
        Self {
            defending: !self.defending,
            friendly: self.enemy,
            enemy: self.friendly,
            ..*self
        }
    }

    /// Same side, but with no support of any kind.
    #[must_use]
    pub fn unsupported(&self) -> Self {
        Self {
            support_rules: &[],
            friendly: &[],
            enemy: &[],
            ..*self
        }
    }

    /// Sides of the game die as a signed value.
    #[must_use]
    pub fn sides(&self) -> i32 {
        i32::try_from(self.rules.dice_sides).unwrap_or(i32::MAX)
    }
}

/// Strength and roll count of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerAndRolls {
    /// Hit when a die shows less than this.
    pub strength: i32,
    /// Dice rolled.
    pub rolls: i32,
    /// Keeps only the best of its dice.
    pub choose_best: bool,
}

impl PowerAndRolls {
    /// Power this entry contributes to a side total.
    ///
    /// Best-of-n units add `extra_roll_bonus` per extra die instead of a
    /// full strength, capped at the die.
    #[must_use]
    pub fn total_power(&self, rules: &BattleRules) -> u32 {
        let sides = i32::try_from(rules.dice_sides).unwrap_or(i32::MAX);
        let strength = self.strength.clamp(0, sides);
        if strength <= 0 || self.rolls <= 0 {
            return 0;
        }
        let power = if self.rolls == 1 {
            strength
        } else if self.choose_best {
            let bonus = i32::try_from(rules.extra_roll_bonus()).unwrap_or(1);
            (strength + bonus * (self.rolls - 1)).min(sides)
        } else {
            self.rolls * strength
        };
        u32::try_from(power).unwrap_or(0)
    }

    /// Rolls as an unsigned count.
    #[must_use]
    pub fn roll_count(&self) -> u32 {
        u32::try_from(self.rolls).unwrap_or(0)
    }

    /// Strength as an unsigned value.
    #[must_use]
    pub fn rolled_at(&self) -> u32 {
        u32::try_from(self.strength).unwrap_or(0)
    }
}

/// Summed power and rolls of a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TotalPower {
    /// Sum of [`PowerAndRolls::total_power`].
    pub power: u32,
    /// Dice the side rolls.
    pub rolls: u32,
}

/// Power of every unit on a side, in evaluation order, with the support
/// that was handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PowerMap {
    order: Vec<UnitId>,
    entries: BTreeMap<UnitId, PowerAndRolls>,
    strength_support: SupportGiven,
    roll_support: SupportGiven,
}

impl PowerMap {
    /// Entry for a unit.
    #[must_use]
    pub fn get(&self, unit: UnitId) -> Option<PowerAndRolls> {
        self.entries.get(&unit).copied()
    }

    /// Insert or replace an entry; new units go to the end.
    pub fn set(&mut self, unit: UnitId, power: PowerAndRolls) {
        if self.entries.insert(unit, power).is_none() {
            self.order.push(unit);
        }
    }

    /// Drop a unit and everything it supported.
    pub fn remove(&mut self, unit: UnitId) -> Option<PowerAndRolls> {
        let removed = self.entries.remove(&unit);
        if removed.is_some() {
            self.order.retain(|u| *u != unit);
        }
        self.strength_support.remove_supporter(unit);
        self.roll_support.remove_supporter(unit);
        removed
    }

    /// Entries in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, PowerAndRolls)> + '_ {
        self.order
            .iter()
            .filter_map(|u| self.entries.get(u).map(|p| (*u, *p)))
    }

    /// Number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no unit has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Strength support handed out, friendly and enemy.
    #[must_use]
    pub fn strength_support(&self) -> &SupportGiven {
        &self.strength_support
    }

    /// Roll support handed out, friendly and enemy.
    #[must_use]
    pub fn roll_support(&self) -> &SupportGiven {
        &self.roll_support
    }

    /// Side total.
    #[must_use]
    pub fn total(&self, rules: &BattleRules) -> TotalPower {
        total_power_and_rolls(self.entries.values(), rules)
    }
}

/// Sum the power and the dice of a set of entries.
///
/// Entries with no strength or no rolls add neither.
pub fn total_power_and_rolls<'a>(
    entries: impl IntoIterator<Item = &'a PowerAndRolls>,
    rules: &BattleRules,
) -> TotalPower {
    entries
        .into_iter()
        .filter(|e| e.strength > 0 && e.rolls > 0)
        .fold(TotalPower::default(), |acc, e| TotalPower {
            power: acc.power + e.total_power(rules),
            rolls: acc.rolls + e.roll_count(),
        })
}

fn base_strength(unit: &CombatUnit<'_>, ctx: &RollContext<'_>) -> i32 {
    let kind = unit.kind;
    if ctx.defending {
        return kind.defense;
    }
    let mut strength = kind.attack;
    if unit.unit.was_amphibious {
        strength += kind.marine_bonus;
    }
    if kind.domain == Domain::Sea && !ctx.territory.is_water {
        strength = kind.bombard.unwrap_or(kind.attack);
    }
    strength
}

fn choose_best(unit: &CombatUnit<'_>, rules: &BattleRules) -> bool {
    unit.kind.choose_best_roll || rules.lhtr_heavy_bombers
}

/// Strength and rolls of every unit in `units`, granting support in the
/// order given.
///
/// Friendly support comes from `ctx.friendly` on the rolling side; enemy
/// support comes from `ctx.enemy` on the opposite side. Pass units
/// strongest first when support should favour the best recipients.
#[must_use]
pub fn unit_power_and_rolls(units: &[CombatUnit<'_>], ctx: &RollContext<'_>) -> PowerMap {
    let mut map = PowerMap::default();
    if units.is_empty() {
        return map;
    }
    let defending = ctx.defending;
    let tracker = |supporters: &[CombatUnit<'_>], side: bool, faction, kind| {
        AvailableSupport::new(ctx.support_rules, supporters, side, faction, kind)
    };
    let mut friendly_strength =
        tracker(ctx.friendly, defending, SupportFaction::Allied, SupportKind::Strength);
    let mut enemy_strength = tracker(ctx.enemy, !defending, SupportFaction::Enemy, SupportKind::Strength);
    let mut friendly_rolls = tracker(ctx.friendly, defending, SupportFaction::Allied, SupportKind::Rolls);
    let mut enemy_rolls = tracker(ctx.enemy, !defending, SupportFaction::Enemy, SupportKind::Rolls);
    let sides = ctx.sides();

    for unit in units {
        let mut strength = base_strength(unit, ctx);
        strength += friendly_strength.support_for(unit, &mut map.strength_support);
        strength += enemy_strength.support_for(unit, &mut map.strength_support);
        strength += ctx.territory.terrain_bonus(unit.type_id(), defending);
        strength = strength.clamp(0, sides);

        let mut rolls = 0;
        if strength > 0 {
            rolls = i32::try_from(unit.kind.rolls(defending)).unwrap_or(i32::MAX);
            rolls += friendly_rolls.support_for(unit, &mut map.roll_support);
            rolls += enemy_rolls.support_for(unit, &mut map.roll_support);
            rolls = rolls.max(0);
            if rolls == 0 {
                strength = 0;
            }
        }
        map.set(
            unit.id(),
            PowerAndRolls {
                strength,
                rolls,
                choose_best: choose_best(unit, ctx.rules),
            },
        );
    }
    map
}

/// Strength and rolls in an air battle: air attack or air defense, no
/// support and no terrain.
#[must_use]
pub fn air_battle_power_and_rolls(units: &[CombatUnit<'_>], ctx: &RollContext<'_>) -> PowerMap {
    let mut map = PowerMap::default();
    let sides = ctx.sides();
    for unit in units {
        let raw = if ctx.defending {
            unit.kind.air_defense
        } else {
            unit.kind.air_attack
        };
        let strength = raw.clamp(0, sides);
        let rolls = if strength > 0 {
            i32::try_from(unit.kind.rolls(ctx.defending)).unwrap_or(i32::MAX)
        } else {
            0
        };
        map.set(
            unit.id(),
            PowerAndRolls {
                strength: if rolls > 0 { strength } else { 0 },
                rolls,
                choose_best: choose_best(unit, ctx.rules),
            },
        );
    }
    map
}

/// Power of a single unit with no support, used to rank casualties.
#[must_use]
pub fn unit_power_for_sorting(unit: &CombatUnit<'_>, ctx: &RollContext<'_>) -> u32 {
    let bare = ctx.unsupported();
    unit_power_and_rolls(std::slice::from_ref(unit), &bare)
        .get(unit.id())
        .map_or(0, |p| p.total_power(ctx.rules))
}
