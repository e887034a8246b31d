//! Support rules: combat bonuses granted by one unit type to others.
//!
//! A [`SupportRule`] is static ruleset data. An [`AvailableSupport`] is built
//! fresh for every power computation from the units actually present; it
//! owns the remaining-use counters and hands bonuses out one recipient at a
//! time, so a supporter's capacity is granted at most once per pass.
//!
//! Rules sharing a `bonus_type` do not stack: a recipient receives at most
//! one rule per bucket. Within a bucket the first rule in this order that
//! still has capacity wins:
//!
//! 1. roll-bonus rules before strength-bonus rules
//! 2. larger bonus first (for negative enemy bonuses that is least-negative first)
//! 3. rules covering fewer recipient types first
//! 4. supporting types with more raw power first
//! 5. rule name

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::game::{CombatUnit, PlayerId, UnitId, UnitTypeId};

/// Whose units a rule affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SupportFaction {
    /// Supporter's own side.
    #[default]
    Allied,
    /// The opposing side (usually a penalty).
    Enemy,
}

/// Which value a bonus modifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportKind {
    /// Strength of a normal roll.
    Strength,
    /// Number of normal rolls.
    Rolls,
    /// Strength of AA fire.
    AaStrength,
    /// Number of AA shots.
    AaRolls,
}

/// A support rule attached to a supporting unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportRule {
    /// Unique name; final ordering tie-breaker.
    pub name: String,
    /// Type that provides the support.
    pub supporter: UnitTypeId,
    /// Types that receive it.
    pub recipients: Vec<UnitTypeId>,
    /// Applies while the supporter attacks.
    pub offence: bool,
    /// Applies while the supporter defends.
    pub defence: bool,
    /// Allied or enemy support.
    pub faction: SupportFaction,
    /// Amount added to the modified value.
    pub bonus: i32,
    /// Non-stacking bucket.
    pub bonus_type: String,
    /// Modifies normal strength.
    pub strength: bool,
    /// Modifies normal roll count.
    pub roll: bool,
    /// Modifies AA strength.
    pub aa_strength: bool,
    /// Modifies AA roll count.
    pub aa_roll: bool,
    /// Recipients each supporter can serve.
    pub number: u32,
    /// Owners allowed to use the rule; empty means everyone.
    pub players: Vec<PlayerId>,
}

impl Default for SupportRule {
    fn default() -> Self {
        Self {
            name: String::new(),
            supporter: UnitTypeId::default(),
            recipients: Vec::new(),
            offence: true,
            defence: false,
            faction: SupportFaction::Allied,
            bonus: 1,
            bonus_type: String::new(),
            strength: true,
            roll: false,
            aa_strength: false,
            aa_roll: false,
            number: 1,
            players: Vec::new(),
        }
    }
}

impl SupportRule {
    /// Offensive strength support, one recipient per supporter.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        supporter: UnitTypeId,
        recipients: Vec<UnitTypeId>,
        bonus: i32,
    ) -> Self {
        let name = name.into();
        Self {
            bonus_type: name.clone(),
            name,
            supporter,
            recipients,
            bonus,
            ..Self::default()
        }
    }

    /// Set which sides the rule applies on.
    #[must_use]
    pub fn sides(mut self, offence: bool, defence: bool) -> Self {
        self.offence = offence;
        self.defence = defence;
        self
    }

    /// Modify roll counts instead of strength.
    #[must_use]
    pub fn for_rolls(mut self) -> Self {
        self.strength = false;
        self.roll = true;
        self
    }

    /// Modify AA strength instead of normal strength.
    #[must_use]
    pub fn for_aa(mut self) -> Self {
        self.strength = false;
        self.aa_strength = true;
        self
    }

    /// Apply to the opposing side.
    #[must_use]
    pub fn against_enemy(mut self) -> Self {
        self.faction = SupportFaction::Enemy;
        self
    }

    /// Recipients each supporter may serve.
    #[must_use]
    pub fn uses(mut self, number: u32) -> Self {
        self.number = number;
        self
    }

    /// Put the rule in a named stacking bucket.
    #[must_use]
    pub fn in_bucket(mut self, bonus_type: impl Into<String>) -> Self {
        self.bonus_type = bonus_type.into();
        self
    }

    /// Whether the rule modifies `kind`.
    #[must_use]
    pub const fn modifies(&self, kind: SupportKind) -> bool {
        match kind {
            SupportKind::Strength => self.strength,
            SupportKind::Rolls => self.roll,
            SupportKind::AaStrength => self.aa_strength,
            SupportKind::AaRolls => self.aa_roll,
        }
    }

    const fn rolls_first(&self) -> bool {
        self.roll || self.aa_roll
    }
}

/// Bonuses actually handed out: supporter, then recipient, then amount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportGiven {
    given: BTreeMap<UnitId, BTreeMap<UnitId, i32>>,
}

impl SupportGiven {
    /// Record `bonus` flowing from `supporter` to `recipient`.
    pub fn add(&mut self, supporter: UnitId, recipient: UnitId, bonus: i32) {
        *self
            .given
            .entry(supporter)
            .or_default()
            .entry(recipient)
            .or_insert(0) += bonus;
    }

    /// Recipients served by `supporter` with their bonuses.
    #[must_use]
    pub fn from_supporter(&self, supporter: UnitId) -> Option<&BTreeMap<UnitId, i32>> {
        self.given.get(&supporter)
    }

    /// Bonus `supporter` gave `recipient`.
    #[must_use]
    pub fn amount(&self, supporter: UnitId, recipient: UnitId) -> i32 {
        self.given
            .get(&supporter)
            .and_then(|m| m.get(&recipient))
            .copied()
            .unwrap_or(0)
    }

    /// Forget a supporter that has left the battle.
    pub fn remove_supporter(&mut self, supporter: UnitId) {
        self.given.remove(&supporter);
    }

    /// Whether nothing was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.given.is_empty()
    }
}

/// Remaining support capacity for one pass over one side's recipients.
#[derive(Debug, Clone, Default)]
pub struct AvailableSupport {
    rules: Vec<SupportRule>,
    buckets: Vec<Vec<usize>>,
    left: Vec<u32>,
    providers: Vec<BTreeMap<UnitId, u32>>,
}

impl AvailableSupport {
    /// Collect the capacity that `supporters` provide for bonuses of `kind`.
    ///
    /// `supporters_defending` is the side the supporting units fight on;
    /// `faction` selects allied rules (support for their own side) or enemy
    /// rules (penalties for the other side).
    #[must_use]
    pub fn new(
        rules: &[SupportRule],
        supporters: &[CombatUnit<'_>],
        supporters_defending: bool,
        faction: SupportFaction,
        kind: SupportKind,
    ) -> Self {
        let mut available = Self::default();
        let mut raw_power: BTreeMap<UnitTypeId, i64> = BTreeMap::new();

        for rule in rules {
            let side_ok = if supporters_defending {
                rule.defence
            } else {
                rule.offence
            };
            if !side_ok || rule.faction != faction || !rule.modifies(kind) || rule.number == 0 {
                continue;
            }
            let providers: BTreeMap<UnitId, u32> = supporters
                .iter()
                .filter(|u| u.type_id() == rule.supporter)
                .filter(|u| rule.players.is_empty() || rule.players.contains(&u.owner()))
                .map(|u| (u.id(), rule.number))
                .collect();
            if providers.is_empty() {
                continue;
            }
            if let Some(first) = supporters.iter().find(|u| u.type_id() == rule.supporter) {
                let power = i64::from(first.kind.strength(supporters_defending))
                    * i64::from(first.kind.rolls(supporters_defending));
                raw_power.insert(rule.supporter, power);
            }
            available.left.push(providers.values().sum());
            available.providers.push(providers);
            available.rules.push(rule.clone());
        }

        let mut by_bucket: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (index, rule) in available.rules.iter().enumerate() {
            by_bucket.entry(rule.bonus_type.as_str()).or_default().push(index);
        }
        let mut buckets: Vec<Vec<usize>> = by_bucket.into_values().collect();
        for bucket in &mut buckets {
            bucket.sort_by(|a, b| {
                compare_rules(&available.rules[*a], &available.rules[*b], &raw_power)
            });
        }
        available.buckets = buckets;
        available
    }

    /// Whether no rule has capacity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.iter().all(|n| *n == 0)
    }

    /// Grant `recipient` its bonus, consuming capacity, and record who gave it.
    pub fn support_for(&mut self, recipient: &CombatUnit<'_>, given: &mut SupportGiven) -> i32 {
        let mut total = 0;
        for bucket in &self.buckets {
            for &index in bucket {
                let rule = &self.rules[index];
                if self.left[index] == 0 || !rule.recipients.contains(&recipient.type_id()) {
                    continue;
                }
                self.left[index] -= 1;
                if let Some((supporter, uses)) =
                    self.providers[index].iter_mut().find(|(_, uses)| **uses > 0)
                {
                    *uses -= 1;
                    given.add(*supporter, recipient.id(), rule.bonus);
                }
                total += rule.bonus;
                break;
            }
        }
        total
    }

    /// Capacity left on the named rule.
    #[must_use]
    pub fn remaining(&self, rule_name: &str) -> u32 {
        self.rules
            .iter()
            .zip(&self.left)
            .filter(|(rule, _)| rule.name == rule_name)
            .map(|(_, left)| *left)
            .sum()
    }

    /// Rule names of each bucket in grant order.
    #[must_use]
    pub fn grant_order(&self) -> Vec<Vec<&str>> {
        self.buckets
            .iter()
            .map(|b| b.iter().map(|i| self.rules[*i].name.as_str()).collect())
            .collect()
    }
}

fn compare_rules(a: &SupportRule, b: &SupportRule, raw_power: &BTreeMap<UnitTypeId, i64>) -> Ordering {
    b.rolls_first()
        .cmp(&a.rolls_first())
        .then_with(|| b.bonus.cmp(&a.bonus))
        .then_with(|| a.recipients.len().cmp(&b.recipients.len()))
        .then_with(|| {
            let pa = raw_power.get(&a.supporter).copied().unwrap_or(0);
            let pb = raw_power.get(&b.supporter).copied().unwrap_or(0);
            pb.cmp(&pa)
        })
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Domain, Unit, UnitType};

    const INF: UnitTypeId = UnitTypeId(1);
    const ART: UnitTypeId = UnitTypeId(2);
    const TANK: UnitTypeId = UnitTypeId(3);

    fn kinds() -> Vec<UnitType> {
        vec![
            UnitType::new(INF, "infantry", Domain::Land).with_combat(1, 2),
            UnitType::new(ART, "artillery", Domain::Land).with_combat(2, 2),
            UnitType::new(TANK, "armour", Domain::Land).with_combat(3, 3),
        ]
    }

    fn units(roster: &[(u32, UnitTypeId)]) -> Vec<Unit> {
        roster.iter()
            .map(|(id, t)| Unit::new(UnitId(*id), *t, PlayerId(1)))
            .collect()
    }

    fn view<'a>(units: &'a [Unit], kinds: &'a [UnitType]) -> Vec<CombatUnit<'a>> {
        units
            .iter()
            .map(|u| {
                let kind = kinds.iter().find(|k| k.id == u.unit_type).expect("kind");
                CombatUnit::new(u, kind)
            })
            .collect()
    }

    #[test]
    fn test_one_supporter_serves_one_recipient() {
        let kinds = kinds();
        let rules = vec![SupportRule::new("artillery", ART, vec![INF], 1)];
        let units = units(&[(1, INF), (2, INF), (3, ART)]);
        let combat = view(&units, &kinds);

        let mut available =
            AvailableSupport::new(&rules, &combat, false, SupportFaction::Allied, SupportKind::Strength);
        let mut given = SupportGiven::default();
        assert_eq!(available.support_for(&combat[0], &mut given), 1);
        assert_eq!(available.support_for(&combat[1], &mut given), 0);
        assert_eq!(given.amount(UnitId(3), UnitId(1)), 1);
        assert_eq!(available.remaining("artillery"), 0);
    }

    #[test]
    fn test_rule_for_wrong_side_is_ignored() {
        let kinds = kinds();
        let rules = vec![SupportRule::new("artillery", ART, vec![INF], 1)];
        let units = units(&[(1, INF), (2, ART)]);
        let combat = view(&units, &kinds);

        let available =
            AvailableSupport::new(&rules, &combat, true, SupportFaction::Allied, SupportKind::Strength);
        assert!(available.is_empty());
    }

    #[test]
    fn test_bucket_grants_single_rule() {
        let kinds = kinds();
        let rules = vec![
            SupportRule::new("art", ART, vec![INF], 1).in_bucket("barrage"),
            SupportRule::new("tank", TANK, vec![INF], 2).in_bucket("barrage"),
        ];
        let units = units(&[(1, INF), (2, ART), (3, TANK)]);
        let combat = view(&units, &kinds);

        let mut available =
            AvailableSupport::new(&rules, &combat, false, SupportFaction::Allied, SupportKind::Strength);
        let mut given = SupportGiven::default();
        assert_eq!(available.support_for(&combat[0], &mut given), 2);
        assert_eq!(available.remaining("art"), 1);
    }

    #[test]
    fn test_grant_order_contract() {
        let kinds = kinds();
        let rules = vec![
            SupportRule::new("broad", ART, vec![INF, TANK], 1).in_bucket("b"),
            SupportRule::new("narrow", ART, vec![INF], 1).in_bucket("b"),
            SupportRule::new("strong", TANK, vec![INF, TANK], 1).in_bucket("b"),
            SupportRule::new("big", ART, vec![INF, TANK], 2).in_bucket("b"),
            SupportRule::new("rolls", ART, vec![INF, TANK], 1)
                .for_rolls()
                .in_bucket("b"),
        ];
        let units = units(&[(1, ART), (2, TANK)]);
        let combat = view(&units, &kinds);

        let strength =
            AvailableSupport::new(&rules, &combat, false, SupportFaction::Allied, SupportKind::Strength);
        assert_eq!(strength.grant_order(), vec![vec!["big", "narrow", "strong", "broad"]]);

        let mut mixed = rules.clone();
        for rule in &mut mixed {
            rule.strength = true;
        }
        let both =
            AvailableSupport::new(&mixed, &combat, false, SupportFaction::Allied, SupportKind::Strength);
        assert_eq!(both.grant_order()[0][0], "rolls");
    }

    #[test]
    fn test_enemy_penalty_least_negative_first() {
        let kinds = kinds();
        let rules = vec![
            SupportRule::new("harsh", ART, vec![INF], -2).against_enemy().in_bucket("p"),
            SupportRule::new("mild", ART, vec![INF], -1).against_enemy().in_bucket("p"),
        ];
        let units = units(&[(1, ART)]);
        let combat = view(&units, &kinds);

        let available =
            AvailableSupport::new(&rules, &combat, false, SupportFaction::Enemy, SupportKind::Strength);
        assert_eq!(available.grant_order(), vec![vec!["mild", "harsh"]]);
    }

    #[test]
    fn test_supporters_spread_across_recipients() {
        let kinds = kinds();
        let rules = vec![SupportRule::new("artillery", ART, vec![INF], 1)];
        let units = units(&[(1, INF), (2, INF), (3, ART), (4, ART)]);
        let combat = view(&units, &kinds);

        let mut available =
            AvailableSupport::new(&rules, &combat, false, SupportFaction::Allied, SupportKind::Strength);
        let mut given = SupportGiven::default();
        available.support_for(&combat[0], &mut given);
        available.support_for(&combat[1], &mut given);
        assert_eq!(given.amount(UnitId(3), UnitId(1)), 1);
        assert_eq!(given.amount(UnitId(4), UnitId(2)), 1);
    }
}
