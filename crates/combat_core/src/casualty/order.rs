//! Default order of losses.
//!
//! Units are not simply ranked by their own power: a supporting unit is
//! worth its own dice plus whatever it adds to the units it supports. The
//! ordering repeatedly removes the unit whose loss costs the least total
//! power, then strips its support from the recipients and lets them be
//! reconsidered first. Artillery and infantry therefore interleave instead
//! of dying in blocks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::dice::{unit_power_and_rolls, unit_power_for_sorting, PowerAndRolls, RollContext};
use crate::game::{CombatUnit, PlayerId, Territory, TerritoryId, UnitId, UnitTypeId};
use crate::rules::BattleRules;
use crate::support::{SupportGiven, SupportRule};

/// The side taking casualties and the battle around it.
#[derive(Debug, Clone, Copy)]
pub struct CasualtySide<'a> {
    /// Player taking the hits.
    pub player: PlayerId,
    /// Ruleset switches.
    pub rules: &'a BattleRules,
    /// Support rules in play.
    pub support_rules: &'a [SupportRule],
    /// Battle site.
    pub territory: &'a Territory,
    /// Whether this side defends.
    pub defending: bool,
    /// Every unit on this side, alive or waiting to die.
    pub friendly: &'a [CombatUnit<'a>],
    /// Every unit on the other side.
    pub enemy: &'a [CombatUnit<'a>],
    /// The attack is amphibious.
    pub amphibious: bool,
    /// Land units that attacked from the sea.
    pub amphibious_land: &'a [CombatUnit<'a>],
}

impl<'a> CasualtySide<'a> {
    /// Power context for `units` fighting on this side.
    #[must_use]
    pub fn roll_context(&self, units: &'a [CombatUnit<'a>]) -> RollContext<'a> {
        RollContext {
            rules: self.rules,
            support_rules: self.support_rules,
            territory: self.territory,
            defending: self.defending,
            friendly: units,
            enemy: self.enemy,
        }
    }
}

#[derive(Debug, Clone)]
struct SortKey {
    power: u32,
    cost: u32,
    opposite_power: u32,
    movement: u32,
    name: String,
    id: UnitId,
}

/// Ranks units from first-to-die to last.
///
/// Keys, in order: power on this side, cost, power on the opposite side,
/// movement, type name, unit id.
#[derive(Debug, Clone, Default)]
pub struct CasualtyComparator {
    keys: BTreeMap<UnitId, SortKey>,
}

impl CasualtyComparator {
    /// Precompute keys for `units` under `ctx`.
    #[must_use]
    pub fn new(units: &[CombatUnit<'_>], ctx: &RollContext<'_>) -> Self {
        let opposite = ctx.opposite();
        let keys = units
            .iter()
            .map(|u| {
                (
                    u.id(),
                    SortKey {
                        power: unit_power_for_sorting(u, ctx),
                        cost: u.kind.cost,
                        opposite_power: unit_power_for_sorting(u, &opposite),
                        movement: u.kind.movement,
                        name: u.kind.name.clone(),
                        id: u.id(),
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Full comparison.
    #[must_use]
    pub fn compare(&self, a: UnitId, b: UnitId) -> Ordering {
        match (self.keys.get(&a), self.keys.get(&b)) {
            (Some(ka), Some(kb)) => ka.power.cmp(&kb.power).then_with(|| Self::secondary(ka, kb)),
            _ => a.cmp(&b),
        }
    }

    /// Comparison that skips the power on this side.
    #[must_use]
    pub fn compare_without_power(&self, a: UnitId, b: UnitId) -> Ordering {
        match (self.keys.get(&a), self.keys.get(&b)) {
            (Some(ka), Some(kb)) => Self::secondary(ka, kb),
            _ => a.cmp(&b),
        }
    }

    fn secondary(a: &SortKey, b: &SortKey) -> Ordering {
        a.cost
            .cmp(&b.cost)
            .then_with(|| a.opposite_power.cmp(&b.opposite_power))
            .then_with(|| a.movement.cmp(&b.movement))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Identifies a casualty ordering problem up to unit identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderOfLossesKey {
    player: PlayerId,
    territory: TerritoryId,
    defending: bool,
    amphibious: bool,
    targets: Vec<UnitTypeId>,
    amphibious_types: Vec<UnitTypeId>,
}

impl OrderOfLossesKey {
    /// Key for the given target and amphibious type multisets.
    #[must_use]
    pub fn new(
        player: PlayerId,
        territory: TerritoryId,
        defending: bool,
        amphibious: bool,
        mut targets: Vec<UnitTypeId>,
        mut amphibious_types: Vec<UnitTypeId>,
    ) -> Self {
        targets.sort_unstable();
        amphibious_types.sort_unstable();
        Self {
            player,
            territory,
            defending,
            amphibious,
            targets,
            amphibious_types,
        }
    }
}

/// Bounded memo of computed orderings, owned by the session.
///
/// The oldest entry is evicted when full. Clear it whenever the map or the
/// unit definitions change.
#[derive(Debug, Clone)]
pub struct OrderOfLossesCache {
    capacity: usize,
    entries: BTreeMap<OrderOfLossesKey, Vec<UnitTypeId>>,
    age: VecDeque<OrderOfLossesKey>,
    hits: u64,
    misses: u64,
}

impl Default for OrderOfLossesCache {
    fn default() -> Self {
        Self::new(BattleRules::default().order_of_losses_cache_capacity)
    }
}

impl OrderOfLossesCache {
    /// Cache holding at most `capacity` orderings.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
            age: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Stored ordering for `key`.
    pub fn get(&mut self, key: &OrderOfLossesKey) -> Option<&[UnitTypeId]> {
        match self.entries.get(key) {
            Some(types) => {
                self.hits += 1;
                Some(types.as_slice())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store an ordering, evicting the oldest entry when full.
    pub fn insert(&mut self, key: OrderOfLossesKey, types: Vec<UnitTypeId>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = types;
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.age.pop_front() else { break };
            self.entries.remove(&oldest);
        }
        self.age.push_back(key.clone());
        self.entries.insert(key, types);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.age.clear();
    }

    /// Orderings stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups answered and missed.
    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

fn key_for(side: &CasualtySide<'_>, targets: Vec<UnitTypeId>, amphibious_types: Vec<UnitTypeId>) -> OrderOfLossesKey {
    OrderOfLossesKey::new(
        side.player,
        side.territory.id,
        side.defending,
        side.amphibious,
        targets,
        amphibious_types,
    )
}

/// Order `targets` first-to-die to last, consulting and filling `cache`.
#[must_use]
pub fn sort_for_casualties<'a>(
    targets: &[CombatUnit<'a>],
    side: &CasualtySide<'_>,
    cache: &mut OrderOfLossesCache,
) -> Vec<CombatUnit<'a>> {
    if targets.is_empty() {
        return Vec::new();
    }
    let target_types: Vec<UnitTypeId> = targets.iter().map(CombatUnit::type_id).collect();
    let amphibious_types: Vec<UnitTypeId> = side.amphibious_land.iter().map(CombatUnit::type_id).collect();
    let key = key_for(side, target_types.clone(), amphibious_types.clone());

    let comparator = {
        let ctx = RollContext {
            rules: side.rules,
            support_rules: side.support_rules,
            territory: side.territory,
            defending: side.defending,
            friendly: targets,
            enemy: side.enemy,
        };
        CasualtyComparator::new(targets, &ctx)
    };

    if let Some(stored) = cache.get(&key) {
        let stored = stored.to_vec();
        tracing::trace!(player = %side.player, units = targets.len(), "order of losses cache hit");
        return from_type_order(targets, &stored, &comparator);
    }

    let ordered = compute_order(targets, side, &comparator);
    let types: Vec<UnitTypeId> = ordered.iter().map(CombatUnit::type_id).collect();
    store_suffixes(cache, side, &types, target_types, amphibious_types);
    ordered
}

/// Map a cached type sequence back onto concrete units, one unit per entry.
fn from_type_order<'a>(
    targets: &[CombatUnit<'a>],
    stored: &[UnitTypeId],
    comparator: &CasualtyComparator,
) -> Vec<CombatUnit<'a>> {
    let mut remaining = targets.to_vec();
    remaining.sort_by(|a, b| comparator.compare(a.id(), b.id()));
    let mut result = Vec::with_capacity(targets.len());
    for kind in stored {
        if let Some(pos) = remaining.iter().position(|u| u.type_id() == *kind) {
            result.push(remaining.remove(pos));
        }
    }
    result.extend(remaining);
    result
}

fn store_suffixes(
    cache: &mut OrderOfLossesCache,
    side: &CasualtySide<'_>,
    types: &[UnitTypeId],
    mut target_types: Vec<UnitTypeId>,
    mut amphibious_types: Vec<UnitTypeId>,
) {
    for (i, kind) in types.iter().enumerate() {
        cache.insert(
            key_for(side, target_types.clone(), amphibious_types.clone()),
            types[i..].to_vec(),
        );
        if let Some(pos) = target_types.iter().position(|t| t == kind) {
            target_types.remove(pos);
        }
        let left = target_types.iter().filter(|t| *t == kind).count();
        let amphibious = amphibious_types.iter().filter(|t| *t == kind).count();
        if left < amphibious {
            if let Some(pos) = amphibious_types.iter().position(|t| t == kind) {
                amphibious_types.remove(pos);
            }
        }
    }
}

/// Power lost if `unit` dies: its own dice plus the marginal value of the
/// strength and roll support it still provides.
fn loss_value(
    unit: UnitId,
    original: &BTreeMap<UnitId, PowerAndRolls>,
    current: &BTreeMap<UnitId, PowerAndRolls>,
    strength_given: &SupportGiven,
    roll_given: &SupportGiven,
    rules: &BattleRules,
) -> i64 {
    let mut power = original.get(&unit).map_or(0, |p| i64::from(p.total_power(rules)));

    if let Some(recipients) = strength_given.from_supporter(unit) {
        for (recipient, bonus) in recipients {
            let Some(mut with) = current.get(recipient).copied() else { continue };
            with.rolls -= roll_given.amount(unit, *recipient);
            if with.rolls == 1 {
                power += i64::from(*bonus);
                continue;
            }
            let without = PowerAndRolls {
                strength: with.strength - bonus,
                ..with
            };
            power += i64::from(with.total_power(rules)) - i64::from(without.total_power(rules));
        }
    }
    if let Some(recipients) = roll_given.from_supporter(unit) {
        for (recipient, bonus) in recipients {
            let Some(with) = current.get(recipient).copied() else { continue };
            let without = PowerAndRolls {
                rolls: with.rolls - bonus,
                ..with
            };
            power += i64::from(with.total_power(rules)) - i64::from(without.total_power(rules));
        }
    }
    power
}

fn compute_order<'a>(
    targets: &[CombatUnit<'a>],
    side: &CasualtySide<'_>,
    comparator: &CasualtyComparator,
) -> Vec<CombatUnit<'a>> {
    let rules = side.rules;
    let mut list = targets.to_vec();
    // Strongest first so support goes to the best recipients.
    list.sort_by(|a, b| comparator.compare(b.id(), a.id()));
    let map = {
        let ctx = RollContext {
            rules,
            support_rules: side.support_rules,
            territory: side.territory,
            defending: side.defending,
            friendly: &list,
            enemy: side.enemy,
        };
        unit_power_and_rolls(&list, &ctx)
    };
    let original: BTreeMap<UnitId, PowerAndRolls> = map.iter().collect();
    let mut current = original.clone();
    let mut strength_given = map.strength_support().clone();
    let mut roll_given = map.roll_support().clone();

    list.reverse();
    let mut ordered = Vec::with_capacity(list.len());
    while !list.is_empty() {
        let mut seen = BTreeSet::new();
        let mut worst: Option<(usize, i64)> = None;
        for (index, unit) in list.iter().enumerate() {
            if !seen.insert(unit.type_id()) {
                continue;
            }
            let value = loss_value(unit.id(), &original, &current, &strength_given, &roll_given, rules);
            let replace = match worst {
                None => true,
                Some((w, min)) => {
                    value < min
                        || (value == min
                            && comparator.compare_without_power(unit.id(), list[w].id())
                                == Ordering::Less)
                }
            };
            if replace {
                worst = Some((index, value));
            }
        }
        let Some((index, value)) = worst else { break };
        let dead = list.remove(index);
        let dead_id = dead.id();
        tracing::trace!(unit = %dead_id, value, "next casualty");

        let mut promoted = Vec::new();
        if let Some(recipients) = strength_given.from_supporter(dead_id) {
            for (recipient, bonus) in recipients {
                if let Some(p) = current.get_mut(recipient) {
                    p.strength -= bonus;
                    promoted.push(*recipient);
                }
            }
        }
        if let Some(recipients) = roll_given.from_supporter(dead_id) {
            for (recipient, bonus) in recipients {
                if let Some(p) = current.get_mut(recipient) {
                    p.rolls -= bonus;
                    promoted.push(*recipient);
                }
            }
        }
        for recipient in promoted {
            if let Some(pos) = list.iter().position(|u| u.id() == recipient) {
                let unit = list.remove(pos);
                list.insert(0, unit);
            }
        }
        current.remove(&dead_id);
        strength_given.remove_supporter(dead_id);
        roll_given.remove_supporter(dead_id);
        ordered.push(dead);
    }
    ordered
}
