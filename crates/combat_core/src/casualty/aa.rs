//! Which aircraft AA hits fall on.
//!
//! The ruleset picks one of four ways: the owning player chooses, low-luck
//! groups, one die per aircraft, or a random draw. Every way returns exactly
//! as many hits as the AA dice scored, or fewer when there are fewer
//! hitpoints to take.

use std::collections::BTreeMap;

use super::details::CasualtyDetails;
use super::order::{CasualtySide, OrderOfLossesCache};
use super::select::{select_casualties, CasualtyQuery};
use crate::battle::BattleId;
use crate::dice::{
    aa_power_and_rolls, max_aa_attack_and_dice_sides, total_aa_attacks, AaFirePlan, AaPowerMap,
    DiceRoll, RandomSource, RollContext,
};
use crate::error::{ConsistencyViolation, Result};
use crate::game::{total_hit_points, CombatUnit, PlayerId, UnitTypeId};
use crate::player::{Decision, PlayerOracle};

const DRAW_ANNOTATION: &str = "Deciding which planes should die due to AA fire";

/// AA hits to place on aircraft.
#[derive(Debug, Clone)]
pub struct AaCasualtyQuery<'a> {
    /// The side that owns the aircraft.
    pub side: CasualtySide<'a>,
    /// Aircraft shot at.
    pub planes: &'a [CombatUnit<'a>],
    /// Guns that fired.
    pub aa_units: &'a [CombatUnit<'a>],
    /// The AA roll.
    pub dice: &'a DiceRoll,
    /// Battle, or `None` for fire during movement.
    pub battle: Option<BattleId>,
}

impl AaCasualtyQuery<'_> {
    fn allow_multiple_hits(&self) -> bool {
        !self.aa_units.is_empty()
            && self
                .aa_units
                .iter()
                .all(|u| u.aa().is_some_and(|aa| aa.damages_instead_of_killing))
    }

    fn gun_map(&self) -> AaPowerMap {
        let ctx = RollContext {
            rules: self.side.rules,
            support_rules: self.side.support_rules,
            territory: self.side.territory,
            defending: !self.side.defending,
            friendly: self.side.enemy,
            enemy: self.side.friendly,
        };
        aa_power_and_rolls(self.aa_units, &ctx)
    }

    fn plane_count(&self) -> u32 {
        u32::try_from(self.planes.len()).unwrap_or(u32::MAX)
    }
}

/// Place the hits of an AA roll on `query.planes`.
pub fn aa_casualties(
    query: &AaCasualtyQuery<'_>,
    random: &mut dyn RandomSource,
    oracle: &mut dyn PlayerOracle,
    cache: &mut OrderOfLossesCache,
) -> Result<Decision<CasualtyDetails>> {
    if query.planes.is_empty() {
        return Ok(Decision::Ready(CasualtyDetails::new()));
    }
    let rules = query.side.rules;
    let multi = query.allow_multiple_hits();

    if rules.choose_aa_casualties {
        let selection = CasualtyQuery {
            side: query.side,
            targets: query.planes,
            dice: query.dice,
            message: format!(
                "Select {} casualties from aa fire in {}",
                query.dice.hits(),
                query.side.territory.name
            ),
            battle: query.battle,
            extra_hits: query.dice.hits(),
            allow_multiple_hits_per_unit: multi,
        };
        return select_casualties(&selection, oracle, cache);
    }

    let details = if rules.low_luck_for_aa() {
        low_luck_casualties(query, multi, random)?
    } else if rules.roll_aa_individually || !rules.random_aa_casualties {
        individual_casualties(query, multi, random)?
    } else {
        random_casualties(query.planes, query.dice, multi, random)?
    };
    tracing::debug!(
        territory = %query.side.territory.id,
        hits = query.dice.hits(),
        killed = details.killed.len(),
        damaged = details.damaged.len(),
        "AA casualties placed"
    );
    Ok(Decision::Ready(details))
}

/// One entry per hitpoint that can be shot away.
fn expand<'a>(planes: &[CombatUnit<'a>], multi: bool) -> Vec<CombatUnit<'a>> {
    planes
        .iter()
        .flat_map(|p| {
            let hp = if multi {
                p.hit_points_left()
            } else {
                p.hit_points_left().min(1)
            };
            std::iter::repeat(*p).take(hp as usize)
        })
        .collect()
}

fn record_hit(details: &mut CasualtyDetails, plane: &CombatUnit<'_>, multi: bool) {
    let spare = plane.hit_points_left().saturating_sub(1) as usize;
    if multi && details.damage_to(plane.id()) < spare {
        details.add_damaged(plane.id());
    } else {
        details.add_killed(plane.id());
    }
}

/// Take `count` entries out of `pool`, each at the running sum of the drawn
/// values modulo what is left.
fn draw_from_pool<'a>(
    pool: &mut Vec<CombatUnit<'a>>,
    count: u32,
    random: &mut dyn RandomSource,
) -> Result<Vec<CombatUnit<'a>>> {
    if count == 0 || pool.is_empty() {
        return Ok(Vec::new());
    }
    let sides = u32::try_from(pool.len()).unwrap_or(u32::MAX);
    let values = random.draw(sides, count as usize, DRAW_ANNOTATION)?;
    let mut position = 0_usize;
    let mut taken = Vec::with_capacity(values.len());
    for value in values {
        if pool.is_empty() {
            break;
        }
        position += value as usize;
        taken.push(pool.remove(position % pool.len()));
    }
    Ok(taken)
}

/// Random selection among every plane hitpoint.
fn random_casualties(
    planes: &[CombatUnit<'_>],
    dice: &DiceRoll,
    multi: bool,
    random: &mut dyn RandomSource,
) -> Result<CasualtyDetails> {
    let hits = dice.hits();
    let mut details = CasualtyDetails::new();
    if hits == 0 {
        return Ok(details);
    }
    let plane_hp = if multi {
        total_hit_points(planes)
    } else {
        u32::try_from(planes.len()).unwrap_or(u32::MAX)
    };
    let mut pool = expand(planes, multi);
    if hits < plane_hp {
        for plane in draw_from_pool(&mut pool, hits, random)? {
            record_hit(&mut details, &plane, multi);
        }
    } else {
        for plane in pool {
            if details.killed.contains(&plane.id()) {
                details.add_damaged(plane.id());
            } else {
                details.add_killed(plane.id());
            }
        }
    }
    Ok(details)
}

/// Split identical planes into groups that each guarantee one loss, plus
/// the leftovers that do not fill a group.
fn categorize<'a>(planes: &[CombatUnit<'a>], group_size: usize) -> (Vec<Vec<CombatUnit<'a>>>, Vec<CombatUnit<'a>>) {
    let mut categories: BTreeMap<(PlayerId, UnitTypeId, u32), Vec<CombatUnit<'a>>> = BTreeMap::new();
    for plane in planes {
        categories
            .entry((plane.owner(), plane.type_id(), plane.unit.hits))
            .or_default()
            .push(*plane);
    }
    let mut groups = Vec::new();
    let mut remainder = Vec::new();
    for units in categories.into_values() {
        let split = units.len() - units.len() % group_size;
        groups.extend(units[..split].chunks(group_size).map(<[CombatUnit<'a>]>::to_vec));
        remainder.extend_from_slice(&units[split..]);
    }
    (groups, remainder)
}

fn low_luck_casualties(
    query: &AaCasualtyQuery<'_>,
    multi: bool,
    random: &mut dyn RandomSource,
) -> Result<CasualtyDetails> {
    let mut hits = query.dice.hits();
    let mut details = CasualtyDetails::new();
    if hits == 0 {
        return Ok(details);
    }
    let rules = query.side.rules;
    let map = query.gun_map();
    let (highest, sides) = max_aa_attack_and_dice_sides(query.aa_units, !query.side.defending, rules, Some(&map));
    if highest < 1 {
        return Ok(details);
    }
    let same_attack = AaFirePlan::new(&map, query.plane_count())?.same_attack();
    let list = expand(query.planes, multi);
    let group_size = if same_attack { sides / highest } else { sides }.max(1);
    let groups_by_sides = list.len().div_ceil(group_size as usize);

    if !same_attack || hits as usize > groups_by_sides || sides % highest != 0 {
        tracing::debug!(same_attack, hits, groups_by_sides, "low luck AA groups unusable, drawing at random");
        return random_casualties(query.planes, query.dice, multi, random);
    }

    let group_size = group_size as usize;
    let (groups, mut remainder) = categorize(&list, group_size);
    let remainder_groups = remainder.len().div_ceil(group_size);

    if (hits as usize) < groups.len() + remainder_groups {
        let mut candidates: Vec<CombatUnit<'_>> = groups.iter().filter_map(|g| g.first().copied()).collect();
        if remainder.len() == 1 {
            candidates.append(&mut remainder);
        } else if !remainder.is_empty() {
            let picks = u32::try_from(remainder_groups).unwrap_or(u32::MAX);
            candidates.extend(draw_from_pool(&mut remainder, picks, random)?);
        }
        for plane in draw_from_pool(&mut candidates, hits, random)? {
            record_hit(&mut details, &plane, multi);
        }
    } else {
        for group in &groups {
            if let Some(leader) = group.first() {
                record_hit(&mut details, leader, multi);
                hits -= 1;
            }
        }
        if hits as usize == remainder.len() {
            for plane in &remainder {
                record_hit(&mut details, plane, multi);
            }
        } else if hits != 0 {
            for plane in draw_from_pool(&mut remainder, hits, random)? {
                record_hit(&mut details, &plane, multi);
            }
        }
    }

    let placed = u32::try_from(details.len()).unwrap_or(u32::MAX);
    if placed != query.dice.hits() {
        return Err(ConsistencyViolation::CasualtyCountMismatch {
            expected: query.dice.hits(),
            actual: placed,
        }
        .into());
    }
    Ok(details)
}

fn individual_casualties(
    query: &AaCasualtyQuery<'_>,
    multi: bool,
    random: &mut dyn RandomSource,
) -> Result<CasualtyDetails> {
    let plane_hp = if multi {
        total_hit_points(query.planes)
    } else {
        query.plane_count()
    };
    let map = query.gun_map();
    if total_aa_attacks(&map, query.plane_count()) != plane_hp {
        return random_casualties(query.planes, query.dice, multi, random);
    }
    if !AaFirePlan::new(&map, query.plane_count())?.same_attack() {
        return random_casualties(query.planes, query.dice, multi, random);
    }

    let hits = query.dice.hits();
    if hits > plane_hp {
        return Err(ConsistencyViolation::IllegalState(format!(
            "{hits} AA hits for {plane_hp} die rolls"
        ))
        .into());
    }
    let list = expand(query.planes, multi);
    let mut details = CasualtyDetails::new();
    if hits < plane_hp {
        for (die, plane) in query.dice.dice().iter().zip(&list) {
            if die.is_hit() {
                record_hit(&mut details, plane, multi);
            }
        }
    } else {
        for plane in &list {
            if details.killed.contains(&plane.id()) {
                details.add_damaged(plane.id());
            } else {
                details.add_killed(plane.id());
            }
        }
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::{Die, ScriptedRandom};
    use crate::game::{AaStats, Domain, Territory, TerritoryId, Unit, UnitId, UnitType};
    use crate::math::Fixed;
    use crate::player::{AcceptDefaults, DeferredOracle};
    use crate::rules::BattleRules;

    const GUN: UnitTypeId = UnitTypeId(1);
    const FIGHTER: UnitTypeId = UnitTypeId(2);
    const BOMBER: UnitTypeId = UnitTypeId(3);
    const FLAK: UnitTypeId = UnitTypeId(4);

    fn kinds() -> Vec<UnitType> {
        let mut flak = AaStats::infinite(1);
        flak.damages_instead_of_killing = true;
        vec![
            UnitType::new(GUN, "aa gun", Domain::Land).with_aa(AaStats::infinite(1)),
            UnitType::new(FIGHTER, "fighter", Domain::Air).with_combat(3, 4).with_cost(10, 4),
            UnitType::new(BOMBER, "heavy bomber", Domain::Air)
                .with_combat(4, 1)
                .with_cost(12, 6)
                .with_hit_points(2),
            UnitType::new(FLAK, "flak", Domain::Land).with_aa(flak),
        ]
    }

    fn units(planes: &[(u32, UnitTypeId)], gun: UnitTypeId) -> (Vec<Unit>, Vec<Unit>) {
        let planes = planes
            .iter()
            .map(|(id, t)| Unit::new(UnitId(*id), *t, PlayerId(1)))
            .collect();
        (planes, vec![Unit::new(UnitId(100), gun, PlayerId(2))])
    }

    fn view<'a>(units: &'a [Unit], kinds: &'a [UnitType]) -> Vec<CombatUnit<'a>> {
        units
            .iter()
            .map(|u| CombatUnit::new(u, kinds.iter().find(|k| k.id == u.unit_type).expect("kind")))
            .collect()
    }

    fn roll(hits: u32, dice: Vec<Die>) -> DiceRoll {
        DiceRoll::new(dice, hits, Fixed::ZERO)
    }

    fn query<'a>(
        rules: &'a BattleRules,
        territory: &'a Territory,
        planes: &'a [CombatUnit<'a>],
        guns: &'a [CombatUnit<'a>],
        dice: &'a DiceRoll,
    ) -> AaCasualtyQuery<'a> {
        AaCasualtyQuery {
            side: CasualtySide {
                player: PlayerId(1),
                rules,
                support_rules: &[],
                territory,
                defending: false,
                friendly: planes,
                enemy: guns,
                amphibious: false,
                amphibious_land: &[],
            },
            planes,
            aa_units: guns,
            dice,
            battle: None,
        }
    }

    #[test]
    fn test_low_luck_groups_take_leaders_without_drawing() {
        let kinds = kinds();
        let rules = BattleRules {
            low_luck: true,
            ..BattleRules::default()
        };
        let territory = Territory::land(TerritoryId(1), "Germany", Some(PlayerId(2)));
        let roster: Vec<(u32, UnitTypeId)> = (1..=12).map(|i| (i, FIGHTER)).collect();
        let (planes, guns) = units(&roster, GUN);
        let (planes, guns) = (view(&planes, &kinds), view(&guns, &kinds));
        let dice = roll(2, Vec::new());
        let mut random = ScriptedRandom::default();
        let details = aa_casualties(
            &query(&rules, &territory, &planes, &guns, &dice),
            &mut random,
            &mut AcceptDefaults,
            &mut OrderOfLossesCache::new(4),
        )
        .expect("casualties")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(1), UnitId(7)]);
        assert_eq!(random.remaining(), 0);
    }

    #[test]
    fn test_low_luck_fewer_hits_than_groups_draws_leaders() {
        let kinds = kinds();
        let rules = BattleRules {
            low_luck_aa_only: true,
            ..BattleRules::default()
        };
        let territory = Territory::land(TerritoryId(1), "Germany", Some(PlayerId(2)));
        let roster: Vec<(u32, UnitTypeId)> = (1..=12).map(|i| (i, FIGHTER)).collect();
        let (planes, guns) = units(&roster, GUN);
        let (planes, guns) = (view(&planes, &kinds), view(&guns, &kinds));
        let dice = roll(1, Vec::new());
        // Candidates are the two group leaders; draw 1 picks the second.
        let mut random = ScriptedRandom::new([1]);
        let details = aa_casualties(
            &query(&rules, &territory, &planes, &guns, &dice),
            &mut random,
            &mut AcceptDefaults,
            &mut OrderOfLossesCache::new(4),
        )
        .expect("casualties")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(7)]);
    }

    #[test]
    fn test_individual_dice_map_to_planes() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::land(TerritoryId(1), "Germany", Some(PlayerId(2)));
        let (planes, guns) = units(&[(1, FIGHTER), (2, FIGHTER), (3, BOMBER)], GUN);
        let (planes, guns) = (view(&planes, &kinds), view(&guns, &kinds));
        let dice = roll(1, vec![Die::judged(4, 1), Die::judged(0, 1), Die::judged(3, 1)]);
        let details = aa_casualties(
            &query(&rules, &territory, &planes, &guns, &dice),
            &mut ScriptedRandom::default(),
            &mut AcceptDefaults,
            &mut OrderOfLossesCache::new(4),
        )
        .expect("casualties")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(2)]);
    }

    #[test]
    fn test_random_uses_running_position() {
        let kinds = kinds();
        let (planes, _) = units(&[(1, FIGHTER), (2, FIGHTER), (3, FIGHTER), (4, FIGHTER)], GUN);
        let planes = view(&planes, &kinds);
        let dice = roll(2, Vec::new());
        // Position 1 removes plane 2, then position 1 + 2 = 3 wraps to plane 1.
        let mut random = ScriptedRandom::new([1, 2]);
        let details = random_casualties(&planes, &dice, false, &mut random).expect("random");
        assert_eq!(details.killed, vec![UnitId(2), UnitId(1)]);
    }

    #[test]
    fn test_damaging_flak_hits_bomber_twice_before_killing() {
        let kinds = kinds();
        let rules = BattleRules {
            random_aa_casualties: true,
            ..BattleRules::default()
        };
        let territory = Territory::land(TerritoryId(1), "Germany", Some(PlayerId(2)));
        let (planes, guns) = units(&[(1, BOMBER)], FLAK);
        let (planes, guns) = (view(&planes, &kinds), view(&guns, &kinds));
        let dice = roll(2, Vec::new());
        let details = aa_casualties(
            &query(&rules, &territory, &planes, &guns, &dice),
            &mut ScriptedRandom::default(),
            &mut AcceptDefaults,
            &mut OrderOfLossesCache::new(4),
        )
        .expect("casualties")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(1)]);
        assert_eq!(details.damaged, vec![UnitId(1)]);
    }

    #[test]
    fn test_chosen_aa_casualties_ask_player() {
        let kinds = kinds();
        let rules = BattleRules {
            choose_aa_casualties: true,
            ..BattleRules::default()
        };
        let territory = Territory::land(TerritoryId(1), "Germany", Some(PlayerId(2)));
        let (planes, guns) = units(&[(1, FIGHTER), (2, BOMBER)], GUN);
        let (planes, guns) = (view(&planes, &kinds), view(&guns, &kinds));
        let dice = roll(1, vec![Die::judged(0, 1), Die::judged(5, 1)]);
        let mut oracle = DeferredOracle::new();
        let decision = aa_casualties(
            &query(&rules, &territory, &planes, &guns, &dice),
            &mut ScriptedRandom::default(),
            &mut oracle,
            &mut OrderOfLossesCache::new(4),
        )
        .expect("casualties");
        assert!(decision.is_pending());
        assert_eq!(oracle.pending().len(), 1);
    }

    #[test]
    fn test_no_planes_no_casualties() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::land(TerritoryId(1), "Germany", Some(PlayerId(2)));
        let (_, guns) = units(&[], GUN);
        let guns = view(&guns, &kinds);
        let dice = roll(0, Vec::new());
        let details = aa_casualties(
            &query(&rules, &territory, &[], &guns, &dice),
            &mut ScriptedRandom::default(),
            &mut AcceptDefaults,
            &mut OrderOfLossesCache::new(4),
        )
        .expect("casualties");
        assert_eq!(details, Decision::Ready(CasualtyDetails::new()));
    }
}
