//! Normal and low-luck rolls for a side.

use std::collections::BTreeSet;

use super::power::{air_battle_power_and_rolls, unit_power_and_rolls, PowerMap, RollContext};
use super::random::RandomSource;
use super::roll::{DiceRoll, Die};
use crate::error::{ConsistencyViolation, Result};
use crate::game::{CombatUnit, UnitId};
use crate::history::{HistoryPayload, HistorySink};
use crate::math::{ratio, Fixed};
use crate::rules::BattleRules;

/// Fail if any unit appears twice.
pub fn ensure_unique(units: &[CombatUnit<'_>], context: &str) -> Result<()> {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<UnitId> = units.iter().map(CombatUnit::id).filter(|id| !seen.insert(*id)).collect();
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ConsistencyViolation::DuplicateUnits {
            context: context.to_string(),
            units: duplicates.into_iter().collect(),
        }
        .into())
    }
}

/// Roll for `units` on the side described by `ctx`.
///
/// Units are evaluated weakest first. Low luck is used when the rules ask
/// for it for every roll.
pub fn roll_dice(
    units: &[CombatUnit<'_>],
    ctx: &RollContext<'_>,
    random: &mut dyn RandomSource,
    history: &mut dyn HistorySink,
    annotation: &str,
) -> Result<DiceRoll> {
    ensure_unique(units, annotation)?;
    let mut sorted = units.to_vec();
    sorted.sort_by_key(|u| u.kind.strength(ctx.defending));
    let map = unit_power_and_rolls(&sorted, ctx);
    let roll = if ctx.rules.low_luck {
        roll_low_luck(&map, ctx.rules, random, annotation)?
    } else {
        roll_normal(&map, ctx.rules, random, annotation)?
    };
    tracing::debug!(
        defending = ctx.defending,
        units = units.len(),
        hits = roll.hits(),
        "side rolled"
    );
    history.record(&format!("{annotation} : {roll}"), HistoryPayload::Dice(roll.clone()));
    Ok(roll)
}

/// Roll an air battle: air attack or air defense, no support.
pub fn roll_air_battle(
    units: &[CombatUnit<'_>],
    ctx: &RollContext<'_>,
    random: &mut dyn RandomSource,
    history: &mut dyn HistorySink,
    annotation: &str,
) -> Result<DiceRoll> {
    ensure_unique(units, annotation)?;
    let map = air_battle_power_and_rolls(units, ctx);
    let roll = if ctx.rules.low_luck {
        roll_low_luck(&map, ctx.rules, random, annotation)?
    } else {
        roll_normal(&map, ctx.rules, random, annotation)?
    };
    tracing::debug!(
        defending = ctx.defending,
        units = units.len(),
        hits = roll.hits(),
        air = true,
        "side rolled"
    );
    history.record(&format!("{annotation} : {roll}"), HistoryPayload::Dice(roll.clone()));
    Ok(roll)
}

/// Roll `count` plain dice that neither hit nor miss.
pub fn roll_n_dice(
    count: usize,
    sides: u32,
    random: &mut dyn RandomSource,
    history: &mut dyn HistorySink,
    annotation: &str,
) -> Result<DiceRoll> {
    if count == 0 {
        return Ok(DiceRoll::empty());
    }
    let values = random.draw(sides, count, annotation)?;
    let roll = DiceRoll::new(
        values.into_iter().map(|v| Die::ignored(v, 0)).collect(),
        0,
        Fixed::ZERO,
    );
    history.record(&format!("{annotation} : {roll}"), HistoryPayload::Dice(roll.clone()));
    Ok(roll)
}

fn roll_normal(
    map: &PowerMap,
    rules: &BattleRules,
    random: &mut dyn RandomSource,
    annotation: &str,
) -> Result<DiceRoll> {
    let total = map.total(rules);
    if total.rolls == 0 {
        return Ok(DiceRoll::empty());
    }
    let values = random.draw(rules.dice_sides, total.rolls as usize, annotation)?;
    let mut dice = Vec::with_capacity(values.len());
    let mut hits = 0;
    let mut next = 0_usize;

    for (_, power) in map.iter() {
        if power.strength <= 0 || power.rolls <= 0 {
            continue;
        }
        let rolls = power.roll_count() as usize;
        let strength = power.rolled_at();
        let Some(own) = values.get(next..next + rolls) else {
            return Err(ConsistencyViolation::RandomExhausted(annotation.to_string()).into());
        };
        next += rolls;

        if rolls > 1 && power.choose_best {
            let best = own
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| **v)
                .map_or(0, |(i, _)| i);
            let die = Die::judged(own[best], strength);
            if die.is_hit() {
                hits += 1;
            }
            dice.push(die);
            dice.extend(
                own.iter()
                    .enumerate()
                    .filter(|(i, _)| *i != best)
                    .map(|(_, v)| Die::ignored(*v, strength)),
            );
        } else {
            for value in own {
                let die = Die::judged(*value, strength);
                if die.is_hit() {
                    hits += 1;
                }
                dice.push(die);
            }
        }
    }
    Ok(DiceRoll::new(dice, hits, ratio(total.power, rules.dice_sides)))
}

fn roll_low_luck(
    map: &PowerMap,
    rules: &BattleRules,
    random: &mut dyn RandomSource,
    annotation: &str,
) -> Result<DiceRoll> {
    let power = map.total(rules).power;
    if power == 0 {
        return Ok(DiceRoll::empty());
    }
    let (dice, hits) = super::aa::low_luck_hits(power, rules.dice_sides, random, annotation)?;
    Ok(DiceRoll::new(dice, hits, ratio(power, rules.dice_sides)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::random::ScriptedRandom;
    use crate::dice::DieOutcome;
    use crate::game::{Domain, PlayerId, Territory, TerritoryId, Unit, UnitType, UnitTypeId};
    use crate::history::{HistoryLog, NullHistory};

    const INF: UnitTypeId = UnitTypeId(1);
    const TANK: UnitTypeId = UnitTypeId(2);
    const BOMBER: UnitTypeId = UnitTypeId(3);

    fn kinds() -> Vec<UnitType> {
        let mut bomber = UnitType::new(BOMBER, "bomber", Domain::Air)
            .with_combat(4, 1)
            .with_rolls(2, 1)
            .with_air_combat(1, 0);
        bomber.choose_best_roll = true;
        vec![
            UnitType::new(INF, "infantry", Domain::Land).with_combat(1, 2),
            UnitType::new(TANK, "armour", Domain::Land).with_combat(3, 3),
            bomber,
        ]
    }

    fn view<'a>(units: &'a [Unit], kinds: &'a [UnitType]) -> Vec<CombatUnit<'a>> {
        units
            .iter()
            .map(|u| CombatUnit::new(u, kinds.iter().find(|k| k.id == u.unit_type).expect("kind")))
            .collect()
    }

    fn army(roster: &[(u32, UnitTypeId)]) -> Vec<Unit> {
        roster.iter()
            .map(|(id, t)| Unit::new(UnitId(*id), *t, PlayerId(1)))
            .collect()
    }

    fn site() -> Territory {
        Territory::land(TerritoryId(1), "Ukraine", Some(PlayerId(2)))
    }

    #[test]
    fn test_normal_roll_weakest_first() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = site();
        let units = army(&[(1, TANK), (2, INF)]);
        let units = view(&units, &kinds);
        // Infantry rolls first at 1, then the tank at 3.
        let mut random = ScriptedRandom::new([0, 3]);
        let roll = roll_dice(
            &units,
            &RollContext::new(&rules, &territory, false),
            &mut random,
            &mut NullHistory,
            "attack",
        )
        .expect("roll");
        assert_eq!(roll.hits(), 1);
        assert_eq!(roll.dice()[0].rolled_at, 1);
        assert_eq!(roll.dice()[1].rolled_at, 3);
        assert_eq!(roll.expected_hits(), ratio(4, 6));
    }

    #[test]
    fn test_choose_best_keeps_lowest_die() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = site();
        let units = army(&[(1, BOMBER)]);
        let units = view(&units, &kinds);
        let mut random = ScriptedRandom::new([5, 2]);
        let roll = roll_dice(
            &units,
            &RollContext::new(&rules, &territory, false),
            &mut random,
            &mut NullHistory,
            "bomber",
        )
        .expect("roll");
        assert_eq!(roll.hits(), 1);
        assert_eq!(roll.dice()[0].value, 2);
        assert_eq!(roll.dice()[1].outcome, DieOutcome::Ignored);
    }

    #[test]
    fn test_low_luck_whole_hits_without_dice() {
        let kinds = kinds();
        let rules = BattleRules {
            low_luck: true,
            ..BattleRules::default()
        };
        let territory = site();
        let units = army(&[(1, TANK), (2, TANK)]);
        let units = view(&units, &kinds);
        let mut random = ScriptedRandom::default();
        let mut history = HistoryLog::new();
        let roll = roll_dice(
            &units,
            &RollContext::new(&rules, &territory, false),
            &mut random,
            &mut history,
            "low luck",
        )
        .expect("roll");
        assert_eq!(roll.hits(), 1);
        assert!(roll.dice().is_empty());
        assert_eq!(history.rolls().count(), 1);
    }

    #[test]
    fn test_duplicate_units_rejected() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = site();
        let units = army(&[(1, INF)]);
        let one = view(&units, &kinds);
        let twice = vec![one[0], one[0]];
        let err = roll_dice(
            &twice,
            &RollContext::new(&rules, &territory, false),
            &mut ScriptedRandom::new([0, 0]),
            &mut NullHistory,
            "dup",
        )
        .expect_err("duplicates");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_air_battle_uses_air_values() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = site();
        let units = army(&[(1, BOMBER)]);
        let units = view(&units, &kinds);
        let mut random = ScriptedRandom::new([0, 4]);
        let roll = roll_air_battle(
            &units,
            &RollContext::new(&rules, &territory, false),
            &mut random,
            &mut NullHistory,
            "air battle",
        )
        .expect("roll");
        assert_eq!(roll.hits(), 1);
        assert_eq!(roll.dice()[0].rolled_at, 1);
    }

    #[test]
    fn test_roll_n_dice_never_hits() {
        let mut random = ScriptedRandom::new([5, 0, 3]);
        let roll = roll_n_dice(3, 6, &mut random, &mut NullHistory, "bombing").expect("roll");
        assert_eq!(roll.hits(), 0);
        assert!(roll.dice().iter().all(|d| d.outcome == DieOutcome::Ignored));
    }
}
