//! Anti-aircraft power and the three-group firing order.
//!
//! AA guns fire in three groups:
//!
//! 1. **normal** guns, each capped by its own `max_attacks`
//! 2. **infinite** guns, which all fire at the single best infinite attack
//!    value and take every target the normal group left over
//! 3. **overstack** guns, which fire on top of the target cap
//!
//! Normal guns weaker than the infinite attack stand down and leave their
//! shots to the infinite group. Normal plus infinite shots never exceed the
//! number of targets.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::roll::{DiceRoll, Die};
use super::power::RollContext;
use super::random::RandomSource;
use crate::error::{ConsistencyViolation, Result};
use crate::game::{CombatUnit, UnitId};
use crate::history::{HistoryPayload, HistorySink};
use crate::math::ratio;
use crate::rules::BattleRules;
use crate::support::{AvailableSupport, SupportFaction, SupportGiven, SupportKind};

/// Shots a gun fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AaAttacks {
    /// A fixed number of shots.
    Limited(u32),
    /// One shot per target.
    Infinite,
}

impl AaAttacks {
    /// Whether the gun fires at every target.
    #[must_use]
    pub const fn is_infinite(self) -> bool {
        matches!(self, Self::Infinite)
    }

    const fn is_zero(self) -> bool {
        matches!(self, Self::Limited(0))
    }
}

/// Strength, shots and die of one AA gun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AaPower {
    /// Hit when a die shows less than this.
    pub strength: i32,
    /// Shots fired.
    pub attacks: AaAttacks,
    /// Sides of this gun's die.
    pub sides: u32,
    /// Fires beyond the target cap.
    pub may_overstack: bool,
}

impl AaPower {
    fn hit_at(&self) -> u32 {
        u32::try_from(self.strength).unwrap_or(0).min(self.sides)
    }
}

/// AA power of every gun, strongest first, with the support handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AaPowerMap {
    entries: Vec<(UnitId, AaPower)>,
    support: SupportGiven,
}

impl AaPowerMap {
    /// Entry for a gun.
    #[must_use]
    pub fn get(&self, unit: UnitId) -> Option<AaPower> {
        self.entries.iter().find(|(u, _)| *u == unit).map(|(_, p)| *p)
    }

    /// Guns in firing priority.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, AaPower)> + '_ {
        self.entries.iter().copied()
    }

    /// Whether there are no guns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// AA support handed out.
    #[must_use]
    pub fn support(&self) -> &SupportGiven {
        &self.support
    }

    fn retain(&self, keep: impl Fn(&AaPower) -> bool) -> Self {
        Self {
            entries: self.entries.iter().copied().filter(|(_, p)| keep(p)).collect(),
            support: SupportGiven::default(),
        }
    }
}

fn gun_sides(unit: &CombatUnit<'_>, rules: &BattleRules) -> u32 {
    unit.aa()
        .and_then(|aa| aa.die_sides)
        .filter(|s| *s >= 1)
        .unwrap_or(rules.dice_sides)
}

/// `a` fires before `b`: zero attack last, then descending attack per side.
fn compare_high_to_low(a: (u32, u32), b: (u32, u32)) -> Ordering {
    (a.0 == 0)
        .cmp(&(b.0 == 0))
        .then_with(|| (u64::from(b.0) * u64::from(a.1)).cmp(&(u64::from(a.0) * u64::from(b.1))))
}

fn sort_high_to_low(units: &mut [CombatUnit<'_>], defending: bool, rules: &BattleRules, map: Option<&AaPowerMap>) {
    units.sort_by(|a, b| {
        compare_high_to_low(
            max_aa_attack_and_dice_sides(std::slice::from_ref(a), defending, rules, map),
            max_aa_attack_and_dice_sides(std::slice::from_ref(b), defending, rules, map),
        )
    });
}

/// Strength and shots of every gun in `aa_units`, strongest first.
///
/// Strength is `attack_aa` when defending or `offensive_attack_aa` when
/// attacking, plus AA strength support, clamped to the gun's die. Shots are
/// `max_attacks` plus AA roll support; infinite guns stay infinite.
#[must_use]
pub fn aa_power_and_rolls(aa_units: &[CombatUnit<'_>], ctx: &RollContext<'_>) -> AaPowerMap {
    let mut map = AaPowerMap::default();
    if aa_units.is_empty() {
        return map;
    }
    let defending = ctx.defending;
    let tracker = |supporters: &[CombatUnit<'_>], side: bool, faction, kind| {
        AvailableSupport::new(ctx.support_rules, supporters, side, faction, kind)
    };
    let mut friendly_strength =
        tracker(ctx.friendly, defending, SupportFaction::Allied, SupportKind::AaStrength);
    let mut enemy_strength = tracker(ctx.enemy, !defending, SupportFaction::Enemy, SupportKind::AaStrength);
    let mut friendly_rolls = tracker(ctx.friendly, defending, SupportFaction::Allied, SupportKind::AaRolls);
    let mut enemy_rolls = tracker(ctx.enemy, !defending, SupportFaction::Enemy, SupportKind::AaRolls);

    let mut sorted: Vec<CombatUnit<'_>> = aa_units.iter().filter(|u| u.aa().is_some()).copied().collect();
    sort_high_to_low(&mut sorted, defending, ctx.rules, None);

    for unit in &sorted {
        let Some(stats) = unit.aa() else { continue };
        let sides = gun_sides(unit, ctx.rules);
        let mut strength = stats.strength(defending);
        strength += friendly_strength.support_for(unit, &mut map.support);
        strength += enemy_strength.support_for(unit, &mut map.support);
        strength = strength.clamp(0, i32::try_from(sides).unwrap_or(i32::MAX));

        let attacks = if strength == 0 {
            AaAttacks::Limited(0)
        } else {
            match stats.max_attacks {
                None => AaAttacks::Infinite,
                Some(max) => {
                    let mut rolls = i32::try_from(max).unwrap_or(i32::MAX);
                    rolls += friendly_rolls.support_for(unit, &mut map.support);
                    rolls += enemy_rolls.support_for(unit, &mut map.support);
                    AaAttacks::Limited(u32::try_from(rolls.max(0)).unwrap_or(0))
                }
            }
        };
        if attacks.is_zero() {
            strength = 0;
        }
        map.entries.push((
            unit.id(),
            AaPower {
                strength,
                attacks,
                sides,
                may_overstack: stats.may_overstack,
            },
        ));
    }
    map
}

/// Best attack-per-side among `aa_units` and the die it uses.
///
/// Attack comes from `map` when the gun has an entry, otherwise from its
/// type. Defaults to `(0, dice_sides)` when no gun has an attack.
#[must_use]
pub fn max_aa_attack_and_dice_sides(
    aa_units: &[CombatUnit<'_>],
    defending: bool,
    rules: &BattleRules,
    map: Option<&AaPowerMap>,
) -> (u32, u32) {
    let mut best = (0_u32, rules.dice_sides);
    for unit in aa_units {
        let Some(stats) = unit.aa() else { continue };
        let sides = gun_sides(unit, rules);
        let raw = map
            .and_then(|m| m.get(unit.id()))
            .map_or(stats.strength(defending), |p| p.strength);
        let attack = u32::try_from(raw).unwrap_or(0).min(sides);
        if u64::from(attack) * u64::from(best.1) > u64::from(best.0) * u64::from(sides) {
            best = (attack, sides);
        }
    }
    best
}

/// Shots the guns in `map` fire at `target_count` targets.
///
/// Normal and infinite shots are capped at the target count; overstack
/// shots are added on top.
#[must_use]
pub fn total_aa_attacks(map: &AaPowerMap, target_count: u32) -> u32 {
    if map.is_empty() || target_count == 0 {
        return 0;
    }
    let mut normal = 0_u32;
    let mut surplus = 0_u32;
    for (_, power) in map.iter() {
        if power.strength <= 0 || power.attacks.is_zero() {
            continue;
        }
        match power.attacks {
            AaAttacks::Infinite => normal = target_count,
            AaAttacks::Limited(n) if power.may_overstack => surplus += n,
            AaAttacks::Limited(n) => normal = normal.saturating_add(n),
        }
    }
    normal.min(target_count) + surplus
}

/// The order in which every AA shot is fired and the strength of each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AaFirePlan {
    shots: Vec<u32>,
    normal: u32,
    infinite: u32,
    overstack: u32,
}

impl AaFirePlan {
    /// Lay out the shots of `map` against `target_count` targets.
    ///
    /// Fails with [`ConsistencyViolation::AaGroupMismatch`] when the groups
    /// do not add up to the capped total.
    pub fn new(map: &AaPowerMap, target_count: u32) -> Result<Self> {
        let infinite_map = map.retain(|p| p.attacks.is_infinite());
        let overstack_map = map.retain(|p| !p.attacks.is_infinite() && p.may_overstack);
        let normal_map = map.retain(|p| !p.attacks.is_infinite() && !p.may_overstack);

        let total = total_aa_attacks(map, target_count);
        let normal = total_aa_attacks(&normal_map, target_count);
        let infinite = target_count
            .saturating_sub(normal)
            .min(total_aa_attacks(&infinite_map, target_count));
        let overstack = total_aa_attacks(&overstack_map, target_count);
        if total != normal + infinite + overstack {
            return Err(ConsistencyViolation::AaGroupMismatch {
                total,
                normal,
                infinite,
                overstack,
            }
            .into());
        }

        let hit_at_for_infinite = infinite_map.iter().map(|(_, p)| p.hit_at()).max().unwrap_or(0);
        let mut shots = Vec::new();

        let mut running = normal as usize;
        for (_, gun) in normal_map.iter() {
            if shots.len() >= running {
                break;
            }
            let hit_at = gun.hit_at();
            if hit_at < hit_at_for_infinite {
                continue;
            }
            if let AaAttacks::Limited(n) = gun.attacks {
                let take = (n as usize).min(running - shots.len());
                shots.extend(std::iter::repeat(hit_at).take(take));
            }
        }

        running += infinite as usize;
        while shots.len() < running {
            shots.push(hit_at_for_infinite);
        }

        running += overstack as usize;
        for (_, gun) in overstack_map.iter() {
            if shots.len() >= running {
                break;
            }
            if let AaAttacks::Limited(n) = gun.attacks {
                let take = (n as usize).min(running - shots.len());
                shots.extend(std::iter::repeat(gun.hit_at()).take(take));
            }
        }

        Ok(Self {
            shots,
            normal,
            infinite,
            overstack,
        })
    }

    /// Strength of each shot in firing order.
    #[must_use]
    pub fn shots(&self) -> &[u32] {
        &self.shots
    }

    /// Shots from each group: normal, infinite, overstack.
    #[must_use]
    pub const fn group_attacks(&self) -> (u32, u32, u32) {
        (self.normal, self.infinite, self.overstack)
    }

    /// Summed strength of every shot.
    #[must_use]
    pub fn total_power(&self) -> u32 {
        self.shots.iter().sum()
    }

    /// Whether every shot uses the same strength.
    #[must_use]
    pub fn same_attack(&self) -> bool {
        let distinct: BTreeSet<u32> = self.shots.iter().copied().collect();
        distinct.len() == 1
    }

    /// Judge `values` shot by shot.
    pub fn judge(&self, values: &[u32]) -> Result<(Vec<Die>, u32)> {
        if values.len() != self.shots.len() {
            return Err(ConsistencyViolation::IllegalState(format!(
                "{} AA dice for {} shots",
                values.len(),
                self.shots.len()
            ))
            .into());
        }
        let dice: Vec<Die> = values
            .iter()
            .zip(&self.shots)
            .map(|(value, hit_at)| Die::judged(*value, *hit_at))
            .collect();
        let hits = u32::try_from(dice.iter().filter(|d| d.is_hit()).count()).unwrap_or(u32::MAX);
        Ok((dice, hits))
    }
}

/// Low-luck hits for `power` on a `sides` die: whole multiples hit outright
/// and one die is rolled for the remainder.
pub fn low_luck_hits(
    power: u32,
    sides: u32,
    random: &mut dyn RandomSource,
    annotation: &str,
) -> Result<(Vec<Die>, u32)> {
    if sides == 0 {
        return Ok((Vec::new(), 0));
    }
    let mut hits = power / sides;
    let remainder = power % sides;
    let mut dice = Vec::new();
    if remainder > 0 {
        let values = random.draw(sides, 1, annotation)?;
        let value = values.first().copied().ok_or_else(|| {
            ConsistencyViolation::RandomExhausted(annotation.to_string())
        })?;
        let die = Die::judged(value, remainder);
        if die.is_hit() {
            hits += 1;
        }
        dice.push(die);
    }
    Ok((dice, hits))
}

/// Fire `aa_units` at `targets`.
///
/// An empty roll comes back when there is nothing to shoot or nothing to
/// shoot with. All guns are expected to share one AA type.
pub fn roll_aa(
    targets: &[CombatUnit<'_>],
    aa_units: &[CombatUnit<'_>],
    ctx: &RollContext<'_>,
    random: &mut dyn RandomSource,
    history: &mut dyn HistorySink,
) -> Result<DiceRoll> {
    let map = aa_power_and_rolls(aa_units, ctx);
    let target_count = u32::try_from(targets.len()).unwrap_or(u32::MAX);
    let total_attacks = total_aa_attacks(&map, target_count);
    let Some(first) = aa_units.first() else {
        return Ok(DiceRoll::empty());
    };
    if total_attacks == 0 {
        return Ok(DiceRoll::empty());
    }

    let (_, sides) = max_aa_attack_and_dice_sides(aa_units, ctx.defending, ctx.rules, Some(&map));
    let type_aa = first.aa().map_or("AA", |aa| aa.type_aa.as_str());
    let annotation = format!("Roll {type_aa} in {}", ctx.territory.name);
    let plan = AaFirePlan::new(&map, target_count)?;
    let power = plan.total_power();

    let (dice, hits) = if ctx.rules.low_luck_for_aa() {
        low_luck_hits(power, sides, random, &annotation)?
    } else {
        let values = random.draw(sides, total_attacks as usize, &annotation)?;
        plan.judge(&values)?
    };

    let roll = DiceRoll::new(dice, hits, ratio(power, sides));
    tracing::debug!(
        territory = %ctx.territory.id,
        type_aa,
        attacks = total_attacks,
        power,
        hits,
        "AA fire resolved"
    );
    history.record(
        &format!(
            "{} roll {type_aa} dice in {} : {roll}",
            first.owner(),
            ctx.territory.name
        ),
        HistoryPayload::Dice(roll.clone()),
    );
    Ok(roll)
}
