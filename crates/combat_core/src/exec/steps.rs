//! Combat movement and battle resolution as resumable steps.
//!
//! A combat move expands into `PreAaFire`, one `FireAa` per AA type per
//! territory the units fly over, and `PostAaFire`, which registers the
//! battle and moves the survivors. `FightBattles` then fights every pending
//! battle in tracker order. Each step carries the dice and selections it
//! needs, so a suspended stack resumes without rolling again.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::context::CombatContext;
use super::stack::{Executable, ExecutionStack, StepOutcome};
use crate::battle::{Battle, BattleId, BattleOutcome, BattleType};
use crate::casualty::{
    aa_casualties, select_casualties, AaCasualtyQuery, CasualtyDetails, CasualtyQuery,
    CasualtySide,
};
use crate::dice::{roll_aa, roll_air_battle, roll_dice, roll_n_dice, DiceRoll, RollContext};
use crate::error::{ConsistencyViolation, Result};
use crate::game::{Change, CombatUnit, GameState, PlayerId, Route, TerritoryId, UnitId};
use crate::history::HistoryPayload;
use crate::player::{Decision, Question};

/// One resumable unit of combat work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatStep {
    /// Move `units` along `route` into combat, drawing AA fire on the way.
    CombatMove {
        /// Path flown or marched.
        route: Route,
        /// Units moving.
        units: Vec<UnitId>,
        /// Moving player.
        player: PlayerId,
    },
    /// Withdraw departing units from battles at the route start.
    PreAaFire {
        /// Path of the move.
        route: Route,
        /// Units moving.
        units: Vec<UnitId>,
    },
    /// One AA type fires in one territory.
    FireAa {
        /// Where the guns are.
        territory: TerritoryId,
        /// Firing category.
        type_aa: String,
        /// Units that may be shot at; dead ones are skipped.
        targets: Vec<UnitId>,
        /// Owner of the targets.
        player: PlayerId,
        /// Battle the fire belongs to, or `None` during movement.
        battle: Option<BattleId>,
    },
    /// Place the hits of an AA roll. May wait on the player.
    SelectAaCasualties {
        /// Where the guns are.
        territory: TerritoryId,
        /// Owner of the aircraft.
        player: PlayerId,
        /// Aircraft shot at.
        planes: Vec<UnitId>,
        /// Guns that fired.
        aa_units: Vec<UnitId>,
        /// The AA roll.
        dice: DiceRoll,
        /// Battle, or `None` during movement.
        battle: Option<BattleId>,
    },
    /// Kill and damage units right away.
    RemoveCasualties {
        /// Where the casualties were taken.
        territory: TerritoryId,
        /// Units killed and damaged.
        details: CasualtyDetails,
        /// Battle to update, if any.
        battle: Option<BattleId>,
    },
    /// Register the battle and move the survivors. May wait on the player.
    PostAaFire {
        /// Path of the move.
        route: Route,
        /// Units that started the move.
        units: Vec<UnitId>,
        /// Moving player.
        player: PlayerId,
    },
    /// Fight the next ready battle, then come back.
    FightBattles,
    /// Start one battle.
    FightBattle {
        /// Battle to fight.
        battle: BattleId,
    },
    /// Defending AA fires at attacking aircraft before the first round.
    BattleAa {
        /// Battle being fought.
        battle: BattleId,
    },
    /// The single round of an air raid or air battle.
    AirBattleRound {
        /// Battle being fought.
        battle: BattleId,
    },
    /// One side rolls.
    RollSide {
        /// Battle being fought.
        battle: BattleId,
        /// Whether the defenders roll.
        defending: bool,
    },
    /// The side hit by `dice` picks casualties. May wait on the player.
    SelectBattleCasualties {
        /// Battle being fought.
        battle: BattleId,
        /// Whether the defenders take the hits.
        defending: bool,
        /// The roll that scored the hits.
        dice: DiceRoll,
    },
    /// Remove the round's dead and decide whether to fight on.
    EndRound {
        /// Battle being fought.
        battle: BattleId,
    },
    /// Surviving bombers damage the raid target.
    BombingRaidDamage {
        /// Raid being fought.
        battle: BattleId,
    },
    /// Decide the outcome, take the territory if won, and drop the battle.
    FinishBattle {
        /// Battle being fought.
        battle: BattleId,
    },
}

impl CombatStep {
    /// Combat move entry point.
    #[must_use]
    pub fn combat_move(route: Route, units: Vec<UnitId>, player: PlayerId) -> Self {
        Self::CombatMove {
            route,
            units,
            player,
        }
    }

    fn round(battle: BattleId) -> [Self; 3] {
        [
            Self::RollSide {
                battle,
                defending: false,
            },
            Self::RollSide {
                battle,
                defending: true,
            },
            Self::EndRound { battle },
        ]
    }
}

impl<'a> Executable<CombatContext<'a>> for CombatStep {
    fn execute(
        &self,
        stack: &mut ExecutionStack<Self>,
        ctx: &mut CombatContext<'a>,
    ) -> Result<StepOutcome> {
        match self {
            Self::CombatMove {
                route,
                units,
                player,
            } => combat_move(route, units, *player, stack, ctx),
            Self::PreAaFire { route, units } => pre_aa_fire(route, units, ctx),
            Self::FireAa {
                territory,
                type_aa,
                targets,
                player,
                battle,
            } => fire_aa(*territory, type_aa, targets, *player, *battle, stack, ctx),
            Self::SelectAaCasualties {
                territory,
                player,
                planes,
                aa_units,
                dice,
                battle,
            } => select_aa_casualties(
                *territory, *player, planes, aa_units, dice, *battle, stack, ctx,
            ),
            Self::RemoveCasualties {
                territory,
                details,
                battle,
            } => remove_casualties(*territory, details, *battle, ctx),
            Self::PostAaFire {
                route,
                units,
                player,
            } => post_aa_fire(route, units, *player, ctx),
            Self::FightBattles => {
                if let Some(battle) = ctx.tracker.next_battle() {
                    stack.push_all([Self::FightBattle { battle }, Self::FightBattles]);
                }
                Ok(StepOutcome::Continue)
            }
            Self::FightBattle { battle } => fight_battle(*battle, stack, ctx),
            Self::BattleAa { battle } => battle_aa(*battle, stack, ctx),
            Self::AirBattleRound { battle } => {
                stack.push_all(Self::round(*battle));
                Ok(StepOutcome::Continue)
            }
            Self::RollSide { battle, defending } => roll_side(*battle, *defending, stack, ctx),
            Self::SelectBattleCasualties {
                battle,
                defending,
                dice,
            } => select_battle_casualties(*battle, *defending, dice, ctx),
            Self::EndRound { battle } => end_round(*battle, stack, ctx),
            Self::BombingRaidDamage { battle } => bombing_raid_damage(*battle, ctx),
            Self::FinishBattle { battle } => finish_battle(*battle, ctx),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn alive(state: &GameState, units: &[UnitId]) -> Vec<UnitId> {
    units.iter().copied().filter(|u| state.is_alive(*u)).collect()
}

fn ids(units: &[CombatUnit<'_>]) -> Vec<UnitId> {
    units.iter().map(CombatUnit::id).collect()
}

fn player_name(state: &GameState, player: PlayerId) -> String {
    state
        .player(player)
        .map_or_else(|_| player.to_string(), |p| p.name.clone())
}

/// Guns of one AA type enemy to `player` in `territory`.
fn guns<'s>(
    state: &'s GameState,
    territory: TerritoryId,
    player: PlayerId,
    type_aa: &str,
    in_move: bool,
) -> Result<Vec<CombatUnit<'s>>> {
    Ok(state
        .enemy_units_in(territory, player)?
        .into_iter()
        .filter(|u| {
            u.aa()
                .is_some_and(|aa| aa.type_aa == type_aa && (aa.fires_in_move || !in_move))
        })
        .collect())
}

/// AA types in `territory` able to shoot at any of `targets`, in firing order.
fn aa_types(
    state: &GameState,
    territory: TerritoryId,
    player: PlayerId,
    targets: &[UnitId],
    in_move: bool,
) -> Result<Vec<String>> {
    let targets = state.combat_units(&alive(state, targets))?;
    let types: BTreeSet<String> = state
        .enemy_units_in(territory, player)?
        .iter()
        .filter_map(CombatUnit::aa)
        .filter(|aa| aa.fires_in_move || !in_move)
        .filter(|aa| targets.iter().any(|t| aa.targets_domain(t.domain())))
        .map(|aa| aa.type_aa.clone())
        .collect();
    Ok(types.into_iter().collect())
}

/// Kill and damage, as one change.
fn casualty_change(state: &GameState, details: &CasualtyDetails) -> Result<Change> {
    let mut changes = Vec::new();
    let mut hits: BTreeMap<UnitId, u32> = BTreeMap::new();
    for id in details.damaged.iter().filter(|id| !details.killed.contains(id)) {
        *hits.entry(*id).or_default() += 1;
    }
    for (unit, extra) in hits {
        let left = state.combat_unit(unit)?.hit_points_left();
        if extra >= left {
            return Err(ConsistencyViolation::InvalidChange(format!(
                "{unit} takes {extra} damage with {left} hitpoints left"
            ))
            .into());
        }
        let old = state.unit(unit)?.hits;
        changes.push(Change::Hits {
            unit,
            old,
            new: old + extra,
        });
    }
    changes.push(removal(state, &details.killed));
    Ok(Change::composite(changes))
}

/// Take units off the board wherever they are.
fn removal(state: &GameState, units: &[UnitId]) -> Change {
    let mut by_location: BTreeMap<TerritoryId, Vec<UnitId>> = BTreeMap::new();
    for unit in units {
        if let Some(at) = state.location_of(*unit) {
            by_location.entry(at).or_default().push(*unit);
        }
    }
    Change::composite(
        by_location
            .into_iter()
            .map(|(territory, units)| Change::RemoveUnits { territory, units }),
    )
}

/// One side of a battle as seen by `defending`, units waiting to die included.
struct Sides<'b> {
    own: &'b [UnitId],
    other: &'b [UnitId],
    friendly: Vec<UnitId>,
    enemy: Vec<UnitId>,
}

impl<'b> Sides<'b> {
    fn of(battle: &'b Battle, defending: bool) -> Self {
        let (own, own_dying, other, other_dying) = if defending {
            (
                &battle.defending,
                &battle.defending_waiting_to_die,
                &battle.attacking,
                &battle.attacking_waiting_to_die,
            )
        } else {
            (
                &battle.attacking,
                &battle.attacking_waiting_to_die,
                &battle.defending,
                &battle.defending_waiting_to_die,
            )
        };
        Self {
            own,
            other,
            friendly: own.iter().chain(own_dying).copied().collect(),
            enemy: other.iter().chain(other_dying).copied().collect(),
        }
    }
}

/// Whether entering any step of `route` means combat for `player`.
fn must_fight_through(state: &GameState, route: &Route, player: PlayerId) -> Result<bool> {
    for step in route.steps() {
        let t = state.territory(*step)?;
        let enemy_owned = t.owner.is_some_and(|o| state.is_at_war(player, o));
        let unowned_land = !t.is_water && t.owner.is_none();
        if enemy_owned || unowned_land || !state.enemy_units_in(*step, player)?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// Combat movement
// ============================================================================

fn combat_move(
    route: &Route,
    units: &[UnitId],
    player: PlayerId,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let state = &*ctx.state;
    let mut sites: Vec<TerritoryId> = route.middle_steps().to_vec();
    if !ctx.tracker.was_battle_fought(route.start()) {
        sites.push(route.start());
    }

    let mut steps = vec![CombatStep::PreAaFire {
        route: route.clone(),
        units: units.to_vec(),
    }];
    for territory in sites {
        for type_aa in aa_types(state, territory, player, units, true)? {
            steps.push(CombatStep::FireAa {
                territory,
                type_aa,
                targets: units.to_vec(),
                player,
                battle: None,
            });
        }
    }
    steps.push(CombatStep::PostAaFire {
        route: route.clone(),
        units: units.to_vec(),
        player,
    });
    tracing::debug!(
        from = %route.start(),
        to = %route.end(),
        units = units.len(),
        aa_sites = steps.len() - 2,
        "combat move expanded"
    );
    stack.push_all(steps);
    Ok(StepOutcome::Continue)
}

fn pre_aa_fire(route: &Route, units: &[UnitId], ctx: &mut CombatContext<'_>) -> Result<StepOutcome> {
    let leaving: Vec<BattleId> = ctx
        .tracker
        .pending_battles()
        .filter(|b| b.territory == route.start())
        .map(|b| b.id)
        .collect();
    for id in leaving {
        ctx.tracker.battle_mut(id)?.remove_attack(units);
    }
    Ok(StepOutcome::Continue)
}

#[allow(clippy::too_many_arguments)]
fn fire_aa(
    territory: TerritoryId,
    type_aa: &str,
    targets: &[UnitId],
    player: PlayerId,
    battle: Option<BattleId>,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let state = &*ctx.state;
    let site = state.territory(territory)?;
    let guns = guns(state, territory, player, type_aa, battle.is_none())?;
    let Some(first) = guns.first().and_then(CombatUnit::aa) else {
        return Ok(StepOutcome::Continue);
    };
    let planes: Vec<CombatUnit<'_>> = state
        .combat_units(&alive(state, targets))?
        .into_iter()
        .filter(|u| first.targets_domain(u.domain()))
        .collect();
    if planes.is_empty() {
        return Ok(StepOutcome::Continue);
    }

    // Fly-over fire ignores support from surrounding units.
    let mut roll_ctx = RollContext::new(ctx.rules, site, true);
    if battle.is_some() {
        roll_ctx = roll_ctx.with_support(state.support_rules(), &guns, &planes);
    }
    let dice = roll_aa(&planes, &guns, &roll_ctx, &mut *ctx.random, &mut *ctx.history)?;
    if dice.hits() == 0 {
        let line = format!("No {type_aa} hits in {}", site.name);
        ctx.history.record(&line, HistoryPayload::Empty);
        return Ok(StepOutcome::Continue);
    }
    stack.push(CombatStep::SelectAaCasualties {
        territory,
        player,
        planes: ids(&planes),
        aa_units: ids(&guns),
        dice,
        battle,
    });
    Ok(StepOutcome::Continue)
}

#[allow(clippy::too_many_arguments)]
fn select_aa_casualties(
    territory: TerritoryId,
    player: PlayerId,
    planes: &[UnitId],
    aa_units: &[UnitId],
    dice: &DiceRoll,
    battle: Option<BattleId>,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let state = &*ctx.state;
    let site = state.territory(territory)?;
    let planes = state.combat_units(&alive(state, planes))?;
    let guns = state.combat_units(&alive(state, aa_units))?;
    let query = AaCasualtyQuery {
        side: CasualtySide {
            player,
            rules: ctx.rules,
            support_rules: state.support_rules(),
            territory: site,
            defending: false,
            friendly: &planes,
            enemy: &guns,
            amphibious: false,
            amphibious_land: &[],
        },
        planes: &planes,
        aa_units: &guns,
        dice,
        battle,
    };
    match aa_casualties(&query, &mut *ctx.random, &mut *ctx.oracle, &mut *ctx.cache)? {
        Decision::Ready(details) => {
            stack.push(CombatStep::RemoveCasualties {
                territory,
                details,
                battle,
            });
            Ok(StepOutcome::Continue)
        }
        Decision::Pending => Ok(StepOutcome::Suspend),
    }
}

fn remove_casualties(
    territory: TerritoryId,
    details: &CasualtyDetails,
    battle: Option<BattleId>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    if details.is_empty() {
        return Ok(StepOutcome::Continue);
    }
    let change = casualty_change(ctx.state, details)?;
    let name = ctx.state.territory(territory)?.name.clone();
    ctx.state.apply(change)?;
    ctx.history.record(
        &format!("{} casualties in {name}", details.len()),
        HistoryPayload::Casualties {
            killed: details.killed.clone(),
            damaged: details.damaged.clone(),
        },
    );
    if let Some(id) = battle {
        let battle = ctx.tracker.battle_mut(id)?;
        battle.attacking.retain(|u| !details.killed.contains(u));
        battle.defending.retain(|u| !details.killed.contains(u));
    }
    tracing::debug!(
        %territory,
        killed = details.killed.len(),
        damaged = details.damaged.len(),
        "casualties removed"
    );
    Ok(StepOutcome::Continue)
}

fn post_aa_fire(
    route: &Route,
    units: &[UnitId],
    player: PlayerId,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let arrived = alive(ctx.state, units);
    let end = route.end();
    if !arrived.is_empty() && must_fight_through(ctx.state, route, player)? {
        let state = &*ctx.state;
        let all_bombers = state
            .combat_units(&arrived)?
            .iter()
            .all(|u| u.kind.is_strategic_bomber);
        let has_targets = state
            .enemy_units_in(end, player)?
            .iter()
            .any(|u| u.kind.can_be_damaged);
        let mut bombing = false;
        if all_bombers && has_targets {
            match ctx.oracle.confirm(player, &Question::ShouldBomb { territory: end }) {
                Decision::Ready(answer) => bombing = answer,
                Decision::Pending => return Ok(StepOutcome::Suspend),
            }
        }
        let (tracker, mut bridge) = ctx.tracker_and_bridge();
        tracker.add_battle(route, &arrived, bombing, player, &mut bridge)?;
    }

    let line = format!(
        "{} units moved from {} to {}",
        arrived.len(),
        ctx.state.territory(route.start())?.name,
        ctx.state.territory(end)?.name
    );
    let change = Change::move_units(route.start(), end, arrived);
    let (_, mut bridge) = ctx.tracker_and_bridge();
    bridge.apply(change, &line)?;
    Ok(StepOutcome::Continue)
}

// ============================================================================
// Battles
// ============================================================================

fn fight_battle(
    id: BattleId,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let (kind, territory, attacker) = {
        let battle = ctx.tracker.battle(id)?;
        (battle.kind, battle.territory, battle.attacker)
    };
    if !ctx.tracker.is_ready(id) {
        return Err(ConsistencyViolation::BattleBlocked {
            battle: id,
            blocking: ctx.tracker.get_dependent_on(id),
        }
        .into());
    }
    tracing::info!(battle = %id, %kind, %territory, "fighting battle");

    let state = &*ctx.state;
    let enemies = state.enemy_units_in(territory, attacker)?;
    let defending: Vec<UnitId> = match kind {
        BattleType::AirRaid | BattleType::AirBattle => {
            enemies.iter().filter(|u| u.is_air()).map(CombatUnit::id).collect()
        }
        BattleType::Normal => enemies
            .iter()
            .filter(|u| !u.kind.is_infrastructure)
            .map(CombatUnit::id)
            .collect(),
        _ => Vec::new(),
    };
    let battle = ctx.tracker.battle_mut(id)?;
    battle.attacking.retain(|u| state.is_alive(*u));
    battle.defending = defending;

    let finish = CombatStep::FinishBattle { battle: id };
    match kind {
        BattleType::Finished | BattleType::NonFighting => stack.push(finish),
        BattleType::BombingRaid => stack.push_all([
            CombatStep::BattleAa { battle: id },
            CombatStep::BombingRaidDamage { battle: id },
            finish,
        ]),
        BattleType::AirRaid | BattleType::AirBattle => {
            stack.push_all([CombatStep::AirBattleRound { battle: id }, finish]);
        }
        BattleType::Normal => {
            let mut steps = vec![CombatStep::BattleAa { battle: id }];
            steps.extend(CombatStep::round(id));
            steps.push(finish);
            stack.push_all(steps);
        }
    }
    Ok(StepOutcome::Continue)
}

fn battle_aa(
    id: BattleId,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let battle = ctx.tracker.battle(id)?;
    let types = aa_types(ctx.state, battle.territory, battle.attacker, &battle.attacking, false)?;
    let steps: Vec<CombatStep> = types
        .into_iter()
        .map(|type_aa| CombatStep::FireAa {
            territory: battle.territory,
            type_aa,
            targets: battle.attacking.clone(),
            player: battle.attacker,
            battle: Some(id),
        })
        .collect();
    stack.push_all(steps);
    Ok(StepOutcome::Continue)
}

fn roll_side(
    id: BattleId,
    defending: bool,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let state = &*ctx.state;
    let battle = ctx.tracker.battle(id)?;
    let sides = Sides::of(battle, defending);
    if sides.other.is_empty() {
        return Ok(StepOutcome::Continue);
    }
    let air_only = matches!(battle.kind, BattleType::AirRaid | BattleType::AirBattle);
    let friendly: Vec<CombatUnit<'_>> = state
        .combat_units(&sides.friendly)?
        .into_iter()
        .filter(|u| !air_only || u.is_air())
        .collect();
    let Some(first) = friendly.first() else {
        return Ok(StepOutcome::Continue);
    };
    let enemy = state.combat_units(&sides.enemy)?;
    let site = state.territory(battle.territory)?;
    let roll_ctx = RollContext::new(ctx.rules, site, defending).with_support(
        state.support_rules(),
        &friendly,
        &enemy,
    );
    let annotation = format!(
        "{} roll {} dice in {}",
        player_name(state, first.owner()),
        if defending { "defense" } else { "attack" },
        site.name
    );
    let dice = if air_only {
        roll_air_battle(&friendly, &roll_ctx, &mut *ctx.random, &mut *ctx.history, &annotation)?
    } else {
        roll_dice(&friendly, &roll_ctx, &mut *ctx.random, &mut *ctx.history, &annotation)?
    };
    if dice.hits() > 0 || ctx.rules.edit_mode {
        stack.push(CombatStep::SelectBattleCasualties {
            battle: id,
            defending: !defending,
            dice,
        });
    }
    Ok(StepOutcome::Continue)
}

fn select_battle_casualties(
    id: BattleId,
    defending: bool,
    dice: &DiceRoll,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let state = &*ctx.state;
    let battle = ctx.tracker.battle(id)?;
    let sides = Sides::of(battle, defending);
    let targets = state.combat_units(sides.own)?;
    let Some(first) = targets.first() else {
        return Ok(StepOutcome::Continue);
    };
    let player = first.owner();
    let friendly = state.combat_units(&sides.friendly)?;
    let enemy = state.combat_units(&sides.enemy)?;
    let amphibious_land = if defending {
        Vec::new()
    } else {
        state.combat_units(&alive(state, &battle.amphibious_land))?
    };
    let site = state.territory(battle.territory)?;
    let query = CasualtyQuery {
        side: CasualtySide {
            player,
            rules: ctx.rules,
            support_rules: state.support_rules(),
            territory: site,
            defending,
            friendly: &friendly,
            enemy: &enemy,
            amphibious: !defending && battle.amphibious,
            amphibious_land: &amphibious_land,
        },
        targets: &targets,
        dice,
        message: format!(
            "{} select {} casualties in {}",
            player_name(state, player),
            dice.hits(),
            site.name
        ),
        battle: Some(id),
        extra_hits: dice.hits(),
        allow_multiple_hits_per_unit: true,
    };
    let details = match select_casualties(&query, &mut *ctx.oracle, &mut *ctx.cache)? {
        Decision::Ready(details) => details,
        Decision::Pending => return Ok(StepOutcome::Suspend),
    };
    let line = format!(
        "{} lose {} units in {}",
        player_name(state, player),
        details.killed.len(),
        site.name
    );

    // Killed units keep firing until the round ends; damage applies now.
    let damage = casualty_change(state, &CasualtyDetails::automatic(Vec::new(), details.damaged.clone()))?;
    ctx.state.apply(damage)?;
    let battle = ctx.tracker.battle_mut(id)?;
    let (own, dying) = if defending {
        (&mut battle.defending, &mut battle.defending_waiting_to_die)
    } else {
        (&mut battle.attacking, &mut battle.attacking_waiting_to_die)
    };
    own.retain(|u| !details.killed.contains(u));
    dying.extend(details.killed.iter().copied());
    ctx.history.record(
        &line,
        HistoryPayload::Casualties {
            killed: details.killed,
            damaged: details.damaged,
        },
    );
    Ok(StepOutcome::Continue)
}

fn end_round(
    id: BattleId,
    stack: &mut ExecutionStack<CombatStep>,
    ctx: &mut CombatContext<'_>,
) -> Result<StepOutcome> {
    let dead: Vec<UnitId> = {
        let battle = ctx.tracker.battle(id)?;
        battle
            .attacking_waiting_to_die
            .iter()
            .chain(&battle.defending_waiting_to_die)
            .copied()
            .collect()
    };
    let change = removal(ctx.state, &dead);
    ctx.state.apply(change)?;

    let state = &*ctx.state;
    let battle = ctx.tracker.battle_mut(id)?;
    battle.attacking_waiting_to_die.clear();
    battle.defending_waiting_to_die.clear();
    battle.round += 1;

    let can_hit = state
        .combat_units(&battle.attacking)?
        .iter()
        .any(|u| u.kind.strength(false) > 0)
        || state
            .combat_units(&battle.defending)?
            .iter()
            .any(|u| u.kind.strength(true) > 0);
    let limit = ctx.rules.max_battle_rounds;
    let fight_on = battle.kind == BattleType::Normal
        && !battle.attacking.is_empty()
        && !battle.defending.is_empty()
        && can_hit
        && (limit == 0 || battle.round < limit);
    tracing::debug!(battle = %id, round = battle.round, dead = dead.len(), fight_on, "round ended");
    if fight_on {
        stack.push_all(CombatStep::round(id));
    }
    Ok(StepOutcome::Continue)
}

fn bombing_raid_damage(id: BattleId, ctx: &mut CombatContext<'_>) -> Result<StepOutcome> {
    let (bombers, target, territory) = {
        let state = &*ctx.state;
        let battle = ctx.tracker.battle(id)?;
        let bombers = state
            .combat_units(&alive(state, &battle.attacking))?
            .iter()
            .filter(|u| u.kind.is_strategic_bomber)
            .count();
        let target = alive(state, &battle.bombing_targets).first().copied();
        (bombers, target, battle.territory)
    };
    let Some(target) = target else {
        return Ok(StepOutcome::Continue);
    };
    if bombers == 0 {
        return Ok(StepOutcome::Continue);
    }
    let name = ctx.state.territory(territory)?.name.clone();
    let dice = roll_n_dice(
        bombers,
        ctx.rules.dice_sides,
        &mut *ctx.random,
        &mut *ctx.history,
        &format!("Bombing raid in {name}"),
    )?;
    let rolled: u32 = dice.dice().iter().map(|d| d.value + 1).sum();

    let unit = ctx.state.combat_unit(target)?;
    let old = unit.unit.bombing_damage;
    let cap = unit.kind.max_damage;
    let new = if cap > 0 { (old + rolled).min(cap) } else { old + rolled };
    let line = format!("Bombing raid in {name} causes {} damage to {}", new - old, unit.kind.name);
    tracing::info!(battle = %id, %target, damage = new - old, "bombing raid resolved");
    let (_, mut bridge) = ctx.tracker_and_bridge();
    bridge.apply(Change::BombingDamage { unit: target, old, new }, &line)?;
    Ok(StepOutcome::Continue)
}

fn finish_battle(id: BattleId, ctx: &mut CombatContext<'_>) -> Result<StepOutcome> {
    let (kind, territory, attacker, attackers, defenders_left) = {
        let battle = ctx.tracker.battle(id)?;
        (
            battle.kind,
            battle.territory,
            battle.attacker,
            alive(ctx.state, &battle.attacking),
            !alive(ctx.state, &battle.defending).is_empty(),
        )
    };
    let state = &*ctx.state;
    let site = state.territory(territory)?;
    let may_take = !site.is_water
        && state.can_take_over(attacker, site.owner)
        && !state
            .enemy_units_in(territory, attacker)?
            .iter()
            .any(|u| !u.kind.is_infrastructure);
    let land_left = state.combat_units(&attackers)?.iter().any(CombatUnit::is_land);

    let outcome = match kind {
        BattleType::Finished => BattleOutcome::Conquered,
        BattleType::NonFighting => {
            if land_left && may_take {
                BattleOutcome::Conquered
            } else {
                BattleOutcome::NoCombat
            }
        }
        BattleType::Normal => match (attackers.is_empty(), defenders_left) {
            (false, false) if land_left && may_take => BattleOutcome::Conquered,
            (false, false) => BattleOutcome::AttackerWon,
            (true, true) => BattleOutcome::DefenderWon,
            _ => BattleOutcome::Draw,
        },
        BattleType::BombingRaid | BattleType::AirRaid | BattleType::AirBattle => {
            if attackers.is_empty() {
                BattleOutcome::DefenderWon
            } else {
                BattleOutcome::AttackerWon
            }
        }
    };
    let bombers: Vec<UnitId> = state
        .combat_units(&attackers)?
        .iter()
        .filter(|u| u.kind.is_strategic_bomber)
        .map(CombatUnit::id)
        .collect();
    let line = format!("{kind} in {} ends: {outcome:?}", site.name);

    let (tracker, mut bridge) = ctx.tracker_and_bridge();
    if outcome == BattleOutcome::Conquered && kind != BattleType::Finished {
        tracker.take_over(territory, attacker, &attackers, &mut bridge)?;
        tracker.add_to_conquered(territory);
    }
    if kind == BattleType::AirRaid && !bombers.is_empty() {
        let route = Route::new(territory, Vec::new());
        tracker.add_bombing_battle(&route, &bombers, attacker, &mut bridge)?;
    }
    bridge.note(&line);
    tracker.battle_mut(id)?.outcome = Some(outcome);
    tracker.remove_battle(id)?;
    Ok(StepOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::BattleTracker;
    use crate::casualty::OrderOfLossesCache;
    use crate::dice::ScriptedRandom;
    use crate::exec::ExecutionStatus;
    use crate::game::{AaStats, Domain, Player, Relationship, Territory, UnitType, UnitTypeId};
    use crate::history::HistoryLog;
    use crate::player::{AcceptDefaults, DeferredOracle, PlayerOracle};
    use crate::rules::BattleRules;
    use crate::error::CombatError;

    const GERMANS: PlayerId = PlayerId(1);
    const RUSSIANS: PlayerId = PlayerId(2);

    const POLAND: TerritoryId = TerritoryId(1);
    const KARELIA: TerritoryId = TerritoryId(2);
    const MOSCOW: TerritoryId = TerritoryId(3);

    const INFANTRY: UnitTypeId = UnitTypeId(1);
    const FIGHTER: UnitTypeId = UnitTypeId(2);
    const BOMBER: UnitTypeId = UnitTypeId(3);
    const FACTORY: UnitTypeId = UnitTypeId(4);
    const GUN: UnitTypeId = UnitTypeId(5);

    struct World {
        state: GameState,
        rules: BattleRules,
        tracker: BattleTracker,
        cache: OrderOfLossesCache,
        log: HistoryLog,
    }

    impl World {
        fn run(
            &mut self,
            stack: &mut ExecutionStack<CombatStep>,
            random: &mut ScriptedRandom,
            oracle: &mut dyn PlayerOracle,
        ) -> Result<ExecutionStatus> {
            let mut ctx = CombatContext::new(
                &mut self.state,
                &self.rules,
                random,
                &mut self.log,
                oracle,
                &mut self.cache,
                &mut self.tracker,
            );
            stack.execute(&mut ctx)
        }

        fn owner(&self, territory: TerritoryId) -> Option<PlayerId> {
            self.state.territory(territory).ok().and_then(|t| t.owner)
        }
    }

    fn world(place: impl FnOnce(&mut crate::game::GameStateBuilder)) -> World {
        let mut bomber = UnitType::new(BOMBER, "bomber", Domain::Air)
            .with_combat(4, 1)
            .with_air_combat(0, 0);
        bomber.is_strategic_bomber = true;
        let mut factory = UnitType::new(FACTORY, "factory", Domain::Land);
        factory.is_infrastructure = true;
        factory.can_be_damaged = true;
        factory.max_damage = 20;
        let mut gun = UnitType::new(GUN, "aa gun", Domain::Land).with_aa(AaStats::limited(1, 3));
        gun.is_infrastructure = true;

        let mut b = GameState::builder();
        b.unit_type(UnitType::new(INFANTRY, "infantry", Domain::Land).with_combat(1, 2))
            .unit_type(
                UnitType::new(FIGHTER, "fighter", Domain::Air)
                    .with_combat(3, 4)
                    .with_air_combat(1, 1),
            )
            .unit_type(bomber)
            .unit_type(factory)
            .unit_type(gun)
            .player(Player::new(GERMANS, "Germans").with_pus(40))
            .player(Player::new(RUSSIANS, "Russians").with_pus(24))
            .relationship(GERMANS, RUSSIANS, Relationship::War)
            .territory(Territory::land(POLAND, "Poland", Some(GERMANS)))
            .territory(Territory::land(KARELIA, "Karelia", Some(RUSSIANS)))
            .territory(Territory::land(MOSCOW, "Russia", Some(RUSSIANS)));
        place(&mut b);
        World {
            state: b.build().expect("board"),
            rules: BattleRules::default(),
            tracker: BattleTracker::new(),
            cache: OrderOfLossesCache::new(64),
            log: HistoryLog::new(),
        }
    }

    #[test]
    fn test_fly_over_aa_kills_before_arrival() {
        let mut fighters = Vec::new();
        let mut w = world(|b| {
            b.place(KARELIA, GUN, RUSSIANS, 1);
            b.place(MOSCOW, INFANTRY, RUSSIANS, 1);
            fighters = b.place(POLAND, FIGHTER, GERMANS, 2);
        });
        let mut stack = ExecutionStack::new();
        stack.push(CombatStep::combat_move(
            Route::new(POLAND, vec![KARELIA, MOSCOW]),
            fighters.clone(),
            GERMANS,
        ));
        let mut dice = ScriptedRandom::new([0, 5]);
        let status = w.run(&mut stack, &mut dice, &mut AcceptDefaults).expect("move");
        assert_eq!(status, ExecutionStatus::Completed);

        assert!(!w.state.is_alive(fighters[0]));
        assert_eq!(w.state.location_of(fighters[1]), Some(MOSCOW));
        let battle = w.tracker.get_pending_battle(MOSCOW, false, None).expect("battle");
        assert_eq!(battle.attacking, vec![fighters[1]]);
        // Air units alone never take Karelia.
        assert_eq!(w.owner(KARELIA), Some(RUSSIANS));
    }

    #[test]
    fn test_land_battle_conquers() {
        let mut infantry = Vec::new();
        let mut w = world(|b| {
            b.place(KARELIA, INFANTRY, RUSSIANS, 1);
            infantry = b.place(POLAND, INFANTRY, GERMANS, 2);
        });
        let mut stack = ExecutionStack::new();
        stack.push_all([
            CombatStep::combat_move(Route::direct(POLAND, KARELIA), infantry.clone(), GERMANS),
            CombatStep::FightBattles,
        ]);
        let mut dice = ScriptedRandom::new([0, 0, 5]);
        let status = w.run(&mut stack, &mut dice, &mut AcceptDefaults).expect("battle");
        assert_eq!(status, ExecutionStatus::Completed);

        assert_eq!(w.owner(KARELIA), Some(GERMANS));
        assert!(w.tracker.was_conquered(KARELIA));
        assert_eq!(w.state.enemy_units_in(KARELIA, GERMANS).map(|u| u.len()).ok(), Some(0));
        let record = w.tracker.records().last().cloned().expect("record");
        assert_eq!(record.outcome, BattleOutcome::Conquered);
        assert_eq!(record.rounds, 1);
        assert_eq!(dice.remaining(), 0);
    }

    #[test]
    fn test_round_limit_ends_in_draw() {
        let mut infantry = Vec::new();
        let mut w = world(|b| {
            b.place(KARELIA, INFANTRY, RUSSIANS, 1);
            infantry = b.place(POLAND, INFANTRY, GERMANS, 1);
        });
        w.rules.max_battle_rounds = 1;
        let mut stack = ExecutionStack::new();
        stack.push_all([
            CombatStep::combat_move(Route::direct(POLAND, KARELIA), infantry, GERMANS),
            CombatStep::FightBattles,
        ]);
        let mut dice = ScriptedRandom::new([5, 5]);
        w.run(&mut stack, &mut dice, &mut AcceptDefaults).expect("battle");

        assert_eq!(w.owner(KARELIA), Some(RUSSIANS));
        assert_eq!(w.tracker.records().last().map(|r| r.outcome), Some(BattleOutcome::Draw));
    }

    #[test]
    fn test_bombing_question_suspends_and_resumes() {
        let mut bombers = Vec::new();
        let mut factory = Vec::new();
        let mut w = world(|b| {
            factory = b.place(KARELIA, FACTORY, RUSSIANS, 1);
            bombers = b.place(POLAND, BOMBER, GERMANS, 1);
        });
        let mut stack = ExecutionStack::new();
        stack.push_all([
            CombatStep::combat_move(Route::direct(POLAND, KARELIA), bombers.clone(), GERMANS),
            CombatStep::FightBattles,
        ]);
        let mut oracle = DeferredOracle::new();
        let mut dice = ScriptedRandom::new([3]);
        let status = w.run(&mut stack, &mut dice, &mut oracle).expect("first run");
        assert_eq!(status, ExecutionStatus::Suspended);
        assert!(matches!(stack.current(), Some(CombatStep::PostAaFire { .. })));
        assert_eq!(w.state.location_of(bombers[0]), Some(POLAND));

        let bytes = stack.to_bytes().expect("encode");
        let mut restored: ExecutionStack<CombatStep> = ExecutionStack::from_bytes(&bytes).expect("decode");
        oracle.answer_confirm(true);
        let status = w.run(&mut restored, &mut dice, &mut oracle).expect("resume");
        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(w.state.unit(factory[0]).map(|u| u.bombing_damage).ok(), Some(4));
        assert_eq!(w.owner(KARELIA), Some(RUSSIANS));
        assert_eq!(
            w.tracker.records().last().map(|r| (r.kind, r.outcome)),
            Some((BattleType::BombingRaid, BattleOutcome::AttackerWon))
        );
    }

    #[test]
    fn test_air_raid_survivors_go_on_to_bomb() {
        let mut bombers = Vec::new();
        let mut factory = Vec::new();
        let mut w = world(|b| {
            factory = b.place(KARELIA, FACTORY, RUSSIANS, 1);
            b.place(KARELIA, FIGHTER, RUSSIANS, 1);
            bombers = b.place(POLAND, BOMBER, GERMANS, 1);
        });
        w.rules.raids_may_be_preceded_by_air_battles = true;
        let mut stack = ExecutionStack::new();
        stack.push_all([
            CombatStep::combat_move(Route::direct(POLAND, KARELIA), bombers.clone(), GERMANS),
            CombatStep::FightBattles,
        ]);
        // Interceptor misses, then the bomber rolls a 3.
        let mut dice = ScriptedRandom::new([5, 2]);
        w.run(&mut stack, &mut dice, &mut AcceptDefaults).expect("raid");

        let kinds: Vec<BattleType> = w.tracker.records().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![BattleType::AirRaid, BattleType::BombingRaid]);
        assert_eq!(w.state.unit(factory[0]).map(|u| u.bombing_damage).ok(), Some(3));
        assert!(w.state.is_alive(bombers[0]));
    }

    #[test]
    fn test_blocked_battle_refuses_to_fight() {
        let mut infantry = Vec::new();
        let mut bombers = Vec::new();
        let mut w = world(|b| {
            b.place(KARELIA, INFANTRY, RUSSIANS, 1);
            b.place(KARELIA, FACTORY, RUSSIANS, 1);
            infantry = b.place(POLAND, INFANTRY, GERMANS, 1);
            bombers = b.place(POLAND, BOMBER, GERMANS, 1);
        });
        let mut stack = ExecutionStack::new();
        stack.push_all([
            CombatStep::combat_move(Route::direct(POLAND, KARELIA), bombers, GERMANS),
            CombatStep::combat_move(Route::direct(POLAND, KARELIA), infantry, GERMANS),
        ]);
        let mut dice = ScriptedRandom::new(Vec::new());
        w.run(&mut stack, &mut dice, &mut AcceptDefaults).expect("moves");

        let land = w
            .tracker
            .get_pending_battle(KARELIA, false, None)
            .map(|b| b.id)
            .expect("land battle");
        stack.push(CombatStep::FightBattle { battle: land });
        let err = w.run(&mut stack, &mut dice, &mut AcceptDefaults).expect_err("blocked");
        assert!(matches!(
            err,
            CombatError::Consistency(ConsistencyViolation::BattleBlocked { .. })
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_damage_that_would_leave_no_hitpoints_is_fatal() {
        let mut infantry = Vec::new();
        let w = world(|b| infantry = b.place(KARELIA, INFANTRY, RUSSIANS, 1));
        let details = CasualtyDetails::automatic(Vec::new(), infantry);
        let err = casualty_change(&w.state, &details).expect_err("no spare hitpoint");
        assert!(matches!(
            err,
            CombatError::Consistency(ConsistencyViolation::InvalidChange(_))
        ));
    }
}
