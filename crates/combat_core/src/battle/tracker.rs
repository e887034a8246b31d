//! Pending battles and the order they must be fought in.
//!
//! The tracker owns every battle created during a combat move phase and a
//! dependency map from each blocked battle to the battles it waits on. Raids
//! resolve before the ground battle at the same site, and an amphibious
//! landing waits for the sea battle it sails from. The graph is acyclic;
//! adding an edge that would close a cycle is a consistency violation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::bridge::Bridge;
use super::kind::{BattleId, BattleStatus, BattleType};
use super::pending::{Battle, BattleRecord};
use super::takeover::{run_rules, standard_rules, TakeOver};
use crate::error::{CombatError, ConsistencyViolation, Result};
use crate::game::{Change, GameState, PlayerId, Route, TerritoryId, UnitFlag, UnitId};

/// Pending battles, their dependencies, and this phase's conquests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BattleTracker {
    pending: BTreeMap<BattleId, Battle>,
    /// Blocked battle to the battles it waits on.
    dependencies: BTreeMap<BattleId, BTreeSet<BattleId>>,
    conquered: BTreeSet<TerritoryId>,
    blitzed: BTreeSet<TerritoryId>,
    fought: BTreeSet<TerritoryId>,
    records: Vec<BattleRecord>,
    next_id: u64,
}

fn expect_empty(change: &Change, battle: BattleId) -> Result<()> {
    if change.is_empty() {
        Ok(())
    } else {
        Err(ConsistencyViolation::UnexpectedChange(format!("joining {battle} produced {change}")).into())
    }
}

fn has_enemy_combat_units(state: &GameState, territory: TerritoryId, player: PlayerId) -> Result<bool> {
    Ok(state
        .enemy_units_in(territory, player)?
        .iter()
        .any(|u| !u.kind.is_infrastructure))
}

fn has_enemy_air(state: &GameState, territory: TerritoryId, player: PlayerId) -> Result<bool> {
    Ok(state.enemy_units_in(territory, player)?.iter().any(|u| u.is_air()))
}

/// Whether `player` would take `territory` just by entering it.
fn conquerable(state: &GameState, territory: TerritoryId, player: PlayerId) -> Result<bool> {
    let t = state.territory(territory)?;
    if t.is_water && t.owner.is_none() {
        return Ok(false);
    }
    if !state.can_take_over(player, t.owner) {
        return Ok(false);
    }
    Ok(!has_enemy_combat_units(state, territory, player)?)
}

impl BattleTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Pending battle by id.
    pub fn battle(&self, id: BattleId) -> Result<&Battle> {
        self.pending
            .get(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownBattle(id).into())
    }

    /// Pending battle by id, for the steps that fight it.
    pub fn battle_mut(&mut self, id: BattleId) -> Result<&mut Battle> {
        self.pending
            .get_mut(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownBattle(id).into())
    }

    /// All pending battles in id order.
    pub fn pending_battles(&self) -> impl Iterator<Item = &Battle> {
        self.pending.values()
    }

    /// The pending battle at `territory` in the bombing or non-bombing slot,
    /// optionally of one kind. Without a kind the lowest id wins.
    #[must_use]
    pub fn get_pending_battle(
        &self,
        territory: TerritoryId,
        bombing: bool,
        kind: Option<BattleType>,
    ) -> Option<&Battle> {
        self.pending.values().find(|b| {
            b.territory == territory
                && b.kind.is_bombing_run() == bombing
                && kind.map_or(true, |k| b.kind.matches(k))
                && b.is_open()
        })
    }

    /// Territories with a pending battle in the given slot.
    #[must_use]
    pub fn pending_battle_sites(&self, bombing: bool) -> BTreeSet<TerritoryId> {
        self.pending
            .values()
            .filter(|b| b.kind.is_bombing_run() == bombing)
            .map(|b| b.territory)
            .collect()
    }

    /// Non-empty battles `blocked` still waits on.
    #[must_use]
    pub fn get_dependent_on(&self, blocked: BattleId) -> Vec<BattleId> {
        self.dependencies
            .get(&blocked)
            .map(|blocking| {
                blocking
                    .iter()
                    .copied()
                    .filter(|id| self.pending.get(id).is_some_and(|b| !b.is_empty()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Battles waiting on `blocking`.
    #[must_use]
    pub fn get_blocked(&self, blocking: BattleId) -> Vec<BattleId> {
        self.dependencies
            .keys()
            .copied()
            .filter(|blocked| self.get_dependent_on(*blocked).contains(&blocking))
            .collect()
    }

    /// Whether `id` is pending and waits on nothing.
    #[must_use]
    pub fn is_ready(&self, id: BattleId) -> bool {
        self.pending.get(&id).is_some_and(Battle::is_open) && self.get_dependent_on(id).is_empty()
    }

    /// Battles that may be fought now, in fight order.
    #[must_use]
    pub fn ready_battles(&self) -> Vec<BattleId> {
        let mut ready: Vec<&Battle> = self
            .pending
            .values()
            .filter(|b| self.is_ready(b.id))
            .collect();
        ready.sort_by_key(|b| (b.kind.phase(), b.id));
        ready.into_iter().map(|b| b.id).collect()
    }

    /// The battle to fight next: air raids, then bombing raids, then air
    /// battles, then everything else, lowest id first within a phase.
    #[must_use]
    pub fn next_battle(&self) -> Option<BattleId> {
        self.ready_battles().into_iter().next()
    }

    /// Whether `territory` was taken this phase.
    #[must_use]
    pub fn was_conquered(&self, territory: TerritoryId) -> bool {
        self.conquered.contains(&territory)
    }

    /// Whether `territory` was blitzed this phase.
    #[must_use]
    pub fn was_blitzed(&self, territory: TerritoryId) -> bool {
        self.blitzed.contains(&territory)
    }

    /// Whether a battle in `territory` was fought this phase.
    #[must_use]
    pub fn was_battle_fought(&self, territory: TerritoryId) -> bool {
        self.fought.contains(&territory)
    }

    /// Territories taken this phase.
    #[must_use]
    pub fn conquered(&self) -> &BTreeSet<TerritoryId> {
        &self.conquered
    }

    /// Record that `territory` was taken.
    pub fn add_to_conquered(&mut self, territory: TerritoryId) {
        self.conquered.insert(territory);
    }

    /// Summaries of battles that left the tracker.
    #[must_use]
    pub fn records(&self) -> &[BattleRecord] {
        &self.records
    }

    /// Hand the summaries over, e.g. to the turn history.
    pub fn take_records(&mut self) -> Vec<BattleRecord> {
        std::mem::take(&mut self.records)
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    /// Make `blocked` wait for `blocking`.
    pub fn add_dependency(&mut self, blocked: BattleId, blocking: BattleId) -> Result<()> {
        for id in [blocked, blocking] {
            if !self.pending.contains_key(&id) {
                return Err(ConsistencyViolation::UnknownBattle(id).into());
            }
        }
        if blocked == blocking || self.depends_on(blocking, blocked) {
            return Err(ConsistencyViolation::DependencyCycle { blocked, blocking }.into());
        }
        self.dependencies.entry(blocked).or_default().insert(blocking);
        tracing::debug!(%blocked, %blocking, "battle dependency added");
        Ok(())
    }

    /// Whether `from` waits, directly or not, on `target`.
    fn depends_on(&self, from: BattleId, target: BattleId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(blocking) = self.dependencies.get(&current) {
                if blocking.contains(&target) {
                    return true;
                }
                stack.extend(blocking.iter().copied());
            }
        }
        false
    }

    /// Drop every edge touching `id`.
    fn detach(&mut self, id: BattleId) {
        self.dependencies.remove(&id);
        for blocking in self.dependencies.values_mut() {
            blocking.remove(&id);
        }
        self.dependencies.retain(|_, blocking| !blocking.is_empty());
    }

    // ========================================================================
    // Creation
    // ========================================================================

    fn create(
        &mut self,
        territory: TerritoryId,
        attacker: PlayerId,
        kind: BattleType,
        state: &GameState,
    ) -> Result<BattleId> {
        self.next_id += 1;
        let id = BattleId(self.next_id);
        let mut battle = Battle::new(id, territory, attacker, kind);
        let site = state.territory(territory)?;
        let mut defenders: BTreeSet<PlayerId> = state
            .enemy_units_in(territory, attacker)?
            .iter()
            .map(|u| u.owner())
            .collect();
        if let Some(owner) = site.owner.filter(|o| state.is_at_war(attacker, *o)) {
            defenders.insert(owner);
        }
        battle.defenders = defenders.into_iter().collect();
        battle.status = BattleStatus::Pending;
        tracing::info!(battle = %id, %kind, territory = %territory, %attacker, "battle created");
        self.pending.insert(id, battle);
        Ok(id)
    }

    fn join(&mut self, id: BattleId, route: &Route, units: &[UnitId], state: &GameState) -> Result<Change> {
        self.battle_mut(id)?.add_attack(route, units, state)
    }

    /// Register `units` moving along `route` into combat.
    ///
    /// Bombing runs create or join a raid (preceded by an air raid when the
    /// ruleset asks for one and interceptors are present). Other moves join
    /// or create the ground battle, optionally preceded by an air battle, and
    /// conquer empty enemy territory along the way.
    pub fn add_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        bombing: bool,
        attacker: PlayerId,
        bridge: &mut Bridge<'_>,
    ) -> Result<()> {
        let site = route.end();
        if bombing {
            if bridge.rules.raids_may_be_preceded_by_air_battles
                && has_enemy_air(bridge.state, site, attacker)?
            {
                self.add_air_battle(route, units, attacker, true, bridge)?;
            } else {
                self.add_bombing_battle(route, units, attacker, bridge)?;
            }
            let flags: Vec<Change> = bridge
                .state
                .combat_units(units)?
                .iter()
                .filter(|u| !u.unit.was_in_combat)
                .map(|u| Change::Flag {
                    unit: u.id(),
                    flag: UnitFlag::InCombat,
                    old: false,
                    new: true,
                })
                .collect();
            bridge.state.apply(Change::composite(flags))?;
            return Ok(());
        }

        let movers = bridge.state.combat_units(units)?;
        let escorts: Vec<UnitId> = movers.iter().filter(|u| u.is_air()).map(|u| u.id()).collect();
        let land_or_sea = movers.iter().any(|u| u.is_land() || u.is_sea());
        if bridge.rules.battles_may_be_preceded_by_air_battles
            && !escorts.is_empty()
            && has_enemy_air(bridge.state, site, attacker)?
        {
            self.add_air_battle(route, &escorts, attacker, false, bridge)?;
        }
        self.add_must_fight_battle(route, units, attacker, bridge)?;
        if land_or_sea {
            self.add_empty_battle(route, units, attacker, bridge)?;
        }
        Ok(())
    }

    /// Create or join the bombing raid at the end of `route`.
    ///
    /// Ground and air battles at the site wait for the raid.
    pub fn add_bombing_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        attacker: PlayerId,
        bridge: &mut Bridge<'_>,
    ) -> Result<BattleId> {
        let site = route.end();
        let id = match self.get_pending_battle(site, true, Some(BattleType::BombingRaid)) {
            Some(existing) => existing.id,
            None => self.create(site, attacker, BattleType::BombingRaid, bridge.state)?,
        };
        let change = self.join(id, route, units, bridge.state)?;
        expect_empty(&change, id)?;

        let targets: Vec<UnitId> = bridge
            .state
            .enemy_units_in(site, attacker)?
            .iter()
            .filter(|u| u.kind.can_be_damaged)
            .map(|u| u.id())
            .collect();
        self.battle_mut(id)?.bombing_targets = targets;

        for kind in [BattleType::Normal, BattleType::AirBattle] {
            if let Some(dependent) = self.get_pending_battle(site, false, Some(kind)).map(|b| b.id) {
                self.add_dependency(dependent, id)?;
            }
        }
        Ok(id)
    }

    fn add_air_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        attacker: PlayerId,
        bombing: bool,
        bridge: &mut Bridge<'_>,
    ) -> Result<BattleId> {
        let site = route.end();
        let kind = if bombing {
            BattleType::AirRaid
        } else {
            BattleType::AirBattle
        };
        let id = match self.get_pending_battle(site, bombing, Some(kind)) {
            Some(existing) => existing.id,
            None => self.create(site, attacker, kind, bridge.state)?,
        };
        let change = self.join(id, route, units, bridge.state)?;
        expect_empty(&change, id)?;

        if bombing {
            for kind in [BattleType::Normal, BattleType::AirBattle] {
                if let Some(dependent) = self.get_pending_battle(site, false, Some(kind)).map(|b| b.id) {
                    self.add_dependency(dependent, id)?;
                }
            }
        } else {
            for kind in [BattleType::AirRaid, BattleType::BombingRaid] {
                if let Some(raid) = self.get_pending_battle(site, true, Some(kind)).map(|b| b.id) {
                    self.add_dependency(id, raid)?;
                }
            }
            if let Some(normal) = self.get_pending_battle(site, false, Some(BattleType::Normal)).map(|b| b.id) {
                self.add_dependency(normal, id)?;
            }
        }
        Ok(id)
    }

    /// The sea battle an unload must wait for.
    fn amphibious_precedent(&self, route: &Route, state: &GameState) -> Result<Option<BattleId>> {
        if !route.is_unload(state)? {
            return Ok(None);
        }
        Ok(self
            .get_pending_battle(route.start(), false, Some(BattleType::Normal))
            .map(|b| b.id))
    }

    fn add_must_fight_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        attacker: PlayerId,
        bridge: &mut Bridge<'_>,
    ) -> Result<Option<BattleId>> {
        let site = route.end();
        if !has_enemy_combat_units(bridge.state, site, attacker)? {
            return Ok(None);
        }
        let id = match self.get_pending_battle(site, false, Some(BattleType::Normal)) {
            Some(existing) => existing.id,
            None => self.create(site, attacker, BattleType::Normal, bridge.state)?,
        };
        let change = self.join(id, route, units, bridge.state)?;
        let line = join_description(route, bridge.state)?;
        bridge.apply(change, line)?;

        let has_land = bridge.state.combat_units(units)?.iter().any(|u| u.is_land());
        if has_land {
            if let Some(precede) = self.amphibious_precedent(route, bridge.state)? {
                self.add_dependency(id, precede)?;
            }
        }
        for kind in [BattleType::AirRaid, BattleType::BombingRaid] {
            if let Some(raid) = self.get_pending_battle(site, true, Some(kind)).map(|b| b.id) {
                self.add_dependency(id, raid)?;
            }
        }
        if let Some(air) = self.get_pending_battle(site, false, Some(BattleType::AirBattle)).map(|b| b.id) {
            self.add_dependency(id, air)?;
        }
        Ok(Some(id))
    }

    fn add_empty_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        attacker: PlayerId,
        bridge: &mut Bridge<'_>,
    ) -> Result<()> {
        let movers = bridge.state.combat_units(units)?;
        if movers.iter().all(|u| u.is_air()) {
            return Ok(());
        }
        let has_land = movers.iter().any(|u| u.is_land());
        let end = route.end();

        let mut passed = Vec::new();
        if has_land {
            for step in route.steps() {
                if *step != end && conquerable(bridge.state, *step, attacker)? {
                    passed.push(*step);
                }
            }
            if route.start() != end && conquerable(bridge.state, route.start(), attacker)? {
                passed.push(route.start());
            }
        }
        for territory in passed {
            self.conquer(territory, route, units, attacker, bridge)?;
        }

        if !conquerable(bridge.state, end, attacker)? {
            return Ok(());
        }
        let precede = match self.amphibious_precedent(route, bridge.state)? {
            Some(id) => Some(id),
            None => self.get_pending_battle(end, true, None).map(|b| b.id),
        };
        match precede {
            Some(precede) => {
                let id = match self.get_pending_battle(end, false, Some(BattleType::Normal)) {
                    Some(existing) => existing.id,
                    None => self.create(end, attacker, BattleType::NonFighting, bridge.state)?,
                };
                let change = self.join(id, route, units, bridge.state)?;
                let line = join_description(route, bridge.state)?;
                bridge.apply(change, line)?;
                self.add_dependency(id, precede)?;
            }
            None => self.conquer(end, route, units, attacker, bridge)?,
        }
        Ok(())
    }

    /// Take an empty territory on the way: a finished battle plus take-over.
    fn conquer(
        &mut self,
        territory: TerritoryId,
        route: &Route,
        units: &[UnitId],
        attacker: PlayerId,
        bridge: &mut Bridge<'_>,
    ) -> Result<()> {
        if bridge.state.territory(territory)?.owner.is_some() {
            self.blitzed.insert(territory);
        }
        self.conquered.insert(territory);
        let id = match self.get_pending_battle(territory, false, Some(BattleType::Normal)) {
            Some(existing) => existing.id,
            None => self.create(territory, attacker, BattleType::Finished, bridge.state)?,
        };
        let change = self.join(id, route, units, bridge.state)?;
        bridge.apply(change, "Units land amphibiously")?;
        self.take_over(territory, attacker, units, bridge)
    }

    /// Hand `territory` to `attacker` (or whoever the capture rules say).
    pub fn take_over(
        &self,
        territory: TerritoryId,
        attacker: PlayerId,
        arriving: &[UnitId],
        bridge: &mut Bridge<'_>,
    ) -> Result<()> {
        let mut take = TakeOver::new(territory, attacker, arriving);
        take.bombing_raid_pending = self.get_pending_battle(territory, true, None).is_some();
        run_rules(&standard_rules(), &mut take, bridge)?;
        tracing::info!(%territory, %attacker, owner = ?take.new_owner, "take over resolved");
        Ok(())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove a fought battle and release the battles waiting on it.
    ///
    /// Returns the battles that became ready.
    pub fn remove_battle(&mut self, id: BattleId) -> Result<Vec<BattleId>> {
        let waiting: Vec<BattleId> = self
            .dependencies
            .iter()
            .filter(|(_, blocking)| blocking.contains(&id))
            .map(|(blocked, _)| *blocked)
            .collect();
        let mut battle = self
            .pending
            .remove(&id)
            .ok_or(ConsistencyViolation::UnknownBattle(id))?;
        self.detach(id);
        battle.status = BattleStatus::Fought;
        self.fought.insert(battle.territory);
        tracing::info!(battle = %id, territory = %battle.territory, outcome = ?battle.outcome, "battle removed");
        self.records.push(battle.record());
        Ok(waiting.into_iter().filter(|b| self.is_ready(*b)).collect())
    }

    /// Drop a battle without fighting it. Unknown ids are ignored.
    ///
    /// Returns the battles that became ready.
    pub fn cancel_battle(&mut self, id: BattleId) -> Vec<BattleId> {
        let waiting: Vec<BattleId> = self
            .dependencies
            .iter()
            .filter(|(_, blocking)| blocking.contains(&id))
            .map(|(blocked, _)| *blocked)
            .collect();
        let Some(mut battle) = self.pending.remove(&id) else {
            return Vec::new();
        };
        self.detach(id);
        battle.status = BattleStatus::Cancelled;
        tracing::info!(battle = %id, territory = %battle.territory, "battle cancelled");
        self.records.push(battle.record());
        waiting.into_iter().filter(|b| self.is_ready(*b)).collect()
    }

    /// Reverse [`add_battle`](Self::add_battle) for an undone move.
    ///
    /// The units leave every battle past the route start, battles left
    /// without attackers disappear, and route territories no longer held by
    /// an ally of `player` stop counting as conquered.
    pub fn undo_battle(
        &mut self,
        route: &Route,
        units: &[UnitId],
        player: PlayerId,
        bridge: &mut Bridge<'_>,
    ) -> Result<()> {
        let affected: Vec<BattleId> = self
            .pending
            .values()
            .filter(|b| b.territory != route.start() && b.attacking.iter().any(|u| units.contains(u)))
            .map(|b| b.id)
            .collect();
        for id in affected {
            let battle = self.battle_mut(id)?;
            battle.remove_attack(units);
            if battle.is_empty() {
                self.pending.remove(&id);
                self.detach(id);
                tracing::debug!(battle = %id, "battle emptied by undo");
            }
        }

        for territory in route.all_territories() {
            if !self.conquered.contains(&territory) {
                continue;
            }
            let owner = bridge.state.territory(territory)?.owner;
            if !owner.is_some_and(|o| bridge.state.is_allied(o, player)) {
                self.conquered.remove(&territory);
                self.blitzed.remove(&territory);
            }
        }

        let flags: Vec<Change> = bridge
            .state
            .combat_units(units)?
            .iter()
            .filter(|u| u.unit.was_in_combat)
            .map(|u| Change::Flag {
                unit: u.id(),
                flag: UnitFlag::InCombat,
                old: true,
                new: false,
            })
            .collect();
        bridge.state.apply(Change::composite(flags))
    }

    /// End of phase: forget every battle, edge and conquest.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.dependencies.clear();
        self.conquered.clear();
        self.blitzed.clear();
        self.fought.clear();
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CombatError::serialization("battle tracker", e))
    }

    /// Decode a tracker written by [`BattleTracker::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CombatError::serialization("battle tracker", e))
    }
}

/// History line for units joining a ground battle.
fn join_description(route: &Route, state: &GameState) -> Result<&'static str> {
    Ok(if route.is_unload(state)? {
        "Units land amphibiously"
    } else {
        "Units join the battle"
    })
}
