//! The authoritative board graph.
//!
//! [`GameState`] exposes read-only accessors only. All mutation happens in
//! [`GameState::apply`], which validates each [`Change`] against the board
//! and appends it to the change log, so the log alone can replay, undo, or
//! transmit a turn.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use super::change::{Change, UnitFlag};
use super::ids::{PlayerId, TerritoryId, UnitId, UnitTypeId};
use super::player::{Player, Relationship};
use super::territory::Territory;
use super::unit::{CombatUnit, Unit, UnitType};
use crate::error::{CombatError, ConsistencyViolation, Result};
use crate::support::SupportRule;

/// Territories, units, players and relationships.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameState {
    unit_types: BTreeMap<UnitTypeId, UnitType>,
    units: BTreeMap<UnitId, Unit>,
    territories: BTreeMap<TerritoryId, Territory>,
    players: BTreeMap<PlayerId, Player>,
    relationships: BTreeMap<(PlayerId, PlayerId), Relationship>,
    locations: BTreeMap<UnitId, TerritoryId>,
    support_rules: Vec<SupportRule>,
    change_log: Vec<Change>,
}

fn invalid(message: String) -> CombatError {
    ConsistencyViolation::InvalidChange(message).into()
}

impl GameState {
    /// Start building a new board.
    #[must_use]
    pub fn builder() -> GameStateBuilder {
        GameStateBuilder::default()
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Unit type by id.
    pub fn unit_type(&self, id: UnitTypeId) -> Result<&UnitType> {
        self.unit_types
            .get(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownUnitType(id).into())
    }

    /// All unit types in id order.
    pub fn unit_types(&self) -> impl Iterator<Item = &UnitType> {
        self.unit_types.values()
    }

    /// Unit by id.
    pub fn unit(&self, id: UnitId) -> Result<&Unit> {
        self.units
            .get(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownUnit(id).into())
    }

    /// Territory by id.
    pub fn territory(&self, id: TerritoryId) -> Result<&Territory> {
        self.territories
            .get(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownTerritory(id).into())
    }

    /// All territories in id order.
    pub fn territories(&self) -> impl Iterator<Item = &Territory> {
        self.territories.values()
    }

    /// Player by id.
    pub fn player(&self, id: PlayerId) -> Result<&Player> {
        self.players
            .get(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownPlayer(id).into())
    }

    /// All players in id order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Support rules of the ruleset.
    #[must_use]
    pub fn support_rules(&self) -> &[SupportRule] {
        &self.support_rules
    }

    /// Territory the unit is in; `None` once removed from the board.
    #[must_use]
    pub fn location_of(&self, unit: UnitId) -> Option<TerritoryId> {
        self.locations.get(&unit).copied()
    }

    /// Whether the unit is still on the board.
    #[must_use]
    pub fn is_alive(&self, unit: UnitId) -> bool {
        self.locations.contains_key(&unit)
    }

    /// Borrowed combat view of one unit.
    pub fn combat_unit(&self, id: UnitId) -> Result<CombatUnit<'_>> {
        let unit = self.unit(id)?;
        let kind = self.unit_type(unit.unit_type)?;
        Ok(CombatUnit::new(unit, kind))
    }

    /// Borrowed combat views, preserving order.
    pub fn combat_units(&self, ids: &[UnitId]) -> Result<Vec<CombatUnit<'_>>> {
        ids.iter().map(|id| self.combat_unit(*id)).collect()
    }

    /// Every unit in a territory.
    pub fn units_in(&self, territory: TerritoryId) -> Result<Vec<CombatUnit<'_>>> {
        let t = self.territory(territory)?;
        self.combat_units(t.units())
    }

    // ========================================================================
    // Diplomacy
    // ========================================================================

    /// Relationship between two players. A player is always allied with itself.
    #[must_use]
    pub fn relationship(&self, a: PlayerId, b: PlayerId) -> Relationship {
        if a == b {
            return Relationship::Allied;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        self.relationships.get(&key).copied().unwrap_or_default()
    }

    /// Whether the two players are allied.
    #[must_use]
    pub fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool {
        self.relationship(a, b) == Relationship::Allied
    }

    /// Whether the two players are at war.
    #[must_use]
    pub fn is_at_war(&self, a: PlayerId, b: PlayerId) -> bool {
        self.relationship(a, b) == Relationship::War
    }

    /// Whether `attacker` may take over a territory held by `owner`.
    ///
    /// Unowned territory can always be taken.
    #[must_use]
    pub fn can_take_over(&self, attacker: PlayerId, owner: Option<PlayerId>) -> bool {
        owner.map_or(true, |o| self.is_at_war(attacker, o))
    }

    /// Units in `territory` at war with `player`.
    pub fn enemy_units_in(
        &self,
        territory: TerritoryId,
        player: PlayerId,
    ) -> Result<Vec<CombatUnit<'_>>> {
        Ok(self
            .units_in(territory)?
            .into_iter()
            .filter(|u| self.is_at_war(player, u.owner()))
            .collect())
    }

    /// Capitals of `player` that it currently owns.
    #[must_use]
    pub fn capitals_owned_by(&self, player: PlayerId) -> Vec<TerritoryId> {
        self.territories
            .values()
            .filter(|t| t.capital_of == Some(player) && t.owner == Some(player))
            .map(|t| t.id)
            .collect()
    }

    /// Every capital of `player`, whoever holds it.
    #[must_use]
    pub fn capitals_of(&self, player: PlayerId) -> Vec<TerritoryId> {
        self.territories
            .values()
            .filter(|t| t.capital_of == Some(player))
            .map(|t| t.id)
            .collect()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Validate and apply a change, appending it to the change log.
    ///
    /// A composite change is all-or-nothing: on failure every part already
    /// applied is rolled back before the error is returned.
    pub fn apply(&mut self, change: Change) -> Result<()> {
        if change.is_empty() {
            return Ok(());
        }
        self.apply_inner(&change)?;
        tracing::trace!(change = %change, "applied change");
        self.change_log.push(change);
        #[cfg(feature = "debug-validation")]
        self.check_locations()?;
        Ok(())
    }

    /// Changes applied so far, oldest first.
    #[must_use]
    pub fn change_log(&self) -> &[Change] {
        &self.change_log
    }

    /// Revert the most recent change, if any.
    pub fn undo_last(&mut self) -> Result<Option<Change>> {
        let Some(change) = self.change_log.pop() else {
            return Ok(None);
        };
        self.apply_inner(&change.invert())?;
        Ok(Some(change))
    }

    fn apply_inner(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::Owner {
                territory,
                old,
                new,
            } => {
                let t = self
                    .territories
                    .get_mut(territory)
                    .ok_or(ConsistencyViolation::UnknownTerritory(*territory))?;
                if t.owner != *old {
                    return Err(invalid(format!(
                        "{territory} owned by {:?}, change expected {old:?}",
                        t.owner
                    )));
                }
                t.owner = *new;
            }
            Change::Resource {
                player,
                resource,
                delta,
            } => {
                let p = self
                    .players
                    .get_mut(player)
                    .ok_or(ConsistencyViolation::UnknownPlayer(*player))?;
                let slot = p.resource_mut(*resource);
                let next = *slot + delta;
                if next < 0 {
                    return Err(invalid(format!(
                        "{player} {resource:?} would drop to {next}"
                    )));
                }
                *slot = next;
            }
            Change::AddUnits { territory, units } => {
                if !self.territories.contains_key(territory) {
                    return Err(ConsistencyViolation::UnknownTerritory(*territory).into());
                }
                let mut seen = BTreeSet::new();
                for unit in units {
                    if !self.units.contains_key(unit) {
                        return Err(ConsistencyViolation::UnknownUnit(*unit).into());
                    }
                    if let Some(at) = self.locations.get(unit) {
                        return Err(invalid(format!("{unit} is already in {at}")));
                    }
                    if !seen.insert(*unit) {
                        return Err(ConsistencyViolation::DuplicateUnits {
                            context: "add units".to_string(),
                            units: vec![*unit],
                        }
                        .into());
                    }
                }
                for unit in units {
                    self.locations.insert(*unit, *territory);
                }
                if let Some(t) = self.territories.get_mut(territory) {
                    t.units.extend(units.iter().copied());
                }
            }
            Change::RemoveUnits { territory, units } => {
                for unit in units {
                    if self.locations.get(unit) != Some(territory) {
                        return Err(invalid(format!("{unit} is not in {territory}")));
                    }
                }
                for unit in units {
                    self.locations.remove(unit);
                }
                let gone: BTreeSet<UnitId> = units.iter().copied().collect();
                if let Some(t) = self.territories.get_mut(territory) {
                    t.units.retain(|u| !gone.contains(u));
                }
            }
            Change::Hits { unit, old, new } => {
                let u = self.unit_mut(*unit)?;
                if u.hits != *old {
                    return Err(invalid(format!("{unit} has {} hits, expected {old}", u.hits)));
                }
                u.hits = *new;
            }
            Change::BombingDamage { unit, old, new } => {
                let u = self.unit_mut(*unit)?;
                if u.bombing_damage != *old {
                    return Err(invalid(format!(
                        "{unit} has {} bombing damage, expected {old}",
                        u.bombing_damage
                    )));
                }
                u.bombing_damage = *new;
            }
            Change::UnitOwner { unit, old, new } => {
                let u = self.unit_mut(*unit)?;
                if u.owner != *old {
                    return Err(invalid(format!("{unit} owned by {}, expected {old}", u.owner)));
                }
                u.owner = *new;
            }
            Change::Flag {
                unit,
                flag,
                old,
                new,
            } => {
                let u = self.unit_mut(*unit)?;
                let slot = match flag {
                    UnitFlag::Amphibious => &mut u.was_amphibious,
                    UnitFlag::InCombat => &mut u.was_in_combat,
                    UnitFlag::Disabled => &mut u.disabled,
                };
                if *slot != *old {
                    return Err(invalid(format!("{unit} {flag:?} is {slot}, expected {old}")));
                }
                *slot = *new;
            }
            Change::Composite(changes) => {
                for (index, part) in changes.iter().enumerate() {
                    if let Err(err) = self.apply_inner(part) {
                        for done in changes[..index].iter().rev() {
                            self.apply_inner(&done.invert())?;
                        }
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit> {
        self.units
            .get_mut(&id)
            .ok_or_else(|| ConsistencyViolation::UnknownUnit(id).into())
    }

    #[cfg(feature = "debug-validation")]
    fn check_locations(&self) -> Result<()> {
        for t in self.territories.values() {
            for unit in &t.units {
                if self.locations.get(unit) != Some(&t.id) {
                    return Err(ConsistencyViolation::IllegalState(format!(
                        "{unit} listed in {} but located elsewhere",
                        t.id
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Encode the board with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CombatError::serialization("game state", e))
    }

    /// Decode a board written by [`GameState::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CombatError::serialization("game state", e))
    }

    /// Hash of everything combat can change, in sorted order.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (id, unit) in &self.units {
            id.hash(&mut hasher);
            unit.hash(&mut hasher);
            self.locations.get(id).hash(&mut hasher);
        }
        for t in self.territories.values() {
            t.id.hash(&mut hasher);
            t.owner.hash(&mut hasher);
            t.units.hash(&mut hasher);
        }
        for p in self.players.values() {
            p.id.hash(&mut hasher);
            p.pus.hash(&mut hasher);
            p.tech_tokens.hash(&mut hasher);
            p.capture_vps.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Assembles an initial [`GameState`].
///
/// Unit ids are handed out sequentially from 1 in placement order.
#[derive(Debug, Default)]
pub struct GameStateBuilder {
    state: GameState,
    next_unit: u32,
    errors: Vec<String>,
}

impl GameStateBuilder {
    /// Register a unit type.
    pub fn unit_type(&mut self, kind: UnitType) -> &mut Self {
        let id = kind.id;
        if self.state.unit_types.insert(id, kind).is_some() {
            self.errors.push(format!("duplicate unit type {id}"));
        }
        self
    }

    /// Register a player.
    pub fn player(&mut self, player: Player) -> &mut Self {
        let id = player.id;
        if self.state.players.insert(id, player).is_some() {
            self.errors.push(format!("duplicate player {id}"));
        }
        self
    }

    /// Register a territory. Any unit list on the input is ignored.
    pub fn territory(&mut self, mut territory: Territory) -> &mut Self {
        territory.units.clear();
        let id = territory.id;
        if self.state.territories.insert(id, territory).is_some() {
            self.errors.push(format!("duplicate territory {id}"));
        }
        self
    }

    /// Set the symmetric relationship between two players.
    pub fn relationship(&mut self, a: PlayerId, b: PlayerId, rel: Relationship) -> &mut Self {
        let key = if a < b { (a, b) } else { (b, a) };
        self.state.relationships.insert(key, rel);
        self
    }

    /// Register a support rule.
    pub fn support_rule(&mut self, rule: SupportRule) -> &mut Self {
        self.state.support_rules.push(rule);
        self
    }

    /// Place `count` new units and return their ids.
    pub fn place(
        &mut self,
        territory: TerritoryId,
        unit_type: UnitTypeId,
        owner: PlayerId,
        count: u32,
    ) -> Vec<UnitId> {
        (0..count)
            .map(|_| {
                self.next_unit += 1;
                let id = UnitId(self.next_unit);
                self.place_unit(territory, Unit::new(id, unit_type, owner));
                id
            })
            .collect()
    }

    /// Place a pre-built unit.
    pub fn place_unit(&mut self, territory: TerritoryId, unit: Unit) -> &mut Self {
        let id = unit.id;
        self.next_unit = self.next_unit.max(id.0);
        if self.state.units.insert(id, unit).is_some() {
            self.errors.push(format!("duplicate unit {id}"));
        }
        match self.state.territories.get_mut(&territory) {
            Some(t) => {
                t.units.push(id);
                self.state.locations.insert(id, territory);
            }
            None => self.errors.push(format!("{id} placed in unknown {territory}")),
        }
        self
    }

    /// Validate references and produce the board.
    pub fn build(self) -> Result<GameState> {
        let mut errors = self.errors;
        let state = self.state;
        for unit in state.units.values() {
            if !state.unit_types.contains_key(&unit.unit_type) {
                errors.push(format!("{} has unknown {}", unit.id, unit.unit_type));
            }
            if !state.players.contains_key(&unit.owner) {
                errors.push(format!("{} owned by unknown {}", unit.id, unit.owner));
            }
        }
        for t in state.territories.values() {
            for p in [t.owner, t.original_owner, t.capital_of].into_iter().flatten() {
                if !state.players.contains_key(&p) {
                    errors.push(format!("{} references unknown {p}", t.id));
                }
            }
        }
        for rule in &state.support_rules {
            if !state.unit_types.contains_key(&rule.supporter) {
                errors.push(format!(
                    "support rule '{}' has unknown supporter {}",
                    rule.name, rule.supporter
                ));
            }
        }
        if errors.is_empty() {
            Ok(state)
        } else {
            Err(CombatError::Data {
                source_name: "game state".to_string(),
                message: errors.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Domain, Resource};

    fn small_board() -> (GameState, Vec<UnitId>) {
        let mut b = GameState::builder();
        b.unit_type(UnitType::new(UnitTypeId(1), "infantry", Domain::Land).with_combat(1, 2))
            .player(Player::new(PlayerId(1), "Germans").with_pus(10))
            .player(Player::new(PlayerId(2), "Russians"))
            .territory(Territory::land(TerritoryId(1), "Poland", Some(PlayerId(1))))
            .territory(Territory::land(TerritoryId(2), "Belorussia", Some(PlayerId(2))));
        let units = b.place(TerritoryId(1), UnitTypeId(1), PlayerId(1), 2);
        (b.build().expect("valid board"), units)
    }

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let (state, units) = small_board();
        assert_eq!(units, vec![UnitId(1), UnitId(2)]);
        assert_eq!(state.location_of(UnitId(2)), Some(TerritoryId(1)));
    }

    #[test]
    fn test_builder_rejects_unknown_type() {
        let mut b = GameState::builder();
        b.player(Player::new(PlayerId(1), "Germans"))
            .territory(Territory::land(TerritoryId(1), "Poland", None));
        b.place(TerritoryId(1), UnitTypeId(9), PlayerId(1), 1);
        assert!(matches!(b.build(), Err(CombatError::Data { .. })));
    }

    #[test]
    fn test_apply_move_and_undo() {
        let (mut state, units) = small_board();
        state
            .apply(Change::move_units(TerritoryId(1), TerritoryId(2), units.clone()))
            .expect("move");
        assert_eq!(state.location_of(units[0]), Some(TerritoryId(2)));
        assert_eq!(state.change_log().len(), 1);

        state.undo_last().expect("undo");
        assert_eq!(state.location_of(units[0]), Some(TerritoryId(1)));
        assert!(state.change_log().is_empty());
    }

    #[test]
    fn test_stale_change_is_fatal() {
        let (mut state, _) = small_board();
        let err = state
            .apply(Change::Owner {
                territory: TerritoryId(1),
                old: Some(PlayerId(2)),
                new: Some(PlayerId(1)),
            })
            .expect_err("owner mismatch");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_composite_rolls_back_on_failure() {
        let (mut state, units) = small_board();
        let before = state.state_hash();
        let result = state.apply(Change::Composite(vec![
            Change::Resource {
                player: PlayerId(1),
                resource: Resource::Pus,
                delta: -5,
            },
            Change::RemoveUnits {
                territory: TerritoryId(2),
                units: vec![units[0]],
            },
        ]));
        assert!(result.is_err());
        assert_eq!(state.state_hash(), before);
        assert_eq!(state.player(PlayerId(1)).map(|p| p.pus).ok(), Some(10));
    }

    #[test]
    fn test_resource_cannot_go_negative() {
        let (mut state, _) = small_board();
        assert!(state
            .apply(Change::Resource {
                player: PlayerId(2),
                resource: Resource::Pus,
                delta: -1,
            })
            .is_err());
    }

    #[test]
    fn test_bytes_round_trip_preserves_hash() {
        let (state, _) = small_board();
        let bytes = state.to_bytes().expect("encode");
        let restored = GameState::from_bytes(&bytes).expect("decode");
        assert_eq!(restored.state_hash(), state.state_hash());
    }

    #[test]
    fn test_default_relationship_is_war() {
        let (state, _) = small_board();
        assert!(state.is_at_war(PlayerId(1), PlayerId(2)));
        assert!(state.is_allied(PlayerId(1), PlayerId(1)));
        assert!(state.can_take_over(PlayerId(1), None));
    }
}
