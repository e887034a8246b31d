//! A single battle waiting to be fought.

use serde::{Deserialize, Serialize};

use super::kind::{BattleId, BattleOutcome, BattleStatus, BattleType};
use crate::error::Result;
use crate::game::{Change, GameState, PlayerId, Route, TerritoryId, UnitFlag, UnitId};

/// One battle at one site.
///
/// Created on the first attack into a territory. Later attacks into the
/// same site join it. Defending units are collected when the battle is
/// fought, not when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battle {
    /// Identifier.
    pub id: BattleId,
    /// Site.
    pub territory: TerritoryId,
    /// Attacking player.
    pub attacker: PlayerId,
    /// Players defending the site when the battle was created.
    pub defenders: Vec<PlayerId>,
    /// Battle kind.
    pub kind: BattleType,
    /// Attacking units still in the fight.
    pub attacking: Vec<UnitId>,
    /// Defending units still in the fight.
    pub defending: Vec<UnitId>,
    /// Attacking land units that came from the sea.
    pub amphibious_land: Vec<UnitId>,
    /// Whether any attack was amphibious.
    pub amphibious: bool,
    /// Lifecycle.
    pub status: BattleStatus,
    /// Rounds fought so far.
    pub round: u32,
    /// Attackers hit this round, removed at round end.
    pub attacking_waiting_to_die: Vec<UnitId>,
    /// Defenders hit this round, removed at round end.
    pub defending_waiting_to_die: Vec<UnitId>,
    /// Units a bombing raid damages.
    pub bombing_targets: Vec<UnitId>,
    /// Result, once fought.
    pub outcome: Option<BattleOutcome>,
}

impl Battle {
    /// New, unregistered battle.
    #[must_use]
    pub fn new(id: BattleId, territory: TerritoryId, attacker: PlayerId, kind: BattleType) -> Self {
        Self {
            id,
            territory,
            attacker,
            defenders: Vec::new(),
            kind,
            attacking: Vec::new(),
            defending: Vec::new(),
            amphibious_land: Vec::new(),
            amphibious: false,
            status: BattleStatus::Created,
            round: 0,
            attacking_waiting_to_die: Vec::new(),
            defending_waiting_to_die: Vec::new(),
            bombing_targets: Vec::new(),
            outcome: None,
        }
    }

    /// Whether no attackers remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attacking.is_empty() && self.attacking_waiting_to_die.is_empty()
    }

    /// Whether the battle is still waiting to be fought.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.status, BattleStatus::Created | BattleStatus::Pending)
    }

    /// Add attackers arriving along `route`.
    ///
    /// Returns the board change the attack implies. Only normal battles
    /// produce one: land units unloading from the sea are flagged amphibious.
    pub(crate) fn add_attack(
        &mut self,
        route: &Route,
        units: &[UnitId],
        state: &GameState,
    ) -> Result<Change> {
        let unload = self.kind == BattleType::Normal && route.is_unload(state)?;
        let mut flags = Vec::new();
        for id in units {
            if self.attacking.contains(id) {
                continue;
            }
            self.attacking.push(*id);
            if !unload {
                continue;
            }
            let unit = state.combat_unit(*id)?;
            if unit.is_land() {
                self.amphibious = true;
                self.amphibious_land.push(*id);
                if !unit.unit.was_amphibious {
                    flags.push(Change::Flag {
                        unit: *id,
                        flag: UnitFlag::Amphibious,
                        old: false,
                        new: true,
                    });
                }
            }
        }
        Ok(Change::composite(flags))
    }

    /// Withdraw attackers, e.g. when their move is undone.
    pub(crate) fn remove_attack(&mut self, units: &[UnitId]) {
        self.attacking.retain(|u| !units.contains(u));
        self.amphibious_land.retain(|u| !units.contains(u));
        self.amphibious = !self.amphibious_land.is_empty();
    }

    /// Summary kept after the battle leaves the tracker.
    #[must_use]
    pub fn record(&self) -> BattleRecord {
        BattleRecord {
            id: self.id,
            kind: self.kind,
            territory: self.territory,
            attacker: self.attacker,
            status: self.status,
            rounds: self.round,
            outcome: self.outcome.unwrap_or(BattleOutcome::NoCombat),
        }
    }
}

/// What remains of a battle once it is fought or cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleRecord {
    /// Identifier.
    pub id: BattleId,
    /// Battle kind.
    pub kind: BattleType,
    /// Site.
    pub territory: TerritoryId,
    /// Attacking player.
    pub attacker: PlayerId,
    /// Final status.
    pub status: BattleStatus,
    /// Rounds fought.
    pub rounds: u32,
    /// Result.
    pub outcome: BattleOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Domain, Player, Territory, UnitType, UnitTypeId};

    fn landing() -> (GameState, Vec<UnitId>) {
        let mut b = GameState::builder();
        b.unit_type(UnitType::new(UnitTypeId(1), "infantry", Domain::Land).with_combat(1, 2))
            .unit_type(UnitType::new(UnitTypeId(2), "fighter", Domain::Air).with_combat(3, 4))
            .player(Player::new(PlayerId(1), "Americans"))
            .player(Player::new(PlayerId(2), "Japanese"))
            .territory(Territory::sea(TerritoryId(1), "Sea Zone 6"))
            .territory(Territory::land(TerritoryId(2), "Okinawa", Some(PlayerId(2))));
        let mut units = b.place(TerritoryId(1), UnitTypeId(1), PlayerId(1), 2);
        units.extend(b.place(TerritoryId(1), UnitTypeId(2), PlayerId(1), 1));
        (b.build().expect("board"), units)
    }

    #[test]
    fn test_unload_flags_land_units_amphibious() {
        let (state, units) = landing();
        let mut battle = Battle::new(BattleId(1), TerritoryId(2), PlayerId(1), BattleType::Normal);
        let change = battle
            .add_attack(&Route::direct(TerritoryId(1), TerritoryId(2)), &units, &state)
            .expect("attack");
        assert!(battle.amphibious);
        assert_eq!(battle.amphibious_land, vec![units[0], units[1]]);
        assert!(matches!(change, Change::Composite(ref parts) if parts.len() == 2));
    }

    #[test]
    fn test_joining_twice_does_not_duplicate() {
        let (state, units) = landing();
        let mut battle = Battle::new(BattleId(1), TerritoryId(2), PlayerId(1), BattleType::Normal);
        let route = Route::direct(TerritoryId(1), TerritoryId(2));
        battle.add_attack(&route, &units, &state).expect("attack");
        battle.add_attack(&route, &units, &state).expect("attack again");
        assert_eq!(battle.attacking.len(), 3);
    }

    #[test]
    fn test_raids_produce_no_change() {
        let (state, units) = landing();
        let mut raid = Battle::new(BattleId(1), TerritoryId(2), PlayerId(1), BattleType::BombingRaid);
        let change = raid
            .add_attack(&Route::direct(TerritoryId(1), TerritoryId(2)), &units[2..], &state)
            .expect("attack");
        assert!(change.is_empty());
    }

    #[test]
    fn test_remove_attack_empties_battle() {
        let (state, units) = landing();
        let mut battle = Battle::new(BattleId(1), TerritoryId(2), PlayerId(1), BattleType::Normal);
        battle
            .add_attack(&Route::direct(TerritoryId(1), TerritoryId(2)), &units, &state)
            .expect("attack");
        battle.remove_attack(&units);
        assert!(battle.is_empty());
        assert!(!battle.amphibious);
    }
}
