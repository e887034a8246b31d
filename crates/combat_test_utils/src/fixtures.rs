//! Test fixtures and helpers.
//!
//! A small eastern-front board with the usual unit types, and a
//! [`Battlefield`] that owns everything a combat run needs.

use combat_core::battle::BattleTracker;
use combat_core::casualty::OrderOfLossesCache;
use combat_core::data::{Placement, RelationshipData, ScenarioData};
use combat_core::dice::RandomSource;
use combat_core::error::Result;
use combat_core::exec::{CombatContext, CombatStep, ExecutionStack, ExecutionStatus};
use combat_core::game::{
    AaStats, Domain, GameState, Player, PlayerId, Relationship, Route, Territory, TerritoryId,
    UnitId, UnitType, UnitTypeId,
};
use combat_core::history::HistoryLog;
use combat_core::math::Fixed;
use combat_core::player::PlayerOracle;
use combat_core::rules::BattleRules;
use combat_core::support::SupportRule;

use crate::determinism::compute_hash;

/// Player ids on the standard board.
pub mod players {
    use super::PlayerId;

    /// Germans.
    pub const GERMANS: PlayerId = PlayerId(1);
    /// Russians.
    pub const RUSSIANS: PlayerId = PlayerId(2);
    /// British, allied with the Russians.
    pub const BRITISH: PlayerId = PlayerId(3);
}

/// Territory ids on the standard board.
pub mod territories {
    use super::TerritoryId;

    /// German capital.
    pub const GERMANY: TerritoryId = TerritoryId(1);
    /// German-owned, borders Karelia and the Baltic.
    pub const POLAND: TerritoryId = TerritoryId(2);
    /// Russian-owned front line.
    pub const KARELIA: TerritoryId = TerritoryId(3);
    /// Russian capital.
    pub const RUSSIA: TerritoryId = TerritoryId(4);
    /// Sea zone off Poland and Karelia.
    pub const BALTIC_SEA: TerritoryId = TerritoryId(5);
    /// Russian-owned, behind Karelia.
    pub const ARCHANGEL: TerritoryId = TerritoryId(6);
    /// Russian-owned, far east.
    pub const NOVOSIBIRSK: TerritoryId = TerritoryId(7);
    /// British capital.
    pub const UNITED_KINGDOM: TerritoryId = TerritoryId(8);
}

/// Unit type ids for [`standard_unit_types`].
pub mod unit_types {
    use super::UnitTypeId;

    /// 1/2 land.
    pub const INFANTRY: UnitTypeId = UnitTypeId(1);
    /// 2/2 land, supports infantry on attack.
    pub const ARTILLERY: UnitTypeId = UnitTypeId(2);
    /// 3/3 land.
    pub const ARMOUR: UnitTypeId = UnitTypeId(3);
    /// 3/4 air.
    pub const FIGHTER: UnitTypeId = UnitTypeId(4);
    /// 4/1 air, strategic bomber.
    pub const BOMBER: UnitTypeId = UnitTypeId(5);
    /// 2/2 sea.
    pub const DESTROYER: UnitTypeId = UnitTypeId(6);
    /// 0/0 sea transport.
    pub const TRANSPORT: UnitTypeId = UnitTypeId(7);
    /// 4/4 sea, two hit points.
    pub const BATTLESHIP: UnitTypeId = UnitTypeId(8);
    /// Land AA gun, three shots at 1.
    pub const AA_GUN: UnitTypeId = UnitTypeId(9);
    /// Damageable factory.
    pub const FACTORY: UnitTypeId = UnitTypeId(10);
}

use players::{BRITISH, GERMANS, RUSSIANS};
use territories::{
    ARCHANGEL, BALTIC_SEA, GERMANY, KARELIA, NOVOSIBIRSK, POLAND, RUSSIA, UNITED_KINGDOM,
};
use unit_types::{
    AA_GUN, ARMOUR, ARTILLERY, BATTLESHIP, BOMBER, DESTROYER, FACTORY, FIGHTER, INFANTRY,
    TRANSPORT,
};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> Fixed {
    Fixed::from_num(n)
}

/// The standard unit types.
#[must_use]
pub fn standard_unit_types() -> Vec<UnitType> {
    let mut bomber = UnitType::new(BOMBER, "bomber", Domain::Air)
        .with_combat(4, 1)
        .with_air_combat(1, 0)
        .with_cost(12, 6);
    bomber.is_strategic_bomber = true;

    let mut transport = UnitType::new(TRANSPORT, "transport", Domain::Sea).with_cost(7, 2);
    transport.is_transport = true;

    let mut aa_gun = UnitType::new(AA_GUN, "aaGun", Domain::Land)
        .with_cost(5, 1)
        .with_aa(AaStats::limited(1, 3));
    aa_gun.is_infrastructure = true;

    let mut factory = UnitType::new(FACTORY, "factory", Domain::Land).with_cost(15, 0);
    factory.is_infrastructure = true;
    factory.can_be_damaged = true;
    factory.max_damage = 20;

    vec![
        UnitType::new(INFANTRY, "infantry", Domain::Land)
            .with_combat(1, 2)
            .with_cost(3, 1),
        UnitType::new(ARTILLERY, "artillery", Domain::Land)
            .with_combat(2, 2)
            .with_cost(4, 1),
        UnitType::new(ARMOUR, "armour", Domain::Land)
            .with_combat(3, 3)
            .with_cost(5, 2),
        UnitType::new(FIGHTER, "fighter", Domain::Air)
            .with_combat(3, 4)
            .with_air_combat(1, 1)
            .with_cost(10, 4),
        bomber,
        UnitType::new(DESTROYER, "destroyer", Domain::Sea)
            .with_combat(2, 2)
            .with_cost(8, 2),
        transport,
        UnitType::new(BATTLESHIP, "battleship", Domain::Sea)
            .with_combat(4, 4)
            .with_hit_points(2)
            .with_cost(20, 2),
        aa_gun,
        factory,
    ]
}

/// Artillery gives +1 attack to one infantry each.
#[must_use]
pub fn artillery_support() -> SupportRule {
    SupportRule::new("artillery", ARTILLERY, vec![INFANTRY], 1)
}

/// Germans against Russians and British, nothing placed yet.
#[must_use]
pub fn eastern_front() -> ScenarioData {
    ScenarioData {
        name: "Eastern front".to_string(),
        rules: BattleRules::default(),
        unit_types: standard_unit_types(),
        support_rules: vec![artillery_support()],
        players: vec![
            Player::new(GERMANS, "Germans").with_pus(40),
            Player::new(RUSSIANS, "Russians").with_pus(24),
            Player::new(BRITISH, "British").with_pus(30),
        ],
        relationships: vec![
            RelationshipData {
                a: GERMANS,
                b: RUSSIANS,
                relationship: Relationship::War,
            },
            RelationshipData {
                a: GERMANS,
                b: BRITISH,
                relationship: Relationship::War,
            },
            RelationshipData {
                a: RUSSIANS,
                b: BRITISH,
                relationship: Relationship::Allied,
            },
        ],
        territories: vec![
            Territory::land(GERMANY, "Germany", Some(GERMANS))
                .with_capital(GERMANS)
                .with_production(10),
            Territory::land(POLAND, "Poland", Some(GERMANS)).with_production(2),
            Territory::land(KARELIA, "Karelia", Some(RUSSIANS)).with_production(2),
            Territory::land(RUSSIA, "Russia", Some(RUSSIANS))
                .with_capital(RUSSIANS)
                .with_production(8),
            Territory::sea(BALTIC_SEA, "Baltic Sea"),
            Territory::land(ARCHANGEL, "Archangel", Some(RUSSIANS)).with_production(2),
            Territory::land(NOVOSIBIRSK, "Novosibirsk", Some(RUSSIANS)).with_production(1),
            Territory::land(UNITED_KINGDOM, "United Kingdom", Some(BRITISH))
                .with_capital(BRITISH)
                .with_production(8),
        ],
        placements: Vec::new(),
    }
}

/// `count` units of `unit_type` for `owner` in `territory`.
#[must_use]
pub fn placement(
    territory: TerritoryId,
    unit_type: UnitTypeId,
    owner: PlayerId,
    count: u32,
) -> Placement {
    Placement {
        territory,
        unit_type,
        owner,
        count,
    }
}

/// Board, ruleset and session state for one combat run.
#[derive(Debug)]
pub struct Battlefield {
    /// The board.
    pub state: GameState,
    /// Ruleset.
    pub rules: BattleRules,
    /// Pending battles.
    pub tracker: BattleTracker,
    /// Casualty ordering cache.
    pub cache: OrderOfLossesCache,
    /// Everything narrated so far.
    pub history: HistoryLog,
}

impl Battlefield {
    /// Build from scenario data.
    ///
    /// # Panics
    ///
    /// Panics if the scenario does not validate.
    #[must_use]
    pub fn new(data: ScenarioData) -> Self {
        let (state, rules) = data.into_state().expect("scenario should build");
        Self {
            cache: OrderOfLossesCache::new(rules.order_of_losses_cache_capacity),
            state,
            rules,
            tracker: BattleTracker::new(),
            history: HistoryLog::new(),
        }
    }

    /// Units of `unit_type` in `territory`, in id order.
    #[must_use]
    pub fn units(&self, territory: TerritoryId, unit_type: UnitTypeId) -> Vec<UnitId> {
        self.state
            .units_in(territory)
            .map(|units| {
                units
                    .iter()
                    .filter(|u| u.type_id() == unit_type)
                    .map(|u| u.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current owner of `territory`.
    #[must_use]
    pub fn owner(&self, territory: TerritoryId) -> Option<PlayerId> {
        self.state.territory(territory).ok().and_then(|t| t.owner)
    }

    /// PUs in `player`'s treasury.
    #[must_use]
    pub fn pus(&self, player: PlayerId) -> i32 {
        self.state.player(player).map_or(0, |p| p.pus)
    }

    /// Run `stack` until it completes or suspends.
    pub fn run(
        &mut self,
        stack: &mut ExecutionStack<CombatStep>,
        random: &mut dyn RandomSource,
        oracle: &mut dyn PlayerOracle,
    ) -> Result<ExecutionStatus> {
        let mut ctx = CombatContext::new(
            &mut self.state,
            &self.rules,
            random,
            &mut self.history,
            oracle,
            &mut self.cache,
            &mut self.tracker,
        );
        stack.execute(&mut ctx)
    }

    /// Hash of the board, the tracker and the narration.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let tracker = self.tracker.to_bytes().unwrap_or_default();
        let lines: Vec<&str> = self.history.descriptions().collect();
        compute_hash(&(self.state.state_hash(), tracker, lines))
    }
}

/// A stack holding one combat move followed by fighting every battle.
#[must_use]
pub fn move_and_fight(route: Route, units: Vec<UnitId>, player: PlayerId) -> ExecutionStack<CombatStep> {
    let mut stack = ExecutionStack::new();
    stack.push_all([
        CombatStep::combat_move(route, units, player),
        CombatStep::FightBattles,
    ]);
    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eastern_front_validates() {
        let data = eastern_front();
        assert!(data.validate().is_empty(), "Errors: {:?}", data.validate());
    }

    #[test]
    fn test_battlefield_places_units() {
        let mut data = eastern_front();
        data.placements.push(placement(KARELIA, INFANTRY, RUSSIANS, 3));
        data.placements.push(placement(KARELIA, AA_GUN, RUSSIANS, 1));
        let field = Battlefield::new(data);
        assert_eq!(field.units(KARELIA, INFANTRY).len(), 3);
        assert_eq!(field.units(KARELIA, AA_GUN).len(), 1);
        assert_eq!(field.owner(KARELIA), Some(RUSSIANS));
        assert_eq!(field.pus(GERMANS), 40);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Battlefield::new(eastern_front());
        let b = Battlefield::new(eastern_front());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
