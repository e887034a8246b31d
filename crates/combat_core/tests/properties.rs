//! Property tests over random armies, guns and rolls.

use combat_core::casualty::{
    select_casualties, sort_for_casualties, CasualtyQuery, CasualtySide, OrderOfLossesCache,
};
use combat_core::dice::{
    aa_power_and_rolls, low_luck_hits, roll_dice, total_aa_attacks, AaFirePlan, DiceRoll,
    RollContext, SeededRandom,
};
use combat_core::game::{
    total_hit_points, AaStats, CombatUnit, Domain, GameState, Player, PlayerId, Territory,
    TerritoryId, UnitId, UnitType, UnitTypeId,
};
use combat_core::history::HistoryLog;
use combat_core::math::{ratio, Fixed};
use combat_core::player::{AcceptDefaults, Decision};
use combat_core::rules::BattleRules;
use combat_test_utils::determinism::strategies::{
    arb_counts, arb_dice_sides, arb_hits, arb_land_types, arb_seed,
};
use proptest::prelude::*;

const OWNER: PlayerId = PlayerId(1);
const FIELD: TerritoryId = TerritoryId(1);

/// One territory holding `counts[i]` units of `types[i]`.
fn board(types: &[UnitType], counts: &[u32]) -> GameState {
    let mut b = GameState::builder();
    b.player(Player::new(OWNER, "Defender"));
    b.territory(Territory::land(FIELD, "Field", Some(OWNER)));
    for kind in types {
        b.unit_type(kind.clone());
    }
    for (kind, count) in types.iter().zip(counts) {
        b.place(FIELD, kind.id, OWNER, *count);
    }
    b.build().expect("board")
}

fn side<'a>(
    rules: &'a BattleRules,
    state: &'a GameState,
    units: &'a [CombatUnit<'a>],
) -> CasualtySide<'a> {
    CasualtySide {
        player: OWNER,
        rules,
        support_rules: state.support_rules(),
        territory: state.territory(FIELD).expect("field"),
        defending: true,
        friendly: units,
        enemy: &[],
        amphibious: false,
        amphibious_land: &[],
    }
}

fn ids(units: &[CombatUnit<'_>]) -> Vec<UnitId> {
    units.iter().map(CombatUnit::id).collect()
}

/// Gun of type `id` with the given attack, shot cap and overstack flag.
fn gun(id: u32, attack: i32, shots: Option<u32>, overstack: bool) -> UnitType {
    let stats = match shots {
        Some(n) => AaStats::limited(attack, n),
        None => AaStats::infinite(attack),
    };
    let stats = if overstack { stats.overstacking() } else { stats };
    let mut kind = UnitType::new(UnitTypeId(id), format!("gun{id}"), Domain::Land).with_aa(stats);
    kind.is_infrastructure = true;
    kind
}

fn arb_guns() -> impl Strategy<Value = Vec<UnitType>> {
    prop::collection::vec(
        (0i32..=3, prop::option::of(1u32..=4), any::<bool>()),
        1..=5,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .zip(1u32..)
            .map(|((attack, shots, overstack), id)| gun(id, attack, shots, overstack))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // =========================================================================
    // Casualties
    // =========================================================================

    #[test]
    fn casualties_remove_exactly_the_hits_scored(
        types in arb_land_types(3),
        counts in arb_counts(3, 4),
        hits in arb_hits(),
    ) {
        let state = board(&types, &counts);
        let targets = state.units_in(FIELD).expect("units");
        prop_assume!(!targets.is_empty());
        let rules = BattleRules::default();
        let dice = DiceRoll::new(Vec::new(), hits, Fixed::ZERO);
        let query = CasualtyQuery {
            side: side(&rules, &state, &targets),
            targets: &targets,
            dice: &dice,
            message: String::new(),
            battle: None,
            extra_hits: hits,
            allow_multiple_hits_per_unit: true,
        };

        let mut cache = OrderOfLossesCache::new(16);
        let Decision::Ready(details) = select_casualties(&query, &mut AcceptDefaults, &mut cache)
            .expect("selection")
        else {
            panic!("defaults never suspend");
        };

        let removed: u32 = details
            .killed
            .iter()
            .map(|id| state.combat_unit(*id).map_or(0, |u| u.hit_points_left()))
            .sum::<u32>()
            + u32::try_from(details.damaged.len()).expect("small");
        prop_assert_eq!(removed, hits.min(total_hit_points(&targets)));
        for id in &details.damaged {
            prop_assert!(!details.killed.contains(id));
            let spare = state.combat_unit(*id).expect("unit").hit_points_left() - 1;
            prop_assert!(details.damage_to(*id) <= spare as usize);
        }
    }

    #[test]
    fn cached_order_matches_fresh_order(
        types in arb_land_types(3),
        counts in arb_counts(3, 5),
    ) {
        let state = board(&types, &counts);
        let targets = state.units_in(FIELD).expect("units");
        let rules = BattleRules::default();
        let side = side(&rules, &state, &targets);

        let mut cache = OrderOfLossesCache::new(64);
        let cold = ids(&sort_for_casualties(&targets, &side, &mut cache));
        let warm = ids(&sort_for_casualties(&targets, &side, &mut cache));
        let fresh = ids(&sort_for_casualties(&targets, &side, &mut OrderOfLossesCache::new(64)));

        prop_assert_eq!(cold.len(), targets.len());
        prop_assert_eq!(&cold, &warm);
        prop_assert_eq!(&cold, &fresh);
    }

    // =========================================================================
    // Dice
    // =========================================================================

    #[test]
    fn low_luck_hits_stay_within_one_of_the_quotient(
        power in 0u32..200,
        sides in arb_dice_sides(),
        seed in arb_seed(),
    ) {
        let mut random = SeededRandom::new(seed);
        let (dice, hits) = low_luck_hits(power, sides, &mut random, "low luck").expect("roll");
        let whole = power / sides;
        prop_assert!(hits == whole || hits == whole + 1);
        if power % sides == 0 {
            prop_assert!(dice.is_empty());
            prop_assert_eq!(hits, whole);
        } else {
            prop_assert_eq!(dice.len(), 1);
        }
    }

    #[test]
    fn low_luck_roll_expects_power_over_sides(
        types in arb_land_types(3),
        counts in arb_counts(3, 6),
        seed in arb_seed(),
    ) {
        let state = board(&types, &counts);
        let units = state.units_in(FIELD).expect("units");
        let rules = BattleRules { low_luck: true, ..BattleRules::default() };
        let territory = state.territory(FIELD).expect("field");
        let ctx = RollContext::new(&rules, territory, false);
        let power: u32 = units
            .iter()
            .map(|u| u32::try_from(u.kind.strength(false).clamp(0, 6)).expect("clamped"))
            .sum();

        let mut random = SeededRandom::new(seed);
        let mut history = HistoryLog::new();
        let roll = roll_dice(&units, &ctx, &mut random, &mut history, "attack").expect("roll");
        prop_assert_eq!(roll.expected_hits(), ratio(power, rules.dice_sides));
        let whole = power / rules.dice_sides;
        prop_assert!(roll.hits() == whole || roll.hits() == whole + 1);
    }

    #[test]
    fn aa_groups_add_up_to_the_capped_total(
        guns in arb_guns(),
        targets in 0u32..12,
    ) {
        let counts = vec![1; guns.len()];
        let state = board(&guns, &counts);
        let units = state.units_in(FIELD).expect("guns");
        let rules = BattleRules::default();
        let territory = state.territory(FIELD).expect("field");
        let ctx = RollContext::new(&rules, territory, true);
        let map = aa_power_and_rolls(&units, &ctx);

        let plan = AaFirePlan::new(&map, targets).expect("groups reconcile");
        let (normal, infinite, overstack) = plan.group_attacks();
        let total = total_aa_attacks(&map, targets);
        prop_assert_eq!(normal + infinite + overstack, total);
        prop_assert_eq!(plan.shots().len(), total as usize);
        prop_assert!(normal + infinite <= targets);
    }
}
