//! Order-of-losses benchmarks for combat_core.
//!
//! Run with: `cargo bench -p combat_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use combat_core::casualty::{sort_for_casualties, CasualtySide, OrderOfLossesCache};
use combat_core::game::CombatUnit;
use combat_test_utils::fixtures::players::RUSSIANS;
use combat_test_utils::fixtures::territories::KARELIA;
use combat_test_utils::fixtures::unit_types::{ARMOUR, ARTILLERY, FIGHTER, INFANTRY};
use combat_test_utils::fixtures::{eastern_front, placement, Battlefield};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn defenders() -> Battlefield {
    let mut data = eastern_front();
    data.placements.extend([
        placement(KARELIA, INFANTRY, RUSSIANS, 12),
        placement(KARELIA, ARTILLERY, RUSSIANS, 6),
        placement(KARELIA, ARMOUR, RUSSIANS, 6),
        placement(KARELIA, FIGHTER, RUSSIANS, 4),
    ]);
    Battlefield::new(data)
}

fn side<'a>(field: &'a Battlefield, units: &'a [CombatUnit<'a>]) -> CasualtySide<'a> {
    CasualtySide {
        player: RUSSIANS,
        rules: &field.rules,
        support_rules: field.state.support_rules(),
        territory: field.state.territory(KARELIA).expect("territory"),
        defending: true,
        friendly: units,
        enemy: &[],
        amphibious: false,
        amphibious_land: &[],
    }
}

/// Sorts a mixed stack of defenders with a cold and a warm cache.
pub fn casualty_order_benchmark(c: &mut Criterion) {
    let field = defenders();
    let units = field.state.units_in(KARELIA).expect("units");
    let side = side(&field, &units);

    c.bench_function("sort_for_casualties_cold", |b| {
        b.iter(|| {
            let mut cache = OrderOfLossesCache::new(field.rules.order_of_losses_cache_capacity);
            black_box(sort_for_casualties(black_box(&units), &side, &mut cache))
        })
    });

    let mut cache = OrderOfLossesCache::new(field.rules.order_of_losses_cache_capacity);
    let _ = sort_for_casualties(&units, &side, &mut cache);
    c.bench_function("sort_for_casualties_warm", |b| {
        b.iter(|| black_box(sort_for_casualties(black_box(&units), &side, &mut cache)))
    });
}

criterion_group!(benches, casualty_order_benchmark);
criterion_main!(benches);
