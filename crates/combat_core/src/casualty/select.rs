//! Choosing which units die or take damage.

use std::collections::BTreeSet;

use super::details::CasualtyDetails;
use super::order::{sort_for_casualties, CasualtySide, OrderOfLossesCache};
use crate::battle::BattleId;
use crate::dice::{ensure_unique, DiceRoll};
use crate::error::{ConsistencyViolation, Result, RuleRejection};
use crate::game::{total_hit_points, CombatUnit, UnitId, UnitTypeId};
use crate::player::{CasualtyRequest, Decision, PlayerOracle};

/// One request to take casualties.
#[derive(Debug, Clone)]
pub struct CasualtyQuery<'a> {
    /// The side taking the hits.
    pub side: CasualtySide<'a>,
    /// Units the hits may fall on; a subset of `side.friendly`.
    pub targets: &'a [CombatUnit<'a>],
    /// The roll that scored the hits.
    pub dice: &'a DiceRoll,
    /// Prompt shown to a selecting player.
    pub message: String,
    /// Battle, or `None` for AA fire in movement.
    pub battle: Option<BattleId>,
    /// Hits that apply when transport casualties are restricted.
    pub extra_hits: u32,
    /// Multi-hitpoint units absorb hits before dying.
    pub allow_multiple_hits_per_unit: bool,
}

/// Suggested casualties: multi-hitpoint units soak hits first, then units
/// die in `sorted` order.
#[must_use]
pub fn default_casualties(sorted: &[CombatUnit<'_>], hits: u32, allow_multiple_hits_per_unit: bool) -> CasualtyDetails {
    let mut details = CasualtyDetails::automatic(Vec::new(), Vec::new());
    let mut selected = 0_u32;
    if allow_multiple_hits_per_unit {
        for unit in sorted {
            if selected >= hits {
                return details;
            }
            let spare = unit.hit_points_left().saturating_sub(1);
            for _ in 0..spare.min(hits - selected) {
                details.add_damaged(unit.id());
                selected += 1;
            }
        }
    }
    for unit in sorted {
        if selected >= hits {
            break;
        }
        details.add_killed(unit.id());
        selected += 1;
    }
    details
}

/// Replace killed land units that could still retreat with same-type units
/// that landed from the sea and are stuck in the battle.
pub fn kill_amphibious_first(killed: &mut [UnitId], targets: &[CombatUnit<'_>]) {
    let find = |id: UnitId| targets.iter().find(|u| u.id() == id);
    let could_retreat: Vec<usize> = killed
        .iter()
        .enumerate()
        .filter(|(_, id)| find(**id).is_some_and(|u| u.is_land() && !u.unit.was_amphibious))
        .map(|(i, _)| i)
        .collect();
    if could_retreat.is_empty() {
        return;
    }
    let mut stuck: Vec<CombatUnit<'_>> = targets
        .iter()
        .filter(|u| u.unit.was_amphibious && !killed.contains(&u.id()))
        .copied()
        .collect();
    let mut stuck_types: BTreeSet<UnitTypeId> = stuck.iter().map(CombatUnit::type_id).collect();

    for index in could_retreat {
        let Some(kind) = find(killed[index]).map(CombatUnit::type_id) else { continue };
        if !stuck_types.contains(&kind) {
            continue;
        }
        if let Some(pos) = stuck.iter().position(|u| u.type_id() == kind) {
            killed[index] = stuck.remove(pos).id();
        }
        if !stuck.iter().any(|u| u.type_id() == kind) {
            stuck_types.remove(&kind);
        }
    }
}

/// Select casualties for `query.dice`.
///
/// Exactly `min(hits, total hitpoints)` hitpoints are taken unless edit
/// mode is on. Player answers that do not add up are reported back and
/// asked again, up to `casualty_selection_retries` times.
pub fn select_casualties(
    query: &CasualtyQuery<'_>,
    oracle: &mut dyn PlayerOracle,
    cache: &mut OrderOfLossesCache,
) -> Result<Decision<CasualtyDetails>> {
    let side = &query.side;
    let rules = side.rules;
    let targets = query.targets;
    if targets.is_empty() {
        return Ok(Decision::Ready(CasualtyDetails::new()));
    }
    let missing: Vec<UnitId> = targets
        .iter()
        .map(CombatUnit::id)
        .filter(|id| !side.friendly.iter().any(|f| f.id() == *id))
        .collect();
    if !missing.is_empty() {
        return Err(ConsistencyViolation::MissingTarget(missing).into());
    }
    ensure_unique(targets, "casualty targets")?;

    if rules.edit_mode {
        let request = request(query, targets.iter().map(CombatUnit::id).collect(), 0, CasualtyDetails::new());
        return Ok(match oracle.select_casualties(&request) {
            Decision::Ready(mut details) => {
                if rules.partial_amphibious_retreat {
                    kill_amphibious_first(&mut details.killed, targets);
                }
                Decision::Ready(details)
            }
            Decision::Pending => Decision::Pending,
        });
    }

    if query.dice.hits() == 0 {
        return Ok(Decision::Ready(CasualtyDetails::automatic(Vec::new(), Vec::new())));
    }
    let hits = if rules.transport_casualties_restricted {
        query.extra_hits
    } else {
        query.dice.hits()
    };

    if targets.iter().all(|u| u.same_category(&targets[0]) && u.hit_points_left() <= 1) {
        let killed = targets.iter().take(hits as usize).map(CombatUnit::id).collect();
        return Ok(Decision::Ready(CasualtyDetails::automatic(killed, Vec::new())));
    }

    let sorted = sort_for_casualties(targets, side, cache);
    let defaults = default_casualties(&sorted, hits, query.allow_multiple_hits_per_unit);
    let total = if query.allow_multiple_hits_per_unit {
        total_hit_points(&sorted)
    } else {
        u32::try_from(sorted.len()).unwrap_or(u32::MAX)
    };
    let expected = hits.min(total);
    let sorted_ids: Vec<UnitId> = sorted.iter().map(CombatUnit::id).collect();

    let attempts = rules.casualty_selection_retries.max(1);
    let mut reason = String::new();
    for attempt in 1..=attempts {
        let mut details = if hits >= total || !rules.player_selects_casualties {
            defaults.clone()
        } else {
            let request = request(query, sorted_ids.clone(), hits, defaults.clone());
            match oracle.select_casualties(&request) {
                Decision::Ready(details) => details,
                Decision::Pending => return Ok(Decision::Pending),
            }
        };

        if rules.partial_amphibious_retreat {
            kill_amphibious_first(&mut details.killed, &sorted);
        }

        let spare = |id: UnitId| {
            sorted
                .iter()
                .find(|u| u.id() == id)
                .map(|u| u.hit_points_left().saturating_sub(1) as usize)
        };
        let mut counted = details.killed.len();
        let mut overdamaged = false;
        if query.allow_multiple_hits_per_unit {
            for id in &details.killed {
                counted += details.damage_to(*id).min(spare(*id).unwrap_or(0));
            }
            let killed = details.killed.clone();
            details.damaged.retain(|id| !killed.contains(id));
            // Unknown ids are left to the containment check.
            overdamaged = details
                .damaged
                .iter()
                .any(|id| spare(*id).is_some_and(|s| details.damage_to(*id) > s));
        } else {
            details.damaged.clear();
        }

        if overdamaged || counted + details.damaged.len() != expected as usize {
            reason = "Wrong number of casualties selected".to_string();
            tracing::warn!(
                player = %side.player,
                attempt,
                expected,
                selected = counted + details.damaged.len(),
                "casualty count rejected"
            );
            oracle.report_error(side.player, &reason);
            continue;
        }
        let contained = |id: &UnitId| sorted_ids.contains(id);
        if !details.killed.iter().all(contained) || !details.damaged.iter().all(contained) {
            reason = "Cannot remove enough units of those types".to_string();
            tracing::warn!(player = %side.player, attempt, "casualty units rejected");
            oracle.report_error(side.player, &reason);
            continue;
        }

        tracing::debug!(
            player = %side.player,
            killed = details.killed.len(),
            damaged = details.damaged.len(),
            auto = details.auto_calculated,
            "casualties selected"
        );
        return Ok(Decision::Ready(details));
    }

    Err(RuleRejection::InconsistentCasualties {
        player: side.player,
        attempts,
        reason,
    }
    .into())
}

fn request(query: &CasualtyQuery<'_>, targets: Vec<UnitId>, hits: u32, defaults: CasualtyDetails) -> CasualtyRequest {
    CasualtyRequest {
        player: query.side.player,
        message: query.message.clone(),
        targets,
        hits,
        dice: Some(query.dice.clone()),
        defaults,
        defending: query.side.defending,
        territory: query.side.territory.id,
        battle: query.battle,
        allow_multiple_hits_per_unit: query.allow_multiple_hits_per_unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::Die;
    use crate::game::{Domain, PlayerId, Territory, TerritoryId, Unit, UnitType};
    use crate::math::Fixed;
    use crate::player::{AcceptDefaults, DeferredOracle, PendingRequest};
    use crate::rules::BattleRules;

    const INF: UnitTypeId = UnitTypeId(1);
    const TANK: UnitTypeId = UnitTypeId(2);
    const BATTLESHIP: UnitTypeId = UnitTypeId(3);

    fn kinds() -> Vec<UnitType> {
        vec![
            UnitType::new(INF, "infantry", Domain::Land).with_combat(1, 2).with_cost(3, 1),
            UnitType::new(TANK, "armour", Domain::Land).with_combat(3, 3).with_cost(5, 2),
            UnitType::new(BATTLESHIP, "battleship", Domain::Sea)
                .with_combat(4, 4)
                .with_cost(20, 2)
                .with_hit_points(2),
        ]
    }

    fn army(roster: &[(u32, UnitTypeId)]) -> Vec<Unit> {
        roster.iter()
            .map(|(id, t)| Unit::new(UnitId(*id), *t, PlayerId(2)))
            .collect()
    }

    fn view<'a>(units: &'a [Unit], kinds: &'a [UnitType]) -> Vec<CombatUnit<'a>> {
        units
            .iter()
            .map(|u| CombatUnit::new(u, kinds.iter().find(|k| k.id == u.unit_type).expect("kind")))
            .collect()
    }

    fn hits(n: u32) -> DiceRoll {
        DiceRoll::new((0..n).map(|_| Die::judged(0, 1)).collect(), n, Fixed::ZERO)
    }

    fn query<'a>(
        rules: &'a BattleRules,
        territory: &'a Territory,
        units: &'a [CombatUnit<'a>],
        dice: &'a DiceRoll,
        multi: bool,
    ) -> CasualtyQuery<'a> {
        CasualtyQuery {
            side: CasualtySide {
                player: PlayerId(2),
                rules,
                support_rules: &[],
                territory,
                defending: true,
                friendly: units,
                enemy: &[],
                amphibious: false,
                amphibious_land: &[],
            },
            targets: units,
            dice,
            message: "Select casualties".to_string(),
            battle: None,
            extra_hits: 0,
            allow_multiple_hits_per_unit: multi,
        }
    }

    #[test]
    fn test_identical_infantry_fast_path() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::land(TerritoryId(1), "Karelia", Some(PlayerId(2)));
        let units = army(&[(1, INF), (2, INF), (3, INF)]);
        let units = view(&units, &kinds);
        let dice = hits(2);
        let mut oracle = DeferredOracle::new();
        let details = select_casualties(
            &query(&rules, &territory, &units, &dice, false),
            &mut oracle,
            &mut OrderOfLossesCache::new(8),
        )
        .expect("select")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(1), UnitId(2)]);
        assert!(details.damaged.is_empty());
        assert!(oracle.pending().is_empty());
    }

    #[test]
    fn test_battleship_absorbs_first_hit() {
        let kinds = kinds();
        let sorted_units = army(&[(1, INF), (2, BATTLESHIP)]);
        let sorted = view(&sorted_units, &kinds);
        let details = default_casualties(&sorted, 2, true);
        assert_eq!(details.damaged, vec![UnitId(2)]);
        assert_eq!(details.killed, vec![UnitId(1)]);
        assert!(details.auto_calculated);
    }

    #[test]
    fn test_oracle_pending_suspends() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::land(TerritoryId(1), "Karelia", Some(PlayerId(2)));
        let units = army(&[(1, INF), (2, TANK)]);
        let units = view(&units, &kinds);
        let dice = hits(1);
        let mut oracle = DeferredOracle::new();
        let decision = select_casualties(
            &query(&rules, &territory, &units, &dice, false),
            &mut oracle,
            &mut OrderOfLossesCache::new(8),
        )
        .expect("select");
        assert!(decision.is_pending());
        let [PendingRequest::Casualties(request)] = oracle.pending() else {
            panic!("expected one casualty request");
        };
        assert_eq!(request.defaults.killed, vec![UnitId(1)]);
        assert_eq!(request.targets, vec![UnitId(1), UnitId(2)]);
    }

    #[test]
    fn test_wrong_count_is_retried_then_rejected() {
        let kinds = kinds();
        let rules = BattleRules {
            casualty_selection_retries: 2,
            ..BattleRules::default()
        };
        let territory = Territory::land(TerritoryId(1), "Karelia", Some(PlayerId(2)));
        let units = army(&[(1, INF), (2, TANK), (3, INF)]);
        let units = view(&units, &kinds);
        let dice = hits(1);
        let mut oracle = DeferredOracle::new();
        oracle
            .answer_casualties(CasualtyDetails::killing(vec![UnitId(1), UnitId(2)]))
            .answer_casualties(CasualtyDetails::killing(vec![UnitId(9)]));
        let err = select_casualties(
            &query(&rules, &territory, &units, &dice, false),
            &mut oracle,
            &mut OrderOfLossesCache::new(8),
        )
        .expect_err("rejected");
        assert!(!err.is_fatal());
        assert_eq!(
            oracle.errors().iter().map(|(_, m)| m.as_str()).collect::<Vec<_>>(),
            vec!["Wrong number of casualties selected", "Cannot remove enough units of those types"]
        );
    }

    #[test]
    fn test_valid_choice_after_rejection_is_accepted() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::land(TerritoryId(1), "Karelia", Some(PlayerId(2)));
        let units = army(&[(1, INF), (2, TANK)]);
        let units = view(&units, &kinds);
        let dice = hits(1);
        let mut oracle = DeferredOracle::new();
        oracle
            .answer_casualties(CasualtyDetails::new())
            .answer_casualties(CasualtyDetails::killing(vec![UnitId(2)]));
        let details = select_casualties(
            &query(&rules, &territory, &units, &dice, false),
            &mut oracle,
            &mut OrderOfLossesCache::new(8),
        )
        .expect("select")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(2)]);
        assert_eq!(oracle.errors().len(), 1);
    }

    #[test]
    fn test_damage_beyond_spare_hitpoints_is_retried() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::sea(TerritoryId(1), "Baltic Sea");
        let units = army(&[(1, INF), (2, BATTLESHIP)]);
        let units = view(&units, &kinds);
        let dice = hits(2);
        let mut oracle = DeferredOracle::new();
        oracle
            .answer_casualties(CasualtyDetails {
                damaged: vec![UnitId(2), UnitId(2)],
                ..CasualtyDetails::default()
            })
            .answer_casualties(CasualtyDetails {
                killed: vec![UnitId(1)],
                damaged: vec![UnitId(2)],
                auto_calculated: false,
            });
        let details = select_casualties(
            &query(&rules, &territory, &units, &dice, true),
            &mut oracle,
            &mut OrderOfLossesCache::new(8),
        )
        .expect("select")
        .ready()
        .expect("ready");
        assert_eq!(details.killed, vec![UnitId(1)]);
        assert_eq!(details.damaged, vec![UnitId(2)]);
        assert_eq!(
            oracle.errors().iter().map(|(_, m)| m.as_str()).collect::<Vec<_>>(),
            vec!["Wrong number of casualties selected"]
        );
    }

    #[test]
    fn test_more_hits_than_units_kills_everything() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::sea(TerritoryId(5), "Sea Zone 5");
        let units = army(&[(1, TANK), (2, BATTLESHIP)]);
        let units = view(&units, &kinds);
        let dice = hits(5);
        let details = select_casualties(
            &query(&rules, &territory, &units, &dice, true),
            &mut AcceptDefaults,
            &mut OrderOfLossesCache::new(8),
        )
        .expect("select")
        .ready()
        .expect("ready");
        assert_eq!(details.killed.len(), 2);
        assert!(details.damaged.is_empty());
    }

    #[test]
    fn test_targets_outside_friendly_are_fatal() {
        let kinds = kinds();
        let rules = BattleRules::default();
        let territory = Territory::land(TerritoryId(1), "Karelia", Some(PlayerId(2)));
        let units = army(&[(1, INF), (2, TANK)]);
        let units = view(&units, &kinds);
        let dice = hits(1);
        let mut q = query(&rules, &territory, &units, &dice, false);
        q.side.friendly = &units[..1];
        let err = select_casualties(&q, &mut AcceptDefaults, &mut OrderOfLossesCache::new(8))
            .expect_err("missing");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_amphibious_units_die_first() {
        let kinds = kinds();
        let mut units = army(&[(1, INF), (2, INF), (3, TANK)]);
        units[1].was_amphibious = true;
        let units = view(&units, &kinds);
        let mut killed = vec![UnitId(1), UnitId(3)];
        kill_amphibious_first(&mut killed, &units);
        assert_eq!(killed, vec![UnitId(2), UnitId(3)]);
    }
}
