//! Taking over a territory.
//!
//! A conquest is a sequence of independent rules run in a fixed order: sea
//! control, convoy routes, neutral charges, capital capture, owner
//! resolution, the ownership change itself, the pending-raid check, captured
//! and destroyed units, allied capital liberation, and finally marking the
//! arriving units as having fought. Any rule may stop the sequence.

use super::bridge::Bridge;
use crate::error::{ConsistencyViolation, Result, RuleRejection};
use crate::game::{Change, PlayerId, Resource, TerritoryId, UnitFlag, UnitId};

/// The conquest being processed.
#[derive(Debug, Clone)]
pub struct TakeOver<'a> {
    /// Territory taken.
    pub territory: TerritoryId,
    /// Conquering player.
    pub attacker: PlayerId,
    /// Units that arrived and survived.
    pub arriving: &'a [UnitId],
    /// A bombing raid on this territory has not been fought yet.
    pub bombing_raid_pending: bool,
    /// Player receiving the territory, once resolved.
    pub new_owner: Option<PlayerId>,
}

impl<'a> TakeOver<'a> {
    /// Start a conquest of `territory` by `attacker`.
    #[must_use]
    pub fn new(territory: TerritoryId, attacker: PlayerId, arriving: &'a [UnitId]) -> Self {
        Self {
            territory,
            attacker,
            arriving,
            bombing_raid_pending: false,
            new_owner: None,
        }
    }

    fn receiver(&self) -> PlayerId {
        self.new_owner.unwrap_or(self.attacker)
    }
}

/// Whether the remaining rules run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFlow {
    /// Run the next rule.
    Continue,
    /// The conquest ends here.
    Stop,
}

/// One step of a conquest.
pub trait TakeOverRule: std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Apply the rule.
    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow>;
}

/// Every rule, in the order a conquest applies them.
#[must_use]
pub fn standard_rules() -> Vec<Box<dyn TakeOverRule>> {
    vec![
        Box::new(SeaControl),
        Box::new(ConvoyRoute),
        Box::new(NeutralCharge),
        Box::new(CapitalCapture),
        Box::new(OwnerResolution),
        Box::new(OwnershipTransfer),
        Box::new(BombingRaidGuard),
        Box::new(CaptureOrDestroyUnits),
        Box::new(AlliedCapitalLiberation),
        Box::new(MarkArrivedInCombat),
    ]
}

/// Run `rules` in order until one stops.
pub fn run_rules(
    rules: &[Box<dyn TakeOverRule>],
    take: &mut TakeOver<'_>,
    bridge: &mut Bridge<'_>,
) -> Result<()> {
    for rule in rules {
        if rule.apply(take, bridge)? == RuleFlow::Stop {
            tracing::debug!(territory = %take.territory, rule = rule.name(), "take over stopped");
            return Ok(());
        }
    }
    Ok(())
}

fn player_name(bridge: &Bridge<'_>, player: PlayerId) -> Result<String> {
    Ok(bridge.state.player(player)?.name.clone())
}

/// Sea zones are only taken by arriving surface warships.
///
/// Transports count only when the ruleset lets them control a zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeaControl;

impl TakeOverRule for SeaControl {
    fn name(&self) -> &'static str {
        "sea control"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        if !bridge.state.territory(take.territory)?.is_water {
            return Ok(RuleFlow::Continue);
        }
        let transports_count = bridge.rules.transport_controls_sea_zone;
        let controlling = bridge
            .state
            .combat_units(take.arriving)?
            .iter()
            .filter(|u| u.is_sea() && (transports_count || !u.kind.is_transport))
            .count();
        Ok(if controlling == 0 {
            RuleFlow::Stop
        } else {
            RuleFlow::Continue
        })
    }
}

/// Announce production gained or lost through a convoy route.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvoyRoute;

impl TakeOverRule for ConvoyRoute {
    fn name(&self) -> &'static str {
        "convoy route"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let state = &*bridge.state;
        let route = state.territory(take.territory)?;
        if !route.convoy_route {
            return Ok(RuleFlow::Continue);
        }
        let mut lines = Vec::new();
        for attached in &route.convoy_attached {
            let convoy = state.territory(*attached)?;
            let Some(owner) = convoy.owner else {
                continue;
            };
            let owner_name = &state.player(owner)?.name;
            if state.is_allied(take.attacker, owner) {
                lines.push(format!(
                    "{owner_name} gains {} production in {} for the liberation the convoy route in {}",
                    convoy.production, convoy.name, route.name
                ));
            } else if state.is_at_war(take.attacker, owner) {
                lines.push(format!(
                    "{owner_name} loses {} production in {} due to the capture of the convoy route in {}",
                    convoy.production, convoy.name, route.name
                ));
            }
        }
        for line in lines {
            bridge.note(&line);
        }
        Ok(RuleFlow::Continue)
    }
}

/// Entering unowned land costs PUs.
///
/// A player who cannot pay is told so and the charge is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeutralCharge;

impl TakeOverRule for NeutralCharge {
    fn name(&self) -> &'static str {
        "neutral charge"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let territory = bridge.state.territory(take.territory)?;
        let charge = bridge.rules.neutral_charge;
        if territory.owner.is_some() || territory.is_water || charge <= 0 {
            return Ok(RuleFlow::Continue);
        }
        let territory_name = territory.name.clone();
        let player = bridge.state.player(take.attacker)?;
        let (available, name) = (player.pus, player.name.clone());

        if available < charge {
            let rejection = RuleRejection::InsufficientFunds {
                player: take.attacker,
                required: charge,
                available,
            };
            tracing::warn!(territory = %take.territory, %rejection, "neutral charge not paid");
            bridge.note(&rejection.to_string());
            return Ok(RuleFlow::Continue);
        }
        bridge.apply(
            Change::Resource {
                player: take.attacker,
                resource: Resource::Pus,
                delta: -charge,
            },
            &format!("{name} loses {charge} PUs for violating {territory_name}s neutrality"),
        )?;
        Ok(RuleFlow::Continue)
    }
}

/// Taking a capital takes the treasury, unless enough capitals remain.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapitalCapture;

impl TakeOverRule for CapitalCapture {
    fn name(&self) -> &'static str {
        "capital capture"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let territory = bridge.state.territory(take.territory)?;
        let Some(whose) = territory.capital_of else {
            return Ok(RuleFlow::Continue);
        };
        let held_by_owner = territory.owner == Some(whose);
        let victim = bridge.state.player(whose)?;
        let (victim_name, pus, tokens) = (victim.name.clone(), victim.pus, victim.tech_tokens);
        let (retain, destroys) = (victim.retain_capital_number, victim.destroys_pus);
        let attacker_name = player_name(bridge, take.attacker)?;
        let still_owned = bridge.state.capitals_owned_by(whose).len();

        // The capital being taken is still counted, hence strictly less.
        if usize::try_from(retain).unwrap_or(usize::MAX) < still_owned {
            bridge.note(&format!("{attacker_name} captures one of {victim_name} capitals"));
            return Ok(RuleFlow::Continue);
        }
        if !held_by_owner {
            return Ok(RuleFlow::Continue);
        }

        let mut changes = Vec::new();
        if bridge.rules.pacific_theater {
            changes.push(Change::Resource {
                player: take.attacker,
                resource: Resource::CaptureVps,
                delta: pus,
            });
        }
        changes.push(Change::Resource {
            player: whose,
            resource: Resource::Pus,
            delta: -pus,
        });
        let line = if destroys {
            format!("{attacker_name} destroys {pus} PUs while taking {victim_name} capital")
        } else {
            changes.push(Change::Resource {
                player: take.attacker,
                resource: Resource::Pus,
                delta: pus,
            });
            format!("{attacker_name} captures {pus} PUs while taking {victim_name} capital")
        };
        if tokens > 0 {
            changes.push(Change::Resource {
                player: whose,
                resource: Resource::TechTokens,
                delta: -tokens,
            });
        }
        tracing::info!(capital = %take.territory, victim = %whose, pus, destroys, "capital captured");
        bridge.apply(Change::composite(changes), &line)?;
        Ok(RuleFlow::Continue)
    }
}

/// Decide who receives the territory.
///
/// Territory originally owned by an ally goes back to that ally, provided
/// the ally still holds a capital, this is its capital, or its capital is
/// unowned. Otherwise the conqueror keeps it, subject to capture redirects.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerResolution;

impl TakeOverRule for OwnerResolution {
    fn name(&self) -> &'static str {
        "owner resolution"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let state = &*bridge.state;
        let territory = state.territory(take.territory)?;
        let attacker = take.attacker;

        let liberator = territory
            .original_owner
            .filter(|orig| state.is_allied(*orig, attacker) && Some(*orig) != territory.owner);
        let new_owner = match liberator {
            Some(orig) if !state.capitals_owned_by(orig).is_empty() => orig,
            Some(orig) => {
                let capital_free = state.capitals_of(orig).into_iter().any(|capital| {
                    capital == territory.id
                        || state.territory(capital).is_ok_and(|c| c.owner.is_none())
                });
                if capital_free {
                    orig
                } else {
                    attacker
                }
            }
            None => attacker,
        };
        let new_owner = if new_owner == attacker && state.can_take_over(attacker, territory.owner) {
            territory.capture_receiver(attacker)
        } else {
            new_owner
        };
        take.new_owner = Some(new_owner);
        Ok(RuleFlow::Continue)
    }
}

/// Change the territory's owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipTransfer;

impl TakeOverRule for OwnershipTransfer {
    fn name(&self) -> &'static str {
        "ownership transfer"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let old = bridge.state.territory(take.territory)?.owner;
        let new = take.receiver();
        if old == Some(new) {
            return Ok(RuleFlow::Continue);
        }
        let change = Change::Owner {
            territory: take.territory,
            old,
            new: Some(new),
        };
        tracing::info!(territory = %take.territory, from = ?old, to = %new, "territory taken over");
        let line = change.to_string();
        bridge.apply(change, &line)?;
        Ok(RuleFlow::Continue)
    }
}

/// A raid against units in the territory must be fought before it falls.
#[derive(Debug, Clone, Copy, Default)]
pub struct BombingRaidGuard;

impl TakeOverRule for BombingRaidGuard {
    fn name(&self) -> &'static str {
        "bombing raid guard"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        if !take.bombing_raid_pending {
            return Ok(RuleFlow::Continue);
        }
        let state = &*bridge.state;
        let targets_left = state
            .units_in(take.territory)?
            .iter()
            .any(|u| state.is_at_war(take.attacker, u.owner()) && u.kind.can_be_damaged);
        if targets_left {
            return Err(ConsistencyViolation::BombingRaidPending(take.territory).into());
        }
        Ok(RuleFlow::Continue)
    }
}

/// Remove units that do not survive capture and seize infrastructure.
///
/// Types flagged destroyed-when-captured are removed when the ruleset says
/// so. Disabled combat units are removed. Infrastructure changes hands and
/// may take damage, never beyond its maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOrDestroyUnits;

impl TakeOverRule for CaptureOrDestroyUnits {
    fn name(&self) -> &'static str {
        "capture or destroy units"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let state = &*bridge.state;
        let receiver = take.receiver();
        let mut destroyed = Vec::new();
        let mut disabled = Vec::new();
        let mut captured = Vec::new();

        for unit in state.units_in(take.territory)? {
            if !state.is_at_war(take.attacker, unit.owner()) {
                continue;
            }
            if bridge.rules.units_destroyed_instead_of_captured && unit.kind.destroyed_when_captured {
                destroyed.push(unit.id());
            } else if unit.unit.disabled && !unit.kind.is_infrastructure {
                disabled.push(unit.id());
            } else if unit.kind.is_infrastructure {
                captured.push(Change::UnitOwner {
                    unit: unit.id(),
                    old: unit.owner(),
                    new: receiver,
                });
                let sustained = unit.kind.when_captured_sustains_damage;
                if sustained > 0 && unit.kind.can_be_damaged {
                    let old = unit.unit.bombing_damage;
                    let taken = sustained.min(unit.kind.max_damage.saturating_sub(old));
                    if taken > 0 {
                        captured.push(Change::BombingDamage {
                            unit: unit.id(),
                            old,
                            new: old + taken,
                        });
                    }
                }
            }
        }

        let attacker_name = player_name(bridge, take.attacker)?;
        if !destroyed.is_empty() {
            bridge.apply(
                Change::RemoveUnits {
                    territory: take.territory,
                    units: destroyed,
                },
                "Some non-combat units are destroyed",
            )?;
        }
        if !disabled.is_empty() {
            bridge.apply(
                Change::RemoveUnits {
                    territory: take.territory,
                    units: disabled,
                },
                &format!("{attacker_name} destroys some disabled combat units"),
            )?;
        }
        if !captured.is_empty() {
            bridge.apply(
                Change::composite(captured),
                &format!("{attacker_name} captures infrastructure"),
            )?;
        }
        Ok(RuleFlow::Continue)
    }
}

/// Liberating an ally's capital returns its other territories held by
/// allies, infrastructure included.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlliedCapitalLiberation;

impl TakeOverRule for AlliedCapitalLiberation {
    fn name(&self) -> &'static str {
        "allied capital liberation"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let state = &*bridge.state;
        let territory = state.territory(take.territory)?;
        let Some(orig) = territory.original_owner else {
            return Ok(RuleFlow::Continue);
        };
        if !state.is_allied(orig, take.attacker) || territory.capital_of != Some(orig) {
            return Ok(RuleFlow::Continue);
        }

        let mut returned = Vec::new();
        for item in state.territories() {
            if item.original_owner != Some(orig) || item.owner == Some(orig) {
                continue;
            }
            let Some(holder) = item.owner else {
                continue;
            };
            if !state.is_allied(holder, orig) {
                continue;
            }
            let mut parts = vec![Change::Owner {
                territory: item.id,
                old: item.owner,
                new: Some(orig),
            }];
            for unit in state.units_in(item.id)? {
                if unit.kind.is_infrastructure && unit.owner() != orig {
                    parts.push(Change::UnitOwner {
                        unit: unit.id(),
                        old: unit.owner(),
                        new: orig,
                    });
                }
            }
            returned.push(Change::composite(parts));
        }
        for change in returned {
            let line = change.to_string();
            bridge.apply(change, &line)?;
        }
        Ok(RuleFlow::Continue)
    }
}

/// Arriving units have now been in combat. Land units at sea have not: they
/// may still unload and attack.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkArrivedInCombat;

impl TakeOverRule for MarkArrivedInCombat {
    fn name(&self) -> &'static str {
        "mark arrived in combat"
    }

    fn apply(&self, take: &mut TakeOver<'_>, bridge: &mut Bridge<'_>) -> Result<RuleFlow> {
        let water = bridge.state.territory(take.territory)?.is_water;
        let flags: Vec<Change> = bridge
            .state
            .combat_units(take.arriving)?
            .iter()
            .filter(|u| !(water && u.is_land()) && !u.unit.was_in_combat)
            .map(|u| Change::Flag {
                unit: u.id(),
                flag: UnitFlag::InCombat,
                old: false,
                new: true,
            })
            .collect();
        bridge.state.apply(Change::composite(flags))?;
        Ok(RuleFlow::Continue)
    }
}
