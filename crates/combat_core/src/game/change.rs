//! Invertible board mutations.
//!
//! Every mutation of [`GameState`](super::GameState) is expressed as a
//! [`Change`] and goes through `GameState::apply`. Each variant records the
//! value it expects to replace, so a change can be validated against the
//! board, inverted for undo, and transmitted to peers.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{PlayerId, TerritoryId, UnitId};
use super::player::Resource;

/// Boolean unit properties that combat toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitFlag {
    /// Landed from the sea this turn.
    Amphibious,
    /// Took part in a battle this turn.
    InCombat,
    /// Out of action.
    Disabled,
}

/// A single validated mutation of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Territory changes hands.
    Owner {
        /// Territory affected.
        territory: TerritoryId,
        /// Expected current owner.
        old: Option<PlayerId>,
        /// New owner.
        new: Option<PlayerId>,
    },
    /// Add `delta` of a resource.
    Resource {
        /// Player affected.
        player: PlayerId,
        /// Which resource.
        resource: Resource,
        /// Signed amount.
        delta: i32,
    },
    /// Place units that are currently nowhere.
    AddUnits {
        /// Destination.
        territory: TerritoryId,
        /// Units placed.
        units: Vec<UnitId>,
    },
    /// Take units off the board.
    RemoveUnits {
        /// Where the units are.
        territory: TerritoryId,
        /// Units removed.
        units: Vec<UnitId>,
    },
    /// Set hits taken.
    Hits {
        /// Unit affected.
        unit: UnitId,
        /// Expected current hits.
        old: u32,
        /// New hits.
        new: u32,
    },
    /// Set bombing damage.
    BombingDamage {
        /// Unit affected.
        unit: UnitId,
        /// Expected current damage.
        old: u32,
        /// New damage.
        new: u32,
    },
    /// Unit changes owner.
    UnitOwner {
        /// Unit affected.
        unit: UnitId,
        /// Expected current owner.
        old: PlayerId,
        /// New owner.
        new: PlayerId,
    },
    /// Toggle a unit flag.
    Flag {
        /// Unit affected.
        unit: UnitId,
        /// Which flag.
        flag: UnitFlag,
        /// Expected current value.
        old: bool,
        /// New value.
        new: bool,
    },
    /// Ordered group of changes applied atomically.
    Composite(Vec<Change>),
}

impl Change {
    /// A change that does nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Composite(Vec::new())
    }

    /// Group changes, dropping empty ones and flattening nested groups.
    #[must_use]
    pub fn composite(changes: impl IntoIterator<Item = Change>) -> Self {
        let mut flat = Vec::new();
        for change in changes {
            match change {
                Self::Composite(inner) => flat.extend(inner.into_iter().filter(|c| !c.is_empty())),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or_else(Self::empty)
        } else {
            Self::Composite(flat)
        }
    }

    /// Move `units` from one territory to another.
    #[must_use]
    pub fn move_units(from: TerritoryId, to: TerritoryId, units: Vec<UnitId>) -> Self {
        if units.is_empty() || from == to {
            return Self::empty();
        }
        Self::Composite(vec![
            Self::RemoveUnits {
                territory: from,
                units: units.clone(),
            },
            Self::AddUnits { territory: to, units },
        ])
    }

    /// Whether applying the change would do nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Composite(changes) => changes.iter().all(Self::is_empty),
            Self::AddUnits { units, .. } | Self::RemoveUnits { units, .. } => units.is_empty(),
            Self::Resource { delta, .. } => *delta == 0,
            _ => false,
        }
    }

    /// The change that undoes this one.
    #[must_use]
    pub fn invert(&self) -> Self {
        match self {
            Self::Owner { territory, old, new } => Self::Owner {
                territory: *territory,
                old: *new,
                new: *old,
            },
            Self::Resource {
                player,
                resource,
                delta,
            } => Self::Resource {
                player: *player,
                resource: *resource,
                delta: -delta,
            },
            Self::AddUnits { territory, units } => Self::RemoveUnits {
                territory: *territory,
                units: units.clone(),
            },
            Self::RemoveUnits { territory, units } => Self::AddUnits {
                territory: *territory,
                units: units.clone(),
            },
            Self::Hits { unit, old, new } => Self::Hits {
                unit: *unit,
                old: *new,
                new: *old,
            },
            Self::BombingDamage { unit, old, new } => Self::BombingDamage {
                unit: *unit,
                old: *new,
                new: *old,
            },
            Self::UnitOwner { unit, old, new } => Self::UnitOwner {
                unit: *unit,
                old: *new,
                new: *old,
            },
            Self::Flag {
                unit,
                flag,
                old,
                new,
            } => Self::Flag {
                unit: *unit,
                flag: *flag,
                old: *new,
                new: *old,
            },
            Self::Composite(changes) => {
                Self::Composite(changes.iter().rev().map(Self::invert).collect())
            }
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner { territory, new, .. } => match new {
                Some(p) => write!(f, "{territory} now owned by {p}"),
                None => write!(f, "{territory} now unowned"),
            },
            Self::Resource {
                player,
                resource,
                delta,
            } => write!(f, "{player} {resource:?} {delta:+}"),
            Self::AddUnits { territory, units } => {
                write!(f, "{} units added to {territory}", units.len())
            }
            Self::RemoveUnits { territory, units } => {
                write!(f, "{} units removed from {territory}", units.len())
            }
            Self::Hits { unit, new, .. } => write!(f, "{unit} hits = {new}"),
            Self::BombingDamage { unit, new, .. } => write!(f, "{unit} bombing damage = {new}"),
            Self::UnitOwner { unit, new, .. } => write!(f, "{unit} captured by {new}"),
            Self::Flag {
                unit, flag, new, ..
            } => write!(f, "{unit} {flag:?} = {new}"),
            Self::Composite(changes) => write!(f, "{} changes", changes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_flattens_and_drops_empty() {
        let hits = Change::Hits {
            unit: UnitId(1),
            old: 0,
            new: 1,
        };
        let nested = Change::composite(vec![
            Change::empty(),
            Change::Composite(vec![hits.clone(), Change::empty()]),
        ]);
        assert_eq!(nested, hits);
        assert!(Change::composite(Vec::new()).is_empty());
    }

    #[test]
    fn test_invert_reverses_composite_order() {
        let change = Change::move_units(TerritoryId(1), TerritoryId(2), vec![UnitId(5)]);
        let inverted = change.invert();
        match inverted {
            Change::Composite(parts) => {
                assert!(matches!(parts[0], Change::RemoveUnits { territory, .. } if territory == TerritoryId(2)));
                assert!(matches!(parts[1], Change::AddUnits { territory, .. } if territory == TerritoryId(1)));
            }
            other => panic!("expected composite, got {other:?}"),
        }
    }

    #[test]
    fn test_move_to_same_territory_is_empty() {
        assert!(Change::move_units(TerritoryId(1), TerritoryId(1), vec![UnitId(1)]).is_empty());
    }
}
