//! Casualty selection.
//!
//! [`select_casualties`] turns a hit count into killed and damaged units,
//! suggesting a default built by [`sort_for_casualties`] and letting the
//! owning player override it through a [`PlayerOracle`](crate::player::PlayerOracle).
//! [`aa_casualties`] places AA hits on aircraft under the ruleset's AA
//! casualty mode.

mod aa;
mod details;
mod order;
mod select;

pub use aa::{aa_casualties, AaCasualtyQuery};
pub use details::CasualtyDetails;
pub use order::{
    sort_for_casualties, CasualtyComparator, CasualtySide, OrderOfLossesCache, OrderOfLossesKey,
};
pub use select::{default_casualties, kill_amphibious_first, select_casualties, CasualtyQuery};
