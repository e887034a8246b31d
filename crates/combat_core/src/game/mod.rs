//! The board: unit types, units, territories, players, and the change log.
//!
//! Combat code never mutates the board directly. It borrows units through
//! [`CombatUnit`] and submits [`Change`] values to [`GameState::apply`].

mod change;
mod ids;
mod player;
mod route;
mod state;
mod territory;
mod unit;

pub use change::{Change, UnitFlag};
pub use ids::{PlayerId, TerritoryId, UnitId, UnitTypeId};
pub use player::{Player, Relationship, Resource};
pub use route::Route;
pub use state::{GameState, GameStateBuilder};
pub use territory::{CaptureRedirect, TerrainBonus, Territory};
pub use unit::{total_hit_points, AaStats, CombatUnit, Domain, Unit, UnitType};
