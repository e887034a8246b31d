//! Scenario data loaded from RON.
//!
//! Pure data definitions plus conversion into a [`GameState`](crate::game::GameState).
//! No file IO happens here; callers read the text and hand it over.

mod scenario;

pub use scenario::{Placement, RelationshipData, ScenarioData};
