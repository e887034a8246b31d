//! Movement routes.

use serde::{Deserialize, Serialize};

use super::ids::TerritoryId;
use super::state::GameState;
use crate::error::Result;

/// An ordered path: a start territory followed by one or more steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    start: TerritoryId,
    steps: Vec<TerritoryId>,
}

impl Route {
    /// Route from `start` through `steps`.
    #[must_use]
    pub fn new(start: TerritoryId, steps: Vec<TerritoryId>) -> Self {
        Self { start, steps }
    }

    /// Single-step route.
    #[must_use]
    pub fn direct(start: TerritoryId, end: TerritoryId) -> Self {
        Self::new(start, vec![end])
    }

    /// Where the move begins.
    #[must_use]
    pub const fn start(&self) -> TerritoryId {
        self.start
    }

    /// Where the move ends; the start for an empty route.
    #[must_use]
    pub fn end(&self) -> TerritoryId {
        self.steps.last().copied().unwrap_or(self.start)
    }

    /// Territories entered, in order.
    #[must_use]
    pub fn steps(&self) -> &[TerritoryId] {
        &self.steps
    }

    /// Territories passed through before the end.
    #[must_use]
    pub fn middle_steps(&self) -> &[TerritoryId] {
        match self.steps.split_last() {
            Some((_, middle)) => middle,
            None => &[],
        }
    }

    /// Start followed by every step.
    pub fn all_territories(&self) -> impl Iterator<Item = TerritoryId> + '_ {
        std::iter::once(self.start).chain(self.steps.iter().copied())
    }

    /// Units leave a sea zone for land.
    pub fn is_unload(&self, state: &GameState) -> Result<bool> {
        if self.steps.is_empty() {
            return Ok(false);
        }
        Ok(state.territory(self.start)?.is_water && !state.territory(self.end())?.is_water)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_and_middle_steps() {
        let route = Route::new(
            TerritoryId(1),
            vec![TerritoryId(2), TerritoryId(3), TerritoryId(4)],
        );
        assert_eq!(route.end(), TerritoryId(4));
        assert_eq!(route.middle_steps(), &[TerritoryId(2), TerritoryId(3)]);
        assert_eq!(route.all_territories().count(), 4);
    }

    #[test]
    fn test_empty_route_ends_at_start() {
        let route = Route::new(TerritoryId(7), Vec::new());
        assert_eq!(route.end(), TerritoryId(7));
        assert!(route.middle_steps().is_empty());
    }
}
