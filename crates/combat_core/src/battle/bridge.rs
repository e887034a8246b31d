//! Lends the board, ruleset and history to tracker operations.

use crate::error::Result;
use crate::game::{Change, GameState};
use crate::history::{HistoryPayload, HistorySink};
use crate::rules::BattleRules;

/// The board, the ruleset and the history sink, lent to tracker operations.
pub struct Bridge<'a> {
    /// Board mutated through [`GameState::apply`].
    pub state: &'a mut GameState,
    /// Ruleset.
    pub rules: &'a BattleRules,
    /// History narration.
    pub history: &'a mut dyn HistorySink,
}

impl<'a> Bridge<'a> {
    /// Lend the three collaborators.
    pub fn new(
        state: &'a mut GameState,
        rules: &'a BattleRules,
        history: &'a mut dyn HistorySink,
    ) -> Self {
        Self {
            state,
            rules,
            history,
        }
    }

    /// Apply `change` and narrate it. Empty changes are skipped silently.
    pub fn apply(&mut self, change: Change, description: &str) -> Result<()> {
        if change.is_empty() {
            return Ok(());
        }
        self.state.apply(change.clone())?;
        self.history.record(description, HistoryPayload::Change(change));
        Ok(())
    }

    /// Narrate a plain line.
    pub fn note(&mut self, description: &str) {
        self.history.record(description, HistoryPayload::Empty);
    }
}

impl std::fmt::Debug for Bridge<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("rules", self.rules)
            .finish_non_exhaustive()
    }
}
