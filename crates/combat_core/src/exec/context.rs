use crate::battle::{BattleTracker, Bridge};
use crate::casualty::OrderOfLossesCache;
use crate::dice::RandomSource;
use crate::game::GameState;
use crate::history::HistorySink;
use crate::player::PlayerOracle;
use crate::rules::BattleRules;

/// Everything a [`CombatStep`](super::CombatStep) reads or mutates.
///
/// None of it is serialized with the stack; a restored stack runs against
/// a context rebuilt from the restored board and tracker.
pub struct CombatContext<'a> {
    /// The board.
    pub state: &'a mut GameState,
    /// Ruleset.
    pub rules: &'a BattleRules,
    /// Dice source.
    pub random: &'a mut dyn RandomSource,
    /// History narration.
    pub history: &'a mut dyn HistorySink,
    /// Player decisions.
    pub oracle: &'a mut dyn PlayerOracle,
    /// Casualty ordering cache.
    pub cache: &'a mut OrderOfLossesCache,
    /// Pending battles.
    pub tracker: &'a mut BattleTracker,
}

impl<'a> CombatContext<'a> {
    /// Borrow the collaborators.
    pub fn new(
        state: &'a mut GameState,
        rules: &'a BattleRules,
        random: &'a mut dyn RandomSource,
        history: &'a mut dyn HistorySink,
        oracle: &'a mut dyn PlayerOracle,
        cache: &'a mut OrderOfLossesCache,
        tracker: &'a mut BattleTracker,
    ) -> Self {
        Self {
            state,
            rules,
            random,
            history,
            oracle,
            cache,
            tracker,
        }
    }

    /// Split into the tracker and a [`Bridge`] over the board.
    pub fn tracker_and_bridge(&mut self) -> (&mut BattleTracker, Bridge<'_>) {
        (
            &mut *self.tracker,
            Bridge::new(&mut *self.state, self.rules, &mut *self.history),
        )
    }
}

impl std::fmt::Debug for CombatContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatContext")
            .field("rules", self.rules)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
