//! Decisions owned by players.
//!
//! The engine never blocks waiting for a human. A [`PlayerOracle`] answers
//! immediately with [`Decision::Ready`] or defers with
//! [`Decision::Pending`]; on `Pending` the current execution step suspends
//! and is re-run once the answer has been queued.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::battle::BattleId;
use crate::casualty::CasualtyDetails;
use crate::dice::DiceRoll;
use crate::game::{PlayerId, TerritoryId, UnitId};

/// Answer to a player decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision<T> {
    /// The player has answered.
    Ready(T),
    /// No answer yet; suspend and ask again later.
    Pending,
}

impl<T> Decision<T> {
    /// The answer, if there is one.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending => None,
        }
    }

    /// Whether the player has not answered yet.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Yes/no questions put to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Question {
    /// Should bombers arriving in `territory` raid instead of fight?
    ShouldBomb {
        /// Target territory.
        territory: TerritoryId,
    },
}

/// Everything a player needs to pick casualties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyRequest {
    /// Player taking the hits.
    pub player: PlayerId,
    /// Prompt text.
    pub message: String,
    /// Units that may be chosen, in default kill order.
    pub targets: Vec<UnitId>,
    /// Hits to assign; zero in edit mode.
    pub hits: u32,
    /// The roll that caused the hits.
    pub dice: Option<DiceRoll>,
    /// Suggested selection.
    pub defaults: CasualtyDetails,
    /// Whether the player's side is defending.
    pub defending: bool,
    /// Battle site.
    pub territory: TerritoryId,
    /// Battle, or `None` for AA fire during movement.
    pub battle: Option<BattleId>,
    /// Multi-hitpoint units may be damaged rather than killed.
    pub allow_multiple_hits_per_unit: bool,
}

/// Source of player decisions: a local human, an AI, or a remote peer.
pub trait PlayerOracle {
    /// Choose casualties for `request`.
    fn select_casualties(&mut self, request: &CasualtyRequest) -> Decision<CasualtyDetails>;

    /// Answer a yes/no question.
    fn confirm(&mut self, player: PlayerId, question: &Question) -> Decision<bool>;

    /// Tell the player an answer was rejected.
    fn report_error(&mut self, player: PlayerId, message: &str);
}

/// Always takes the suggested casualties and answers yes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptDefaults;

impl PlayerOracle for AcceptDefaults {
    fn select_casualties(&mut self, request: &CasualtyRequest) -> Decision<CasualtyDetails> {
        Decision::Ready(request.defaults.clone())
    }

    fn confirm(&mut self, _player: PlayerId, _question: &Question) -> Decision<bool> {
        Decision::Ready(true)
    }

    fn report_error(&mut self, player: PlayerId, message: &str) {
        tracing::warn!(%player, message, "selection rejected");
    }
}

/// A question the engine is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingRequest {
    /// Waiting for casualties.
    Casualties(CasualtyRequest),
    /// Waiting for a yes/no answer.
    Confirm(PlayerId, Question),
}

/// Answers from a queue; asks that find the queue empty are parked as
/// pending requests for a remote player to answer later.
#[derive(Debug, Clone, Default)]
pub struct DeferredOracle {
    casualties: VecDeque<CasualtyDetails>,
    confirmations: VecDeque<bool>,
    pending: Vec<PendingRequest>,
    errors: Vec<(PlayerId, String)>,
}

impl DeferredOracle {
    /// Empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a casualty answer.
    pub fn answer_casualties(&mut self, details: CasualtyDetails) -> &mut Self {
        self.casualties.push_back(details);
        self
    }

    /// Queue a yes/no answer.
    pub fn answer_confirm(&mut self, answer: bool) -> &mut Self {
        self.confirmations.push_back(answer);
        self
    }

    /// Requests that found no answer.
    #[must_use]
    pub fn pending(&self) -> &[PendingRequest] {
        &self.pending
    }

    /// Drain the parked requests.
    pub fn take_pending(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.pending)
    }

    /// Errors reported to players.
    #[must_use]
    pub fn errors(&self) -> &[(PlayerId, String)] {
        &self.errors
    }
}

impl PlayerOracle for DeferredOracle {
    fn select_casualties(&mut self, request: &CasualtyRequest) -> Decision<CasualtyDetails> {
        match self.casualties.pop_front() {
            Some(details) => Decision::Ready(details),
            None => {
                self.pending.push(PendingRequest::Casualties(request.clone()));
                Decision::Pending
            }
        }
    }

    fn confirm(&mut self, player: PlayerId, question: &Question) -> Decision<bool> {
        match self.confirmations.pop_front() {
            Some(answer) => Decision::Ready(answer),
            None => {
                self.pending.push(PendingRequest::Confirm(player, question.clone()));
                Decision::Pending
            }
        }
    }

    fn report_error(&mut self, player: PlayerId, message: &str) {
        tracing::warn!(%player, message, "selection rejected");
        self.errors.push((player, message.to_string()));
    }
}
