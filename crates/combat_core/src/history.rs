//! Write-only battle history.
//!
//! The engine narrates every roll, casualty choice and conquest to a
//! [`HistorySink`]. Nothing reads the history back during resolution, so
//! [`NullHistory`] is always a valid sink.

use serde::{Deserialize, Serialize};

use crate::dice::DiceRoll;
use crate::game::{Change, UnitId};

/// Structured data attached to a history line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPayload {
    /// Plain text line.
    Empty,
    /// A finished roll.
    Dice(DiceRoll),
    /// Units involved in the event.
    Units(Vec<UnitId>),
    /// Casualties removed.
    Casualties {
        /// Units killed.
        killed: Vec<UnitId>,
        /// Units damaged, once per hit.
        damaged: Vec<UnitId>,
    },
    /// A board change.
    Change(Change),
}

/// Receiver for history lines.
pub trait HistorySink {
    /// Append one line.
    fn record(&mut self, description: &str, payload: HistoryPayload);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHistory;

impl HistorySink for NullHistory {
    fn record(&mut self, _description: &str, _payload: HistoryPayload) {}
}

/// One recorded line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Human readable text.
    pub description: String,
    /// Attached data.
    pub payload: HistoryPayload,
}

/// In-memory history, used by tests and replays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded lines, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Just the text of every line.
    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.description.as_str())
    }

    /// Every roll recorded, in order.
    pub fn rolls(&self) -> impl Iterator<Item = &DiceRoll> {
        self.entries.iter().filter_map(|e| match &e.payload {
            HistoryPayload::Dice(roll) => Some(roll),
            _ => None,
        })
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HistorySink for HistoryLog {
    fn record(&mut self, description: &str, payload: HistoryPayload) {
        self.entries.push(HistoryEntry {
            description: description.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_keeps_order_and_payloads() {
        let mut log = HistoryLog::new();
        log.record("first", HistoryPayload::Empty);
        log.record("roll", HistoryPayload::Dice(DiceRoll::empty()));
        assert_eq!(log.descriptions().collect::<Vec<_>>(), vec!["first", "roll"]);
        assert_eq!(log.rolls().count(), 1);
    }

    #[test]
    fn test_null_history_accepts_anything() {
        let mut sink = NullHistory;
        sink.record("ignored", HistoryPayload::Units(vec![UnitId(1)]));
    }
}
