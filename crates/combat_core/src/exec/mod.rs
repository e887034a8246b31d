//! Resumable execution of combat moves and battles.
//!
//! Work is pushed onto an [`ExecutionStack`] of [`CombatStep`]s and run
//! against a [`CombatContext`]. When a player has to answer, the stack
//! suspends; it can then be encoded, stored, decoded and resumed once the
//! answer is queued, with no dice rolled twice.

mod context;
mod stack;
mod steps;

pub use context::CombatContext;
pub use stack::{Executable, ExecutionStack, ExecutionStatus, StepOutcome};
pub use steps::CombatStep;
