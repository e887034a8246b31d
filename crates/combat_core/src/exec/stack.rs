//! A resumable stack of serializable steps.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};

/// What a step asks the stack to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Carry on with the next step.
    Continue,
    /// Stop here; run this step again on the next [`ExecutionStack::execute`].
    Suspend,
}

/// How [`ExecutionStack::execute`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Every step ran.
    Completed,
    /// A step is waiting on a player.
    Suspended,
}

/// One unit of work that may push further steps.
///
/// A step that suspends or fails is run again from the start, so it must
/// ask its questions before it mutates anything. Steps it pushed before
/// stopping are discarded.
pub trait Executable<C: ?Sized>: Sized {
    /// Run the step.
    fn execute(&self, stack: &mut ExecutionStack<Self>, ctx: &mut C) -> Result<StepOutcome>;
}

/// Last-in, first-out steps plus the step currently running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStack<S> {
    steps: Vec<S>,
    current: Option<S>,
}

impl<S> Default for ExecutionStack<S> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            current: None,
        }
    }
}

impl<S> ExecutionStack<S> {
    /// Empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `step` before everything already on the stack.
    pub fn push(&mut self, step: S) {
        self.steps.push(step);
    }

    /// Run `steps` in the order given, before everything already on the stack.
    pub fn push_all(&mut self, steps: impl IntoIterator<Item = S>) {
        let mut steps: Vec<S> = steps.into_iter().collect();
        steps.reverse();
        self.steps.extend(steps);
    }

    /// Whether nothing is left to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.current.is_none()
    }

    /// Steps left, counting an interrupted one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len() + usize::from(self.current.is_some())
    }

    /// The interrupted step, if any.
    #[must_use]
    pub fn current(&self) -> Option<&S> {
        self.current.as_ref()
    }

    /// Drop every step.
    pub fn clear(&mut self) {
        self.steps.clear();
        self.current = None;
    }

    /// Pop and run steps until the stack is empty or a step suspends.
    ///
    /// An interrupted step runs first. On error the failing step stays
    /// current and the error is returned.
    pub fn execute<C: ?Sized>(&mut self, ctx: &mut C) -> Result<ExecutionStatus>
    where
        S: Executable<C> + Clone,
    {
        loop {
            let step = match self.current.take() {
                Some(step) => step,
                None => match self.steps.pop() {
                    Some(step) => step,
                    None => return Ok(ExecutionStatus::Completed),
                },
            };
            let depth = self.steps.len();
            self.current = Some(step.clone());
            match step.execute(self, ctx) {
                Ok(StepOutcome::Continue) => self.current = None,
                Ok(StepOutcome::Suspend) => {
                    self.steps.truncate(depth);
                    tracing::debug!(depth, "execution suspended");
                    return Ok(ExecutionStatus::Suspended);
                }
                Err(e) => {
                    self.steps.truncate(depth);
                    return Err(e);
                }
            }
        }
    }
}

impl<S: Serialize + DeserializeOwned> ExecutionStack<S> {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CombatError::serialization("execution stack", e))
    }

    /// Decode a stack written by [`ExecutionStack::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CombatError::serialization("execution stack", e))
    }
}
