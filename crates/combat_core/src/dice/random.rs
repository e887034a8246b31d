//! Injected randomness.
//!
//! Every die the engine rolls comes from a [`RandomSource`]. Values are
//! 0-based: a d6 yields `0..6`. Replaying the same values reproduces the
//! same battle, which is how networked peers and tests stay in lockstep.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

use crate::error::{ConsistencyViolation, Result};

/// Source of 0-based die values.
pub trait RandomSource {
    /// Draw `count` values in `0..sides`.
    fn draw(&mut self, sides: u32, count: usize, annotation: &str) -> Result<Vec<u32>>;
}

impl<R: RandomSource + ?Sized> RandomSource for &mut R {
    fn draw(&mut self, sides: u32, count: usize, annotation: &str) -> Result<Vec<u32>> {
        (**self).draw(sides, count, annotation)
    }
}

impl<R: RandomSource + ?Sized> RandomSource for Box<R> {
    fn draw(&mut self, sides: u32, count: usize, annotation: &str) -> Result<Vec<u32>> {
        (**self).draw(sides, count, annotation)
    }
}

fn check_sides(sides: u32, annotation: &str) -> Result<()> {
    if sides == 0 {
        return Err(ConsistencyViolation::IllegalState(format!(
            "zero-sided die requested for '{annotation}'"
        ))
        .into());
    }
    Ok(())
}

/// Deterministic generator seeded once per game.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
}

impl SeededRandom {
    /// Generator for `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn draw(&mut self, sides: u32, count: usize, annotation: &str) -> Result<Vec<u32>> {
        check_sides(sides, annotation)?;
        let values: Vec<u32> = (0..count).map(|_| self.rng.gen_range(0..sides)).collect();
        tracing::trace!(sides, count, annotation, ?values, "drew dice");
        Ok(values)
    }
}

/// Plays back a fixed list of values; used by tests and by peers replaying
/// a transmitted roll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedRandom {
    values: VecDeque<u32>,
}

impl ScriptedRandom {
    /// Script that yields `values` in order.
    #[must_use]
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Values not yet drawn.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

impl RandomSource for ScriptedRandom {
    fn draw(&mut self, sides: u32, count: usize, annotation: &str) -> Result<Vec<u32>> {
        check_sides(sides, annotation)?;
        if self.values.len() < count {
            return Err(ConsistencyViolation::RandomExhausted(annotation.to_string()).into());
        }
        let values: Vec<u32> = self.values.drain(..count).collect();
        if let Some(&value) = values.iter().find(|v| **v >= sides) {
            return Err(ConsistencyViolation::InvalidDieValue { value, sides }.into());
        }
        Ok(values)
    }
}

/// Wraps another source and keeps every value it hands out.
#[derive(Debug, Clone)]
pub struct RecordingRandom<R> {
    inner: R,
    drawn: Vec<u32>,
}

impl<R: RandomSource> RecordingRandom<R> {
    /// Record draws from `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            drawn: Vec::new(),
        }
    }

    /// Values drawn so far.
    #[must_use]
    pub fn drawn(&self) -> &[u32] {
        &self.drawn
    }

    /// Script replaying exactly the recorded values.
    #[must_use]
    pub fn into_script(self) -> ScriptedRandom {
        ScriptedRandom::new(self.drawn)
    }
}

impl<R: RandomSource> RandomSource for RecordingRandom<R> {
    fn draw(&mut self, sides: u32, count: usize, annotation: &str) -> Result<Vec<u32>> {
        let values = self.inner.draw(sides, count, annotation)?;
        self.drawn.extend_from_slice(&values);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CombatError;

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::new(42);
        let mut b = SeededRandom::new(42);
        let first = a.draw(6, 20, "test").expect("draw");
        assert_eq!(first, b.draw(6, 20, "test").expect("draw"));
        assert!(first.iter().all(|v| *v < 6));
    }

    #[test]
    fn test_scripted_random_rejects_out_of_range() {
        let mut random = ScriptedRandom::new([7]);
        let err = random.draw(6, 1, "bad").expect_err("out of range");
        assert_eq!(
            err,
            CombatError::Consistency(ConsistencyViolation::InvalidDieValue { value: 7, sides: 6 })
        );
    }

    #[test]
    fn test_scripted_random_exhaustion() {
        let mut random = ScriptedRandom::new([1, 2]);
        assert!(random.draw(6, 3, "short").is_err());
    }

    #[test]
    fn test_recording_replays_identically() {
        let mut recorder = RecordingRandom::new(SeededRandom::new(7));
        let first = recorder.draw(6, 4, "a").expect("draw");
        let second = recorder.draw(12, 2, "b").expect("draw");
        let mut replay = recorder.into_script();
        assert_eq!(replay.draw(6, 4, "a").expect("replay"), first);
        assert_eq!(replay.draw(12, 2, "b").expect("replay"), second);
        assert_eq!(replay.remaining(), 0);
    }

    #[test]
    fn test_zero_sides_is_an_error() {
        assert!(SeededRandom::new(1).draw(0, 1, "none").is_err());
    }
}
