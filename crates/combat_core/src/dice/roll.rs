//! Immutable roll results and their compact wire form.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CombatError, Result};
use crate::math::Fixed;

/// Current [`EncodedDiceRoll`] layout.
pub const DICE_ENCODING_VERSION: u16 = 1;

/// How a single die counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieOutcome {
    /// Scored a hit.
    Hit,
    /// Missed.
    Miss,
    /// Rolled but not counted (best-of-n losers, plain rolls).
    Ignored,
}

/// One die: the 0-based value and the strength it was rolled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Die {
    /// Value shown, counted from zero.
    pub value: u32,
    /// Strength the die was rolled at.
    pub rolled_at: u32,
    /// Result.
    pub outcome: DieOutcome,
}

impl Die {
    /// Die judged against `rolled_at`: hits when `value < rolled_at`.
    #[must_use]
    pub const fn judged(value: u32, rolled_at: u32) -> Self {
        Self {
            value,
            rolled_at,
            outcome: if value < rolled_at {
                DieOutcome::Hit
            } else {
                DieOutcome::Miss
            },
        }
    }

    /// Die that does not count.
    #[must_use]
    pub const fn ignored(value: u32, rolled_at: u32) -> Self {
        Self {
            value,
            rolled_at,
            outcome: DieOutcome::Ignored,
        }
    }

    /// Whether the die scored.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        self.outcome == DieOutcome::Hit
    }
}

/// Result of one roll: the dice, the hit count and the expected hits.
///
/// Low-luck rolls score more hits than dice, so `hits` is stored rather
/// than derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EncodedDiceRoll", try_from = "EncodedDiceRoll")]
pub struct DiceRoll {
    dice: Vec<Die>,
    hits: u32,
    expected_hits: Fixed,
}

impl DiceRoll {
    /// Assemble a finished roll.
    #[must_use]
    pub fn new(dice: Vec<Die>, hits: u32, expected_hits: Fixed) -> Self {
        Self {
            dice,
            hits,
            expected_hits,
        }
    }

    /// No dice and no hits.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, Fixed::ZERO)
    }

    /// Dice in roll order.
    #[must_use]
    pub fn dice(&self) -> &[Die] {
        &self.dice
    }

    /// Hits scored.
    #[must_use]
    pub const fn hits(&self) -> u32 {
        self.hits
    }

    /// Average hits for the power rolled.
    #[must_use]
    pub const fn expected_hits(&self) -> Fixed {
        self.expected_hits
    }

    /// Whether nothing was rolled and nothing hit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dice.is_empty() && self.hits == 0
    }

    /// Encode for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CombatError::serialization("dice roll", e))
    }

    /// Decode a roll written by [`DiceRoll::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CombatError::serialization("dice roll", e))
    }
}

impl fmt::Display for DiceRoll {
    /// Dice shown 1-based, comma separated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, die) in self.dice.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", die.value + 1)?;
        }
        Ok(())
    }
}

/// Compact die: values fit a byte because dice never exceed 255 sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedDie {
    /// 0-based value.
    pub value: u8,
    /// Strength rolled at.
    pub rolled_at: u8,
    /// Result.
    pub outcome: DieOutcome,
}

/// Versioned wire form of a [`DiceRoll`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedDiceRoll {
    /// Layout version, checked on decode.
    pub version: u16,
    /// Dice.
    pub dice: Vec<EncodedDie>,
    /// Hits scored.
    pub hits: u32,
    /// Raw bits of the fixed-point expected hits.
    pub expected_hits_bits: i64,
}

impl From<DiceRoll> for EncodedDiceRoll {
    fn from(roll: DiceRoll) -> Self {
        let byte = |v: u32| u8::try_from(v).unwrap_or(u8::MAX);
        Self {
            version: DICE_ENCODING_VERSION,
            dice: roll
                .dice
                .iter()
                .map(|d| EncodedDie {
                    value: byte(d.value),
                    rolled_at: byte(d.rolled_at),
                    outcome: d.outcome,
                })
                .collect(),
            hits: roll.hits,
            expected_hits_bits: roll.expected_hits.to_bits(),
        }
    }
}

impl TryFrom<EncodedDiceRoll> for DiceRoll {
    type Error = CombatError;

    fn try_from(encoded: EncodedDiceRoll) -> Result<Self> {
        if encoded.version != DICE_ENCODING_VERSION {
            return Err(CombatError::Serialization(format!(
                "dice roll encoding version {} is not supported (expected {DICE_ENCODING_VERSION})",
                encoded.version
            )));
        }
        Ok(Self {
            dice: encoded
                .dice
                .into_iter()
                .map(|d| Die {
                    value: u32::from(d.value),
                    rolled_at: u32::from(d.rolled_at),
                    outcome: d.outcome,
                })
                .collect(),
            hits: encoded.hits,
            expected_hits: Fixed::from_bits(encoded.expected_hits_bits),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ratio;

    fn sample() -> DiceRoll {
        DiceRoll::new(
            vec![Die::judged(0, 2), Die::judged(4, 2), Die::ignored(5, 3)],
            1,
            ratio(7, 6),
        )
    }

    #[test]
    fn test_judged_die_hits_below_strength() {
        assert!(Die::judged(1, 2).is_hit());
        assert!(!Die::judged(2, 2).is_hit());
        assert!(!Die::judged(0, 0).is_hit());
    }

    #[test]
    fn test_bytes_preserve_expected_hits_exactly() {
        let roll = sample();
        let decoded = DiceRoll::from_bytes(&roll.to_bytes().expect("encode")).expect("decode");
        assert_eq!(decoded, roll);
        assert_eq!(decoded.expected_hits().to_bits(), ratio(7, 6).to_bits());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut encoded = EncodedDiceRoll::from(sample());
        encoded.version = 99;
        let bytes = bincode::serialize(&encoded).expect("encode");
        let err = DiceRoll::from_bytes(&bytes).expect_err("version check");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_display_is_one_based() {
        assert_eq!(sample().to_string(), "1,5,6");
        assert_eq!(DiceRoll::empty().to_string(), "");
    }
}
