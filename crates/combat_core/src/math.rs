//! Fixed-point math utilities for deterministic dice bookkeeping.
//!
//! Expected hit counts are fractional (`power / dice_sides`). They are kept
//! in fixed-point so every peer computes and serializes the exact same bits.

use fixed::types::I32F32;

/// Fixed-point number type for all combat math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
pub type Fixed = I32F32;

/// Exact quotient `numerator / denominator` as a fixed-point value.
///
/// A zero denominator yields zero; callers treat that as "no power".
#[must_use]
pub fn ratio(numerator: u32, denominator: u32) -> Fixed {
    if denominator == 0 {
        return Fixed::ZERO;
    }
    Fixed::from_num(numerator) / Fixed::from_num(denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_is_exact_for_whole_numbers() {
        assert_eq!(ratio(12, 6), Fixed::from_num(2));
        assert_eq!(ratio(0, 6), Fixed::ZERO);
    }

    #[test]
    fn test_ratio_fraction() {
        let third = ratio(2, 6);
        assert!(third > Fixed::from_num(0.33));
        assert!(third < Fixed::from_num(0.34));
    }

    #[test]
    fn test_ratio_zero_denominator() {
        assert_eq!(ratio(5, 0), Fixed::ZERO);
    }
}
