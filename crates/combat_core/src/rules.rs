//! Ruleset switches that change how battles resolve.
//!
//! Every variant behaviour of the engine is driven from [`BattleRules`]; no
//! algorithm reads a global property. Rules load from RON:
//!
//! ```ron
//! BattleRules(
//!     dice_sides: 6,
//!     low_luck: true,
//!     neutral_charge: 3,
//! )
//! ```
//!
//! | Flag | Effect |
//! |------|--------|
//! | `dice_sides` | Sides of every die unless an AA unit overrides it |
//! | `low_luck` | All rolls: `power / sides` guaranteed hits plus one die for the remainder |
//! | `low_luck_aa_only` | Low luck for AA rolls and AA casualties only |
//! | `choose_aa_casualties` | AA casualties are chosen by the owning player |
//! | `roll_aa_individually` | Each AA hit die is mapped to a specific aircraft |
//! | `random_aa_casualties` | AA casualties are drawn at random |
//! | `player_selects_casualties` | The player picks casualties when hits do not kill everything |
//! | `edit_mode` | The player may remove any units, regardless of hits |
//! | `partial_amphibious_retreat` | Amphibious units die before units that could retreat |
//! | `transport_casualties_restricted` | Only explicitly granted extra hits apply |
//! | `lhtr_heavy_bombers` | Multi-roll units keep their best die plus a bonus |
//! | `neutral_charge` | PUs paid to enter a neutral territory |
//! | `pacific_theater` | Captured capital PUs also score capture victory points |
//! | `units_destroyed_instead_of_captured` | Types flagged destroyed-when-captured are removed on capture |
//! | `raids_may_be_preceded_by_air_battles` | Bombing runs first fight interceptors |
//! | `battles_may_be_preceded_by_air_battles` | Land and sea battles first fight an air battle |
//! | `transport_controls_sea_zone` | Transports alone can contest a sea zone |
//! | `casualty_selection_retries` | Attempts allowed for an inconsistent casualty choice |
//! | `max_battle_rounds` | Rounds before a battle stops; 0 fights to the end |
//! | `order_of_losses_cache_capacity` | Entries kept by the casualty ordering cache |

use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};

/// Ruleset configuration passed explicitly into every combat computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleRules {
    /// Sides of a die.
    pub dice_sides: u32,
    /// Low-luck dice for every roll.
    pub low_luck: bool,
    /// Low-luck dice for AA only.
    pub low_luck_aa_only: bool,
    /// AA casualties are chosen by the player.
    pub choose_aa_casualties: bool,
    /// AA dice map one-to-one onto aircraft.
    pub roll_aa_individually: bool,
    /// AA casualties are picked at random.
    pub random_aa_casualties: bool,
    /// The player picks casualties when hits fall short of killing everything.
    pub player_selects_casualties: bool,
    /// Casualty selection ignores hits.
    pub edit_mode: bool,
    /// Kill amphibious units before units that could retreat.
    pub partial_amphibious_retreat: bool,
    /// Only explicitly granted extra hits count.
    pub transport_casualties_restricted: bool,
    /// Best-of-n rolling for multi-roll units.
    pub lhtr_heavy_bombers: bool,
    /// PUs charged for entering a neutral territory.
    pub neutral_charge: i32,
    /// Captured capital PUs score victory points.
    pub pacific_theater: bool,
    /// Honour destroyed-when-captured unit flags.
    pub units_destroyed_instead_of_captured: bool,
    /// Bombing runs fight interceptors first.
    pub raids_may_be_preceded_by_air_battles: bool,
    /// Land and sea battles fight an air battle first.
    pub battles_may_be_preceded_by_air_battles: bool,
    /// Transports count towards sea zone control.
    pub transport_controls_sea_zone: bool,
    /// Attempts allowed for an inconsistent casualty choice.
    pub casualty_selection_retries: u32,
    /// Round limit; zero fights until one side is gone.
    pub max_battle_rounds: u32,
    /// Order-of-losses cache bound.
    pub order_of_losses_cache_capacity: usize,
}

impl Default for BattleRules {
    fn default() -> Self {
        Self {
            dice_sides: 6,
            low_luck: false,
            low_luck_aa_only: false,
            choose_aa_casualties: false,
            roll_aa_individually: false,
            random_aa_casualties: false,
            player_selects_casualties: true,
            edit_mode: false,
            partial_amphibious_retreat: false,
            transport_casualties_restricted: false,
            lhtr_heavy_bombers: false,
            neutral_charge: 0,
            pacific_theater: false,
            units_destroyed_instead_of_captured: true,
            raids_may_be_preceded_by_air_battles: false,
            battles_may_be_preceded_by_air_battles: false,
            transport_controls_sea_zone: false,
            casualty_selection_retries: 3,
            max_battle_rounds: 0,
            order_of_losses_cache_capacity: 1024,
        }
    }
}

impl BattleRules {
    /// Parse rules from RON text; missing fields keep their defaults.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let rules: Self = ron::from_str(text).map_err(|e| CombatError::Data {
            source_name: "battle rules".to_string(),
            message: e.to_string(),
        })?;
        let problems = rules.validate();
        if problems.is_empty() {
            Ok(rules)
        } else {
            Err(CombatError::Data {
                source_name: "battle rules".to_string(),
                message: problems.join("; "),
            })
        }
    }

    /// Check internal consistency. Returns a list of problems.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.dice_sides == 0 {
            problems.push("dice_sides must be at least 1".to_string());
        }
        if self.dice_sides > 255 {
            problems.push(format!("dice_sides {} exceeds 255", self.dice_sides));
        }
        if self.neutral_charge < 0 {
            problems.push("neutral_charge cannot be negative".to_string());
        }
        if self.casualty_selection_retries == 0 {
            problems.push("casualty_selection_retries must allow one attempt".to_string());
        }
        problems
    }

    /// Whether AA rolls use low luck.
    #[must_use]
    pub const fn low_luck_for_aa(&self) -> bool {
        self.low_luck || self.low_luck_aa_only
    }

    /// Extra strength per additional die for best-of-n rolling.
    #[must_use]
    pub fn extra_roll_bonus(&self) -> u32 {
        (self.dice_sides / 6).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BattleRules::default().validate().is_empty());
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let rules = BattleRules::from_ron_str("(low_luck: true, neutral_charge: 3)").expect("parse");
        assert!(rules.low_luck);
        assert_eq!(rules.neutral_charge, 3);
        assert_eq!(rules.dice_sides, 6);
        assert!(rules.player_selects_casualties);
    }

    #[test]
    fn test_zero_sided_dice_rejected() {
        assert!(BattleRules::from_ron_str("(dice_sides: 0)").is_err());
    }

    #[test]
    fn test_extra_roll_bonus_scales_with_dice() {
        let mut rules = BattleRules::default();
        assert_eq!(rules.extra_roll_bonus(), 1);
        rules.dice_sides = 12;
        assert_eq!(rules.extra_roll_bonus(), 2);
    }
}
