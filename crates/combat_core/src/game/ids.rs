//! Strongly typed identifiers for board objects.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Raw numeric value.
            #[must_use]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifies a single unit instance.
    UnitId,
    "unit"
);
id_type!(
    /// Identifies a unit type (infantry, fighter, ...).
    UnitTypeId,
    "type"
);
id_type!(
    /// Identifies a land territory or sea zone.
    TerritoryId,
    "territory"
);
id_type!(
    /// Identifies a player (nation).
    PlayerId,
    "player"
);
