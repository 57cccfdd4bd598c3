use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumCount, EnumIter, EnumString};

/// Energy forms tracked by their own balance equation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Carrier {
    Electricity,
    Heat,
    Cooling,
    Gas,
    Hydrogen,
    Biomass,
    Waste,
}

impl Carrier {
    /// Dense index, used to address per-carrier arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Carriers delivered by truck or pipeline to the node that burns them,
    /// rather than through a shared bus.
    pub fn is_delivered_fuel(self) -> bool {
        matches!(self, Carrier::Hydrogen | Carrier::Biomass | Carrier::Waste)
    }
}
