//! Placement regions for measurement jobs.

use rand::Rng;
use serde::{Serialize, Serializer};
use std::fmt;

/// A geographic region a measurement job can be placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    EastUs,
    WestUs,
    CentralUs,
    NorthEurope,
    WestEurope,
    SoutheastAsia,
    EastAsia,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::EastUs,
        Region::WestUs,
        Region::CentralUs,
        Region::NorthEurope,
        Region::WestEurope,
        Region::SoutheastAsia,
        Region::EastAsia,
    ];

    /// Location identifier as the cloud API expects it
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::EastUs => "eastus",
            Region::WestUs => "westus",
            Region::CentralUs => "centralus",
            Region::NorthEurope => "northeurope",
            Region::WestEurope => "westeurope",
            Region::SoutheastAsia => "southeastasia",
            Region::EastAsia => "eastasia",
        }
    }

    /// Uniform choice over all regions
    pub fn choose<R: Rng + ?Sized>(rng: &mut R) -> Region {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    pub fn random() -> Region {
        Self::choose(&mut rand::thread_rng())
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
