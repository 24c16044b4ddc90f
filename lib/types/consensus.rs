//! Consensus constants relevant to transaction construction

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use super::Pool;

/// Number of blocks after the chain tip at which a newly created
/// transaction expires, unless the creator says otherwise
pub const DEFAULT_TX_EXPIRY_DELTA: u32 = 20;

/// Expiry heights at or above this value are invalid
pub const TX_EXPIRY_HEIGHT_THRESHOLD: u32 = 500_000_000;

pub const SAPLING_VERSION_GROUP_ID: u32 = 0x892F_2085;
pub const V5_VERSION_GROUP_ID: u32 = 0x26A7_270A;

pub const SAPLING_BRANCH_ID: u32 = 0x76B8_09BB;
pub const NU5_BRANCH_ID: u32 = 0xC2D6_D0B4;

/// Maximum value of any single amount, and of any sum of amounts
pub const MAX_MONEY: Amount = Amount::MAX_MONEY;

/// Transaction format versions that can be staged
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
)]
pub enum TxVersion {
    /// Sapling-era transactions, which only carry a Sapling bundle
    #[strum(to_string = "4")]
    V4,
    #[strum(to_string = "5")]
    V5,
}

impl TxVersion {
    pub fn from_u32(version: u32) -> Option<Self> {
        match version {
            4 => Some(Self::V4),
            5 => Some(Self::V5),
            _ => None,
        }
    }

    pub const fn to_u32(self) -> u32 {
        match self {
            Self::V4 => 4,
            Self::V5 => 5,
        }
    }

    pub const fn version_group_id(self) -> u32 {
        match self {
            Self::V4 => SAPLING_VERSION_GROUP_ID,
            Self::V5 => V5_VERSION_GROUP_ID,
        }
    }

    pub const fn consensus_branch_id(self) -> u32 {
        match self {
            Self::V4 => SAPLING_BRANCH_ID,
            Self::V5 => NU5_BRANCH_ID,
        }
    }

    pub const fn supports(self, pool: Pool) -> bool {
        match (self, pool) {
            (_, Pool::Sapling) => true,
            (Self::V5, Pool::Orchard) => true,
            (Self::V4, Pool::Orchard) => false,
        }
    }
}
