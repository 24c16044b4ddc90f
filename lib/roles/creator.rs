use serde::{Deserialize, Serialize};

use crate::{
    bundle::{Global, Pczt, Phase},
    chain::ChainOracle,
    error::{Error, SkeletonError},
    types::{
        TxVersion,
        consensus::{DEFAULT_TX_EXPIRY_DELTA, TX_EXPIRY_HEIGHT_THRESHOLD},
    },
};

/// Requested transaction shape. An expiry height of zero means the
/// transaction never expires.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Skeleton {
    pub tx_version: u32,
    pub lock_time: u32,
    pub expiry_height: u32,
}

impl Skeleton {
    /// Version 5, expiring [`DEFAULT_TX_EXPIRY_DELTA`] blocks after `tip_height`
    pub fn for_tip(tip_height: u32) -> Self {
        Self {
            tx_version: TxVersion::V5.to_u32(),
            lock_time: 0,
            expiry_height: tip_height.saturating_add(DEFAULT_TX_EXPIRY_DELTA),
        }
    }
}

/// Create an empty bundle
pub fn create<C>(skeleton: &Skeleton, chain: &C) -> Result<Pczt, Error>
where
    C: ChainOracle,
{
    let tx_version = TxVersion::from_u32(skeleton.tx_version)
        .ok_or(SkeletonError::UnsupportedVersion(skeleton.tx_version))?;
    let expiry_height = skeleton.expiry_height;
    if expiry_height >= TX_EXPIRY_HEIGHT_THRESHOLD {
        return Err(SkeletonError::ExpiryTooHigh(expiry_height).into());
    }
    let tip_height = chain.tip_height();
    if expiry_height != 0 && expiry_height <= tip_height {
        return Err(SkeletonError::ExpiryNotAboveTip {
            expiry_height,
            tip_height,
        }
        .into());
    }
    tracing::debug!(
        %tx_version,
        expiry_height,
        tip_height,
        "created bundle"
    );
    Ok(Pczt::empty(Global {
        tx_version,
        version_group_id: tx_version.version_group_id(),
        consensus_branch_id: tx_version.consensus_branch_id(),
        lock_time: skeleton.lock_time,
        expiry_height,
        phase: Phase::Open,
    }))
}
