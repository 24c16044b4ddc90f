//! The partially created transaction and its components.

use std::collections::BTreeMap;

use bitcoin::{Amount, SignedAmount};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator as _;

pub mod codec;
pub mod shielded;
pub mod slot;
pub mod transparent;

pub use slot::{OutputSlot, Slot, SlotState, SpendSlot};

use crate::{
    error::{Error, Incomplete, SlotKind},
    types::{
        AmountOverflowError, Pool, Sighash, TxVersion,
        transaction::{Effects, Header},
    },
};

/// Whether the slot set may still change
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Slots may be added
    Open,
    /// The slot set is fixed; slots may only progress
    Sealed,
    /// Verified and bound. No role accepts the bundle any more.
    Finalized,
}

/// Derived progress of the bundle as a whole
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BundleState {
    Draft,
    Finalizable,
    Finalized,
}

/// Transaction skeleton, and the phase of the bundle
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Global {
    pub tx_version: TxVersion,
    pub version_group_id: u32,
    pub consensus_branch_id: u32,
    pub lock_time: u32,
    pub expiry_height: u32,
    pub(crate) phase: Phase,
}

impl Global {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn same_skeleton(&self, other: &Self) -> bool {
        self.tx_version == other.tx_version
            && self.version_group_id == other.version_group_id
            && self.consensus_branch_id == other.consensus_branch_id
            && self.lock_time == other.lock_time
            && self.expiry_height == other.expiry_height
    }

    fn header(&self) -> Header {
        Header {
            version: self.tx_version.to_u32(),
            version_group_id: self.version_group_id,
            consensus_branch_id: self.consensus_branch_id,
            lock_time: self.lock_time,
            expiry_height: self.expiry_height,
        }
    }
}

/// A partially created transaction
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Pczt {
    pub(crate) global: Global,
    pub(crate) transparent_inputs: Vec<transparent::Input>,
    pub(crate) transparent_outputs: Vec<transparent::Output>,
    pub(crate) shielded: BTreeMap<Pool, shielded::Bundle>,
}

impl Pczt {
    /// Bundle with no slots, and an empty component for every pool the
    /// version supports
    pub(crate) fn empty(global: Global) -> Self {
        let shielded = Pool::iter()
            .filter(|pool| global.tx_version.supports(*pool))
            .map(|pool| (pool, shielded::Bundle::new(pool)))
            .collect();
        Self {
            global,
            transparent_inputs: Vec::new(),
            transparent_outputs: Vec::new(),
            shielded,
        }
    }

    pub fn global(&self) -> &Global {
        &self.global
    }

    pub fn transparent_inputs(&self) -> &[transparent::Input] {
        &self.transparent_inputs
    }

    pub fn transparent_outputs(&self) -> &[transparent::Output] {
        &self.transparent_outputs
    }

    pub fn shielded(&self, pool: Pool) -> Option<&shielded::Bundle> {
        self.shielded.get(&pool)
    }

    pub fn shielded_bundles(&self) -> impl Iterator<Item = &shielded::Bundle> {
        self.shielded.values()
    }

    /// Component for `pool`, if the transaction version supports it
    pub(crate) fn shielded_mut(
        &mut self,
        pool: Pool,
    ) -> Result<&mut shielded::Bundle, Error> {
        let tx_version = self.global.tx_version;
        if !tx_version.supports(pool) {
            return Err(Error::UnsupportedPool { pool, tx_version });
        }
        Ok(self
            .shielded
            .entry(pool)
            .or_insert_with(|| shielded::Bundle::new(pool)))
    }

    /// Fails unless slots may still be added
    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        match self.global.phase {
            Phase::Open => Ok(()),
            Phase::Sealed => Err(Error::NotModifiable),
            Phase::Finalized => Err(Error::BundleFinalized),
        }
    }

    /// Fails if the bundle is finalized
    pub(crate) fn ensure_not_finalized(&self) -> Result<(), Error> {
        if self.global.phase == Phase::Finalized {
            Err(Error::BundleFinalized)
        } else {
            Ok(())
        }
    }

    pub fn slot_count(&self) -> usize {
        self.transparent_inputs.len()
            + self.transparent_outputs.len()
            + self
                .shielded
                .values()
                .map(|bundle| bundle.spends.len() + bundle.outputs.len())
                .sum::<usize>()
    }

    pub(crate) fn first_empty_slot(&self) -> Option<Incomplete> {
        self.shielded.values().find_map(shielded::Bundle::first_empty_slot)
    }

    /// The first reason the bundle is not yet finalizable, if any
    pub fn incomplete(&self) -> Option<Incomplete> {
        if self.slot_count() == 0 {
            return Some(Incomplete::NoSlots);
        }
        if let Some(incomplete) = self.first_empty_slot() {
            return Some(incomplete);
        }
        if let Some(bundle) = self
            .shielded
            .values()
            .find(|bundle| !bundle.spends.is_empty() && bundle.anchor.is_none())
        {
            return Some(Incomplete::MissingAnchor { pool: bundle.pool });
        }
        if self.global.phase == Phase::Open {
            return Some(Incomplete::Unsealed);
        }
        for bundle in self.shielded.values() {
            let pool = bundle.pool;
            for (index, slot) in bundle.spends.iter().enumerate() {
                match slot.state() {
                    SlotState::Authorized => (),
                    SlotState::Proven => {
                        return Some(Incomplete::UnauthorizedSpend { pool, index });
                    }
                    SlotState::Empty | SlotState::Populated => {
                        return Some(Incomplete::UnprovenSlot {
                            pool,
                            kind: SlotKind::Spend,
                            index,
                        });
                    }
                }
            }
            if let Some(index) = bundle
                .outputs
                .iter()
                .position(|slot| slot.state() < SlotState::Proven)
            {
                return Some(Incomplete::UnprovenSlot {
                    pool,
                    kind: SlotKind::Output,
                    index,
                });
            }
        }
        self.transparent_inputs
            .iter()
            .position(|input| !input.is_authorized())
            .map(Incomplete::UnauthorizedTransparentInput)
    }

    pub fn state(&self) -> BundleState {
        match self.global.phase {
            Phase::Finalized => BundleState::Finalized,
            Phase::Sealed if self.incomplete().is_none() => BundleState::Finalizable,
            Phase::Open | Phase::Sealed => BundleState::Draft,
        }
    }

    pub fn transparent_value_in(&self) -> Result<Amount, AmountOverflowError> {
        self.transparent_inputs
            .iter()
            .try_fold(Amount::ZERO, |total, input| total.checked_add(input.value))
            .ok_or(AmountOverflowError)
    }

    pub fn transparent_value_out(&self) -> Result<Amount, AmountOverflowError> {
        self.transparent_outputs
            .iter()
            .try_fold(Amount::ZERO, |total, output| total.checked_add(output.value))
            .ok_or(AmountOverflowError)
    }

    /// Σ transparent in + Σ value balances − Σ transparent out. Negative
    /// while the bundle is underfunded.
    pub fn fee(&self) -> Result<SignedAmount, AmountOverflowError> {
        let transparent_in = self
            .transparent_value_in()?
            .to_signed()
            .map_err(|_| AmountOverflowError)?;
        let transparent_out = self
            .transparent_value_out()?
            .to_signed()
            .map_err(|_| AmountOverflowError)?;
        self.shielded
            .values()
            .try_fold(transparent_in, |total, bundle| {
                total.checked_add(bundle.value_balance)
            })
            .and_then(|total| total.checked_sub(transparent_out))
            .ok_or(AmountOverflowError)
    }

    /// Everything the transaction does, excluding proofs and signatures.
    /// Only defined once no slot is empty.
    pub fn effects(&self) -> Result<Effects, Error> {
        let shielded = self
            .shielded
            .values()
            .map(shielded::Bundle::effects)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        Ok(Effects {
            header: self.global.header(),
            transparent_inputs: self
                .transparent_inputs
                .iter()
                .map(transparent::Input::effects)
                .collect(),
            transparent_outputs: self
                .transparent_outputs
                .iter()
                .map(transparent::Output::effects)
                .collect(),
            shielded,
        })
    }

    /// Digest signed by every authorization and bound into every proof
    pub fn sighash(&self) -> Result<Sighash, Error> {
        Ok(self.effects()?.sighash())
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(codec::decode(bytes)?)
    }
}
