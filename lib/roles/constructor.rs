//! Constructors append slots to an open bundle. Slot order, once set
//! here, never changes.

use bitcoin::Amount;
use rand::{CryptoRng, RngCore};

use crate::{
    bundle::{
        Pczt, Slot, SlotState,
        shielded::{self, Output, Spend},
        transparent,
    },
    error::{Conflict, Error, SlotKind, Unauthorized},
    types::{
        Address, FullViewingKey, KeyDerivation, Memo, MerklePath, Note,
        OutPoint, OutgoingViewingKey, PaymentAddress, Pool, Rseed,
        consensus::MAX_MONEY,
    },
};

/// A payment to a shielded address
#[derive(Clone, Debug)]
pub struct NewOutput {
    pub recipient: PaymentAddress,
    pub value: Amount,
    pub memo: Memo,
    /// Lets the holder of this key recover the output later
    pub ovk: Option<OutgoingViewingKey>,
}

impl NewOutput {
    pub fn new(recipient: PaymentAddress, value: Amount) -> Self {
        Self {
            recipient,
            value,
            memo: Memo::default(),
            ovk: None,
        }
    }

    fn build<R>(&self, rng: &mut R) -> Result<Output, Error>
    where
        R: RngCore + CryptoRng,
    {
        check_amount(self.value)?;
        let note = Note {
            recipient: self.recipient,
            value: self.value,
            rseed: Rseed::random(rng),
        };
        Ok(Output::new(rng, note, self.memo.clone(), self.ovk.as_ref())?)
    }
}

pub(crate) fn check_amount(value: Amount) -> Result<(), Error> {
    if value > MAX_MONEY {
        Err(Error::AmountOutOfRange(value))
    } else {
        Ok(())
    }
}

/// Append a spend to `bundle`, establishing its anchor if this is the
/// first spend
pub(crate) fn push_spend(
    bundle: &mut shielded::Bundle,
    spend: Spend,
) -> Result<usize, Error> {
    let pool = bundle.pool;
    let anchor = spend.witness.root(&spend.note.commitment());
    match bundle.anchor {
        Some(existing) if existing != anchor => {
            return Err(Error::StaleAnchor { pool, anchor });
        }
        Some(_) => (),
        None => bundle.anchor = Some(anchor),
    }
    let duplicate = bundle
        .spends
        .iter()
        .filter_map(Slot::content)
        .any(|existing| existing.nullifier == spend.nullifier);
    if duplicate {
        return Err(Conflict::DuplicateNullifier {
            pool,
            nullifier: spend.nullifier,
        }
        .into());
    }
    bundle.spends.push(Slot::Populated(spend));
    bundle.refresh_value_balance()?;
    Ok(bundle.spends.len() - 1)
}

pub(crate) fn push_output(
    bundle: &mut shielded::Bundle,
    slot: Slot<Output, std::convert::Infallible>,
) -> Result<usize, Error> {
    bundle.outputs.push(slot);
    bundle.refresh_value_balance()?;
    Ok(bundle.outputs.len() - 1)
}

/// Append a populated output slot in the recipient's pool
pub fn add_output<R>(
    pczt: &Pczt,
    rng: &mut R,
    output: &NewOutput,
) -> Result<Pczt, Error>
where
    R: RngCore + CryptoRng,
{
    pczt.ensure_open()?;
    let pool = output.recipient.pool();
    let mut res = pczt.clone();
    let bundle = res.shielded_mut(pool)?;
    let content = output.build(rng)?;
    let index = push_output(bundle, Slot::Populated(content))?;
    tracing::debug!(
        %pool,
        index,
        value = %output.value.display_dynamic(),
        "added output"
    );
    Ok(res)
}

/// Append an empty output slot, to be filled with [`fill_output`]
pub fn reserve_output(pczt: &Pczt, pool: Pool) -> Result<(Pczt, usize), Error> {
    pczt.ensure_open()?;
    let mut res = pczt.clone();
    let index = push_output(res.shielded_mut(pool)?, Slot::Empty)?;
    tracing::debug!(%pool, index, "reserved output slot");
    Ok((res, index))
}

/// Populate a reserved output slot
pub fn fill_output<R>(
    pczt: &Pczt,
    rng: &mut R,
    index: usize,
    output: &NewOutput,
) -> Result<Pczt, Error>
where
    R: RngCore + CryptoRng,
{
    pczt.ensure_open()?;
    let pool = output.recipient.pool();
    let mut res = pczt.clone();
    let bundle = res.shielded_mut(pool)?;
    let slot = bundle.outputs.get_mut(index).ok_or(Error::SlotOutOfRange {
        pool,
        kind: SlotKind::Output,
        index,
    })?;
    if !slot.is_empty() {
        return Err(Error::UnexpectedSlotState {
            pool,
            kind: SlotKind::Output,
            index,
            expected: SlotState::Empty,
            actual: slot.state(),
        });
    }
    *slot = Slot::Populated(output.build(rng)?);
    bundle.refresh_value_balance()?;
    tracing::debug!(%pool, index, "filled output slot");
    Ok(res)
}

/// Append a spend of `note`, owned by `fvk`. The witness must lead to the
/// same anchor as the pool's other spends.
pub fn add_spend<R>(
    pczt: &Pczt,
    rng: &mut R,
    note: Note,
    witness: MerklePath,
    fvk: &FullViewingKey,
    key_derivation: Option<KeyDerivation>,
) -> Result<Pczt, Error>
where
    R: RngCore + CryptoRng,
{
    pczt.ensure_open()?;
    check_amount(note.value)?;
    if !fvk.incoming_viewing_key().owns(&note.recipient) {
        return Err(Unauthorized::Ownership {
            identity: note.recipient,
            cmu: note.commitment(),
        }
        .into());
    }
    let pool = note.recipient.pool();
    let mut res = pczt.clone();
    let bundle = res.shielded_mut(pool)?;
    let spend = Spend::new(rng, note, witness, fvk, key_derivation);
    let index = push_spend(bundle, spend)?;
    tracing::debug!(%pool, index, "added spend");
    Ok(res)
}

pub fn add_transparent_input(
    pczt: &Pczt,
    prevout: OutPoint,
    value: Amount,
    address: Address,
) -> Result<Pczt, Error> {
    pczt.ensure_open()?;
    check_amount(value)?;
    if pczt
        .transparent_inputs
        .iter()
        .any(|input| input.prevout == prevout)
    {
        return Err(Conflict::DuplicatePrevout(prevout).into());
    }
    let mut res = pczt.clone();
    res.transparent_inputs
        .push(transparent::Input::new(prevout, value, address));
    tracing::debug!(%prevout, "added transparent input");
    Ok(res)
}

pub fn add_transparent_output(
    pczt: &Pczt,
    address: Address,
    value: Amount,
) -> Result<Pczt, Error> {
    pczt.ensure_open()?;
    check_amount(value)?;
    let mut res = pczt.clone();
    res.transparent_outputs
        .push(transparent::Output { value, address });
    tracing::debug!(%address, "added transparent output");
    Ok(res)
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, SignedAmount};
    use rand::rngs::OsRng;

    use super::{
        NewOutput, add_output, add_spend, add_transparent_input,
        add_transparent_output, fill_output, reserve_output,
    };
    use crate::{
        bundle::{Pczt, SlotState},
        chain::MemoryChain,
        error::{Conflict, Error, Incomplete},
        roles::{Skeleton, create, seal},
        types::{
            Address, CommitmentTree, Note, OutPoint, Pool, Rseed, SpendingKey,
            Txid, consensus::MAX_MONEY,
        },
    };

    fn v4() -> Pczt {
        let skeleton = Skeleton {
            tx_version: 4,
            ..Skeleton::for_tip(0)
        };
        create(&skeleton, &MemoryChain::new()).unwrap()
    }

    fn v5() -> Pczt {
        create(&Skeleton::for_tip(0), &MemoryChain::new()).unwrap()
    }

    #[test]
    fn outputs_update_value_balance() {
        let fvk = SpendingKey::random(&mut OsRng).full_viewing_key();
        let output = NewOutput::new(fvk.address(Pool::Orchard, 0), Amount::from_sat(700));
        let pczt = add_output(&v5(), &mut OsRng, &output).unwrap();
        let bundle = pczt.shielded(Pool::Orchard).unwrap();
        assert_eq!(bundle.outputs().len(), 1);
        assert_eq!(bundle.outputs()[0].state(), SlotState::Populated);
        assert_eq!(bundle.value_balance(), SignedAmount::from_sat(-700));
        assert_eq!(pczt.fee().unwrap(), SignedAmount::from_sat(-700));

        assert!(matches!(
            add_output(&v4(), &mut OsRng, &output),
            Err(Error::UnsupportedPool {
                pool: Pool::Orchard,
                ..
            })
        ));
        let too_much = NewOutput::new(
            fvk.address(Pool::Sapling, 0),
            MAX_MONEY + Amount::from_sat(1),
        );
        assert!(matches!(
            add_output(&v5(), &mut OsRng, &too_much),
            Err(Error::AmountOutOfRange(_))
        ));
    }

    #[test]
    fn reserved_slots() {
        let fvk = SpendingKey::random(&mut OsRng).full_viewing_key();
        let output = NewOutput::new(fvk.address(Pool::Sapling, 0), Amount::from_sat(5));
        let (pczt, index) = reserve_output(&v5(), Pool::Sapling).unwrap();
        assert_eq!(index, 0);
        assert!(matches!(
            seal(&pczt),
            Err(Error::IncompleteBundle(Incomplete::EmptySlot { index: 0, .. }))
        ));
        assert!(matches!(
            fill_output(&pczt, &mut OsRng, 1, &output),
            Err(Error::SlotOutOfRange { index: 1, .. })
        ));
        let filled = fill_output(&pczt, &mut OsRng, 0, &output).unwrap();
        assert_eq!(
            filled.shielded(Pool::Sapling).unwrap().value_balance(),
            SignedAmount::from_sat(-5)
        );
        assert!(matches!(
            fill_output(&filled, &mut OsRng, 0, &output),
            Err(Error::UnexpectedSlotState {
                actual: SlotState::Populated,
                ..
            })
        ));
        let sealed = seal(&filled).unwrap();
        assert!(matches!(
            add_output(&sealed, &mut OsRng, &output),
            Err(Error::NotModifiable)
        ));
    }

    #[test]
    fn spends_share_an_anchor() {
        let sk = SpendingKey::random(&mut OsRng);
        let fvk = sk.full_viewing_key();
        let note = |sats| Note {
            recipient: fvk.address(Pool::Sapling, 0),
            value: Amount::from_sat(sats),
            rseed: Rseed::random(&mut OsRng),
        };
        let (first, second, third) = (note(10), note(20), note(30));
        let mut tree = CommitmentTree::default();
        tree.append(first.commitment()).unwrap();
        tree.append(second.commitment()).unwrap();
        let pczt = add_spend(&v5(), &mut OsRng, first, tree.witness(0).unwrap(), &fvk, None)
            .unwrap();
        let pczt =
            add_spend(&pczt, &mut OsRng, second, tree.witness(1).unwrap(), &fvk, None)
                .unwrap();
        let bundle = pczt.shielded(Pool::Sapling).unwrap();
        assert_eq!(bundle.anchor(), Some(&tree.root()));
        assert_eq!(bundle.value_balance(), SignedAmount::from_sat(30));

        assert!(matches!(
            add_spend(&pczt, &mut OsRng, first, tree.witness(0).unwrap(), &fvk, None),
            Err(Error::ConflictingSlotContent(
                Conflict::DuplicateNullifier { .. }
            ))
        ));
        tree.append(third.commitment()).unwrap();
        assert!(matches!(
            add_spend(&pczt, &mut OsRng, third, tree.witness(2).unwrap(), &fvk, None),
            Err(Error::StaleAnchor { .. })
        ));
        let stranger = SpendingKey::random(&mut OsRng).full_viewing_key();
        assert!(matches!(
            add_spend(&pczt, &mut OsRng, third, tree.witness(2).unwrap(), &stranger, None),
            Err(Error::NotAuthorized(_))
        ));
    }

    #[test]
    fn transparent_io() {
        let prevout = OutPoint {
            txid: Txid([1; 32]),
            vout: 0,
        };
        let address = Address([2; 20]);
        let pczt =
            add_transparent_input(&v5(), prevout, Amount::from_sat(50), address).unwrap();
        let pczt = add_transparent_output(&pczt, address, Amount::from_sat(40)).unwrap();
        assert_eq!(pczt.fee().unwrap(), SignedAmount::from_sat(10));
        assert!(matches!(
            add_transparent_input(&pczt, prevout, Amount::from_sat(50), address),
            Err(Error::ConflictingSlotContent(Conflict::DuplicatePrevout(_)))
        ));
    }
}
