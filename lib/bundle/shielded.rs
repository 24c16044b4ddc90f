//! Per-pool shielded component of a bundle.

use bitcoin::{Amount, SignedAmount};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};

use super::slot::{OutputSlot, SpendSlot};
use crate::{
    error::{Incomplete, SlotKind},
    types::{
        Anchor, AmountOverflowError, Binding, FullViewingKey, KeyDerivation,
        Memo, MerklePath, Note, NoteCommitment, Nullifier,
        NullifierDerivingKey, OutgoingViewingKey, Pool, Signature,
        SpendValidatingKey, ValueCommitTrapdoor, ValueCommitment,
        keys::derive_ivk,
        note_encryption::{self, encrypt_note},
        transaction::{OutputEffects, ShieldedEffects, SpendEffects},
    },
};

/// Content of a spend slot: the public inputs of the spend and the
/// private data a prover and signer need
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Spend {
    pub cv: ValueCommitment,
    pub nullifier: Nullifier,
    pub rk: SpendValidatingKey,
    pub note: Note,
    pub witness: MerklePath,
    pub rcv: ValueCommitTrapdoor,
    pub alpha: Scalar,
    pub ak: SpendValidatingKey,
    pub nk: NullifierDerivingKey,
    /// Lets a signer holding the seed find the spending key
    pub key_derivation: Option<KeyDerivation>,
}

impl Spend {
    pub fn new<R>(
        rng: &mut R,
        note: Note,
        witness: MerklePath,
        fvk: &FullViewingKey,
        key_derivation: Option<KeyDerivation>,
    ) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let pool = note.recipient.pool();
        let rcv = ValueCommitTrapdoor::random(rng);
        let alpha = Scalar::random(rng);
        Self {
            cv: ValueCommitment::derive(pool, note.value, &rcv),
            nullifier: note.nullifier(&fvk.nk, witness.position()),
            rk: fvk.ak.randomize(&alpha),
            note,
            witness,
            rcv,
            alpha,
            ak: fvk.ak.clone(),
            nk: fvk.nk,
            key_derivation,
        }
    }

    pub fn value(&self) -> Amount {
        self.note.value
    }

    /// Whether the private data opens the public inputs, with the note in
    /// the tree at `anchor`
    pub(crate) fn is_consistent(&self, pool: Pool, anchor: &Anchor) -> bool {
        self.note.recipient.pool() == pool
            && derive_ivk(&self.ak, &self.nk).owns(&self.note.recipient)
            && self.cv == ValueCommitment::derive(pool, self.note.value, &self.rcv)
            && self.rk == self.ak.randomize(&self.alpha)
            && self.nullifier == self.note.nullifier(&self.nk, self.witness.position())
            && self.witness.root(&self.note.commitment()) == *anchor
    }

    fn effects(&self) -> SpendEffects {
        SpendEffects {
            cv: self.cv.to_bytes(),
            nullifier: self.nullifier.0,
            rk: self.rk.to_bytes(),
        }
    }
}

/// Content of an output slot
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Output {
    pub cv: ValueCommitment,
    pub cmu: NoteCommitment,
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: Vec<u8>,
    pub out_ciphertext: Vec<u8>,
    pub note: Note,
    pub memo: Memo,
    pub rcv: ValueCommitTrapdoor,
}

impl Output {
    /// Build an output and encrypt its note. With `ovk`, the sender can
    /// later recover the output.
    pub fn new<R>(
        rng: &mut R,
        note: Note,
        memo: Memo,
        ovk: Option<&OutgoingViewingKey>,
    ) -> Result<Self, note_encryption::Error>
    where
        R: RngCore + CryptoRng,
    {
        let pool = note.recipient.pool();
        let rcv = ValueCommitTrapdoor::random(rng);
        let cv = ValueCommitment::derive(pool, note.value, &rcv);
        let cmu = note.commitment();
        let encrypted = encrypt_note(rng, &note, &memo, ovk, &cv, &cmu)?;
        Ok(Self {
            cv,
            cmu,
            ephemeral_key: encrypted.ephemeral_key,
            enc_ciphertext: encrypted.enc_ciphertext,
            out_ciphertext: encrypted.out_ciphertext,
            note,
            memo,
            rcv,
        })
    }

    pub fn value(&self) -> Amount {
        self.note.value
    }

    pub(crate) fn is_consistent(&self, pool: Pool) -> bool {
        let g_d = self.note.recipient.diversifier().g_d(pool);
        self.note.recipient.pool() == pool
            && self.cv == ValueCommitment::derive(pool, self.note.value, &self.rcv)
            && self.cmu == self.note.commitment()
            && (self.note.rseed.esk() * g_d).compress().to_bytes()
                == self.ephemeral_key
    }

    fn effects(&self) -> OutputEffects {
        OutputEffects {
            cv: self.cv.to_bytes(),
            cmu: self.cmu.0,
            ephemeral_key: self.ephemeral_key,
            enc_ciphertext: self.enc_ciphertext.clone(),
            out_ciphertext: self.out_ciphertext.clone(),
        }
    }
}

fn sum_values<I>(values: I) -> Result<SignedAmount, AmountOverflowError>
where
    I: IntoIterator<Item = Amount>,
{
    let total = values
        .into_iter()
        .try_fold(Amount::ZERO, |total, value| total.checked_add(value))
        .ok_or(AmountOverflowError)?;
    total.to_signed().map_err(|_| AmountOverflowError)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bundle {
    pub(crate) pool: Pool,
    pub(crate) spends: Vec<SpendSlot>,
    pub(crate) outputs: Vec<OutputSlot>,
    pub(crate) value_balance: SignedAmount,
    pub(crate) anchor: Option<Anchor>,
    pub(crate) binding_sig: Option<Signature<Binding>>,
}

impl Bundle {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            spends: Vec::new(),
            outputs: Vec::new(),
            value_balance: SignedAmount::ZERO,
            anchor: None,
            binding_sig: None,
        }
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn spends(&self) -> &[SpendSlot] {
        &self.spends
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    /// Net value this pool releases to the transparent pool
    pub fn value_balance(&self) -> SignedAmount {
        self.value_balance
    }

    pub fn anchor(&self) -> Option<&Anchor> {
        self.anchor.as_ref()
    }

    pub fn binding_sig(&self) -> Option<&Signature<Binding>> {
        self.binding_sig.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.spends.is_empty() && self.outputs.is_empty()
    }

    pub fn spend_value(&self) -> Result<SignedAmount, AmountOverflowError> {
        sum_values(self.spends.iter().filter_map(|slot| slot.content()).map(Spend::value))
    }

    pub fn output_value(&self) -> Result<SignedAmount, AmountOverflowError> {
        sum_values(
            self.outputs
                .iter()
                .filter_map(|slot| slot.content())
                .map(Output::value),
        )
    }

    /// Σ spends − Σ outputs over populated slots
    pub fn computed_value_balance(&self) -> Result<SignedAmount, AmountOverflowError> {
        self.spend_value()?
            .checked_sub(self.output_value()?)
            .ok_or(AmountOverflowError)
    }

    /// Recompute the value balance after a slot mutation
    pub(crate) fn refresh_value_balance(&mut self) -> Result<(), AmountOverflowError> {
        self.value_balance = self.computed_value_balance()?;
        Ok(())
    }

    pub(crate) fn first_empty_slot(&self) -> Option<Incomplete> {
        let pool = self.pool;
        if let Some(index) = self.spends.iter().position(|slot| slot.is_empty()) {
            return Some(Incomplete::EmptySlot {
                pool,
                kind: SlotKind::Spend,
                index,
            });
        }
        self.outputs
            .iter()
            .position(|slot| slot.is_empty())
            .map(|index| Incomplete::EmptySlot {
                pool,
                kind: SlotKind::Output,
                index,
            })
    }

    /// Effects of a bundle with no empty slots; `None` if the bundle has no
    /// slots at all
    pub(crate) fn effects(&self) -> Result<Option<ShieldedEffects>, Incomplete> {
        if self.is_empty() {
            return Ok(None);
        }
        if let Some(incomplete) = self.first_empty_slot() {
            return Err(incomplete);
        }
        Ok(Some(ShieldedEffects {
            pool: self.pool,
            spends: self
                .spends
                .iter()
                .filter_map(|slot| slot.content())
                .map(Spend::effects)
                .collect(),
            outputs: self
                .outputs
                .iter()
                .filter_map(|slot| slot.content())
                .map(Output::effects)
                .collect(),
            value_balance: self.value_balance.to_sat(),
            anchor: self.anchor,
        }))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, SignedAmount};
    use rand::rngs::OsRng;

    use super::{Bundle, Output, Spend};
    use crate::{
        bundle::slot::Slot,
        types::{CommitmentTree, Memo, Note, Pool, Rseed, SpendingKey},
    };

    fn note(fvk: &crate::types::FullViewingKey, sats: u64) -> Note {
        Note {
            recipient: fvk.address(Pool::Sapling, 0),
            value: Amount::from_sat(sats),
            rseed: Rseed::random(&mut OsRng),
        }
    }

    #[test]
    fn private_data_opens_public_inputs() {
        let fvk = SpendingKey::random(&mut OsRng).full_viewing_key();
        let spent = note(&fvk, 500);
        let mut tree = CommitmentTree::default();
        let position = tree.append(spent.commitment()).unwrap();
        let anchor = tree.root();
        let spend = Spend::new(
            &mut OsRng,
            spent,
            tree.witness(position).unwrap(),
            &fvk,
            None,
        );
        assert!(spend.is_consistent(Pool::Sapling, &anchor));
        assert!(!spend.is_consistent(Pool::Orchard, &anchor));
        let mut tampered = spend.clone();
        tampered.note.value = Amount::from_sat(501);
        assert!(!tampered.is_consistent(Pool::Sapling, &anchor));

        let output =
            Output::new(&mut OsRng, note(&fvk, 200), Memo::default(), Some(&fvk.ovk))
                .unwrap();
        assert!(output.is_consistent(Pool::Sapling));
        let mut tampered = output.clone();
        tampered.ephemeral_key = [0; 32];
        assert!(!tampered.is_consistent(Pool::Sapling));

        let mut bundle = Bundle::new(Pool::Sapling);
        bundle.spends.push(Slot::Populated(spend));
        bundle.outputs.push(Slot::Populated(output));
        bundle.outputs.push(Slot::Empty);
        bundle.refresh_value_balance().unwrap();
        assert_eq!(bundle.value_balance(), SignedAmount::from_sat(300));
        assert!(bundle.effects().is_err());
    }
}
