//! The Funder balances a bundle with spends of its identity's notes.

use bitcoin::{Amount, SignedAmount};
use rand::SeedableRng as _;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use super::constructor::{push_output, push_spend};
use crate::{
    bundle::{
        Pczt, Slot,
        shielded::{Output, Spend},
    },
    chain::ChainOracle,
    error::{Error, Unauthorized},
    types::{AmountOverflowError, Memo, Note, PaymentAddress, Rseed},
    wallet::{NoteInventory, OwnershipProof, SpendableNote},
};

const RNG_CONTEXT: &str = "pczt 2025 funder rng";

/// How the Funder covers the deficit
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FundingPolicy {
    /// Fee the funded bundle must leave
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub fee: Amount,
    /// Return any surplus to the funding identity in a change output,
    /// rather than leaving it as fee
    pub change: bool,
}

impl FundingPolicy {
    pub const DEFAULT_FEE: Amount = Amount::from_sat(10_000);

    pub fn standard() -> Self {
        Self {
            fee: Self::DEFAULT_FEE,
            change: true,
        }
    }
}

/// Randomness for the spends and change output is derived from the input
/// bundle and the identity, so funding is deterministic
fn funding_rng(pczt: &Pczt, identity: &PaymentAddress) -> ChaCha20Rng {
    let mut hasher = blake3::Hasher::new_derive_key(RNG_CONTEXT);
    hasher.update(&pczt.encode());
    hasher.update(&identity.to_bytes());
    ChaCha20Rng::from_seed(hasher.finalize().into())
}

/// Spendable notes, largest first, ties broken by note commitment
fn candidates(mut notes: Vec<SpendableNote>) -> Vec<SpendableNote> {
    notes.sort_by(|a, b| {
        b.note
            .value
            .cmp(&a.note.value)
            .then_with(|| a.note.commitment().cmp(&b.note.commitment()))
    });
    notes
}

struct Selected {
    note: SpendableNote,
    ownership: OwnershipProof,
}

/// Attach spends of `identity`'s notes until the bundle pays its outputs
/// and `policy.fee`. A bundle that already does is returned unchanged.
pub fn fund<W, C>(
    pczt: &Pczt,
    identity: &PaymentAddress,
    policy: &FundingPolicy,
    inventory: &W,
    chain: &C,
) -> Result<Pczt, Error>
where
    W: NoteInventory,
    C: ChainOracle,
{
    pczt.ensure_open()?;
    let fee = policy
        .fee
        .to_signed()
        .map_err(|_| Error::AmountOutOfRange(policy.fee))?;
    let deficit = fee
        .checked_sub(pczt.fee()?)
        .ok_or(AmountOverflowError)?;
    if deficit <= SignedAmount::ZERO {
        tracing::debug!(%identity, "bundle is already funded");
        return Ok(pczt.clone());
    }
    let deficit = deficit.unsigned_abs();
    let pool = identity.pool();
    let mut res = pczt.clone();
    let bundle = res.shielded_mut(pool)?;
    // New spends must share the anchor of any existing ones
    let anchor = match bundle.anchor {
        Some(existing) if !chain.is_anchor_valid(pool, &existing) => {
            tracing::warn!(%pool, %existing, "bundle anchor is outside the accepted window");
            return Err(Error::StaleAnchor {
                pool,
                anchor: existing,
            });
        }
        Some(existing) => existing,
        None => chain.current_anchor(pool),
    };
    let spent: Vec<_> = bundle
        .spends
        .iter()
        .filter_map(Slot::content)
        .map(|spend| spend.nullifier)
        .collect();
    let notes = inventory
        .list_spendable_notes(identity)
        .map_err(Error::wallet)?;
    let mut selected = Vec::new();
    let mut total = Amount::ZERO;
    for note in candidates(notes) {
        if total >= deficit {
            break;
        }
        let cmu = note.note.commitment();
        if note.witness.root(&cmu) != anchor {
            tracing::warn!(%pool, %cmu, "skipping note witnessed against another anchor");
            continue;
        }
        let ownership = inventory
            .prove_ownership(identity, &note.note)
            .map_err(Error::wallet)?
            .ok_or(Unauthorized::Ownership {
                identity: *identity,
                cmu,
            })?;
        let nullifier = note.note.nullifier(&ownership.fvk.nk, note.witness.position());
        if spent.contains(&nullifier) {
            tracing::trace!(%nullifier, "note is already spent in this bundle");
            continue;
        }
        total = total
            .checked_add(note.note.value)
            .ok_or(AmountOverflowError)?;
        tracing::trace!(
            %cmu,
            value = %note.note.value.display_dynamic(),
            total = %total.display_dynamic(),
            deficit = %deficit.display_dynamic(),
            "selected note"
        );
        selected.push(Selected { note, ownership });
    }
    if total < deficit {
        return Err(Error::InsufficientFunds {
            required: deficit,
            available: total,
        });
    }
    let mut rng = funding_rng(pczt, identity);
    let ovk = selected.first().map(|selected| selected.ownership.fvk.ovk);
    for Selected { note, ownership } in selected {
        let spend = Spend::new(
            &mut rng,
            note.note,
            note.witness,
            &ownership.fvk,
            Some(ownership.key_derivation),
        );
        push_spend(bundle, spend)?;
    }
    let surplus = total - deficit;
    if policy.change && surplus > Amount::ZERO {
        let note = Note {
            recipient: *identity,
            value: surplus,
            rseed: Rseed::random(&mut rng),
        };
        let change = Output::new(&mut rng, note, Memo::default(), ovk.as_ref())?;
        push_output(bundle, Slot::Populated(change))?;
    }
    let fee = res.fee()?;
    tracing::debug!(
        %pool,
        %identity,
        deficit = %deficit.display_dynamic(),
        fee = %fee.display_dynamic(),
        "funded bundle"
    );
    Ok(res)
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, SignedAmount};
    use rand::rngs::OsRng;

    use super::{FundingPolicy, fund};
    use crate::{
        bundle::{Pczt, Slot},
        chain::{ChainOracle as _, MemoryChain},
        error::{Error, Unauthorized},
        roles::{NewOutput, Skeleton, add_output, create},
        types::{Note, NoteCommitment, PaymentAddress, Pool, Rseed, SpendingKey},
        wallet::{self, MemoryWallet, NoteInventory, OwnershipProof, SpendableNote},
    };

    /// Lists the wallet's notes but cannot prove it owns them
    struct WatchOnly(MemoryWallet);

    impl NoteInventory for WatchOnly {
        type Error = wallet::Error;

        fn list_spendable_notes(
            &self,
            identity: &PaymentAddress,
        ) -> Result<Vec<SpendableNote>, Self::Error> {
            self.0.list_spendable_notes(identity)
        }

        fn prove_ownership(
            &self,
            _identity: &PaymentAddress,
            _note: &Note,
        ) -> Result<Option<OwnershipProof>, Self::Error> {
            Ok(None)
        }
    }

    fn setup(notes: &[u64]) -> (MemoryWallet, MemoryChain, PaymentAddress) {
        let mut wallet = MemoryWallet::from_seed([9; 64]);
        let mut chain = MemoryChain::new();
        let identity = wallet.new_address(Pool::Sapling).unwrap();
        let minted: Vec<_> = notes
            .iter()
            .map(|sats| Note {
                recipient: identity,
                value: Amount::from_sat(*sats),
                rseed: Rseed::random(&mut OsRng),
            })
            .collect();
        let positions = chain
            .mine_block(minted.iter().map(|note| (Pool::Sapling, note.commitment())))
            .unwrap();
        for (note, position) in minted.into_iter().zip(positions) {
            wallet.add_note(note, position).unwrap();
        }
        wallet.sync(&chain);
        (wallet, chain, identity)
    }

    fn with_output(chain: &MemoryChain, sats: u64) -> Pczt {
        let pczt = create(&Skeleton::for_tip(chain.tip_height()), chain).unwrap();
        let recipient = SpendingKey::random(&mut OsRng)
            .full_viewing_key()
            .address(Pool::Orchard, 0);
        add_output(
            &pczt,
            &mut OsRng,
            &NewOutput::new(recipient, Amount::from_sat(sats)),
        )
        .unwrap()
    }

    #[test]
    fn selects_largest_first() {
        let (wallet, chain, identity) = setup(&[300, 1_000, 50]);
        let pczt = with_output(&chain, 900);
        let funded =
            fund(&pczt, &identity, &FundingPolicy::default(), &wallet, &chain).unwrap();
        let sapling = funded.shielded(Pool::Sapling).unwrap();
        assert_eq!(sapling.spends().len(), 1);
        assert_eq!(
            sapling.spends()[0].content().unwrap().value(),
            Amount::from_sat(1_000)
        );
        assert_eq!(sapling.anchor(), Some(&chain.current_anchor(Pool::Sapling)));
        assert_eq!(funded.fee().unwrap(), SignedAmount::from_sat(100));

        let again =
            fund(&funded, &identity, &FundingPolicy::default(), &wallet, &chain).unwrap();
        assert_eq!(again, funded);
    }

    #[test]
    fn deterministic() {
        let (wallet, chain, identity) = setup(&[300, 1_000]);
        let pczt = with_output(&chain, 1_200);
        let policy = FundingPolicy::standard();
        let first = fund(&pczt, &identity, &policy, &wallet, &chain).unwrap();
        let second = fund(&pczt, &identity, &policy, &wallet, &chain).unwrap();
        assert_eq!(first.encode(), second.encode());
    }

    #[test]
    fn change_returns_surplus() {
        let (wallet, chain, identity) = setup(&[50_000]);
        let pczt = with_output(&chain, 20_000);
        let funded =
            fund(&pczt, &identity, &FundingPolicy::standard(), &wallet, &chain).unwrap();
        let sapling = funded.shielded(Pool::Sapling).unwrap();
        let Some(Slot::Populated(change)) = sapling.outputs().last() else {
            panic!("expected a change output");
        };
        assert_eq!(change.note.recipient, identity);
        assert_eq!(change.value(), Amount::from_sat(20_000));
        assert_eq!(funded.fee().unwrap(), SignedAmount::from_sat(10_000));
    }

    #[test]
    fn insufficient_funds() {
        let (wallet, chain, identity) = setup(&[300, 200]);
        let pczt = with_output(&chain, 600);
        let err =
            fund(&pczt, &identity, &FundingPolicy::default(), &wallet, &chain).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds { required, available }
                if required == Amount::from_sat(600) && available == Amount::from_sat(500)
        ));
    }

    #[test]
    fn stale_witnesses_are_skipped() {
        let (wallet, mut chain, identity) = setup(&[1_000]);
        let pczt = with_output(&chain, 100);
        chain
            .mine_block([(Pool::Sapling, NoteCommitment([7; 32]))])
            .unwrap();
        assert!(matches!(
            fund(&pczt, &identity, &FundingPolicy::default(), &wallet, &chain),
            Err(Error::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn ownership_is_required() {
        let (wallet, chain, identity) = setup(&[1_000]);
        let pczt = with_output(&chain, 400);
        let err = fund(
            &pczt,
            &identity,
            &FundingPolicy::default(),
            &WatchOnly(wallet),
            &chain,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::NotAuthorized(Unauthorized::Ownership { identity: owner, .. })
                if owner == identity
        ));
    }

    #[test]
    fn keeps_an_older_anchor_inside_the_window() {
        let (wallet, mut chain, identity) = setup(&[1_000, 2_000]);
        let pczt = with_output(&chain, 900);
        let funded =
            fund(&pczt, &identity, &FundingPolicy::default(), &wallet, &chain).unwrap();
        let anchor = *funded.shielded(Pool::Sapling).unwrap().anchor().unwrap();
        // Witnesses stay at the funded anchor while the chain moves on
        let snapshot = wallet.clone();
        chain
            .mine_block([(Pool::Sapling, NoteCommitment([7; 32]))])
            .unwrap();
        assert_ne!(chain.current_anchor(Pool::Sapling), anchor);

        let recipient = SpendingKey::random(&mut OsRng)
            .full_viewing_key()
            .address(Pool::Sapling, 0);
        let pczt = add_output(
            &funded,
            &mut OsRng,
            &NewOutput::new(recipient, Amount::from_sat(1_500)),
        )
        .unwrap();
        let refunded =
            fund(&pczt, &identity, &FundingPolicy::default(), &snapshot, &chain).unwrap();
        let sapling = refunded.shielded(Pool::Sapling).unwrap();
        assert_eq!(sapling.spends().len(), 2);
        assert_eq!(sapling.anchor(), Some(&anchor));
        assert_eq!(refunded.fee().unwrap(), SignedAmount::from_sat(600));

        chain.advance(MemoryChain::ANCHOR_WINDOW);
        assert!(matches!(
            fund(&pczt, &identity, &FundingPolicy::default(), &snapshot, &chain),
            Err(Error::StaleAnchor { pool: Pool::Sapling, anchor: stale }) if stale == anchor
        ));
    }
}
