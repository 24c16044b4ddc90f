//! Wallet collaborators: the note inventory consulted by the Funder and
//! the spend authority consulted by Signers, with an in-memory
//! implementation of both.

use bitcoin::Amount;
use ed25519_dalek_bip32::{ChildIndex, DerivationPath, ExtendedSigningKey};
use serde::{Deserialize, Serialize};

pub use crate::authorization::{Authorization, get_address};
use crate::{
    chain::MemoryChain,
    types::{
        Address, AmountOverflowError, FullViewingKey, Hash, KeyDerivation,
        MerklePath, Note, NoteCommitment, Nullifier, PaymentAddress, Pool,
        SpendAuthorizingKey, SpendingKey, Transaction,
        note_encryption::try_decrypt_note,
    },
};

const HARDENED: u32 = 1 << 31;
const SHIELDED_PURPOSE: u32 = 32;
const COIN_TYPE: u32 = 133;

/// A note together with a witness against the current anchor
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpendableNote {
    pub note: Note,
    pub witness: MerklePath,
}

/// Evidence that a funding identity controls a note: the viewing key the
/// note's address derives from, and where its spending key can be found
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnershipProof {
    pub fvk: FullViewingKey,
    pub key_derivation: KeyDerivation,
}

pub trait NoteInventory {
    type Error: std::error::Error + Send + Sync + 'static;

    fn list_spendable_notes(
        &self,
        identity: &PaymentAddress,
    ) -> Result<Vec<SpendableNote>, Self::Error>;

    /// `None` if `identity` cannot spend `note`
    fn prove_ownership(
        &self,
        identity: &PaymentAddress,
        note: &Note,
    ) -> Result<Option<OwnershipProof>, Self::Error>;
}

pub trait SpendAuthority {
    fn spend_authorizing_key(
        &self,
        derivation: &KeyDerivation,
    ) -> Option<SpendAuthorizingKey>;

    fn transparent_signing_key(
        &self,
        address: &Address,
    ) -> Option<ed25519_dalek::SigningKey>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    AmountOverflow(#[from] AmountOverflowError),
    #[error("bip32 error")]
    Bip32(#[from] ed25519_dalek_bip32::Error),
    #[error("failed to parse mnemonic seed phrase")]
    ParseMnemonic(#[source] bip39::ErrorKind),
    #[error("address {address} does not belong to this wallet")]
    UnknownAddress { address: PaymentAddress },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct WalletNote {
    note: Note,
    position: u64,
    nullifier: Nullifier,
    /// Refreshed on every sync; `None` if the chain does not have the note
    witness: Option<MerklePath>,
}

/// Seed-backed wallet that keeps its notes in memory
#[derive(Clone, Deserialize, Serialize)]
pub struct MemoryWallet {
    #[serde(with = "hex::serde")]
    seed: [u8; 64],
    /// Shielded addresses, indexed by account
    accounts: Vec<PaymentAddress>,
    /// Transparent addresses, indexed by derivation index
    transparent: Vec<Address>,
    notes: Vec<WalletNote>,
}

impl MemoryWallet {
    pub fn from_seed(seed: [u8; 64]) -> Self {
        Self {
            seed,
            accounts: Vec::new(),
            transparent: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn from_mnemonic(mnemonic: &str) -> Result<Self, Error> {
        let mnemonic =
            bip39::Mnemonic::from_phrase(mnemonic, bip39::Language::English)
                .map_err(Error::ParseMnemonic)?;
        let seed = bip39::Seed::new(&mnemonic, "");
        let mut seed_bytes = [0u8; 64];
        seed_bytes.copy_from_slice(seed.as_bytes());
        Ok(Self::from_seed(seed_bytes))
    }

    pub fn seed_fingerprint(&self) -> Hash {
        blake3::hash(&self.seed).into()
    }

    fn derive_signing_key(
        &self,
        path: &[u32],
    ) -> Result<ed25519_dalek::SigningKey, Error> {
        let xpriv = ExtendedSigningKey::from_seed(&self.seed)?;
        let derivation_path = DerivationPath::new(
            path.iter()
                .map(|index| {
                    if index & HARDENED != 0 {
                        ChildIndex::Hardened(index & !HARDENED)
                    } else {
                        ChildIndex::Normal(*index)
                    }
                })
                .collect::<Vec<_>>(),
        );
        let xsigning_key = xpriv.derive(&derivation_path)?;
        Ok(xsigning_key.signing_key)
    }

    pub fn key_derivation(&self, account: u32) -> KeyDerivation {
        KeyDerivation {
            seed_fingerprint: self.seed_fingerprint(),
            derivation_path: vec![
                SHIELDED_PURPOSE | HARDENED,
                COIN_TYPE | HARDENED,
                account | HARDENED,
            ],
        }
    }

    fn spending_key(&self, account: u32) -> Result<SpendingKey, Error> {
        let derivation = self.key_derivation(account);
        let signing_key = self.derive_signing_key(&derivation.derivation_path)?;
        Ok(SpendingKey::from_bytes(signing_key.to_bytes()))
    }

    pub fn full_viewing_key(&self, account: u32) -> Result<FullViewingKey, Error> {
        Ok(self.spending_key(account)?.full_viewing_key())
    }

    /// Create a new account and return its address in `pool`
    pub fn new_address(&mut self, pool: Pool) -> Result<PaymentAddress, Error> {
        let account = self.accounts.len() as u32;
        let address = self.full_viewing_key(account)?.address(pool, 0);
        self.accounts.push(address);
        tracing::debug!(%address, account, "created shielded address");
        Ok(address)
    }

    pub fn new_transparent_address(&mut self) -> Result<Address, Error> {
        let index = self.transparent.len() as u32;
        let signing_key = self.derive_signing_key(&[
            1 | HARDENED,
            HARDENED,
            HARDENED,
            index | HARDENED,
        ])?;
        let address = get_address(&signing_key.verifying_key());
        self.transparent.push(address);
        Ok(address)
    }

    pub fn addresses(&self) -> &[PaymentAddress] {
        &self.accounts
    }

    fn account_of(&self, address: &PaymentAddress) -> Option<u32> {
        self.accounts
            .iter()
            .position(|account| account == address)
            .map(|account| account as u32)
    }

    /// Track a note received at one of this wallet's addresses, at
    /// `position` in its pool's tree
    pub fn add_note(&mut self, note: Note, position: u64) -> Result<(), Error> {
        let account = self.account_of(&note.recipient).ok_or(
            Error::UnknownAddress {
                address: note.recipient,
            },
        )?;
        let nk = self.full_viewing_key(account)?.nk;
        let nullifier = note.nullifier(&nk, position);
        if self.notes.iter().any(|known| known.nullifier == nullifier) {
            return Ok(());
        }
        self.notes.push(WalletNote {
            note,
            position,
            nullifier,
            witness: None,
        });
        Ok(())
    }

    /// Trial-decrypt the outputs of a mined transaction. `positions` gives
    /// the pool and tree position of each output, in transaction order.
    /// Returns the number of notes received.
    pub fn scan(
        &mut self,
        tx: &Transaction,
        positions: &[(Pool, u64)],
    ) -> Result<usize, Error> {
        let ivks = (0..self.accounts.len() as u32)
            .map(|account| {
                self.full_viewing_key(account)
                    .map(|fvk| fvk.incoming_viewing_key())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = tx
            .shielded
            .iter()
            .flat_map(|bundle| bundle.outputs.iter().map(move |output| (bundle.pool, output)));
        let mut received = Vec::new();
        for ((pool, output), (_, position)) in outputs.zip(positions) {
            let cmu = NoteCommitment(output.cmu);
            let decrypted = ivks.iter().find_map(|ivk| {
                try_decrypt_note(
                    ivk,
                    pool,
                    &output.ephemeral_key,
                    &cmu,
                    &output.enc_ciphertext,
                )
            });
            if let Some((note, _memo)) = decrypted {
                received.push((note, *position));
            }
        }
        let count = received.len();
        for (note, position) in received {
            self.add_note(note, position)?;
        }
        tracing::debug!(txid = %tx.txid(), count, "scanned transaction");
        Ok(count)
    }

    /// Drop spent notes and refresh witnesses against the chain's current
    /// anchors
    pub fn sync(&mut self, chain: &MemoryChain) {
        self.notes.retain(|wallet_note| {
            !chain.is_spent(wallet_note.note.recipient.pool(), &wallet_note.nullifier)
        });
        for wallet_note in &mut self.notes {
            let pool = wallet_note.note.recipient.pool();
            let cmu = wallet_note.note.commitment();
            wallet_note.witness = (chain.commitment(pool, wallet_note.position)
                == Some(cmu))
            .then(|| chain.witness(pool, wallet_note.position))
            .flatten();
        }
    }

    pub fn balance(&self, identity: &PaymentAddress) -> Result<Amount, Error> {
        self.notes
            .iter()
            .filter(|wallet_note| wallet_note.note.recipient == *identity)
            .try_fold(Amount::ZERO, |total, wallet_note| {
                total.checked_add(wallet_note.note.value)
            })
            .ok_or(Error::AmountOverflow(AmountOverflowError))
    }
}

impl std::fmt::Debug for MemoryWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWallet")
            .field("seed_fingerprint", &hex::encode(self.seed_fingerprint()))
            .field("accounts", &self.accounts)
            .field("transparent", &self.transparent)
            .field("notes", &self.notes.len())
            .finish()
    }
}

impl NoteInventory for MemoryWallet {
    type Error = Error;

    fn list_spendable_notes(
        &self,
        identity: &PaymentAddress,
    ) -> Result<Vec<SpendableNote>, Self::Error> {
        Ok(self
            .notes
            .iter()
            .filter(|wallet_note| wallet_note.note.recipient == *identity)
            .filter_map(|wallet_note| {
                Some(SpendableNote {
                    note: wallet_note.note,
                    witness: wallet_note.witness.clone()?,
                })
            })
            .collect())
    }

    fn prove_ownership(
        &self,
        identity: &PaymentAddress,
        note: &Note,
    ) -> Result<Option<OwnershipProof>, Self::Error> {
        if note.recipient != *identity {
            return Ok(None);
        }
        let Some(account) = self.account_of(identity) else {
            return Ok(None);
        };
        Ok(Some(OwnershipProof {
            fvk: self.full_viewing_key(account)?,
            key_derivation: self.key_derivation(account),
        }))
    }
}

impl SpendAuthority for MemoryWallet {
    fn spend_authorizing_key(
        &self,
        derivation: &KeyDerivation,
    ) -> Option<SpendAuthorizingKey> {
        if derivation.seed_fingerprint != self.seed_fingerprint() {
            return None;
        }
        let signing_key =
            self.derive_signing_key(&derivation.derivation_path).ok()?;
        Some(SpendingKey::from_bytes(signing_key.to_bytes()).spend_authorizing_key())
    }

    fn transparent_signing_key(
        &self,
        address: &Address,
    ) -> Option<ed25519_dalek::SigningKey> {
        let index = self.transparent.iter().position(|known| known == address)?;
        self.derive_signing_key(&[
            1 | HARDENED,
            HARDENED,
            HARDENED,
            index as u32 | HARDENED,
        ])
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;
    use rand::rngs::OsRng;

    use super::{MemoryWallet, NoteInventory as _, SpendAuthority as _};
    use crate::{
        authorization::get_address,
        chain::{ChainOracle as _, MemoryChain},
        types::{Note, Pool, Rseed},
    };

    #[test]
    fn keys_are_deterministic_per_seed() {
        let mut a = MemoryWallet::from_seed([1; 64]);
        let mut b = MemoryWallet::from_seed([1; 64]);
        let mut c = MemoryWallet::from_seed([2; 64]);
        let address = a.new_address(Pool::Sapling).unwrap();
        assert_eq!(b.new_address(Pool::Sapling).unwrap(), address);
        assert_ne!(c.new_address(Pool::Sapling).unwrap(), address);
        assert_ne!(a.new_address(Pool::Sapling).unwrap(), address);

        let ask = a.spend_authorizing_key(&a.key_derivation(0)).unwrap();
        assert_eq!(ask.verification_key(), a.full_viewing_key(0).unwrap().ak);
        assert!(c.spend_authorizing_key(&a.key_derivation(0)).is_none());
    }

    #[test]
    fn transparent_keys_match_addresses() {
        let mut wallet = MemoryWallet::from_seed([3; 64]);
        let address = wallet.new_transparent_address().unwrap();
        let signing_key = wallet.transparent_signing_key(&address).unwrap();
        assert_eq!(get_address(&signing_key.verifying_key()), address);
    }

    #[test]
    fn mnemonic_seed() {
        let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let a = MemoryWallet::from_mnemonic(phrase).unwrap();
        let b = MemoryWallet::from_mnemonic(phrase).unwrap();
        assert_eq!(a.seed_fingerprint(), b.seed_fingerprint());
        assert!(MemoryWallet::from_mnemonic("not a phrase").is_err());
    }

    #[test]
    fn spendable_notes_follow_the_chain() {
        let mut wallet = MemoryWallet::from_seed([4; 64]);
        let mut chain = MemoryChain::new();
        let identity = wallet.new_address(Pool::Sapling).unwrap();
        let note = Note {
            recipient: identity,
            value: Amount::from_sat(7),
            rseed: Rseed::random(&mut OsRng),
        };
        let positions = chain
            .mine_block([(Pool::Sapling, note.commitment())])
            .unwrap();
        wallet.add_note(note, positions[0]).unwrap();
        // no witness until synced
        assert!(wallet.list_spendable_notes(&identity).unwrap().is_empty());
        wallet.sync(&chain);
        let spendable = wallet.list_spendable_notes(&identity).unwrap();
        assert_eq!(spendable.len(), 1);
        assert_eq!(
            spendable[0].witness.root(&note.commitment()),
            chain.current_anchor(Pool::Sapling)
        );
        assert_eq!(wallet.balance(&identity).unwrap(), Amount::from_sat(7));

        let stranger = MemoryWallet::from_seed([5; 64])
            .new_address(Pool::Sapling)
            .unwrap();
        assert!(wallet.prove_ownership(&stranger, &note).unwrap().is_none());
        assert!(wallet.prove_ownership(&identity, &note).unwrap().is_some());
    }
}
