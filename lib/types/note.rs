use bitcoin::Amount;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    Hash, address::PaymentAddress, hash_to_scalar,
    keys::NullifierDerivingKey, serde_hexstr_human_readable,
};

pub const MEMO_SIZE: usize = 512;

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Rseed(pub [u8; 32]);

impl Rseed {
    pub fn random<R>(rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn rcm(&self) -> Hash {
        blake3::derive_key("pczt 2025 note commitment trapdoor", &self.0)
    }

    pub(crate) fn esk(&self) -> Scalar {
        hash_to_scalar("pczt 2025 ephemeral secret key", &[&self.0])
    }
}

impl std::fmt::Debug for Rseed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rseed(..)")
    }
}

impl Serialize for Rseed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde_hexstr_human_readable::serialize(self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Rseed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_hexstr_human_readable::deserialize(deserializer).map(Self)
    }
}

#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct NoteCommitment(#[serde(with = "serde_hexstr_human_readable")] pub Hash);

impl std::fmt::Display for NoteCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for NoteCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(
    Clone, Copy, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Nullifier(#[serde(with = "serde_hexstr_human_readable")] pub Hash);

impl std::fmt::Display for Nullifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A unit of shielded value
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Note {
    pub recipient: PaymentAddress,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    pub rseed: Rseed,
}

impl Note {
    pub fn commitment(&self) -> NoteCommitment {
        let mut hasher = blake3::Hasher::new_derive_key("pczt 2025 note commitment");
        hasher.update(&self.recipient.to_bytes());
        hasher.update(&self.value.to_sat().to_le_bytes());
        hasher.update(&self.rseed.rcm());
        NoteCommitment(hasher.finalize().into())
    }

    /// Nullifier of the note at `position` in its pool's commitment tree
    pub fn nullifier(&self, nk: &NullifierDerivingKey, position: u64) -> Nullifier {
        let mut hasher = blake3::Hasher::new_derive_key("pczt 2025 nullifier");
        hasher.update(&nk.to_bytes());
        hasher.update(&self.commitment().0);
        hasher.update(&position.to_le_bytes());
        Nullifier(hasher.finalize().into())
    }
}

#[derive(Debug, Error)]
pub enum MemoError {
    #[error("memo is {0} bytes, at most {MEMO_SIZE} are allowed")]
    TooLong(usize),
}

/// 512 byte memo field. A leading `0xF6` followed by zeros means "no memo".
#[derive(Clone, Eq, PartialEq)]
pub struct Memo(Box<[u8; MEMO_SIZE]>);

impl Memo {
    /// Pads `bytes` with zeros
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MemoError> {
        if bytes.len() > MEMO_SIZE {
            return Err(MemoError::TooLong(bytes.len()));
        }
        let mut memo = Box::new([0u8; MEMO_SIZE]);
        memo[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(memo))
    }

    pub fn as_bytes(&self) -> &[u8; MEMO_SIZE] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0xF6 && self.0[1..].iter().all(|byte| *byte == 0)
    }

    /// Text content, if the memo holds UTF-8 text
    pub fn to_text(&self) -> Option<&str> {
        if self.0[0] > 0xF4 {
            return None;
        }
        let len = self.0.iter().rposition(|byte| *byte != 0).map_or(0, |pos| pos + 1);
        std::str::from_utf8(&self.0[..len]).ok()
    }
}

impl Default for Memo {
    fn default() -> Self {
        let mut memo = Box::new([0u8; MEMO_SIZE]);
        memo[0] = 0xF6;
        Self(memo)
    }
}

impl std::str::FromStr for Memo {
    type Err = MemoError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

impl std::fmt::Debug for Memo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_text() {
            _ if self.is_empty() => f.write_str("Memo(empty)"),
            Some(text) => write!(f, "Memo({text:?})"),
            None => write!(f, "Memo({})", hex::encode(&self.0[..])),
        }
    }
}
