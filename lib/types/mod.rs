use borsh::{BorshDeserialize, BorshSerialize};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;

pub mod address;
pub mod consensus;
pub mod hashes;
pub mod keys;
pub mod merkle;
pub mod note;
pub mod note_encryption;
pub mod signature;
pub mod transaction;
pub mod value;

pub use address::{Address, AddressParseError, PaymentAddress};
pub use consensus::TxVersion;
pub use hashes::{Hash, Sighash, Txid, hash};
pub use keys::{
    Diversifier, FullViewingKey, IncomingViewingKey, KeyDerivation,
    NullifierDerivingKey, OutgoingViewingKey, SpendAuthorizingKey,
    SpendValidatingKey, SpendingKey,
};
pub use merkle::{Anchor, CommitmentTree, MerklePath};
pub use note::{Memo, Note, NoteCommitment, Nullifier, Rseed};
pub use signature::{Binding, Signature, SpendAuth};
pub use transaction::{OutPoint, Transaction};
pub use value::{ValueCommitTrapdoor, ValueCommitment};

#[derive(Debug, Error)]
#[error("amount overflow")]
pub struct AmountOverflowError;

#[derive(Debug, Error)]
#[error("amount underflow")]
pub struct AmountUnderflowError;

/// A shielded value pool. Each pool has its own note commitment tree,
/// value commitment generator and address encoding.
#[derive(
    BorshDeserialize,
    BorshSerialize,
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
    strum::EnumIter,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Pool {
    Sapling,
    Orchard,
}

impl Pool {
    /// Single byte tag used in hashes and address encodings
    pub const fn tag(self) -> u8 {
        match self {
            Self::Sapling => 0x53,
            Self::Orchard => 0x4f,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x53 => Some(Self::Sapling),
            0x4f => Some(Self::Orchard),
            _ => None,
        }
    }
}

/// Hash a length-prefixed sequence of byte strings under a blake3
/// derive-key context, reducing 64 bytes of output to a scalar.
pub(crate) fn hash_to_scalar(context: &str, parts: &[&[u8]]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

pub(crate) fn hash_to_curve(context: &str, parts: &[&[u8]]) -> RistrettoPoint {
    let mut bytes = Vec::with_capacity(
        context.len() + parts.iter().map(|part| part.len() + 8).sum::<usize>(),
    );
    bytes.extend_from_slice(context.as_bytes());
    for part in parts {
        bytes.extend_from_slice(&(part.len() as u64).to_le_bytes());
        bytes.extend_from_slice(part);
    }
    RistrettoPoint::hash_from_bytes::<Sha512>(&bytes)
}

/// Decode a canonical compressed ristretto point
pub(crate) fn decode_point(bytes: &[u8; 32]) -> Option<RistrettoPoint> {
    curve25519_dalek::ristretto::CompressedRistretto(*bytes).decompress()
}

/// Decode a canonical scalar
pub(crate) fn decode_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

/// Scalar representation of a signed integer
pub(crate) fn scalar_from_i64(value: i64) -> Scalar {
    let magnitude = Scalar::from(value.unsigned_abs());
    if value < 0 { -magnitude } else { magnitude }
}

/// (de)serialize as hex strings for human-readable forms like json,
/// and default serialization for non human-readable formats
pub(crate) mod serde_hexstr_human_readable {
    use hex::{FromHex, ToHex};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize + ToHex,
    {
        if serializer.is_human_readable() {
            hex::serde::serialize(data, serializer)
        } else {
            data.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromHex,
        <T as FromHex>::Error: std::fmt::Display,
    {
        if deserializer.is_human_readable() {
            hex::serde::deserialize(deserializer)
        } else {
            T::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use strum::IntoEnumIterator as _;

    use super::{Pool, hash_to_curve, hash_to_scalar, scalar_from_i64};

    #[test]
    fn pool_tags_round_trip() {
        for pool in Pool::iter() {
            assert_eq!(Pool::from_tag(pool.tag()), Some(pool));
            assert_eq!(Pool::from_str(&pool.to_string()).unwrap(), pool);
        }
        assert_eq!(Pool::from_tag(0), None);
    }

    #[test]
    fn hashes_are_length_prefixed() {
        let a = hash_to_scalar("test", &[b"ab", b"c"]);
        let b = hash_to_scalar("test", &[b"a", b"bc"]);
        assert_ne!(a, b);
        let p = hash_to_curve("test", &[b"ab", b"c"]);
        let q = hash_to_curve("test", &[b"a", b"bc"]);
        assert_ne!(p, q);
    }

    #[test]
    fn signed_scalars() {
        assert_eq!(scalar_from_i64(-5) + scalar_from_i64(5), scalar_from_i64(0));
        assert_eq!(
            scalar_from_i64(i64::MIN) + scalar_from_i64(i64::MAX),
            -scalar_from_i64(1)
        );
    }
}
