use borsh::{BorshDeserialize, BorshSerialize};
use curve25519_dalek::ristretto::RistrettoPoint;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeAs, DisplayFromStr};

use super::{Pool, decode_point, keys::Diversifier};

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("bs58 error")]
    Bs58(#[from] bs58::decode::Error),
    #[error("invalid diversified transmission key")]
    InvalidPkD,
    #[error("unknown pool tag {0:#04x}")]
    UnknownPool(u8),
    #[error("wrong address length {actual} != {expected}")]
    WrongLength { actual: usize, expected: usize },
}

fn to_base58check(bytes: &[u8]) -> String {
    bs58::encode(bytes)
        .with_alphabet(bs58::Alphabet::BITCOIN)
        .with_check()
        .into_string()
}

fn from_base58check(s: &str) -> Result<Vec<u8>, bs58::decode::Error> {
    bs58::decode(s)
        .with_alphabet(bs58::Alphabet::BITCOIN)
        .with_check(None)
        .into_vec()
}

/// Transparent address: the first 20 bytes of the blake3 XOF of an
/// ed25519 verifying key
#[derive(
    BorshDeserialize,
    BorshSerialize,
    Clone,
    Copy,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn to_base58(self) -> String {
        to_base58check(&self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl From<[u8; 20]> for Address {
    fn from(other: [u8; 20]) -> Self {
        Self(other)
    }
}

impl std::str::FromStr for Address {
    type Err = AddressParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = from_base58check(s)?;
        Ok(Address(address.try_into().map_err(|address: Vec<u8>| {
            AddressParseError::WrongLength {
                actual: address.len(),
                expected: 20,
            }
        })?))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            DisplayFromStr::deserialize_as(deserializer)
        } else {
            <[u8; 20] as Deserialize>::deserialize(deserializer).map(Self)
        }
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            Serialize::serialize(&self.to_base58(), serializer)
        } else {
            Serialize::serialize(&self.0, serializer)
        }
    }
}

/// Shielded payment address `(pool, d, pk_d)`
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct PaymentAddress {
    pool: Pool,
    diversifier: Diversifier,
    pk_d: RistrettoPoint,
}

impl PaymentAddress {
    pub const ENCODED_LEN: usize = 1 + 11 + 32;

    pub(crate) fn new(
        pool: Pool,
        diversifier: Diversifier,
        pk_d: RistrettoPoint,
    ) -> Self {
        Self {
            pool,
            diversifier,
            pk_d,
        }
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn diversifier(&self) -> &Diversifier {
        &self.diversifier
    }

    pub(crate) fn pk_d(&self) -> &RistrettoPoint {
        &self.pk_d
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[0] = self.pool.tag();
        bytes[1..12].copy_from_slice(&self.diversifier.0);
        bytes[12..].copy_from_slice(self.pk_d.compress().as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressParseError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(AddressParseError::WrongLength {
                actual: bytes.len(),
                expected: Self::ENCODED_LEN,
            });
        }
        let pool =
            Pool::from_tag(bytes[0]).ok_or(AddressParseError::UnknownPool(bytes[0]))?;
        let mut diversifier = [0u8; 11];
        diversifier.copy_from_slice(&bytes[1..12]);
        let mut pk_d = [0u8; 32];
        pk_d.copy_from_slice(&bytes[12..]);
        let pk_d = decode_point(&pk_d).ok_or(AddressParseError::InvalidPkD)?;
        Ok(Self {
            pool,
            diversifier: Diversifier(diversifier),
            pk_d,
        })
    }

    pub fn to_base58(&self) -> String {
        to_base58check(&self.to_bytes())
    }
}

impl std::fmt::Display for PaymentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl std::fmt::Debug for PaymentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl std::str::FromStr for PaymentAddress {
    type Err = AddressParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&from_base58check(s)?)
    }
}

impl<'de> Deserialize<'de> for PaymentAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        DisplayFromStr::deserialize_as(deserializer)
    }
}

impl Serialize for PaymentAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Serialize::serialize(&self.to_base58(), serializer)
    }
}
