//! Transparent input authorization: ed25519 signatures over the
//! transaction sighash, by a key that hashes to the spent address.

use borsh::{BorshDeserialize, BorshSerialize};
use rayon::iter::{
    IndexedParallelIterator as _, IntoParallelRefIterator as _,
    ParallelIterator as _,
};
use serde::{Deserialize, Serialize};

use crate::types::{Address, Sighash};

pub use ed25519_dalek::{
    Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ed25519_dalek error")]
    Dalek(#[from] SignatureError),
    #[error(
        "wrong key for address: address = {address},
             hash(verifying_key) = {hash_verifying_key}"
    )]
    WrongKeyForAddress {
        address: Address,
        hash_verifying_key: Address,
    },
}

/// Failure of one authorization in a batch
#[derive(Debug, thiserror::Error)]
#[error("authorization {index} failed")]
pub struct BatchError {
    pub index: usize,
    #[source]
    pub source: Error,
}

fn borsh_serialize_verifying_key<W>(
    vk: &VerifyingKey,
    writer: &mut W,
) -> borsh::io::Result<()>
where
    W: borsh::io::Write,
{
    borsh::BorshSerialize::serialize(&vk.to_bytes(), writer)
}

fn borsh_deserialize_verifying_key<R>(
    reader: &mut R,
) -> borsh::io::Result<VerifyingKey>
where
    R: borsh::io::Read,
{
    let bytes: [u8; 32] = borsh::BorshDeserialize::deserialize_reader(reader)?;
    VerifyingKey::from_bytes(&bytes).map_err(|err| {
        borsh::io::Error::new(borsh::io::ErrorKind::InvalidData, err)
    })
}

fn borsh_serialize_signature<W>(
    sig: &Signature,
    writer: &mut W,
) -> borsh::io::Result<()>
where
    W: borsh::io::Write,
{
    borsh::BorshSerialize::serialize(&sig.to_bytes(), writer)
}

fn borsh_deserialize_signature<R>(reader: &mut R) -> borsh::io::Result<Signature>
where
    R: borsh::io::Read,
{
    let bytes: [u8; 64] = borsh::BorshDeserialize::deserialize_reader(reader)?;
    Ok(Signature::from_bytes(&bytes))
}

#[derive(
    BorshDeserialize,
    BorshSerialize,
    Debug,
    Clone,
    Deserialize,
    Eq,
    PartialEq,
    Serialize,
)]
pub struct Authorization {
    #[borsh(
        serialize_with = "borsh_serialize_verifying_key",
        deserialize_with = "borsh_deserialize_verifying_key"
    )]
    pub verifying_key: VerifyingKey,
    #[borsh(
        serialize_with = "borsh_serialize_signature",
        deserialize_with = "borsh_deserialize_signature"
    )]
    pub signature: Signature,
}

impl Authorization {
    pub fn get_address(&self) -> Address {
        get_address(&self.verifying_key)
    }
}

pub fn get_address(verifying_key: &VerifyingKey) -> Address {
    let mut hasher = blake3::Hasher::new();
    let mut reader = hasher.update(&verifying_key.to_bytes()).finalize_xof();
    let mut output: [u8; 20] = [0; 20];
    reader.fill(&mut output);
    Address(output)
}

/// Sign a sighash for an input spending from `address`
pub fn authorize(
    address: Address,
    signing_key: &SigningKey,
    sighash: &Sighash,
) -> Result<Authorization, Error> {
    let hash_verifying_key = get_address(&signing_key.verifying_key());
    if address != hash_verifying_key {
        return Err(Error::WrongKeyForAddress {
            address,
            hash_verifying_key,
        });
    }
    Ok(Authorization {
        verifying_key: signing_key.verifying_key(),
        signature: signing_key.sign(sighash.as_bytes()),
    })
}

fn verify_authorization(
    address: Address,
    authorization: &Authorization,
    sighash: &Sighash,
) -> Result<(), Error> {
    let hash_verifying_key = authorization.get_address();
    if address != hash_verifying_key {
        return Err(Error::WrongKeyForAddress {
            address,
            hash_verifying_key,
        });
    }
    authorization
        .verifying_key
        .verify_strict(sighash.as_bytes(), &authorization.signature)?;
    Ok(())
}

/// Verify that each authorization is by the key for its address, and
/// signs `sighash`. On failure, reports one failing index.
pub fn verify_authorizations(
    authorizations: &[(Address, &Authorization)],
    sighash: &Sighash,
) -> Result<(), BatchError> {
    authorizations
        .par_iter()
        .enumerate()
        .try_for_each(|(index, (address, authorization))| {
            verify_authorization(*address, authorization, sighash)
                .map_err(|source| BatchError { index, source })
        })
}
