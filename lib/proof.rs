//! Spend and output proofs.
//!
//! A proof is a Fiat-Shamir transformed sigma protocol showing knowledge
//! of an opening `(v, rcv)` of the slot's value commitment. The challenge
//! commits to every public input of the slot (and, for spends, the anchor)
//! together with the transaction sighash, so a proof cannot be moved to
//! another slot or another transaction.

use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use crate::types::{
    Anchor, NoteCommitment, Nullifier, Pool, Sighash, SpendValidatingKey,
    ValueCommitTrapdoor, ValueCommitment, decode_point, decode_scalar,
    hash_to_scalar, value::value_generator,
};

pub const PROOF_SIZE: usize = 96;

const CHALLENGE_CONTEXT: &str = "pczt 2025 proof challenge";

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed proof encoding")]
    Malformed,
    #[error("proof does not verify")]
    Invalid,
    #[error("no {pool} proving parameters available")]
    MissingParameters { pool: Pool },
}

#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Proof([u8; PROOF_SIZE]);

impl Proof {
    pub fn from_bytes(bytes: [u8; PROOF_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; PROOF_SIZE] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; PROOF_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Proof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Public inputs of a proof
#[derive(Clone, Copy, Debug)]
pub enum Statement<'a> {
    Spend {
        index: usize,
        cv: &'a ValueCommitment,
        nullifier: &'a Nullifier,
        rk: &'a SpendValidatingKey,
        anchor: &'a Anchor,
    },
    Output {
        index: usize,
        cv: &'a ValueCommitment,
        cmu: &'a NoteCommitment,
        ephemeral_key: &'a [u8; 32],
    },
}

impl Statement<'_> {
    fn cv(&self) -> &ValueCommitment {
        match self {
            Self::Spend { cv, .. } | Self::Output { cv, .. } => cv,
        }
    }

    fn challenge(
        &self,
        pool: Pool,
        sighash: &Sighash,
        commitment: &[u8; 32],
    ) -> Scalar {
        match self {
            Self::Spend {
                index,
                cv,
                nullifier,
                rk,
                anchor,
            } => hash_to_scalar(
                CHALLENGE_CONTEXT,
                &[
                    &[pool.tag(), 0],
                    &(*index as u64).to_le_bytes(),
                    &cv.to_bytes(),
                    &nullifier.0,
                    &rk.to_bytes(),
                    &anchor.0,
                    sighash.as_bytes(),
                    commitment,
                ],
            ),
            Self::Output {
                index,
                cv,
                cmu,
                ephemeral_key,
            } => hash_to_scalar(
                CHALLENGE_CONTEXT,
                &[
                    &[pool.tag(), 1],
                    &(*index as u64).to_le_bytes(),
                    &cv.to_bytes(),
                    &cmu.0,
                    *ephemeral_key,
                    sighash.as_bytes(),
                    commitment,
                ],
            ),
        }
    }
}

/// Parameters for generating proofs in one pool
#[derive(Clone, Debug)]
pub struct ProvingKey {
    pool: Pool,
    value_generator: RistrettoPoint,
}

impl ProvingKey {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            value_generator: value_generator(pool),
        }
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            pool: self.pool,
            value_generator: self.value_generator,
        }
    }

    /// Prove knowledge of `(value, rcv)` opening the statement's value
    /// commitment
    pub fn prove<R>(
        &self,
        rng: &mut R,
        statement: &Statement<'_>,
        sighash: &Sighash,
        value: u64,
        rcv: &ValueCommitTrapdoor,
    ) -> Proof
    where
        R: RngCore + CryptoRng,
    {
        let a = Scalar::random(rng);
        let b = Scalar::random(rng);
        let commitment = RistrettoPoint::vartime_double_scalar_mul_basepoint(
            &a,
            &self.value_generator,
            &b,
        )
        .compress()
        .to_bytes();
        let c = statement.challenge(self.pool, sighash, &commitment);
        let z_value = a + c * Scalar::from(value);
        let z_rcv = b + c * rcv.inner();
        let mut bytes = [0u8; PROOF_SIZE];
        bytes[..32].copy_from_slice(&commitment);
        bytes[32..64].copy_from_slice(z_value.as_bytes());
        bytes[64..].copy_from_slice(z_rcv.as_bytes());
        Proof(bytes)
    }
}

/// Parameters for verifying proofs in one pool
#[derive(Clone, Debug)]
pub struct VerifyingKey {
    pool: Pool,
    value_generator: RistrettoPoint,
}

impl VerifyingKey {
    pub fn verify(
        &self,
        statement: &Statement<'_>,
        sighash: &Sighash,
        proof: &Proof,
    ) -> Result<(), Error> {
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&proof.0[..32]);
        let mut z_value = [0u8; 32];
        z_value.copy_from_slice(&proof.0[32..64]);
        let mut z_rcv = [0u8; 32];
        z_rcv.copy_from_slice(&proof.0[64..]);
        let t = decode_point(&commitment).ok_or(Error::Malformed)?;
        let z_value = decode_scalar(&z_value).ok_or(Error::Malformed)?;
        let z_rcv = decode_scalar(&z_rcv).ok_or(Error::Malformed)?;
        let c = statement.challenge(self.pool, sighash, &commitment);
        // z_v·V + z_rcv·B == T + c·cv
        let lhs = RistrettoPoint::vartime_double_scalar_mul_basepoint(
            &z_value,
            &self.value_generator,
            &z_rcv,
        );
        let rhs = t + c * statement.cv().inner();
        if lhs == rhs {
            Ok(())
        } else {
            Err(Error::Invalid)
        }
    }
}

/// Source of proving parameters, per pool
pub trait ProvingParameters {
    type Error: std::error::Error + Send + Sync + 'static;

    fn proving_key(&self, pool: Pool) -> Result<ProvingKey, Self::Error>;

    fn verifying_key(&self, pool: Pool) -> Result<VerifyingKey, Self::Error> {
        self.proving_key(pool).map(|pk| pk.verifying_key())
    }
}

/// Parameters derived locally for every pool
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalParameters;

impl ProvingParameters for LocalParameters {
    type Error = std::convert::Infallible;

    fn proving_key(&self, pool: Pool) -> Result<ProvingKey, Self::Error> {
        Ok(ProvingKey::new(pool))
    }
}

/// Parameters for a subset of pools, e.g. a prover that only handles one
#[derive(Clone, Debug)]
pub struct PoolParameters(Vec<Pool>);

impl PoolParameters {
    pub fn new<I>(pools: I) -> Self
    where
        I: IntoIterator<Item = Pool>,
    {
        Self(pools.into_iter().collect())
    }
}

impl ProvingParameters for PoolParameters {
    type Error = Error;

    fn proving_key(&self, pool: Pool) -> Result<ProvingKey, Self::Error> {
        if self.0.contains(&pool) {
            Ok(ProvingKey::new(pool))
        } else {
            Err(Error::MissingParameters { pool })
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;
    use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
    use rand::rngs::OsRng;

    use super::{Error, ProvingKey, Statement};
    use crate::types::{
        NoteCommitment, Pool, Sighash, ValueCommitTrapdoor, ValueCommitment,
    };

    #[test]
    fn output_proof_binds_statement() {
        let pk = ProvingKey::new(Pool::Sapling);
        let vk = pk.verifying_key();
        let rcv = ValueCommitTrapdoor::random(&mut OsRng);
        let cv = ValueCommitment::derive(Pool::Sapling, Amount::from_sat(500), &rcv);
        let cmu = NoteCommitment([1; 32]);
        let epk = RISTRETTO_BASEPOINT_POINT.compress().to_bytes();
        let statement = Statement::Output {
            index: 0,
            cv: &cv,
            cmu: &cmu,
            ephemeral_key: &epk,
        };
        let sighash = Sighash([5; 32]);
        let proof = pk.prove(&mut OsRng, &statement, &sighash, 500, &rcv);
        assert!(vk.verify(&statement, &sighash, &proof).is_ok());

        // another transaction
        assert!(matches!(
            vk.verify(&statement, &Sighash([6; 32]), &proof),
            Err(Error::Invalid)
        ));
        // another slot
        let moved = Statement::Output {
            index: 1,
            cv: &cv,
            cmu: &cmu,
            ephemeral_key: &epk,
        };
        assert!(vk.verify(&moved, &sighash, &proof).is_err());
        // another pool
        let orchard_vk = ProvingKey::new(Pool::Orchard).verifying_key();
        assert!(orchard_vk.verify(&statement, &sighash, &proof).is_err());
    }

    #[test]
    fn wrong_opening_fails() {
        let pk = ProvingKey::new(Pool::Sapling);
        let rcv = ValueCommitTrapdoor::random(&mut OsRng);
        let cv = ValueCommitment::derive(Pool::Sapling, Amount::from_sat(500), &rcv);
        let cmu = NoteCommitment([1; 32]);
        let epk = [0u8; 32];
        let statement = Statement::Output {
            index: 0,
            cv: &cv,
            cmu: &cmu,
            ephemeral_key: &epk,
        };
        let sighash = Sighash([5; 32]);
        let proof = pk.prove(&mut OsRng, &statement, &sighash, 501, &rcv);
        assert!(pk.verifying_key().verify(&statement, &sighash, &proof).is_err());
    }
}
