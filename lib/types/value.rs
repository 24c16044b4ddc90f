//! Homomorphic Pedersen commitments to note values.
//!
//! `cv = v·V + rcv·B`, where `V` is a per-pool generator with no known
//! discrete log relative to the basepoint `B`. Commitments add, so the sum
//! of spend commitments minus the sum of output commitments minus
//! `value_balance·V` is a commitment to zero under the trapdoor
//! `Σrcv_spend − Σrcv_output`, which becomes the binding signing key.

use std::{
    iter::Sum,
    ops::{Add, Sub},
    sync::LazyLock,
};

use bitcoin::{Amount, SignedAmount};
use curve25519_dalek::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::Identity as _,
};
use rand::{CryptoRng, RngCore};

use super::{
    Pool, decode_point, decode_scalar, hash_to_curve, scalar_from_i64,
    signature::{Binding, SigningKey, VerificationKey},
};

const VALUE_GENERATOR_CONTEXT: &str = "pczt 2025 value commitment generator";

static SAPLING_VALUE_GENERATOR: LazyLock<RistrettoPoint> = LazyLock::new(|| {
    hash_to_curve(VALUE_GENERATOR_CONTEXT, &[&[Pool::Sapling.tag()]])
});

static ORCHARD_VALUE_GENERATOR: LazyLock<RistrettoPoint> = LazyLock::new(|| {
    hash_to_curve(VALUE_GENERATOR_CONTEXT, &[&[Pool::Orchard.tag()]])
});

pub fn value_generator(pool: Pool) -> RistrettoPoint {
    match pool {
        Pool::Sapling => *SAPLING_VALUE_GENERATOR,
        Pool::Orchard => *ORCHARD_VALUE_GENERATOR,
    }
}

/// `value·unit + blinding·B`
fn balance(value: Scalar, unit: RistrettoPoint, blinding: Scalar) -> RistrettoPoint {
    RistrettoPoint::vartime_double_scalar_mul_basepoint(&value, &unit, &blinding)
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct ValueCommitTrapdoor(Scalar);

impl ValueCommitTrapdoor {
    pub fn random<R>(rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        Self(Scalar::random(rng))
    }

    pub fn zero() -> Self {
        Self(Scalar::ZERO)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        decode_scalar(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub(crate) fn inner(&self) -> &Scalar {
        &self.0
    }

    /// Interpret a trapdoor sum as the binding signing key
    pub fn into_bsk(self) -> SigningKey<Binding> {
        SigningKey::from_scalar(self.0)
    }
}

impl Add for ValueCommitTrapdoor {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for ValueCommitTrapdoor {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<'a> Sum<&'a ValueCommitTrapdoor> for ValueCommitTrapdoor {
    fn sum<I: Iterator<Item = &'a ValueCommitTrapdoor>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, rcv| acc + *rcv)
    }
}

impl std::fmt::Debug for ValueCommitTrapdoor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ValueCommitTrapdoor(..)")
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct ValueCommitment(RistrettoPoint);

impl ValueCommitment {
    pub fn derive(pool: Pool, value: Amount, rcv: &ValueCommitTrapdoor) -> Self {
        Self(balance(
            Scalar::from(value.to_sat()),
            value_generator(pool),
            rcv.0,
        ))
    }

    /// Commitment to `value_balance` with a zero trapdoor
    pub fn from_value_balance(pool: Pool, value_balance: SignedAmount) -> Self {
        Self(balance(
            scalar_from_i64(value_balance.to_sat()),
            value_generator(pool),
            Scalar::ZERO,
        ))
    }

    pub fn identity() -> Self {
        Self(RistrettoPoint::identity())
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        decode_point(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub(crate) fn inner(&self) -> &RistrettoPoint {
        &self.0
    }

    /// Interpret a commitment to zero as the binding verification key
    pub fn into_bvk(self) -> VerificationKey<Binding> {
        VerificationKey::from_point(self.0)
    }
}

impl Add for ValueCommitment {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for ValueCommitment {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl<'a> Sum<&'a ValueCommitment> for ValueCommitment {
    fn sum<I: Iterator<Item = &'a ValueCommitment>>(iter: I) -> Self {
        iter.fold(Self::identity(), |acc, cv| acc + *cv)
    }
}

impl std::fmt::Debug for ValueCommitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, SignedAmount};
    use rand::rngs::OsRng;

    use super::{ValueCommitTrapdoor, ValueCommitment, value_generator};
    use crate::types::Pool;

    #[test]
    fn generators_differ_per_pool() {
        assert_ne!(value_generator(Pool::Sapling), value_generator(Pool::Orchard));
    }

    #[test]
    fn homomorphism() {
        let r1 = ValueCommitTrapdoor::random(&mut OsRng);
        let r2 = ValueCommitTrapdoor::random(&mut OsRng);
        let a = ValueCommitment::derive(Pool::Sapling, Amount::from_sat(30), &r1);
        let b = ValueCommitment::derive(Pool::Sapling, Amount::from_sat(12), &r2);
        let sum = ValueCommitment::derive(Pool::Sapling, Amount::from_sat(42), &(r1 + r2));
        assert_eq!(a + b, sum);
    }

    #[test]
    fn balance_commits_to_zero() {
        let rcv_in = ValueCommitTrapdoor::random(&mut OsRng);
        let rcv_out = ValueCommitTrapdoor::random(&mut OsRng);
        let cv_in = ValueCommitment::derive(Pool::Orchard, Amount::from_sat(100), &rcv_in);
        let cv_out = ValueCommitment::derive(Pool::Orchard, Amount::from_sat(70), &rcv_out);
        let vb = ValueCommitment::from_value_balance(Pool::Orchard, SignedAmount::from_sat(30));
        let bvk = (cv_in - cv_out - vb).into_bvk();
        let bsk = (rcv_in - rcv_out).into_bsk();
        assert_eq!(bsk.verification_key(), bvk);
    }

    #[test]
    fn negative_value_balance() {
        let vb = ValueCommitment::from_value_balance(Pool::Sapling, SignedAmount::from_sat(-7));
        let pos = ValueCommitment::from_value_balance(Pool::Sapling, SignedAmount::from_sat(7));
        assert_eq!(vb + pos, ValueCommitment::identity());
    }
}
