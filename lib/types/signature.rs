//! Schnorr signatures over ristretto255, typed by what they authorize.
//!
//! Spend authorization keys can be re-randomized, so that the verification
//! key published with a spend cannot be linked to the spender's
//! full viewing key.

use std::marker::PhantomData;

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT, ristretto::RistrettoPoint,
    scalar::Scalar,
};
use educe::Educe;
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use super::{decode_point, decode_scalar, hash_to_scalar};

mod private {
    pub trait Sealed {}
}

pub trait SigType: private::Sealed + 'static {
    const CHALLENGE_CONTEXT: &'static str;
    const NONCE_CONTEXT: &'static str;
}

/// Marker for spend authorization signatures
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpendAuth {}

impl private::Sealed for SpendAuth {}

impl SigType for SpendAuth {
    const CHALLENGE_CONTEXT: &'static str = "pczt 2025 spend auth challenge";
    const NONCE_CONTEXT: &'static str = "pczt 2025 spend auth nonce";
}

/// Marker for binding signatures
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Binding {}

impl private::Sealed for Binding {}

impl SigType for Binding {
    const CHALLENGE_CONTEXT: &'static str = "pczt 2025 binding challenge";
    const NONCE_CONTEXT: &'static str = "pczt 2025 binding nonce";
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed signature encoding")]
    MalformedSignature,
}

#[derive(Educe)]
#[educe(Clone(bound()), Eq, PartialEq(bound()))]
pub struct Signature<T: SigType> {
    r_bytes: [u8; 32],
    s_bytes: [u8; 32],
    _marker: PhantomData<T>,
}

impl<T: SigType> Signature<T> {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r_bytes);
        bytes[32..].copy_from_slice(&self.s_bytes);
        bytes
    }
}

impl<T: SigType> From<[u8; 64]> for Signature<T> {
    fn from(bytes: [u8; 64]) -> Self {
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&bytes[..32]);
        s_bytes.copy_from_slice(&bytes[32..]);
        Self {
            r_bytes,
            s_bytes,
            _marker: PhantomData,
        }
    }
}

impl<T: SigType> std::fmt::Debug for Signature<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

#[derive(Educe)]
#[educe(Clone(bound()), Eq, PartialEq(bound()))]
pub struct VerificationKey<T: SigType> {
    point: RistrettoPoint,
    _marker: PhantomData<T>,
}

impl<T: SigType> VerificationKey<T> {
    pub(crate) fn from_point(point: RistrettoPoint) -> Self {
        Self {
            point,
            _marker: PhantomData,
        }
    }

    pub(crate) fn point(&self) -> &RistrettoPoint {
        &self.point
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        decode_point(bytes).map(Self::from_point)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.point.compress().to_bytes()
    }

    pub fn verify(&self, msg: &[u8], signature: &Signature<T>) -> Result<(), Error> {
        let r = decode_point(&signature.r_bytes).ok_or(Error::MalformedSignature)?;
        let s = decode_scalar(&signature.s_bytes).ok_or(Error::MalformedSignature)?;
        let c = hash_to_scalar(
            T::CHALLENGE_CONTEXT,
            &[&signature.r_bytes, &self.to_bytes(), msg],
        );
        // s·B == R + c·vk
        let lhs = RistrettoPoint::vartime_double_scalar_mul_basepoint(
            &-c,
            &self.point,
            &s,
        );
        if lhs == r {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}

impl VerificationKey<SpendAuth> {
    /// `rk = ak + alpha·B`
    pub fn randomize(&self, alpha: &Scalar) -> Self {
        Self::from_point(self.point + alpha * RISTRETTO_BASEPOINT_POINT)
    }
}

impl<T: SigType> std::fmt::Debug for VerificationKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

#[derive(Educe)]
#[educe(Clone(bound()))]
pub struct SigningKey<T: SigType> {
    sk: Scalar,
    vk: VerificationKey<T>,
}

impl<T: SigType> SigningKey<T> {
    pub fn from_scalar(sk: Scalar) -> Self {
        Self {
            sk,
            vk: VerificationKey::from_point(sk * RISTRETTO_BASEPOINT_POINT),
        }
    }

    pub fn verification_key(&self) -> VerificationKey<T> {
        self.vk.clone()
    }

    pub fn sign<R>(&self, rng: &mut R, msg: &[u8]) -> Signature<T>
    where
        R: RngCore + CryptoRng,
    {
        let mut entropy = [0u8; 32];
        rng.fill_bytes(&mut entropy);
        let r = hash_to_scalar(
            T::NONCE_CONTEXT,
            &[&entropy, self.sk.as_bytes(), msg],
        );
        let r_bytes = (r * RISTRETTO_BASEPOINT_POINT).compress().to_bytes();
        let c = hash_to_scalar(
            T::CHALLENGE_CONTEXT,
            &[&r_bytes, &self.vk.to_bytes(), msg],
        );
        let s = r + c * self.sk;
        Signature {
            r_bytes,
            s_bytes: s.to_bytes(),
            _marker: PhantomData,
        }
    }
}

impl SigningKey<SpendAuth> {
    /// `rsk = ask + alpha`
    pub fn randomize(&self, alpha: &Scalar) -> Self {
        Self::from_scalar(self.sk + alpha)
    }
}

impl<T: SigType> std::fmt::Debug for SigningKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("vk", &self.vk)
            .finish_non_exhaustive()
    }
}
