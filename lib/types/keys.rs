//! Shielded key hierarchy.
//!
//! ```text
//! SpendingKey ─┬─ ask ─────────── ak = ask·B ─┐
//!              ├─ nsk ─────────── nk = nsk·B ─┼─ ivk = H(ak, nk) ── pk_d = ivk·G_d
//!              └─ ovk                          │
//!                                              └─ FullViewingKey { ak, nk, ovk }
//! ```

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT, ristretto::RistrettoPoint,
    scalar::Scalar,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use super::{
    Hash, Pool, address::PaymentAddress, decode_point, hash_to_curve,
    hash_to_scalar,
    serde_hexstr_human_readable,
    signature::{SigningKey, SpendAuth, VerificationKey},
};

pub type SpendAuthorizingKey = SigningKey<SpendAuth>;
pub type SpendValidatingKey = VerificationKey<SpendAuth>;

#[derive(Clone, Eq, PartialEq)]
pub struct SpendingKey([u8; 32]);

impl SpendingKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random<R>(rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn spend_authorizing_key(&self) -> SpendAuthorizingKey {
        SigningKey::from_scalar(hash_to_scalar("pczt 2025 ask", &[&self.0]))
    }

    fn nsk(&self) -> Scalar {
        hash_to_scalar("pczt 2025 nsk", &[&self.0])
    }

    pub fn outgoing_viewing_key(&self) -> OutgoingViewingKey {
        OutgoingViewingKey(blake3::derive_key("pczt 2025 ovk", &self.0))
    }

    pub fn full_viewing_key(&self) -> FullViewingKey {
        FullViewingKey {
            ak: self.spend_authorizing_key().verification_key(),
            nk: NullifierDerivingKey(self.nsk() * RISTRETTO_BASEPOINT_POINT),
            ovk: self.outgoing_viewing_key(),
        }
    }
}

impl std::fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SpendingKey(..)")
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct NullifierDerivingKey(RistrettoPoint);

impl NullifierDerivingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        decode_point(bytes).map(Self)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }
}

impl std::fmt::Debug for NullifierDerivingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct OutgoingViewingKey(pub [u8; 32]);

impl std::fmt::Debug for OutgoingViewingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OutgoingViewingKey(..)")
    }
}

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Diversifier(pub [u8; 11]);

impl Diversifier {
    /// Diversified base point `G_d`
    pub fn g_d(&self, pool: Pool) -> RistrettoPoint {
        hash_to_curve("pczt 2025 diversify", &[&[pool.tag()], &self.0])
    }
}

impl std::fmt::Debug for Diversifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Clone, Eq, PartialEq)]
pub struct IncomingViewingKey(Scalar);

impl IncomingViewingKey {
    pub(crate) fn inner(&self) -> &Scalar {
        &self.0
    }

    pub fn address(&self, pool: Pool, diversifier: Diversifier) -> PaymentAddress {
        PaymentAddress::new(pool, diversifier, self.0 * diversifier.g_d(pool))
    }

    /// Whether `address` was derived from this key
    pub fn owns(&self, address: &PaymentAddress) -> bool {
        self.address(address.pool(), *address.diversifier()) == *address
    }
}

impl std::fmt::Debug for IncomingViewingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IncomingViewingKey(..)")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FullViewingKey {
    pub ak: SpendValidatingKey,
    pub nk: NullifierDerivingKey,
    pub ovk: OutgoingViewingKey,
}

impl FullViewingKey {
    pub fn incoming_viewing_key(&self) -> IncomingViewingKey {
        derive_ivk(&self.ak, &self.nk)
    }

    /// Address with diversifier index `index`
    pub fn address(&self, pool: Pool, index: u32) -> PaymentAddress {
        let mut diversifier = [0u8; 11];
        let mut hasher = blake3::Hasher::new_derive_key("pczt 2025 diversifier");
        hasher.update(&self.ak.to_bytes());
        hasher.update(&self.nk.to_bytes());
        hasher.update(&index.to_le_bytes());
        hasher.finalize_xof().fill(&mut diversifier);
        self.incoming_viewing_key()
            .address(pool, Diversifier(diversifier))
    }
}

pub(crate) fn derive_ivk(
    ak: &SpendValidatingKey,
    nk: &NullifierDerivingKey,
) -> IncomingViewingKey {
    IncomingViewingKey(hash_to_scalar(
        "pczt 2025 ivk",
        &[&ak.to_bytes(), &nk.to_bytes()],
    ))
}

/// Where a spending key came from, so that a signer holding the seed can
/// re-derive it
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct KeyDerivation {
    #[serde(with = "serde_hexstr_human_readable")]
    pub seed_fingerprint: Hash,
    pub derivation_path: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::SpendingKey;
    use crate::types::Pool;

    #[test]
    fn addresses_are_owned_by_their_key() {
        let fvk = SpendingKey::random(&mut OsRng).full_viewing_key();
        let other = SpendingKey::random(&mut OsRng).full_viewing_key();
        let address = fvk.address(Pool::Sapling, 0);
        assert!(fvk.incoming_viewing_key().owns(&address));
        assert!(!other.incoming_viewing_key().owns(&address));
        assert_ne!(address, fvk.address(Pool::Sapling, 1));
        assert_ne!(address, fvk.address(Pool::Orchard, 0));
    }
}
