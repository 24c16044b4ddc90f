//! In-band note encryption.
//!
//! The sender derives `epk = esk·G_d` and a shared secret `esk·pk_d`,
//! which the recipient recomputes as `ivk·epk`. The note plaintext is
//! sealed with AES-256-GCM under a key derived from the shared secret.
//! `(pk_d, esk)` is separately sealed under the outgoing cipher key, so
//! that the sender can later recover what it sent using its `ovk`.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use bitcoin::Amount;
use curve25519_dalek::ristretto::RistrettoPoint;
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use super::{
    Pool,
    address::PaymentAddress,
    decode_point, decode_scalar,
    keys::{Diversifier, IncomingViewingKey, OutgoingViewingKey},
    note::{MEMO_SIZE, Memo, Note, NoteCommitment, Rseed},
    value::ValueCommitment,
};

const NOTE_PLAINTEXT_SIZE: usize = 11 + 8 + 32 + MEMO_SIZE;
const OUT_PLAINTEXT_SIZE: usize = 32 + 32;
const AEAD_TAG_SIZE: usize = 16;

pub const ENC_CIPHERTEXT_SIZE: usize = NOTE_PLAINTEXT_SIZE + AEAD_TAG_SIZE;
pub const OUT_CIPHERTEXT_SIZE: usize = OUT_PLAINTEXT_SIZE + AEAD_TAG_SIZE;

/// Keys are never reused, so a fixed nonce is safe
const NONCE: [u8; 12] = [0u8; 12];

#[derive(Debug, Error)]
pub enum Error {
    #[error("AEAD encryption failed")]
    Aead,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedNote {
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: Vec<u8>,
    pub out_ciphertext: Vec<u8>,
}

fn kdf(shared_secret: &RistrettoPoint, ephemeral_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("pczt 2025 note encryption key");
    hasher.update(shared_secret.compress().as_bytes());
    hasher.update(ephemeral_key);
    hasher.finalize().into()
}

fn prf_ock(
    ovk: &OutgoingViewingKey,
    cv: &ValueCommitment,
    cmu: &NoteCommitment,
    ephemeral_key: &[u8; 32],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key("pczt 2025 outgoing cipher key");
    hasher.update(&ovk.0);
    hasher.update(&cv.to_bytes());
    hasher.update(&cmu.0);
    hasher.update(ephemeral_key);
    hasher.finalize().into()
}

fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
        .encrypt(Nonce::from_slice(&NONCE), plaintext)
        .map_err(|_| Error::Aead)
}

fn open(key: &[u8; 32], ciphertext: &[u8]) -> Option<Vec<u8>> {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
        .decrypt(Nonce::from_slice(&NONCE), ciphertext)
        .ok()
}

fn note_plaintext(note: &Note, memo: &Memo) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(NOTE_PLAINTEXT_SIZE);
    plaintext.extend_from_slice(&note.recipient.diversifier().0);
    plaintext.extend_from_slice(&note.value.to_sat().to_le_bytes());
    plaintext.extend_from_slice(&note.rseed.0);
    plaintext.extend_from_slice(memo.as_bytes());
    plaintext
}

/// Parse a note plaintext, given a way to recover `pk_d` from the
/// diversifier
fn parse_note_plaintext<F>(
    pool: Pool,
    plaintext: &[u8],
    pk_d: F,
) -> Option<(Note, Memo)>
where
    F: FnOnce(&Diversifier) -> RistrettoPoint,
{
    if plaintext.len() != NOTE_PLAINTEXT_SIZE {
        return None;
    }
    let (diversifier, rest) = plaintext.split_at(11);
    let (value, rest) = rest.split_at(8);
    let (rseed, memo) = rest.split_at(32);
    let diversifier = Diversifier(diversifier.try_into().ok()?);
    let value = Amount::from_sat(u64::from_le_bytes(value.try_into().ok()?));
    let rseed = Rseed(rseed.try_into().ok()?);
    let memo = Memo::from_bytes(memo).ok()?;
    let recipient = PaymentAddress::new(pool, diversifier, pk_d(&diversifier));
    Some((
        Note {
            recipient,
            value,
            rseed,
        },
        memo,
    ))
}

/// Encrypt `note` to its recipient. Without an `ovk`, the outgoing
/// ciphertext is sealed under a random key and is unrecoverable.
pub fn encrypt_note<R>(
    rng: &mut R,
    note: &Note,
    memo: &Memo,
    ovk: Option<&OutgoingViewingKey>,
    cv: &ValueCommitment,
    cmu: &NoteCommitment,
) -> Result<EncryptedNote, Error>
where
    R: RngCore + CryptoRng,
{
    let pool = note.recipient.pool();
    let esk = note.rseed.esk();
    let g_d = note.recipient.diversifier().g_d(pool);
    let ephemeral_key = (esk * g_d).compress().to_bytes();
    let shared_secret = esk * note.recipient.pk_d();
    let enc_ciphertext = seal(
        &kdf(&shared_secret, &ephemeral_key),
        &note_plaintext(note, memo),
    )?;
    let ock = match ovk {
        Some(ovk) => prf_ock(ovk, cv, cmu, &ephemeral_key),
        None => {
            let mut ock = [0u8; 32];
            rng.fill_bytes(&mut ock);
            ock
        }
    };
    let mut out_plaintext = Vec::with_capacity(OUT_PLAINTEXT_SIZE);
    out_plaintext.extend_from_slice(note.recipient.pk_d().compress().as_bytes());
    out_plaintext.extend_from_slice(esk.as_bytes());
    let out_ciphertext = seal(&ock, &out_plaintext)?;
    Ok(EncryptedNote {
        ephemeral_key,
        enc_ciphertext,
        out_ciphertext,
    })
}

/// Trial-decrypt an output with an incoming viewing key
pub fn try_decrypt_note(
    ivk: &IncomingViewingKey,
    pool: Pool,
    ephemeral_key: &[u8; 32],
    cmu: &NoteCommitment,
    enc_ciphertext: &[u8],
) -> Option<(Note, Memo)> {
    let epk = decode_point(ephemeral_key)?;
    let shared_secret = ivk.inner() * epk;
    let plaintext = open(&kdf(&shared_secret, ephemeral_key), enc_ciphertext)?;
    let (note, memo) = parse_note_plaintext(pool, &plaintext, |diversifier| {
        ivk.inner() * diversifier.g_d(pool)
    })?;
    let epk_matches = note.rseed.esk() * note.recipient.diversifier().g_d(pool) == epk;
    (epk_matches && note.commitment() == *cmu).then_some((note, memo))
}

/// Recover an output sent with the given outgoing viewing key
pub fn try_recover_output(
    ovk: &OutgoingViewingKey,
    pool: Pool,
    cv: &ValueCommitment,
    cmu: &NoteCommitment,
    encrypted: &EncryptedNote,
) -> Option<(Note, Memo)> {
    let ock = prf_ock(ovk, cv, cmu, &encrypted.ephemeral_key);
    let out_plaintext = open(&ock, &encrypted.out_ciphertext)?;
    if out_plaintext.len() != OUT_PLAINTEXT_SIZE {
        return None;
    }
    let pk_d = decode_point(out_plaintext[..32].try_into().ok()?)?;
    let esk = decode_scalar(out_plaintext[32..].try_into().ok()?)?;
    let shared_secret = esk * pk_d;
    let plaintext = open(
        &kdf(&shared_secret, &encrypted.ephemeral_key),
        &encrypted.enc_ciphertext,
    )?;
    let (note, memo) = parse_note_plaintext(pool, &plaintext, |_| pk_d)?;
    (note.rseed.esk() == esk && note.commitment() == *cmu).then_some((note, memo))
}
