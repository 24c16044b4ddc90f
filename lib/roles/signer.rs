//! Signers authorize proven spends and transparent inputs over the
//! sighash of a sealed bundle.

use rand::rngs::OsRng;

use crate::{
    authorization::{self, SigningKey},
    bundle::{Pczt, Phase, Slot, SlotState},
    error::{Error, Incomplete, SlotKind, Unauthorized},
    types::{Pool, Sighash, SpendAuthorizingKey},
    wallet::SpendAuthority,
};

fn ensure_sealed(pczt: &Pczt) -> Result<Sighash, Error> {
    match pczt.global.phase {
        Phase::Open => Err(Incomplete::Unsealed.into()),
        Phase::Sealed => pczt.sighash(),
        Phase::Finalized => Err(Error::BundleFinalized),
    }
}

/// Sign spend `index` in `pool`, with the key that was randomized into
/// its `rk`. Mutates `pczt` only on success.
fn sign_spend_in_place(
    pczt: &mut Pczt,
    sighash: &Sighash,
    pool: Pool,
    index: usize,
    ask: &SpendAuthorizingKey,
) -> Result<(), Error> {
    let bundle = pczt
        .shielded
        .get_mut(&pool)
        .ok_or(Error::SlotOutOfRange {
            pool,
            kind: SlotKind::Spend,
            index,
        })?;
    let slot = bundle.spends.get_mut(index).ok_or(Error::SlotOutOfRange {
        pool,
        kind: SlotKind::Spend,
        index,
    })?;
    let actual = slot.state();
    let Slot::Proven { content, proof } = slot.clone() else {
        return Err(Error::UnexpectedSlotState {
            pool,
            kind: SlotKind::Spend,
            index,
            expected: SlotState::Proven,
            actual,
        });
    };
    let rsk = ask.randomize(&content.alpha);
    if rsk.verification_key() != content.rk {
        return Err(Unauthorized::SpendKey { pool, index }.into());
    }
    let signature = rsk.sign(&mut OsRng, sighash.as_bytes());
    *slot = Slot::Authorized {
        content,
        proof,
        signature,
    };
    tracing::debug!(%pool, index, "authorized spend");
    Ok(())
}

pub fn sign_spend(
    pczt: &Pczt,
    pool: Pool,
    index: usize,
    ask: &SpendAuthorizingKey,
) -> Result<Pczt, Error> {
    let sighash = ensure_sealed(pczt)?;
    let mut res = pczt.clone();
    sign_spend_in_place(&mut res, &sighash, pool, index, ask)?;
    Ok(res)
}

fn sign_transparent_in_place(
    pczt: &mut Pczt,
    sighash: &Sighash,
    index: usize,
    signing_key: &SigningKey,
) -> Result<(), Error> {
    let input = pczt
        .transparent_inputs
        .get_mut(index)
        .ok_or(Error::InputOutOfRange(index))?;
    let authorization = authorization::authorize(input.address, signing_key, sighash)
        .map_err(|source| Unauthorized::TransparentKey { index, source })?;
    input.authorization = Some(authorization);
    tracing::debug!(index, address = %input.address, "authorized transparent input");
    Ok(())
}

pub fn sign_transparent(
    pczt: &Pczt,
    index: usize,
    signing_key: &SigningKey,
) -> Result<Pczt, Error> {
    let sighash = ensure_sealed(pczt)?;
    let mut res = pczt.clone();
    sign_transparent_in_place(&mut res, &sighash, index, signing_key)?;
    Ok(res)
}

/// Sign every proven spend and unauthorized transparent input that
/// `authority` holds a key for. Returns the bundle and the number of
/// signatures added.
pub fn sign_spends<A>(pczt: &Pczt, authority: &A) -> Result<(Pczt, usize), Error>
where
    A: SpendAuthority,
{
    let sighash = ensure_sealed(pczt)?;
    let mut res = pczt.clone();
    let mut signed = 0;
    for (pool, bundle) in &pczt.shielded {
        for (index, slot) in bundle.spends.iter().enumerate() {
            let Slot::Proven { content, .. } = slot else {
                continue;
            };
            let Some(ask) = content
                .key_derivation
                .as_ref()
                .and_then(|derivation| authority.spend_authorizing_key(derivation))
            else {
                continue;
            };
            sign_spend_in_place(&mut res, &sighash, *pool, index, &ask)?;
            signed += 1;
        }
    }
    for (index, input) in pczt.transparent_inputs.iter().enumerate() {
        if input.is_authorized() {
            continue;
        }
        let Some(signing_key) = authority.transparent_signing_key(&input.address)
        else {
            continue;
        };
        sign_transparent_in_place(&mut res, &sighash, index, &signing_key)?;
        signed += 1;
    }
    Ok((res, signed))
}
