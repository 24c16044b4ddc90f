use crate::{
    bundle::{Pczt, Phase},
    error::{Error, Incomplete},
};

/// Fix the slot set. Afterwards slots may only progress, and the sighash
/// that proofs and signatures commit to is defined.
pub fn seal(pczt: &Pczt) -> Result<Pczt, Error> {
    pczt.ensure_open()?;
    if pczt.slot_count() == 0 {
        return Err(Incomplete::NoSlots.into());
    }
    if let Some(incomplete) = pczt.first_empty_slot() {
        return Err(incomplete.into());
    }
    let mut res = pczt.clone();
    res.global.phase = Phase::Sealed;
    let sighash = res.sighash()?;
    tracing::debug!(slots = res.slot_count(), %sighash, "sealed bundle");
    Ok(res)
}
