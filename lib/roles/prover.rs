//! The Prover attaches a proof to every populated slot of a sealed
//! bundle. Slots are proven in parallel; each job reads only its own slot
//! and the pool's proving key.

use rand::rngs::OsRng;
use rayon::iter::{
    IndexedParallelIterator as _, IntoParallelRefIterator as _,
    ParallelIterator as _,
};

use crate::{
    bundle::{OutputSlot, Pczt, Phase, Slot, SpendSlot, shielded},
    error::{Error, Incomplete, SlotKind},
    proof::{ProvingKey, ProvingParameters, Statement},
    types::{Anchor, Sighash},
};

fn prove_spend(
    pk: &ProvingKey,
    sighash: &Sighash,
    anchor: Option<&Anchor>,
    index: usize,
    slot: &SpendSlot,
) -> Result<SpendSlot, Error> {
    let pool = pk.pool();
    let Slot::Populated(spend) = slot else {
        return Ok(slot.clone());
    };
    let anchor = anchor.ok_or(Incomplete::MissingAnchor { pool })?;
    if !spend.is_consistent(pool, anchor) {
        return Err(Error::InvalidWitness {
            pool,
            kind: SlotKind::Spend,
            index,
        });
    }
    let statement = Statement::Spend {
        index,
        cv: &spend.cv,
        nullifier: &spend.nullifier,
        rk: &spend.rk,
        anchor,
    };
    let proof = pk.prove(
        &mut OsRng,
        &statement,
        sighash,
        spend.value().to_sat(),
        &spend.rcv,
    );
    tracing::trace!(%pool, index, "proved spend");
    Ok(Slot::Proven {
        content: spend.clone(),
        proof,
    })
}

fn prove_output(
    pk: &ProvingKey,
    sighash: &Sighash,
    index: usize,
    slot: &OutputSlot,
) -> Result<OutputSlot, Error> {
    let pool = pk.pool();
    let Slot::Populated(output) = slot else {
        return Ok(slot.clone());
    };
    if !output.is_consistent(pool) {
        return Err(Error::InvalidWitness {
            pool,
            kind: SlotKind::Output,
            index,
        });
    }
    let statement = Statement::Output {
        index,
        cv: &output.cv,
        cmu: &output.cmu,
        ephemeral_key: &output.ephemeral_key,
    };
    let proof = pk.prove(
        &mut OsRng,
        &statement,
        sighash,
        output.value().to_sat(),
        &output.rcv,
    );
    tracing::trace!(%pool, index, "proved output");
    Ok(Slot::Proven {
        content: output.clone(),
        proof,
    })
}

fn prove_bundle(
    pk: &ProvingKey,
    sighash: &Sighash,
    bundle: &mut shielded::Bundle,
) -> Result<(), Error> {
    let anchor = bundle.anchor;
    let spends = bundle
        .spends
        .par_iter()
        .enumerate()
        .map(|(index, slot)| prove_spend(pk, sighash, anchor.as_ref(), index, slot))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = bundle
        .outputs
        .par_iter()
        .enumerate()
        .map(|(index, slot)| prove_output(pk, sighash, index, slot))
        .collect::<Result<Vec<_>, _>>()?;
    bundle.spends = spends;
    bundle.outputs = outputs;
    Ok(())
}

/// Prove every populated slot. Pools with nothing to prove do not need
/// proving parameters, so provers for different pools can work on copies
/// of one bundle and combine the results.
pub fn prove<P>(pczt: &Pczt, params: &P) -> Result<Pczt, Error>
where
    P: ProvingParameters,
{
    match pczt.global.phase {
        Phase::Open => return Err(Incomplete::Unsealed.into()),
        Phase::Sealed => (),
        Phase::Finalized => return Err(Error::BundleFinalized),
    }
    let sighash = pczt.sighash()?;
    let mut res = pczt.clone();
    for bundle in res.shielded.values_mut() {
        let pending = bundle
            .spends
            .iter()
            .filter(|slot| matches!(slot, Slot::Populated(_)))
            .count()
            + bundle
                .outputs
                .iter()
                .filter(|slot| matches!(slot, Slot::Populated(_)))
                .count();
        if pending == 0 {
            continue;
        }
        let pk = params
            .proving_key(bundle.pool)
            .map_err(Error::proving_parameters)?;
        prove_bundle(&pk, &sighash, bundle)?;
        tracing::debug!(pool = %bundle.pool, proofs = pending, "proved slots");
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use bitcoin::Amount;
    use rand::rngs::OsRng;

    use super::prove;
    use crate::{
        bundle::{Pczt, Slot, SlotState},
        chain::MemoryChain,
        error::{Error, Incomplete, SlotKind},
        proof::{LocalParameters, PoolParameters},
        roles::{NewOutput, Skeleton, add_output, create, seal},
        types::{Pool, SpendingKey},
    };

    fn two_pools() -> Pczt {
        let fvk = SpendingKey::random(&mut OsRng).full_viewing_key();
        let pczt = create(&Skeleton::for_tip(0), &MemoryChain::new()).unwrap();
        let pczt = add_output(
            &pczt,
            &mut OsRng,
            &NewOutput::new(fvk.address(Pool::Sapling, 0), Amount::from_sat(1)),
        )
        .unwrap();
        add_output(
            &pczt,
            &mut OsRng,
            &NewOutput::new(fvk.address(Pool::Orchard, 0), Amount::from_sat(2)),
        )
        .unwrap()
    }

    #[test]
    fn requires_sealed_bundle() {
        assert!(matches!(
            prove(&two_pools(), &LocalParameters),
            Err(Error::IncompleteBundle(Incomplete::Unsealed))
        ));
    }

    #[test]
    fn proves_every_pool() {
        let proven = prove(&seal(&two_pools()).unwrap(), &LocalParameters).unwrap();
        for pool in [Pool::Sapling, Pool::Orchard] {
            let bundle = proven.shielded(pool).unwrap();
            assert_eq!(bundle.outputs()[0].state(), SlotState::Proven);
        }
        assert_eq!(prove(&proven, &LocalParameters).unwrap(), proven);
    }

    #[test]
    fn partial_parameters() {
        let sealed = seal(&two_pools()).unwrap();
        assert!(matches!(
            prove(&sealed, &PoolParameters::new([Pool::Sapling])),
            Err(Error::ProvingParameters(_))
        ));
    }

    #[test]
    fn refuses_inconsistent_slot() {
        let mut sealed = seal(&two_pools()).unwrap();
        let bundle = sealed.shielded.get_mut(&Pool::Sapling).unwrap();
        let Slot::Populated(output) = &mut bundle.outputs[0] else {
            panic!("expected a populated output");
        };
        output.ephemeral_key = [0; 32];
        assert!(matches!(
            prove(&sealed, &LocalParameters),
            Err(Error::InvalidWitness {
                pool: Pool::Sapling,
                kind: SlotKind::Output,
                index: 0
            })
        ));
    }
}
