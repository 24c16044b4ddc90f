use crate::{
    bundle::{OutputSlot, Pczt, Phase, Slot, SpendSlot, shielded},
    error::{Error, Incomplete, SignatureTarget, SlotKind},
    types::{
        Pool, Transaction,
        transaction::{
            OutputDescription, ShieldedBundle, SpendDescription, TxIn, TxOut,
        },
    },
};

fn spend_description(
    pool: Pool,
    index: usize,
    slot: &SpendSlot,
) -> Result<SpendDescription, Error> {
    let Slot::Authorized {
        content,
        proof,
        signature,
    } = slot
    else {
        return Err(Incomplete::UnauthorizedSpend { pool, index }.into());
    };
    Ok(SpendDescription {
        cv: content.cv.to_bytes(),
        nullifier: content.nullifier.0,
        rk: content.rk.to_bytes(),
        zkproof: proof.to_bytes(),
        spend_auth_sig: signature.to_bytes(),
    })
}

fn output_description(
    pool: Pool,
    index: usize,
    slot: &OutputSlot,
) -> Result<OutputDescription, Error> {
    let (Some(output), Some(proof)) = (slot.content(), slot.proof()) else {
        return Err(Incomplete::UnprovenSlot {
            pool,
            kind: SlotKind::Output,
            index,
        }
        .into());
    };
    Ok(OutputDescription {
        cv: output.cv.to_bytes(),
        cmu: output.cmu.0,
        ephemeral_key: output.ephemeral_key,
        enc_ciphertext: output.enc_ciphertext.clone(),
        out_ciphertext: output.out_ciphertext.clone(),
        zkproof: proof.to_bytes(),
    })
}

fn shielded_bundle(bundle: &shielded::Bundle) -> Result<ShieldedBundle, Error> {
    let pool = bundle.pool;
    let binding_sig = bundle
        .binding_sig
        .as_ref()
        .ok_or(Error::SignatureVerificationFailed(SignatureTarget::Binding {
            pool,
        }))?;
    let spends = bundle
        .spends
        .iter()
        .enumerate()
        .map(|(index, slot)| spend_description(pool, index, slot))
        .collect::<Result<_, _>>()?;
    let outputs = bundle
        .outputs
        .iter()
        .enumerate()
        .map(|(index, slot)| output_description(pool, index, slot))
        .collect::<Result<_, _>>()?;
    Ok(ShieldedBundle {
        pool,
        spends,
        outputs,
        value_balance: bundle.value_balance.to_sat(),
        anchor: bundle.anchor.map(|anchor| anchor.0),
        binding_sig: binding_sig.to_bytes(),
    })
}

/// Produce the network transaction from a finalized bundle. Pools with
/// no slots are omitted.
pub fn extract(pczt: &Pczt) -> Result<Transaction, Error> {
    if pczt.global.phase != Phase::Finalized {
        return Err(Incomplete::Unfinalized.into());
    }
    let transparent_inputs = pczt
        .transparent_inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let authorization = input
                .authorization
                .clone()
                .ok_or(Incomplete::UnauthorizedTransparentInput(index))?;
            Ok(TxIn {
                prevout: input.prevout,
                value: input.value.to_sat(),
                address: input.address,
                sequence: input.sequence,
                authorization,
            })
        })
        .collect::<Result<_, Error>>()?;
    let transparent_outputs = pczt
        .transparent_outputs
        .iter()
        .map(|output| TxOut {
            value: output.value.to_sat(),
            address: output.address,
        })
        .collect();
    let shielded = pczt
        .shielded
        .values()
        .filter(|bundle| !bundle.is_empty())
        .map(shielded_bundle)
        .collect::<Result<_, _>>()?;
    let global = &pczt.global;
    let tx = Transaction {
        version: global.tx_version.to_u32(),
        version_group_id: global.version_group_id,
        consensus_branch_id: global.consensus_branch_id,
        lock_time: global.lock_time,
        expiry_height: global.expiry_height,
        transparent_inputs,
        transparent_outputs,
        shielded,
    };
    debug_assert_eq!(Some(tx.sighash()), pczt.sighash().ok());
    tracing::debug!(txid = %tx.txid(), "extracted transaction");
    Ok(tx)
}
