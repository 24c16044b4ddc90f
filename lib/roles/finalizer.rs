//! The Spend Finalizer checks that a complete bundle balances, that each
//! slot's private data opens its public inputs, and that every proof and
//! authorization verifies. It then attaches the binding signatures. The
//! result is ready for extraction.

use rand::rngs::OsRng;
use rayon::iter::{
    IndexedParallelIterator as _, IntoParallelRefIterator as _,
    ParallelIterator as _,
};

use crate::{
    authorization,
    bundle::{Pczt, Phase, Slot, shielded},
    chain::ChainOracle,
    error::{Error, Imbalance, Incomplete, SignatureTarget, SlotKind},
    proof::{ProvingParameters, Statement, VerifyingKey},
    types::{Sighash, ValueCommitTrapdoor, ValueCommitment},
};

fn verify_proofs(
    vk: &VerifyingKey,
    sighash: &Sighash,
    bundle: &shielded::Bundle,
) -> Result<(), Error> {
    let pool = bundle.pool;
    if !bundle.spends.is_empty() {
        let anchor = bundle.anchor.ok_or(Incomplete::MissingAnchor { pool })?;
        bundle
            .spends
            .par_iter()
            .enumerate()
            .try_for_each(|(index, slot)| {
                let failed = Error::ProofVerificationFailed {
                    pool,
                    kind: SlotKind::Spend,
                    index,
                };
                let (Some(spend), Some(proof)) = (slot.content(), slot.proof())
                else {
                    return Err(failed);
                };
                // The proof only opens `cv`; membership and the nullifier
                // are checked against the private data
                if !spend.is_consistent(pool, &anchor) {
                    return Err(failed);
                }
                let statement = Statement::Spend {
                    index,
                    cv: &spend.cv,
                    nullifier: &spend.nullifier,
                    rk: &spend.rk,
                    anchor: &anchor,
                };
                vk.verify(&statement, sighash, proof).map_err(|_| failed)
            })?;
    }
    verify_output_proofs(vk, sighash, bundle)
}

fn verify_output_proofs(
    vk: &VerifyingKey,
    sighash: &Sighash,
    bundle: &shielded::Bundle,
) -> Result<(), Error> {
    let pool = bundle.pool;
    bundle
        .outputs
        .par_iter()
        .enumerate()
        .try_for_each(|(index, slot)| {
            let failed = Error::ProofVerificationFailed {
                pool,
                kind: SlotKind::Output,
                index,
            };
            let (Some(output), Some(proof)) = (slot.content(), slot.proof()) else {
                return Err(failed);
            };
            if !output.is_consistent(pool) {
                return Err(failed);
            }
            let statement = Statement::Output {
                index,
                cv: &output.cv,
                cmu: &output.cmu,
                ephemeral_key: &output.ephemeral_key,
            };
            vk.verify(&statement, sighash, proof).map_err(|_| failed)
        })
}

fn verify_spend_auth_sigs(
    sighash: &Sighash,
    bundle: &shielded::Bundle,
) -> Result<(), Error> {
    let pool = bundle.pool;
    bundle
        .spends
        .par_iter()
        .enumerate()
        .try_for_each(|(index, slot)| {
            let failed = Error::SignatureVerificationFailed(SignatureTarget::Spend {
                pool,
                index,
            });
            let Slot::Authorized {
                content, signature, ..
            } = slot
            else {
                return Err(failed);
            };
            content
                .rk
                .verify(sighash.as_bytes(), signature)
                .map_err(|_| failed)
        })
}

/// Derive the binding signing key from the trapdoors, check it against
/// the value commitments and sign
fn bind(sighash: &Sighash, bundle: &mut shielded::Bundle) -> Result<(), Error> {
    let pool = bundle.pool;
    let spend_rcv: ValueCommitTrapdoor = bundle
        .spends
        .iter()
        .filter_map(|slot| slot.content())
        .map(|spend| &spend.rcv)
        .sum();
    let output_rcv: ValueCommitTrapdoor = bundle
        .outputs
        .iter()
        .filter_map(|slot| slot.content())
        .map(|output| &output.rcv)
        .sum();
    let bsk = (spend_rcv - output_rcv).into_bsk();
    let spend_cv: ValueCommitment = bundle
        .spends
        .iter()
        .filter_map(|slot| slot.content())
        .map(|spend| &spend.cv)
        .sum();
    let output_cv: ValueCommitment = bundle
        .outputs
        .iter()
        .filter_map(|slot| slot.content())
        .map(|output| &output.cv)
        .sum();
    let bvk = (spend_cv
        - output_cv
        - ValueCommitment::from_value_balance(pool, bundle.value_balance))
    .into_bvk();
    if bsk.verification_key() != bvk {
        return Err(Imbalance::BindingKeyMismatch { pool }.into());
    }
    let binding_sig = bsk.sign(&mut OsRng, sighash.as_bytes());
    bvk.verify(sighash.as_bytes(), &binding_sig)
        .map_err(|_| Error::SignatureVerificationFailed(SignatureTarget::Binding { pool }))?;
    bundle.binding_sig = Some(binding_sig);
    Ok(())
}

/// Verify a complete bundle and bind it. Nothing is modified unless every
/// check passes.
pub fn finalize<C, P>(pczt: &Pczt, chain: &C, params: &P) -> Result<Pczt, Error>
where
    C: ChainOracle,
    P: ProvingParameters,
{
    pczt.ensure_not_finalized()?;
    if let Some(incomplete) = pczt.incomplete() {
        return Err(incomplete.into());
    }
    for bundle in pczt.shielded.values() {
        let computed = bundle.computed_value_balance()?;
        if bundle.value_balance != computed {
            return Err(Imbalance::ValueBalanceMismatch {
                pool: bundle.pool,
                declared: bundle.value_balance,
                computed,
            }
            .into());
        }
    }
    let fee = pczt.fee()?;
    if fee.is_negative() {
        return Err(Imbalance::NegativeFee(fee).into());
    }
    for bundle in pczt.shielded.values() {
        if bundle.spends.is_empty() {
            continue;
        }
        let pool = bundle.pool;
        let anchor = bundle.anchor.ok_or(Incomplete::MissingAnchor { pool })?;
        if !chain.is_anchor_valid(pool, &anchor) {
            tracing::warn!(%pool, %anchor, "anchor is outside the accepted window");
            return Err(Error::StaleAnchor { pool, anchor });
        }
    }
    let sighash = pczt.sighash()?;
    for bundle in pczt.shielded.values().filter(|bundle| !bundle.is_empty()) {
        let vk = params
            .verifying_key(bundle.pool)
            .map_err(Error::proving_parameters)?;
        verify_proofs(&vk, &sighash, bundle)?;
        verify_spend_auth_sigs(&sighash, bundle)?;
    }
    let authorizations = pczt
        .transparent_inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            input
                .authorization
                .as_ref()
                .map(|authorization| (input.address, authorization))
                .ok_or(Incomplete::UnauthorizedTransparentInput(index))
        })
        .collect::<Result<Vec<_>, _>>()?;
    authorization::verify_authorizations(&authorizations, &sighash).map_err(|err| {
        tracing::debug!(
            index = err.index,
            source = %err.source,
            "transparent authorization failed"
        );
        Error::SignatureVerificationFailed(SignatureTarget::TransparentInput {
            index: err.index,
        })
    })?;
    let mut res = pczt.clone();
    for bundle in res.shielded.values_mut().filter(|bundle| !bundle.is_empty()) {
        bind(&sighash, bundle)?;
    }
    res.global.phase = Phase::Finalized;
    tracing::debug!(
        %sighash,
        fee = %fee.display_dynamic(),
        "finalized bundle"
    );
    Ok(res)
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, SignedAmount};
    use rand::rngs::OsRng;

    use super::finalize;
    use crate::{
        bundle::{BundleState, Pczt, Slot},
        chain::{ChainOracle as _, MemoryChain},
        error::{Error, Imbalance, Incomplete, SignatureTarget, SlotKind},
        proof::{LocalParameters, Proof, ProvingKey, Statement},
        roles::{
            FundingPolicy, NewOutput, Skeleton, add_output, create, fund, prove, seal,
            sign_spends,
        },
        types::{Note, NoteCommitment, Nullifier, Pool, Rseed, SpendingKey},
        wallet::MemoryWallet,
    };

    /// A sealed bundle paying 700 from a 1000 note, with the wallet that
    /// can sign it
    fn sealed(chain: &mut MemoryChain) -> (Pczt, MemoryWallet) {
        let mut wallet = MemoryWallet::from_seed([1; 64]);
        let identity = wallet.new_address(Pool::Sapling).unwrap();
        let note = Note {
            recipient: identity,
            value: Amount::from_sat(1_000),
            rseed: Rseed::random(&mut OsRng),
        };
        let positions = chain.mine_block([(Pool::Sapling, note.commitment())]).unwrap();
        wallet.add_note(note, positions[0]).unwrap();
        wallet.sync(chain);
        let recipient = SpendingKey::random(&mut OsRng)
            .full_viewing_key()
            .address(Pool::Orchard, 0);
        let pczt = create(&Skeleton::for_tip(chain.tip_height()), chain).unwrap();
        let pczt = add_output(
            &pczt,
            &mut OsRng,
            &NewOutput::new(recipient, Amount::from_sat(700)),
        )
        .unwrap();
        let policy = FundingPolicy {
            fee: Amount::from_sat(300),
            change: false,
        };
        let pczt = fund(&pczt, &identity, &policy, &wallet, chain).unwrap();
        (seal(&pczt).unwrap(), wallet)
    }

    /// A sealed, proven and signed bundle paying 700 from a 1000 note
    fn signed(chain: &mut MemoryChain) -> Pczt {
        let (sealed, wallet) = sealed(chain);
        let proven = prove(&sealed, &LocalParameters).unwrap();
        sign_spends(&proven, &wallet).unwrap().0
    }

    /// Prove every populated slot without checking that its private data
    /// opens its public inputs
    fn prove_blindly(pczt: &Pczt) -> Pczt {
        let sighash = pczt.sighash().unwrap();
        let mut res = pczt.clone();
        for bundle in res.shielded.values_mut() {
            let pk = ProvingKey::new(bundle.pool);
            let anchor = bundle.anchor;
            for (index, slot) in bundle.spends.iter_mut().enumerate() {
                let Slot::Populated(spend) = &*slot else {
                    continue;
                };
                let statement = Statement::Spend {
                    index,
                    cv: &spend.cv,
                    nullifier: &spend.nullifier,
                    rk: &spend.rk,
                    anchor: anchor.as_ref().unwrap(),
                };
                let proof = pk.prove(
                    &mut OsRng,
                    &statement,
                    &sighash,
                    spend.value().to_sat(),
                    &spend.rcv,
                );
                *slot = Slot::Proven {
                    content: spend.clone(),
                    proof,
                };
            }
            for (index, slot) in bundle.outputs.iter_mut().enumerate() {
                let Slot::Populated(output) = &*slot else {
                    continue;
                };
                let statement = Statement::Output {
                    index,
                    cv: &output.cv,
                    cmu: &output.cmu,
                    ephemeral_key: &output.ephemeral_key,
                };
                let proof = pk.prove(
                    &mut OsRng,
                    &statement,
                    &sighash,
                    output.value().to_sat(),
                    &output.rcv,
                );
                *slot = Slot::Proven {
                    content: output.clone(),
                    proof,
                };
            }
        }
        res
    }

    #[test]
    fn binds_a_complete_bundle() {
        let mut chain = MemoryChain::new();
        let pczt = signed(&mut chain);
        assert_eq!(pczt.state(), BundleState::Finalizable);
        let finalized = finalize(&pczt, &chain, &LocalParameters).unwrap();
        assert_eq!(finalized.state(), BundleState::Finalized);
        assert_eq!(finalized.fee().unwrap(), SignedAmount::from_sat(300));
        for pool in [Pool::Sapling, Pool::Orchard] {
            assert!(finalized.shielded(pool).unwrap().binding_sig().is_some());
        }
        assert_eq!(finalized.sighash().unwrap(), pczt.sighash().unwrap());
        assert!(matches!(
            finalize(&finalized, &chain, &LocalParameters),
            Err(Error::BundleFinalized)
        ));
    }

    #[test]
    fn refuses_incomplete_bundles() {
        let chain = MemoryChain::new();
        let recipient = SpendingKey::random(&mut OsRng)
            .full_viewing_key()
            .address(Pool::Sapling, 0);
        let pczt = create(&Skeleton::for_tip(0), &chain).unwrap();
        let pczt = add_output(
            &pczt,
            &mut OsRng,
            &NewOutput::new(recipient, Amount::from_sat(5)),
        )
        .unwrap();
        assert!(matches!(
            finalize(&pczt, &chain, &LocalParameters),
            Err(Error::IncompleteBundle(Incomplete::Unsealed))
        ));
        let proven = prove(&seal(&pczt).unwrap(), &LocalParameters).unwrap();
        // Outputs with no inputs leave a negative fee
        assert!(matches!(
            finalize(&proven, &chain, &LocalParameters),
            Err(Error::UnbalancedValue(Imbalance::NegativeFee(_)))
        ));
    }

    #[test]
    fn anchors_expire() {
        let mut chain = MemoryChain::new();
        let pczt = signed(&mut chain);
        chain
            .mine_block([(Pool::Sapling, NoteCommitment([7; 32]))])
            .unwrap();
        chain.advance(MemoryChain::ANCHOR_WINDOW);
        assert!(matches!(
            finalize(&pczt, &chain, &LocalParameters),
            Err(Error::StaleAnchor {
                pool: Pool::Sapling,
                ..
            })
        ));
    }

    #[test]
    fn tampering_is_detected() {
        let mut chain = MemoryChain::new();
        let pczt = signed(&mut chain);

        let mut wrong_proof = pczt.clone();
        let bundle = wrong_proof.shielded.get_mut(&Pool::Orchard).unwrap();
        let Slot::Proven { proof, .. } = &mut bundle.outputs[0] else {
            panic!("expected a proven output");
        };
        *proof = Proof::from_bytes([0; 96]);
        assert!(matches!(
            finalize(&wrong_proof, &chain, &LocalParameters),
            Err(Error::ProofVerificationFailed {
                pool: Pool::Orchard,
                kind: SlotKind::Output,
                index: 0
            })
        ));

        let mut wrong_balance = pczt.clone();
        wrong_balance
            .shielded
            .get_mut(&Pool::Sapling)
            .unwrap()
            .value_balance = SignedAmount::from_sat(999);
        assert!(matches!(
            finalize(&wrong_balance, &chain, &LocalParameters),
            Err(Error::UnbalancedValue(Imbalance::ValueBalanceMismatch {
                pool: Pool::Sapling,
                ..
            }))
        ));

        let mut wrong_sig = pczt.clone();
        let bundle = wrong_sig.shielded.get_mut(&Pool::Sapling).unwrap();
        let Slot::Authorized { signature, .. } = &mut bundle.spends[0] else {
            panic!("expected an authorized spend");
        };
        *signature = [3; 64].into();
        assert!(matches!(
            finalize(&wrong_sig, &chain, &LocalParameters),
            Err(Error::SignatureVerificationFailed(SignatureTarget::Spend {
                pool: Pool::Sapling,
                index: 0
            }))
        ));
    }

    #[test]
    fn forged_commitments_are_rejected() {
        let mut chain = MemoryChain::new();
        let (sealed, wallet) = sealed(&mut chain);
        let sign = |pczt: &Pczt| sign_spends(&prove_blindly(pczt), &wallet).unwrap().0;
        assert!(finalize(&sign(&sealed), &chain, &LocalParameters).is_ok());

        // Commit to a larger note than the one the value commitment opens
        let mut inflated = sealed.clone();
        let bundle = inflated.shielded.get_mut(&Pool::Orchard).unwrap();
        let Slot::Populated(output) = &mut bundle.outputs[0] else {
            panic!("expected a populated output");
        };
        output.cmu = Note {
            value: Amount::from_sat(1_000_000),
            ..output.note
        }
        .commitment();
        assert!(matches!(
            finalize(&sign(&inflated), &chain, &LocalParameters),
            Err(Error::ProofVerificationFailed {
                pool: Pool::Orchard,
                kind: SlotKind::Output,
                index: 0
            })
        ));

        let mut made_up = sealed.clone();
        let bundle = made_up.shielded.get_mut(&Pool::Sapling).unwrap();
        let Slot::Populated(spend) = &mut bundle.spends[0] else {
            panic!("expected a populated spend");
        };
        spend.nullifier = Nullifier([9; 32]);
        assert!(matches!(
            finalize(&sign(&made_up), &chain, &LocalParameters),
            Err(Error::ProofVerificationFailed {
                pool: Pool::Sapling,
                kind: SlotKind::Spend,
                index: 0
            })
        ));
    }
}
