//! The Combiner merges copies of one bundle that were progressed
//! independently, e.g. proven by one party and signed by another.
//! Merging is commutative and associative.

use std::collections::BTreeMap;

use crate::{
    bundle::{Pczt, Phase, Slot, shielded, slot::SlotSignature},
    error::{Conflict, Error, SlotKind},
    types::Pool,
};

/// Slot-wise merge of two slot lists; indices missing from the shorter
/// list are taken from the longer one
fn merge_slots<T, S>(
    ours: &[Slot<T, S>],
    theirs: &[Slot<T, S>],
    conflict: impl Fn(usize) -> Conflict,
) -> Result<Vec<Slot<T, S>>, Conflict>
where
    T: Clone + Eq,
    S: SlotSignature,
{
    (0..ours.len().max(theirs.len()))
        .map(|index| match (ours.get(index), theirs.get(index)) {
            (Some(ours), Some(theirs)) => {
                ours.merge(theirs).map_err(|_| conflict(index))
            }
            (Some(slot), None) | (None, Some(slot)) => Ok(slot.clone()),
            (None, None) => unreachable!("index is below the longer length"),
        })
        .collect()
}

fn merge_bundles(
    ours: &shielded::Bundle,
    theirs: &shielded::Bundle,
) -> Result<shielded::Bundle, Error> {
    let pool = ours.pool;
    let anchor = match (ours.anchor, theirs.anchor) {
        (Some(a), Some(b)) if a != b => {
            return Err(Conflict::Anchor { pool }.into());
        }
        (anchor, other) => anchor.or(other),
    };
    let spends = merge_slots(&ours.spends, &theirs.spends, |index| {
        Conflict::Slot {
            pool,
            kind: SlotKind::Spend,
            index,
        }
    })?;
    let outputs = merge_slots(&ours.outputs, &theirs.outputs, |index| {
        Conflict::Slot {
            pool,
            kind: SlotKind::Output,
            index,
        }
    })?;
    let mut merged = shielded::Bundle {
        pool,
        spends,
        outputs,
        value_balance: ours.value_balance,
        anchor,
        binding_sig: None,
    };
    merged.refresh_value_balance()?;
    Ok(merged)
}

/// A sealed bundle's slot counts are fixed; the other copy may not
/// exceed them
fn check_sealed_counts(sealed: &Pczt, other: &Pczt) -> Result<(), Conflict> {
    if sealed.global.phase != Phase::Sealed {
        return Ok(());
    }
    let counts = |pczt: &Pczt, pool: Pool| {
        pczt.shielded
            .get(&pool)
            .map_or((0, 0), |bundle| (bundle.spends.len(), bundle.outputs.len()))
    };
    for pool in sealed.shielded.keys().chain(other.shielded.keys()) {
        let (sealed_spends, sealed_outputs) = counts(sealed, *pool);
        let (other_spends, other_outputs) = counts(other, *pool);
        for (kind, sealed, other) in [
            (SlotKind::Spend, sealed_spends, other_spends),
            (SlotKind::Output, sealed_outputs, other_outputs),
        ] {
            if other > sealed {
                return Err(Conflict::SealedSlotCount {
                    pool: *pool,
                    kind,
                    sealed,
                    other,
                });
            }
        }
    }
    for (kind, sealed, other) in [
        (
            "input",
            sealed.transparent_inputs.len(),
            other.transparent_inputs.len(),
        ),
        (
            "output",
            sealed.transparent_outputs.len(),
            other.transparent_outputs.len(),
        ),
    ] {
        if other > sealed {
            return Err(Conflict::SealedTransparentCount {
                kind,
                sealed,
                other,
            });
        }
    }
    Ok(())
}

/// Merge two copies of one bundle
pub fn combine(a: &Pczt, b: &Pczt) -> Result<Pczt, Error> {
    a.ensure_not_finalized()?;
    b.ensure_not_finalized()?;
    if !a.global.same_skeleton(&b.global) {
        return Err(Conflict::Skeleton.into());
    }
    check_sealed_counts(a, b)?;
    check_sealed_counts(b, a)?;
    let mut shielded = BTreeMap::new();
    for pool in a.shielded.keys().chain(b.shielded.keys()) {
        if shielded.contains_key(pool) {
            continue;
        }
        let bundle = match (a.shielded.get(pool), b.shielded.get(pool)) {
            (Some(ours), Some(theirs)) => merge_bundles(ours, theirs)?,
            (Some(bundle), None) | (None, Some(bundle)) => bundle.clone(),
            (None, None) => unreachable!("pool is a key of one operand"),
        };
        shielded.insert(*pool, bundle);
    }
    let transparent_inputs = merge_slots_by(
        &a.transparent_inputs,
        &b.transparent_inputs,
        |ours, theirs| ours.merge(theirs).ok(),
        Conflict::TransparentInput,
    )?;
    let transparent_outputs = merge_slots_by(
        &a.transparent_outputs,
        &b.transparent_outputs,
        |ours, theirs| (ours == theirs).then(|| ours.clone()),
        Conflict::TransparentOutput,
    )?;
    let mut global = a.global.clone();
    global.phase = a.global.phase.max(b.global.phase);
    let res = Pczt {
        global,
        transparent_inputs,
        transparent_outputs,
        shielded,
    };
    tracing::debug!(
        phase = %res.global.phase,
        slots = res.slot_count(),
        "combined bundles"
    );
    Ok(res)
}

fn merge_slots_by<T, F>(
    ours: &[T],
    theirs: &[T],
    merge: F,
    conflict: fn(usize) -> Conflict,
) -> Result<Vec<T>, Conflict>
where
    T: Clone,
    F: Fn(&T, &T) -> Option<T>,
{
    (0..ours.len().max(theirs.len()))
        .map(|index| match (ours.get(index), theirs.get(index)) {
            (Some(ours), Some(theirs)) => {
                merge(ours, theirs).ok_or_else(|| conflict(index))
            }
            (Some(item), None) | (None, Some(item)) => Ok(item.clone()),
            (None, None) => unreachable!("index is below the longer length"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use bitcoin::Amount;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    use super::combine;
    use crate::{
        bundle::{BundleState, Pczt, Phase, Slot, SlotState},
        chain::{ChainOracle as _, MemoryChain},
        error::{Conflict, Error},
        proof::LocalParameters,
        roles::{
            FundingPolicy, NewOutput, Skeleton, add_output, add_transparent_input,
            add_transparent_output, create, finalize, fund, prove, seal, sign_spends,
        },
        types::{Address, Note, OutPoint, Pool, Rseed, SpendingKey, Txid},
        wallet::MemoryWallet,
    };

    fn base() -> Pczt {
        create(&Skeleton::for_tip(0), &MemoryChain::new()).unwrap()
    }

    fn output(pool: Pool, sats: u64) -> NewOutput {
        let fvk = SpendingKey::random(&mut OsRng).full_viewing_key();
        NewOutput::new(fvk.address(pool, 0), Amount::from_sat(sats))
    }

    #[test]
    fn takes_missing_slots_from_either_side() {
        let shared = add_output(&base(), &mut OsRng, &output(Pool::Sapling, 10)).unwrap();
        let longer =
            add_output(&shared, &mut OsRng, &output(Pool::Orchard, 20)).unwrap();
        let merged = combine(&shared, &longer).unwrap();
        assert_eq!(merged, longer);
        assert_eq!(combine(&longer, &shared).unwrap(), merged);
    }

    #[test]
    fn conflicting_siblings() {
        let parent = base();
        let left = add_output(&parent, &mut OsRng, &output(Pool::Sapling, 10)).unwrap();
        let right = add_output(&parent, &mut OsRng, &output(Pool::Sapling, 10)).unwrap();
        assert!(matches!(
            combine(&left, &right),
            Err(Error::ConflictingSlotContent(Conflict::Slot {
                pool: Pool::Sapling,
                index: 0,
                ..
            }))
        ));
    }

    #[test]
    fn skeletons_must_match() {
        let mut chain = MemoryChain::new();
        let a = create(&Skeleton::for_tip(0), &chain).unwrap();
        chain.advance(1);
        let b = create(&Skeleton::for_tip(1), &chain).unwrap();
        assert!(matches!(
            combine(&a, &b),
            Err(Error::ConflictingSlotContent(Conflict::Skeleton))
        ));
    }

    #[test]
    fn sealed_bundles_cannot_grow() {
        let pczt = add_output(&base(), &mut OsRng, &output(Pool::Sapling, 10)).unwrap();
        let sealed = seal(&pczt).unwrap();
        let grown = add_output(&pczt, &mut OsRng, &output(Pool::Sapling, 5)).unwrap();
        assert!(matches!(
            combine(&sealed, &grown),
            Err(Error::ConflictingSlotContent(Conflict::SealedSlotCount { .. }))
        ));
        let merged = combine(&pczt, &sealed).unwrap();
        assert_eq!(merged.global().phase(), Phase::Sealed);
        assert_eq!(merged, sealed);
    }

    /// A sealed bundle with spends in both pools and two transparent
    /// inputs, proven and signed twice over by independent runs
    struct Stages {
        chain: MemoryChain,
        wallet: MemoryWallet,
        sealed: Pczt,
        proven: [Pczt; 2],
        signed: [Pczt; 2],
    }

    /// Spends, outputs and transparent inputs in [`Stages::sealed`]
    const SLOTS: usize = 7;

    static STAGES: LazyLock<Stages> = LazyLock::new(|| {
        let mut chain = MemoryChain::new();
        let mut wallet = MemoryWallet::from_seed([3; 64]);
        let sapling = wallet.new_address(Pool::Sapling).unwrap();
        let orchard = wallet.new_address(Pool::Orchard).unwrap();
        let notes = [(sapling, 60_000), (orchard, 40_000)].map(|(recipient, sats)| Note {
            recipient,
            value: Amount::from_sat(sats),
            rseed: Rseed::random(&mut OsRng),
        });
        let positions = chain
            .mine_block(notes.iter().map(|note| (note.recipient.pool(), note.commitment())))
            .unwrap();
        for (note, position) in notes.into_iter().zip(positions) {
            wallet.add_note(note, position).unwrap();
        }
        wallet.sync(&chain);

        let mut pczt = create(&Skeleton::for_tip(chain.tip_height()), &chain).unwrap();
        pczt = add_output(&pczt, &mut OsRng, &output(Pool::Sapling, 50_000)).unwrap();
        pczt = add_output(&pczt, &mut OsRng, &output(Pool::Orchard, 20_000)).unwrap();
        for (vout, sats) in [(0, 15_000), (1, 5_000)] {
            let address = wallet.new_transparent_address().unwrap();
            let prevout = OutPoint {
                txid: Txid([5; 32]),
                vout,
            };
            pczt = add_transparent_input(&pczt, prevout, Amount::from_sat(sats), address)
                .unwrap();
        }
        pczt = add_transparent_output(&pczt, Address([1; 20]), Amount::from_sat(10_000))
            .unwrap();
        // The Sapling note covers the outputs exactly, the Orchard note
        // pays the fee and takes change
        pczt = fund(&pczt, &sapling, &FundingPolicy::default(), &wallet, &chain).unwrap();
        let policy = FundingPolicy {
            fee: Amount::from_sat(1_000),
            change: true,
        };
        pczt = fund(&pczt, &orchard, &policy, &wallet, &chain).unwrap();
        let sealed = seal(&pczt).unwrap();
        let proven = [(); 2].map(|()| prove(&sealed, &LocalParameters).unwrap());
        let signed = proven
            .clone()
            .map(|proven| sign_spends(&proven, &wallet).unwrap().0);
        Stages {
            chain,
            wallet,
            sealed,
            proven,
            signed,
        }
    });

    /// Slot states in a fixed order; transparent inputs count as
    /// authorized once signed
    fn states(pczt: &Pczt) -> Vec<SlotState> {
        let shielded = pczt.shielded.values().flat_map(|bundle| {
            bundle
                .spends
                .iter()
                .map(Slot::state)
                .chain(bundle.outputs.iter().map(Slot::state))
        });
        let transparent = pczt.transparent_inputs.iter().map(|input| {
            if input.is_authorized() {
                SlotState::Authorized
            } else {
                SlotState::Populated
            }
        });
        shielded.chain(transparent).collect()
    }

    fn join(a: &[SlotState], b: &[SlotState]) -> Vec<SlotState> {
        a.iter().zip(b).map(|(a, b)| *a.max(b)).collect()
    }

    /// Copy of the sealed bundle where each slot has progressed by
    /// `level` (0 to 2), holding the work of prover `run`
    fn progressed(progress: &[(u8, usize)]) -> Pczt {
        let stages = &*STAGES;
        let mut res = stages.sealed.clone();
        let mut progress = progress.iter().copied();
        for (pool, bundle) in &mut res.shielded {
            for (index, slot) in bundle.spends.iter_mut().enumerate() {
                let (level, run) = progress.next().unwrap();
                match level {
                    0 => (),
                    1 => *slot = stages.proven[run].shielded[pool].spends[index].clone(),
                    _ => *slot = stages.signed[run].shielded[pool].spends[index].clone(),
                }
            }
            for (index, slot) in bundle.outputs.iter_mut().enumerate() {
                let (level, run) = progress.next().unwrap();
                if level > 0 {
                    *slot = stages.proven[run].shielded[pool].outputs[index].clone();
                }
            }
        }
        for (index, input) in res.transparent_inputs.iter_mut().enumerate() {
            let (level, run) = progress.next().unwrap();
            if level > 0 {
                *input = stages.signed[run].transparent_inputs[index].clone();
            }
        }
        res
    }

    fn progress() -> impl Strategy<Value = Vec<(u8, usize)>> {
        prop::collection::vec((0u8..3, 0usize..2), SLOTS)
    }

    #[derive(Clone, Debug)]
    enum Step {
        Combine(Vec<(u8, usize)>),
        Prove,
        Sign,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            progress().prop_map(Step::Combine),
            Just(Step::Prove),
            Just(Step::Sign),
        ]
    }

    fn assert_codec_identity(pczt: &Pczt) {
        let bytes = pczt.encode();
        let decoded = Pczt::decode(&bytes).unwrap();
        assert_eq!(&decoded, pczt);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn stages_cover_every_slot_kind() {
        let stages = &*STAGES;
        assert_eq!(states(&stages.sealed).len(), SLOTS);
        assert!(
            states(&stages.signed[0])
                .iter()
                .all(|state| *state >= SlotState::Proven)
        );
        assert_ne!(stages.proven[0], stages.proven[1]);
        for pczt in [&stages.sealed, &stages.proven[0], &stages.signed[1]] {
            assert_codec_identity(pczt);
        }
        let finalized =
            finalize(&stages.signed[0], &stages.chain, &LocalParameters).unwrap();
        assert_eq!(finalized.state(), BundleState::Finalized);
        assert_codec_identity(&finalized);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn combine_joins_progressed_copies(
            a in progress(),
            b in progress(),
            c in progress(),
        ) {
            let (a, b, c) = (progressed(&a), progressed(&b), progressed(&c));
            let ab = combine(&a, &b).unwrap();
            prop_assert_eq!(&ab, &combine(&b, &a).unwrap());
            prop_assert_eq!(states(&ab), join(&states(&a), &states(&b)));

            let left = combine(&ab, &c).unwrap();
            let right = combine(&a, &combine(&b, &c).unwrap()).unwrap();
            prop_assert_eq!(&left, &right);
            assert_codec_identity(&left);
            if left.state() == BundleState::Finalizable {
                let stages = &*STAGES;
                prop_assert!(finalize(&left, &stages.chain, &LocalParameters).is_ok());
            }
        }

        #[test]
        fn slots_never_move_backward(
            start in progress(),
            steps in prop::collection::vec(step(), 1..6),
        ) {
            let stages = &*STAGES;
            let mut pczt = progressed(&start);
            for step in steps {
                let next = match step {
                    Step::Combine(progress) => combine(&pczt, &progressed(&progress)).unwrap(),
                    Step::Prove => prove(&pczt, &LocalParameters).unwrap(),
                    Step::Sign => sign_spends(&pczt, &stages.wallet).unwrap().0,
                };
                let (before, after) = (states(&pczt), states(&next));
                prop_assert!(before.iter().zip(&after).all(|(before, after)| before <= after));
                assert_codec_identity(&next);
                pczt = next;
            }
        }
    }
}
