//! Chain state consumed by the roles: the tip height and, per pool, which
//! note commitment tree roots are acceptable anchors.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::IntoEnumIterator as _;
use thiserror::Error;

use crate::types::{
    Anchor, CommitmentTree, MerklePath, NoteCommitment, Nullifier, Pool,
    Transaction, merkle,
};

pub trait ChainOracle {
    fn tip_height(&self) -> u32;

    /// Root of the pool's note commitment tree at the tip
    fn current_anchor(&self, pool: Pool) -> Anchor;

    /// Whether spends proving against `anchor` are still accepted
    fn is_anchor_valid(&self, pool: Pool, anchor: &Anchor) -> bool;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Merkle(#[from] merkle::Error),
    #[error("{pool} nullifier {nullifier} is already spent")]
    DoubleSpend { pool: Pool, nullifier: Nullifier },
    #[error("{pool} anchor {anchor} is not in the accepted window")]
    UnknownAnchor { pool: Pool, anchor: Anchor },
    #[error("{pool} bundle has spends but no anchor")]
    MissingAnchor { pool: Pool },
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct PoolState {
    tree: CommitmentTree,
    /// Roots recorded at each block height still inside the window
    anchors: Vec<(u32, Anchor)>,
    nullifiers: BTreeSet<Nullifier>,
}

/// A chain held in memory, for tests and the command line tool
#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemoryChain {
    height: u32,
    #[serde_as(as = "Vec<(_, _)>")]
    pools: BTreeMap<Pool, PoolState>,
}

impl MemoryChain {
    /// Number of blocks for which a tree root remains a valid anchor
    pub const ANCHOR_WINDOW: u32 = 100;

    pub fn new() -> Self {
        let mut chain = Self {
            height: 0,
            pools: BTreeMap::new(),
        };
        chain.record_anchors();
        chain
    }

    fn pool_mut(&mut self, pool: Pool) -> &mut PoolState {
        self.pools.entry(pool).or_default()
    }

    fn record_anchors(&mut self) {
        let height = self.height;
        for pool in Pool::iter() {
            let state = self.pool_mut(pool);
            let root = state.tree.root();
            state.anchors.push((height, root));
            state
                .anchors
                .retain(|(recorded, _)| recorded + Self::ANCHOR_WINDOW > height);
        }
    }

    /// Append commitments and mine a block containing them, returning
    /// the position of each commitment in its pool's tree
    pub fn mine_block<I>(&mut self, commitments: I) -> Result<Vec<u64>, Error>
    where
        I: IntoIterator<Item = (Pool, NoteCommitment)>,
    {
        let mut staged = self.pools.clone();
        let positions = commitments
            .into_iter()
            .map(|(pool, cmu)| staged.entry(pool).or_default().tree.append(cmu))
            .collect::<Result<Vec<_>, _>>()?;
        self.pools = staged;
        self.height += 1;
        self.record_anchors();
        tracing::debug!(height = self.height, "mined block");
        Ok(positions)
    }

    /// Mine `blocks` empty blocks
    pub fn advance(&mut self, blocks: u32) {
        for _ in 0..blocks {
            self.height += 1;
            self.record_anchors();
        }
    }

    /// Accept a transaction into a new block. Returns, for each shielded
    /// output in transaction order, its pool and tree position.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
    ) -> Result<Vec<(Pool, u64)>, Error> {
        let mut commitments = Vec::new();
        let mut spent = Vec::new();
        for bundle in &tx.shielded {
            if !bundle.spends.is_empty() {
                let anchor = bundle
                    .anchor
                    .map(Anchor)
                    .ok_or(Error::MissingAnchor { pool: bundle.pool })?;
                if !self.is_anchor_valid(bundle.pool, &anchor) {
                    return Err(Error::UnknownAnchor {
                        pool: bundle.pool,
                        anchor,
                    });
                }
            }
            for spend in &bundle.spends {
                let nullifier = Nullifier(spend.nullifier);
                let already_spent = self
                    .pools
                    .get(&bundle.pool)
                    .is_some_and(|state| state.nullifiers.contains(&nullifier))
                    || spent.contains(&(bundle.pool, nullifier));
                if already_spent {
                    return Err(Error::DoubleSpend {
                        pool: bundle.pool,
                        nullifier,
                    });
                }
                spent.push((bundle.pool, nullifier));
            }
            commitments.extend(
                bundle
                    .outputs
                    .iter()
                    .map(|output| (bundle.pool, NoteCommitment(output.cmu))),
            );
        }
        let pools: Vec<Pool> = commitments.iter().map(|(pool, _)| *pool).collect();
        let positions = self.mine_block(commitments)?;
        for (pool, nullifier) in spent {
            self.pool_mut(pool).nullifiers.insert(nullifier);
        }
        tracing::debug!(txid = %tx.txid(), height = self.height, "applied transaction");
        Ok(pools.into_iter().zip(positions).collect())
    }

    pub fn is_spent(&self, pool: Pool, nullifier: &Nullifier) -> bool {
        self.pools
            .get(&pool)
            .is_some_and(|state| state.nullifiers.contains(nullifier))
    }

    pub fn commitment(&self, pool: Pool, position: u64) -> Option<NoteCommitment> {
        self.pools.get(&pool)?.tree.leaf(position).copied()
    }

    /// Authentication path against the current anchor
    pub fn witness(&self, pool: Pool, position: u64) -> Option<MerklePath> {
        self.pools.get(&pool)?.tree.witness(position)
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainOracle for MemoryChain {
    fn tip_height(&self) -> u32 {
        self.height
    }

    fn current_anchor(&self, pool: Pool) -> Anchor {
        self.pools
            .get(&pool)
            .map_or_else(Anchor::empty_tree, |state| state.tree.root())
    }

    fn is_anchor_valid(&self, pool: Pool, anchor: &Anchor) -> bool {
        let Some(state) = self.pools.get(&pool) else {
            return *anchor == Anchor::empty_tree();
        };
        state.anchors.iter().any(|(height, recorded)| {
            recorded == anchor && height + Self::ANCHOR_WINDOW > self.height
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainOracle, MemoryChain};
    use crate::types::{Anchor, NoteCommitment, Pool};

    #[test]
    fn anchors_expire_after_window() {
        let mut chain = MemoryChain::new();
        assert_eq!(chain.current_anchor(Pool::Sapling), Anchor::empty_tree());
        let positions = chain
            .mine_block([
                (Pool::Sapling, NoteCommitment([1; 32])),
                (Pool::Sapling, NoteCommitment([2; 32])),
                (Pool::Orchard, NoteCommitment([3; 32])),
            ])
            .unwrap();
        assert_eq!(positions, vec![0, 1, 0]);
        let anchor = chain.current_anchor(Pool::Sapling);
        assert_ne!(anchor, Anchor::empty_tree());
        assert!(chain.is_anchor_valid(Pool::Sapling, &anchor));
        assert!(!chain.is_anchor_valid(Pool::Orchard, &anchor));

        chain.mine_block([(Pool::Sapling, NoteCommitment([4; 32]))]).unwrap();
        assert!(chain.is_anchor_valid(Pool::Sapling, &anchor));
        chain.advance(MemoryChain::ANCHOR_WINDOW - 2);
        assert!(chain.is_anchor_valid(Pool::Sapling, &anchor));
        chain.advance(1);
        assert!(!chain.is_anchor_valid(Pool::Sapling, &anchor));
        // the current root is always valid
        let current = chain.current_anchor(Pool::Sapling);
        assert!(chain.is_anchor_valid(Pool::Sapling, &current));
    }

    #[test]
    fn witnesses_match_current_anchor() {
        let mut chain = MemoryChain::new();
        chain
            .mine_block((0..3).map(|byte| (Pool::Orchard, NoteCommitment([byte; 32]))))
            .unwrap();
        let witness = chain.witness(Pool::Orchard, 2).unwrap();
        let leaf = chain.commitment(Pool::Orchard, 2).unwrap();
        assert_eq!(witness.root(&leaf), chain.current_anchor(Pool::Orchard));
    }

    #[test]
    fn serde_json_round_trip() {
        let mut chain = MemoryChain::new();
        chain.mine_block([(Pool::Sapling, NoteCommitment([9; 32]))]).unwrap();
        let json = serde_json::to_string(&chain).unwrap();
        let restored: MemoryChain = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tip_height(), 1);
        assert_eq!(
            restored.current_anchor(Pool::Sapling),
            chain.current_anchor(Pool::Sapling)
        );
    }
}
