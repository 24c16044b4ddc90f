//! Note commitment tree: an append-only binary Merkle tree of fixed depth
//! over note commitments, with blake3 as the node hash.

use std::sync::LazyLock;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Hash, note::NoteCommitment, serde_hexstr_human_readable};

pub const DEPTH: usize = 32;

fn node_hash(level: u8, left: &Hash, right: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key("pczt 2025 merkle node");
    hasher.update(&[level]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Roots of empty subtrees at each level, `EMPTY_ROOTS[0]` being the
/// empty leaf
static EMPTY_ROOTS: LazyLock<[Hash; DEPTH + 1]> = LazyLock::new(|| {
    let mut roots = [[0u8; 32]; DEPTH + 1];
    roots[0] = blake3::derive_key("pczt 2025 merkle empty leaf", &[]);
    for level in 0..DEPTH {
        roots[level + 1] = node_hash(level as u8, &roots[level], &roots[level]);
    }
    roots
});

#[derive(
    BorshDeserialize,
    BorshSerialize,
    Clone,
    Copy,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Anchor(#[serde(with = "serde_hexstr_human_readable")] pub Hash);

impl Anchor {
    pub fn empty_tree() -> Self {
        Self(EMPTY_ROOTS[DEPTH])
    }
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication path has {0} nodes, expected {DEPTH}")]
    PathLength(usize),
    #[error("position {0} does not fit in a tree of depth {DEPTH}")]
    Position(u64),
    #[error("tree is full")]
    TreeFull,
}

/// Authentication path from a leaf to the root
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MerklePath {
    position: u64,
    auth_path: Vec<NoteCommitment>,
}

impl MerklePath {
    pub fn new(position: u64, auth_path: Vec<Hash>) -> Result<Self, Error> {
        if auth_path.len() != DEPTH {
            return Err(Error::PathLength(auth_path.len()));
        }
        if position >> DEPTH != 0 {
            return Err(Error::Position(position));
        }
        Ok(Self {
            position,
            auth_path: auth_path.into_iter().map(NoteCommitment).collect(),
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn auth_path(&self) -> impl Iterator<Item = &Hash> {
        self.auth_path.iter().map(|node| &node.0)
    }

    /// Root of the tree containing `leaf` at this path's position
    pub fn root(&self, leaf: &NoteCommitment) -> Anchor {
        let root = self.auth_path.iter().enumerate().fold(
            leaf.0,
            |node, (level, sibling)| {
                if (self.position >> level) & 1 == 0 {
                    node_hash(level as u8, &node, &sibling.0)
                } else {
                    node_hash(level as u8, &sibling.0, &node)
                }
            },
        );
        Anchor(root)
    }
}

/// Full in-memory commitment tree. Used by the in-memory chain and
/// wallet; recomputes levels on demand.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CommitmentTree {
    leaves: Vec<NoteCommitment>,
}

impl CommitmentTree {
    pub fn len(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Append a leaf, returning its position
    pub fn append(&mut self, cmu: NoteCommitment) -> Result<u64, Error> {
        let position = self.len();
        if position >> DEPTH != 0 {
            return Err(Error::TreeFull);
        }
        self.leaves.push(cmu);
        Ok(position)
    }

    pub fn leaf(&self, position: u64) -> Option<&NoteCommitment> {
        self.leaves.get(usize::try_from(position).ok()?)
    }

    fn next_level(level: usize, nodes: &[Hash]) -> Vec<Hash> {
        nodes
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(level as u8, left, right),
                [left] => node_hash(level as u8, left, &EMPTY_ROOTS[level]),
                _ => unreachable!("chunks(2) yields one or two nodes"),
            })
            .collect()
    }

    pub fn root(&self) -> Anchor {
        let mut nodes: Vec<Hash> = self.leaves.iter().map(|leaf| leaf.0).collect();
        for level in 0..DEPTH {
            if nodes.is_empty() {
                return Anchor(EMPTY_ROOTS[DEPTH]);
            }
            nodes = Self::next_level(level, &nodes);
        }
        Anchor(nodes[0])
    }

    /// Authentication path for the leaf at `position`, against the current
    /// root
    pub fn witness(&self, position: u64) -> Option<MerklePath> {
        let mut index = usize::try_from(position).ok()?;
        if index >= self.leaves.len() {
            return None;
        }
        let mut nodes: Vec<Hash> = self.leaves.iter().map(|leaf| leaf.0).collect();
        let mut auth_path = Vec::with_capacity(DEPTH);
        for level in 0..DEPTH {
            let sibling = nodes.get(index ^ 1).copied().unwrap_or(EMPTY_ROOTS[level]);
            auth_path.push(NoteCommitment(sibling));
            nodes = Self::next_level(level, &nodes);
            index >>= 1;
        }
        Some(MerklePath {
            position,
            auth_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Anchor, CommitmentTree, DEPTH, MerklePath};
    use crate::types::note::NoteCommitment;

    fn leaf(byte: u8) -> NoteCommitment {
        NoteCommitment([byte; 32])
    }

    #[test]
    fn empty_tree_root() {
        assert_eq!(CommitmentTree::default().root(), Anchor::empty_tree());
    }

    #[test]
    fn witnesses_reproduce_root() {
        let mut tree = CommitmentTree::default();
        for byte in 0..5 {
            tree.append(leaf(byte)).unwrap();
        }
        let root = tree.root();
        for position in 0..5 {
            let path = tree.witness(position).unwrap();
            assert_eq!(path.root(&leaf(position as u8)), root);
            assert_ne!(path.root(&leaf(99)), root);
        }
        assert!(tree.witness(5).is_none());
        tree.append(leaf(5)).unwrap();
        assert_ne!(tree.root(), root);
    }

    #[test]
    fn rejects_short_paths() {
        assert!(MerklePath::new(0, vec![[0; 32]; DEPTH - 1]).is_err());
        assert!(MerklePath::new(1 << DEPTH, vec![[0; 32]; DEPTH]).is_err());
    }
}
