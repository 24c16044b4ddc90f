//! Slot lifecycle.

use std::{cmp::Ordering, convert::Infallible};

use serde::{Deserialize, Serialize};

use crate::{
    proof::Proof,
    types::{Signature, SpendAuth},
};

/// How far a slot has progressed. Slots only move forward.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SlotState {
    Empty,
    Populated,
    Proven,
    Authorized,
}

/// Authorization attached to a proven slot
pub trait SlotSignature: Clone + Eq {
    fn to_bytes(&self) -> [u8; 64];
}

impl SlotSignature for Signature<SpendAuth> {
    fn to_bytes(&self) -> [u8; 64] {
        Signature::to_bytes(self)
    }
}

/// Output slots are never authorized
impl SlotSignature for Infallible {
    fn to_bytes(&self) -> [u8; 64] {
        match *self {}
    }
}

/// A spend or output position, tagged by lifecycle stage. A signature
/// can only be present alongside a proof, and a proof only alongside
/// content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Slot<T, S> {
    Empty,
    Populated(T),
    Proven {
        content: T,
        proof: Proof,
    },
    Authorized {
        content: T,
        proof: Proof,
        signature: S,
    },
}

impl<T, S> Slot<T, S> {
    pub fn state(&self) -> SlotState {
        match self {
            Self::Empty => SlotState::Empty,
            Self::Populated(_) => SlotState::Populated,
            Self::Proven { .. } => SlotState::Proven,
            Self::Authorized { .. } => SlotState::Authorized,
        }
    }

    pub fn content(&self) -> Option<&T> {
        match self {
            Self::Empty => None,
            Self::Populated(content)
            | Self::Proven { content, .. }
            | Self::Authorized { content, .. } => Some(content),
        }
    }

    pub fn proof(&self) -> Option<&Proof> {
        match self {
            Self::Empty | Self::Populated(_) => None,
            Self::Proven { proof, .. } | Self::Authorized { proof, .. } => {
                Some(proof)
            }
        }
    }

    pub fn signature(&self) -> Option<&S> {
        match self {
            Self::Authorized { signature, .. } => Some(signature),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl<T, S> Default for Slot<T, S> {
    fn default() -> Self {
        Self::Empty
    }
}

/// Why two slots at the same index cannot be merged
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct ContentMismatch;

impl<T, S> Slot<T, S>
where
    T: Clone + Eq,
    S: SlotSignature,
{
    fn tiebreak_key(&self) -> Option<([u8; 96], Option<[u8; 64]>)> {
        self.proof().map(|proof| {
            (
                proof.to_bytes(),
                self.signature().map(SlotSignature::to_bytes),
            )
        })
    }

    /// Merge two copies of one slot. Empty yields to anything, content
    /// must agree, the more advanced copy wins, and equally advanced
    /// copies resolve to the smaller proof and signature encoding.
    pub(crate) fn merge(&self, other: &Self) -> Result<Self, ContentMismatch> {
        match (self.content(), other.content()) {
            (None, _) => return Ok(other.clone()),
            (_, None) => return Ok(self.clone()),
            (Some(ours), Some(theirs)) if ours != theirs => {
                return Err(ContentMismatch);
            }
            (Some(_), Some(_)) => (),
        }
        let winner = match self.state().cmp(&other.state()) {
            Ordering::Greater => self,
            Ordering::Less => other,
            Ordering::Equal => {
                if self.tiebreak_key() <= other.tiebreak_key() {
                    self
                } else {
                    other
                }
            }
        };
        Ok(winner.clone())
    }
}

/// Spend slots end `Authorized`
pub type SpendSlot = Slot<super::shielded::Spend, Signature<SpendAuth>>;

/// Output slots end `Proven`
pub type OutputSlot = Slot<super::shielded::Output, Infallible>;

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::{ContentMismatch, Slot, SlotState};
    use crate::{proof::Proof, types::Signature};

    type TestSlot = Slot<u8, Signature<crate::types::SpendAuth>>;

    fn proof(byte: u8) -> Proof {
        Proof::from_bytes([byte; 96])
    }

    #[test]
    fn states_are_ordered() {
        assert!(SlotState::Empty < SlotState::Populated);
        assert!(SlotState::Populated < SlotState::Proven);
        assert!(SlotState::Proven < SlotState::Authorized);
        assert_eq!(SlotState::Proven.to_string(), "proven");
    }

    #[test]
    fn merge_takes_the_advanced_slot() {
        let populated = TestSlot::Populated(1);
        let proven = TestSlot::Proven {
            content: 1,
            proof: proof(9),
        };
        let authorized = TestSlot::Authorized {
            content: 1,
            proof: proof(9),
            signature: Signature::from([4; 64]),
        };
        assert_eq!(TestSlot::Empty.merge(&populated), Ok(populated.clone()));
        assert_eq!(proven.merge(&populated), Ok(proven.clone()));
        assert_eq!(populated.merge(&authorized), Ok(authorized.clone()));
        assert_eq!(
            populated.merge(&TestSlot::Populated(2)),
            Err(ContentMismatch)
        );
    }

    #[test]
    fn equal_states_resolve_to_smaller_proof() {
        let low = Slot::<u8, Infallible>::Proven {
            content: 1,
            proof: proof(1),
        };
        let high = Slot::<u8, Infallible>::Proven {
            content: 1,
            proof: proof(2),
        };
        assert_eq!(low.merge(&high), Ok(low.clone()));
        assert_eq!(high.merge(&low), Ok(low.clone()));
    }
}
