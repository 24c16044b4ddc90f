use bitcoin::Amount;

use super::slot::ContentMismatch;
use crate::{
    authorization::Authorization,
    types::{
        Address, OutPoint,
        transaction::{TransparentInputEffects, TxOut},
    },
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Input {
    pub prevout: OutPoint,
    /// Value of the spent output
    pub value: Amount,
    pub address: Address,
    pub sequence: u32,
    pub authorization: Option<Authorization>,
}

impl Input {
    pub fn new(prevout: OutPoint, value: Amount, address: Address) -> Self {
        Self {
            prevout,
            value,
            address,
            sequence: u32::MAX,
            authorization: None,
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    pub(crate) fn effects(&self) -> TransparentInputEffects {
        TransparentInputEffects {
            prevout: self.prevout,
            value: self.value.to_sat(),
            address: self.address,
            sequence: self.sequence,
        }
    }

    fn authorization_bytes(&self) -> Option<[u8; 96]> {
        self.authorization.as_ref().map(|authorization| {
            let mut bytes = [0u8; 96];
            bytes[..32].copy_from_slice(authorization.verifying_key.as_bytes());
            bytes[32..].copy_from_slice(&authorization.signature.to_bytes());
            bytes
        })
    }

    /// Authorization is the only field that progresses; an unauthorized
    /// input yields to an authorized one
    pub(crate) fn merge(&self, other: &Self) -> Result<Self, ContentMismatch> {
        let same_content = self.prevout == other.prevout
            && self.value == other.value
            && self.address == other.address
            && self.sequence == other.sequence;
        if !same_content {
            return Err(ContentMismatch);
        }
        let winner = match (self.authorization_bytes(), other.authorization_bytes()) {
            (Some(_), None) => self,
            (None, Some(_)) => other,
            (ours, theirs) => {
                if ours <= theirs {
                    self
                } else {
                    other
                }
            }
        };
        Ok(winner.clone())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Output {
    pub value: Amount,
    pub address: Address,
}

impl Output {
    pub(crate) fn effects(&self) -> TxOut {
        TxOut {
            value: self.value.to_sat(),
            address: self.address,
        }
    }
}
