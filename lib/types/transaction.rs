use bitcoin::{Amount, SignedAmount};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use super::{
    Address, AmountOverflowError, Pool, Txid, consensus::MAX_MONEY,
    hashes::Sighash, hash, merkle::Anchor,
};
use crate::authorization::Authorization;

pub const SIGHASH_CONTEXT: &str = "pczt 2025 transaction sighash v1";

#[derive(
    BorshDeserialize,
    BorshSerialize,
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
)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    /// Value of the spent output, in zatoshis
    pub value: u64,
    pub address: Address,
    pub sequence: u32,
    pub authorization: Authorization,
}

#[derive(
    BorshDeserialize, BorshSerialize, Clone, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct TxOut {
    pub value: u64,
    pub address: Address,
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct SpendDescription {
    pub cv: [u8; 32],
    pub nullifier: [u8; 32],
    pub rk: [u8; 32],
    pub zkproof: [u8; 96],
    pub spend_auth_sig: [u8; 64],
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct OutputDescription {
    pub cv: [u8; 32],
    pub cmu: [u8; 32],
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: Vec<u8>,
    pub out_ciphertext: Vec<u8>,
    pub zkproof: [u8; 96],
}

#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct ShieldedBundle {
    pub pool: Pool,
    pub spends: Vec<SpendDescription>,
    pub outputs: Vec<OutputDescription>,
    pub value_balance: i64,
    pub anchor: Option<[u8; 32]>,
    pub binding_sig: [u8; 64],
}

/// Network transaction, as emitted by the transaction extractor
#[derive(BorshDeserialize, BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: u32,
    pub version_group_id: u32,
    pub consensus_branch_id: u32,
    pub lock_time: u32,
    pub expiry_height: u32,
    pub transparent_inputs: Vec<TxIn>,
    pub transparent_outputs: Vec<TxOut>,
    pub shielded: Vec<ShieldedBundle>,
}

impl Transaction {
    pub fn txid(&self) -> Txid {
        hash(self).into()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("failed to serialize transaction with borsh")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(bytes)
    }

    pub fn effects(&self) -> Effects {
        Effects {
            header: Header {
                version: self.version,
                version_group_id: self.version_group_id,
                consensus_branch_id: self.consensus_branch_id,
                lock_time: self.lock_time,
                expiry_height: self.expiry_height,
            },
            transparent_inputs: self
                .transparent_inputs
                .iter()
                .map(|txin| TransparentInputEffects {
                    prevout: txin.prevout,
                    value: txin.value,
                    address: txin.address,
                    sequence: txin.sequence,
                })
                .collect(),
            transparent_outputs: self.transparent_outputs.clone(),
            shielded: self
                .shielded
                .iter()
                .map(|bundle| ShieldedEffects {
                    pool: bundle.pool,
                    spends: bundle
                        .spends
                        .iter()
                        .map(|spend| SpendEffects {
                            cv: spend.cv,
                            nullifier: spend.nullifier,
                            rk: spend.rk,
                        })
                        .collect(),
                    outputs: bundle
                        .outputs
                        .iter()
                        .map(|output| OutputEffects {
                            cv: output.cv,
                            cmu: output.cmu,
                            ephemeral_key: output.ephemeral_key,
                            enc_ciphertext: output.enc_ciphertext.clone(),
                            out_ciphertext: output.out_ciphertext.clone(),
                        })
                        .collect(),
                    value_balance: bundle.value_balance,
                    anchor: bundle.anchor.map(Anchor),
                })
                .collect(),
        }
    }

    pub fn sighash(&self) -> Sighash {
        self.effects().sighash()
    }

    /// Transparent inputs plus net shielded inflow, minus transparent
    /// outputs
    pub fn fee(&self) -> Result<SignedAmount, AmountOverflowError> {
        let transparent_in = checked_sum_sats(self.transparent_inputs.iter().map(|txin| txin.value))?;
        let transparent_out =
            checked_sum_sats(self.transparent_outputs.iter().map(|txout| txout.value))?;
        let shielded = self
            .shielded
            .iter()
            .try_fold(0i64, |acc, bundle| acc.checked_add(bundle.value_balance))
            .ok_or(AmountOverflowError)?;
        let fee = transparent_in
            .to_sat()
            .checked_sub(transparent_out.to_sat())
            .and_then(|fee| fee.checked_add(shielded))
            .ok_or(AmountOverflowError)?;
        Ok(SignedAmount::from_sat(fee))
    }
}

fn checked_sum_sats<I>(values: I) -> Result<SignedAmount, AmountOverflowError>
where
    I: IntoIterator<Item = u64>,
{
    let total = values.into_iter().try_fold(Amount::ZERO, |acc, value| {
        acc.checked_add(Amount::from_sat(value))
    });
    match total {
        Some(total) if total <= MAX_MONEY => total.to_signed().map_err(|_| AmountOverflowError),
        _ => Err(AmountOverflowError),
    }
}

#[derive(BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub version: u32,
    pub version_group_id: u32,
    pub consensus_branch_id: u32,
    pub lock_time: u32,
    pub expiry_height: u32,
}

#[derive(BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct TransparentInputEffects {
    pub prevout: OutPoint,
    pub value: u64,
    pub address: Address,
    pub sequence: u32,
}

#[derive(BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct SpendEffects {
    pub cv: [u8; 32],
    pub nullifier: [u8; 32],
    pub rk: [u8; 32],
}

#[derive(BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct OutputEffects {
    pub cv: [u8; 32],
    pub cmu: [u8; 32],
    pub ephemeral_key: [u8; 32],
    pub enc_ciphertext: Vec<u8>,
    pub out_ciphertext: Vec<u8>,
}

#[derive(BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct ShieldedEffects {
    pub pool: Pool,
    pub spends: Vec<SpendEffects>,
    pub outputs: Vec<OutputEffects>,
    pub value_balance: i64,
    pub anchor: Option<Anchor>,
}

/// Everything a transaction does, without the proofs and signatures that
/// authorize it. Both a finished [`Transaction`] and a PCZT whose slot set
/// is fixed produce the same effects, and so the same sighash.
#[derive(BorshSerialize, Clone, Debug, Eq, PartialEq)]
pub struct Effects {
    pub header: Header,
    pub transparent_inputs: Vec<TransparentInputEffects>,
    pub transparent_outputs: Vec<TxOut>,
    pub shielded: Vec<ShieldedEffects>,
}

impl Effects {
    pub fn sighash(&self) -> Sighash {
        let serialized =
            borsh::to_vec(self).expect("failed to serialize effects with borsh");
        Sighash(blake3::derive_key(SIGHASH_CONTEXT, &serialized))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::SignedAmount;

    use super::{ShieldedBundle, Transaction, TxOut};
    use crate::types::{Address, Pool};

    fn transaction() -> Transaction {
        Transaction {
            version: 5,
            version_group_id: 0x26A7_270A,
            consensus_branch_id: 0xC2D6_D0B4,
            lock_time: 0,
            expiry_height: 120,
            transparent_inputs: Vec::new(),
            transparent_outputs: vec![TxOut {
                value: 40,
                address: Address([1; 20]),
            }],
            shielded: vec![ShieldedBundle {
                pool: Pool::Sapling,
                spends: Vec::new(),
                outputs: Vec::new(),
                value_balance: 50,
                anchor: None,
                binding_sig: [0; 64],
            }],
        }
    }

    #[test]
    fn fee_and_sighash() {
        let tx = transaction();
        assert_eq!(tx.fee().unwrap(), SignedAmount::from_sat(10));
        let mut signed = tx.clone();
        signed.shielded[0].binding_sig = [9; 64];
        assert_eq!(tx.sighash(), signed.sighash());
        assert_ne!(tx.txid(), signed.txid());
        let mut changed = tx.clone();
        changed.expiry_height += 1;
        assert_ne!(tx.sighash(), changed.sighash());
        assert_eq!(Transaction::from_bytes(&tx.to_bytes()).unwrap(), tx);
    }
}
