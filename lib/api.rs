//! Boundary operations over encoded bundles, for transports that hand
//! bundles around as bytes (RPC servers, command line tools).

use bitcoin::{Amount, SignedAmount};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bundle::{BundleState, Pczt, Phase, SlotState, shielded, transparent},
    chain::ChainOracle,
    proof::ProvingParameters,
    roles::{self, FundingPolicy, NewOutput, Skeleton},
    types::{
        Address, AddressParseError, Anchor, NoteCommitment, Nullifier, OutPoint,
        PaymentAddress, Pool, Transaction, note::MemoError,
    },
    wallet::{NoteInventory, SpendAuthority},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Pczt(#[from] crate::Error),
    #[error("`{destination}` is neither a shielded nor a transparent address")]
    Destination {
        destination: String,
        #[source]
        source: AddressParseError,
    },
    #[error("memo can only be attached to a shielded output")]
    TransparentMemo,
    #[error(transparent)]
    Memo(#[from] MemoError),
    #[error("no bundles to combine")]
    NothingToCombine,
}

/// Where an output pays to
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Destination {
    Shielded(PaymentAddress),
    Transparent(Address),
}

impl std::str::FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(address) = s.parse() {
            return Ok(Self::Shielded(address));
        }
        s.parse()
            .map(Self::Transparent)
            .map_err(|source| Error::Destination {
                destination: s.to_owned(),
                source,
            })
    }
}

/// Create an encoded empty bundle
pub fn createpczt<C>(skeleton: &Skeleton, chain: &C) -> Result<Vec<u8>, Error>
where
    C: ChainOracle,
{
    Ok(roles::create(skeleton, chain)?.encode())
}

/// Append an output paying `value` to `destination`, which may be a
/// shielded or a transparent address. A memo is only accepted for
/// shielded destinations.
pub fn pczt_addoutput(
    pczt: &[u8],
    destination: &str,
    value: Amount,
    memo: Option<&str>,
) -> Result<Vec<u8>, Error> {
    let pczt = Pczt::decode(pczt)?;
    let res = match destination.parse::<Destination>()? {
        Destination::Shielded(recipient) => {
            let mut output = NewOutput::new(recipient, value);
            if let Some(memo) = memo {
                output.memo = memo.parse()?;
            }
            roles::add_output(&pczt, &mut OsRng, &output)?
        }
        Destination::Transparent(address) => {
            if memo.is_some() {
                return Err(Error::TransparentMemo);
            }
            roles::add_transparent_output(&pczt, address, value)?
        }
    };
    Ok(res.encode())
}

/// Fund with the standard policy: the default fee, with change
pub fn pczt_fund<W, C>(
    pczt: &[u8],
    identity: &PaymentAddress,
    wallet: &W,
    chain: &C,
) -> Result<Vec<u8>, Error>
where
    W: NoteInventory,
    C: ChainOracle,
{
    pczt_fund_with(pczt, identity, &FundingPolicy::standard(), wallet, chain)
}

pub fn pczt_fund_with<W, C>(
    pczt: &[u8],
    identity: &PaymentAddress,
    policy: &FundingPolicy,
    wallet: &W,
    chain: &C,
) -> Result<Vec<u8>, Error>
where
    W: NoteInventory,
    C: ChainOracle,
{
    let pczt = Pczt::decode(pczt)?;
    Ok(roles::fund(&pczt, identity, policy, wallet, chain)?.encode())
}

/// Merge any number of copies of one bundle
pub fn combinepczt<B>(pczts: &[B]) -> Result<Vec<u8>, Error>
where
    B: AsRef<[u8]>,
{
    let (first, rest) = pczts.split_first().ok_or(Error::NothingToCombine)?;
    let mut res = Pczt::decode(first.as_ref())?;
    for pczt in rest {
        res = roles::combine(&res, &Pczt::decode(pczt.as_ref())?)?;
    }
    Ok(res.encode())
}

/// Complete every role the caller can perform, then finalize and extract.
/// Returns the hex encoded transaction.
pub fn finalizepczt<W, C, P>(
    pczt: &[u8],
    wallet: &W,
    chain: &C,
    params: &P,
) -> Result<String, Error>
where
    W: SpendAuthority,
    C: ChainOracle,
    P: ProvingParameters,
{
    let tx = finalize_transaction(&Pczt::decode(pczt)?, wallet, chain, params)?;
    Ok(hex::encode(tx.to_bytes()))
}

/// [`finalizepczt`], without the encoding
pub fn finalize_transaction<W, C, P>(
    pczt: &Pczt,
    wallet: &W,
    chain: &C,
    params: &P,
) -> Result<Transaction, crate::Error>
where
    W: SpendAuthority,
    C: ChainOracle,
    P: ProvingParameters,
{
    let sealed = match pczt.global().phase() {
        Phase::Open => roles::seal(pczt)?,
        Phase::Sealed | Phase::Finalized => pczt.clone(),
    };
    let proven = roles::prove(&sealed, params)?;
    let (signed, signatures) = roles::sign_spends(&proven, wallet)?;
    tracing::debug!(signatures, "signed with wallet keys");
    let finalized = roles::finalize(&signed, chain, params)?;
    roles::extract(&finalized)
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedSpend {
    pub state: SlotState,
    #[serde(with = "bitcoin::amount::serde::as_sat::opt")]
    pub value: Option<Amount>,
    pub recipient: Option<PaymentAddress>,
    pub nullifier: Option<Nullifier>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedOutput {
    pub state: SlotState,
    #[serde(with = "bitcoin::amount::serde::as_sat::opt")]
    pub value: Option<Amount>,
    pub recipient: Option<PaymentAddress>,
    pub cmu: Option<NoteCommitment>,
    pub memo: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedShieldedBundle {
    pub pool: Pool,
    pub anchor: Option<Anchor>,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value_balance: SignedAmount,
    pub spends: Vec<DecodedSpend>,
    pub outputs: Vec<DecodedOutput>,
    pub bound: bool,
}

impl From<&shielded::Bundle> for DecodedShieldedBundle {
    fn from(bundle: &shielded::Bundle) -> Self {
        let spends = bundle
            .spends()
            .iter()
            .map(|slot| {
                let content = slot.content();
                DecodedSpend {
                    state: slot.state(),
                    value: content.map(shielded::Spend::value),
                    recipient: content.map(|spend| spend.note.recipient),
                    nullifier: content.map(|spend| spend.nullifier),
                }
            })
            .collect();
        let outputs = bundle
            .outputs()
            .iter()
            .map(|slot| {
                let content = slot.content();
                DecodedOutput {
                    state: slot.state(),
                    value: content.map(shielded::Output::value),
                    recipient: content.map(|output| output.note.recipient),
                    cmu: content.map(|output| output.cmu),
                    memo: content
                        .and_then(|output| output.memo.to_text())
                        .filter(|text| !text.is_empty())
                        .map(str::to_owned),
                }
            })
            .collect();
        Self {
            pool: bundle.pool(),
            anchor: bundle.anchor().copied(),
            value_balance: bundle.value_balance(),
            spends,
            outputs,
            bound: bundle.binding_sig().is_some(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedTransparentInput {
    pub prevout: OutPoint,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    pub address: Address,
    pub authorized: bool,
}

impl From<&transparent::Input> for DecodedTransparentInput {
    fn from(input: &transparent::Input) -> Self {
        Self {
            prevout: input.prevout,
            value: input.value,
            address: input.address,
            authorized: input.is_authorized(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedTransparentOutput {
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    pub address: Address,
}

/// Human readable view of a bundle
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DecodedPczt {
    pub tx_version: u32,
    pub version_group_id: u32,
    pub consensus_branch_id: u32,
    pub lock_time: u32,
    pub expiry_height: u32,
    pub phase: Phase,
    pub state: BundleState,
    /// Why the bundle cannot be finalized yet
    pub incomplete: Option<String>,
    /// `None` if the declared value balances overflow
    #[serde(with = "bitcoin::amount::serde::as_sat::opt")]
    pub fee: Option<SignedAmount>,
    /// Defined once no slot is empty
    pub sighash: Option<String>,
    pub transparent_inputs: Vec<DecodedTransparentInput>,
    pub transparent_outputs: Vec<DecodedTransparentOutput>,
    pub shielded: Vec<DecodedShieldedBundle>,
}

impl From<&Pczt> for DecodedPczt {
    fn from(pczt: &Pczt) -> Self {
        let global = pczt.global();
        Self {
            tx_version: global.tx_version.to_u32(),
            version_group_id: global.version_group_id,
            consensus_branch_id: global.consensus_branch_id,
            lock_time: global.lock_time,
            expiry_height: global.expiry_height,
            phase: global.phase(),
            state: pczt.state(),
            incomplete: pczt.incomplete().map(|incomplete| incomplete.to_string()),
            fee: pczt.fee().ok(),
            sighash: pczt.sighash().ok().map(|sighash| sighash.to_string()),
            transparent_inputs: pczt
                .transparent_inputs()
                .iter()
                .map(DecodedTransparentInput::from)
                .collect(),
            transparent_outputs: pczt
                .transparent_outputs()
                .iter()
                .map(|output| DecodedTransparentOutput {
                    value: output.value,
                    address: output.address,
                })
                .collect(),
            shielded: pczt
                .shielded_bundles()
                .filter(|bundle| !bundle.is_empty())
                .map(DecodedShieldedBundle::from)
                .collect(),
        }
    }
}

pub fn decodepczt(pczt: &[u8]) -> Result<DecodedPczt, Error> {
    Ok(DecodedPczt::from(&Pczt::decode(pczt)?))
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, SignedAmount};
    use rand::rngs::OsRng;

    use super::{
        Destination, Error, combinepczt, createpczt, decodepczt, pczt_addoutput,
    };
    use crate::{
        bundle::{BundleState, SlotState},
        chain::MemoryChain,
        roles::{Skeleton, create},
        types::{Address, Pool, SpendingKey},
    };

    #[test]
    fn destinations() {
        let shielded = SpendingKey::random(&mut OsRng)
            .full_viewing_key()
            .address(Pool::Orchard, 1);
        assert_eq!(
            shielded.to_string().parse::<Destination>().unwrap(),
            Destination::Shielded(shielded)
        );
        let transparent = Address([4; 20]);
        assert_eq!(
            transparent.to_string().parse::<Destination>().unwrap(),
            Destination::Transparent(transparent)
        );
        assert!(matches!(
            "not an address".parse::<Destination>(),
            Err(Error::Destination { .. })
        ));
    }

    #[test]
    fn add_outputs_and_decode() {
        let chain = MemoryChain::new();
        let recipient = SpendingKey::random(&mut OsRng)
            .full_viewing_key()
            .address(Pool::Sapling, 0);
        let pczt = createpczt(&Skeleton::for_tip(0), &chain).unwrap();
        let pczt = pczt_addoutput(
            &pczt,
            &recipient.to_string(),
            Amount::from_sat(1_500),
            Some("thanks"),
        )
        .unwrap();
        let transparent = Address([6; 20]).to_string();
        assert!(matches!(
            pczt_addoutput(&pczt, &transparent, Amount::from_sat(1), Some("memo")),
            Err(Error::TransparentMemo)
        ));
        let pczt =
            pczt_addoutput(&pczt, &transparent, Amount::from_sat(250), None).unwrap();

        let decoded = decodepczt(&pczt).unwrap();
        assert_eq!(decoded.state, BundleState::Draft);
        assert_eq!(decoded.fee, Some(SignedAmount::from_sat(-1_750)));
        assert_eq!(decoded.transparent_outputs.len(), 1);
        assert_eq!(decoded.shielded.len(), 1);
        let output = &decoded.shielded[0].outputs[0];
        assert_eq!(output.state, SlotState::Populated);
        assert_eq!(output.recipient, Some(recipient));
        assert_eq!(output.memo.as_deref(), Some("thanks"));
        assert!(decoded.sighash.is_some());

        let json = serde_json::to_string(&decoded).unwrap();
        assert_eq!(serde_json::from_str::<super::DecodedPczt>(&json).unwrap(), decoded);

        assert_eq!(combinepczt(&[&pczt, &pczt]).unwrap(), pczt);
        assert!(matches!(
            combinepczt::<Vec<u8>>(&[]),
            Err(Error::NothingToCombine)
        ));
    }

    #[test]
    fn decodes_bundle_whose_fee_overflows() {
        let mut pczt = create(&Skeleton::for_tip(0), &MemoryChain::new()).unwrap();
        for pool in [Pool::Sapling, Pool::Orchard] {
            pczt.shielded_mut(pool).unwrap().value_balance = SignedAmount::MAX;
        }
        let decoded = decodepczt(&pczt.encode()).unwrap();
        assert_eq!(decoded.fee, None);
        assert!(decoded.sighash.is_some());
        assert!(decoded.shielded.is_empty());
    }
}
