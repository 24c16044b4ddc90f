use bitcoin::{Amount, SignedAmount};
use thiserror::Error;

use crate::{
    bundle::{SlotState, codec},
    types::{
        AmountOverflowError, Anchor, NoteCommitment, Nullifier, OutPoint,
        PaymentAddress, Pool, TxVersion, consensus::TX_EXPIRY_HEIGHT_THRESHOLD,
        note_encryption,
    },
};

/// Broad category of an [`Error`], telling the caller how to recover
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum ErrorClass {
    /// The input is unusable. Discard it and restart from a known-good
    /// bundle.
    Structural,
    /// The operation was attempted out of order
    Policy,
    /// Different funding, keys or parameters are needed
    Resource,
    /// The bundle instance can never become valid
    Cryptographic,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SlotKind {
    Spend,
    Output,
}

#[derive(Debug, Error)]
pub enum SkeletonError {
    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u32),
    #[error("expiry height {expiry_height} is not above the chain tip {tip_height}")]
    ExpiryNotAboveTip { expiry_height: u32, tip_height: u32 },
    #[error(
        "expiry height {0} is at or above the threshold {TX_EXPIRY_HEIGHT_THRESHOLD}"
    )]
    ExpiryTooHigh(u32),
}

#[derive(Debug, Error)]
pub enum Conflict {
    #[error("transaction skeletons differ")]
    Skeleton,
    #[error("{pool} {kind} slot {index} has different content")]
    Slot {
        pool: Pool,
        kind: SlotKind,
        index: usize,
    },
    #[error("{pool} anchors differ")]
    Anchor { pool: Pool },
    #[error("{pool} slot set is sealed with {sealed} {kind} slots, but {other} were given")]
    SealedSlotCount {
        pool: Pool,
        kind: SlotKind,
        sealed: usize,
        other: usize,
    },
    #[error("{pool} nullifier {nullifier} is already spent in this bundle")]
    DuplicateNullifier { pool: Pool, nullifier: Nullifier },
    #[error("{0} is already spent in this bundle")]
    DuplicatePrevout(OutPoint),
    #[error("transparent input {0} has different content")]
    TransparentInput(usize),
    #[error("transparent output {0} has different content")]
    TransparentOutput(usize),
    #[error("transparent {kind} count is sealed at {sealed}, but {other} were given")]
    SealedTransparentCount {
        kind: &'static str,
        sealed: usize,
        other: usize,
    },
}

#[derive(Debug, Error)]
pub enum Incomplete {
    #[error("{pool} {kind} slot {index} is empty")]
    EmptySlot {
        pool: Pool,
        kind: SlotKind,
        index: usize,
    },
    #[error("{pool} bundle has spends but no anchor")]
    MissingAnchor { pool: Pool },
    #[error("bundle has no inputs or outputs")]
    NoSlots,
    #[error("bundle is not finalized")]
    Unfinalized,
    #[error("slot set is not sealed")]
    Unsealed,
    #[error("{pool} {kind} slot {index} is not proven")]
    UnprovenSlot {
        pool: Pool,
        kind: SlotKind,
        index: usize,
    },
    #[error("{pool} spend {index} is not authorized")]
    UnauthorizedSpend { pool: Pool, index: usize },
    #[error("transparent input {0} is not authorized")]
    UnauthorizedTransparentInput(usize),
}

#[derive(Debug, Error)]
pub enum Unauthorized {
    #[error("{identity} cannot prove ownership of note {cmu}")]
    Ownership {
        identity: PaymentAddress,
        cmu: NoteCommitment,
    },
    #[error("key does not authorize {pool} spend {index}")]
    SpendKey { pool: Pool, index: usize },
    #[error("key does not authorize transparent input {index}")]
    TransparentKey {
        index: usize,
        source: crate::authorization::Error,
    },
}

/// What a failed signature was meant to authorize
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureTarget {
    Spend { pool: Pool, index: usize },
    Binding { pool: Pool },
    TransparentInput { index: usize },
}

impl std::fmt::Display for SignatureTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spend { pool, index } => write!(f, "{pool} spend {index}"),
            Self::Binding { pool } => write!(f, "{pool} binding signature"),
            Self::TransparentInput { index } => {
                write!(f, "transparent input {index}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum Imbalance {
    #[error("fee is negative: {0}")]
    NegativeFee(SignedAmount),
    #[error(
        "{pool} value balance {declared} does not equal spends minus outputs ({computed})"
    )]
    ValueBalanceMismatch {
        pool: Pool,
        declared: SignedAmount,
        computed: SignedAmount,
    },
    #[error("{pool} binding key does not match the value commitments")]
    BindingKeyMismatch { pool: Pool },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed skeleton: {0}")]
    MalformedSkeleton(#[from] SkeletonError),
    #[error("malformed encoding: {0}")]
    MalformedEncoding(#[from] codec::Error),
    #[error("conflicting slot content: {0}")]
    ConflictingSlotContent(#[from] Conflict),
    #[error("bundle is finalized")]
    BundleFinalized,
    #[error("incomplete bundle: {0}")]
    IncompleteBundle(#[from] Incomplete),
    #[error("slot set is sealed")]
    NotModifiable,
    #[error("transaction version {tx_version} does not support the {pool} pool")]
    UnsupportedPool { pool: Pool, tx_version: TxVersion },
    #[error("{pool} {kind} slot {index} does not exist")]
    SlotOutOfRange {
        pool: Pool,
        kind: SlotKind,
        index: usize,
    },
    #[error("{pool} {kind} slot {index} is {actual}, expected {expected}")]
    UnexpectedSlotState {
        pool: Pool,
        kind: SlotKind,
        index: usize,
        expected: SlotState,
        actual: SlotState,
    },
    #[error("transparent input {0} does not exist")]
    InputOutOfRange(usize),
    #[error("insufficient funds: {required} required, {available} available")]
    InsufficientFunds { required: Amount, available: Amount },
    #[error("not authorized: {0}")]
    NotAuthorized(#[from] Unauthorized),
    #[error("{pool} {kind} slot {index} has inconsistent private data")]
    InvalidWitness {
        pool: Pool,
        kind: SlotKind,
        index: usize,
    },
    #[error("amount {0} exceeds the maximum money supply")]
    AmountOutOfRange(Amount),
    #[error(transparent)]
    AmountOverflow(#[from] AmountOverflowError),
    #[error("wallet error")]
    Wallet(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("proving parameters unavailable")]
    ProvingParameters(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("note encryption error")]
    NoteEncryption(#[from] note_encryption::Error),
    #[error("{pool} {kind} proof {index} does not verify")]
    ProofVerificationFailed {
        pool: Pool,
        kind: SlotKind,
        index: usize,
    },
    #[error("signature verification failed for {0}")]
    SignatureVerificationFailed(SignatureTarget),
    #[error("unbalanced value: {0}")]
    UnbalancedValue(#[from] Imbalance),
    #[error("{pool} anchor {anchor} is not in the accepted window")]
    StaleAnchor { pool: Pool, anchor: Anchor },
}

impl Error {
    pub fn wallet<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Wallet(Box::new(err))
    }

    pub fn proving_parameters<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ProvingParameters(Box::new(err))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedSkeleton(_)
            | Self::MalformedEncoding(_)
            | Self::ConflictingSlotContent(_) => ErrorClass::Structural,
            Self::BundleFinalized
            | Self::IncompleteBundle(_)
            | Self::NotModifiable
            | Self::UnsupportedPool { .. }
            | Self::SlotOutOfRange { .. }
            | Self::InputOutOfRange(_)
            | Self::UnexpectedSlotState { .. } => ErrorClass::Policy,
            Self::InsufficientFunds { .. }
            | Self::NotAuthorized(_)
            | Self::InvalidWitness { .. }
            | Self::AmountOutOfRange(_)
            | Self::AmountOverflow(_)
            | Self::Wallet(_)
            | Self::ProvingParameters(_)
            | Self::NoteEncryption(_) => ErrorClass::Resource,
            Self::ProofVerificationFailed { .. }
            | Self::SignatureVerificationFailed(_)
            | Self::UnbalancedValue(_)
            | Self::StaleAnchor { .. } => ErrorClass::Cryptographic,
        }
    }
}
