//! Byte encoding of a [`Pczt`].
//!
//! `PCZT` magic, little-endian `u32` format version, then the protobuf
//! message `pczt.v1.PartiallyCreatedTransaction`. Fields unknown to this
//! version are skipped on decode. Encoding is canonical: decoding and
//! re-encoding reproduces the input bytes.

use std::collections::BTreeMap;

use bitcoin::{Amount, SignedAmount};
use curve25519_dalek::scalar::Scalar;
use prost::{Message as _, Name};
use thiserror::Error;

use super::{
    Global, Pczt, Phase,
    shielded::{self, Output, Spend},
    slot::{OutputSlot, Slot, SpendSlot},
    transparent,
};
use crate::{
    authorization::{self, Authorization},
    error::SlotKind,
    proof::{PROOF_SIZE, Proof},
    types::{
        Address, Anchor, KeyDerivation, Memo, MerklePath, Note,
        NoteCommitment, Nullifier, NullifierDerivingKey, OutPoint,
        PaymentAddress, Pool, Rseed, Signature, SpendValidatingKey, Txid,
        TxVersion, ValueCommitTrapdoor, ValueCommitment, consensus::MAX_MONEY,
        decode_scalar, note::MEMO_SIZE,
    },
};

pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/pczt.v1.rs"));
}

pub const MAGIC: [u8; 4] = *b"PCZT";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad magic bytes `{}`", hex::encode(.0))]
    BadMagic([u8; 4]),
    #[error("protobuf decode error")]
    Protobuf(#[from] prost::DecodeError),
    #[error("duplicate or out of order {0} bundle")]
    PoolOrder(Pool),
    #[error("{pool} {kind} slot {index}: {reason}")]
    SlotState {
        pool: Pool,
        kind: SlotKind,
        index: usize,
        reason: &'static str,
    },
    #[error("input is {0} bytes, shorter than the envelope header")]
    Truncated(usize),
    #[error("unsupported format version {0}")]
    UnsupportedFormatVersion(u32),
    #[error(
        "Invalid enum variant in field `{field_name}` of message `{message_name}`: `{variant_name}`"
    )]
    InvalidEnumVariant {
        field_name: String,
        message_name: String,
        variant_name: String,
    },
    #[error(
        "Invalid field value in field `{field_name}` of message `{message_name}`: `{value}`"
    )]
    InvalidFieldValue {
        field_name: String,
        message_name: String,
        value: String,
    },
    #[error(
        "Invalid value in repeated field `{field_name}` of message `{message_name}`: `{value}`"
    )]
    InvalidRepeatedValue {
        field_name: String,
        message_name: String,
        value: String,
    },
    #[error("Missing field in message `{message_name}`: `{field_name}`")]
    MissingField {
        field_name: String,
        message_name: String,
    },
    #[error(
        "Unknown enum tag in field `{field_name}` of message `{message_name}`: `{tag}`"
    )]
    UnknownEnumTag {
        field_name: String,
        message_name: String,
        tag: i32,
    },
}

impl Error {
    pub fn invalid_enum_variant<Message>(
        field_name: &str,
        variant_name: &str,
    ) -> Self
    where
        Message: Name,
    {
        Self::InvalidEnumVariant {
            field_name: field_name.to_owned(),
            message_name: Message::full_name(),
            variant_name: variant_name.to_owned(),
        }
    }

    pub fn invalid_field_value<Message>(field_name: &str, value: &str) -> Self
    where
        Message: Name,
    {
        Self::InvalidFieldValue {
            field_name: field_name.to_owned(),
            message_name: Message::full_name(),
            value: value.to_owned(),
        }
    }

    pub fn invalid_repeated_value<Message>(
        field_name: &str,
        value: &str,
    ) -> Self
    where
        Message: Name,
    {
        Self::InvalidRepeatedValue {
            field_name: field_name.to_owned(),
            message_name: Message::full_name(),
            value: value.to_owned(),
        }
    }

    pub fn missing_field<Message>(field_name: &str) -> Self
    where
        Message: Name,
    {
        Self::MissingField {
            field_name: field_name.to_owned(),
            message_name: Message::full_name(),
        }
    }

    pub fn unknown_enum_tag<Message>(field_name: &str, tag: i32) -> Self
    where
        Message: Name,
    {
        Self::UnknownEnumTag {
            field_name: field_name.to_owned(),
            message_name: Message::full_name(),
            tag,
        }
    }
}

/// Fixed-length byte field
fn array<Message, const N: usize>(
    field_name: &str,
    bytes: &[u8],
) -> Result<[u8; N], Error>
where
    Message: Name,
{
    bytes.try_into().map_err(|_| {
        Error::invalid_field_value::<Message>(field_name, &hex::encode(bytes))
    })
}

/// Fixed-length byte field that must also parse as `T`
fn parse<Message, const N: usize, T, F>(
    field_name: &str,
    bytes: &[u8],
    parse: F,
) -> Result<T, Error>
where
    Message: Name,
    F: FnOnce(&[u8; N]) -> Option<T>,
{
    let array = array::<Message, N>(field_name, bytes)?;
    parse(&array).ok_or_else(|| {
        Error::invalid_field_value::<Message>(field_name, &hex::encode(bytes))
    })
}

fn amount<Message>(field_name: &str, sats: u64) -> Result<Amount, Error>
where
    Message: Name,
{
    let amount = Amount::from_sat(sats);
    if amount > MAX_MONEY {
        return Err(Error::invalid_field_value::<Message>(
            field_name,
            &sats.to_string(),
        ));
    }
    Ok(amount)
}

fn required<Message, T>(field_name: &str, field: Option<T>) -> Result<T, Error>
where
    Message: Name,
{
    field.ok_or_else(|| Error::missing_field::<Message>(field_name))
}

fn encode_pool(pool: Pool) -> generated::Pool {
    match pool {
        Pool::Sapling => generated::Pool::Sapling,
        Pool::Orchard => generated::Pool::Orchard,
    }
}

fn decode_pool<Message>(field_name: &str, tag: i32) -> Result<Pool, Error>
where
    Message: Name,
{
    match generated::Pool::try_from(tag) {
        Ok(generated::Pool::Sapling) => Ok(Pool::Sapling),
        Ok(generated::Pool::Orchard) => Ok(Pool::Orchard),
        Ok(variant @ generated::Pool::Unspecified) => Err(
            Error::invalid_enum_variant::<Message>(field_name, variant.as_str_name()),
        ),
        Err(_) => Err(Error::unknown_enum_tag::<Message>(field_name, tag)),
    }
}

fn encode_phase(phase: Phase) -> generated::Phase {
    match phase {
        Phase::Open => generated::Phase::Open,
        Phase::Sealed => generated::Phase::Sealed,
        Phase::Finalized => generated::Phase::Finalized,
    }
}

fn decode_phase<Message>(field_name: &str, tag: i32) -> Result<Phase, Error>
where
    Message: Name,
{
    match generated::Phase::try_from(tag) {
        Ok(generated::Phase::Open) => Ok(Phase::Open),
        Ok(generated::Phase::Sealed) => Ok(Phase::Sealed),
        Ok(generated::Phase::Finalized) => Ok(Phase::Finalized),
        Ok(variant @ generated::Phase::Unspecified) => Err(
            Error::invalid_enum_variant::<Message>(field_name, variant.as_str_name()),
        ),
        Err(_) => Err(Error::unknown_enum_tag::<Message>(field_name, tag)),
    }
}

impl From<&Global> for generated::Global {
    fn from(global: &Global) -> Self {
        Self {
            tx_version: global.tx_version.to_u32(),
            version_group_id: global.version_group_id,
            consensus_branch_id: global.consensus_branch_id,
            lock_time: global.lock_time,
            expiry_height: global.expiry_height,
            phase: encode_phase(global.phase) as i32,
        }
    }
}

impl TryFrom<generated::Global> for Global {
    type Error = Error;

    fn try_from(global: generated::Global) -> Result<Self, Self::Error> {
        let generated::Global {
            tx_version,
            version_group_id,
            consensus_branch_id,
            lock_time,
            expiry_height,
            phase,
        } = global;
        let tx_version = TxVersion::from_u32(tx_version).ok_or_else(|| {
            Error::invalid_field_value::<generated::Global>(
                "tx_version",
                &tx_version.to_string(),
            )
        })?;
        Ok(Self {
            tx_version,
            version_group_id,
            consensus_branch_id,
            lock_time,
            expiry_height,
            phase: decode_phase::<generated::Global>("phase", phase)?,
        })
    }
}

impl From<&Note> for generated::Note {
    fn from(note: &Note) -> Self {
        Self {
            recipient: note.recipient.to_bytes().to_vec(),
            value: note.value.to_sat(),
            rseed: note.rseed.0.to_vec(),
        }
    }
}

impl TryFrom<generated::Note> for Note {
    type Error = Error;

    fn try_from(note: generated::Note) -> Result<Self, Self::Error> {
        type Message = generated::Note;
        let recipient = PaymentAddress::from_bytes(&note.recipient).map_err(|_| {
            Error::invalid_field_value::<Message>(
                "recipient",
                &hex::encode(&note.recipient),
            )
        })?;
        Ok(Self {
            recipient,
            value: amount::<Message>("value", note.value)?,
            rseed: Rseed(array::<Message, 32>("rseed", &note.rseed)?),
        })
    }
}

impl From<&MerklePath> for generated::MerklePath {
    fn from(path: &MerklePath) -> Self {
        Self {
            position: path.position(),
            auth_path: path.auth_path().map(|node| node.to_vec()).collect(),
        }
    }
}

impl TryFrom<generated::MerklePath> for MerklePath {
    type Error = Error;

    fn try_from(path: generated::MerklePath) -> Result<Self, Self::Error> {
        type Message = generated::MerklePath;
        let auth_path = path
            .auth_path
            .iter()
            .map(|node| {
                node.as_slice().try_into().map_err(|_| {
                    Error::invalid_repeated_value::<Message>(
                        "auth_path",
                        &hex::encode(node),
                    )
                })
            })
            .collect::<Result<Vec<[u8; 32]>, _>>()?;
        MerklePath::new(path.position, auth_path).map_err(|err| {
            Error::invalid_field_value::<Message>("auth_path", &err.to_string())
        })
    }
}

impl From<&KeyDerivation> for generated::KeyDerivation {
    fn from(derivation: &KeyDerivation) -> Self {
        Self {
            seed_fingerprint: derivation.seed_fingerprint.to_vec(),
            derivation_path: derivation.derivation_path.clone(),
        }
    }
}

impl TryFrom<generated::KeyDerivation> for KeyDerivation {
    type Error = Error;

    fn try_from(derivation: generated::KeyDerivation) -> Result<Self, Self::Error> {
        Ok(Self {
            seed_fingerprint: array::<generated::KeyDerivation, 32>(
                "seed_fingerprint",
                &derivation.seed_fingerprint,
            )?,
            derivation_path: derivation.derivation_path,
        })
    }
}

impl From<&Spend> for generated::Spend {
    fn from(spend: &Spend) -> Self {
        Self {
            cv: spend.cv.to_bytes().to_vec(),
            nullifier: spend.nullifier.0.to_vec(),
            rk: spend.rk.to_bytes().to_vec(),
            note: Some((&spend.note).into()),
            witness: Some((&spend.witness).into()),
            rcv: spend.rcv.to_bytes().to_vec(),
            alpha: spend.alpha.to_bytes().to_vec(),
            ak: spend.ak.to_bytes().to_vec(),
            nk: spend.nk.to_bytes().to_vec(),
            key_derivation: spend.key_derivation.as_ref().map(Into::into),
        }
    }
}

impl TryFrom<generated::Spend> for Spend {
    type Error = Error;

    fn try_from(spend: generated::Spend) -> Result<Self, Self::Error> {
        type Message = generated::Spend;
        Ok(Self {
            cv: parse::<Message, 32, _, _>("cv", &spend.cv, ValueCommitment::from_bytes)?,
            nullifier: Nullifier(array::<Message, 32>("nullifier", &spend.nullifier)?),
            rk: parse::<Message, 32, _, _>("rk", &spend.rk, SpendValidatingKey::from_bytes)?,
            note: required::<Message, _>("note", spend.note)?.try_into()?,
            witness: required::<Message, _>("witness", spend.witness)?.try_into()?,
            rcv: parse::<Message, 32, _, _>(
                "rcv",
                &spend.rcv,
                ValueCommitTrapdoor::from_bytes,
            )?,
            alpha: parse::<Message, 32, Scalar, _>("alpha", &spend.alpha, decode_scalar)?,
            ak: parse::<Message, 32, _, _>("ak", &spend.ak, SpendValidatingKey::from_bytes)?,
            nk: parse::<Message, 32, _, _>("nk", &spend.nk, NullifierDerivingKey::from_bytes)?,
            key_derivation: spend.key_derivation.map(TryInto::try_into).transpose()?,
        })
    }
}

impl From<&Output> for generated::Output {
    fn from(output: &Output) -> Self {
        Self {
            cv: output.cv.to_bytes().to_vec(),
            cmu: output.cmu.0.to_vec(),
            ephemeral_key: output.ephemeral_key.to_vec(),
            enc_ciphertext: output.enc_ciphertext.clone(),
            out_ciphertext: output.out_ciphertext.clone(),
            note: Some((&output.note).into()),
            memo: output.memo.as_bytes().to_vec(),
            rcv: output.rcv.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<generated::Output> for Output {
    type Error = Error;

    fn try_from(output: generated::Output) -> Result<Self, Self::Error> {
        type Message = generated::Output;
        if output.memo.len() != MEMO_SIZE {
            return Err(Error::invalid_field_value::<Message>(
                "memo",
                &hex::encode(&output.memo),
            ));
        }
        let memo = Memo::from_bytes(&output.memo).map_err(|err| {
            Error::invalid_field_value::<Message>("memo", &err.to_string())
        })?;
        Ok(Self {
            cv: parse::<Message, 32, _, _>("cv", &output.cv, ValueCommitment::from_bytes)?,
            cmu: NoteCommitment(array::<Message, 32>("cmu", &output.cmu)?),
            ephemeral_key: array::<Message, 32>("ephemeral_key", &output.ephemeral_key)?,
            enc_ciphertext: output.enc_ciphertext,
            out_ciphertext: output.out_ciphertext,
            note: required::<Message, _>("note", output.note)?.try_into()?,
            memo,
            rcv: parse::<Message, 32, _, _>(
                "rcv",
                &output.rcv,
                ValueCommitTrapdoor::from_bytes,
            )?,
        })
    }
}

fn encode_proof(proof: Option<&Proof>) -> Option<Vec<u8>> {
    proof.map(|proof| proof.as_bytes().to_vec())
}

fn decode_proof<Message>(bytes: &[u8]) -> Result<Proof, Error>
where
    Message: Name,
{
    array::<Message, PROOF_SIZE>("zkproof", bytes).map(Proof::from_bytes)
}

impl From<&SpendSlot> for generated::SpendSlot {
    fn from(slot: &SpendSlot) -> Self {
        Self {
            content: slot.content().map(Into::into),
            zkproof: encode_proof(slot.proof()),
            spend_auth_sig: slot.signature().map(|sig| sig.to_bytes().to_vec()),
        }
    }
}

fn decode_spend_slot(
    pool: Pool,
    index: usize,
    slot: generated::SpendSlot,
) -> Result<SpendSlot, Error> {
    type Message = generated::SpendSlot;
    let violation = |reason| Error::SlotState {
        pool,
        kind: SlotKind::Spend,
        index,
        reason,
    };
    let generated::SpendSlot {
        content,
        zkproof,
        spend_auth_sig,
    } = slot;
    match (content, zkproof, spend_auth_sig) {
        (None, None, None) => Ok(Slot::Empty),
        (None, Some(_), _) => Err(violation("proof without content")),
        (None, None, Some(_)) | (Some(_), None, Some(_)) => {
            Err(violation("signature without proof"))
        }
        (Some(content), None, None) => Ok(Slot::Populated(content.try_into()?)),
        (Some(content), Some(proof), None) => Ok(Slot::Proven {
            content: content.try_into()?,
            proof: decode_proof::<Message>(&proof)?,
        }),
        (Some(content), Some(proof), Some(signature)) => Ok(Slot::Authorized {
            content: content.try_into()?,
            proof: decode_proof::<Message>(&proof)?,
            signature: Signature::from(array::<Message, 64>(
                "spend_auth_sig",
                &signature,
            )?),
        }),
    }
}

impl From<&OutputSlot> for generated::OutputSlot {
    fn from(slot: &OutputSlot) -> Self {
        Self {
            content: slot.content().map(Into::into),
            zkproof: encode_proof(slot.proof()),
        }
    }
}

fn decode_output_slot(
    pool: Pool,
    index: usize,
    slot: generated::OutputSlot,
) -> Result<OutputSlot, Error> {
    type Message = generated::OutputSlot;
    match (slot.content, slot.zkproof) {
        (None, None) => Ok(Slot::Empty),
        (None, Some(_)) => Err(Error::SlotState {
            pool,
            kind: SlotKind::Output,
            index,
            reason: "proof without content",
        }),
        (Some(content), None) => Ok(Slot::Populated(content.try_into()?)),
        (Some(content), Some(proof)) => Ok(Slot::Proven {
            content: content.try_into()?,
            proof: decode_proof::<Message>(&proof)?,
        }),
    }
}

impl From<&shielded::Bundle> for generated::ShieldedBundle {
    fn from(bundle: &shielded::Bundle) -> Self {
        Self {
            pool: encode_pool(bundle.pool) as i32,
            spends: bundle.spends.iter().map(Into::into).collect(),
            outputs: bundle.outputs.iter().map(Into::into).collect(),
            value_balance: bundle.value_balance.to_sat(),
            anchor: bundle.anchor.map(|anchor| anchor.0.to_vec()),
            binding_sig: bundle.binding_sig.as_ref().map(|sig| sig.to_bytes().to_vec()),
        }
    }
}

impl TryFrom<generated::ShieldedBundle> for shielded::Bundle {
    type Error = Error;

    fn try_from(bundle: generated::ShieldedBundle) -> Result<Self, Self::Error> {
        type Message = generated::ShieldedBundle;
        let pool = decode_pool::<Message>("pool", bundle.pool)?;
        let spends = bundle
            .spends
            .into_iter()
            .enumerate()
            .map(|(index, slot)| decode_spend_slot(pool, index, slot))
            .collect::<Result<_, _>>()?;
        let outputs = bundle
            .outputs
            .into_iter()
            .enumerate()
            .map(|(index, slot)| decode_output_slot(pool, index, slot))
            .collect::<Result<_, _>>()?;
        let anchor = bundle
            .anchor
            .map(|anchor| array::<Message, 32>("anchor", &anchor).map(Anchor))
            .transpose()?;
        let binding_sig = bundle
            .binding_sig
            .map(|sig| array::<Message, 64>("binding_sig", &sig).map(Signature::from))
            .transpose()?;
        Ok(Self {
            pool,
            spends,
            outputs,
            value_balance: SignedAmount::from_sat(bundle.value_balance),
            anchor,
            binding_sig,
        })
    }
}

impl From<&transparent::Input> for generated::TransparentInput {
    fn from(input: &transparent::Input) -> Self {
        Self {
            prevout_txid: input.prevout.txid.0.to_vec(),
            prevout_vout: input.prevout.vout,
            value: input.value.to_sat(),
            address: input.address.0.to_vec(),
            sequence: input.sequence,
            authorization: input.authorization.as_ref().map(|authorization| {
                generated::TransparentAuthorization {
                    verifying_key: authorization.verifying_key.to_bytes().to_vec(),
                    signature: authorization.signature.to_bytes().to_vec(),
                }
            }),
        }
    }
}

impl TryFrom<generated::TransparentAuthorization> for Authorization {
    type Error = Error;

    fn try_from(
        authorization: generated::TransparentAuthorization,
    ) -> Result<Self, Self::Error> {
        type Message = generated::TransparentAuthorization;
        let verifying_key = parse::<Message, 32, _, _>(
            "verifying_key",
            &authorization.verifying_key,
            |bytes| authorization::VerifyingKey::from_bytes(bytes).ok(),
        )?;
        let signature = authorization::Signature::from_bytes(&array::<Message, 64>(
            "signature",
            &authorization.signature,
        )?);
        Ok(Self {
            verifying_key,
            signature,
        })
    }
}

impl TryFrom<generated::TransparentInput> for transparent::Input {
    type Error = Error;

    fn try_from(input: generated::TransparentInput) -> Result<Self, Self::Error> {
        type Message = generated::TransparentInput;
        Ok(Self {
            prevout: OutPoint {
                txid: Txid(array::<Message, 32>("prevout_txid", &input.prevout_txid)?),
                vout: input.prevout_vout,
            },
            value: amount::<Message>("value", input.value)?,
            address: Address(array::<Message, 20>("address", &input.address)?),
            sequence: input.sequence,
            authorization: input.authorization.map(TryInto::try_into).transpose()?,
        })
    }
}

impl From<&transparent::Output> for generated::TransparentOutput {
    fn from(output: &transparent::Output) -> Self {
        Self {
            value: output.value.to_sat(),
            address: output.address.0.to_vec(),
        }
    }
}

impl TryFrom<generated::TransparentOutput> for transparent::Output {
    type Error = Error;

    fn try_from(output: generated::TransparentOutput) -> Result<Self, Self::Error> {
        type Message = generated::TransparentOutput;
        Ok(Self {
            value: amount::<Message>("value", output.value)?,
            address: Address(array::<Message, 20>("address", &output.address)?),
        })
    }
}

impl From<&Pczt> for generated::PartiallyCreatedTransaction {
    fn from(pczt: &Pczt) -> Self {
        Self {
            global: Some((&pczt.global).into()),
            transparent_inputs: pczt.transparent_inputs.iter().map(Into::into).collect(),
            transparent_outputs: pczt.transparent_outputs.iter().map(Into::into).collect(),
            shielded: pczt.shielded.values().map(Into::into).collect(),
        }
    }
}

impl TryFrom<generated::PartiallyCreatedTransaction> for Pczt {
    type Error = Error;

    fn try_from(
        pczt: generated::PartiallyCreatedTransaction,
    ) -> Result<Self, Self::Error> {
        type Message = generated::PartiallyCreatedTransaction;
        let global: Global = required::<Message, _>("global", pczt.global)?.try_into()?;
        let mut shielded = BTreeMap::new();
        for bundle in pczt.shielded {
            let bundle = shielded::Bundle::try_from(bundle)?;
            let pool = bundle.pool;
            if !global.tx_version.supports(pool) {
                return Err(Error::invalid_repeated_value::<Message>(
                    "shielded",
                    &pool.to_string(),
                ));
            }
            if shielded.last_key_value().is_some_and(|(last, _)| *last >= pool) {
                return Err(Error::PoolOrder(pool));
            }
            let finalized = global.phase == Phase::Finalized && !bundle.is_empty();
            match (&bundle.binding_sig, finalized) {
                (Some(_), false) => {
                    return Err(Error::invalid_field_value::<generated::ShieldedBundle>(
                        "binding_sig",
                        &format!("present on a {} {pool} bundle", global.phase),
                    ));
                }
                (None, true) => {
                    return Err(Error::missing_field::<generated::ShieldedBundle>(
                        "binding_sig",
                    ));
                }
                (Some(_), true) | (None, false) => (),
            }
            shielded.insert(pool, bundle);
        }
        Ok(Self {
            global,
            transparent_inputs: pczt
                .transparent_inputs
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_, _>>()?,
            transparent_outputs: pczt
                .transparent_outputs
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_, _>>()?,
            shielded,
        })
    }
}

pub fn encode(pczt: &Pczt) -> Vec<u8> {
    let message = generated::PartiallyCreatedTransaction::from(pczt);
    let mut bytes = Vec::with_capacity(HEADER_LEN + message.encoded_len());
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend(message.encode_to_vec());
    bytes
}

pub fn decode(bytes: &[u8]) -> Result<Pczt, Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Truncated(bytes.len()));
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[..4]);
    if magic != MAGIC {
        return Err(Error::BadMagic(magic));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&header[4..]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedFormatVersion(version));
    }
    let message = generated::PartiallyCreatedTransaction::decode(body)?;
    message.try_into()
}
