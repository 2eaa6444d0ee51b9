// Message codec — compact JSON wire form with size limits
//
// Every transport carries the same text: one JSON object per message, short
// keys, booleans as 0/1, identities as `KIND:uuid[:instance]`.

use super::builder::{MessageBuilder, Mode};
use super::payload::{Fault, Healthcheck, Payload, Presence, Qne, Trace};
use super::types::{BuildError, Message, MessageType, UnknownMessageType, Version};
use crate::identity::{parse_short_uuid, short_uuid, Iden, IdenError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum encoded message size: 64 KB, the largest UDP datagram
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Iden(#[from] IdenError),
    #[error(transparent)]
    Type(#[from] UnknownMessageType),
    #[error("Malformed version: {0}")]
    Version(String),
    #[error("Invalid {ty} payload: {source}")]
    Payload {
        ty: MessageType,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Booleans travel as `0`/`1`; `true`/`false` are accepted on input
pub(crate) mod compact_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Number(i64),
            Bool(bool),
        }

        Ok(match Flag::deserialize(deserializer)? {
            Flag::Number(n) => n != 0,
            Flag::Bool(b) => b,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    v: String,
    #[serde(default)]
    fr: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(with = "compact_bool", default)]
    rx: bool,
    hp: i32,
    ty: String,
    #[serde(default)]
    ss: Option<String>,
    #[serde(default)]
    rr: Option<String>,
    ts: i64,
    id: String,
    #[serde(default)]
    sq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dt: Option<Value>,
}

type PayloadDecoder = fn(Value) -> Result<Payload, serde_json::Error>;

/// Payload shape per message type; types without an entry decode as generic JSON
const PAYLOAD_DECODERS: &[(MessageType, PayloadDecoder)] = &[
    (MessageType::Presence, |v| serde_json::from_value::<Presence>(v).map(Payload::Presence)),
    (MessageType::Fault, |v| serde_json::from_value::<Fault>(v).map(Payload::Fault)),
    (MessageType::Qne, |v| serde_json::from_value::<Qne>(v).map(Payload::Qne)),
    (MessageType::Healthcheck, |v| {
        serde_json::from_value::<Healthcheck>(v).map(Payload::Healthcheck)
    }),
    (MessageType::Trace, |v| serde_json::from_value::<Trace>(v).map(Payload::Trace)),
    // a pong carries no data; whatever a peer put there is dropped
    (MessageType::Pong, |_| Ok(Payload::Null)),
    (MessageType::Ack, |v| {
        Ok(serde_json::from_value::<Trace>(v)
            .map(Payload::Trace)
            .unwrap_or(Payload::Null))
    }),
];

fn decode_payload(ty: MessageType, data: Option<Value>) -> Result<Payload, CodecError> {
    let data = match data {
        None | Some(Value::Null) => return Ok(Payload::Null),
        Some(data) => data,
    };
    match PAYLOAD_DECODERS.iter().find(|(t, _)| *t == ty) {
        Some((_, decode)) => decode(data).map_err(|source| CodecError::Payload { ty, source }),
        None => Ok(Payload::Generic(data)),
    }
}

fn encode_payload(payload: &Payload) -> Result<Option<Value>, CodecError> {
    let value = match payload {
        Payload::Null => return Ok(None),
        Payload::Presence(p) => serde_json::to_value(p)?,
        Payload::Fault(p) => serde_json::to_value(p)?,
        Payload::Qne(p) => serde_json::to_value(p)?,
        Payload::Healthcheck(p) => serde_json::to_value(p)?,
        Payload::Trace(p) => serde_json::to_value(p)?,
        Payload::Generic(v) => v.clone(),
    };
    Ok(Some(value))
}

/// Compact payload rendering for protocol logs
pub(crate) fn payload_json(payload: &Payload) -> String {
    match encode_payload(payload) {
        Ok(Some(value)) => value.to_string(),
        Ok(None) => "null".to_string(),
        Err(_) => "?".to_string(),
    }
}

/// Serialize a Message to its wire text
pub fn encode_message(msg: &Message) -> Result<String, CodecError> {
    let wire = WireMessage {
        v: msg.version().to_string(),
        fr: Some(msg.from().to_wire(true)),
        to: Some(msg.to().to_wire(false)),
        rx: msg.is_reliable(),
        hp: msg.hops(),
        ty: msg.message_type().tag().to_string(),
        ss: msg.signature().map(str::to_string),
        rr: msg.nonce().map(str::to_string),
        ts: msg.timestamp(),
        id: short_uuid(&msg.uuid()),
        sq: msg.sequence(),
        dt: encode_payload(msg.payload())?,
    };

    let text = serde_json::to_string(&wire)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(text.len()));
    }
    Ok(text)
}

/// Deserialize wire text to a Message
pub fn decode_message(text: &str) -> Result<Message, CodecError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(text.len()));
    }

    let wire: WireMessage = serde_json::from_str(text)?;
    let version: Version = wire.v.parse().map_err(CodecError::Version)?;
    if version != Version::V1_0 {
        return Err(CodecError::Version(wire.v));
    }
    let ty: MessageType = wire.ty.parse()?;
    let from = wire.fr.as_deref().map(str::parse::<Iden>).transpose()?;
    let to = wire.to.as_deref().map(str::parse::<Iden>).transpose()?;
    let uuid = parse_short_uuid(&wire.id)?;
    let payload = decode_payload(ty, wire.dt)?;

    let msg = MessageBuilder::partial(Mode::Relaxed, ty, from, to)
        .with_uuid(uuid)
        .with_hops(wire.hp)
        .reliable(wire.rx)
        .with_payload(payload)
        .signed(wire.ss, wire.rr)
        .sequence(wire.sq)
        .at(wire.ts)
        .build()?;
    Ok(msg)
}

/// Deserialize a datagram or request body
pub fn decode_bytes(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    decode_message(std::str::from_utf8(bytes)?)
}
