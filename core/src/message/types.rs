// Message types — the envelope every transport carries

use super::payload::Payload;
use crate::identity::Iden;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// What kind of message this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Presence (or absence, through the payload flag)
    Presence,
    /// Discovery request: "who is out there?"
    Discovery,
    /// Application data
    App,
    Ping,
    Pong,
    /// Enquiry about an agent's capabilities
    Enquiry,
    /// Capability announcement (APIs offered by an agent)
    Qne,
    Fault,
    Healthcheck,
    Trace,
    Ack,
}

impl MessageType {
    pub const ALL: [MessageType; 11] = [
        MessageType::Presence,
        MessageType::Discovery,
        MessageType::App,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Enquiry,
        MessageType::Qne,
        MessageType::Fault,
        MessageType::Healthcheck,
        MessageType::Trace,
        MessageType::Ack,
    ];

    /// Three-letter wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            MessageType::Presence => "PRS",
            MessageType::Discovery => "DSC",
            MessageType::App => "APP",
            MessageType::Ping => "PIN",
            MessageType::Pong => "PON",
            MessageType::Enquiry => "ENQ",
            MessageType::Qne => "QNE",
            MessageType::Fault => "FLT",
            MessageType::Healthcheck => "HCK",
            MessageType::Trace => "TRC",
            MessageType::Ack => "ACK",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .find(|t| t.tag() == s)
            .copied()
            .ok_or_else(|| UnknownMessageType(s.to_string()))
    }
}

/// Delivery status of a sent message, as far as one gateway knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Nothing can be said about delivery
    Unknown,
    /// Accepted by the transport, not yet delivered
    Pending,
    /// Handed over to the destination (or to the relay)
    Delivered,
}

/// Protocol version carried by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const V1_0: Version = Version { major: 1, minor: 0 };
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| format!("Malformed version: {}", s))?;
        Ok(Version {
            major: major.parse().map_err(|_| format!("Malformed version: {}", s))?,
            minor: minor.parse().map_err(|_| format!("Malformed version: {}", s))?,
        })
    }
}

/// Default hop budget of a fresh message
pub const DEFAULT_HOPS: i32 = 2;

/// Errors raised while constructing a message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Cannot build a message with no source")]
    MissingFrom,
    #[error("Cannot build a message with no destination")]
    MissingTo,
    #[error("Cannot create a reliable message to the cloud")]
    ReliableToCloud,
    #[error("Cannot accept a uuid if the message is sent from an agent")]
    UuidFromAgent,
    #[error("Cannot accept a sequence if the message is sent from a cloud")]
    SequenceFromCloud,
}

/// The wire envelope.
///
/// Immutable: the `with_*` methods return new messages. Build fresh ones
/// through [`super::MessageBuilder`].
#[derive(Debug, Clone)]
pub struct Message {
    pub(crate) version: Version,
    pub(crate) message_type: MessageType,
    pub(crate) from: Iden,
    pub(crate) to: Iden,
    pub(crate) signature: Option<String>,
    pub(crate) nonce: Option<String>,
    pub(crate) hops: i32,
    pub(crate) reliable: bool,
    pub(crate) payload: Payload,
    pub(crate) uuid: Uuid,
    pub(crate) sequence: i64,
    pub(crate) timestamp: i64,
}

impl Message {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn from(&self) -> &Iden {
        &self.from
    }

    pub fn to(&self) -> &Iden {
        &self.to
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn hops(&self) -> i32 {
        self.hops
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Creation time, epoch millis
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Sequence used for ordering against previous messages of the same sender.
    ///
    /// Clouds do not carry an explicit sequence: their message uuids embed a
    /// monotonic counter in the low 64 bits instead.
    pub fn ordering_sequence(&self) -> i64 {
        if self.from.is_cloud() {
            self.uuid.as_u64_pair().1 as i64
        } else {
            self.sequence
        }
    }

    pub fn with_from(&self, from: Iden) -> Message {
        Message {
            from,
            ..self.clone()
        }
    }

    pub fn with_to(&self, to: Iden) -> Result<Message, BuildError> {
        if self.reliable && to.is_cloud() {
            return Err(BuildError::ReliableToCloud);
        }
        Ok(Message { to, ..self.clone() })
    }

    pub fn reliable(&self) -> Result<Message, BuildError> {
        if self.to.is_cloud() {
            return Err(BuildError::ReliableToCloud);
        }
        Ok(Message {
            reliable: true,
            ..self.clone()
        })
    }

    pub fn with_hops(&self, hops: i32) -> Message {
        Message {
            hops,
            ..self.clone()
        }
    }

    pub fn signed(&self, signature: Option<String>, nonce: Option<String>) -> Message {
        Message {
            signature,
            nonce,
            ..self.clone()
        }
    }
}

// Structural equality: equal messages have the same encoded form, and the
// destination goes on the wire without its instance id.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.message_type == other.message_type
            && self.from == other.from
            && self.to.same_entity(&other.to)
            && self.signature == other.signature
            && self.nonce == other.nonce
            && self.hops == other.hops
            && self.reliable == other.reliable
            && self.payload == other.payload
            && self.uuid == other.uuid
            && self.sequence == other.sequence
            && self.timestamp == other.timestamp
    }
}

impl Eq for Message {}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} seq={} {} -> {}",
            self.message_type,
            short(&self.uuid),
            self.sequence,
            self.from,
            self.to.to_wire(false)
        )
    }
}

/// Compact uuid rendering for logs
pub(crate) fn short(uuid: &Uuid) -> String {
    let text = uuid.simple().to_string();
    text[text.len() - 8..].to_string()
}
