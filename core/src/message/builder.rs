// MessageBuilder — the only way to construct a fresh Message

use super::payload::Payload;
use super::types::{BuildError, Message, MessageType, Version, DEFAULT_HOPS};
use crate::cloud::{Cloud, LocalAgent};
use crate::identity::Iden;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// How strictly the builder polices its setters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Agents never pick uuids, clouds never pick sequences
    Strict,
    /// Anything goes; used when rebuilding messages read off the wire
    Relaxed,
}

/// Builder for [`Message`].
///
/// Strict-mode violations are remembered and reported by [`build`], so the
/// setters stay chainable.
///
/// [`build`]: MessageBuilder::build
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    mode: Mode,
    message_type: MessageType,
    from: Option<Iden>,
    to: Option<Iden>,
    uuid: Option<Uuid>,
    hops: i32,
    reliable: bool,
    payload: Payload,
    signature: Option<String>,
    nonce: Option<String>,
    sequence: i64,
    timestamp: Option<i64>,
    violation: Option<BuildError>,
}

impl MessageBuilder {
    pub fn new(mode: Mode, message_type: MessageType, from: Iden, to: Iden) -> Self {
        Self::partial(mode, message_type, Some(from), Some(to))
    }

    pub fn strict(message_type: MessageType, from: Iden, to: Iden) -> Self {
        Self::new(Mode::Strict, message_type, from, to)
    }

    pub fn relaxed(message_type: MessageType, from: Iden, to: Iden) -> Self {
        Self::new(Mode::Relaxed, message_type, from, to)
    }

    /// Builder for a message sent by a local agent; its sequence comes from
    /// the agent's counter.
    pub fn from_agent(message_type: MessageType, agent: &LocalAgent, to: Iden) -> Self {
        let mut builder = Self::strict(message_type, agent.iden().clone(), to);
        builder.sequence = agent.next_sequence();
        builder
    }

    /// Builder for a message sent by the cloud itself; its uuid embeds the
    /// cloud's message counter.
    pub fn from_cloud(message_type: MessageType, cloud: &Cloud, to: Iden) -> Self {
        let mut builder = Self::strict(message_type, cloud.iden().clone(), to);
        builder.uuid = Some(cloud.next_message_uuid());
        builder
    }

    /// Source and destination may be absent when rebuilding a message from
    /// untrusted input; `build` reports them.
    pub(crate) fn partial(
        mode: Mode,
        message_type: MessageType,
        from: Option<Iden>,
        to: Option<Iden>,
    ) -> Self {
        Self {
            mode,
            message_type,
            from,
            to,
            uuid: None,
            hops: DEFAULT_HOPS,
            reliable: false,
            payload: Payload::Null,
            signature: None,
            nonce: None,
            sequence: 0,
            timestamp: None,
            violation: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        if self.mode == Mode::Strict && self.from.as_ref().is_some_and(Iden::is_agent) {
            self.violation.get_or_insert(BuildError::UuidFromAgent);
        }
        self.uuid = Some(uuid);
        self
    }

    pub fn with_hops(mut self, hops: i32) -> Self {
        self.hops = hops;
        self
    }

    pub fn reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn signed(mut self, signature: Option<String>, nonce: Option<String>) -> Self {
        self.signature = signature;
        self.nonce = nonce;
        self
    }

    pub fn sequence(mut self, sequence: i64) -> Self {
        if self.mode == Mode::Strict && self.from.as_ref().is_some_and(Iden::is_cloud) {
            self.violation.get_or_insert(BuildError::SequenceFromCloud);
        }
        self.sequence = sequence;
        self
    }

    /// Creation time, epoch millis
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Result<Message, BuildError> {
        if let Some(violation) = self.violation {
            return Err(violation);
        }
        let from = self.from.ok_or(BuildError::MissingFrom)?;
        let to = self.to.ok_or(BuildError::MissingTo)?;
        if self.reliable && to.is_cloud() {
            return Err(BuildError::ReliableToCloud);
        }

        Ok(Message {
            version: Version::V1_0,
            message_type: self.message_type,
            from,
            to,
            signature: self.signature,
            nonce: self.nonce,
            hops: self.hops,
            reliable: self.reliable,
            payload: self.payload,
            uuid: self.uuid.unwrap_or_else(Uuid::new_v4),
            sequence: self.sequence,
            timestamp: self.timestamp.unwrap_or_else(now_millis),
        })
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
