//! Inbound validation pipeline.
//!
//! Each check is a plain function over a [`ValidationContext`]; the runner
//! applies them in a fixed order and stops at the first rejection.

use super::remote::RemoteEntity;
use crate::identity::Iden;
use crate::message::Message;
use thiserror::Error;

/// Why an inbound message was dropped
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("coming from local agent")]
    FromLocalAgent,
    #[error("addressed to a remote agent")]
    ToRemoteAgent,
    #[error("addressed to unknown cloud or agent")]
    UnknownDestination,
    #[error("out of sequence")]
    OutOfSequence,
    #[error("signature is not valid")]
    InvalidSignature,
}

/// What the checks need to know about the receiving cloud
pub trait ValidationContext {
    fn cloud_iden(&self) -> &Iden;
    fn is_local_agent(&self, iden: &Iden) -> bool;
    fn is_remote_agent(&self, iden: &Iden) -> bool;
    /// Sequence state tracked for `sender`, if any. Cloud senders carrying an
    /// instance id always have one (created on first contact).
    fn remote_entity(&self, sender: &Iden) -> Option<RemoteEntity>;
    fn expected_signature(&self, message: &Message) -> Option<String>;
}

pub type Validator = fn(&dyn ValidationContext, &Message) -> Result<(), Rejection>;

/// The checks, in the order they run
pub const VALIDATORS: [Validator; 5] = [
    not_from_local_agent,
    not_to_remote_agent,
    to_this_cloud_or_local_agent,
    in_sequence,
    valid_signature,
];

pub fn validate(ctx: &dyn ValidationContext, message: &Message) -> Result<(), Rejection> {
    VALIDATORS.iter().try_for_each(|check| check(ctx, message))
}

pub fn not_from_local_agent(ctx: &dyn ValidationContext, message: &Message) -> Result<(), Rejection> {
    if ctx.is_local_agent(message.from()) {
        return Err(Rejection::FromLocalAgent);
    }
    Ok(())
}

pub fn not_to_remote_agent(ctx: &dyn ValidationContext, message: &Message) -> Result<(), Rejection> {
    if ctx.is_remote_agent(message.to()) {
        return Err(Rejection::ToRemoteAgent);
    }
    Ok(())
}

pub fn to_this_cloud_or_local_agent(
    ctx: &dyn ValidationContext,
    message: &Message,
) -> Result<(), Rejection> {
    let to = message.to();
    if to.same_entity(ctx.cloud_iden()) || ctx.is_local_agent(to) {
        return Ok(());
    }
    Err(Rejection::UnknownDestination)
}

pub fn in_sequence(ctx: &dyn ValidationContext, message: &Message) -> Result<(), Rejection> {
    match ctx.remote_entity(message.from()) {
        Some(entity) if !entity.accepts(message.ordering_sequence()) => {
            Err(Rejection::OutOfSequence)
        }
        _ => Ok(()),
    }
}

pub fn valid_signature(ctx: &dyn ValidationContext, message: &Message) -> Result<(), Rejection> {
    let carried = message.signature().unwrap_or("");
    match ctx.expected_signature(message) {
        Some(expected) if expected == carried => Ok(()),
        _ => Err(Rejection::InvalidSignature),
    }
}
