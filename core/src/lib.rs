// cloudbus core — peer-to-peer message bus
//
// Agents join a cloud and exchange typed, sequenced messages over every
// available transport. Receivers drop what they have already seen.

pub mod cloud;
pub mod config;
pub mod identity;
pub mod message;
pub mod transport;

use thiserror::Error;
use uuid::Uuid;

pub use cloud::{Cloud, CloudListener, ListenerId, LocalAgent, RemoteAgent, RemoteEntity, Rejection};
pub use config::{CloudConfig, ConfigError, DispatchMode};
pub use identity::{Iden, IdenKind};
pub use message::{
    decode_message, encode_message, BuildError, CodecError, Message, MessageBuilder, MessageType,
    Payload, Status,
};
pub use transport::{Gateway, GatewayError, GatewaySet, MultiReceipt, Receipt};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("No gateway available")]
    NoGateways,
    #[error("No gateway accepted message {0}")]
    SendFailed(Uuid),
    #[error("Agent {0} is not local to this cloud")]
    NotLocal(Iden),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
