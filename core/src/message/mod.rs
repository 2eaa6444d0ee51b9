// Message module — envelope, payloads, builder and wire codec

pub mod api;
pub mod builder;
pub mod codec;
pub mod payload;
pub mod types;

pub use api::{ApiType, RestApi};
pub use builder::{MessageBuilder, Mode};
pub use codec::{decode_bytes, decode_message, encode_message, CodecError, MAX_MESSAGE_SIZE};
pub use payload::{Fault, Healthcheck, Payload, PayloadEffects, Presence, Qne, Trace};
pub use types::{BuildError, Message, MessageType, Status, UnknownMessageType, Version, DEFAULT_HOPS};
