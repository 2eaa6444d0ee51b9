// Signing hook — outbound messages are signed, inbound ones checked
//
// Trust establishment is out of scope: the shared-key signer only proves a
// message came from someone holding the same secret.

use crate::message::{encode_message, CodecError, Message};
use rand::RngCore;

pub trait Signer: Send + Sync {
    /// Signed copy of `message`
    fn sign(&self, message: &Message) -> Result<Message, CodecError>;

    /// The signature `message` should carry, `""` for unsigned messages.
    /// `None` when it cannot be computed.
    fn expected_signature(&self, message: &Message) -> Option<String>;
}

/// Messages travel unsigned; only unsigned messages are valid
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSigner;

impl Signer for NoSigner {
    fn sign(&self, message: &Message) -> Result<Message, CodecError> {
        Ok(message.clone())
    }

    fn expected_signature(&self, _message: &Message) -> Option<String> {
        Some(String::new())
    }
}

/// Keyed BLAKE3 over the unsigned wire form plus a random nonce
pub struct SharedKeySigner {
    key: [u8; 32],
}

impl SharedKeySigner {
    const CONTEXT: &'static str = "cloudbus 2024 message signature";

    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(Self::CONTEXT, secret.as_bytes()),
        }
    }

    fn signature(&self, message: &Message, nonce: &str) -> Result<String, CodecError> {
        let unsigned = encode_message(&message.signed(None, None))?;
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(unsigned.as_bytes());
        hasher.update(nonce.as_bytes());
        Ok(hasher.finalize().to_hex().to_string())
    }
}

impl Signer for SharedKeySigner {
    fn sign(&self, message: &Message) -> Result<Message, CodecError> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let signature = self.signature(message, &nonce)?;
        Ok(message.signed(Some(signature), Some(nonce)))
    }

    fn expected_signature(&self, message: &Message) -> Option<String> {
        let nonce = message.nonce().unwrap_or("");
        self.signature(message, nonce).ok()
    }
}
