// Receiver — gateway callback → validation → payload effects → listeners

use super::validation::{self, Rejection};
use super::Cloud;
use crate::message::codec::payload_json;
use crate::message::Message;
use parking_lot::Mutex;
use std::sync::Weak;
use tracing::{debug, info, trace};

/// Entry point for every message read by any of the cloud's gateways
pub struct Receiver {
    cloud: Weak<Cloud>,
    // validation, sequence and membership updates must not interleave across gateways
    accepting: Mutex<()>,
}

impl Receiver {
    pub(crate) fn new(cloud: Weak<Cloud>) -> Self {
        Self {
            cloud,
            accepting: Mutex::new(()),
        }
    }

    pub fn on_message(&self, gate: &'static str, message: &Message) {
        let Some(cloud) = self.cloud.upgrade() else {
            return;
        };

        if let Err(reason) = self.accept(&cloud, message) {
            log_rejection(&cloud, gate, message, reason);
            return;
        }

        info!(
            target: "protocol",
            "RX({}): {} {} seq={} {} -> {} {}",
            gate,
            message.message_type(),
            message.uuid(),
            message.sequence(),
            message.from(),
            message.to().to_wire(false),
            payload_json(message.payload())
        );

        cloud.caster.dispatch(message);
        cloud.post_process(message);
    }

    /// Validate, record the sequence and apply the payload as one step.
    ///
    /// Payload effects never send, so holding the lock across them cannot
    /// re-enter; listeners and post-processing run after it is released.
    fn accept(&self, cloud: &Cloud, message: &Message) -> Result<(), Rejection> {
        let _guard = self.accepting.lock();
        validation::validate(cloud, message)?;
        cloud.advance_sequence(message);
        message.payload().process(message, cloud);
        Ok(())
    }
}

fn log_rejection(cloud: &Cloud, gate: &'static str, message: &Message, reason: Rejection) {
    if cloud.is_local(message.from()) {
        trace!(target: "protocol", "NN({}): ={}= {}", gate, reason, message);
    } else {
        debug!(
            target: "protocol",
            "NN({}): ={}= {} {}",
            gate,
            reason,
            message,
            payload_json(message.payload())
        );
    }
}
