// Payloads — the typed data carried by a message
//
// The concrete shape is selected by the envelope's message type; see the
// decoder registry in `codec`.

use super::api::RestApi;
use super::codec::compact_bool;
use super::types::Message;
use crate::identity::Iden;
use crate::transport::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Presence (or absence) of an agent in a cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(with = "compact_bool")]
    pub present: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub endpoints: BTreeSet<Endpoint>,
}

impl Presence {
    pub fn present(endpoints: BTreeSet<Endpoint>) -> Self {
        Self {
            present: true,
            endpoints,
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            endpoints: BTreeSet::new(),
        }
    }
}

/// A cloud reporting that an agent is faulty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub about: Iden,
}

/// Capability announcement: the APIs an agent offers under a service name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qne {
    pub name: String,
    pub apis: BTreeSet<RestApi>,
}

impl Qne {
    pub fn new(name: &str, apis: impl IntoIterator<Item = RestApi>) -> Self {
        Self {
            name: name.to_string(),
            apis: apis.into_iter().collect(),
        }
    }
}

/// Outcome of a health check run against an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    #[serde(rename = "iden")]
    pub about: Iden,
    #[serde(with = "compact_bool")]
    pub working: bool,
}

/// Free-form tracing fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Trace {
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Data carried by a message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// No payload: `dt` is omitted on the wire
    #[default]
    Null,
    Presence(Presence),
    Fault(Fault),
    Qne(Qne),
    Healthcheck(Healthcheck),
    Trace(Trace),
    /// Anything else, kept as opaque JSON
    Generic(Value),
}

impl Payload {
    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    /// Apply the effects this payload has on the receiving cloud.
    ///
    /// Called once per accepted message, before it reaches local listeners.
    pub fn process(&self, message: &Message, effects: &dyn PayloadEffects) {
        match self {
            Payload::Presence(presence) => {
                if !message.from().is_agent() {
                    return;
                }
                if presence.present {
                    effects.agent_present(message.from(), &presence.endpoints, message.sequence());
                } else {
                    effects.agent_absent(message.from());
                }
            }
            Payload::Fault(fault) => {
                if message.from().is_cloud() {
                    effects.agent_faulty(&fault.about);
                }
            }
            Payload::Healthcheck(check) => {
                if !check.working {
                    effects.agent_faulty(&check.about);
                }
            }
            Payload::Qne(qne) => {
                effects.agent_apis(message.from(), &qne.name, &qne.apis);
            }
            Payload::Trace(_) | Payload::Generic(_) | Payload::Null => {}
        }
    }
}

impl From<Presence> for Payload {
    fn from(p: Presence) -> Self {
        Payload::Presence(p)
    }
}

impl From<Fault> for Payload {
    fn from(p: Fault) -> Self {
        Payload::Fault(p)
    }
}

impl From<Qne> for Payload {
    fn from(p: Qne) -> Self {
        Payload::Qne(p)
    }
}

impl From<Healthcheck> for Payload {
    fn from(p: Healthcheck) -> Self {
        Payload::Healthcheck(p)
    }
}

impl From<Trace> for Payload {
    fn from(p: Trace) -> Self {
        Payload::Trace(p)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Payload::Null,
            other => Payload::Generic(other),
        }
    }
}

/// What a payload may change on the cloud that accepted it
pub trait PayloadEffects {
    /// An agent announced itself (or refreshed its announcement)
    fn agent_present(&self, agent: &Iden, endpoints: &BTreeSet<Endpoint>, sequence: i64);
    /// An agent left
    fn agent_absent(&self, agent: &Iden);
    /// An agent was reported faulty
    fn agent_faulty(&self, agent: &Iden);
    /// An agent announced its APIs
    fn agent_apis(&self, agent: &Iden, name: &str, apis: &BTreeSet<RestApi>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBuilder, MessageType};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PayloadEffects for Recorder {
        fn agent_present(&self, agent: &Iden, endpoints: &BTreeSet<Endpoint>, sequence: i64) {
            self.events
                .lock()
                .push(format!("present {} {} {}", agent, endpoints.len(), sequence));
        }
        fn agent_absent(&self, agent: &Iden) {
            self.events.lock().push(format!("absent {}", agent));
        }
        fn agent_faulty(&self, agent: &Iden) {
            self.events.lock().push(format!("faulty {}", agent));
        }
        fn agent_apis(&self, agent: &Iden, name: &str, apis: &BTreeSet<RestApi>) {
            self.events
                .lock()
                .push(format!("apis {} {} {}", agent, name, apis.len()));
        }
    }

    fn cloud() -> Iden {
        Iden::cloud(uuid::Uuid::new_v4(), 1)
    }

    #[test]
    fn test_presence_effects() {
        let agent = Iden::agent();
        let msg = MessageBuilder::relaxed(MessageType::Presence, agent.clone(), cloud())
            .with_payload(Presence::present(BTreeSet::new()))
            .sequence(12)
            .build()
            .unwrap();
        let recorder = Recorder::default();
        msg.payload().process(&msg, &recorder);
        assert_eq!(*recorder.events.lock(), vec![format!("present {} 0 12", agent)]);

        let gone = MessageBuilder::relaxed(MessageType::Presence, agent.clone(), cloud())
            .with_payload(Presence::absent())
            .build()
            .unwrap();
        gone.payload().process(&gone, &recorder);
        assert_eq!(recorder.events.lock()[1], format!("absent {}", agent));
    }

    #[test]
    fn test_fault_only_counts_from_clouds() {
        let victim = Iden::agent();
        let recorder = Recorder::default();

        let from_agent = MessageBuilder::relaxed(MessageType::Fault, Iden::agent(), cloud())
            .with_payload(Fault { about: victim.clone() })
            .build()
            .unwrap();
        from_agent.payload().process(&from_agent, &recorder);
        assert!(recorder.events.lock().is_empty());

        let c = cloud();
        let from_cloud = MessageBuilder::relaxed(MessageType::Fault, c.clone(), c)
            .with_payload(Fault { about: victim.clone() })
            .build()
            .unwrap();
        from_cloud.payload().process(&from_cloud, &recorder);
        assert_eq!(*recorder.events.lock(), vec![format!("faulty {}", victim)]);
    }

    #[test]
    fn test_working_healthcheck_has_no_effect() {
        let recorder = Recorder::default();
        let msg = MessageBuilder::relaxed(MessageType::Healthcheck, Iden::agent(), cloud())
            .with_payload(Healthcheck {
                about: Iden::agent(),
                working: true,
            })
            .build()
            .unwrap();
        msg.payload().process(&msg, &recorder);
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_qne_records_apis() {
        let agent = Iden::agent();
        let recorder = Recorder::default();
        let msg = MessageBuilder::relaxed(MessageType::Qne, agent.clone(), cloud())
            .with_payload(Qne::new("files", [RestApi::new("files", "/files", 80)]))
            .build()
            .unwrap();
        msg.payload().process(&msg, &recorder);
        assert_eq!(*recorder.events.lock(), vec![format!("apis {} files 1", agent)]);
    }
}
