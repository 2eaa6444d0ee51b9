//! Cloud integration tests
//!
//! Two clouds talk through in-memory gateways: every gateway attached to a
//! hub sees everything sent on that hub, including its own traffic, the way
//! a multicast group does.
//!
//! Run with: cargo test --test integration_cloud

use anyhow::Result;
use cloudbus_core::cloud::messages;
use cloudbus_core::message::{Mode, Presence};
use cloudbus_core::transport::{Endpoint, Listener};
use cloudbus_core::{
    BuildError, Cloud, DispatchMode, Gateway, GatewayError, GatewaySet, Iden, LocalAgent, Message,
    MessageBuilder, MessageType, Payload, Receipt, Status,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use uuid::Uuid;

#[derive(Default)]
struct Hub {
    members: Mutex<Vec<Weak<HubGateway>>>,
}

struct HubGateway {
    name: &'static str,
    hub: Arc<Hub>,
    listeners: Mutex<Vec<Listener>>,
}

impl HubGateway {
    fn attach(name: &'static str, hub: &Arc<Hub>) -> Arc<Self> {
        let gate = Arc::new(Self {
            name,
            hub: hub.clone(),
            listeners: Mutex::new(Vec::new()),
        });
        hub.members.lock().push(Arc::downgrade(&gate));
        gate
    }

    fn receive(&self, message: &Message) {
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(self.name, message);
        }
    }
}

impl Gateway for HubGateway {
    fn name(&self) -> &'static str {
        self.name
    }

    fn send(&self, _cloud: &Iden, message: &Message) -> Result<Receipt, GatewayError> {
        let members: Vec<Arc<HubGateway>> = self
            .hub
            .members
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for member in members {
            member.receive(message);
        }
        Ok(Receipt::new(message.uuid(), self.name, Status::Unknown))
    }

    fn add_listener(&self, _cloud: &Iden, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    fn endpoints(&self) -> BTreeSet<Endpoint> {
        BTreeSet::new()
    }

    fn close(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

struct Node {
    cloud: Arc<Cloud>,
    received: Arc<Mutex<Vec<Message>>>,
}

impl Node {
    fn received_of(&self, ty: MessageType) -> Vec<Message> {
        self.received
            .lock()
            .iter()
            .filter(|m| m.message_type() == ty)
            .cloned()
            .collect()
    }
}

fn node(cloud_uuid: Uuid, hubs: &[(&'static str, &Arc<Hub>)]) -> Result<Node> {
    let gateways: Vec<Arc<dyn Gateway>> = hubs
        .iter()
        .map(|(name, hub)| HubGateway::attach(name, hub) as Arc<dyn Gateway>)
        .collect();
    let cloud = Cloud::with_parts(
        cloud_uuid,
        GatewaySet::new(gateways)?,
        Box::new(cloudbus_core::cloud::NoSigner),
        DispatchMode::Inline,
    );
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    cloud.add_listener(Arc::new(move |m: &Message| sink.lock().push(m.clone())));
    Ok(Node { cloud, received })
}

#[test]
fn test_duplicate_delivery_over_two_gateways_is_accepted_once() -> Result<()> {
    let udp = Arc::new(Hub::default());
    let www = Arc::new(Hub::default());
    let cloud_uuid = Uuid::new_v4();
    let sender = node(cloud_uuid, &[("G1", &udp), ("G2", &www)])?;
    let receiver = node(cloud_uuid, &[("G1", &udp), ("G2", &www)])?;

    let agent = Arc::new(LocalAgent::new("producer"));
    sender.cloud.join(agent.clone())?;

    let app = messages::app(&agent, sender.cloud.iden().clone(), serde_json::json!({"n": 1}))?;
    let receipts = sender.cloud.send(&app)?;
    assert_eq!(receipts.receipts().len(), 2);

    assert_eq!(receiver.received_of(MessageType::Presence).len(), 1);
    let apps = receiver.received_of(MessageType::App);
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].uuid(), app.uuid());
    assert_eq!(apps[0].sequence(), app.sequence());

    // the sender's own traffic loops back and is dropped
    assert!(sender.received.lock().is_empty());
    Ok(())
}

#[test]
fn test_sequence_acceptance_per_sender() -> Result<()> {
    let hub = Arc::new(Hub::default());
    let cloud_uuid = Uuid::new_v4();
    let receiver = node(cloud_uuid, &[("G1", &hub)])?;
    let injector = HubGateway::attach("INJECT", &hub);

    let remote = Iden::agent();
    let other = Iden::agent();
    let stranger = Iden::agent();
    let at = |ty: MessageType, from: &Iden, sequence: i64| {
        let payload: Payload = match ty {
            MessageType::Presence => Presence::present(BTreeSet::new()).into(),
            _ => Payload::Null,
        };
        MessageBuilder::relaxed(ty, from.clone(), receiver.cloud.iden().clone())
            .with_payload(payload)
            .sequence(sequence)
            .build()
    };

    injector.send(receiver.cloud.iden(), &at(MessageType::Presence, &remote, 1)?)?;
    injector.send(receiver.cloud.iden(), &at(MessageType::App, &remote, 10)?)?;
    injector.send(receiver.cloud.iden(), &at(MessageType::App, &remote, 11)?)?;
    injector.send(receiver.cloud.iden(), &at(MessageType::App, &remote, 11)?)?;
    injector.send(receiver.cloud.iden(), &at(MessageType::App, &remote, 9)?)?;
    // sequences are tracked per sender
    injector.send(receiver.cloud.iden(), &at(MessageType::Presence, &other, 1)?)?;
    // a sender that never announced itself has no sequence state
    injector.send(receiver.cloud.iden(), &at(MessageType::App, &stranger, 3)?)?;
    injector.send(receiver.cloud.iden(), &at(MessageType::App, &stranger, 3)?)?;

    let accepted: Vec<(Iden, i64)> = receiver
        .received
        .lock()
        .iter()
        .map(|m| (m.from().clone(), m.sequence()))
        .collect();
    assert_eq!(
        accepted,
        vec![
            (remote.clone(), 1),
            (remote.clone(), 10),
            (remote, 11),
            (other, 1),
            (stranger.clone(), 3),
            (stranger, 3),
        ]
    );
    Ok(())
}

#[test]
fn test_restarted_agent_is_accepted_again() -> Result<()> {
    let hub = Arc::new(Hub::default());
    let cloud_uuid = Uuid::new_v4();
    let host = node(cloud_uuid, &[("G1", &hub)])?;
    let watcher = node(cloud_uuid, &[("G1", &hub)])?;
    let iden = Iden::agent();

    let before = Arc::new(LocalAgent::with_iden(iden.clone(), "svc"));
    host.cloud.join(before.clone())?;
    for n in 0..3 {
        host.cloud
            .send(&messages::app(&before, host.cloud.iden().clone(), serde_json::json!(n))?)?;
    }
    host.cloud.leave(&before)?;
    assert!(watcher.cloud.remote_agent(&iden).is_none());

    let after = Arc::new(LocalAgent::with_iden(iden.clone(), "svc"));
    host.cloud.join(after.clone())?;
    let hello = messages::app(&after, host.cloud.iden().clone(), serde_json::json!("back"))?;
    host.cloud.send(&hello)?;

    let known = watcher
        .cloud
        .remote_agent(&iden)
        .expect("the restarted agent should be registered again");
    assert_eq!(known.entity().last_accepted_sequence(), Some(2));
    assert_eq!(watcher.received_of(MessageType::Presence).len(), 3);
    assert_eq!(watcher.received_of(MessageType::App).last().map(Message::uuid), Some(hello.uuid()));
    assert_eq!(watcher.received_of(MessageType::App).len(), 4);
    Ok(())
}

#[test]
fn test_membership_follows_presence() -> Result<()> {
    let hub = Arc::new(Hub::default());
    let cloud_uuid = Uuid::new_v4();
    let first = node(cloud_uuid, &[("G1", &hub)])?;
    let second = node(cloud_uuid, &[("G1", &hub)])?;

    let agent = Arc::new(LocalAgent::new("svc"));
    first.cloud.join(agent.clone())?;

    let known = second
        .cloud
        .remote_agent(agent.iden())
        .expect("presence should register the agent");
    assert_eq!(known.entity().last_accepted_sequence(), Some(1));
    assert!(first.cloud.remote_agents().is_empty());

    first.cloud.leave(&agent)?;
    assert!(second.cloud.remote_agent(agent.iden()).is_none());
    Ok(())
}

#[test]
fn test_discovery_makes_members_reannounce() -> Result<()> {
    let hub = Arc::new(Hub::default());
    let cloud_uuid = Uuid::new_v4();
    let first = node(cloud_uuid, &[("G1", &hub)])?;
    let second = node(cloud_uuid, &[("G1", &hub)])?;

    let asker = Arc::new(LocalAgent::new("asker"));
    first.cloud.join(asker.clone())?;
    let member = Arc::new(LocalAgent::new("member"));
    second.cloud.join(member.clone())?;
    first.received.lock().clear();

    let dsc = messages::discovery(&asker, first.cloud.iden().clone())?;
    first.cloud.send(&dsc)?;

    let presences = first.received_of(MessageType::Presence);
    assert_eq!(presences.len(), 1);
    assert_eq!(presences[0].from(), member.iden());
    assert_eq!(
        presences[0].payload(),
        &Payload::Presence(Presence::present(BTreeSet::new()))
    );
    Ok(())
}

#[test]
fn test_messages_for_other_clouds_are_ignored() -> Result<()> {
    let hub = Arc::new(Hub::default());
    let ours = node(Uuid::new_v4(), &[("G1", &hub)])?;
    let theirs = node(Uuid::new_v4(), &[("G1", &hub)])?;

    let agent = Arc::new(LocalAgent::new("svc"));
    theirs.cloud.join(agent)?;

    assert!(ours.received.lock().is_empty());
    assert!(ours.cloud.remote_agents().is_empty());
    Ok(())
}

#[test]
fn test_builder_modes() {
    let agent = Iden::agent();
    let cloud = Iden::cloud(Uuid::new_v4(), 42);

    let strict = MessageBuilder::strict(MessageType::Ping, agent.clone(), cloud.clone())
        .with_uuid(Uuid::new_v4())
        .build();
    assert_eq!(strict.unwrap_err(), BuildError::UuidFromAgent);

    let relaxed = MessageBuilder::new(Mode::Relaxed, MessageType::Ping, agent.clone(), cloud.clone())
        .with_uuid(Uuid::new_v4())
        .build();
    assert!(relaxed.is_ok());

    let reliable = MessageBuilder::relaxed(MessageType::App, agent, cloud)
        .reliable(true)
        .build();
    assert_eq!(reliable.unwrap_err(), BuildError::ReliableToCloud);
}
