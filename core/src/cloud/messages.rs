// Message factory — the messages agents and clouds exchange routinely

use super::{Cloud, LocalAgent};
use crate::identity::Iden;
use crate::message::{BuildError, Fault, Message, MessageBuilder, MessageType, Payload, Presence};
use crate::transport::Endpoint;
use std::collections::BTreeSet;

/// `agent` is in the cloud and reachable through `endpoints`
pub fn presence(
    agent: &LocalAgent,
    to: Iden,
    endpoints: BTreeSet<Endpoint>,
) -> Result<Message, BuildError> {
    MessageBuilder::from_agent(MessageType::Presence, agent, to)
        .with_payload(Presence::present(endpoints))
        .build()
}

/// `agent` is leaving the cloud
pub fn absence(agent: &LocalAgent, to: Iden) -> Result<Message, BuildError> {
    MessageBuilder::from_agent(MessageType::Presence, agent, to)
        .with_payload(Presence::absent())
        .build()
}

/// Ask everyone in `to` to announce themselves
pub fn discovery(agent: &LocalAgent, to: Iden) -> Result<Message, BuildError> {
    MessageBuilder::from_agent(MessageType::Discovery, agent, to).build()
}

pub fn app(agent: &LocalAgent, to: Iden, payload: impl Into<Payload>) -> Result<Message, BuildError> {
    MessageBuilder::from_agent(MessageType::App, agent, to)
        .with_payload(payload)
        .build()
}

pub fn ping(agent: &LocalAgent, to: Iden) -> Result<Message, BuildError> {
    MessageBuilder::from_agent(MessageType::Ping, agent, to).build()
}

/// Answer to a ping; pongs never carry a payload
pub fn pong(agent: &LocalAgent, ping: &Message) -> Result<Message, BuildError> {
    MessageBuilder::from_agent(MessageType::Pong, agent, ping.from().clone()).build()
}

/// The cloud reports `about` as faulty to every member
pub fn fault(cloud: &Cloud, about: &Iden) -> Result<Message, BuildError> {
    MessageBuilder::from_cloud(MessageType::Fault, cloud, cloud.iden().clone())
        .with_payload(Fault {
            about: about.clone(),
        })
        .build()
}
