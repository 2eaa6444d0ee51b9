//! The cloud: local membership, remote bookkeeping and the send/receive paths.
//!
//! A [`Cloud`] owns its [`GatewaySet`]. Every outbound message goes through
//! all gateways; every inbound message goes through the [`Receiver`], which
//! validates it against the cloud's state before local listeners see it.

pub mod agent;
pub mod messages;
pub mod multicaster;
pub mod receiver;
pub mod remote;
pub mod signer;
pub mod validation;

pub use agent::LocalAgent;
pub use multicaster::{CloudListener, ListenerId, Multicaster};
pub use receiver::Receiver;
pub use remote::{RemoteAgent, RemoteEntity};
pub use signer::{NoSigner, SharedKeySigner, Signer};
pub use validation::{Rejection, ValidationContext};

use crate::config::{CloudConfig, DispatchMode};
use crate::identity::Iden;
use crate::message::builder::now_millis;
use crate::message::{Message, MessageType, RestApi};
use crate::transport::{Endpoint, GatewaySet, MultiReceipt};
use crate::CloudError;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Cloud {
    iden: Iden,
    gateways: GatewaySet,
    local_agents: RwLock<HashMap<Iden, Arc<LocalAgent>>>,
    remote_agents: RwLock<HashMap<Iden, RemoteAgent>>,
    remote_entities: RwLock<HashMap<Iden, RemoteEntity>>,
    signer: Box<dyn Signer>,
    pub(crate) caster: Multicaster,
    message_counter: AtomicU64,
}

impl Cloud {
    /// Unsigned cloud dispatching on a worker thread
    pub fn new(uuid: Uuid, gateways: GatewaySet) -> Arc<Self> {
        Self::with_parts(uuid, gateways, Box::new(NoSigner), DispatchMode::Threaded)
    }

    pub fn with_parts(
        uuid: Uuid,
        gateways: GatewaySet,
        signer: Box<dyn Signer>,
        dispatch: DispatchMode,
    ) -> Arc<Self> {
        let instance = i64::from(rand::random::<u32>());
        let cloud = Arc::new_cyclic(|weak| Cloud {
            iden: Iden::cloud(uuid, instance),
            gateways,
            local_agents: RwLock::new(HashMap::new()),
            remote_agents: RwLock::new(HashMap::new()),
            remote_entities: RwLock::new(HashMap::new()),
            signer,
            caster: Multicaster::new(dispatch),
            message_counter: AtomicU64::new(0),
        }
        .attach(Arc::new(Receiver::new(weak.clone()))));

        info!(
            "Cloud {} started with gateways {:?}",
            cloud.iden,
            cloud.gateways.names()
        );
        cloud
    }

    fn attach(self, receiver: Arc<Receiver>) -> Self {
        for gate in self.gateways.iter() {
            let receiver = receiver.clone();
            gate.add_listener(
                &self.iden,
                Arc::new(move |gate: &'static str, message: &Message| {
                    receiver.on_message(gate, message)
                }),
            );
        }
        self
    }

    /// Cloud with the gateways, signer and dispatch mode described by `config`
    pub fn from_config(uuid: Uuid, config: &CloudConfig) -> Result<Arc<Self>, CloudError> {
        let gateways = GatewaySet::from_config(config)?;
        let signer: Box<dyn Signer> = match &config.signing_key {
            Some(key) => Box::new(SharedKeySigner::new(key)),
            None => Box::new(NoSigner),
        };
        Ok(Self::with_parts(uuid, gateways, signer, config.dispatch))
    }

    pub fn iden(&self) -> &Iden {
        &self.iden
    }

    pub fn gateways(&self) -> &GatewaySet {
        &self.gateways
    }

    /// Fresh uuid for a message sent by the cloud itself: instance id in the
    /// high half, a counter in the low half
    pub fn next_message_uuid(&self) -> Uuid {
        let count = self.message_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u64_pair(self.iden.instance().unwrap_or_default() as u64, count)
    }

    /// Sign `message` and hand it to every gateway.
    ///
    /// Fails only when no gateway accepted the message.
    pub fn send(&self, message: &Message) -> Result<MultiReceipt, CloudError> {
        let signed = self.signer.sign(message)?;
        let mut receipts = MultiReceipt::new(signed.uuid());
        for gate in self.gateways.iter() {
            match gate.send(&self.iden, &signed) {
                Ok(receipt) => {
                    debug!(target: "protocol", "TX({}): {}", gate.name(), signed);
                    receipts.add(receipt);
                }
                Err(e) => warn!("Unable to send {} over {}: {}", signed, gate.name(), e),
            }
        }

        if receipts.receipts().is_empty() {
            return Err(CloudError::SendFailed(signed.uuid()));
        }
        Ok(receipts)
    }

    /// Register `agent` as local and announce it to the cloud
    pub fn join(&self, agent: Arc<LocalAgent>) -> Result<MultiReceipt, CloudError> {
        let presence = messages::presence(&agent, self.iden.clone(), self.gateways.endpoints())?;
        self.local_agents
            .write()
            .insert(agent.iden().clone(), agent.clone());
        info!("Agent {} ({}) joined cloud {}", agent.iden(), agent.name(), self.iden);
        self.send(&presence)
    }

    /// Announce that `agent` leaves, then forget it
    pub fn leave(&self, agent: &LocalAgent) -> Result<MultiReceipt, CloudError> {
        if !self.is_local(agent.iden()) {
            return Err(CloudError::NotLocal(agent.iden().clone()));
        }
        let absence = messages::absence(agent, self.iden.clone())?;
        let receipts = self.send(&absence);
        self.local_agents.write().remove(agent.iden());
        info!("Agent {} left cloud {}", agent.iden(), self.iden);
        receipts
    }

    pub fn add_listener(&self, listener: CloudListener) -> ListenerId {
        self.caster.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.caster.remove_listener(id)
    }

    pub fn is_local(&self, iden: &Iden) -> bool {
        self.local_agents.read().contains_key(iden)
    }

    pub fn local_agents(&self) -> Vec<Arc<LocalAgent>> {
        self.local_agents.read().values().cloned().collect()
    }

    pub fn remote_agents(&self) -> Vec<RemoteAgent> {
        self.remote_agents.read().values().cloned().collect()
    }

    pub fn remote_agent(&self, iden: &Iden) -> Option<RemoteAgent> {
        self.remote_agents.read().get(iden).cloned()
    }

    /// Record the sequence of an accepted message against its sender.
    ///
    /// Cloud instances are tracked here; agents only through their
    /// [`RemoteAgent`] entry, so forgetting an agent forgets its sequence.
    pub(crate) fn advance_sequence(&self, message: &Message) {
        let sender = message.from();
        let sequence = message.ordering_sequence();

        if sender.is_cloud() {
            if sender.instance().is_some() {
                self.remote_entities
                    .write()
                    .entry(sender.clone())
                    .or_insert_with(|| RemoteEntity::new(sender.clone()))
                    .accept(sequence);
            }
        } else if let Some(agent) = self.remote_agents.write().get_mut(sender) {
            agent.entity.accept(sequence);
        }
    }

    /// Bookkeeping after listeners saw an accepted message
    pub(crate) fn post_process(&self, message: &Message) {
        if let Some(agent) = self.remote_agents.write().get_mut(message.from()) {
            agent.last_seen = now_millis();
        }

        if message.message_type() == MessageType::Discovery && message.to().same_entity(&self.iden) {
            for agent in self.local_agents() {
                self.announce(&agent);
            }
        }
    }

    fn announce(&self, agent: &LocalAgent) {
        let presence = match messages::presence(agent, self.iden.clone(), self.gateways.endpoints()) {
            Ok(presence) => presence,
            Err(e) => {
                warn!("Unable to build presence for {}: {}", agent.iden(), e);
                return;
            }
        };
        if let Err(e) = self.send(&presence) {
            warn!("Unable to announce {}: {}", agent.iden(), e);
        }
    }

    /// Stop dispatching and close every gateway
    pub fn close(&self) {
        self.caster.close();
        self.gateways.shutdown();
        info!("Cloud {} closed", self.iden);
    }
}

impl ValidationContext for Cloud {
    fn cloud_iden(&self) -> &Iden {
        &self.iden
    }

    fn is_local_agent(&self, iden: &Iden) -> bool {
        self.is_local(iden)
    }

    fn is_remote_agent(&self, iden: &Iden) -> bool {
        self.remote_agents.read().contains_key(iden)
    }

    fn remote_entity(&self, sender: &Iden) -> Option<RemoteEntity> {
        if !sender.is_cloud() {
            return self.remote_agents.read().get(sender).map(|agent| agent.entity.clone());
        }
        sender.instance()?;
        let known = self.remote_entities.read().get(sender).cloned();
        Some(known.unwrap_or_else(|| RemoteEntity::new(sender.clone())))
    }

    fn expected_signature(&self, message: &Message) -> Option<String> {
        self.signer.expected_signature(message)
    }
}

impl crate::message::PayloadEffects for Cloud {
    fn agent_present(&self, agent: &Iden, endpoints: &BTreeSet<Endpoint>, sequence: i64) {
        if self.is_local(agent) {
            return;
        }
        let now = now_millis();
        let mut remotes = self.remote_agents.write();
        match remotes.get_mut(agent) {
            Some(known) => {
                known.endpoints = endpoints.clone();
                known.last_seen = now;
            }
            None => {
                debug!("Remote agent {} joined cloud {}", agent, self.iden);
                remotes.insert(
                    agent.clone(),
                    RemoteAgent::new(agent.clone(), endpoints.clone(), sequence, now),
                );
            }
        }
        drop(remotes);
        self.gateways.learn(agent, endpoints);
    }

    fn agent_absent(&self, agent: &Iden) {
        if self.remote_agents.write().remove(agent).is_some() {
            debug!("Remote agent {} left cloud {}", agent, self.iden);
            self.gateways.forget(agent);
        }
    }

    fn agent_faulty(&self, agent: &Iden) {
        if self.remote_agents.write().remove(agent).is_some() {
            warn!("Remote agent {} reported faulty, removed from cloud {}", agent, self.iden);
            self.gateways.forget(agent);
        }
    }

    fn agent_apis(&self, agent: &Iden, name: &str, apis: &BTreeSet<RestApi>) {
        match self.remote_agents.write().get_mut(agent) {
            Some(known) => {
                known.apis.insert(name.to_string(), apis.clone());
            }
            None => debug!("APIs from unknown agent {} ignored", agent),
        }
    }
}
