//! Direct HTTP gateway
//!
//! Posts messages straight to agents whose HTTP endpoint is known. Delivery
//! is best effort: anything short of a successful POST is reported as
//! `Unknown`, never as an error. Inbound requests are handed over by the
//! embedding HTTP server through [`HttpGateway::deliver`].

use super::{Endpoint, EndpointType, Gateway, GatewayError, Listener, Listeners, Network, Receipt};
use crate::config::HttpConfig;
use crate::identity::Iden;
use crate::message::{decode_message, encode_message, CodecError, Message, Status};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use tracing::{debug, warn};

pub struct HttpGateway {
    agent: ureq::Agent,
    routes: RwLock<HashMap<Iden, String>>,
    listeners: Listeners,
    advertised: Option<Endpoint>,
}

impl HttpGateway {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout()).build();
        let advertised = config.advertise_address.map(|ip| {
            let url = format!(
                "http://{}{}",
                SocketAddr::new(ip, config.advertise_port),
                config.advertise_path
            );
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            Endpoint::http(Network::from_ip(ip, prefix), config.advertise_port, &url)
        });

        Self {
            agent,
            routes: RwLock::new(HashMap::new()),
            listeners: Listeners::default(),
            advertised,
        }
    }

    /// Register the url messages for `agent` should be posted to
    pub fn register(&self, agent: &Iden, url: &str) {
        self.routes.write().insert(agent.as_entity(), url.to_string());
    }

    pub fn route(&self, agent: &Iden) -> Option<String> {
        self.routes.read().get(&agent.as_entity()).cloned()
    }

    /// Hand over a message received by an embedding HTTP server
    pub fn deliver(&self, text: &str) -> Result<(), CodecError> {
        let message = decode_message(text)?;
        self.listeners.dispatch(self.name(), &message);
        Ok(())
    }

    fn post(&self, url: &str, body: &str) -> bool {
        match self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(body)
        {
            Ok(_) => true,
            Err(ureq::Error::Status(code, _)) => {
                debug!("HTTP delivery to {} refused with status {}", url, code);
                false
            }
            Err(e) => {
                debug!("HTTP delivery to {} failed: {}", url, e);
                false
            }
        }
    }
}

impl Gateway for HttpGateway {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    fn send(&self, _cloud: &Iden, message: &Message) -> Result<Receipt, GatewayError> {
        let unknown = || Receipt::new(message.uuid(), "HTTP", Status::Unknown);
        if !message.to().is_agent() {
            return Ok(unknown());
        }
        let Some(url) = self.route(message.to()) else {
            return Ok(unknown());
        };

        let text = encode_message(message)?;
        debug!(target: "protocol", "TX(HTTP): {}", message);
        if self.post(&url, &text) {
            Ok(Receipt::new(message.uuid(), self.name(), Status::Delivered))
        } else {
            Ok(unknown())
        }
    }

    fn add_listener(&self, cloud: &Iden, listener: Listener) {
        self.listeners.add(cloud, listener);
    }

    fn endpoints(&self) -> BTreeSet<Endpoint> {
        self.advertised.iter().cloned().collect()
    }

    fn learn(&self, agent: &Iden, endpoints: &BTreeSet<Endpoint>) {
        let url = endpoints
            .iter()
            .filter(|e| e.endpoint_type() == EndpointType::Http)
            .find_map(|e| e.url());
        if let Some(url) = url {
            self.register(agent, url);
        }
    }

    fn forget(&self, agent: &Iden) {
        self.routes.write().remove(&agent.as_entity());
    }

    fn close(&self) -> Result<(), GatewayError> {
        let known = self.routes.read().len();
        if known > 0 {
            warn!("Closing HTTP gateway, dropping {} known routes", known);
        }
        self.routes.write().clear();
        Ok(())
    }
}
