// Transport module — gateways that move messages between clouds

pub mod endpoint;
pub mod http;
pub mod receipt;
pub mod udp;
pub mod www;

pub use endpoint::{Endpoint, EndpointError, EndpointType, Network};
pub use http::HttpGateway;
pub use receipt::{MultiReceipt, Receipt};
pub use udp::UdpGateway;
pub use www::{RelayClient, RelayError, UreqRelayClient, Watermark, WwwGateway};

use crate::config::CloudConfig;
use crate::identity::Iden;
use crate::message::{CodecError, Message};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Callback invoked for every message a gateway reads; receives the gateway name
pub type Listener = Arc<dyn Fn(&'static str, &Message) + Send + Sync>;

/// Errors that can occur in the transport layer
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Gateway closed")]
    Closed,
}

/// A transport unit: sends messages for a cloud and reads messages for it.
///
/// Gateways never deduplicate; every outbound message goes through every
/// gateway and the receiving cloud drops the copies.
pub trait Gateway: Send + Sync {
    /// Stable short id: "UDP", "HTTP", "WWW"
    fn name(&self) -> &'static str;

    fn send(&self, cloud: &Iden, message: &Message) -> Result<Receipt, GatewayError>;

    fn add_listener(&self, cloud: &Iden, listener: Listener);

    /// Public endpoints through which this gateway can be reached
    fn endpoints(&self) -> BTreeSet<Endpoint>;

    /// Endpoints announced by a remote agent; gateways that route point to
    /// point remember them
    fn learn(&self, _agent: &Iden, _endpoints: &BTreeSet<Endpoint>) {}

    /// A remote agent is gone
    fn forget(&self, _agent: &Iden) {}

    /// Flush pending work and release resources
    fn close(&self) -> Result<(), GatewayError>;
}

/// Listener registry shared by the gateway implementations.
///
/// Dispatch works on a snapshot, so listeners may register while a message
/// is being delivered.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: RwLock<Vec<(Iden, Listener)>>,
}

impl Listeners {
    pub fn add(&self, cloud: &Iden, listener: Listener) {
        self.entries.write().push((cloud.clone(), listener));
    }

    pub fn dispatch(&self, gateway: &'static str, message: &Message) {
        let snapshot: Vec<Listener> = self.entries.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(gateway, message);
        }
    }

    /// Dispatch only to the listeners registered for `cloud`
    pub fn dispatch_for(&self, cloud: &Iden, gateway: &'static str, message: &Message) {
        let snapshot: Vec<Listener> = self
            .entries
            .read()
            .iter()
            .filter(|(c, _)| c.same_entity(cloud))
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            listener(gateway, message);
        }
    }
}

/// The gateways a cloud talks through. Built once, shut down explicitly.
pub struct GatewaySet {
    gateways: Vec<Arc<dyn Gateway>>,
    http: Option<Arc<HttpGateway>>,
}

impl GatewaySet {
    /// At least one gateway is required
    pub fn new(gateways: Vec<Arc<dyn Gateway>>) -> Result<Self, crate::CloudError> {
        if gateways.is_empty() {
            return Err(crate::CloudError::NoGateways);
        }
        Ok(Self {
            gateways,
            http: None,
        })
    }

    /// Start every gateway enabled in `config`. Gateways that fail to start
    /// are logged and left out.
    ///
    /// The relay gateway schedules its sync on the current tokio runtime when
    /// there is one.
    pub fn from_config(config: &CloudConfig) -> Result<Self, crate::CloudError> {
        let mut gateways: Vec<Arc<dyn Gateway>> = Vec::new();

        if config.udp.enabled {
            match UdpGateway::bind(&config.udp) {
                Ok(gate) => gateways.push(Arc::new(gate)),
                Err(e) => error!("Unable to create UDP gateway: {}", e),
            }
        } else {
            warn!("UDP gateway disabled by configuration");
        }

        match (&config.www.address, config.www.enabled) {
            (_, false) => warn!("WWW gateway disabled by configuration"),
            (None, true) => warn!("Missing relay address, WWW gateway not started"),
            (Some(address), true) => {
                let client = UreqRelayClient::new(address, config.www.timeout());
                let gate = Arc::new(WwwGateway::new(Box::new(client), &config.www));
                match tokio::runtime::Handle::try_current() {
                    Ok(_) => {
                        WwwGateway::start_scheduler(&gate);
                    }
                    Err(_) => warn!("No async runtime: WWW gateway will only sync on demand"),
                }
                info!("WWW gateway started at {}", address);
                gateways.push(gate);
            }
        }

        let mut http = None;
        if config.http.enabled {
            let gate = Arc::new(HttpGateway::new(&config.http));
            http = Some(gate.clone());
            gateways.push(gate);
        } else {
            warn!("HTTP gateway disabled by configuration");
        }

        let mut set = Self::new(gateways)?;
        set.http = http;
        Ok(set)
    }

    /// The direct HTTP gateway, for the server that receives its inbound posts
    pub fn http(&self) -> Option<&Arc<HttpGateway>> {
        self.http.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Gateway>> {
        self.gateways.iter()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gateways.iter().map(|g| g.name()).collect()
    }

    /// Public endpoints of all gateways
    pub fn endpoints(&self) -> BTreeSet<Endpoint> {
        self.gateways.iter().flat_map(|g| g.endpoints()).collect()
    }

    pub fn learn(&self, agent: &Iden, endpoints: &BTreeSet<Endpoint>) {
        for gate in &self.gateways {
            gate.learn(agent, endpoints);
        }
    }

    pub fn forget(&self, agent: &Iden) {
        for gate in &self.gateways {
            gate.forget(agent);
        }
    }

    /// Close every gateway; failures are logged and do not stop the others
    pub fn shutdown(&self) {
        info!("Closing gateways...");
        for gate in &self.gateways {
            if let Err(e) = gate.close() {
                warn!("Unexpected error closing gateway {}: {}", gate.name(), e);
            }
        }
    }
}
