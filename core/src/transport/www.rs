//! WWW relay-polling gateway
//!
//! Clouds spread over networks that cannot see each other's multicast
//! traffic meet on a relay: a plain HTTP store of messages per cloud.
//! The gateway queues outbound messages and periodically runs a sync:
//! - TX: post every queued message of a cloud, newline separated
//! - RX: fetch the messages of every listened cloud after its watermark
//!
//! The first fetch of a cloud (and every fetch after a re-baseline) reads the
//! whole relay history; those messages go through a [`JoinBatch`] and reach
//! listeners only once the full response was read.

use super::{Endpoint, Gateway, GatewayError, Listener, Listeners, Receipt};
use crate::config::WwwConfig;
use crate::identity::Iden;
use crate::message::{decode_message, encode_message, CodecError, Message, Status};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// RELAY CLIENT
// ============================================================================

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Cannot connect to relay: {0}")]
    Connection(String),

    #[error("Relay answered with status {0}")]
    Http(u16),

    #[error("Cannot read relay response: {0}")]
    Io(String),

    #[error("Undecodable relay message: {0}")]
    Decode(#[from] CodecError),
}

/// HTTP surface of the relay
#[cfg_attr(test, mockall::automock)]
pub trait RelayClient: Send + Sync {
    /// `GET {root}/ping`
    fn ping(&self) -> Result<(), RelayError>;

    /// `POST {root}/api/1.0/messages?cloud=..` with newline-separated messages
    fn post_messages(&self, cloud: Uuid, body: &str) -> Result<(), RelayError>;

    /// `GET {root}/api/1.0/messages?cloud=..[&message=..]`, oldest first
    fn get_messages(&self, cloud: Uuid, after: Option<Uuid>) -> Result<String, RelayError>;
}

/// Blocking relay client over `ureq`
pub struct UreqRelayClient {
    agent: ureq::Agent,
    root: String,
}

impl UreqRelayClient {
    pub fn new(root: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn messages_url(&self) -> String {
        format!("{}/api/1.0/messages", self.root)
    }
}

fn relay_error(err: ureq::Error) -> RelayError {
    match err {
        ureq::Error::Status(code, _) => RelayError::Http(code),
        ureq::Error::Transport(t) => RelayError::Connection(t.to_string()),
    }
}

impl RelayClient for UreqRelayClient {
    fn ping(&self) -> Result<(), RelayError> {
        self.agent
            .get(&format!("{}/ping", self.root))
            .call()
            .map_err(relay_error)?;
        Ok(())
    }

    fn post_messages(&self, cloud: Uuid, body: &str) -> Result<(), RelayError> {
        self.agent
            .post(&self.messages_url())
            .query("cloud", &cloud.to_string())
            .set("Content-Type", "text/plain; charset=utf-8")
            .send_string(body)
            .map_err(relay_error)?;
        Ok(())
    }

    fn get_messages(&self, cloud: Uuid, after: Option<Uuid>) -> Result<String, RelayError> {
        let mut request = self
            .agent
            .get(&self.messages_url())
            .query("cloud", &cloud.to_string());
        if let Some(after) = after {
            request = request.query("message", &after.to_string());
        }
        let response = request.call().map_err(relay_error)?;
        response
            .into_string()
            .map_err(|e| RelayError::Io(e.to_string()))
    }
}

// ============================================================================
// SYNC STATE
// ============================================================================

/// How far the gateway has read a cloud's relay history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Nothing read yet: the next fetch reads everything through a join batch
    NeverSynced,
    /// Synced, but the relay had nothing for this cloud
    SyncedEmpty,
    /// Last message read
    After(Uuid),
}

impl Watermark {
    fn after(&self) -> Option<Uuid> {
        match self {
            Watermark::After(uuid) => Some(*uuid),
            _ => None,
        }
    }
}

/// Messages read while joining a cloud, handed to listeners all at once
pub struct JoinBatch {
    cloud: Iden,
    messages: Vec<Message>,
}

impl JoinBatch {
    pub fn start(cloud: &Iden) -> Self {
        Self {
            cloud: cloud.clone(),
            messages: Vec::new(),
        }
    }

    pub fn accept(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Hand every accepted message to `dispatch`, in the order read
    pub fn commit(self, dispatch: impl Fn(&Iden, &Message)) {
        debug!("Joining {} with {} relay messages", self.cloud, self.messages.len());
        for message in &self.messages {
            dispatch(&self.cloud, message);
        }
    }
}

struct Outbound {
    text: String,
    receipt: Receipt,
}

/// Resets the single-flight flag when a sync ends, however it ends, and
/// wakes a `close` waiting for it
struct SyncGuard<'a>(&'a WwwGateway);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        let _idle = self.0.idle.lock();
        self.0.syncing.store(false, Ordering::Release);
        self.0.sync_finished.notify_all();
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

pub struct WwwGateway {
    client: Box<dyn RelayClient>,
    outbound: Mutex<HashMap<Iden, Vec<Outbound>>>,
    watermarks: Mutex<HashMap<Iden, Watermark>>,
    listeners: Listeners,
    syncing: AtomicBool,
    idle: Mutex<()>,
    sync_finished: Condvar,
    flush_wait: Duration,
    consecutive_rx_errors: AtomicU32,
    max_consecutive_errors: u32,
    log_next_connection_error: AtomicBool,
    sync_period: Duration,
    closed: AtomicBool,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WwwGateway {
    /// Create the gateway and ping the relay; an unreachable relay is only
    /// logged, the sync keeps trying.
    pub fn new(client: Box<dyn RelayClient>, config: &WwwConfig) -> Self {
        if let Err(e) = client.ping() {
            warn!("Unable to ping WWW relay: {}", e);
        }

        Self {
            client,
            outbound: Mutex::new(HashMap::new()),
            watermarks: Mutex::new(HashMap::new()),
            listeners: Listeners::default(),
            syncing: AtomicBool::new(false),
            idle: Mutex::new(()),
            sync_finished: Condvar::new(),
            flush_wait: config.timeout(),
            consecutive_rx_errors: AtomicU32::new(0),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            log_next_connection_error: AtomicBool::new(true),
            sync_period: config.sync_period(),
            closed: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        }
    }

    /// Run TX then RX every sync period on the current tokio runtime. The
    /// blocking sync runs on the blocking pool; the task stops once the
    /// gateway is closed or dropped.
    pub fn start_scheduler(gate: &Arc<Self>) {
        let weak = Arc::downgrade(gate);
        let period = gate.sync_period;
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(gate) = weak.upgrade() else { break };
                if gate.closed.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = tokio::task::spawn_blocking(move || gate.sync()).await {
                    warn!("WWW sync task failed: {}", e);
                }
            }
            debug!("WWW scheduler stopped");
        });
        if let Some(previous) = gate.scheduler.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Full sync (TX then RX). Returns false when another sync was already
    /// running, in which case nothing was done.
    pub fn sync(&self) -> bool {
        self.run_sync(true)
    }

    pub fn watermark(&self, cloud: &Iden) -> Option<Watermark> {
        self.watermarks.lock().get(&cloud.as_entity()).copied()
    }

    pub fn consecutive_rx_errors(&self) -> u32 {
        self.consecutive_rx_errors.load(Ordering::Relaxed)
    }

    /// Messages queued for `cloud` and not yet posted
    pub fn pending(&self, cloud: &Iden) -> usize {
        self.outbound
            .lock()
            .get(&cloud.as_entity())
            .map_or(0, Vec::len)
    }

    fn run_sync(&self, with_rx: bool) -> bool {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Request to sync while syncing was in progress");
            return false;
        }
        let _guard = SyncGuard(self);

        match self.sync_tx() {
            Ok(true) => self.log_next_connection_error.store(true, Ordering::Relaxed),
            Ok(false) => {}
            Err(RelayError::Connection(e)) => {
                self.log_connection_error(&e);
                return true;
            }
            Err(e) => warn!("Unexpected error during sync (TX): {}", e),
        }

        if with_rx {
            match self.sync_rx() {
                Ok(()) => {
                    self.consecutive_rx_errors.store(0, Ordering::Relaxed);
                    self.log_next_connection_error.store(true, Ordering::Relaxed);
                }
                Err(e) => {
                    self.on_rx_error();
                    match e {
                        RelayError::Connection(e) => self.log_connection_error(&e),
                        e => warn!("Unexpected error during sync (RX): {}", e),
                    }
                }
            }
        }
        true
    }

    /// TX-only sync that waits out a sync already in flight, since that one
    /// may have snapshotted the queues before the latest sends
    fn flush(&self) {
        let deadline = Instant::now() + self.flush_wait;
        loop {
            {
                let mut idle = self.idle.lock();
                while self.syncing.load(Ordering::Acquire) {
                    if self.sync_finished.wait_until(&mut idle, deadline).timed_out() {
                        warn!("Sync still running after {:?}, WWW gateway not flushed", self.flush_wait);
                        return;
                    }
                }
            }
            if self.run_sync(false) {
                return;
            }
        }
    }

    fn log_connection_error(&self, error: &str) {
        if self.log_next_connection_error.swap(false, Ordering::Relaxed) {
            warn!("Unable to connect to WWW relay: {}", error);
        }
    }

    fn on_rx_error(&self) {
        let errors = self.consecutive_rx_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if errors >= self.max_consecutive_errors {
            debug!("Too many consecutive errors: resetting all watermarks");
            self.consecutive_rx_errors.store(0, Ordering::Relaxed);
            for watermark in self.watermarks.lock().values_mut() {
                *watermark = Watermark::NeverSynced;
            }
        }
    }

    /// Post every non-empty queue; true when anything was sent
    fn sync_tx(&self) -> Result<bool, RelayError> {
        let batches: Vec<(Iden, String, usize)> = self
            .outbound
            .lock()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(cloud, queue)| {
                let body = queue
                    .iter()
                    .map(|o| o.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                (cloud.clone(), body, queue.len())
            })
            .collect();

        if batches.is_empty() {
            debug!("No messages to send so far");
            return Ok(false);
        }

        for (cloud, body, count) in batches {
            self.client.post_messages(cloud.uuid(), &body)?;
            let sent: Vec<Outbound> = match self.outbound.lock().get_mut(&cloud) {
                Some(queue) => queue.drain(..count.min(queue.len())).collect(),
                None => Vec::new(),
            };
            for outbound in &sent {
                outbound.receipt.set_status(Status::Delivered);
            }
            debug!("Posted {} messages for {}", sent.len(), cloud);
        }
        Ok(true)
    }

    fn sync_rx(&self) -> Result<(), RelayError> {
        let clouds: Vec<(Iden, Watermark)> = self
            .watermarks
            .lock()
            .iter()
            .map(|(c, w)| (c.clone(), *w))
            .collect();

        for (cloud, watermark) in clouds {
            let body = self.client.get_messages(cloud.uuid(), watermark.after())?;
            let messages = body
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(decode_message)
                .collect::<Result<Vec<Message>, CodecError>>()?;
            debug!("Read {} messages for {} after {:?}", messages.len(), cloud, watermark);

            let last = messages.last().map(Message::uuid);
            let joining = watermark == Watermark::NeverSynced;
            let mut batch = joining.then(|| JoinBatch::start(&cloud));
            for message in messages {
                match batch.as_mut() {
                    Some(batch) => batch.accept(message),
                    None => self.listeners.dispatch_for(&cloud, "WWW", &message),
                }
            }

            let next = match last {
                Some(uuid) => Some(Watermark::After(uuid)),
                None if joining => Some(Watermark::SyncedEmpty),
                None => None,
            };
            if let Some(next) = next {
                self.watermarks.lock().insert(cloud.clone(), next);
            }

            if let Some(batch) = batch {
                batch.commit(|cloud, message| self.listeners.dispatch_for(cloud, "WWW", message));
            }
        }
        Ok(())
    }
}

impl Gateway for WwwGateway {
    fn name(&self) -> &'static str {
        "WWW"
    }

    fn send(&self, cloud: &Iden, message: &Message) -> Result<Receipt, GatewayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Closed);
        }
        let text = encode_message(message)?;
        let receipt = Receipt::new(message.uuid(), self.name(), Status::Pending);
        self.outbound
            .lock()
            .entry(cloud.as_entity())
            .or_default()
            .push(Outbound {
                text,
                receipt: receipt.clone(),
            });
        debug!(target: "protocol", "TX(WWW): {} (queued)", message);
        Ok(receipt)
    }

    fn add_listener(&self, cloud: &Iden, listener: Listener) {
        self.watermarks
            .lock()
            .entry(cloud.as_entity())
            .or_insert(Watermark::NeverSynced);
        self.listeners.add(cloud, listener);
    }

    /// The relay is reached outbound only
    fn endpoints(&self) -> BTreeSet<Endpoint> {
        BTreeSet::new()
    }

    /// Stop the scheduler and flush the outbound queues
    fn close(&self) -> Result<(), GatewayError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
        }
        info!("Flushing WWW gateway");
        self.flush();
        Ok(())
    }
}
