// Multicaster — fans accepted messages out to local listeners

use crate::config::DispatchMode;
use crate::message::Message;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Callback for messages accepted by a cloud
pub type CloudListener = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handle returned by [`Multicaster::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Registry = Arc<RwLock<Vec<(ListenerId, CloudListener)>>>;

/// Delivers every message to all registered listeners, in arrival order.
///
/// In threaded mode delivery happens on one worker thread, so a slow
/// listener delays the ones after it but never the gateways.
pub struct Multicaster {
    listeners: Registry,
    next_id: AtomicU64,
    queue: Mutex<Option<mpsc::Sender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Multicaster {
    pub fn new(mode: DispatchMode) -> Self {
        let listeners: Registry = Arc::default();
        let (queue, worker) = match mode {
            DispatchMode::Inline => (None, None),
            DispatchMode::Threaded => match Self::spawn_worker(listeners.clone()) {
                Ok((tx, handle)) => (Some(tx), Some(handle)),
                Err(e) => {
                    warn!("Unable to start dispatch thread, delivering inline: {}", e);
                    (None, None)
                }
            },
        };

        Self {
            listeners,
            next_id: AtomicU64::new(1),
            queue: Mutex::new(queue),
            worker: Mutex::new(worker),
        }
    }

    fn spawn_worker(
        listeners: Registry,
    ) -> std::io::Result<(mpsc::Sender<Message>, JoinHandle<()>)> {
        let (tx, rx) = mpsc::channel::<Message>();
        let handle = std::thread::Builder::new()
            .name("cloudbus-dispatch".into())
            .spawn(move || {
                for message in rx {
                    deliver(&listeners, &message);
                }
                debug!("Dispatch thread stopped");
            })?;
        Ok((tx, handle))
    }

    pub fn add_listener(&self, listener: CloudListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false when `id` was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(entry, _)| *entry != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn dispatch(&self, message: &Message) {
        let queued = match self.queue.lock().as_ref() {
            Some(tx) => tx.send(message.clone()).is_ok(),
            None => false,
        };
        if !queued {
            deliver(&self.listeners, message);
        }
    }

    /// Stop the worker after it drained what is already queued
    pub fn close(&self) {
        drop(self.queue.lock().take());
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("Dispatch thread panicked");
        }
    }
}

impl Drop for Multicaster {
    fn drop(&mut self) {
        self.close();
    }
}

fn deliver(listeners: &RwLock<Vec<(ListenerId, CloudListener)>>, message: &Message) {
    let snapshot: Vec<CloudListener> = listeners.read().iter().map(|(_, l)| l.clone()).collect();
    for listener in snapshot {
        listener(message);
    }
}
