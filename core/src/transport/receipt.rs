//! Delivery receipts.
//!
//! A [`Receipt`] tracks one message through one gateway; its status can move
//! from `Pending` to `Delivered` after the send returned (relay flush). A
//! [`MultiReceipt`] aggregates the receipts of every gateway a message went
//! through.

use crate::message::Status;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Receipt {
    message: Uuid,
    gateway: &'static str,
    status: Arc<watch::Sender<Status>>,
}

impl Receipt {
    pub fn new(message: Uuid, gateway: &'static str, status: Status) -> Self {
        let (tx, _) = watch::channel(status);
        Self {
            message,
            gateway,
            status: Arc::new(tx),
        }
    }

    pub fn message_uuid(&self) -> Uuid {
        self.message
    }

    pub fn gateway(&self) -> &'static str {
        self.gateway
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// Update the status; every clone of this receipt sees the change
    pub fn set_status(&self, status: Status) {
        self.status.send_replace(status);
    }

    /// Resolves once the receipt is no longer `Pending`
    pub async fn settled(&self) -> Status {
        let mut rx = self.status.subscribe();
        let result = rx.wait_for(|s| *s != Status::Pending).await.map(|s| *s);
        // The sender lives in `self`, so the channel cannot close underneath us
        result.unwrap_or(Status::Unknown)
    }
}

/// Receipts of one message across all gateways
#[derive(Debug, Clone)]
pub struct MultiReceipt {
    message: Uuid,
    receipts: Vec<Receipt>,
}

impl MultiReceipt {
    pub fn new(message: Uuid) -> Self {
        Self {
            message,
            receipts: Vec::new(),
        }
    }

    pub fn add(&mut self, receipt: Receipt) {
        self.receipts.push(receipt);
    }

    pub fn message_uuid(&self) -> Uuid {
        self.message
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    /// Delivered if any gateway delivered, else pending if any is still
    /// pending, else unknown
    pub fn status(&self) -> Status {
        let statuses: Vec<Status> = self.receipts.iter().map(Receipt::status).collect();
        if statuses.contains(&Status::Delivered) {
            Status::Delivered
        } else if statuses.contains(&Status::Pending) {
            Status::Pending
        } else {
            Status::Unknown
        }
    }

    /// Wait for every receipt to settle, up to `timeout`.
    ///
    /// On timeout the wait is abandoned and the current aggregate returned;
    /// nothing is cancelled.
    pub async fn wait(&self, timeout: Duration) -> Status {
        let all = join_all(self.receipts.iter().map(Receipt::settled));
        let _ = tokio::time::timeout(timeout, all).await;
        self.status()
    }
}
