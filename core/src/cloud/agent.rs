// Local agents — participants hosted by this process

use crate::identity::Iden;
use std::sync::atomic::{AtomicI64, Ordering};

/// An agent living in this process.
///
/// Owns the sequence counter stamped on every message it sends.
#[derive(Debug)]
pub struct LocalAgent {
    iden: Iden,
    name: String,
    sequence: AtomicI64,
}

impl LocalAgent {
    pub fn new(name: &str) -> Self {
        Self::with_iden(Iden::agent(), name)
    }

    pub fn with_iden(iden: Iden, name: &str) -> Self {
        Self {
            iden,
            name: name.to_string(),
            sequence: AtomicI64::new(0),
        }
    }

    pub fn iden(&self) -> &Iden {
        &self.iden
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next value of the per-agent counter; the first message gets 1
    pub fn next_sequence(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_sequence(&self) -> i64 {
        self.sequence.load(Ordering::SeqCst)
    }
}
