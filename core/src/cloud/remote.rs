// Remote entities — what a cloud knows about senders it does not own

use crate::identity::Iden;
use crate::message::RestApi;
use crate::transport::Endpoint;
use std::collections::{BTreeMap, BTreeSet};

/// Per-sender sequence state.
///
/// A fresh entity accepts its first message unconditionally; after that
/// only strictly greater sequences are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntity {
    iden: Iden,
    last_accepted_sequence: Option<i64>,
}

impl RemoteEntity {
    pub fn new(iden: Iden) -> Self {
        Self {
            iden,
            last_accepted_sequence: None,
        }
    }

    /// Entity that already accepted `sequence`
    pub fn seeded(iden: Iden, sequence: i64) -> Self {
        Self {
            iden,
            last_accepted_sequence: Some(sequence),
        }
    }

    pub fn iden(&self) -> &Iden {
        &self.iden
    }

    pub fn last_accepted_sequence(&self) -> Option<i64> {
        self.last_accepted_sequence
    }

    pub fn accepts(&self, sequence: i64) -> bool {
        self.last_accepted_sequence.map_or(true, |last| sequence > last)
    }

    /// Record `sequence` as accepted; returns false (and changes nothing)
    /// when it is not acceptable
    pub fn accept(&mut self, sequence: i64) -> bool {
        if !self.accepts(sequence) {
            return false;
        }
        self.last_accepted_sequence = Some(sequence);
        true
    }
}

/// An agent living in another process, learned from its presence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAgent {
    pub(crate) entity: RemoteEntity,
    pub(crate) endpoints: BTreeSet<Endpoint>,
    pub(crate) apis: BTreeMap<String, BTreeSet<RestApi>>,
    pub(crate) last_seen: i64,
}

impl RemoteAgent {
    pub fn new(iden: Iden, endpoints: BTreeSet<Endpoint>, sequence: i64, seen_at: i64) -> Self {
        Self {
            entity: RemoteEntity::seeded(iden, sequence),
            endpoints,
            apis: BTreeMap::new(),
            last_seen: seen_at,
        }
    }

    pub fn iden(&self) -> &Iden {
        self.entity.iden()
    }

    pub fn entity(&self) -> &RemoteEntity {
        &self.entity
    }

    pub fn endpoints(&self) -> &BTreeSet<Endpoint> {
        &self.endpoints
    }

    /// APIs announced through QNE messages, by service name
    pub fn apis(&self) -> &BTreeMap<String, BTreeSet<RestApi>> {
        &self.apis
    }

    /// Epoch millis of the last accepted message from this agent
    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_always_accepted() {
        let entity = RemoteEntity::new(Iden::agent());
        assert!(entity.accepts(i64::MIN));
        assert!(entity.accepts(0));
    }

    #[test]
    fn test_strictly_increasing() {
        let mut entity = RemoteEntity::new(Iden::agent());
        assert!(entity.accept(10));
        assert!(entity.accepts(11));
        assert!(!entity.accepts(10));
        assert!(!entity.accepts(9));

        assert!(!entity.accept(5));
        assert_eq!(entity.last_accepted_sequence(), Some(10));
        assert!(entity.accept(11));
        assert_eq!(entity.last_accepted_sequence(), Some(11));
    }

    #[test]
    fn test_seeded_entity() {
        let agent = RemoteAgent::new(Iden::agent(), BTreeSet::new(), 7, 0);
        assert!(!agent.entity().accepts(7));
        assert!(agent.entity().accepts(8));
    }
}
