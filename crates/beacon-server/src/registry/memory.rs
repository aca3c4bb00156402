//! In-process registry storage.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use beacon_core::{ConnectionId, RegistrationId};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use super::{ConnectionSummary, SubscriberStorage};
use crate::registration::Registration;

struct Slot {
    seq: u64,
    init: Map<String, Value>,
    registrations: Vec<Arc<Registration>>,
}

impl Slot {
    fn holds_topic(&self, topic: &str) -> bool {
        self.registrations.iter().any(|r| r.topic == topic)
    }

    fn summary(&self, id: &ConnectionId) -> ConnectionSummary {
        ConnectionSummary {
            id: id.clone(),
            init: self.init.clone(),
            registrations: self.registrations.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<ConnectionId, Slot>,
    topics: HashMap<String, HashSet<ConnectionId>>,
    next_seq: u64,
}

impl Inner {
    fn slot_mut(&mut self, id: &ConnectionId) -> &mut Slot {
        let seq = self.next_seq;
        let slot = self.slots.entry(id.clone()).or_insert_with(|| Slot {
            seq,
            init: Map::new(),
            registrations: Vec::new(),
        });
        if slot.seq == seq {
            self.next_seq += 1;
        }
        slot
    }

    /// Drop `id` from `topic`'s index unless the slot still holds it.
    fn reindex(&mut self, id: &ConnectionId, topic: &str) {
        let still_held = self.slots.get(id).is_some_and(|slot| slot.holds_topic(topic));
        if still_held {
            return;
        }
        if let Some(set) = self.topics.get_mut(topic) {
            let _ = set.remove(id);
            if set.is_empty() {
                let _ = self.topics.remove(topic);
            }
        }
    }

    fn ordered_slots(&self) -> Vec<(&ConnectionId, &Slot)> {
        let mut slots: Vec<_> = self.slots.iter().collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        slots
    }
}

/// [`SubscriberStorage`] held in process memory behind one lock.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connection slots.
    pub fn connection_count(&self) -> usize {
        self.inner.read().slots.len()
    }

    /// Indexed topic names, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.read().topics.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl SubscriberStorage for MemoryStorage {
    fn all(&self) -> Vec<ConnectionSummary> {
        let inner = self.inner.read();
        inner
            .ordered_slots()
            .into_iter()
            .map(|(id, slot)| slot.summary(id))
            .collect()
    }

    fn registrations_for(&self, topic: &str) -> Vec<Arc<Registration>> {
        let inner = self.inner.read();
        let Some(ids) = inner.topics.get(topic) else {
            return Vec::new();
        };
        inner
            .ordered_slots()
            .into_iter()
            .filter(|(id, _)| ids.contains(*id))
            .flat_map(|(_, slot)| slot.registrations.iter().filter(|r| r.topic == topic))
            .cloned()
            .collect()
    }

    fn connections_for(&self, topic: &str) -> Vec<ConnectionId> {
        let inner = self.inner.read();
        inner
            .topics
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn find(&self, connection_id: &ConnectionId) -> Option<ConnectionSummary> {
        let inner = self.inner.read();
        inner
            .slots
            .get(connection_id)
            .map(|slot| slot.summary(connection_id))
    }

    fn init_payload(&self, connection_id: &ConnectionId) -> Map<String, Value> {
        self.inner
            .read()
            .slots
            .get(connection_id)
            .map(|slot| slot.init.clone())
            .unwrap_or_default()
    }

    fn open(&self, connection_id: &ConnectionId, init: Map<String, Value>) {
        let mut inner = self.inner.write();
        if inner.slots.contains_key(connection_id) {
            debug!(connection_id = %connection_id, "connection already open, keeping init");
            return;
        }
        inner.slot_mut(connection_id).init = init;
    }

    fn register(&self, registration: Registration) -> Arc<Registration> {
        let mut inner = self.inner.write();
        let connection_id = registration.connection_id.clone();
        let slot = inner.slot_mut(&connection_id);
        let registration = Arc::new(registration.with_init_payload(slot.init.clone()));

        let mut displaced = Vec::new();
        slot.registrations.retain(|r| {
            let same = r.id == registration.id;
            if same {
                displaced.push(r.topic.clone());
            }
            !same
        });
        slot.registrations.push(Arc::clone(&registration));

        for topic in displaced {
            inner.reindex(&connection_id, &topic);
        }
        let _ = inner
            .topics
            .entry(registration.topic.clone())
            .or_default()
            .insert(connection_id);
        registration
    }

    fn unregister(&self, connection_id: &ConnectionId, registration_id: &RegistrationId) {
        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.get_mut(connection_id) else {
            return;
        };
        let mut removed = Vec::new();
        slot.registrations.retain(|r| {
            let hit = &r.id == registration_id;
            if hit {
                removed.push(r.topic.clone());
            }
            !hit
        });
        for topic in removed {
            inner.reindex(connection_id, &topic);
        }
    }

    fn close(&self, connection_id: &ConnectionId) {
        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.remove(connection_id) else {
            return;
        };
        let topics: HashSet<String> = slot.registrations.iter().map(|r| r.topic.clone()).collect();
        for topic in topics {
            inner.reindex(connection_id, &topic);
        }
    }

    fn registration_count(&self) -> usize {
        self.inner
            .read()
            .slots
            .values()
            .map(|slot| slot.registrations.len())
            .sum()
    }
}
