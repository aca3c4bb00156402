//! Connection and registration bookkeeping.
//!
//! [`SubscriberStorage`] keeps, per connection, the init payload captured at
//! handshake and the registrations created by `start` frames, plus a topic
//! index (`topic → connections holding a registration for it`). All
//! mutation goes through the trait's operations; none of them fail on
//! unknown ids.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{ConnectionId, RegistrationId};
use serde_json::{Map, Value};

use crate::drivers::DriverRegistry;
use crate::errors::SubscriptionError;
use crate::registration::Registration;

pub use memory::MemoryStorage;

/// Name of the built-in in-memory driver.
pub const MEMORY_DRIVER: &str = "memory";

/// Read-only view of one connection slot.
#[derive(Clone, Debug)]
pub struct ConnectionSummary {
    /// Connection id.
    pub id: ConnectionId,
    /// Stored init payload.
    pub init: Map<String, Value>,
    /// Registrations in creation order.
    pub registrations: Vec<Arc<Registration>>,
}

/// Registry storage backend.
pub trait SubscriberStorage: Send + Sync {
    /// Every connection slot in open order.
    fn all(&self) -> Vec<ConnectionSummary>;

    /// Registrations for `topic`, grouped by connection in open order.
    fn registrations_for(&self, topic: &str) -> Vec<Arc<Registration>>;

    /// Connections indexed under `topic`.
    fn connections_for(&self, topic: &str) -> Vec<ConnectionId>;

    /// One connection slot.
    fn find(&self, connection_id: &ConnectionId) -> Option<ConnectionSummary>;

    /// Stored init payload (empty when unknown).
    fn init_payload(&self, connection_id: &ConnectionId) -> Map<String, Value>;

    /// Create a slot. An existing slot keeps its init.
    fn open(&self, connection_id: &ConnectionId, init: Map<String, Value>);

    /// Store `registration`, stamping it with a copy of the connection's
    /// init. A registration with the same id on the same connection is
    /// replaced.
    fn register(&self, registration: Registration) -> Arc<Registration>;

    /// Drop one registration.
    fn unregister(&self, connection_id: &ConnectionId, registration_id: &RegistrationId);

    /// Drop a connection and every registration it owns.
    fn close(&self, connection_id: &ConnectionId);

    /// Total registrations across all connections.
    fn registration_count(&self) -> usize;
}

/// Named storage driver resolution.
pub struct RegistryManager {
    drivers: DriverRegistry<dyn SubscriberStorage>,
}

impl RegistryManager {
    /// Manager with the built-in `memory` driver.
    pub fn new(default: impl Into<String>) -> Self {
        let manager = Self {
            drivers: DriverRegistry::new("storage", default),
        };
        manager.extend(MEMORY_DRIVER, || {
            let storage: Arc<dyn SubscriberStorage> = Arc::new(MemoryStorage::new());
            Ok(storage)
        });
        manager
    }

    /// Register a custom storage factory.
    pub fn extend<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn SubscriberStorage>, SubscriptionError> + Send + Sync + 'static,
    {
        self.drivers.extend(name, factory);
    }

    /// Resolve a storage driver by name.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn SubscriberStorage>, SubscriptionError> {
        self.drivers.driver(name)
    }

    /// Resolve the default storage driver.
    pub fn build(&self) -> Result<Arc<dyn SubscriberStorage>, SubscriptionError> {
        self.drivers.resolve_default()
    }

    /// Default driver name.
    pub fn default_driver(&self) -> String {
        self.drivers.default_driver()
    }

    /// Change the default driver.
    pub fn set_default_driver(&self, name: impl Into<String>) {
        self.drivers.set_default_driver(name);
    }

    /// Registrations for `topic` in the default storage, keyed by connection.
    pub fn subscribers(
        &self,
        topic: &str,
    ) -> Result<HashMap<ConnectionId, Vec<Arc<Registration>>>, SubscriptionError> {
        let storage = self.build()?;
        let mut grouped: HashMap<ConnectionId, Vec<Arc<Registration>>> = HashMap::new();
        for registration in storage.registrations_for(topic) {
            grouped
                .entry(registration.connection_id.clone())
                .or_default()
                .push(registration);
        }
        Ok(grouped)
    }
}

impl Default for RegistryManager {
    fn default() -> Self {
        Self::new(MEMORY_DRIVER)
    }
}
