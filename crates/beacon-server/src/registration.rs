//! A client's live interest in one topic.

use std::sync::Arc;

use beacon_core::{ConnectionId, RegistrationId};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use crate::context::{ContextManager, SubscriptionContext};
use crate::errors::SubscriptionError;
use crate::protocol::{StartPayload, handle_key};

/// One registration created by a `start` frame.
///
/// `init_payload` is stamped by the registry at register time from the
/// owning connection's stored init; it is a copy, never shared with the
/// registry's slot.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Client-chosen id, unique within the connection.
    pub id: RegistrationId,
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Topic the registration listens to.
    pub topic: String,
    /// Subscription document.
    pub query: String,
    /// Operation variables.
    pub variables: Map<String, Value>,
    /// Selected operation.
    pub operation_name: Option<String>,
    /// Snapshot of the connection's init payload.
    pub init_payload: Map<String, Value>,
    context: OnceCell<Arc<SubscriptionContext>>,
}

impl Registration {
    /// Build from a parsed `start` payload and a resolved topic.
    pub fn new(
        id: RegistrationId,
        connection_id: ConnectionId,
        topic: impl Into<String>,
        params: StartPayload,
    ) -> Self {
        Self {
            id,
            connection_id,
            topic: topic.into(),
            query: params.query,
            variables: params.variables,
            operation_name: params.operation_name,
            init_payload: Map::new(),
            context: OnceCell::new(),
        }
    }

    /// Replace the init snapshot.
    #[must_use]
    pub fn with_init_payload(mut self, init: Map<String, Value>) -> Self {
        self.init_payload = init;
        self
    }

    /// Namespaced topic key.
    pub fn handle_key(&self) -> String {
        handle_key(&self.topic)
    }

    /// Context for this registration, built on first use by the manager's
    /// default driver and cached for the registration's lifetime.
    pub async fn context(
        &self,
        contexts: &ContextManager,
    ) -> Result<Arc<SubscriptionContext>, SubscriptionError> {
        self.context
            .get_or_try_init(|| async { contexts.context_for(self).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Cached context, if already built.
    pub fn cached_context(&self) -> Option<&Arc<SubscriptionContext>> {
        self.context.get()
    }
}
