//! Per-connection protocol state machine and local fan-out.
//!
//! [`TransportManager`] owns the live-client set and is handed the registry,
//! context manager, topic bindings, and resolver at construction. Sessions
//! feed it inbound text frames; the broadcast bridge feeds it topic events
//! and keep-alives received from the shared pub/sub channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use beacon_core::{ConnectionId, RegistrationId};
use metrics::counter;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use crate::context::{AUTHORIZATION_KEY, ContextManager};
use crate::errors::SubscriptionError;
use crate::metrics::{
    BROADCAST_DELIVERIES_TOTAL, BROADCAST_EVENTS_TOTAL, SUBSCRIPTION_REGISTRATIONS_TOTAL,
    WS_BROADCAST_DROPS_TOTAL,
};
use crate::protocol::{ClientFrame, FrameId, ServerFrame, StartPayload, restore_references, topic_key};
use crate::registration::Registration;
use crate::registry::SubscriberStorage;
use crate::topics::{ExecutionRequest, Resolver, TopicBindings};

/// Lifetime message drops before a slow client is evicted.
const MAX_TOTAL_DROPS: u64 = 100;

/// Message shown when a topic handler rejects a registration.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized subscription request";

/// What the session should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// Close the socket without a reply.
    Close,
}

/// Protocol handler and live-client set.
pub struct TransportManager {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    active_count: AtomicUsize,
    registry: Arc<dyn SubscriberStorage>,
    contexts: Arc<ContextManager>,
    topics: Arc<TopicBindings>,
    resolver: Arc<dyn Resolver>,
}

impl TransportManager {
    /// Wire up a transport from its collaborators.
    pub fn new(
        registry: Arc<dyn SubscriberStorage>,
        contexts: Arc<ContextManager>,
        topics: Arc<TopicBindings>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            registry,
            contexts,
            topics,
            resolver,
        }
    }

    /// Registry handle.
    pub fn registry(&self) -> &Arc<dyn SubscriberStorage> {
        &self.registry
    }

    // ── Live-client set ─────────────────────────────────────────────

    /// Add a connection to the live set.
    pub async fn attach(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        if conns.insert(connection.id.clone(), connection).is_none() {
            let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop a connection: registry slot first, then the live set.
    pub async fn detach(&self, connection_id: &ConnectionId) {
        self.registry.close(connection_id);
        let mut conns = self.connections.write().await;
        if conns.remove(connection_id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Whether `connection_id` is in the live set.
    pub async fn is_attached(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    // ── Inbound frames ──────────────────────────────────────────────

    /// Handle one inbound text frame from `connection`.
    #[instrument(skip_all, fields(client_id = %connection.id))]
    pub async fn handle_message(&self, connection: &ClientConnection, text: &str) -> Disposition {
        let Some(frame) = ClientFrame::decode(text) else {
            info!(len = text.len(), "unrecognized frame, closing connection");
            return Disposition::Close;
        };

        let reply = match frame {
            ClientFrame::ConnectionInit { payload } => self.handle_init(connection, payload),
            ClientFrame::Start { id, payload } => self.handle_start(connection, id, payload).await,
            ClientFrame::Stop { id } => {
                let id = RegistrationId::from(id);
                debug!(registration_id = %id, "stop");
                self.registry.unregister(&connection.id, &id);
                ServerFrame::ConnectionAck
            }
        };

        if !connection.send_frame(&reply) {
            info!("failed to enqueue reply (channel full or closed)");
        }
        Disposition::Continue
    }

    fn handle_init(&self, connection: &ClientConnection, payload: Option<Value>) -> ServerFrame {
        let mut init = match payload {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                warn!("connection_init payload is not an object");
                return ServerFrame::connection_error("connection_init payload must be an object");
            }
        };
        if let Some(token) = connection.credential() {
            let _ = init
                .entry(AUTHORIZATION_KEY)
                .or_insert_with(|| Value::String(format!("Bearer {token}")));
        }
        self.registry.open(&connection.id, init);
        debug!("connection initialized");
        ServerFrame::ConnectionAck
    }

    async fn handle_start(
        &self,
        connection: &ClientConnection,
        id: Option<FrameId>,
        payload: Value,
    ) -> ServerFrame {
        let Some(id) = id.map(RegistrationId::from) else {
            return ServerFrame::error(None, &SubscriptionError::invalid("start frame requires an id"));
        };
        match self.register(&connection.id, id.clone(), payload).await {
            Ok(registration) => {
                counter!(SUBSCRIPTION_REGISTRATIONS_TOTAL).increment(1);
                info!(registration_id = %id, topic = %registration.topic, "registered");
                ServerFrame::ConnectionAck
            }
            Err(e) => {
                info!(registration_id = %id, code = e.code(), error = %e, "registration rejected");
                ServerFrame::error(Some(id), &e)
            }
        }
    }

    /// Validate, authorize, and store a registration.
    pub async fn register(
        &self,
        connection_id: &ConnectionId,
        id: RegistrationId,
        payload: Value,
    ) -> Result<Arc<Registration>, SubscriptionError> {
        let params = StartPayload::parse(payload)?;
        let explicit = params.topic.clone();
        let topic = topic_key(&params, explicit.as_deref())?.ok_or(SubscriptionError::MissingTopic)?;

        let init = self.registry.init_payload(connection_id);
        let registration =
            Registration::new(id, connection_id.clone(), topic, params).with_init_payload(init);
        let context = registration.context(&self.contexts).await?;

        if let Some(handler) = self.topics.for_registration(&registration) {
            if !handler
                .authorize(&registration, &context, &registration.variables)
                .await
            {
                return Err(SubscriptionError::Unauthorized {
                    message: UNAUTHORIZED_MESSAGE.to_string(),
                });
            }
        }

        Ok(self.registry.register(registration))
    }

    // ── Outbound fan-out ────────────────────────────────────────────

    /// Deliver `event` to every matching registration of `topic` on this
    /// process. Returns the number of frames queued.
    #[instrument(skip(self, event))]
    pub async fn broadcast(&self, topic: &str, event: Value) -> usize {
        let Some(handler) = self.topics.get(topic) else {
            debug!("no handler bound, dropping event");
            return 0;
        };
        let registrations = self.registry.registrations_for(topic);
        if registrations.is_empty() {
            debug!("no registrations, dropping event");
            return 0;
        }
        counter!(BROADCAST_EVENTS_TOTAL).increment(1);

        let event = restore_references(event, self.resolver.as_ref()).await;
        let event = handler.transform(event).await;

        let live: HashMap<ConnectionId, Arc<ClientConnection>> = {
            let conns = self.connections.read().await;
            registrations
                .iter()
                .filter_map(|r| {
                    conns
                        .get(&r.connection_id)
                        .map(|c| (r.connection_id.clone(), Arc::clone(c)))
                })
                .collect()
        };

        let mut delivered = 0usize;
        let mut slow = Vec::new();
        for registration in &registrations {
            let Some(connection) = live.get(&registration.connection_id) else {
                continue;
            };
            if !handler.filter(registration, &event).await {
                continue;
            }

            let frame = match self.execute(registration, &event).await {
                Ok(payload) => ServerFrame::Data {
                    id: registration.id.clone(),
                    payload,
                },
                Err(e) => {
                    warn!(registration_id = %registration.id, error = %e, "resolver failed");
                    ServerFrame::error(Some(registration.id.clone()), &e)
                }
            };
            if self.deliver(connection, &frame, topic) {
                delivered += 1;
            } else if connection.drop_count() >= MAX_TOTAL_DROPS {
                slow.push(Arc::clone(connection));
            }
        }

        counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(recipients = registrations.len(), delivered, "broadcast event");
        self.evict(slow).await;
        delivered
    }

    async fn execute(
        &self,
        registration: &Registration,
        event: &Value,
    ) -> Result<Value, SubscriptionError> {
        let context = registration.context(&self.contexts).await?;
        self.resolver
            .execute(ExecutionRequest::for_registration(registration, event), &context)
            .await
    }

    /// Send a keep-alive frame to every live connection, registered or not.
    pub async fn keep_alive(&self) -> usize {
        let Some(json) = ServerFrame::KeepAlive.encode() else {
            return 0;
        };
        let mut sent = 0usize;
        let mut slow = Vec::new();
        {
            let conns = self.connections.read().await;
            for conn in conns.values() {
                if conn.send(Arc::clone(&json)) {
                    sent += 1;
                } else {
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    if conn.drop_count() >= MAX_TOTAL_DROPS {
                        slow.push(Arc::clone(conn));
                    }
                }
            }
        }
        debug!(sent, "keep-alive fan-out");
        self.evict(slow).await;
        sent
    }

    fn deliver(&self, connection: &ClientConnection, frame: &ServerFrame, topic: &str) -> bool {
        if connection.send_frame(frame) {
            return true;
        }
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        warn!(
            conn_id = %connection.id,
            topic,
            total_drops = connection.drop_count(),
            "failed to send frame to client (channel full or closed)"
        );
        false
    }

    async fn evict(&self, slow: Vec<Arc<ClientConnection>>) {
        if slow.is_empty() {
            return;
        }
        for conn in &slow {
            warn!(conn_id = %conn.id, drops = conn.drop_count(), "disconnecting slow client");
            conn.evict();
        }
        let mut conns = self.connections.write().await;
        for conn in slow {
            if conns.remove(&conn.id).is_some() {
                let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SubscriptionContext;
    use crate::protocol::ObjectRef;
    use crate::registry::MemoryStorage;
    use crate::topics::{PassthroughTopic, RootValueResolver, TopicHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Filters on `event.author == variables.author`; counts every hook call.
    #[derive(Default)]
    struct AuthorTopic {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TopicHandler for AuthorTopic {
        async fn authorize(
            &self,
            _registration: &Registration,
            _context: &SubscriptionContext,
            variables: &Map<String, Value>,
        ) -> bool {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            variables.get("author").is_some()
        }

        async fn filter(&self, registration: &Registration, event: &Value) -> bool {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            registration.variables.get("author") == event.get("author")
        }

        async fn transform(&self, mut event: Value) -> Value {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            event["seen"] = json!(true);
            event
        }
    }

    struct Harness {
        transport: TransportManager,
        storage: Arc<MemoryStorage>,
        author: Arc<AuthorTopic>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let author = Arc::new(AuthorTopic::default());
        let mut bindings = TopicBindings::new();
        bindings.bind("postCreated", author.clone());
        bindings.bind("postUpdated", Arc::new(PassthroughTopic));
        let bindings = Arc::new(bindings);
        let transport = TransportManager::new(
            storage.clone(),
            Arc::new(ContextManager::default()),
            bindings.clone(),
            Arc::new(RootValueResolver::new(bindings)),
        );
        Harness {
            transport,
            storage,
            author,
        }
    }

    fn connect(
        id: &str,
        credential: Option<&str>,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(id.into(), tx).with_credential(credential.map(Into::into));
        (Arc::new(conn), rx)
    }

    fn next_frame(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        let msg = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&msg).unwrap()
    }

    async fn init_and_start(
        h: &Harness,
        conn: &ClientConnection,
        rx: &mut mpsc::Receiver<Arc<String>>,
        id: &str,
        query: &str,
        variables: Value,
    ) {
        let _ = h
            .transport
            .handle_message(conn, r#"{"type":"connection_init","payload":{}}"#)
            .await;
        assert_eq!(next_frame(rx)["type"], "connection_ack");
        let start = json!({
            "type": "start",
            "id": id,
            "payload": {"query": query, "variables": variables}
        });
        let _ = h.transport.handle_message(conn, &start.to_string()).await;
        assert_eq!(next_frame(rx)["type"], "connection_ack");
    }

    #[tokio::test]
    async fn init_stores_payload_and_injects_cookie_credential() {
        let h = harness();
        let (conn, mut rx) = connect("c1", Some("tok"));
        let d = h
            .transport
            .handle_message(&conn, r#"{"type":"connection_init","payload":{"locale":"en"}}"#)
            .await;
        assert_eq!(d, Disposition::Continue);
        assert_eq!(next_frame(&mut rx)["type"], "connection_ack");
        let init = h.storage.init_payload(&conn.id);
        assert_eq!(init["locale"], "en");
        assert_eq!(init["Authorization"], "Bearer tok");
    }

    #[tokio::test]
    async fn init_keeps_explicit_authorization() {
        let h = harness();
        let (conn, mut rx) = connect("c1", Some("cookie"));
        let _ = h
            .transport
            .handle_message(
                &conn,
                r#"{"type":"connection_init","payload":{"Authorization":"Bearer explicit"}}"#,
            )
            .await;
        let _ = next_frame(&mut rx);
        assert_eq!(h.storage.init_payload(&conn.id)["Authorization"], "Bearer explicit");
    }

    #[tokio::test]
    async fn non_object_init_is_connection_error() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        let d = h
            .transport
            .handle_message(&conn, r#"{"type":"connection_init","payload":[1]}"#)
            .await;
        assert_eq!(d, Disposition::Continue);
        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "connection_error");
        assert!(frame["payload"]["errors"][0]["message"].is_string());
        assert!(h.storage.find(&conn.id).is_none());
    }

    #[tokio::test]
    async fn start_without_query_is_structured_error() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        let _ = h
            .transport
            .handle_message(&conn, r#"{"type":"start","id":"sub-1","payload":{"variables":{}}}"#)
            .await;
        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["id"], "sub-1");
        let errors = frame["payload"]["errors"].as_array().unwrap();
        assert!(!errors.is_empty());
        assert_eq!(errors[0]["extensions"]["code"], "BAD_REQUEST");
        assert_eq!(h.storage.registration_count(), 0);
    }

    #[tokio::test]
    async fn start_with_unparsable_query_is_error() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        let _ = h
            .transport
            .handle_message(
                &conn,
                r#"{"type":"start","id":"1","payload":{"query":"subscription { broken"}}"#,
            )
            .await;
        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["errors"][0]["extensions"]["code"], "BAD_REQUEST");
        assert_eq!(h.storage.registration_count(), 0);
    }

    #[tokio::test]
    async fn start_without_subscription_field_is_missing_topic() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        let _ = h
            .transport
            .handle_message(&conn, r#"{"type":"start","id":"1","payload":{"query":"{ me }"}}"#)
            .await;
        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(h.storage.registration_count(), 0);
    }

    #[tokio::test]
    async fn unauthorized_start_is_forbidden() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        let _ = h
            .transport
            .handle_message(
                &conn,
                r#"{"type":"start","id":"9","payload":{"query":"subscription { postCreated { id } }"}}"#,
            )
            .await;
        let frame = next_frame(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["id"], "9");
        assert_eq!(frame["payload"]["errors"][0]["message"], UNAUTHORIZED_MESSAGE);
        assert_eq!(frame["payload"]["errors"][0]["extensions"]["code"], "FORBIDDEN");
        assert_eq!(h.storage.registration_count(), 0);
    }

    #[tokio::test]
    async fn start_for_unbound_topic_registers() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        init_and_start(&h, &conn, &mut rx, "1", "subscription { unbound { id } }", json!({})).await;
        assert_eq!(h.storage.registrations_for("unbound").len(), 1);
    }

    #[tokio::test]
    async fn client_operation_name_does_not_block_registration() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        let _ = h
            .transport
            .handle_message(&conn, r#"{"type":"connection_init","payload":{}}"#)
            .await;
        assert_eq!(next_frame(&mut rx)["type"], "connection_ack");

        let start = json!({
            "type": "start",
            "id": "1",
            "payload": {
                "query": "subscription { postUpdated { id } }",
                "operationName": "OnPost"
            }
        });
        let d = h.transport.handle_message(&conn, &start.to_string()).await;
        assert_eq!(d, Disposition::Continue);
        assert_eq!(next_frame(&mut rx)["type"], "connection_ack");

        let registrations = h.storage.registrations_for("postUpdated");
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].operation_name.as_deref(), Some("OnPost"));

        assert_eq!(h.transport.broadcast("postUpdated", json!({"id": 4})).await, 1);
        assert_eq!(next_frame(&mut rx)["payload"]["data"]["postUpdated"]["id"], 4);
    }

    #[tokio::test]
    async fn stop_unregisters_and_acks() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        init_and_start(&h, &conn, &mut rx, "1", "subscription { postUpdated { id } }", json!({})).await;
        let _ = h
            .transport
            .handle_message(&conn, r#"{"type":"stop","id":"1"}"#)
            .await;
        assert_eq!(next_frame(&mut rx)["type"], "connection_ack");
        assert_eq!(h.storage.registration_count(), 0);
        // Stopping again is harmless.
        let _ = h
            .transport
            .handle_message(&conn, r#"{"type":"stop","id":"1"}"#)
            .await;
        assert_eq!(next_frame(&mut rx)["type"], "connection_ack");
    }

    #[tokio::test]
    async fn unknown_frames_close_without_reply() {
        let h = harness();
        let (conn, mut rx) = connect("c1", None);
        for text in [r#"{"type":"connection_terminate"}"#, "garbage", r#"{"type":"subscribe"}"#] {
            assert_eq!(h.transport.handle_message(&conn, text).await, Disposition::Close);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_without_registrations_calls_nothing() {
        let h = harness();
        let delivered = h.transport.broadcast("postCreated", json!({"author": 1})).await;
        assert_eq!(delivered, 0);
        assert_eq!(h.author.calls.load(Ordering::SeqCst), 0);

        let delivered = h.transport.broadcast("unbound", json!({})).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn filter_selects_one_of_two_connections() {
        let h = harness();
        let (c1, mut rx1) = connect("c1", None);
        let (c2, mut rx2) = connect("c2", None);
        h.transport.attach(c1.clone()).await;
        h.transport.attach(c2.clone()).await;
        let q = "subscription { postCreated { id } }";
        init_and_start(&h, &c1, &mut rx1, "a", q, json!({"author": 1})).await;
        init_and_start(&h, &c2, &mut rx2, "b", q, json!({"author": 2})).await;

        let delivered = h
            .transport
            .broadcast("postCreated", json!({"author": 2, "id": 10}))
            .await;
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_err());
        let frame = next_frame(&mut rx2);
        assert_eq!(frame["type"], "data");
        assert_eq!(frame["id"], "b");
        assert_eq!(frame["payload"]["data"]["postCreated"]["id"], 10);
        assert_eq!(frame["payload"]["data"]["postCreated"]["seen"], true);
    }

    #[tokio::test]
    async fn every_matching_registration_on_a_connection_receives() {
        let h = harness();
        let (c1, mut rx) = connect("c1", None);
        h.transport.attach(c1.clone()).await;
        let q = "subscription { postUpdated { id } }";
        init_and_start(&h, &c1, &mut rx, "1", q, json!({})).await;
        let start = json!({"type": "start", "id": "2", "payload": {"query": q}});
        let _ = h.transport.handle_message(&c1, &start.to_string()).await;
        let _ = next_frame(&mut rx);

        assert_eq!(h.transport.broadcast("postUpdated", json!({"id": 1})).await, 2);
        let ids: Vec<Value> = (0..2).map(|_| next_frame(&mut rx)["id"].clone()).collect();
        assert_eq!(ids, vec![json!("1"), json!("2")]);
    }

    #[tokio::test]
    async fn detached_connections_are_skipped() {
        let h = harness();
        let (c1, mut rx) = connect("c1", None);
        init_and_start(&h, &c1, &mut rx, "1", "subscription { postUpdated { id } }", json!({})).await;
        // Registered but never attached to the live set.
        assert_eq!(h.transport.broadcast("postUpdated", json!({})).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn detach_closes_registry_slot() {
        let h = harness();
        let (c1, mut rx) = connect("c1", None);
        h.transport.attach(c1.clone()).await;
        init_and_start(&h, &c1, &mut rx, "1", "subscription { postUpdated { id } }", json!({})).await;
        assert_eq!(h.transport.connection_count(), 1);
        h.transport.detach(&c1.id).await;
        assert_eq!(h.transport.connection_count(), 0);
        assert!(h.storage.find(&c1.id).is_none());
        assert!(h.storage.registrations_for("postUpdated").is_empty());
    }

    #[tokio::test]
    async fn keep_alive_reaches_connections_without_registrations() {
        let h = harness();
        let (c1, mut rx1) = connect("c1", None);
        let (c2, mut rx2) = connect("c2", None);
        h.transport.attach(c1).await;
        h.transport.attach(c2).await;
        assert_eq!(h.transport.keep_alive().await, 2);
        assert_eq!(next_frame(&mut rx1)["type"], "ka");
        assert_eq!(next_frame(&mut rx2)["type"], "ka");
    }

    #[tokio::test]
    async fn references_restored_before_transform() {
        let h = harness();
        let (c1, mut rx) = connect("c1", None);
        h.transport.attach(c1.clone()).await;
        init_and_start(&h, &c1, &mut rx, "1", "subscription { postUpdated { id } }", json!({})).await;
        let event = json!({"post": ObjectRef::new("Post", 5).encode()});
        assert_eq!(h.transport.broadcast("postUpdated", event).await, 1);
        let frame = next_frame(&mut rx);
        assert_eq!(frame["payload"]["data"]["postUpdated"]["post"]["class"], "Post");
        assert_eq!(frame["payload"]["data"]["postUpdated"]["post"]["id"], 5);
    }

    struct FailingResolver;

    #[async_trait]
    impl Resolver for FailingResolver {
        async fn execute(
            &self,
            request: ExecutionRequest<'_>,
            _context: &SubscriptionContext,
        ) -> Result<Value, SubscriptionError> {
            if request.variables.get("fail").is_some() {
                Err(SubscriptionError::Resolver {
                    message: "downstream failed".into(),
                })
            } else {
                Ok(json!({"data": {"ok": true}}))
            }
        }
    }

    #[tokio::test]
    async fn resolver_failure_only_affects_its_registration() {
        let storage = Arc::new(MemoryStorage::new());
        let mut bindings = TopicBindings::new();
        bindings.bind_passthrough(["t"]);
        let transport = TransportManager::new(
            storage,
            Arc::new(ContextManager::default()),
            Arc::new(bindings),
            Arc::new(FailingResolver),
        );
        let (c1, mut rx) = connect("c1", None);
        transport.attach(c1.clone()).await;
        for (id, vars) in [("bad", json!({"fail": 1})), ("good", json!({}))] {
            let start = json!({"type": "start", "id": id, "payload": {"query": "subscription { t }", "variables": vars}});
            let _ = transport.handle_message(&c1, &start.to_string()).await;
            assert_eq!(next_frame(&mut rx)["type"], "connection_ack");
        }

        assert_eq!(transport.broadcast("t", json!({})).await, 2);
        let first = next_frame(&mut rx);
        assert_eq!(first["type"], "error");
        assert_eq!(first["id"], "bad");
        assert_eq!(first["payload"]["errors"][0]["message"], "downstream failed");
        let second = next_frame(&mut rx);
        assert_eq!(second["type"], "data");
        assert_eq!(second["id"], "good");
    }

    #[tokio::test]
    async fn slow_clients_are_evicted() {
        let h = harness();
        let (tx, _rx) = mpsc::channel(1);
        let slow = Arc::new(ClientConnection::new("slow".into(), tx));
        h.transport.attach(slow.clone()).await;
        for _ in 0..=MAX_TOTAL_DROPS {
            let _ = h.transport.keep_alive().await;
        }
        assert!(slow.is_evicted());
        assert!(!h.transport.is_attached(&slow.id).await);
        assert_eq!(h.transport.connection_count(), 0);
    }
}
