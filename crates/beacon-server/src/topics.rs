//! Topic handlers, topic bindings, and the resolver seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::context::SubscriptionContext;
use crate::errors::SubscriptionError;
use crate::protocol::{HANDLE_KEY_PREFIX, ObjectRef, handle_key};
use crate::registration::Registration;

/// Hooks bound to one topic.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Whether `registration` may be created at all. Runs once, at `start`.
    async fn authorize(
        &self,
        registration: &Registration,
        context: &SubscriptionContext,
        variables: &Map<String, Value>,
    ) -> bool;

    /// Whether `event` should be delivered to `registration`.
    async fn filter(&self, registration: &Registration, event: &Value) -> bool;

    /// Rewrite the event once before fan-out.
    async fn transform(&self, event: Value) -> Value {
        event
    }

    /// Produce the field value for one recipient.
    async fn resolve(
        &self,
        root: &Value,
        _args: &Map<String, Value>,
        _context: &SubscriptionContext,
    ) -> Result<Value, SubscriptionError> {
        Ok(root.clone())
    }
}

/// Accepts everything and delivers the event unchanged.
pub struct PassthroughTopic;

#[async_trait]
impl TopicHandler for PassthroughTopic {
    async fn authorize(
        &self,
        _registration: &Registration,
        _context: &SubscriptionContext,
        _variables: &Map<String, Value>,
    ) -> bool {
        true
    }

    async fn filter(&self, _registration: &Registration, _event: &Value) -> bool {
        true
    }
}

/// Handle key → handler.
///
/// Handlers are stored under [`handle_key`] of their topic, so a registration
/// finds its handler through [`Registration::handle_key`].
#[derive(Default)]
pub struct TopicBindings {
    handlers: HashMap<String, Arc<dyn TopicHandler>>,
}

impl TopicBindings {
    /// No bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `topic`, replacing any previous binding.
    pub fn bind(&mut self, topic: impl Into<String>, handler: Arc<dyn TopicHandler>) {
        let topic: String = topic.into();
        let _ = self.handlers.insert(handle_key(&topic), handler);
    }

    /// Bind [`PassthroughTopic`] to every topic in `topics`.
    pub fn bind_passthrough<I, S>(&mut self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handler: Arc<dyn TopicHandler> = Arc::new(PassthroughTopic);
        for topic in topics {
            self.bind(topic, Arc::clone(&handler));
        }
    }

    /// Handler bound to `topic`.
    pub fn get(&self, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        self.by_handle_key(&handle_key(topic))
    }

    /// Handler stored under a handle key such as
    /// `graphql.subscription.postCreated`.
    pub fn by_handle_key(&self, key: &str) -> Option<Arc<dyn TopicHandler>> {
        self.handlers.get(key).cloned()
    }

    /// Handler for the topic a registration listens to.
    pub fn for_registration(&self, registration: &Registration) -> Option<Arc<dyn TopicHandler>> {
        self.by_handle_key(&registration.handle_key())
    }

    /// Whether `topic` has a handler.
    pub fn contains(&self, topic: &str) -> bool {
        self.handlers.contains_key(&handle_key(topic))
    }

    /// Sorted bound topic names.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .handlers
            .keys()
            .filter_map(|key| key.strip_prefix(HANDLE_KEY_PREFIX))
            .map(str::to_string)
            .collect();
        topics.sort();
        topics
    }
}

/// Everything the resolver needs besides the context.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionRequest<'a> {
    /// Topic being delivered.
    pub topic: &'a str,
    /// Stored subscription document.
    pub query: &'a str,
    /// Stored variables.
    pub variables: &'a Map<String, Value>,
    /// Stored operation name.
    pub operation_name: Option<&'a str>,
    /// Transformed event, used as the root value.
    pub root_value: &'a Value,
}

impl<'a> ExecutionRequest<'a> {
    /// Request for delivering `root_value` to `registration`.
    pub fn for_registration(registration: &'a Registration, root_value: &'a Value) -> Self {
        Self {
            topic: &registration.topic,
            query: &registration.query,
            variables: &registration.variables,
            operation_name: registration.operation_name.as_deref(),
            root_value,
        }
    }
}

/// Query execution engine.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Execute a stored subscription against a root value.
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        context: &SubscriptionContext,
    ) -> Result<Value, SubscriptionError>;

    /// Turn an embedded object reference into a value.
    async fn restore_reference(&self, reference: &ObjectRef) -> Result<Value, SubscriptionError> {
        Ok(reference.describe())
    }
}

/// Answers `{"data": {<topic>: handler.resolve(root)}}`.
pub struct RootValueResolver {
    bindings: Arc<TopicBindings>,
}

impl RootValueResolver {
    /// Resolver delegating to `bindings`.
    pub fn new(bindings: Arc<TopicBindings>) -> Self {
        Self { bindings }
    }
}

#[async_trait]
impl Resolver for RootValueResolver {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        context: &SubscriptionContext,
    ) -> Result<Value, SubscriptionError> {
        let handler = self
            .bindings
            .get(request.topic)
            .ok_or_else(|| SubscriptionError::Resolver {
                message: format!("no handler bound for topic {}", request.topic),
            })?;
        let value = handler
            .resolve(request.root_value, request.variables, context)
            .await?;
        Ok(json!({ "data": { request.topic: value } }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PseudoRequest;
    use crate::protocol::StartPayload;

    fn context() -> SubscriptionContext {
        SubscriptionContext::anonymous("subscriber", PseudoRequest::default())
    }

    fn registration(topic: &str) -> Registration {
        Registration::new("1".into(), "c1".into(), topic, StartPayload::default())
    }

    struct Shouting;

    #[async_trait]
    impl TopicHandler for Shouting {
        async fn authorize(
            &self,
            _registration: &Registration,
            context: &SubscriptionContext,
            _variables: &Map<String, Value>,
        ) -> bool {
            context.is_authenticated()
        }

        async fn filter(&self, _registration: &Registration, _event: &Value) -> bool {
            true
        }

        async fn resolve(
            &self,
            root: &Value,
            _args: &Map<String, Value>,
            _context: &SubscriptionContext,
        ) -> Result<Value, SubscriptionError> {
            Ok(Value::String(root.as_str().unwrap_or_default().to_uppercase()))
        }
    }

    #[tokio::test]
    async fn passthrough_accepts_and_preserves() {
        let handler = PassthroughTopic;
        let reg = registration("a");
        assert!(handler.authorize(&reg, &context(), &Map::new()).await);
        assert!(handler.filter(&reg, &json!({})).await);
        assert_eq!(handler.transform(json!({"x": 1})).await, json!({"x": 1}));
        assert_eq!(
            handler.resolve(&json!(5), &Map::new(), &context()).await.unwrap(),
            json!(5)
        );
    }

    #[test]
    fn bindings_lookup_and_listing() {
        let mut bindings = TopicBindings::new();
        bindings.bind_passthrough(["postUpdated", "postCreated"]);
        assert!(bindings.contains("postCreated"));
        assert!(bindings.get("other").is_none());
        assert_eq!(bindings.topics(), vec!["postCreated", "postUpdated"]);
    }

    #[test]
    fn bindings_are_stored_under_handle_keys() {
        let mut bindings = TopicBindings::new();
        bindings.bind_passthrough(["postCreated"]);
        assert!(bindings.by_handle_key("graphql.subscription.postCreated").is_some());
        assert!(bindings.by_handle_key("postCreated").is_none());
        assert!(bindings.for_registration(&registration("postCreated")).is_some());
        assert!(bindings.for_registration(&registration("other")).is_none());

        // A topic spelled like a key stays distinct from the plain topic.
        bindings.bind_passthrough(["graphql.subscription.x"]);
        assert!(!bindings.contains("x"));
        assert!(bindings.contains("graphql.subscription.x"));
        assert_eq!(
            bindings.topics(),
            vec!["graphql.subscription.x", "postCreated"]
        );
    }

    #[tokio::test]
    async fn root_value_resolver_wraps_handler_output() {
        let mut bindings = TopicBindings::new();
        bindings.bind("greeting", Arc::new(Shouting));
        let resolver = RootValueResolver::new(Arc::new(bindings));

        let reg = registration("greeting");
        let root = json!("hello");
        let payload = resolver
            .execute(ExecutionRequest::for_registration(&reg, &root), &context())
            .await
            .unwrap();
        assert_eq!(payload, json!({"data": {"greeting": "HELLO"}}));
    }

    #[tokio::test]
    async fn root_value_resolver_requires_binding() {
        let resolver = RootValueResolver::new(Arc::new(TopicBindings::new()));
        let reg = registration("nothing");
        let root = Value::Null;
        let err = resolver
            .execute(ExecutionRequest::for_registration(&reg, &root), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::Resolver { .. }));
    }

    #[tokio::test]
    async fn default_restore_reference_describes() {
        let resolver = RootValueResolver::new(Arc::new(TopicBindings::new()));
        let value = resolver
            .restore_reference(&ObjectRef::new("Post", 1))
            .await
            .unwrap();
        assert_eq!(value["class"], "Post");
        assert_eq!(value["id"], 1);
    }
}
