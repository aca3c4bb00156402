//! Default context driver.

use async_trait::async_trait;

use super::{ContextDriver, PseudoRequest, SubscriptionContext};
use crate::registration::Registration;

/// Registered name.
pub const DRIVER_NAME: &str = "subscriber";

/// Rebuilds the request from the init payload; never resolves a principal.
pub struct SubscriberContextDriver {
    route: String,
}

impl SubscriberContextDriver {
    /// Driver whose requests target `route`.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
        }
    }
}

#[async_trait]
impl ContextDriver for SubscriberContextDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn build(&self, registration: &Registration) -> SubscriptionContext {
        let (request, _credential) = PseudoRequest::from_init(&self.route, &registration.init_payload);
        SubscriptionContext::anonymous(DRIVER_NAME, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StartPayload;
    use serde_json::json;

    #[tokio::test]
    async fn builds_anonymous_request_without_credential() {
        let registration = Registration::new(
            "1".into(),
            "c1".into(),
            "postCreated",
            StartPayload::default(),
        )
        .with_init_payload(
            json!({"Authorization": "Bearer t", "tenant": "acme"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let ctx = SubscriberContextDriver::new("/api/graphql")
            .build(&registration)
            .await;
        assert_eq!(ctx.request.uri, "/api/graphql");
        assert_eq!(ctx.request.params.len(), 1);
        assert_eq!(ctx.request.params["tenant"], "acme");
        assert!(ctx.request.headers.is_empty());
        assert!(ctx.principal.is_none());
    }
}
