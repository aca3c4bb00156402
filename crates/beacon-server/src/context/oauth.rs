//! Bearer-token context driver.
//!
//! The credential captured at handshake is moved from the request params
//! into the `authorization` header and exchanged with a userinfo endpoint.
//! Any failure along the way yields an anonymous context.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{ContextDriver, Principal, PseudoRequest, SubscriptionContext};
use crate::errors::SubscriptionError;
use crate::registration::Registration;

/// Registered name.
pub const DRIVER_NAME: &str = "oauth";

/// Resolves the principal behind a bearer token.
pub struct OAuthContextDriver {
    client: reqwest::Client,
    userinfo_url: String,
    route: String,
}

impl OAuthContextDriver {
    /// Driver validating tokens against `userinfo_url`.
    pub fn new(
        userinfo_url: impl Into<String>,
        route: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SubscriptionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SubscriptionError::Internal {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            userinfo_url: userinfo_url.into(),
            route: route.into(),
        })
    }

    #[instrument(skip_all, fields(url = %self.userinfo_url))]
    async fn resolve_principal(&self, token: &str) -> Option<Principal> {
        let resp = match self.client.get(&self.userinfo_url).bearer_auth(token).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "token validation request failed");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "token rejected");
            return None;
        }

        let claims: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "token validation response is not JSON");
                return None;
            }
        };

        let Some(id) = subject_of(&claims) else {
            warn!("token validation response has no subject");
            return None;
        };
        Some(Principal { id, claims })
    }
}

/// `sub` (or `id`) as a string.
fn subject_of(claims: &Value) -> Option<String> {
    let raw = claims.get("sub").or_else(|| claims.get("id"))?;
    match raw {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Token from a `Bearer <token>` credential.
fn bearer_token(credential: &str) -> Option<&str> {
    let (scheme, token) = credential.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl ContextDriver for OAuthContextDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn build(&self, registration: &Registration) -> SubscriptionContext {
        let (mut request, credential) =
            PseudoRequest::from_init(&self.route, &registration.init_payload);

        let principal = match credential {
            Some(credential) => {
                let _ = request
                    .headers
                    .insert("authorization".to_string(), credential.clone());
                match bearer_token(&credential) {
                    Some(token) => self.resolve_principal(token).await,
                    None => {
                        debug!("credential is not a bearer token");
                        None
                    }
                }
            }
            None => None,
        };

        SubscriptionContext {
            driver: DRIVER_NAME.to_string(),
            request,
            principal,
            extras: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StartPayload;
    use serde_json::json;

    fn registration(init: Value) -> Registration {
        Registration::new("1".into(), "c1".into(), "postCreated", StartPayload::default())
            .with_init_payload(init.as_object().cloned().unwrap())
    }

    fn driver(server: &wiremock::MockServer) -> OAuthContextDriver {
        OAuthContextDriver::new(
            format!("{}/userinfo", server.uri()),
            "/graphql",
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn subject_extraction() {
        assert_eq!(subject_of(&json!({"sub": "u1"})).as_deref(), Some("u1"));
        assert_eq!(subject_of(&json!({"id": 42})).as_deref(), Some("42"));
        assert_eq!(subject_of(&json!({"sub": ""})), None);
        assert_eq!(subject_of(&json!({"name": "x"})), None);
    }

    #[tokio::test]
    async fn valid_token_resolves_principal() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/userinfo"))
            .and(wiremock::matchers::header("authorization", "Bearer good"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(json!({"sub": "user-7", "email": "a@b.c"})),
            )
            .mount(&server)
            .await;

        let ctx = driver(&server)
            .build(&registration(json!({"Authorization": "Bearer good", "locale": "en"})))
            .await;
        let principal = ctx.user().unwrap();
        assert_eq!(principal.id, "user-7");
        assert_eq!(principal.claims["email"], "a@b.c");
        assert_eq!(ctx.request.header("Authorization"), Some("Bearer good"));
        assert!(ctx.request.params.get("Authorization").is_none());
        assert_eq!(ctx.request.params["locale"], "en");
    }

    #[tokio::test]
    async fn rejected_token_is_anonymous() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let ctx = driver(&server)
            .build(&registration(json!({"Authorization": "Bearer bad"})))
            .await;
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.request.header("authorization"), Some("Bearer bad"));
    }

    #[tokio::test]
    async fn malformed_body_is_anonymous() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let ctx = driver(&server)
            .build(&registration(json!({"Authorization": "Bearer t"})))
            .await;
        assert!(ctx.principal.is_none());
    }

    #[tokio::test]
    async fn missing_credential_skips_exchange() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({"sub": "x"})))
            .expect(0)
            .mount(&server)
            .await;

        let ctx = driver(&server).build(&registration(json!({}))).await;
        assert!(ctx.principal.is_none());
        assert!(ctx.request.headers.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_anonymous() {
        let driver = OAuthContextDriver::new(
            "http://127.0.0.1:1/userinfo",
            "/graphql",
            Duration::from_millis(500),
        )
        .unwrap();
        let ctx = driver
            .build(&registration(json!({"Authorization": "Bearer t"})))
            .await;
        assert!(ctx.principal.is_none());
    }
}
