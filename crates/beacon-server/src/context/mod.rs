//! Per-registration execution context.
//!
//! A [`ContextDriver`] turns a registration (and the init payload captured
//! at handshake) into a [`SubscriptionContext`] for topic handlers and the
//! resolver. Drivers are resolved by name through [`ContextManager`]:
//!
//! - `subscriber`: reconstructs the request, no principal
//! - `oauth`: additionally exchanges the bearer credential for a principal

pub mod oauth;
pub mod subscriber;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_settings::{AuthSettings, SubscriptionSettings};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::drivers::DriverRegistry;
use crate::errors::SubscriptionError;
use crate::registration::Registration;

pub use oauth::OAuthContextDriver;
pub use subscriber::SubscriberContextDriver;

/// Init payload key carrying the credential.
pub const AUTHORIZATION_KEY: &str = "Authorization";
/// Default pseudo-request URI.
pub const DEFAULT_ROUTE: &str = "/graphql";
/// Pseudo-request method.
pub const WS_METHOD: &str = "WS";

/// Request reconstructed from a connection's init payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PseudoRequest {
    /// Route the subscription is resolved against.
    pub uri: String,
    /// Always [`WS_METHOD`].
    pub method: String,
    /// Init payload without the credential.
    pub params: Map<String, Value>,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
}

impl PseudoRequest {
    /// Split `init` into request params and the stripped credential.
    pub fn from_init(route: &str, init: &Map<String, Value>) -> (Self, Option<String>) {
        let mut params = init.clone();
        let credential = params
            .remove(AUTHORIZATION_KEY)
            .and_then(|v| v.as_str().map(str::to_string));
        let request = Self {
            uri: route.to_string(),
            method: WS_METHOD.to_string(),
            params,
            headers: BTreeMap::new(),
        };
        (request, credential)
    }

    /// Header lookup (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Authenticated identity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Principal {
    /// Subject identifier.
    pub id: String,
    /// Everything the validation endpoint returned.
    pub claims: Value,
}

/// Context handed to topic handlers and the resolver.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubscriptionContext {
    /// Name of the driver that built it.
    pub driver: String,
    /// Reconstructed request.
    pub request: PseudoRequest,
    /// Resolved identity, `None` for anonymous.
    pub principal: Option<Principal>,
    /// Driver-specific extras.
    pub extras: Map<String, Value>,
}

impl SubscriptionContext {
    /// Anonymous context around `request`.
    pub fn anonymous(driver: impl Into<String>, request: PseudoRequest) -> Self {
        Self {
            driver: driver.into(),
            request,
            principal: None,
            extras: Map::new(),
        }
    }

    /// Resolved principal, if any.
    pub fn user(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Whether a principal was resolved.
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}

/// Builds contexts for registrations.
#[async_trait]
pub trait ContextDriver: Send + Sync {
    /// Driver name.
    fn name(&self) -> &str;

    /// Build the context for `registration`. Never fails: drivers degrade to
    /// an anonymous context.
    async fn build(&self, registration: &Registration) -> SubscriptionContext;
}

/// Named context driver resolution.
pub struct ContextManager {
    drivers: DriverRegistry<dyn ContextDriver>,
}

impl ContextManager {
    /// Manager with the built-in `subscriber` driver.
    pub fn new(default: impl Into<String>) -> Self {
        let manager = Self {
            drivers: DriverRegistry::new("context", default),
        };
        manager.extend(subscriber::DRIVER_NAME, || {
            let driver: Arc<dyn ContextDriver> =
                Arc::new(SubscriberContextDriver::new(DEFAULT_ROUTE));
            Ok(driver)
        });
        manager
    }

    /// Manager with both built-in drivers configured from settings.
    pub fn from_settings(subscriptions: &SubscriptionSettings, auth: &AuthSettings) -> Self {
        let manager = Self {
            drivers: DriverRegistry::new("context", subscriptions.context.clone()),
        };

        let route = subscriptions.route.clone();
        manager.extend(subscriber::DRIVER_NAME, move || {
            let driver: Arc<dyn ContextDriver> =
                Arc::new(SubscriberContextDriver::new(route.clone()));
            Ok(driver)
        });

        let route = subscriptions.route.clone();
        let userinfo_url = auth.userinfo_url.clone();
        let timeout = Duration::from_millis(auth.timeout_ms);
        manager.extend(oauth::DRIVER_NAME, move || {
            let url = userinfo_url
                .clone()
                .ok_or_else(|| SubscriptionError::DriverNotConfigured {
                    name: oauth::DRIVER_NAME.to_string(),
                })?;
            let driver: Arc<dyn ContextDriver> =
                Arc::new(OAuthContextDriver::new(url, route.clone(), timeout)?);
            Ok(driver)
        });

        manager
    }

    /// Register a custom driver factory.
    pub fn extend<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ContextDriver>, SubscriptionError> + Send + Sync + 'static,
    {
        self.drivers.extend(name, factory);
    }

    /// Resolve a driver by name.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn ContextDriver>, SubscriptionError> {
        self.drivers.driver(name)
    }

    /// Resolve the default driver.
    pub fn build(&self) -> Result<Arc<dyn ContextDriver>, SubscriptionError> {
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

    /// Registered driver names.
    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.names()
    }

    /// Build a fresh context for `registration` with the default driver.
    pub async fn context_for(
        &self,
        registration: &Registration,
    ) -> Result<SubscriptionContext, SubscriptionError> {
        let driver = self.build()?;
        Ok(driver.build(registration).await)
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(subscriber::DRIVER_NAME)
    }
}
