//! # beacon-server
//!
//! GraphQL subscription transport over WebSocket.
//!
//! - Registry: per-connection init payloads and registrations, with a topic index
//! - Protocol: `connection_init` / `start` / `stop` handling, `data` / `error` / `ka` frames
//! - Fan-out: topic events from a shared pub/sub channel, filtered and resolved per registration
//! - Context drivers: per-registration request context, optionally backed by an OAuth userinfo endpoint
//! - HTTP: `/ws` upgrade, `/health`, `/metrics`; graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod context;
pub mod drivers;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod publisher;
pub mod pubsub;
pub mod registration;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod topics;
pub mod websocket;

pub use bridge::BroadcastBridge;
pub use config::ServerConfig;
pub use context::{ContextDriver, ContextManager, SubscriptionContext};
pub use errors::{PubSubError, SubscriptionError};
pub use publisher::Publisher;
pub use registration::Registration;
pub use registry::{RegistryManager, SubscriberStorage};
pub use server::BeaconServer;
pub use topics::{PassthroughTopic, Resolver, RootValueResolver, TopicBindings, TopicHandler};
pub use websocket::TransportManager;
