//! # beacon-core
//!
//! Foundation types shared by every Beacon crate:
//!
//! - **Branded IDs**: [`ConnectionId`] and [`RegistrationId`] as newtypes so a
//!   transport-level connection can never be confused with a client-chosen
//!   registration id
//! - **Logging**: [`logging::init_subscriber`] installs the global `tracing`
//!   subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{ConnectionId, RegistrationId};
