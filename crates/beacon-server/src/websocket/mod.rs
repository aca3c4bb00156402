//! WebSocket connections, the protocol state machine, and keep-alive.

pub mod connection;
pub mod keepalive;
pub mod session;
pub mod transport;

pub use connection::ClientConnection;
pub use keepalive::run_keep_alive;
pub use session::{SessionParams, run_ws_session};
pub use transport::{Disposition, TransportManager};
