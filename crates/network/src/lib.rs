//! # realmd Networking Layer
//!
//! Tokio-based session plumbing for the realm server.
//!
//! ## Modules
//!
//! - [`session`] - Per-connection state machine and outbound queue
//! - [`context`] - Shared server state passed to every handler
//! - [`registry`] - `(client version, opcode)` to handler table
//! - [`handlers`] - Packet handlers and their declaration table
//! - [`dispatcher`] - Routing and bad-packet policy
//! - [`server`] - TCP accept loop and per-socket tasks

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod session;

#[cfg(test)]
mod testkit;

// Re-export commonly used items
pub use context::ServerContext;
pub use dispatcher::Dispatcher;
pub use handlers::{build_registry, declarations};
pub use registry::{OpcodeRegistry, OpcodeRegistryBuilder, PacketHandler};
pub use server::{serve_connection, RealmServer};
pub use session::{Session, SessionState, TrafficCounts};
