//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address
//!     → listener.rs (bind, errors tagged with the listener name)
//!     → http::server accept loop
//!     → connection.rs (per-connection guard, active count for drains)
//!     → multiplex.rs (shared-port mode only: RPC or gateway per request)
//! ```
//!
//! # Design Decisions
//! - Bind failures are fatal and never retried
//! - Each connection is tracked so drains can wait for the last one

pub mod connection;
pub mod listener;
pub mod multiplex;

pub use connection::{ConnectionTracker, PeerAddr};
pub use listener::{bind, BindError};
pub use multiplex::{classify, Protocol, ProtocolMultiplexer};
