//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (HTTP/1.1 + h2c, peer address, keep-alive control, drain)
//!     → [shared-port mode: net::multiplex splits RPC from gateway]
//!     → gateway.rs (request id, trace, timeout, metrics layers)
//!     → routing table or static files
//!     → response.rs (route errors → JSON error body)
//! ```

pub mod gateway;
pub mod request;
pub mod response;
pub mod server;

pub use gateway::{build_router, BoxError, GatewayMiddleware, GatewayRegistrar, GatewaySettings};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::{default_error_response, ErrorTranslator};
pub use server::{HttpServer, HttpServerConfig, HttpServerError, HttpService, ShutdownHook};
