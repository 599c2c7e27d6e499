//! RPC transport subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP/2 request (POST /pkg.Service/Method, application/grpc)
//!     → service.rs (transport checks, method lookup)
//!     → codec.rs (length-prefixed message frames)
//!     → interceptor chain → registered handler
//!     → codec.rs (encode replies) + status.rs (grpc-status trailers)
//! ```

pub mod codec;
pub mod server;
pub mod service;
pub mod status;

pub use server::RpcServer;
pub use service::{MethodHandler, RpcMethod, RpcService};
pub use status::{Code, Status};
