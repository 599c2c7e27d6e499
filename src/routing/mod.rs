//! Gateway routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration (builder options, gateway registrars):
//!     (method, pattern, handler)
//!     → matcher.rs (compile pattern)
//!     → router.rs (append to table)
//!     → frozen as Arc<RouteTable> when the gateway starts
//!
//! Incoming gateway request (method, path)
//!     → router.rs (first match in registration order)
//!     → matched handler with captured params, or no match
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use matcher::{PathParams, PathPattern, RouteError};
pub use router::{Route, RouteHandler, RouteTable};
