//! Lifecycle shell for a binary RPC server and its HTTP/JSON gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                      gatehouse                       │
//!   RPC client    │  ┌──────────┐   ┌───────────────┐   ┌─────────────┐  │
//!  ───────────────┼─▶│ rpc      │──▶│ interceptor   │──▶│ RPC method  │  │
//!                 │  │ listener │   │ chain         │   │ handlers    │  │
//!                 │  └──────────┘   └───────────────┘   └─────────────┘  │
//!                 │        ▲ shared port: net::multiplex                 │
//!   HTTP client   │  ┌──────────┐   ┌───────────────┐   ┌─────────────┐  │
//!  ───────────────┼─▶│ gateway  │──▶│ tower layers  │──▶│ route table │  │
//!                 │  │ listener │   │ id/trace/time │   │ static dir  │  │
//!                 │  └──────────┘   └───────────────┘   └─────────────┘  │
//!                 │                                                      │
//!                 │  ┌────────────────────────────────────────────────┐  │
//!                 │  │ lifecycle: listener set, signals, shutdown     │  │
//!                 │  │ config · observability (tracing, metrics)      │  │
//!                 │  └────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod rpc;

// Call handling
pub mod interceptor;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod runtime;

pub use config::RuntimeConfig;
pub use http::HttpServer;
pub use lifecycle::{LifecycleState, ShutdownReport};
pub use rpc::{RpcMethod, Status};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeError, RuntimeOption};
