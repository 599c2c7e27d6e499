//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every subsystem produces:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (call counters and latency histograms)
//!     → panic.rs (backtraces for contained panics)
//!
//! Consumers:
//!     → stdout (pretty, compact or JSON)
//!     → GET /metrics on the gateway (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Correlation ids travel in spans, not in every log call
//! - Metrics are cheap to record and free when disabled

pub mod logging;
pub mod metrics;
pub mod panic;

pub use logging::{init_logging, LogFormat};
pub use metrics::MetricsInterceptor;
