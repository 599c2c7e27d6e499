//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (listeners.rs):
//!     Install signals → spawn listener units → wait for first outcome or interrupt
//!
//! Shutdown (shutdown.rs):
//!     Keep-alive off → pre-shutdown delay → RPC drain → gateway drain (bounded)
//!
//! State (state.rs):
//!     Created → Configured → Running → Draining → Stopped
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: no phase starts before the previous one finished
//! - Gateway drain has a deadline; stragglers are force-closed and reported
//! - Every lifecycle step is a monotonic state transition

pub mod listeners;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use listeners::{ListenerEvent, ListenerSet};
pub use shutdown::{ShutdownReport, ShutdownSequencer, ShutdownSettings};
pub use signals::InterruptSignal;
pub use state::LifecycleState;
