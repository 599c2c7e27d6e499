//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated)
//!     → RuntimeBuilder::from_config, refined by options
//!     → frozen into the runtime at build()
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the runtime is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    GatewayConfig, ListenerConfig, ObservabilityConfig, RpcConfig, RuntimeConfig, ShutdownConfig,
};
pub use validation::{validate_config, ValidationError};
