//! Configuration schema definitions.
//!
//! This module defines the file-level configuration of the runtime.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lifecycle::signals::{InterruptSignal, DEFAULT_SIGNALS};
use crate::observability::logging::{LogFormat, DEFAULT_LOG_FILTER};
use crate::rpc::codec::DEFAULT_MAX_MESSAGE_SIZE;

/// Root configuration for the runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Listener addresses and startup behaviour.
    pub listener: ListenerConfig,

    /// Shutdown sequence settings.
    pub shutdown: ShutdownConfig,

    /// Gateway HTTP settings.
    pub gateway: GatewayConfig,

    /// RPC transport settings.
    pub rpc: RpcConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// RPC bind address (e.g., "0.0.0.0:50051"). Unused in shared-port mode.
    pub rpc_address: String,

    /// Gateway bind address (e.g., "0.0.0.0:8080").
    pub gateway_address: String,

    /// Serve RPC and gateway traffic on the gateway address.
    pub shared_port: bool,

    /// Stop the runtime when one listener fails instead of leaving the other running.
    pub cancel_sibling_on_failure: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            rpc_address: "0.0.0.0:50051".to_string(),
            gateway_address: "0.0.0.0:8080".to_string(),
            shared_port: false,
            cancel_sibling_on_failure: false,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Bound on the gateway drain, in milliseconds.
    pub timeout_ms: u64,

    /// Pause after disabling keep-alive, in milliseconds. Zero skips it.
    pub pre_shutdown_delay_ms: u64,

    /// Optional bound on the RPC drain. Unbounded when absent.
    pub rpc_drain_timeout_ms: Option<u64>,

    /// Signals that trigger a graceful shutdown.
    pub signals: Vec<InterruptSignal>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            pre_shutdown_delay_ms: 2_000,
            rpc_drain_timeout_ms: None,
            signals: DEFAULT_SIGNALS.to_vec(),
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn pre_shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.pre_shutdown_delay_ms)
    }

    pub fn rpc_drain_timeout(&self) -> Option<Duration> {
        self.rpc_drain_timeout_ms.map(Duration::from_millis)
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory served for unmatched `GET` requests.
    pub static_dir: Option<String>,

    /// Time allowed to receive request headers, in milliseconds.
    pub header_read_timeout_ms: u64,

    /// Bound on handler time per request, in milliseconds.
    pub request_timeout_ms: u64,

    /// How long a connection may sit with no request in flight, in milliseconds.
    pub idle_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            static_dir: None,
            header_read_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            idle_timeout_ms: 20_000,
        }
    }
}

/// RPC transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RpcConfig {
    /// Largest accepted request message, in bytes.
    pub max_message_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive, overridden by `RUST_LOG`.
    pub log_filter: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Log every RPC call with its duration.
    pub request_logging: bool,

    /// Record Prometheus metrics and serve `GET /metrics` on the gateway.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::default(),
            request_logging: true,
            metrics_enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: RuntimeConfig = toml::from_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.shutdown.timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown.pre_shutdown_delay(), Duration::from_secs(2));
        assert_eq!(config.shutdown.rpc_drain_timeout(), None);
        assert_eq!(config.shutdown.signals, DEFAULT_SIGNALS.to_vec());
        assert_eq!(config.gateway.idle_timeout_ms, 20_000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [listener]
            shared_port = true

            [shutdown]
            rpc_drain_timeout_ms = 500
            signals = ["interrupt", "hangup"]
            "#,
        )
        .unwrap();
        assert!(config.listener.shared_port);
        assert_eq!(config.listener.gateway_address, "0.0.0.0:8080");
        assert_eq!(config.shutdown.rpc_drain_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(
            config.shutdown.signals,
            vec![InterruptSignal::Interrupt, InterruptSignal::Hangup]
        );
        assert_eq!(config.shutdown.timeout_ms, 10_000);
    }
}
