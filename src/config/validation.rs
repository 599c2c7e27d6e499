//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check listener addresses parse and do not collide
//! - Validate value ranges (timeouts > 0, message size > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the builder

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::RuntimeConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let gateway = parse_address("listener.gateway_address", &config.listener.gateway_address, &mut errors);
    if !config.listener.shared_port {
        let rpc = parse_address("listener.rpc_address", &config.listener.rpc_address, &mut errors);
        if let (Some(rpc), Some(gateway)) = (rpc, gateway) {
            if rpc == gateway && rpc.port() != 0 {
                errors.push(ValidationError::new(
                    "listener.rpc_address",
                    format!("{rpc} is also the gateway address; enable shared_port to use one port"),
                ));
            }
        }
    }

    if config.shutdown.timeout_ms == 0 {
        errors.push(ValidationError::new("shutdown.timeout_ms", "must be greater than zero"));
    }
    if config.shutdown.rpc_drain_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            "shutdown.rpc_drain_timeout_ms",
            "must be greater than zero when set",
        ));
    }
    if config.gateway.header_read_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "gateway.header_read_timeout_ms",
            "must be greater than zero",
        ));
    }
    if config.gateway.request_timeout_ms == 0 {
        errors.push(ValidationError::new("gateway.request_timeout_ms", "must be greater than zero"));
    }
    if config.gateway.idle_timeout_ms == 0 {
        errors.push(ValidationError::new("gateway.idle_timeout_ms", "must be greater than zero"));
    }
    if config.gateway.static_dir.as_deref().is_some_and(str::is_empty) {
        errors.push(ValidationError::new("gateway.static_dir", "must not be empty when set"));
    }
    if config.rpc.max_message_size == 0 {
        errors.push(ValidationError::new("rpc.max_message_size", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn parse_address(
    field: &'static str,
    value: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<SocketAddr> {
    match value.parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            errors.push(ValidationError::new(field, format!("`{value}` is not a socket address: {e}")));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn every_problem_is_reported() {
        let mut config = RuntimeConfig::default();
        config.listener.rpc_address = "not an address".into();
        config.shutdown.timeout_ms = 0;
        config.gateway.idle_timeout_ms = 0;
        config.rpc.max_message_size = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.rpc_address",
                "shutdown.timeout_ms",
                "gateway.idle_timeout_ms",
                "rpc.max_message_size"
            ]
        );
    }

    #[test]
    fn same_address_requires_shared_port() {
        let mut config = RuntimeConfig::default();
        config.listener.rpc_address = config.listener.gateway_address.clone();
        assert!(validate_config(&config).is_err());

        config.listener.shared_port = true;
        assert!(validate_config(&config).is_ok());
    }
}
