//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve and bind a configured address
//! - Report the bound address (port 0 resolves to a real port)
//! - Tag bind failures with the listener they belong to

use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Error returned when a listener cannot be bound.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {listener} listener to {address}: {source}")]
pub struct BindError {
    pub listener: &'static str,
    pub address: String,
    #[source]
    pub source: std::io::Error,
}

/// Bind a TCP listener for the named unit.
pub async fn bind(listener: &'static str, address: &str) -> Result<TcpListener, BindError> {
    let tcp = TcpListener::bind(address).await.map_err(|source| BindError {
        listener,
        address: address.to_owned(),
        source,
    })?;

    let local_addr: Option<SocketAddr> = tcp.local_addr().ok();
    tracing::info!(
        listener,
        address = %address,
        local_addr = ?local_addr,
        "Listener bound"
    );
    Ok(tcp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn port_zero_resolves_to_real_port() {
        let tcp = bind("test", "127.0.0.1:0").await.unwrap();
        assert_ne!(tcp.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn occupied_port_is_reported_with_listener_name() {
        let taken = bind("first", "127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let err = bind("rpc", &address).await.unwrap_err();
        assert_eq!(err.listener, "rpc");
        assert_eq!(err.address, address);
        assert!(err.to_string().contains("rpc listener"));
    }
}
