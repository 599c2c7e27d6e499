//! RPC listener.
//!
//! Serves an [`RpcService`] on its own TCP listener using the shared
//! [`HttpServer`] connection machinery. Graceful stop sends GOAWAY to every
//! connection and waits for in-flight calls.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::util::BoxCloneService;

use crate::http::server::{HttpServer, HttpServerConfig, HttpServerError};
use crate::lifecycle::shutdown::RpcControl;
use crate::rpc::service::RpcService;

#[derive(Debug, Clone)]
pub struct RpcServer {
    service: RpcService,
    http: Arc<HttpServer>,
}

impl RpcServer {
    /// RPC connections are long-lived, so the idle deadline never applies to them.
    pub fn new(service: RpcService, config: HttpServerConfig) -> Self {
        let config = HttpServerConfig {
            idle_timeout: None,
            ..config
        };
        Self {
            service,
            http: Arc::new(HttpServer::new("rpc", config)),
        }
    }

    /// Accept RPC connections until the server is stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), HttpServerError> {
        self.http
            .serve(listener, BoxCloneService::new(self.service.clone()))
            .await
    }
}

#[async_trait]
impl RpcControl for RpcServer {
    /// Stop accepting and wait for in-flight calls, up to `bound` when given.
    async fn graceful_stop(&self, bound: Option<Duration>) -> Result<(), HttpServerError> {
        self.http.shutdown(bound).await
    }
}
