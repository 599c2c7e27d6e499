//! Runtime orchestration.
//!
//! # Data Flow
//! ```text
//! RuntimeBuilder (config file, fluent calls, RuntimeOption closures)
//!     → build(): validated settings, composed chains, servers
//!     → Runtime (Configured)
//!
//! Runtime::start / start_until
//!     → bind RPC and gateway listeners concurrently
//!     → ListenerSet: "rpc" unit (serve) + "gateway" unit
//!       (registrars → freeze routes → router → shutdown hook → serve)
//!     → first of: listener outcome | interrupt
//!     → interrupt: ShutdownSequencer drains, start returns Ok(())
//!     → listener failure: returned to the caller
//! ```
//!
//! # Design Decisions
//! - Settings, chains and routes are frozen before serving starts
//! - `stop` performs the drain exactly once; concurrent callers wait for it
//! - In shared-port mode one listener serves both protocols and there is no
//!   separate RPC drain

pub mod builder;
pub mod options;

pub use builder::RuntimeBuilder;
pub use options::RuntimeOption;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tower::util::BoxCloneService;

use crate::http::gateway::{self, BoxError, GatewayMiddleware, GatewayRegistrar, GatewaySettings};
use crate::http::response::ErrorTranslator;
use crate::http::server::{HttpServer, HttpServerConfig, HttpServerError, HttpService};
use crate::lifecycle::listeners::{ListenerEvent, ListenerSet};
use crate::lifecycle::shutdown::{RpcControl, ShutdownReport, ShutdownSequencer, ShutdownSettings};
use crate::lifecycle::signals::{InterruptSignal, Interrupts};
use crate::lifecycle::state::{LifecycleState, StateMachine};
use crate::net::listener::{bind, BindError};
use crate::net::multiplex::ProtocolMultiplexer;
use crate::routing::RouteTable;
use crate::rpc::server::RpcServer;
use crate::rpc::service::RpcService;

/// Error type for starting and running the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to bind {listener} listener to {address}: {source}")]
    Bind {
        listener: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{listener} listener failed: {source}")]
    Serve {
        listener: &'static str,
        #[source]
        source: HttpServerError,
    },
    #[error("gateway registration failed: {0}")]
    Registration(#[source] BoxError),
    #[error("{listener} listener panicked: {message}")]
    ListenerPanicked { listener: &'static str, message: String },
    #[error("{listener} listener ended without reporting an outcome")]
    ListenerLost { listener: &'static str },
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
    #[error("cannot {operation} a runtime that is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

impl From<BindError> for RuntimeError {
    fn from(e: BindError) -> Self {
        RuntimeError::Bind {
            listener: e.listener,
            address: e.address,
            source: e.source,
        }
    }
}

/// Frozen runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub rpc_address: SocketAddr,
    pub gateway_address: SocketAddr,
    pub shared_port: bool,
    pub cancel_sibling_on_failure: bool,
    pub signals: Vec<InterruptSignal>,
    pub shutdown: ShutdownSettings,
    pub gateway: GatewaySettings,
    pub http: HttpServerConfig,
}

/// Gateway pieces consumed when the gateway unit starts.
struct GatewayParts {
    routes: RouteTable,
    registrars: Vec<Arc<dyn GatewayRegistrar>>,
    middleware: Vec<GatewayMiddleware>,
    translator: ErrorTranslator,
}

#[derive(Debug, Default, Clone, Copy)]
struct BoundAddrs {
    rpc: Option<SocketAddr>,
    gateway: Option<SocketAddr>,
}

/// A configured RPC server and gateway, started and stopped as one unit.
pub struct Runtime {
    settings: RuntimeSettings,
    state: StateMachine,
    rpc_service: RpcService,
    rpc: Option<RpcServer>,
    gateway: Arc<HttpServer>,
    sequencer: ShutdownSequencer,
    parts: Mutex<Option<GatewayParts>>,
    bound: Mutex<BoundAddrs>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn state(&self) -> LifecycleState {
        self.state.current()
    }

    pub fn pid(&self) -> u32 {
        std::process::id()
    }

    pub fn rpc_service(&self) -> &RpcService {
        &self.rpc_service
    }

    /// Bound RPC address. In shared-port mode this is the gateway address.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        let bound = *self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        if self.settings.shared_port {
            bound.gateway
        } else {
            bound.rpc
        }
    }

    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner).gateway
    }

    /// Serve until SIGINT/SIGTERM (or the configured signals), then drain.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let current = self.state.current();
        if current != LifecycleState::Configured {
            return Err(RuntimeError::InvalidState {
                operation: "start",
                state: current,
            });
        }
        let mut interrupts = Interrupts::install(&self.settings.signals).map_err(RuntimeError::Signal)?;
        self.start_until(async move { interrupts.recv().await.to_string() })
            .await
    }

    /// Serve until `interrupt` resolves, then drain.
    ///
    /// Returns `Ok(())` after an interrupt-triggered shutdown or a clean
    /// listener exit, otherwise the first listener failure.
    pub async fn start_until<F, S>(&self, interrupt: F) -> Result<(), RuntimeError>
    where
        F: std::future::Future<Output = S>,
        S: std::fmt::Display,
    {
        self.state
            .transition(LifecycleState::Configured, LifecycleState::Running)
            .map_err(|state| RuntimeError::InvalidState {
                operation: "start",
                state,
            })?;
        tracing::info!(
            pid = self.pid(),
            shared_port = self.settings.shared_port,
            "Runtime starting"
        );

        let listeners = match self.bind_listeners().await {
            Ok(listeners) => listeners,
            Err(e) => {
                tracing::error!(error = %e, "Listener startup failed");
                let _ = self.state.transition(LifecycleState::Running, LifecycleState::Stopped);
                return Err(e);
            }
        };

        let mut set = ListenerSet::new();
        self.spawn_units(&mut set, listeners);

        match set.wait(interrupt).await {
            ListenerEvent::Interrupted(signal) => {
                tracing::info!(signal = %signal, "Interrupt received, shutting down");
                self.stop().await;
                Ok(())
            }
            ListenerEvent::Exited { listener, outcome: Ok(()) } => {
                if self.state.current() >= LifecycleState::Draining {
                    self.state.wait_for(LifecycleState::Stopped).await;
                }
                tracing::info!(listener, "Listener exited cleanly");
                Ok(())
            }
            ListenerEvent::Exited { listener, outcome: Err(e) } => {
                if self.settings.cancel_sibling_on_failure {
                    tracing::warn!(listener, remaining = ?set.pending(), "Stopping remaining listeners");
                    self.stop().await;
                } else if !set.pending().is_empty() {
                    tracing::warn!(listener, remaining = ?set.pending(), "Remaining listeners keep running");
                }
                Err(e)
            }
        }
    }

    /// Drain and stop. Returns the report for the call that performed the drain.
    pub async fn stop(&self) -> Option<ShutdownReport> {
        loop {
            match self.state.current() {
                // `build` always leaves a runtime `Configured`.
                LifecycleState::Created => return None,
                LifecycleState::Configured => {
                    if self
                        .state
                        .transition(LifecycleState::Configured, LifecycleState::Stopped)
                        .is_ok()
                    {
                        tracing::info!("Runtime stopped before it started");
                        return None;
                    }
                }
                LifecycleState::Running => {
                    if self
                        .state
                        .transition(LifecycleState::Running, LifecycleState::Draining)
                        .is_ok()
                    {
                        let rpc = self.rpc.as_ref().map(|rpc| rpc as &dyn RpcControl);
                        let report = self.sequencer.run(self.gateway.as_ref(), rpc).await;
                        let _ = self.state.transition(LifecycleState::Draining, LifecycleState::Stopped);
                        tracing::info!(total_ms = report.total.as_millis() as u64, "Runtime stopped");
                        return Some(report);
                    }
                }
                LifecycleState::Draining => {
                    self.state.wait_for(LifecycleState::Stopped).await;
                    return None;
                }
                LifecycleState::Stopped => return None,
            }
        }
    }

    async fn bind_listeners(&self) -> Result<(Option<TcpListener>, TcpListener), RuntimeError> {
        let gateway_address = self.settings.gateway_address.to_string();
        let (rpc, gateway) = if self.settings.shared_port {
            (None, bind("gateway", &gateway_address).await?)
        } else {
            let rpc_address = self.settings.rpc_address.to_string();
            let (rpc, gateway) = tokio::join!(bind("rpc", &rpc_address), bind("gateway", &gateway_address));
            (Some(rpc?), gateway?)
        };

        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        bound.rpc = rpc.as_ref().and_then(|l| l.local_addr().ok());
        bound.gateway = gateway.local_addr().ok();
        Ok((rpc, gateway))
    }

    fn spawn_units(&self, set: &mut ListenerSet, (rpc_listener, gateway_listener): (Option<TcpListener>, TcpListener)) {
        if let (Some(server), Some(listener)) = (self.rpc.clone(), rpc_listener) {
            set.spawn("rpc", async move {
                serve_outcome("rpc", server.serve(listener).await)
            });
        }

        let parts = self.parts.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(parts) = parts else {
            tracing::error!("Gateway parts already consumed");
            return;
        };
        let gateway = Arc::clone(&self.gateway);
        let settings = self.settings.gateway.clone();
        let rpc_endpoint = self.rpc_addr().unwrap_or(self.settings.rpc_address);
        let shared_rpc = self
            .settings
            .shared_port
            .then(|| -> HttpService { BoxCloneService::new(self.rpc_service.clone()) });

        set.spawn("gateway", async move {
            let GatewayParts {
                mut routes,
                registrars,
                middleware,
                translator,
            } = parts;

            for registrar in &registrars {
                if let Err(e) = registrar.register(&mut routes, rpc_endpoint).await {
                    tracing::error!(error = %e, "Gateway registration failed");
                    return Err(RuntimeError::Registration(e));
                }
            }
            tracing::info!(routes = routes.len(), "Gateway routes frozen");

            let router = gateway::build_router(Arc::new(routes), &settings, translator, &middleware);
            let gateway_service: HttpService = BoxCloneService::new(router);
            let service = match shared_rpc {
                Some(rpc) => BoxCloneService::new(ProtocolMultiplexer::new(rpc, gateway_service)),
                None => gateway_service,
            };
            serve_outcome("gateway", gateway.serve(gateway_listener, service).await)
        });
    }
}

fn serve_outcome(listener: &'static str, result: Result<(), HttpServerError>) -> Result<(), RuntimeError> {
    match result {
        // Shut down before serving began: the runtime is already stopping.
        Ok(()) | Err(HttpServerError::Closed) => Ok(()),
        Err(source) => Err(RuntimeError::Serve { listener, source }),
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("settings", &self.settings)
            .field("rpc_service", &self.rpc_service)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::{PhaseOutcome, ShutdownPhase};
    use crate::routing::PathParams;
    use crate::rpc::status::Status;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;

    fn local() -> RuntimeBuilder {
        RuntimeBuilder::new()
            .rpc_address("127.0.0.1:0")
            .gateway_address("127.0.0.1:0")
            .pre_shutdown_delay(Duration::ZERO)
            .shutdown_timeout(Duration::from_secs(1))
    }

    async fn wait_running(runtime: &Runtime) -> SocketAddr {
        for _ in 0..200 {
            if let Some(addr) = runtime.gateway_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("gateway never bound");
    }

    #[tokio::test]
    async fn stop_before_start_goes_straight_to_stopped() {
        let runtime = local().build().unwrap();
        assert_eq!(runtime.state(), LifecycleState::Configured);
        assert!(runtime.stop().await.is_none());
        assert_eq!(runtime.state(), LifecycleState::Stopped);

        let err = runtime.start_until(std::future::pending::<&str>()).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidState { operation: "start", state: LifecycleState::Stopped }
        ));
    }

    #[tokio::test]
    async fn interrupt_drains_and_returns_ok() {
        let runtime = Arc::new(
            local()
                .route(Method::GET, "/ping", |_req: Request<Body>, _params: PathParams| async {
                    Ok::<_, Status>("pong")
                })
                .build()
                .unwrap(),
        );
        let (tx, rx) = tokio::sync::oneshot::channel::<&'static str>();
        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.start_until(async move { rx.await.unwrap_or("dropped") }).await })
        };

        let addr = wait_running(&runtime).await;
        let body = reqwest::get(format!("http://{addr}/ping")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "pong");

        tx.send("test").unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(runtime.state(), LifecycleState::Stopped);
        assert!(runtime.stop().await.is_none());
    }

    #[tokio::test]
    async fn stop_reports_phases_once() {
        let runtime = Arc::new(local().build().unwrap());
        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move { runtime.start_until(std::future::pending::<&str>()).await })
        };
        wait_running(&runtime).await;

        let report = runtime.stop().await.unwrap();
        assert_eq!(
            report.phase(ShutdownPhase::PreShutdownDelay).unwrap().outcome,
            PhaseOutcome::Skipped
        );
        assert_eq!(
            report.phase(ShutdownPhase::RpcGracefulStop).unwrap().outcome,
            PhaseOutcome::Completed
        );
        assert!(runtime.stop().await.is_none());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let runtime = local().rpc_address(addr.clone()).build().unwrap();

        let err = runtime.start_until(std::future::pending::<&str>()).await.unwrap_err();
        match err {
            RuntimeError::Bind { listener, address, .. } => {
                assert_eq!(listener, "rpc");
                assert_eq!(address, addr);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runtime.state(), LifecycleState::Stopped);
    }
}
