//! HTTP server with an externally controlled drain.
//!
//! # Responsibilities
//! - Accept TCP connections and serve HTTP/1.1 and cleartext HTTP/2 on each
//! - Hand every request to a boxed tower service, tagged with the peer address
//! - Stop accepting, signal graceful shutdown and wait for connections on demand
//! - Force-close whatever is still open when a drain deadline passes
//!
//! # Design Decisions
//! - One `watch` channel carries the server phase to the accept loop and every
//!   connection task, so a phase change reaches all of them at once
//! - Disabling keep-alive marks HTTP/1 responses `Connection: close`; idle
//!   connections therefore close on their next use
//! - Shutdown hooks run synchronously, after accepting stops and before
//!   connections are told to drain
//! - A connection with no request in flight for `idle_timeout` is told to
//!   close; a request stays in flight until its response body is finished

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, Version};
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tower::util::BoxCloneService;
use tower::ServiceExt;

use crate::lifecycle::shutdown::GatewayControl;
use crate::net::connection::{ConnectionTracker, PeerAddr};

/// The request handler served on every connection.
pub type HttpService = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

/// Callback run once when the server starts shutting down.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Default time a client has to send the request head.
pub const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a connection may stay open with no request in flight.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Where a server is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// Accepting and serving.
    Serving,
    /// Not accepting; open connections are untouched.
    Stopping,
    /// Not accepting; open connections were told to finish and close.
    Draining,
    /// Every remaining connection is dropped.
    Closed,
}

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("server is already shut down")]
    Closed,
    #[error("{remaining} connection(s) still open after {timeout:?}, forced closed")]
    DrainTimeout { timeout: Duration, remaining: usize },
}

/// Connection level settings.
#[derive(Debug, Clone, Copy)]
pub struct HttpServerConfig {
    pub header_read_timeout: Duration,
    /// `None` keeps idle connections open.
    pub idle_timeout: Option<Duration>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// An HTTP server whose shutdown is driven from outside the serve loop.
pub struct HttpServer {
    name: &'static str,
    config: HttpServerConfig,
    keep_alives: Arc<AtomicBool>,
    phase: watch::Sender<ServerPhase>,
    tracker: ConnectionTracker,
    hooks: Mutex<Vec<ShutdownHook>>,
}

impl HttpServer {
    pub fn new(name: &'static str, config: HttpServerConfig) -> Self {
        let (phase, _) = watch::channel(ServerPhase::Serving);
        Self {
            name,
            config,
            keep_alives: Arc::new(AtomicBool::new(true)),
            phase,
            tracker: ConnectionTracker::new(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> ServerPhase {
        *self.phase.borrow()
    }

    pub fn active_connections(&self) -> usize {
        self.tracker.active_count()
    }

    pub fn keep_alives_enabled(&self) -> bool {
        self.keep_alives.load(Ordering::SeqCst)
    }

    /// Enable or disable HTTP/1 keep-alive for new and existing connections.
    pub fn set_keep_alives_enabled(&self, enabled: bool) {
        self.keep_alives.store(enabled, Ordering::SeqCst);
        tracing::debug!(server = self.name, enabled, "Keep-alive toggled");
    }

    /// Register a callback run when shutdown starts.
    pub fn register_on_shutdown(&self, hook: ShutdownHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Accept connections until the server leaves the `Serving` phase.
    ///
    /// Returns once accepting has stopped; open connections keep running until
    /// they finish or the drain closes them.
    pub async fn serve(&self, listener: TcpListener, service: HttpService) -> Result<(), HttpServerError> {
        let mut phase_rx = self.phase.subscribe();
        if *phase_rx.borrow_and_update() != ServerPhase::Serving {
            return Err(HttpServerError::Closed);
        }

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(server = self.name, address = %addr, "HTTP server accepting connections");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, service.clone()),
                    Err(e) if is_connection_error(&e) => {
                        tracing::debug!(server = self.name, error = %e, "Connection failed during accept");
                    }
                    Err(e) => {
                        tracing::error!(server = self.name, error = %e, "Accept error, retrying in 1s");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
                _ = wait_until_not_serving(&mut phase_rx) => break,
            }
        }

        tracing::info!(server = self.name, "HTTP server stopped accepting");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, service: HttpService) {
        let guard = self.tracker.track();
        let mut phase_rx = self.phase.subscribe();
        let keep_alives = Arc::clone(&self.keep_alives);
        let config = self.config;
        let name = self.name;

        tokio::spawn(async move {
            tracing::trace!(server = name, connection_id = %guard.id(), peer_addr = %peer, "Connection accepted");

            let keep_alive_at_accept = keep_alives.load(Ordering::SeqCst);
            let in_flight = InFlight::new();
            let requests = in_flight.clone();
            let handler = hyper::service::service_fn(move |request: Request<Incoming>| {
                let service = service.clone();
                let keep_alives = Arc::clone(&keep_alives);
                let request_guard = requests.enter();
                async move {
                    let http1 = request.version() < Version::HTTP_2;
                    let mut request = request.map(Body::new);
                    request.extensions_mut().insert(PeerAddr(peer));

                    let mut response = service.oneshot(request).await?;
                    if http1 && !keep_alives.load(Ordering::SeqCst) {
                        response
                            .headers_mut()
                            .insert(header::CONNECTION, HeaderValue::from_static("close"));
                    }
                    Ok::<_, Infallible>(response.map(|inner| {
                        Body::new(InFlightBody {
                            inner,
                            _request: request_guard,
                        })
                    }))
                }
            });

            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(config.header_read_timeout)
                .keep_alive(keep_alive_at_accept);
            let connection = builder.serve_connection(TokioIo::new(stream), handler);
            tokio::pin!(connection);

            let mut watching = true;
            let mut idle_watch = true;
            match *phase_rx.borrow_and_update() {
                ServerPhase::Closed => return,
                ServerPhase::Draining => connection.as_mut().graceful_shutdown(),
                ServerPhase::Serving | ServerPhase::Stopping => {}
            }

            loop {
                tokio::select! {
                    result = connection.as_mut() => {
                        if let Err(e) = result {
                            tracing::debug!(server = name, connection_id = %guard.id(), error = %e, "Connection error");
                        }
                        break;
                    }
                    changed = phase_rx.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        let phase = *phase_rx.borrow_and_update();
                        match phase {
                            ServerPhase::Draining => connection.as_mut().graceful_shutdown(),
                            ServerPhase::Closed => {
                                tracing::debug!(server = name, connection_id = %guard.id(), "Connection force-closed");
                                break;
                            }
                            ServerPhase::Serving | ServerPhase::Stopping => {}
                        }
                    }
                    _ = in_flight.idle_for(config.idle_timeout), if idle_watch => {
                        tracing::debug!(server = name, connection_id = %guard.id(), "Closing idle connection");
                        idle_watch = false;
                        connection.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }

    /// Stop accepting, run shutdown hooks, drain open connections.
    ///
    /// With a timeout, connections still open at the deadline are dropped and
    /// `HttpServerError::DrainTimeout` is returned. Without one the drain waits
    /// for every connection.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), HttpServerError> {
        self.phase.send_replace(ServerPhase::Stopping);

        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        for hook in hooks {
            hook();
        }

        self.phase.send_replace(ServerPhase::Draining);
        tracing::info!(
            server = self.name,
            active_connections = self.tracker.active_count(),
            timeout = ?timeout,
            "Draining connections"
        );

        let drained = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.tracker.wait_idle()).await.is_ok(),
            None => {
                self.tracker.wait_idle().await;
                true
            }
        };

        let remaining = self.tracker.active_count();
        self.phase.send_replace(ServerPhase::Closed);

        match (drained, timeout) {
            (false, Some(timeout)) => Err(HttpServerError::DrainTimeout { timeout, remaining }),
            _ => {
                tracing::info!(server = self.name, "All connections drained");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

/// Requests in flight on one connection.
#[derive(Clone)]
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self(Arc::new(tx))
    }

    fn enter(&self) -> InFlightGuard {
        self.0.send_modify(|count| *count += 1);
        InFlightGuard(Arc::clone(&self.0))
    }

    /// Resolve once no request has been in flight for `idle`. Never resolves without a limit.
    async fn idle_for(&self, idle: Option<Duration>) {
        let Some(idle) = idle else {
            return std::future::pending().await;
        };
        let mut rx = self.0.subscribe();
        loop {
            let _ = rx.wait_for(|count| *count == 0).await;
            if tokio::time::timeout(idle, rx.wait_for(|count| *count > 0)).await.is_err() {
                return;
            }
        }
    }
}

struct InFlightGuard(Arc<watch::Sender<usize>>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Response body that keeps its request in flight until fully sent.
struct InFlightBody {
    inner: Body,
    _request: InFlightGuard,
}

impl HttpBody for InFlightBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

async fn wait_until_not_serving(phase_rx: &mut watch::Receiver<ServerPhase>) {
    let _ = phase_rx.wait_for(|phase| *phase != ServerPhase::Serving).await;
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

#[async_trait]
impl GatewayControl for HttpServer {
    fn set_keep_alives_enabled(&self, enabled: bool) {
        HttpServer::set_keep_alives_enabled(self, enabled);
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), HttpServerError> {
        HttpServer::shutdown(self, Some(timeout)).await
    }
}
