//! HTTP/JSON gateway service.
//!
//! # Responsibilities
//! - Dispatch requests to the frozen route table
//! - Serve unmatched `GET`/`HEAD` requests from the static directory, if any
//! - Translate route failures and misses through the error translator
//! - Wrap everything in request-id, tracing, timeout and metrics layers
//!
//! # Design Decisions
//! - The route table is complete before the router is built and is read
//!   through an `Arc` without locks afterwards
//! - User middleware wraps the router inside the built-in layers, so request
//!   ids and traces cover it

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, Response, StatusCode};
use axum::middleware::{self, Next};
use axum::routing::any;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::http::response::ErrorTranslator;
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::rpc::status::Status;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Wraps the gateway router before the built-in layers are applied.
pub type GatewayMiddleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Default bound on handler time per gateway request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Wires gateway routes to the RPC server before the gateway starts.
///
/// Registrars run in registration order. A failure aborts gateway startup.
#[async_trait]
pub trait GatewayRegistrar: Send + Sync {
    async fn register(&self, routes: &mut RouteTable, rpc_endpoint: SocketAddr) -> Result<(), BoxError>;
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub request_timeout: Duration,
    pub static_dir: Option<PathBuf>,
    pub metrics_enabled: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            static_dir: None,
            metrics_enabled: false,
        }
    }
}

#[derive(Clone)]
struct GatewayState {
    routes: Arc<RouteTable>,
    static_files: Option<ServeDir>,
    translator: ErrorTranslator,
}

/// Build the gateway router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(
    routes: Arc<RouteTable>,
    settings: &GatewaySettings,
    translator: ErrorTranslator,
    wrappers: &[GatewayMiddleware],
) -> Router {
    let state = GatewayState {
        routes,
        static_files: settings.static_dir.as_ref().map(ServeDir::new),
        translator,
    };

    let mut router = Router::new()
        .route("/{*path}", any(dispatch))
        .route("/", any(dispatch))
        .with_state(state);
    for wrap in wrappers {
        router = wrap(router);
    }
    if settings.metrics_enabled {
        router = router.layer(middleware::from_fn(count_requests));
    }

    router
        .layer(TimeoutLayer::new(settings.request_timeout))
        .layer(propagate_request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(set_request_id_layer())
}

async fn dispatch(State(state): State<GatewayState>, request: Request) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request.request_id().unwrap_or("unknown").to_owned();

    if let Some((route, params)) = state.routes.find(&method, &path) {
        let handler = Arc::clone(route.handler());
        return match handler.call(request, params).await {
            Ok(response) => response,
            Err(status) => {
                tracing::debug!(
                    request_id = %request_id,
                    path = %path,
                    code = %status.code(),
                    "Route returned an error"
                );
                (state.translator)(&status)
            }
        };
    }

    if method == Method::GET || method == Method::HEAD {
        if let Some(files) = state.static_files.clone() {
            match files.oneshot(request).await {
                Ok(response) if response.status() != StatusCode::NOT_FOUND => {
                    return response.map(Body::new);
                }
                Ok(_) => {}
                Err(never) => match never {},
            }
        }
    }

    tracing::debug!(request_id = %request_id, method = %method, path = %path, "No route matched");
    (state.translator)(&Status::not_found(format!("no route for {method} {path}")))
}

async fn count_requests(request: Request, next: Next) -> Response<Body> {
    let method = request.method().as_str().to_owned();
    let response = next.run(request).await;
    metrics::record_gateway_request(&method, response.status().as_u16());
    response
}
