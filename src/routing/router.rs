//! Gateway route table.
//!
//! # Responsibilities
//! - Store routes in registration order
//! - Find the first route whose method and pattern match a request
//!
//! # Design Decisions
//! - Filled by the builder and by registrars, then frozen behind an `Arc`
//! - First structural match wins; no priorities
//! - Handlers return `Result<_, Status>`; the gateway translates failures

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::routing::matcher::{PathParams, PathPattern, RouteError};
use crate::rpc::status::Status;

/// Future returned by a route handler.
pub type RouteFuture = BoxFuture<'static, Result<Response<Body>, Status>>;

/// Handles a request matched by a route.
pub trait RouteHandler: Send + Sync + 'static {
    fn call(&self, request: Request<Body>, params: PathParams) -> RouteFuture;
}

impl<F, Fut, R> RouteHandler for F
where
    F: Fn(Request<Body>, PathParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
    R: IntoResponse,
{
    fn call(&self, request: Request<Body>, params: PathParams) -> RouteFuture {
        let future = self(request, params);
        Box::pin(async move { future.await.map(IntoResponse::into_response) })
    }
}

/// A `(method, pattern, handler)` triple. A `None` method matches every method.
#[derive(Clone)]
pub struct Route {
    method: Option<Method>,
    pattern: PathPattern,
    handler: Arc<dyn RouteHandler>,
}

impl Route {
    pub fn new(method: Method, pattern: &str, handler: impl RouteHandler) -> Result<Self, RouteError> {
        Ok(Self {
            method: Some(method),
            pattern: PathPattern::parse(pattern)?,
            handler: Arc::new(handler),
        })
    }

    pub fn get(pattern: &str, handler: impl RouteHandler) -> Result<Self, RouteError> {
        Self::new(Method::GET, pattern, handler)
    }

    pub fn post(pattern: &str, handler: impl RouteHandler) -> Result<Self, RouteError> {
        Self::new(Method::POST, pattern, handler)
    }

    /// A route matching every method.
    pub fn any(pattern: &str, handler: impl RouteHandler) -> Result<Self, RouteError> {
        Ok(Self {
            method: None,
            pattern: PathPattern::parse(pattern)?,
            handler: Arc::new(handler),
        })
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn handler(&self) -> &Arc<dyn RouteHandler> {
        &self.handler
    }

    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return None;
        }
        self.pattern.matches(path)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.method.as_ref().map(Method::as_str).unwrap_or("*");
        write!(f, "Route({method} {})", self.pattern)
    }
}

/// Ordered gateway routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, route: Route) -> &mut Self {
        tracing::debug!(route = ?route, "Route registered");
        self.routes.push(route);
        self
    }

    /// Parse and add a route in one step.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl RouteHandler,
    ) -> Result<&mut Self, RouteError> {
        let route = Route::new(method, pattern, handler)?;
        Ok(self.add(route))
    }

    /// First route matching `method` and `path`, with its captured parameters.
    pub fn find(&self, method: &Method, path: &str) -> Option<(&Route, PathParams)> {
        self.routes
            .iter()
            .find_map(|route| route.matches(method, path).map(|params| (route, params)))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
