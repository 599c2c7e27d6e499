//! Named runtime options.
//!
//! Each option toggles one attribute of the builder and is applied in order
//! by [`RuntimeBuilder::apply`]. They mirror the fluent builder methods for
//! callers that assemble their configuration as a list.

use axum::body::Body;
use axum::http::{Method, Response};
use axum::Router;
use std::path::PathBuf;
use std::time::Duration;

use crate::http::gateway::GatewayRegistrar;
use crate::interceptor::{Interceptor, Streaming, Unary};
use crate::lifecycle::signals::InterruptSignal;
use crate::routing::RouteHandler;
use crate::rpc::service::RpcMethod;
use crate::rpc::status::Status;
use crate::runtime::builder::RuntimeBuilder;

/// A deferred change to a [`RuntimeBuilder`].
pub type RuntimeOption = Box<dyn FnOnce(&mut RuntimeBuilder) + Send>;

fn option(change: impl FnOnce(RuntimeBuilder) -> RuntimeBuilder + Send + 'static) -> RuntimeOption {
    Box::new(move |builder: &mut RuntimeBuilder| {
        *builder = change(std::mem::take(builder));
    })
}

pub fn with_request_logging(enabled: bool) -> RuntimeOption {
    option(move |b| b.request_logging(enabled))
}

pub fn with_metrics(enabled: bool) -> RuntimeOption {
    option(move |b| b.metrics(enabled))
}

pub fn with_shared_port(enabled: bool) -> RuntimeOption {
    option(move |b| b.shared_port(enabled))
}

pub fn with_cancel_sibling_on_failure(enabled: bool) -> RuntimeOption {
    option(move |b| b.cancel_sibling_on_failure(enabled))
}

pub fn with_rpc_address(address: impl Into<String>) -> RuntimeOption {
    let address = address.into();
    option(move |b| b.rpc_address(address))
}

pub fn with_gateway_address(address: impl Into<String>) -> RuntimeOption {
    let address = address.into();
    option(move |b| b.gateway_address(address))
}

pub fn with_static_dir(dir: impl Into<PathBuf>) -> RuntimeOption {
    let dir = dir.into();
    option(move |b| b.static_dir(dir))
}

pub fn with_shutdown_timeout(timeout: Duration) -> RuntimeOption {
    option(move |b| b.shutdown_timeout(timeout))
}

pub fn with_pre_shutdown_delay(delay: Duration) -> RuntimeOption {
    option(move |b| b.pre_shutdown_delay(delay))
}

pub fn with_rpc_drain_timeout(timeout: Duration) -> RuntimeOption {
    option(move |b| b.rpc_drain_timeout(timeout))
}

/// Add signals to the default interrupt set.
pub fn with_signals(signals: impl IntoIterator<Item = InterruptSignal>) -> RuntimeOption {
    let signals: Vec<_> = signals.into_iter().collect();
    option(move |b| signals.into_iter().fold(b, RuntimeBuilder::signal))
}

pub fn with_header_read_timeout(timeout: Duration) -> RuntimeOption {
    option(move |b| b.header_read_timeout(timeout))
}

pub fn with_request_timeout(timeout: Duration) -> RuntimeOption {
    option(move |b| b.request_timeout(timeout))
}

pub fn with_idle_timeout(timeout: Duration) -> RuntimeOption {
    option(move |b| b.idle_timeout(timeout))
}

pub fn with_error_translator<F>(translator: F) -> RuntimeOption
where
    F: Fn(&Status) -> Response<Body> + Send + Sync + 'static,
{
    option(move |b| b.error_translator(translator))
}

pub fn with_unary_interceptor(interceptor: impl Interceptor<Unary>) -> RuntimeOption {
    option(move |b| b.unary_interceptor(interceptor))
}

pub fn with_streaming_interceptor(interceptor: impl Interceptor<Streaming>) -> RuntimeOption {
    option(move |b| b.streaming_interceptor(interceptor))
}

pub fn with_method(method: RpcMethod) -> RuntimeOption {
    option(move |b| b.method(method))
}

pub fn with_route(method: Method, pattern: impl Into<String>, handler: impl RouteHandler) -> RuntimeOption {
    let pattern = pattern.into();
    option(move |b| b.route(method, &pattern, handler))
}

pub fn with_registrar(registrar: impl GatewayRegistrar + 'static) -> RuntimeOption {
    option(move |b| b.registrar(registrar))
}

pub fn with_shutdown_hook(hook: impl FnOnce() + Send + 'static) -> RuntimeOption {
    option(move |b| b.shutdown_hook(hook))
}

pub fn with_gateway_middleware(wrap: impl Fn(Router) -> Router + Send + Sync + 'static) -> RuntimeOption {
    option(move |b| b.gateway_middleware(wrap))
}
