//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the process wide Prometheus recorder once
//! - Record per-call RPC metrics through `MetricsInterceptor`
//! - Count gateway requests
//!
//! # Metrics
//! - `rpc_server_handled_total` (counter): completed calls by method, kind, code
//! - `rpc_server_handling_seconds` (histogram): call latency by method, kind
//! - `gateway_requests_total` (counter): gateway requests by method, status
//!
//! # Design Decisions
//! - The recorder is global; later installs reuse the first handle
//! - Recording is a no-op until a recorder is installed

use futures_util::future::BoxFuture;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::interceptor::{Call, CallKind, Interceptor, Next};
use crate::rpc::status::{Code, Status};

pub const RPC_HANDLED_TOTAL: &str = "rpc_server_handled_total";
pub const RPC_HANDLING_SECONDS: &str = "rpc_server_handling_seconds";
pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the Prometheus recorder, or return the handle of the one already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let mut slot = HANDLE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)?
        .install_recorder()?;
    tracing::info!("Prometheus recorder installed");
    *slot = Some(handle.clone());
    Ok(handle)
}

/// Render every recorded metric in the Prometheus text format.
pub fn render() -> String {
    HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record one completed RPC call.
pub fn record_call(method: &str, kind: &'static str, code: Code, elapsed: Duration) {
    metrics::counter!(
        RPC_HANDLED_TOTAL,
        "method" => method.to_owned(),
        "kind" => kind,
        "code" => code.as_str()
    )
    .increment(1);
    metrics::histogram!(
        RPC_HANDLING_SECONDS,
        "method" => method.to_owned(),
        "kind" => kind
    )
    .record(elapsed.as_secs_f64());
}

/// Record one gateway request.
pub fn record_gateway_request(method: &str, status: u16) {
    metrics::counter!(
        GATEWAY_REQUESTS_TOTAL,
        "method" => method.to_owned(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Innermost built-in interceptor recording call counts and latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsInterceptor;

impl<K: CallKind> Interceptor<K> for MetricsInterceptor {
    fn intercept<'a>(
        &'a self,
        call: K::Call,
        next: Next<'a, K>,
    ) -> BoxFuture<'a, Result<K::Output, Status>> {
        Box::pin(async move {
            let method = call.context().method().to_owned();
            let started_at = call.context().started_at();
            let result = next.run(call).await;
            let code = match &result {
                Ok(_) => Code::Ok,
                Err(status) => status.code(),
            };
            record_call(&method, K::NAME, code, started_at.elapsed());
            result
        })
    }
}
