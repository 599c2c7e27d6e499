//! Request context injection and call accounting.
//!
//! # Responsibilities
//! - Attach a correlation id to every call (generated when the caller sent none)
//! - Attach the caller address recorded by the connection layer
//! - Log call begin/end with elapsed time when request logging is enabled
//!
//! # Design Decisions
//! - Context injection always happens; only the accounting logs are optional
//! - Diagnostics run under `catch_unwind` and never change a call's result
//! - The rest of the call runs inside a span carrying method and correlation id

use futures_util::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use tracing::Instrument;

use crate::interceptor::{Call, CallKind, CorrelationId, Interceptor, Next};
use crate::net::connection::PeerAddr;
use crate::rpc::status::Status;

/// Interceptor enriching every call with correlation id, caller address and timing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContextInjector {
    log_requests: bool,
}

impl RequestContextInjector {
    pub fn new(log_requests: bool) -> Self {
        Self { log_requests }
    }

    pub fn log_requests(&self) -> bool {
        self.log_requests
    }
}

/// Run a diagnostic closure, swallowing any panic it raises.
fn observe(emit: impl FnOnce()) {
    let _ = std::panic::catch_unwind(AssertUnwindSafe(emit));
}

impl<K: CallKind> Interceptor<K> for RequestContextInjector {
    fn intercept<'a>(
        &'a self,
        mut call: K::Call,
        next: Next<'a, K>,
    ) -> BoxFuture<'a, Result<K::Output, Status>> {
        Box::pin(async move {
            let context = call.context_mut();
            let correlation_id = match context.correlation_id() {
                Some(id) => id.clone(),
                None => {
                    let id = CorrelationId::generate();
                    context.set_correlation_id(id.clone());
                    id
                }
            };
            if context.peer_addr().is_none() {
                if let Some(PeerAddr(addr)) = context.extensions().get::<PeerAddr>().copied() {
                    context.set_peer_addr(addr);
                }
            }

            let method = context.method().to_owned();
            let started_at = context.started_at();
            let peer = context
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_owned());

            if self.log_requests {
                observe(|| {
                    tracing::info!(
                        correlation_id = %correlation_id,
                        method = %method,
                        peer_addr = %peer,
                        kind = K::NAME,
                        "exec begin"
                    );
                });
            }

            let span = tracing::info_span!(
                "rpc",
                method = %method,
                correlation_id = %correlation_id
            );
            let result = next.run(call).instrument(span).await;

            if self.log_requests {
                let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
                observe(|| match &result {
                    Ok(output) => match K::reply_len(output) {
                        Some(reply_bytes) => tracing::info!(
                            correlation_id = %correlation_id,
                            method = %method,
                            elapsed_ms,
                            reply_bytes,
                            "exec end"
                        ),
                        None => tracing::info!(
                            correlation_id = %correlation_id,
                            method = %method,
                            elapsed_ms,
                            "exec end, reply streaming"
                        ),
                    },
                    Err(status) => tracing::warn!(
                        correlation_id = %correlation_id,
                        method = %method,
                        elapsed_ms,
                        status = %status,
                        "exec failed"
                    ),
                });
            }

            result
        })
    }
}
