//! Panic containment for RPC calls.
//!
//! # Responsibilities
//! - Run the inner part of the chain under `catch_unwind`
//! - Turn a panic into an `Internal` status for that call only
//! - Log the panic message and the backtrace of the panic site
//!
//! # Design Decisions
//! - Streaming replies are guarded too: a panic while producing an outbound
//!   message ends the stream with the `Internal` status
//! - The client never sees panic details

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;

use crate::interceptor::{Interceptor, MessageStream, Next, Streaming, StreamingCall, Unary, UnaryCall};
use crate::observability::panic::{panic_message, take_backtrace};
use crate::rpc::status::Status;

/// Message returned to clients whose call panicked.
pub const RECOVERED_MESSAGE: &str = "server inner error";

/// Converts panics raised by inner interceptors or the handler into `Status::internal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryInterceptor;

impl RecoveryInterceptor {
    pub fn new() -> Self {
        Self
    }
}

fn recovered(method: &str, payload: Box<dyn Any + Send>) -> Status {
    let message = panic_message(payload.as_ref());
    let backtrace = take_backtrace().unwrap_or_else(|| "<unavailable>".to_owned());
    tracing::error!(
        method = %method,
        panic = %message,
        backtrace = %backtrace,
        "Recovered from panic in RPC call"
    );
    Status::internal(RECOVERED_MESSAGE)
}

fn guard_stream(method: String, stream: MessageStream) -> MessageStream {
    Box::pin(async_stream::stream! {
        let mut stream = AssertUnwindSafe(stream).catch_unwind();
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => yield message,
                Err(payload) => {
                    yield Err(recovered(&method, payload));
                    break;
                }
            }
        }
    })
}

impl Interceptor<Unary> for RecoveryInterceptor {
    fn intercept<'a>(
        &'a self,
        call: UnaryCall,
        next: Next<'a, Unary>,
    ) -> BoxFuture<'a, Result<Bytes, Status>> {
        Box::pin(async move {
            let method = call.context.method().to_owned();
            match AssertUnwindSafe(async move { next.run(call).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(recovered(&method, payload)),
            }
        })
    }
}

impl Interceptor<Streaming> for RecoveryInterceptor {
    fn intercept<'a>(
        &'a self,
        call: StreamingCall,
        next: Next<'a, Streaming>,
    ) -> BoxFuture<'a, Result<MessageStream, Status>> {
        Box::pin(async move {
            let method = call.context.method().to_owned();
            match AssertUnwindSafe(async move { next.run(call).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(stream)) => Ok(guard_stream(method, stream)),
                Ok(Err(status)) => Err(status),
                Err(payload) => Err(recovered(&method, payload)),
            }
        })
    }
}
