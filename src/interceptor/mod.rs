//! Call interception subsystem.
//!
//! # Data Flow
//! ```text
//! RPC request decoded by rpc::service
//!     → CallContext (method, metadata, connection extensions)
//!     → chain.rs (validation → recovery → user hooks → context → metrics)
//!     → registered Handler
//!     → Result<reply, Status> back out through the same hooks
//! ```
//!
//! # Design Decisions
//! - Unary and streaming calls get independent chains with the same ordering
//! - Hooks are composed per call by walking a borrowed slice, no allocation
//! - A call's context is owned by that call and never shared

pub mod chain;
pub mod context;
pub mod recovery;
pub mod validation;

pub use chain::{Chain, Next};
pub use context::RequestContextInjector;
pub use recovery::RecoveryInterceptor;
pub use validation::{Validate, ValidationInterceptor};

use axum::http::{Extensions, HeaderMap, HeaderValue};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

use crate::rpc::status::Status;

/// Metadata key carrying the correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// A stream of framed messages flowing in or out of a streaming call.
pub type MessageStream = BoxStream<'static, Result<Bytes, Status>>;

/// Identifier used to follow a single call through the logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random (UUID v4) id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept an id supplied by the caller, if it is non-empty visible text.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?.trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-call context, created at call entry and dropped when the call returns.
#[derive(Debug)]
pub struct CallContext {
    method: String,
    correlation_id: Option<CorrelationId>,
    peer_addr: Option<SocketAddr>,
    started_at: Instant,
    metadata: HeaderMap,
    extensions: Extensions,
}

impl CallContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            correlation_id: None,
            peer_addr: None,
            started_at: Instant::now(),
            metadata: HeaderMap::new(),
            extensions: Extensions::new(),
        }
    }

    /// Attach request metadata. A caller supplied `x-request-id` becomes the correlation id.
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        if self.correlation_id.is_none() {
            self.correlation_id = metadata.get(X_REQUEST_ID).and_then(CorrelationId::from_header);
        }
        self.metadata = metadata;
        self
    }

    /// Attach the extensions carried by the underlying request.
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    /// Fully qualified method identifier, e.g. `/pkg.Service/Method`.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn set_correlation_id(&mut self, id: CorrelationId) {
        self.correlation_id = Some(id);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = Some(addr);
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// A single request/response call.
#[derive(Debug)]
pub struct UnaryCall {
    pub context: CallContext,
    pub payload: Bytes,
}

/// A call with a stream of inbound messages.
pub struct StreamingCall {
    pub context: CallContext,
    pub inbound: MessageStream,
}

impl fmt::Debug for StreamingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingCall")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Access to the context of any call shape.
pub trait Call: Send + 'static {
    fn context(&self) -> &CallContext;
    fn context_mut(&mut self) -> &mut CallContext;
}

impl Call for UnaryCall {
    fn context(&self) -> &CallContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut CallContext {
        &mut self.context
    }
}

impl Call for StreamingCall {
    fn context(&self) -> &CallContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut CallContext {
        &mut self.context
    }
}

/// Selects the call shape a chain, interceptor or handler works with.
pub trait CallKind: Send + Sync + 'static {
    type Call: Call;
    type Output: Send + 'static;

    /// Label used in logs and metrics.
    const NAME: &'static str;

    /// Size of a reply, when the shape has one.
    fn reply_len(output: &Self::Output) -> Option<usize>;
}

/// Unary calls: one message in, one message out.
#[derive(Debug)]
pub enum Unary {}

/// Streaming calls: a message stream in, a message stream out.
#[derive(Debug)]
pub enum Streaming {}

impl CallKind for Unary {
    type Call = UnaryCall;
    type Output = Bytes;
    const NAME: &'static str = "unary";

    fn reply_len(output: &Bytes) -> Option<usize> {
        Some(output.len())
    }
}

impl CallKind for Streaming {
    type Call = StreamingCall;
    type Output = MessageStream;
    const NAME: &'static str = "streaming";

    fn reply_len(_output: &MessageStream) -> Option<usize> {
        None
    }
}

/// The innermost link of a chain: the method implementation.
pub trait Handler<K: CallKind>: Send + Sync + 'static {
    fn call(&self, call: K::Call) -> BoxFuture<'static, Result<K::Output, Status>>;
}

impl<F, Fut> Handler<Unary> for F
where
    F: Fn(UnaryCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
{
    fn call(&self, call: UnaryCall) -> BoxFuture<'static, Result<Bytes, Status>> {
        Box::pin(self(call))
    }
}

impl<F, Fut> Handler<Streaming> for F
where
    F: Fn(StreamingCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<MessageStream, Status>> + Send + 'static,
{
    fn call(&self, call: StreamingCall) -> BoxFuture<'static, Result<MessageStream, Status>> {
        Box::pin(self(call))
    }
}

/// A hook wrapping every call that passes through a chain.
///
/// Implementations decide whether and how to call `next.run(call)`; not calling
/// it short-circuits the call with the returned result.
pub trait Interceptor<K: CallKind>: Send + Sync + 'static {
    fn intercept<'a>(
        &'a self,
        call: K::Call,
        next: Next<'a, K>,
    ) -> BoxFuture<'a, Result<K::Output, Status>>;
}
