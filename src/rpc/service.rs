//! RPC request dispatch.
//!
//! # Responsibilities
//! - Validate the transport (HTTP/2, `application/grpc` content type)
//! - Decode framed request messages and build the call context
//! - Run the call through the unary or streaming interceptor chain
//! - Encode replies as data frames followed by `grpc-status` trailers
//!
//! # Design Decisions
//! - Failures before a reply exists are sent as trailers-only responses
//! - Streaming requests are decoded lazily as the handler pulls messages
//! - A failed outbound stream ends with that failure in the trailers

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode, Version};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use http_body_util::StreamBody;
use hyper::body::Frame;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

use crate::interceptor::{
    CallContext, Chain, Handler, MessageStream, Streaming, StreamingCall, Unary, UnaryCall, Validate,
};
use crate::rpc::codec::{self, FrameDecoder};
use crate::rpc::status::Status;

/// Content type of every RPC request and response.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Implementation of one registered method.
#[derive(Clone)]
pub enum MethodHandler {
    Unary(Arc<dyn Handler<Unary>>),
    Streaming(Arc<dyn Handler<Streaming>>),
}

impl MethodHandler {
    pub fn kind(&self) -> &'static str {
        match self {
            MethodHandler::Unary(_) => "unary",
            MethodHandler::Streaming(_) => "streaming",
        }
    }
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A method registration: fully qualified name, handler and optional validator.
pub struct RpcMethod {
    name: String,
    handler: MethodHandler,
    validator: Option<Arc<dyn Validate>>,
}

impl RpcMethod {
    /// Register a unary method, e.g. `"/pkg.Service/Method"`.
    pub fn unary<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(UnaryCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: MethodHandler::Unary(Arc::new(handler)),
            validator: None,
        }
    }

    /// Register a streaming method.
    pub fn streaming<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StreamingCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageStream, Status>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: MethodHandler::Streaming(Arc::new(handler)),
            validator: None,
        }
    }

    /// Validate every request message before the handler sees it.
    pub fn with_validator(mut self, validator: impl Validate) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &MethodHandler {
        &self.handler
    }

    pub fn validator(&self) -> Option<&Arc<dyn Validate>> {
        self.validator.as_ref()
    }
}

impl fmt::Debug for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMethod")
            .field("name", &self.name)
            .field("kind", &self.handler.kind())
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

struct RpcInner {
    methods: HashMap<String, MethodHandler>,
    unary: Chain<Unary>,
    streaming: Chain<Streaming>,
    max_message_size: usize,
}

/// Tower service dispatching RPC requests to registered methods.
#[derive(Clone)]
pub struct RpcService {
    inner: Arc<RpcInner>,
}

impl RpcService {
    pub fn new(
        methods: HashMap<String, MethodHandler>,
        unary: Chain<Unary>,
        streaming: Chain<Streaming>,
        max_message_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                methods,
                unary,
                streaming,
                max_message_size,
            }),
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.methods.contains_key(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.inner.methods.keys().map(String::as_str)
    }

    /// Serve one RPC request.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        if request.version() != Version::HTTP_2 {
            return plain_status(StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        }
        if request.method() != Method::POST {
            return plain_status(StatusCode::METHOD_NOT_ALLOWED);
        }
        let is_grpc = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(GRPC_CONTENT_TYPE));
        if !is_grpc {
            return plain_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }

        let method = request.uri().path().to_owned();
        let Some(handler) = self.inner.methods.get(&method).cloned() else {
            tracing::debug!(method = %method, "Unknown RPC method");
            return trailers_only(&Status::unimplemented(format!("unknown method {method}")));
        };

        let (parts, body) = request.into_parts();
        let context = CallContext::new(method)
            .with_metadata(parts.headers)
            .with_extensions(parts.extensions);
        let max = self.inner.max_message_size;

        let result = match handler {
            MethodHandler::Unary(handler) => match read_unary(body, max).await {
                Ok(payload) => {
                    let call = UnaryCall { context, payload };
                    self.inner
                        .unary
                        .run(call, handler.as_ref())
                        .await
                        .map(|reply| futures_util::stream::once(async move { Ok(reply) }).boxed())
                }
                Err(status) => Err(status),
            },
            MethodHandler::Streaming(handler) => {
                let call = StreamingCall {
                    context,
                    inbound: inbound_messages(body, max),
                };
                self.inner.streaming.run(call, handler.as_ref()).await
            }
        };

        match result {
            Ok(replies) => reply_response(replies),
            Err(status) => trailers_only(&status),
        }
    }
}

impl fmt::Debug for RpcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcService")
            .field("methods", &self.inner.methods.len())
            .field("unary_chain", &self.inner.unary)
            .field("streaming_chain", &self.inner.streaming)
            .finish()
    }
}

impl Service<Request<Body>> for RpcService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.dispatch(request).await) })
    }
}

async fn read_unary(body: Body, max_message_size: usize) -> Result<Bytes, Status> {
    let mut decoder = FrameDecoder::new(max_message_size);
    let mut data = body.into_data_stream();
    let mut message = None;

    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| Status::internal(format!("failed to read request: {e}")))?;
        decoder.push(&chunk);
        while let Some(decoded) = decoder.next_message()? {
            if message.replace(decoded).is_some() {
                return Err(Status::unimplemented("unary call received more than one message"));
            }
        }
    }
    decoder.finish()?;
    message.ok_or_else(|| Status::internal("missing request message"))
}

fn inbound_messages(body: Body, max_message_size: usize) -> MessageStream {
    Box::pin(async_stream::stream! {
        let mut decoder = FrameDecoder::new(max_message_size);
        let mut data = body.into_data_stream();
        while let Some(chunk) = data.next().await {
            match chunk {
                Ok(chunk) => decoder.push(&chunk),
                Err(e) => {
                    yield Err::<Bytes, Status>(Status::internal(format!("failed to read request: {e}")));
                    return;
                }
            }
            loop {
                match decoder.next_message() {
                    Ok(Some(message)) => yield Ok(message),
                    Ok(None) => break,
                    Err(status) => {
                        yield Err(status);
                        return;
                    }
                }
            }
        }
        if let Err(status) = decoder.finish() {
            yield Err(status);
        }
    })
}

fn grpc_response(body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    response
}

/// A response carrying only headers: the call failed before any reply.
pub fn trailers_only(status: &Status) -> Response<Body> {
    let mut response = grpc_response(Body::empty());
    response.headers_mut().extend(status.to_header_map());
    response
}

fn reply_response(mut replies: MessageStream) -> Response<Body> {
    let frames = async_stream::stream! {
        let mut status = Status::ok();
        while let Some(reply) = replies.next().await {
            match reply {
                Ok(message) => yield Ok::<_, Infallible>(Frame::data(codec::encode(&message))),
                Err(failure) => {
                    status = failure;
                    break;
                }
            }
        }
        yield Ok(Frame::trailers(status.to_header_map()));
    };
    grpc_response(Body::new(StreamBody::new(frames)))
}

fn plain_status(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
