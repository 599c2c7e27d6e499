//! Single-port protocol multiplexing.
//!
//! # Responsibilities
//! - Decide per request whether it is RPC or gateway traffic
//! - Forward the request to the matching service
//!
//! # Design Decisions
//! - Classification is per request, not per connection: one HTTP/2
//!   connection may carry both kinds
//! - Only cleartext HTTP/2 with prior knowledge reaches the RPC side;
//!   HTTP/1 upgrades are not attempted

use axum::body::Body;
use axum::http::{header, Request, Response, Version};
use futures_util::future::BoxFuture;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

use crate::http::server::HttpService;

/// Which side of the listener a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rpc,
    Gateway,
}

/// RPC iff HTTP/2 and the content type names `application/grpc`.
pub fn classify<B>(request: &Request<B>) -> Protocol {
    let grpc = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/grpc"));
    if request.version() == Version::HTTP_2 && grpc {
        Protocol::Rpc
    } else {
        Protocol::Gateway
    }
}

/// Routes each request to the RPC or the gateway service.
#[derive(Clone)]
pub struct ProtocolMultiplexer {
    rpc: HttpService,
    gateway: HttpService,
}

impl ProtocolMultiplexer {
    pub fn new(rpc: HttpService, gateway: HttpService) -> Self {
        Self { rpc, gateway }
    }
}

impl std::fmt::Debug for ProtocolMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolMultiplexer").finish_non_exhaustive()
    }
}

impl Service<Request<Body>> for ProtocolMultiplexer {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let protocol = classify(&request);
        tracing::trace!(protocol = ?protocol, path = %request.uri().path(), "Request classified");
        let target = match protocol {
            Protocol::Rpc => self.rpc.clone(),
            Protocol::Gateway => self.gateway.clone(),
        };
        Box::pin(target.oneshot(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::util::BoxCloneService;

    fn labelled(label: &'static str) -> HttpService {
        BoxCloneService::new(tower::service_fn(move |_req: Request<Body>| async move {
            Ok::<_, Infallible>(Response::new(Body::from(label)))
        }))
    }

    fn request(version: Version, content_type: &str) -> Request<Body> {
        Request::builder()
            .version(version)
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn classification_needs_http2_and_grpc_content_type() {
        assert_eq!(classify(&request(Version::HTTP_2, "application/grpc")), Protocol::Rpc);
        assert_eq!(classify(&request(Version::HTTP_2, "application/grpc+proto")), Protocol::Rpc);
        assert_eq!(classify(&request(Version::HTTP_11, "application/grpc")), Protocol::Gateway);
        assert_eq!(classify(&request(Version::HTTP_2, "application/json")), Protocol::Gateway);
        assert_eq!(classify(&Request::new(())), Protocol::Gateway);
    }

    #[tokio::test]
    async fn requests_reach_the_classified_service() {
        let mux = ProtocolMultiplexer::new(labelled("rpc"), labelled("gateway"));

        let response = mux.clone().oneshot(request(Version::HTTP_2, "application/grpc")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(body, "rpc");

        let response = mux.oneshot(request(Version::HTTP_11, "text/plain")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(body, "gateway");
    }
}
