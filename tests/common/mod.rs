//! Shared utilities for integration testing.

#![allow(dead_code)]

use bytes::Bytes;
use gatehouse::rpc::codec::{self, FrameDecoder, DEFAULT_MAX_MESSAGE_SIZE};
use gatehouse::{Runtime, RuntimeBuilder, RuntimeError, Status};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::SendRequest;
use hyper::{Method, Request};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A runtime serving on loopback ports, stopped by `interrupt`.
pub struct TestRuntime {
    pub runtime: Arc<Runtime>,
    pub task: JoinHandle<Result<(), RuntimeError>>,
    interrupt: Option<oneshot::Sender<()>>,
}

impl TestRuntime {
    /// Build with ephemeral ports, no pre-shutdown delay, then start.
    pub async fn start(builder: RuntimeBuilder) -> Self {
        let runtime = builder
            .rpc_address("127.0.0.1:0")
            .gateway_address("127.0.0.1:0")
            .pre_shutdown_delay(Duration::ZERO)
            .build()
            .unwrap();
        Self::start_built(runtime).await
    }

    pub async fn start_built(runtime: Runtime) -> Self {
        let runtime = Arc::new(runtime);
        let (tx, rx) = oneshot::channel::<()>();
        let task = {
            let runtime = Arc::clone(&runtime);
            tokio::spawn(async move {
                runtime
                    .start_until(async move {
                        let _ = rx.await;
                        "test interrupt"
                    })
                    .await
            })
        };
        wait_until_bound(&runtime).await;
        Self {
            runtime,
            task,
            interrupt: Some(tx),
        }
    }

    pub fn gateway_addr(&self) -> SocketAddr {
        self.runtime.gateway_addr().unwrap()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.runtime.rpc_addr().unwrap()
    }

    /// Fire the interrupt and wait for `start_until` to return.
    pub async fn interrupt(mut self) -> Result<(), RuntimeError> {
        if let Some(tx) = self.interrupt.take() {
            let _ = tx.send(());
        }
        self.task.await.unwrap()
    }
}

/// Wait until the runtime has bound its gateway listener.
pub async fn wait_until_bound(runtime: &Runtime) {
    for _ in 0..500 {
        if runtime.gateway_addr().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("runtime never bound its listeners");
}

/// Minimal cleartext HTTP/2 RPC client.
#[derive(Clone)]
pub struct RpcClient {
    addr: SocketAddr,
    sender: SendRequest<Full<Bytes>>,
}

/// Result of one RPC: reply messages and the final status.
#[derive(Debug)]
pub struct RpcReply {
    pub messages: Vec<Bytes>,
    pub status: Status,
}

impl RpcClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (sender, connection) = hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(async move {
            let _ = connection.await;
        });
        Self { addr, sender }
    }

    pub async fn unary(&mut self, method: &str, payload: &[u8]) -> RpcReply {
        self.call(method, &[payload], &[]).await
    }

    /// Send every message in one request body and read all replies.
    pub async fn call(&mut self, method: &str, messages: &[&[u8]], metadata: &[(&str, &str)]) -> RpcReply {
        let mut body = Vec::new();
        for message in messages {
            body.extend_from_slice(&codec::encode(message));
        }
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}{method}", self.addr))
            .header("content-type", "application/grpc")
            .header("te", "trailers");
        for (name, value) in metadata {
            request = request.header(*name, *value);
        }
        let request = request.body(Full::new(Bytes::from(body))).unwrap();

        let response = self.sender.send_request(request).await.unwrap();
        let header_status = Status::from_header_map(response.headers());
        let collected = response.into_body().collect().await.unwrap();
        let trailer_status = collected.trailers().and_then(Status::from_header_map);

        let mut decoder = FrameDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.push(&collected.to_bytes());
        let mut replies = Vec::new();
        while let Some(message) = decoder.next_message().unwrap() {
            replies.push(message);
        }

        RpcReply {
            messages: replies,
            status: trailer_status
                .or(header_status)
                .unwrap_or_else(|| Status::internal("response carried no status")),
        }
    }

    /// Send a plain HTTP/2 request on the same connection.
    pub async fn get(&mut self, path: &str) -> (u16, String) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("http://{}{path}", self.addr))
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = self.sender.send_request(request).await.unwrap();
        let status = response.status().as_u16();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }
}
