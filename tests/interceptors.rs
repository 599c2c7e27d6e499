//! Interceptor chains seen from an RPC client.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use gatehouse::interceptor::{
    Call, Interceptor, MessageStream, Next, Streaming, StreamingCall, Unary, UnaryCall,
};
use gatehouse::rpc::Code;
use gatehouse::{RpcMethod, RuntimeBuilder, Status};
use std::sync::{Arc, Mutex};

mod common;
use common::{RpcClient, TestRuntime};

type Log = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    log: Log,
}

impl Interceptor<Unary> for Recorder {
    fn intercept<'a>(
        &'a self,
        call: UnaryCall,
        next: Next<'a, Unary>,
    ) -> BoxFuture<'a, Result<Bytes, Status>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            let result = next.run(call).await;
            self.log.lock().unwrap().push(format!("{} after", self.name));
            result
        })
    }
}

struct Deny;

impl Interceptor<Streaming> for Deny {
    fn intercept<'a>(
        &'a self,
        call: StreamingCall,
        next: Next<'a, Streaming>,
    ) -> BoxFuture<'a, Result<MessageStream, Status>> {
        Box::pin(async move {
            if call.context().metadata().contains_key("x-deny") {
                return Err(Status::new(Code::PermissionDenied, "denied by policy"));
            }
            next.run(call).await
        })
    }
}

fn not_empty(message: &[u8]) -> Result<(), String> {
    if message.is_empty() {
        Err("message must not be empty".to_owned())
    } else {
        Ok(())
    }
}

fn builder(log: &Log) -> RuntimeBuilder {
    let handler_log = Arc::clone(log);
    RuntimeBuilder::new()
        .unary_interceptor(Recorder {
            name: "first",
            log: Arc::clone(log),
        })
        .unary_interceptor(Recorder {
            name: "second",
            log: Arc::clone(log),
        })
        .streaming_interceptor(Deny)
        .method(
            RpcMethod::unary("/test.Echo/Say", move |call: UnaryCall| {
                let log = Arc::clone(&handler_log);
                async move {
                    let id = call
                        .context
                        .correlation_id()
                        .map(|id| id.to_string())
                        .unwrap_or_default();
                    log.lock().unwrap().push(format!("handler {id}"));
                    Ok::<_, Status>(call.payload)
                }
            })
            .with_validator(not_empty),
        )
        .method(
            RpcMethod::streaming("/test.Echo/Upper", |call: StreamingCall| async move {
                let replies: MessageStream = call
                    .inbound
                    .map(|message| message.map(|m| Bytes::from(m.to_ascii_uppercase())))
                    .boxed();
                Ok::<_, Status>(replies)
            })
            .with_validator(not_empty),
        )
}

#[tokio::test]
async fn user_interceptors_run_in_registration_order() {
    let log = Log::default();
    let test = TestRuntime::start(builder(&log)).await;
    let mut client = RpcClient::connect(test.rpc_addr()).await;

    let reply = client
        .call("/test.Echo/Say", &[b"hi"], &[("x-request-id", "req-42")])
        .await;
    assert!(reply.status.is_ok());

    assert_eq!(
        *log.lock().unwrap(),
        ["first before", "second before", "handler req-42", "second after", "first after"]
    );
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn missing_correlation_id_is_generated() {
    let log = Log::default();
    let test = TestRuntime::start(builder(&log)).await;
    let mut client = RpcClient::connect(test.rpc_addr()).await;

    assert!(client.unary("/test.Echo/Say", b"a").await.status.is_ok());
    assert!(client.unary("/test.Echo/Say", b"b").await.status.is_ok());

    let handler_ids: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|entry| entry.strip_prefix("handler ").map(str::to_owned))
        .collect();
    assert_eq!(handler_ids.len(), 2);
    assert!(handler_ids.iter().all(|id| !id.is_empty()));
    assert_ne!(handler_ids[0], handler_ids[1]);
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn invalid_unary_request_never_reaches_user_hooks() {
    let log = Log::default();
    let test = TestRuntime::start(builder(&log)).await;
    let mut client = RpcClient::connect(test.rpc_addr()).await;

    let reply = client.unary("/test.Echo/Say", b"").await;
    assert_eq!(reply.status.code(), Code::InvalidArgument);
    assert_eq!(reply.status.message(), "message must not be empty");
    assert!(log.lock().unwrap().is_empty());
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn streaming_messages_are_validated_as_they_arrive() {
    let log = Log::default();
    let test = TestRuntime::start(builder(&log)).await;
    let mut client = RpcClient::connect(test.rpc_addr()).await;

    let reply = client.call("/test.Echo/Upper", &[b"ab", b"cd"], &[]).await;
    assert!(reply.status.is_ok());
    assert_eq!(
        reply.messages,
        vec![Bytes::from_static(b"AB"), Bytes::from_static(b"CD")]
    );

    let reply = client.call("/test.Echo/Upper", &[b"ok", b"", b"never"], &[]).await;
    assert_eq!(reply.status.code(), Code::InvalidArgument);
    assert_eq!(reply.messages, vec![Bytes::from_static(b"OK")]);
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn streaming_interceptor_can_short_circuit() {
    let log = Log::default();
    let test = TestRuntime::start(builder(&log)).await;
    let mut client = RpcClient::connect(test.rpc_addr()).await;

    let reply = client
        .call("/test.Echo/Upper", &[b"ab"], &[("x-deny", "1")])
        .await;
    assert_eq!(reply.status.code(), Code::PermissionDenied);
    assert!(reply.messages.is_empty());
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn metrics_endpoint_reports_handled_calls() {
    let log = Log::default();
    let test = TestRuntime::start(builder(&log).metrics(true)).await;
    let mut client = RpcClient::connect(test.rpc_addr()).await;

    assert!(client.unary("/test.Echo/Say", b"count me").await.status.is_ok());
    assert_eq!(
        client.unary("/test.Echo/Say", b"").await.status.code(),
        Code::InvalidArgument
    );

    let body = reqwest::get(format!("http://{}/metrics", test.gateway_addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("rpc_server_handled_total"), "{body}");
    assert!(body.contains("/test.Echo/Say"), "{body}");
    test.interrupt().await.unwrap();
}
