//! Start/stop behaviour of the runtime against real sockets.

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::Method;
use bytes::Bytes;
use gatehouse::http::gateway::{BoxError, GatewayRegistrar};
use gatehouse::interceptor::UnaryCall;
use gatehouse::lifecycle::shutdown::{PhaseOutcome, ShutdownPhase};
use gatehouse::routing::{PathParams, RouteTable};
use gatehouse::rpc::Code;
use gatehouse::{LifecycleState, RpcMethod, RuntimeBuilder, RuntimeError, Status};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

mod common;
use common::{RpcClient, TestRuntime};

fn echo() -> RpcMethod {
    RpcMethod::unary("/test.Echo/Say", |call: UnaryCall| async move { Ok::<_, Status>(call.payload) })
}

#[tokio::test]
async fn panicking_handler_fails_one_call_and_server_keeps_serving() {
    let test = TestRuntime::start(
        RuntimeBuilder::new()
            .method(echo())
            .method(RpcMethod::unary("/test.Echo/Explode", |call: UnaryCall| async move {
                if call.payload.is_empty() {
                    panic!("handler blew up");
                }
                Ok::<_, Status>(call.payload)
            })),
    )
    .await;

    let mut client = RpcClient::connect(test.rpc_addr()).await;
    let reply = client.unary("/test.Echo/Explode", b"").await;
    assert_eq!(reply.status.code(), Code::Internal);
    assert_eq!(reply.status.message(), "server inner error");
    assert!(reply.messages.is_empty());

    for _ in 0..3 {
        let reply = client.unary("/test.Echo/Say", b"still here").await;
        assert!(reply.status.is_ok());
        assert_eq!(reply.messages, vec![Bytes::from_static(b"still here")]);
    }

    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn in_flight_rpc_finishes_before_gateway_shutdown() {
    let finished_at = Arc::new(Mutex::new(None::<Instant>));
    let recorder = Arc::clone(&finished_at);
    let test = TestRuntime::start(RuntimeBuilder::new().method(RpcMethod::unary(
        "/test.Slow/Work",
        move |call: UnaryCall| {
            let recorder = Arc::clone(&recorder);
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                *recorder.lock().unwrap() = Some(Instant::now());
                Ok::<_, Status>(call.payload)
            }
        },
    )))
    .await;

    let mut client = RpcClient::connect(test.rpc_addr()).await;
    let call = tokio::spawn(async move { client.unary("/test.Slow/Work", b"job").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = test.runtime.stop().await.unwrap();
    let reply = call.await.unwrap();
    assert!(reply.status.is_ok());
    assert_eq!(reply.messages, vec![Bytes::from_static(b"job")]);

    let phases: Vec<ShutdownPhase> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        [
            ShutdownPhase::DisableKeepAlive,
            ShutdownPhase::PreShutdownDelay,
            ShutdownPhase::RpcGracefulStop,
            ShutdownPhase::GatewayShutdown,
        ]
    );
    let gateway_started = report.phase(ShutdownPhase::GatewayShutdown).unwrap().started_at;
    let finished = finished_at.lock().unwrap().expect("handler finished");
    assert!(finished <= gateway_started);
    assert_eq!(
        report.phase(ShutdownPhase::RpcGracefulStop).unwrap().outcome,
        PhaseOutcome::Completed
    );

    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn bounded_rpc_drain_force_closes_slow_calls() {
    let test = TestRuntime::start(
        RuntimeBuilder::new()
            .rpc_drain_timeout(Duration::from_millis(200))
            .method(RpcMethod::unary("/test.Slow/Work", |call: UnaryCall| async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, Status>(call.payload)
            })),
    )
    .await;

    let mut client = RpcClient::connect(test.rpc_addr()).await;
    let call = tokio::spawn(async move { client.unary("/test.Slow/Work", b"job").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = test.runtime.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.rpc_forced());
    assert!(!report.gateway_forced());
    assert!(elapsed < Duration::from_millis(1500), "stopped after {elapsed:?}");
    assert!(call.await.is_err(), "the dropped connection fails the call");

    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn second_stop_is_a_no_op() {
    let test = TestRuntime::start(RuntimeBuilder::new()).await;

    assert!(test.runtime.stop().await.is_some());
    assert_eq!(test.runtime.state(), LifecycleState::Stopped);
    assert!(test.runtime.stop().await.is_none());
    assert_eq!(test.runtime.state(), LifecycleState::Stopped);

    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn concurrent_stops_drain_once() {
    let test = TestRuntime::start(RuntimeBuilder::new()).await;
    let (a, b) = tokio::join!(test.runtime.stop(), test.runtime.stop());
    assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
    assert_eq!(test.runtime.state(), LifecycleState::Stopped);
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn slow_gateway_request_is_forced_closed_at_the_deadline() {
    let test = TestRuntime::start(
        RuntimeBuilder::new()
            .shutdown_timeout(Duration::from_millis(200))
            .route(Method::GET, "/slow", |_req: Request, _params: PathParams| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, Status>("too late")
            }),
    )
    .await;

    let url = format!("http://{}/slow", test.gateway_addr());
    let request = tokio::spawn(async move { reqwest::get(url).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = test.runtime.stop().await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.gateway_forced());
    assert!(elapsed >= Duration::from_millis(200), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "stopped after {elapsed:?}");
    assert!(request.await.unwrap().is_err());

    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn shutdown_hook_runs_during_stop() {
    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    let test = TestRuntime::start(RuntimeBuilder::new().shutdown_hook(move || {
        *flag.lock().unwrap() = true;
    }))
    .await;

    test.interrupt().await.unwrap();
    assert!(*ran.lock().unwrap());
}

struct SlowRegistrar;

#[async_trait]
impl GatewayRegistrar for SlowRegistrar {
    async fn register(&self, _routes: &mut RouteTable, _rpc: SocketAddr) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    }
}

#[tokio::test]
async fn shutdown_hook_runs_when_stop_overtakes_registration() {
    let ran = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&ran);
    let test = TestRuntime::start(RuntimeBuilder::new().registrar(SlowRegistrar).shutdown_hook(move || {
        *flag.lock().unwrap() = true;
    }))
    .await;

    assert!(test.runtime.stop().await.is_some());
    assert!(*ran.lock().unwrap());
    assert_eq!(test.runtime.state(), LifecycleState::Stopped);
    test.interrupt().await.unwrap();
}

#[tokio::test]
async fn rpc_bind_failure_is_returned_from_start() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = taken.local_addr().unwrap().to_string();
    let runtime = RuntimeBuilder::new()
        .rpc_address(address.clone())
        .gateway_address("127.0.0.1:0")
        .build()
        .unwrap();

    let err = runtime.start_until(std::future::pending::<&str>()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Bind { listener: "rpc", .. }), "{err}");
    assert!(err.to_string().contains(&address));
}

struct FailingRegistrar;

#[async_trait]
impl GatewayRegistrar for FailingRegistrar {
    async fn register(&self, _routes: &mut RouteTable, _rpc: SocketAddr) -> Result<(), BoxError> {
        Err("upstream descriptor missing".into())
    }
}

#[tokio::test]
async fn registrar_failure_leaves_rpc_running_by_default() {
    let runtime = RuntimeBuilder::new()
        .rpc_address("127.0.0.1:0")
        .gateway_address("127.0.0.1:0")
        .pre_shutdown_delay(Duration::ZERO)
        .method(echo())
        .registrar(FailingRegistrar)
        .build()
        .unwrap();

    let err = runtime.start_until(std::future::pending::<&str>()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Registration(_)));
    assert_eq!(runtime.state(), LifecycleState::Running);

    let mut client = RpcClient::connect(runtime.rpc_addr().unwrap()).await;
    assert!(client.unary("/test.Echo/Say", b"hi").await.status.is_ok());

    assert!(runtime.stop().await.is_some());
    assert_eq!(runtime.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn registrar_failure_stops_everything_when_siblings_are_cancelled() {
    let runtime = RuntimeBuilder::new()
        .rpc_address("127.0.0.1:0")
        .gateway_address("127.0.0.1:0")
        .pre_shutdown_delay(Duration::ZERO)
        .cancel_sibling_on_failure(true)
        .registrar(FailingRegistrar)
        .build()
        .unwrap();

    let err = runtime.start_until(std::future::pending::<&str>()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Registration(_)));
    assert_eq!(runtime.state(), LifecycleState::Stopped);
}

struct HelloRegistrar;

#[async_trait]
impl GatewayRegistrar for HelloRegistrar {
    async fn register(&self, routes: &mut RouteTable, rpc: SocketAddr) -> Result<(), BoxError> {
        let endpoint = rpc.to_string();
        routes.route(Method::GET, "/v1/endpoint", move |_req: Request, _params: PathParams| {
            let endpoint = endpoint.clone();
            async move { Ok::<_, Status>(endpoint) }
        })?;
        Ok(())
    }
}

#[tokio::test]
async fn registrars_see_the_bound_rpc_endpoint() {
    let test = TestRuntime::start(RuntimeBuilder::new().registrar(HelloRegistrar)).await;

    let body = reqwest::get(format!("http://{}/v1/endpoint", test.gateway_addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, test.rpc_addr().to_string());

    test.interrupt().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn configured_signal_triggers_shutdown() {
    use gatehouse::lifecycle::InterruptSignal;
    use gatehouse::RuntimeConfig;

    let mut config = RuntimeConfig::default();
    config.listener.rpc_address = "127.0.0.1:0".into();
    config.listener.gateway_address = "127.0.0.1:0".into();
    config.shutdown.pre_shutdown_delay_ms = 0;
    config.shutdown.signals = vec![InterruptSignal::User2];
    let runtime = Arc::new(RuntimeBuilder::from_config(config).build().unwrap());

    let task = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.start().await })
    };
    common::wait_until_bound(&runtime).await;

    let status = std::process::Command::new("kill")
        .args(["-USR2", &runtime.pid().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("runtime stopped after signal")
        .unwrap()
        .unwrap();
    assert_eq!(runtime.state(), LifecycleState::Stopped);
}
