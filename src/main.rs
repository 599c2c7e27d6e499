//! gatehouse server binary.
//!
//! Loads a TOML configuration, applies command line overrides and serves a
//! health-check RPC method with its gateway route until interrupted.

use axum::extract::Request;
use axum::http::Method;
use clap::Parser;
use std::path::PathBuf;

use gatehouse::config::{load_config, RuntimeConfig};
use gatehouse::interceptor::UnaryCall;
use gatehouse::observability::{init_logging, LogFormat};
use gatehouse::routing::PathParams;
use gatehouse::{RpcMethod, RuntimeBuilder, Status};

/// Fully qualified name of the built-in health RPC.
const HEALTH_METHOD: &str = "/gatehouse.Health/Check";

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(about = "Serve an RPC server and its HTTP gateway as one process", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the RPC bind address.
    #[arg(long)]
    rpc_address: Option<String>,

    /// Override the gateway bind address.
    #[arg(long)]
    gateway_address: Option<String>,

    /// Serve RPC and gateway traffic on the gateway address.
    #[arg(long)]
    shared_port: bool,

    /// Override the log output format.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(address) = cli.rpc_address {
        config.listener.rpc_address = address;
    }
    if let Some(address) = cli.gateway_address {
        config.listener.gateway_address = address;
    }
    if cli.shared_port {
        config.listener.shared_port = true;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }

    init_logging(&config.observability.log_filter, config.observability.log_format)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatehouse starting");
    tracing::info!(
        rpc_address = %config.listener.rpc_address,
        gateway_address = %config.listener.gateway_address,
        shared_port = config.listener.shared_port,
        shutdown_timeout_ms = config.shutdown.timeout_ms,
        "Configuration loaded"
    );

    let runtime = RuntimeBuilder::from_config(config)
        .method(RpcMethod::unary(HEALTH_METHOD, |_call: UnaryCall| async {
            Ok::<_, Status>(bytes::Bytes::from_static(b"SERVING"))
        }))
        .route(Method::GET, "/healthz", |_req: Request, _params: PathParams| async {
            Ok::<_, Status>(axum::Json(serde_json::json!({ "status": "SERVING" })))
        })
        .build()?;

    runtime.start().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
