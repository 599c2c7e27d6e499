//! Runtime assembly.
//!
//! # Responsibilities
//! - Collect settings from a config file, fluent calls and option closures
//! - Register RPC methods, gateway routes, registrars and hooks
//! - Compose the unary and streaming interceptor chains
//! - Validate everything once in `build`
//!
//! # Design Decisions
//! - Chain order is fixed: validation, recovery, user interceptors, context
//!   injection, metrics
//! - Registration errors are kept until `build` so calls stay fluent

use axum::extract::Request;
use axum::http::Method;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::loader::ConfigError;
use crate::config::schema::RuntimeConfig;
use crate::config::validation::validate_config;
use crate::http::gateway::{GatewayMiddleware, GatewayRegistrar, GatewaySettings};
use crate::http::response::{default_translator, ErrorTranslator};
use crate::http::server::{HttpServer, HttpServerConfig, ShutdownHook};
use crate::interceptor::{
    Chain, Interceptor, RecoveryInterceptor, RequestContextInjector, Streaming, Unary, Validate,
    ValidationInterceptor,
};
use crate::lifecycle::shutdown::{ShutdownSequencer, ShutdownSettings};
use crate::lifecycle::signals::InterruptSignal;
use crate::lifecycle::state::{LifecycleState, StateMachine};
use crate::observability::metrics::{self, MetricsInterceptor};
use crate::observability::panic::install_backtrace_hook;
use crate::routing::{PathParams, Route, RouteHandler, RouteTable};
use crate::rpc::server::RpcServer;
use crate::rpc::service::{RpcMethod, RpcService};
use crate::rpc::status::Status;
use crate::runtime::options::RuntimeOption;
use crate::runtime::{GatewayParts, Runtime, RuntimeSettings};

/// Path of the Prometheus endpoint added when metrics are enabled.
pub const METRICS_PATH: &str = "/metrics";

/// Collects everything a [`Runtime`] needs before it is built.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    methods: Vec<RpcMethod>,
    unary: Vec<Arc<dyn Interceptor<Unary>>>,
    streaming: Vec<Arc<dyn Interceptor<Streaming>>>,
    routes: RouteTable,
    registrars: Vec<Arc<dyn GatewayRegistrar>>,
    middleware: Vec<GatewayMiddleware>,
    translator: Option<ErrorTranslator>,
    shutdown_hook: Option<ShutdownHook>,
    errors: Vec<ConfigError>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration file.
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// A runtime still collecting options is always `Created`.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::Created
    }

    /// Apply one option closure.
    pub fn apply(mut self, option: RuntimeOption) -> Self {
        option(&mut self);
        self
    }

    /// Apply options in order.
    pub fn options(self, options: impl IntoIterator<Item = RuntimeOption>) -> Self {
        options.into_iter().fold(self, Self::apply)
    }

    pub fn rpc_address(mut self, address: impl Into<String>) -> Self {
        self.config.listener.rpc_address = address.into();
        self
    }

    pub fn gateway_address(mut self, address: impl Into<String>) -> Self {
        self.config.listener.gateway_address = address.into();
        self
    }

    /// Serve RPC and gateway traffic on the gateway address.
    pub fn shared_port(mut self, enabled: bool) -> Self {
        self.config.listener.shared_port = enabled;
        self
    }

    /// Stop the runtime when one listener fails.
    pub fn cancel_sibling_on_failure(mut self, enabled: bool) -> Self {
        self.config.listener.cancel_sibling_on_failure = enabled;
        self
    }

    pub fn request_logging(mut self, enabled: bool) -> Self {
        self.config.observability.request_logging = enabled;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.observability.metrics_enabled = enabled;
        self
    }

    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.gateway.static_dir = Some(dir.into().to_string_lossy().into_owned());
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown.timeout_ms = millis(timeout);
        self
    }

    pub fn pre_shutdown_delay(mut self, delay: Duration) -> Self {
        self.config.shutdown.pre_shutdown_delay_ms = millis(delay);
        self
    }

    /// Bound the RPC drain. Unbounded unless set.
    pub fn rpc_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown.rpc_drain_timeout_ms = Some(millis(timeout));
        self
    }

    /// Add a signal to the interrupt set.
    pub fn signal(mut self, signal: InterruptSignal) -> Self {
        if !self.config.shutdown.signals.contains(&signal) {
            self.config.shutdown.signals.push(signal);
        }
        self
    }

    pub fn header_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.gateway.header_read_timeout_ms = millis(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.gateway.request_timeout_ms = millis(timeout);
        self
    }

    /// Close connections that carry no request for this long.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.gateway.idle_timeout_ms = millis(timeout);
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.rpc.max_message_size = bytes;
        self
    }

    pub fn error_translator<F>(mut self, translator: F) -> Self
    where
        F: Fn(&Status) -> axum::http::Response<axum::body::Body> + Send + Sync + 'static,
    {
        self.translator = Some(Arc::new(translator));
        self
    }

    /// Add a unary interceptor, run after the built-in ones in registration order.
    pub fn unary_interceptor(mut self, interceptor: impl Interceptor<Unary>) -> Self {
        self.unary.push(Arc::new(interceptor));
        self
    }

    /// Add a streaming interceptor, run after the built-in ones in registration order.
    pub fn streaming_interceptor(mut self, interceptor: impl Interceptor<Streaming>) -> Self {
        self.streaming.push(Arc::new(interceptor));
        self
    }

    pub fn method(mut self, method: RpcMethod) -> Self {
        self.methods.push(method);
        self
    }

    pub fn route(mut self, method: Method, pattern: &str, handler: impl RouteHandler) -> Self {
        if let Err(e) = self.routes.route(method, pattern, handler) {
            self.errors.push(e.into());
        }
        self
    }

    pub fn registrar(mut self, registrar: impl GatewayRegistrar + 'static) -> Self {
        self.registrars.push(Arc::new(registrar));
        self
    }

    /// Run `hook` once when the gateway starts shutting down.
    pub fn shutdown_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.shutdown_hook = Some(Box::new(hook));
        self
    }

    pub fn gateway_middleware(mut self, wrap: impl Fn(Router) -> Router + Send + Sync + 'static) -> Self {
        self.middleware.push(Arc::new(wrap));
        self
    }

    /// Validate and freeze everything into a `Configured` runtime.
    pub fn build(self) -> Result<Runtime, ConfigError> {
        install_backtrace_hook();
        let state = StateMachine::new(self.state());

        let RuntimeBuilder {
            config,
            methods,
            unary,
            streaming,
            routes: user_routes,
            registrars,
            middleware,
            translator,
            shutdown_hook,
            errors,
        } = self;

        if let Some(e) = errors.into_iter().next() {
            return Err(e);
        }
        validate_config(&config).map_err(ConfigError::Validation)?;
        let rpc_address = parse_address(&config.listener.rpc_address)?;
        let gateway_address = parse_address(&config.listener.gateway_address)?;

        let mut handlers = HashMap::with_capacity(methods.len());
        let mut validators: HashMap<String, Arc<dyn Validate>> = HashMap::new();
        for method in methods {
            check_method_name(method.name())?;
            if handlers.contains_key(method.name()) {
                return Err(ConfigError::DuplicateMethod(method.name().to_owned()));
            }
            if let Some(validator) = method.validator() {
                validators.insert(method.name().to_owned(), Arc::clone(validator));
            }
            handlers.insert(method.name().to_owned(), method.handler().clone());
        }

        let observability = &config.observability;
        let mut routes = RouteTable::new();
        if observability.metrics_enabled {
            metrics::install_recorder()?;
            routes.add(Route::get(METRICS_PATH, |_req: Request, _params: PathParams| async {
                Ok::<_, Status>(metrics::render())
            })?);
        }
        for route in user_routes.routes() {
            routes.add(route.clone());
        }

        let validation = ValidationInterceptor::new(validators);
        let context = RequestContextInjector::new(observability.request_logging);

        let mut unary_chain = Chain::<Unary>::new();
        unary_chain.push(Arc::new(validation.clone()));
        unary_chain.push(Arc::new(RecoveryInterceptor::new()));
        unary.into_iter().for_each(|i| unary_chain.push(i));
        unary_chain.push(Arc::new(context.clone()));

        let mut streaming_chain = Chain::<Streaming>::new();
        streaming_chain.push(Arc::new(validation));
        streaming_chain.push(Arc::new(RecoveryInterceptor::new()));
        streaming.into_iter().for_each(|i| streaming_chain.push(i));
        streaming_chain.push(Arc::new(context));

        if observability.metrics_enabled {
            unary_chain.push(Arc::new(MetricsInterceptor));
            streaming_chain.push(Arc::new(MetricsInterceptor));
        }

        let rpc_service = RpcService::new(
            handlers,
            unary_chain,
            streaming_chain,
            config.rpc.max_message_size,
        );

        let http = HttpServerConfig {
            header_read_timeout: Duration::from_millis(config.gateway.header_read_timeout_ms),
            idle_timeout: Some(Duration::from_millis(config.gateway.idle_timeout_ms)),
        };
        let settings = RuntimeSettings {
            rpc_address,
            gateway_address,
            shared_port: config.listener.shared_port,
            cancel_sibling_on_failure: config.listener.cancel_sibling_on_failure,
            signals: config.shutdown.signals.clone(),
            shutdown: ShutdownSettings {
                timeout: config.shutdown.timeout(),
                pre_shutdown_delay: config.shutdown.pre_shutdown_delay(),
                rpc_drain_timeout: config.shutdown.rpc_drain_timeout(),
            },
            gateway: GatewaySettings {
                request_timeout: Duration::from_millis(config.gateway.request_timeout_ms),
                static_dir: config.gateway.static_dir.as_ref().map(PathBuf::from),
                metrics_enabled: observability.metrics_enabled,
            },
            http,
        };

        let rpc = (!settings.shared_port).then(|| RpcServer::new(rpc_service.clone(), http));
        let _ = state.transition(LifecycleState::Created, LifecycleState::Configured);
        let gateway = HttpServer::new("gateway", http);
        if let Some(hook) = shutdown_hook {
            gateway.register_on_shutdown(hook);
        }
        tracing::debug!(
            methods = rpc_service.method_names().count(),
            routes = routes.len(),
            registrars = registrars.len(),
            shared_port = settings.shared_port,
            "Runtime configured"
        );

        Ok(Runtime {
            sequencer: ShutdownSequencer::new(settings.shutdown),
            settings,
            state,
            rpc_service,
            rpc,
            gateway: Arc::new(gateway),
            parts: Mutex::new(Some(GatewayParts {
                routes,
                registrars,
                middleware,
                translator: translator.unwrap_or_else(default_translator),
            })),
            bound: Mutex::default(),
        })
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("methods", &self.methods)
            .field("routes", &self.routes)
            .field("unary_interceptors", &self.unary.len())
            .field("streaming_interceptors", &self.streaming.len())
            .field("registrars", &self.registrars.len())
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_address(address: &str) -> Result<SocketAddr, ConfigError> {
    address
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(address.to_owned()))
}

/// Method names look like `/package.Service/Method`.
fn check_method_name(name: &str) -> Result<(), ConfigError> {
    let valid = name
        .strip_prefix('/')
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(service, method)| {
            !service.is_empty() && !method.is_empty() && !method.contains('/')
        });
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidMethod(name.to_owned()))
    }
}
