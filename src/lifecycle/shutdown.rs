//! Multi-phase graceful shutdown.
//!
//! # Phases
//! 1. Disable keep-alive on the gateway, so idle HTTP/1 connections close on next use
//! 2. Pre-shutdown delay, letting load balancers notice before listeners go away
//! 3. Graceful RPC stop: stop accepting, GOAWAY every connection, wait for calls
//! 4. Gateway shutdown bounded by the shutdown timeout, force-closing stragglers
//!
//! # Design Decisions
//! - Phases are strictly sequential; each is recorded in a `ShutdownReport`
//! - A forced close is a reported outcome, never an error of the shutdown itself
//! - The servers are reached through two narrow traits, so the sequence can be
//!   driven against fakes

use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};

use crate::http::server::HttpServerError;

/// Default bound on the gateway drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between disabling keep-alive and stopping the RPC server.
pub const DEFAULT_PRE_SHUTDOWN_DELAY: Duration = Duration::from_secs(2);

/// What the sequencer needs from the gateway server.
#[async_trait]
pub trait GatewayControl: Send + Sync {
    fn set_keep_alives_enabled(&self, enabled: bool);

    /// Stop accepting and drain, force-closing whatever is left at the deadline.
    async fn shutdown(&self, timeout: Duration) -> Result<(), HttpServerError>;
}

/// What the sequencer needs from the RPC server.
#[async_trait]
pub trait RpcControl: Send + Sync {
    /// Stop accepting and wait for in-flight calls. `None` waits indefinitely.
    async fn graceful_stop(&self, bound: Option<Duration>) -> Result<(), HttpServerError>;
}

/// One step of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownPhase {
    DisableKeepAlive,
    PreShutdownDelay,
    RpcGracefulStop,
    GatewayShutdown,
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownPhase::DisableKeepAlive => "disable-keep-alive",
            ShutdownPhase::PreShutdownDelay => "pre-shutdown-delay",
            ShutdownPhase::RpcGracefulStop => "rpc-graceful-stop",
            ShutdownPhase::GatewayShutdown => "gateway-shutdown",
        };
        f.write_str(name)
    }
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Skipped,
    /// The drain deadline passed and `remaining` connections were dropped.
    ForcedClose { remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRecord {
    pub phase: ShutdownPhase,
    pub outcome: PhaseOutcome,
    pub started_at: Instant,
    pub elapsed: Duration,
}

/// Outcome of a completed shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub phases: Vec<PhaseRecord>,
    pub total: Duration,
}

impl ShutdownReport {
    pub fn phase(&self, phase: ShutdownPhase) -> Option<&PhaseRecord> {
        self.phases.iter().find(|record| record.phase == phase)
    }

    /// Whether the gateway drain hit its deadline.
    pub fn gateway_forced(&self) -> bool {
        matches!(
            self.phase(ShutdownPhase::GatewayShutdown).map(|r| r.outcome),
            Some(PhaseOutcome::ForcedClose { .. })
        )
    }

    /// Whether the bounded RPC drain hit its deadline.
    pub fn rpc_forced(&self) -> bool {
        matches!(
            self.phase(ShutdownPhase::RpcGracefulStop).map(|r| r.outcome),
            Some(PhaseOutcome::ForcedClose { .. })
        )
    }
}

/// Timing knobs of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSettings {
    pub timeout: Duration,
    pub pre_shutdown_delay: Duration,
    pub rpc_drain_timeout: Option<Duration>,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            pre_shutdown_delay: DEFAULT_PRE_SHUTDOWN_DELAY,
            rpc_drain_timeout: None,
        }
    }
}

/// Runs the four shutdown phases in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownSequencer {
    settings: ShutdownSettings,
}

impl ShutdownSequencer {
    pub fn new(settings: ShutdownSettings) -> Self {
        Self { settings }
    }

    /// Drain both servers. `rpc` is `None` when RPC traffic shares the gateway listener.
    pub async fn run(&self, gateway: &dyn GatewayControl, rpc: Option<&dyn RpcControl>) -> ShutdownReport {
        let started = Instant::now();
        let mut phases = Vec::with_capacity(4);

        let phase_start = Instant::now();
        gateway.set_keep_alives_enabled(false);
        phases.push(finish(ShutdownPhase::DisableKeepAlive, PhaseOutcome::Completed, phase_start));

        let phase_start = Instant::now();
        let outcome = if self.settings.pre_shutdown_delay.is_zero() {
            PhaseOutcome::Skipped
        } else {
            tokio::time::sleep(self.settings.pre_shutdown_delay).await;
            PhaseOutcome::Completed
        };
        phases.push(finish(ShutdownPhase::PreShutdownDelay, outcome, phase_start));

        let phase_start = Instant::now();
        let outcome = match rpc {
            Some(rpc) => drain_outcome(
                ShutdownPhase::RpcGracefulStop,
                rpc.graceful_stop(self.settings.rpc_drain_timeout).await,
            ),
            None => PhaseOutcome::Skipped,
        };
        phases.push(finish(ShutdownPhase::RpcGracefulStop, outcome, phase_start));

        let phase_start = Instant::now();
        let outcome = drain_outcome(
            ShutdownPhase::GatewayShutdown,
            gateway.shutdown(self.settings.timeout).await,
        );
        phases.push(finish(ShutdownPhase::GatewayShutdown, outcome, phase_start));

        let report = ShutdownReport {
            phases,
            total: started.elapsed(),
        };
        tracing::info!(
            total_ms = report.total.as_millis() as u64,
            gateway_forced = report.gateway_forced(),
            "Shutdown sequence complete"
        );
        report
    }
}

fn finish(phase: ShutdownPhase, outcome: PhaseOutcome, started_at: Instant) -> PhaseRecord {
    let elapsed = started_at.elapsed();
    tracing::info!(
        phase = %phase,
        outcome = ?outcome,
        elapsed_ms = elapsed.as_millis() as u64,
        "Shutdown phase finished"
    );
    PhaseRecord {
        phase,
        outcome,
        started_at,
        elapsed,
    }
}

fn drain_outcome(phase: ShutdownPhase, result: Result<(), HttpServerError>) -> PhaseOutcome {
    match result {
        Ok(()) => PhaseOutcome::Completed,
        Err(HttpServerError::DrainTimeout { timeout, remaining }) => {
            tracing::warn!(
                phase = %phase,
                timeout_ms = timeout.as_millis() as u64,
                remaining,
                "Drain deadline passed, connections forced closed"
            );
            PhaseOutcome::ForcedClose { remaining }
        }
        Err(e) => {
            tracing::warn!(phase = %phase, error = %e, "Drain finished with error");
            PhaseOutcome::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Journal(Mutex<Vec<(&'static str, Instant)>>);

    impl Journal {
        fn push(&self, event: &'static str) {
            self.0.lock().unwrap().push((event, Instant::now()));
        }

        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().iter().map(|(e, _)| *e).collect()
        }
    }

    struct FakeGateway {
        journal: Arc<Journal>,
        forced: bool,
    }

    #[async_trait]
    impl GatewayControl for FakeGateway {
        fn set_keep_alives_enabled(&self, enabled: bool) {
            assert!(!enabled);
            self.journal.push("keep-alive off");
        }

        async fn shutdown(&self, timeout: Duration) -> Result<(), HttpServerError> {
            self.journal.push("gateway shutdown");
            if self.forced {
                Err(HttpServerError::DrainTimeout { timeout, remaining: 2 })
            } else {
                Ok(())
            }
        }
    }

    struct FakeRpc {
        journal: Arc<Journal>,
        work: Duration,
    }

    #[async_trait]
    impl RpcControl for FakeRpc {
        async fn graceful_stop(&self, _bound: Option<Duration>) -> Result<(), HttpServerError> {
            self.journal.push("rpc stop begin");
            tokio::time::sleep(self.work).await;
            self.journal.push("rpc stop end");
            Ok(())
        }
    }

    fn settings(delay_ms: u64) -> ShutdownSettings {
        ShutdownSettings {
            timeout: Duration::from_millis(100),
            pre_shutdown_delay: Duration::from_millis(delay_ms),
            rpc_drain_timeout: None,
        }
    }

    #[tokio::test]
    async fn phases_run_in_order_without_overlap() {
        let journal = Arc::new(Journal::default());
        let gateway = FakeGateway {
            journal: journal.clone(),
            forced: false,
        };
        let rpc = FakeRpc {
            journal: journal.clone(),
            work: Duration::from_millis(30),
        };

        let report = ShutdownSequencer::new(settings(20)).run(&gateway, Some(&rpc)).await;

        assert_eq!(
            journal.events(),
            ["keep-alive off", "rpc stop begin", "rpc stop end", "gateway shutdown"]
        );
        let order: Vec<_> = report.phases.iter().map(|r| r.phase).collect();
        assert_eq!(
            order,
            [
                ShutdownPhase::DisableKeepAlive,
                ShutdownPhase::PreShutdownDelay,
                ShutdownPhase::RpcGracefulStop,
                ShutdownPhase::GatewayShutdown,
            ]
        );
        for pair in report.phases.windows(2) {
            assert!(pair[0].started_at + pair[0].elapsed <= pair[1].started_at);
        }
        let delay = report.phase(ShutdownPhase::PreShutdownDelay).unwrap();
        assert!(delay.elapsed >= Duration::from_millis(20));
        assert!(!report.gateway_forced());
    }

    #[tokio::test]
    async fn zero_delay_and_shared_port_are_skipped() {
        let journal = Arc::new(Journal::default());
        let gateway = FakeGateway {
            journal: journal.clone(),
            forced: false,
        };

        let report = ShutdownSequencer::new(settings(0)).run(&gateway, None).await;

        assert_eq!(
            report.phase(ShutdownPhase::PreShutdownDelay).unwrap().outcome,
            PhaseOutcome::Skipped
        );
        assert_eq!(
            report.phase(ShutdownPhase::RpcGracefulStop).unwrap().outcome,
            PhaseOutcome::Skipped
        );
        assert_eq!(journal.events(), ["keep-alive off", "gateway shutdown"]);
    }

    #[tokio::test]
    async fn forced_gateway_close_is_reported_not_failed() {
        let gateway = FakeGateway {
            journal: Arc::new(Journal::default()),
            forced: true,
        };

        let report = ShutdownSequencer::new(settings(0)).run(&gateway, None).await;

        assert!(report.gateway_forced());
        assert_eq!(
            report.phase(ShutdownPhase::GatewayShutdown).unwrap().outcome,
            PhaseOutcome::ForcedClose { remaining: 2 }
        );
    }
}
