//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for the configured interrupt signals
//! - Resolve with the first signal received
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are installed before listeners start, so an early signal is not lost
//! - Only Ctrl-C exists on non-Unix targets; other signals are ignored there

use serde::{Deserialize, Serialize};
use std::fmt;

/// A signal that triggers graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGHUP.
    Hangup,
    /// SIGQUIT.
    Quit,
    /// SIGUSR1.
    User1,
    /// SIGUSR2.
    User2,
}

/// Signals handled when none are configured.
pub const DEFAULT_SIGNALS: [InterruptSignal; 2] = [InterruptSignal::Interrupt, InterruptSignal::Terminate];

impl fmt::Display for InterruptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterruptSignal::Interrupt => "SIGINT",
            InterruptSignal::Terminate => "SIGTERM",
            InterruptSignal::Hangup => "SIGHUP",
            InterruptSignal::Quit => "SIGQUIT",
            InterruptSignal::User1 => "SIGUSR1",
            InterruptSignal::User2 => "SIGUSR2",
        };
        f.write_str(name)
    }
}

/// Installed handlers for a set of interrupt signals.
pub struct Interrupts {
    #[cfg(unix)]
    streams: Vec<(InterruptSignal, tokio::signal::unix::Signal)>,
    #[cfg(not(unix))]
    ctrl_c: bool,
}

impl Interrupts {
    /// Install handlers. Must be called inside a Tokio runtime.
    #[cfg(unix)]
    pub fn install(signals: &[InterruptSignal]) -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, Signal, SignalKind};

        let mut streams: Vec<(InterruptSignal, Signal)> = Vec::with_capacity(signals.len());
        for &sig in signals {
            if streams.iter().any(|(installed, _)| *installed == sig) {
                continue;
            }
            let kind = match sig {
                InterruptSignal::Interrupt => SignalKind::interrupt(),
                InterruptSignal::Terminate => SignalKind::terminate(),
                InterruptSignal::Hangup => SignalKind::hangup(),
                InterruptSignal::Quit => SignalKind::quit(),
                InterruptSignal::User1 => SignalKind::user_defined1(),
                InterruptSignal::User2 => SignalKind::user_defined2(),
            };
            streams.push((sig, signal(kind)?));
        }
        tracing::debug!(signals = ?signals, "Signal handlers installed");
        Ok(Self { streams })
    }

    #[cfg(not(unix))]
    pub fn install(signals: &[InterruptSignal]) -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: signals.contains(&InterruptSignal::Interrupt),
        })
    }

    /// Wait for the first signal. Never resolves when no signal is installed.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> InterruptSignal {
        if self.streams.is_empty() {
            return std::future::pending().await;
        }
        let waits = self.streams.iter_mut().map(|(sig, stream)| {
            let sig = *sig;
            Box::pin(async move {
                stream.recv().await;
                sig
            })
        });
        let (sig, _, _) = futures_util::future::select_all(waits).await;
        sig
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> InterruptSignal {
        if !self.ctrl_c {
            return std::future::pending().await;
        }
        loop {
            if tokio::signal::ctrl_c().await.is_ok() {
                return InterruptSignal::Interrupt;
            }
        }
    }
}

impl fmt::Debug for Interrupts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupts").finish_non_exhaustive()
    }
}
