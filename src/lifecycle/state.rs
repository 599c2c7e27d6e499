//! Runtime lifecycle state machine.
//!
//! ```text
//! Created → Configured → Running → Draining → Stopped
//! ```
//!
//! Transitions only move forward. Every transition is a compare-and-set on a
//! `watch` channel, so exactly one caller wins each step and everyone else can
//! wait for the state they care about.

use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Options are still being collected.
    Created,
    /// Settings are frozen; nothing is listening yet.
    Configured,
    /// Listeners are being started or are serving.
    Running,
    /// The shutdown sequence is in progress.
    Draining,
    /// Terminal.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Configured => "configured",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, monotonic lifecycle state.
#[derive(Debug)]
pub struct StateMachine {
    state: watch::Sender<LifecycleState>,
}

impl StateMachine {
    pub fn new(initial: LifecycleState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Move from `from` to `to`. Fails, returning the actual state, when the
    /// current state is not `from` or the move would go backwards.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        let mut actual = from;
        let moved = self.state.send_if_modified(|state| {
            if *state == from && to > from {
                *state = to;
                true
            } else {
                actual = *state;
                false
            }
        });
        if moved {
            tracing::debug!(from = %from, to = %to, "Lifecycle transition");
            Ok(())
        } else {
            Err(actual)
        }
    }

    /// Resolve once the state has reached `target` or moved past it.
    pub async fn wait_for(&self, target: LifecycleState) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel stays open while we wait.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}
