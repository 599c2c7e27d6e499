//! Concurrent listener startup and outcome funneling.
//!
//! # Responsibilities
//! - Run each listener unit on its own task, under `catch_unwind`
//! - Deliver each unit's terminal outcome through its own single-slot channel
//! - Wait for whichever comes first: a unit's outcome or the interrupt
//!
//! # Design Decisions
//! - A panicking unit is reported as `RuntimeError::ListenerPanicked`; siblings keep running
//! - No retries: a bind failure ends that unit

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;

use crate::observability::panic::panic_message;
use crate::runtime::RuntimeError;

/// Terminal outcome of one listener unit.
pub type ListenerOutcome = Result<(), RuntimeError>;

/// The first thing that happened while waiting on a `ListenerSet`.
#[derive(Debug)]
pub enum ListenerEvent<S> {
    /// A listener unit finished, cleanly or not.
    Exited {
        listener: &'static str,
        outcome: ListenerOutcome,
    },
    /// The interrupt future resolved first.
    Interrupted(S),
}

/// A set of running listener units.
#[derive(Debug, Default)]
pub struct ListenerSet {
    units: Vec<(&'static str, oneshot::Receiver<ListenerOutcome>)>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units still running, by name.
    pub fn pending(&self) -> Vec<&'static str> {
        self.units.iter().map(|(name, _)| *name).collect()
    }

    /// Spawn a listener unit on its own task.
    pub fn spawn<F>(&mut self, listener: &'static str, unit: F)
    where
        F: Future<Output = ListenerOutcome> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(listener, panic = %message, "Listener panicked");
                    Err(RuntimeError::ListenerPanicked { listener, message })
                }
            };
            if let Err(e) = &outcome {
                tracing::error!(listener, error = %e, "Listener exited with error");
            } else {
                tracing::info!(listener, "Listener exited");
            }
            // Nobody listening any more is fine: the runtime has moved on.
            let _ = tx.send(outcome);
        });
        self.units.push((listener, rx));
    }

    /// Wait for the first unit outcome or the interrupt, whichever comes first.
    ///
    /// A unit that reported is removed from the set. With no units left only
    /// the interrupt can resolve the wait.
    pub async fn wait<S>(&mut self, interrupt: impl Future<Output = S>) -> ListenerEvent<S> {
        let exited = {
            let units = &mut self.units;
            let first_exit = async move {
                if units.is_empty() {
                    return std::future::pending().await;
                }
                let waits = units.iter_mut().map(|(name, rx)| {
                    let name = *name;
                    Box::pin(async move { (name, rx.await) })
                });
                let ((listener, received), index, _) = futures_util::future::select_all(waits).await;
                (index, listener, received)
            };

            tokio::select! {
                (index, listener, received) = first_exit => Ok((index, listener, received)),
                signal = interrupt => Err(signal),
            }
        };

        match exited {
            Ok((index, listener, received)) => {
                self.units.remove(index);
                let outcome = received.unwrap_or(Err(RuntimeError::ListenerLost { listener }));
                ListenerEvent::Exited { listener, outcome }
            }
            Err(signal) => ListenerEvent::Interrupted(signal),
        }
    }
}
