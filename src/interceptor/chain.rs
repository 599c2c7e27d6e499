//! Ordered composition of call interceptors.
//!
//! # Responsibilities
//! - Hold the interceptors of one call shape in declaration order
//! - Hand each call to the outermost interceptor, which may continue inward
//! - Finish at the registered handler
//!
//! # Design Decisions
//! - Interceptor `i` wraps the composition of `i+1..n`
//! - The chain is frozen before serving and shared through `Arc` afterwards

use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::interceptor::{CallKind, Handler, Interceptor};
use crate::rpc::status::Status;

/// Interceptors for one call shape.
pub struct Chain<K: CallKind> {
    interceptors: Vec<Arc<dyn Interceptor<K>>>,
}

impl<K: CallKind> Chain<K> {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor. It runs inside every interceptor pushed before it.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor<K>>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run a call through every interceptor and then the handler.
    pub fn run<'a>(
        &'a self,
        call: K::Call,
        handler: &'a dyn Handler<K>,
    ) -> BoxFuture<'a, Result<K::Output, Status>> {
        Next {
            remaining: &self.interceptors,
            handler,
        }
        .run(call)
    }
}

impl<K: CallKind> Clone for Chain<K> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<K: CallKind> Default for Chain<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CallKind> fmt::Debug for Chain<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("kind", &K::NAME)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Cursor over the part of a chain that has not run yet.
pub struct Next<'a, K: CallKind> {
    remaining: &'a [Arc<dyn Interceptor<K>>],
    handler: &'a dyn Handler<K>,
}

impl<'a, K: CallKind> Next<'a, K> {
    /// Continue the call with the next interceptor, or the handler once none remain.
    pub fn run(self, call: K::Call) -> BoxFuture<'a, Result<K::Output, Status>> {
        match self.remaining.split_first() {
            Some((interceptor, rest)) => interceptor.intercept(
                call,
                Next {
                    remaining: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.call(call),
        }
    }
}
