//! Per-method request validation.
//!
//! Validators are registered per fully qualified method. Unary payloads are
//! checked before the handler runs; streaming calls have every inbound
//! message checked as it is received.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::interceptor::{Interceptor, MessageStream, Next, Streaming, StreamingCall, Unary, UnaryCall};
use crate::rpc::status::Status;

/// Checks a single decoded request message.
pub trait Validate: Send + Sync + 'static {
    /// Returns a human readable reason when the message is rejected.
    fn validate(&self, message: &[u8]) -> Result<(), String>;
}

impl<F> Validate for F
where
    F: Fn(&[u8]) -> Result<(), String> + Send + Sync + 'static,
{
    fn validate(&self, message: &[u8]) -> Result<(), String> {
        self(message)
    }
}

/// Rejects messages that fail their method's validator with `InvalidArgument`.
#[derive(Clone, Default)]
pub struct ValidationInterceptor {
    validators: Arc<HashMap<String, Arc<dyn Validate>>>,
}

impl ValidationInterceptor {
    pub fn new(validators: HashMap<String, Arc<dyn Validate>>) -> Self {
        Self {
            validators: Arc::new(validators),
        }
    }

    fn validator(&self, method: &str) -> Option<&Arc<dyn Validate>> {
        self.validators.get(method)
    }
}

impl fmt::Debug for ValidationInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationInterceptor")
            .field("methods", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Interceptor<Unary> for ValidationInterceptor {
    fn intercept<'a>(
        &'a self,
        call: UnaryCall,
        next: Next<'a, Unary>,
    ) -> BoxFuture<'a, Result<Bytes, Status>> {
        Box::pin(async move {
            if let Some(validator) = self.validator(call.context.method()) {
                validator
                    .validate(&call.payload)
                    .map_err(Status::invalid_argument)?;
            }
            next.run(call).await
        })
    }
}

impl Interceptor<Streaming> for ValidationInterceptor {
    fn intercept<'a>(
        &'a self,
        mut call: StreamingCall,
        next: Next<'a, Streaming>,
    ) -> BoxFuture<'a, Result<MessageStream, Status>> {
        Box::pin(async move {
            if let Some(validator) = self.validator(call.context.method()).cloned() {
                let inbound = std::mem::replace(&mut call.inbound, futures_util::stream::empty().boxed());
                call.inbound = inbound
                    .map(move |message| {
                        let message = message?;
                        validator
                            .validate(&message)
                            .map_err(Status::invalid_argument)?;
                        Ok(message)
                    })
                    .boxed();
            }
            next.run(call).await
        })
    }
}
