//! `(topic, method)` → handler dispatch with wildcard fallback tiers.
//!
//! Handlers are registered up front and the dispatcher is then shared as
//! `Arc<Dispatcher>`, after which the registry can no longer change.
//!
//! For an envelope with topic `T` and method `M` the tiers
//! `(T, M)`, `(T, *)`, `(*, M)`, `(*, *)` are visited in that order. Within
//! a tier handlers run sequentially in registration order. A handler that
//! returns an error or panics is logged and recorded in the
//! [`DispatchReport`]; the remaining handlers still run.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use tracing::{debug, error};

use crate::envelope::match_tiers;
use crate::errors::HandlerError;
use crate::link::Delivery;
use crate::telemetry::HANDLER_FAILURES_TOTAL;

/// Receives envelopes matching the key it was registered under.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    /// Process one envelope.
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EnvelopeHandler`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler.
///
/// The closure receives an owned [`Delivery`] so its future can be
/// `'static`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> EnvelopeHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        (self.0)(delivery.clone()).await
    }
}

/// How a single handler invocation failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerFault {
    /// The handler returned an error.
    Error(String),
    /// The handler panicked.
    Panicked(String),
}

impl HandlerFault {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Panicked(_) => "panic",
        }
    }

    /// The error text or panic message.
    pub fn detail(&self) -> &str {
        match self {
            Self::Error(detail) | Self::Panicked(detail) => detail,
        }
    }
}

/// One failed handler invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Topic of the registry key the handler sits under.
    pub topic: String,
    /// Method of the registry key the handler sits under.
    pub method: String,
    /// Position of the handler within that key's list.
    pub position: usize,
    /// What went wrong.
    pub fault: HandlerFault,
}

/// Outcome of dispatching one envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers invoked across all tiers.
    pub invoked: usize,
    /// Handlers that failed, in invocation order.
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    /// Whether every invoked handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry of handlers keyed by `(topic, method)`.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, HashMap<String, Vec<Arc<dyn EnvelopeHandler>>>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler under `(topic, method)`. Either may be `*`.
    pub fn register(&mut self, topic: &str, method: &str, handler: impl EnvelopeHandler + 'static) {
        self.register_arc(topic, method, Arc::new(handler));
    }

    /// Append a shared handler under `(topic, method)`.
    pub fn register_arc(&mut self, topic: &str, method: &str, handler: Arc<dyn EnvelopeHandler>) {
        debug!(topic, method, "handler registered");
        self.handlers
            .entry(topic.to_owned())
            .or_default()
            .entry(method.to_owned())
            .or_default()
            .push(handler);
    }

    /// Handlers registered under exactly `(topic, method)`.
    pub fn handler_count(&self, topic: &str, method: &str) -> usize {
        self.handlers
            .get(topic)
            .and_then(|methods| methods.get(method))
            .map_or(0, Vec::len)
    }

    /// Whether no handler is registered at all.
    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(|methods| methods.values().all(Vec::is_empty))
    }

    /// Run every matching handler, tier by tier.
    pub async fn dispatch(&self, delivery: &Delivery) -> DispatchReport {
        let envelope = delivery.envelope();
        let mut report = DispatchReport::default();

        for (topic, method) in match_tiers(&envelope.topic, &envelope.method) {
            let Some(handlers) = self.handlers.get(topic).and_then(|methods| methods.get(method))
            else {
                continue;
            };

            for (position, handler) in handlers.iter().enumerate() {
                report.invoked += 1;
                let outcome = AssertUnwindSafe(handler.handle(delivery)).catch_unwind().await;
                let fault = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(err)) => HandlerFault::Error(err.to_string()),
                    Err(panic) => HandlerFault::Panicked(panic_message(&*panic)),
                };

                error!(
                    topic = %envelope.topic,
                    method = %envelope.method,
                    key = %format_args!("{topic}/{method}"),
                    position,
                    fault = fault.kind(),
                    detail = fault.detail(),
                    "handler failed"
                );
                counter!(
                    HANDLER_FAILURES_TOTAL,
                    "topic" => topic.to_owned(),
                    "fault" => fault.kind()
                )
                .increment(1);
                report.failures.push(HandlerFailure {
                    topic: topic.to_owned(),
                    method: method.to_owned(),
                    position,
                    fault,
                });
            }
        }

        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
