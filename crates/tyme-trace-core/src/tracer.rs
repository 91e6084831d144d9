//! The tracer trait and scoped span helpers
//!
//! [`Tracer`] is the seam between the correlation layer and a concrete
//! tracer backend. The correlation layer only ever needs five operations:
//! look up the active span, start a root or child span, and inject/extract
//! a propagation context through a string-map carrier.

use crate::context::{current_span, with_active_span};
use crate::span::{FinishGuard, SpanContext, SpanHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;

/// A flat string map used to inject and extract propagation contexts.
///
/// This is the transport-safe half of a transaction anchor: whatever keys
/// a tracer writes here must survive JSON serialization and arbitrary
/// out-of-band transports (queue payloads, HTTP headers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextMapCarrier(BTreeMap<String, String>);

impl TextMapCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A tracer backend.
///
/// Implementations must make child spans inherit the baggage of the parent
/// context they are created from, and must round-trip baggage through
/// `inject`/`extract` — the correlation layer's propagated-tag mechanism
/// rides on that behavior.
pub trait Tracer: Send + Sync {
    /// The span currently active on this call chain, if any.
    fn active_span(&self) -> Option<SpanHandle> {
        current_span()
    }

    /// Start a root span (a fresh trace).
    fn start_span(&self, name: &str) -> SpanHandle;

    /// Start a span as a child of `parent`, inheriting its baggage.
    fn start_child_span(&self, name: &str, parent: &SpanContext) -> SpanHandle;

    /// Write `span`'s propagation context (including baggage) into `carrier`.
    fn inject(&self, span: &SpanHandle, carrier: &mut TextMapCarrier);

    /// Recover a parent context from `carrier`. `None` if the carrier does
    /// not hold a context this tracer understands.
    fn extract(&self, carrier: &TextMapCarrier) -> Option<SpanContext>;
}

/// Start a span (child of the ambient active span, or a new root), activate
/// it for the duration of `f`, and finish it afterwards.
pub async fn trace_scope<T, F, Fut, R>(tracer: &T, name: &str, f: F) -> R
where
    T: Tracer + ?Sized,
    F: FnOnce(SpanHandle) -> Fut,
    Fut: Future<Output = R>,
{
    let span = match tracer.active_span() {
        Some(parent) => tracer.start_child_span(name, &parent.context()),
        None => tracer.start_span(name),
    };
    debug!(span = name, span_id = span.span_id(), "trace scope opened");
    let guard = FinishGuard::new(span.clone());
    let result = with_active_span(span, f(guard.span().clone())).await;
    drop(guard);
    result
}

/// Like [`trace_scope`], but parented at an explicit context instead of the
/// ambient active span.
pub async fn trace_scope_with_parent<T, F, Fut, R>(
    tracer: &T,
    name: &str,
    parent: &SpanContext,
    f: F,
) -> R
where
    T: Tracer + ?Sized,
    F: FnOnce(SpanHandle) -> Fut,
    Fut: Future<Output = R>,
{
    let span = tracer.start_child_span(name, parent);
    debug!(
        span = name,
        span_id = span.span_id(),
        parent_span_id = %parent.span_id,
        "trace scope opened under explicit parent"
    );
    let guard = FinishGuard::new(span.clone());
    let result = with_active_span(span, f(guard.span().clone())).await;
    drop(guard);
    result
}
