//! Span handles and span contexts
//!
//! A [`SpanHandle`] is a cheaply cloneable reference to one span's mutable
//! state (tags, baggage, end time). All mutation goes through the handle,
//! and the handle is only ever shared with the call that is constructing
//! the span, so a plain mutex is enough.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The propagation-relevant identity of a span.
///
/// This is what crosses boundaries: trace id, span id, and a snapshot of
/// the span's baggage at the moment the context was taken. Child spans
/// created from a context inherit its baggage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// Trace ID shared by every span in one trace
    pub trace_id: String,

    /// ID of the span this context refers to
    pub span_id: String,

    /// Baggage snapshot; inherited by children created from this context
    pub baggage: HashMap<String, String>,
}

/// A handle to one span owned by a [`Tracer`](crate::tracer::Tracer)
#[derive(Clone)]
pub struct SpanHandle {
    inner: Arc<SpanInner>,
}

struct SpanInner {
    name: String,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    started_at: DateTime<Utc>,
    state: Mutex<SpanState>,
}

#[derive(Default)]
struct SpanState {
    tags: HashMap<String, Value>,
    baggage: HashMap<String, String>,
    ended_at: Option<DateTime<Utc>>,
}

impl SpanHandle {
    /// Create a new span. `baggage` is the inherited baggage of the parent
    /// context, empty for a root span. The span id is generated here.
    pub fn new(
        name: impl Into<String>,
        trace_id: impl Into<String>,
        parent_span_id: Option<String>,
        baggage: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                name: name.into(),
                trace_id: trace_id.into(),
                span_id: ulid::Ulid::new().to_string(),
                parent_span_id,
                started_at: Utc::now(),
                state: Mutex::new(SpanState {
                    baggage,
                    ..SpanState::default()
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.inner.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.inner.parent_span_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Set a tag on this span. Tags do not propagate to descendants.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.state.lock().tags.insert(key.into(), value.into());
    }

    pub fn get_tag(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().tags.get(key).cloned()
    }

    /// Snapshot of all tags
    pub fn tags(&self) -> HashMap<String, Value> {
        self.inner.state.lock().tags.clone()
    }

    /// Set a baggage item. Baggage is inherited by descendant spans and
    /// carried through context injection.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .state
            .lock()
            .baggage
            .insert(key.into(), value.into());
    }

    pub fn get_baggage_item(&self, key: &str) -> Option<String> {
        self.inner.state.lock().baggage.get(key).cloned()
    }

    /// Snapshot of all baggage items
    pub fn baggage(&self) -> HashMap<String, String> {
        self.inner.state.lock().baggage.clone()
    }

    /// Finish the span. Idempotent: the first end time wins.
    pub fn finish(&self) {
        let mut state = self.inner.state.lock();
        if state.ended_at.is_none() {
            state.ended_at = Some(Utc::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().ended_at.is_some()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().ended_at
    }

    /// Take this span's propagation context (ids + baggage snapshot)
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.inner.trace_id.clone(),
            span_id: self.inner.span_id.clone(),
            baggage: self.baggage(),
        }
    }
}

impl std::fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanHandle")
            .field("name", &self.inner.name)
            .field("trace_id", &self.inner.trace_id)
            .field("span_id", &self.inner.span_id)
            .field("parent_span_id", &self.inner.parent_span_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Finishes a span when dropped.
///
/// Used on every owned span so that closure happens on all exit paths,
/// including a cancelled callback future.
pub struct FinishGuard {
    span: SpanHandle,
}

impl FinishGuard {
    pub fn new(span: SpanHandle) -> Self {
        Self { span }
    }

    pub fn span(&self) -> &SpanHandle {
        &self.span
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.span.finish();
    }
}
