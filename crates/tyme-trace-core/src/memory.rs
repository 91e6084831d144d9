//! In-memory reference tracer
//!
//! A complete, dependency-free [`Tracer`] implementation. Spans live in a
//! process-local registry so tests (and local runs) can assert on what was
//! created and finished. Context injection uses a small header-style key
//! set; baggage is carried under a key prefix, one entry per item.

use crate::span::{SpanContext, SpanHandle};
use crate::tracer::{TextMapCarrier, Tracer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const TRACE_ID_KEY: &str = "x-memtrace-trace-id";
const PARENT_ID_KEY: &str = "x-memtrace-parent-id";
const BAGGAGE_PREFIX: &str = "x-memtrace-baggage-";

/// An in-memory tracer with a span registry
#[derive(Clone, Default)]
pub struct MemoryTracer {
    spans: Arc<Mutex<Vec<SpanHandle>>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, span: SpanHandle) -> SpanHandle {
        self.spans.lock().push(span.clone());
        span
    }

    /// All spans started by this tracer, in start order
    pub fn spans(&self) -> Vec<SpanHandle> {
        self.spans.lock().clone()
    }

    /// All finished spans, in start order
    pub fn finished_spans(&self) -> Vec<SpanHandle> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.is_finished())
            .cloned()
            .collect()
    }

    /// Spans whose name matches exactly
    pub fn spans_named(&self, name: &str) -> Vec<SpanHandle> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.name() == name)
            .cloned()
            .collect()
    }
}

impl Tracer for MemoryTracer {
    fn start_span(&self, name: &str) -> SpanHandle {
        let trace_id = ulid::Ulid::new().to_string();
        debug!(span = name, trace_id = %trace_id, "starting root span");
        self.register(SpanHandle::new(name, trace_id, None, HashMap::new()))
    }

    fn start_child_span(&self, name: &str, parent: &SpanContext) -> SpanHandle {
        debug!(
            span = name,
            trace_id = %parent.trace_id,
            parent_span_id = %parent.span_id,
            "starting child span"
        );
        self.register(SpanHandle::new(
            name,
            parent.trace_id.clone(),
            Some(parent.span_id.clone()),
            parent.baggage.clone(),
        ))
    }

    fn inject(&self, span: &SpanHandle, carrier: &mut TextMapCarrier) {
        carrier.set(TRACE_ID_KEY, span.trace_id());
        carrier.set(PARENT_ID_KEY, span.span_id());
        for (key, value) in span.baggage() {
            carrier.set(format!("{BAGGAGE_PREFIX}{key}"), value);
        }
    }

    fn extract(&self, carrier: &TextMapCarrier) -> Option<SpanContext> {
        let trace_id = carrier.get(TRACE_ID_KEY)?;
        let span_id = carrier.get(PARENT_ID_KEY)?;

        let baggage = carrier
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(BAGGAGE_PREFIX)
                    .map(|k| (k.to_string(), value.to_string()))
            })
            .collect();

        Some(SpanContext {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            baggage,
        })
    }
}
