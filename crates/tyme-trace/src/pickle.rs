//! Transaction anchors ("pickles")
//!
//! An anchor is a serializable snapshot of the currently active span's
//! propagation-relevant state: service identity, transaction correlator,
//! and the tracer's own injected context. It travels out-of-band (queue
//! message, HTTP headers) and is read-only — resuming from the same anchor
//! any number of times is legal.

use crate::tags;
use crate::{SERVICE_NAME_TAG, TRX_CORRELATOR_TAG};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tyme_trace_core::{SpanContext, SpanHandle, TextMapCarrier, Tracer};

/// Anchor transport error
#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("anchor serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A serializable snapshot enabling a remote process to resume inside the
/// same transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAnchor {
    /// Service that produced the anchor, if its propagated tags carried one
    pub service_name: Option<String>,

    /// Transaction correlator at the anchored position, if any
    pub trx_correlator: Option<String>,

    /// Opaque context produced by the tracer's own injection
    pub tracer_context: TextMapCarrier,
}

impl TransactionAnchor {
    /// Serialize for transport.
    pub fn to_json(&self) -> Result<String, AnchorError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from transport.
    pub fn from_json(raw: &str) -> Result<Self, AnchorError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Snapshot `span` into an anchor.
pub fn pickle_span<T>(tracer: &T, span: &SpanHandle) -> TransactionAnchor
where
    T: Tracer + ?Sized,
{
    let propagated = tags::read(span);
    let service_name = propagated
        .get(SERVICE_NAME_TAG)
        .and_then(Value::as_str)
        .map(str::to_string);
    let trx_correlator = propagated
        .get(TRX_CORRELATOR_TAG)
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tracer_context = TextMapCarrier::new();
    tracer.inject(span, &mut tracer_context);

    TransactionAnchor {
        service_name,
        trx_correlator,
        tracer_context,
    }
}

/// Recover a parent context from `anchor`.
///
/// `None` when the anchor carries no tracer context or the tracer cannot
/// decode it; callers treat that as "no transaction to resume", not an
/// error.
pub fn unpickle<T>(tracer: &T, anchor: &TransactionAnchor) -> Option<SpanContext>
where
    T: Tracer + ?Sized,
{
    if anchor.tracer_context.is_empty() {
        return None;
    }
    tracer.extract(&anchor.tracer_context)
}
