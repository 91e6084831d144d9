//! Correlator assignment
//!
//! Correlators are random tokens, independent of trace and span ids, that
//! link spans logically across transaction segments. Two rules hold
//! everywhere:
//!
//! - the transaction correlator is whatever is inherited; it is never
//!   regenerated once a transaction exists
//! - the segment correlator is always freshly generated; it is never
//!   inherited
//!
//! So two segments of one transaction always share a transaction
//! correlator and never share a segment correlator.

use crate::tags;
use crate::{SEG_CORRELATOR_TAG, TRX_CORRELATOR_TAG};
use serde_json::Value;
use tracing::warn;
use tyme_trace_core::SpanHandle;

/// Generate a fresh correlator token.
pub fn new_correlator() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Correlate a freshly bootstrapped transaction with the ambient trace.
///
/// If the wrapper's propagated tags already carry a transaction correlator
/// the wrapper sits inside an existing transaction and that correlator is
/// inherited; otherwise a fresh one is generated. A fresh segment
/// correlator is generated either way. Both correlators are stamped as
/// tags on both spans, and the transaction correlator is merged into the
/// bootstrap span's propagated set so descendants inherit it.
pub fn ensure_bootstrap_correlation(wrapper: &SpanHandle, bootstrap: &SpanHandle) {
    let wrapper_tags = tags::read(wrapper);
    let trx_correlator = wrapper_tags
        .get(TRX_CORRELATOR_TAG)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(new_correlator);
    let seg_correlator = new_correlator();

    wrapper.set_tag(TRX_CORRELATOR_TAG, trx_correlator.clone());
    bootstrap.set_tag(TRX_CORRELATOR_TAG, trx_correlator.clone());

    wrapper.set_tag(SEG_CORRELATOR_TAG, seg_correlator.clone());
    bootstrap.set_tag(SEG_CORRELATOR_TAG, seg_correlator);

    tags::merge_entry(bootstrap, TRX_CORRELATOR_TAG, trx_correlator);
}

/// Correlate a resumed segment with its transaction.
///
/// The transaction correlator comes from the segment span's inherited
/// propagated tags. If it is missing the segment belongs to a broken or
/// foreign transaction: stamping is skipped entirely and the caller
/// proceeds uncorrelated. That is a soft failure, not an error.
pub fn ensure_segment_correlation(segment: &SpanHandle, wrapper: &SpanHandle) {
    let propagated = tags::read(segment);
    let Some(trx_correlator) = propagated.get(TRX_CORRELATOR_TAG).and_then(Value::as_str) else {
        warn!(
            segment_span_id = segment.span_id(),
            "segment has no inherited transaction correlator; leaving it uncorrelated"
        );
        return;
    };
    let seg_correlator = new_correlator();

    wrapper.set_tag(TRX_CORRELATOR_TAG, trx_correlator);

    wrapper.set_tag(SEG_CORRELATOR_TAG, seg_correlator.clone());
    segment.set_tag(SEG_CORRELATOR_TAG, seg_correlator);
}
