//! Transaction bootstrap and segment resume
//!
//! [`TransactionTracer`] wraps a tracer backend with the two entry points
//! of the correlation protocol. `begin_transaction` opens a fresh trace
//! for a callback, tied back to the ambient trace through a disposable
//! wrapper span. `resume_transaction` re-enters a transaction from a
//! [`TransactionAnchor`] produced elsewhere.
//!
//! Neither call owns an error path: with no active trace, or an unusable
//! anchor, the callback simply runs untraced, and whatever the callback
//! produces (value or failure) is returned unchanged.

use crate::config::{SegmentOptions, TransactionOptions};
use crate::pickle::{self, TransactionAnchor};
use crate::{correlate, tags};
use crate::{RESOURCE_NAME_TAG, SERVICE_NAME_TAG, SERVICE_TAG, TRX_CORRELATOR_TAG};
use serde_json::Value;
use std::future::Future;
use tracing::debug;
use tyme_trace_core::{
    trace_scope, trace_scope_with_parent, with_active_span, FinishGuard, SpanContext, SpanHandle,
    Tracer,
};

/// The correlation layer's front door, wrapping a tracer backend
pub struct TransactionTracer<T: Tracer> {
    tracer: T,
}

impl<T: Tracer> TransactionTracer<T> {
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }

    /// The wrapped tracer backend
    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Run `callback` inside a new transaction trace for `service_name`.
    ///
    /// The new trace is rooted at its own bootstrap span; a short-lived
    /// wrapper span under the ambient trace carries the correlators that
    /// tie the two together. With no ambient trace at all this is a plain
    /// passthrough: the callback runs untraced.
    ///
    /// Returns exactly what the callback produced. The bootstrap span is
    /// finished on every exit path, including cancellation.
    pub async fn begin_transaction<F, Fut, R>(
        &self,
        service_name: &str,
        options: TransactionOptions,
        callback: F,
    ) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        if self.tracer.active_span().is_none() {
            debug!(
                service = service_name,
                "no active trace; running transaction callback untraced"
            );
            return callback().await;
        }

        let bootstrap = self.build_bootstrap_span(service_name, &options);
        let wrapper_name = format!("transaction-bootstrap-wrapper-{service_name}");

        trace_scope(&self.tracer, &wrapper_name, |wrapper| async move {
            let guard = FinishGuard::new(bootstrap.clone());
            with_active_span(bootstrap, async move {
                correlate::ensure_bootstrap_correlation(&wrapper, guard.span());
                let result = callback().await;
                drop(guard);
                result
            })
            .await
        })
        .await
    }

    /// Run `callback` inside a segment of the transaction `anchor` points
    /// at.
    ///
    /// Degrades to a plain passthrough when there is no ambient trace, no
    /// anchor, the anchor does not decode to a parent context, or the
    /// anchor carries no transaction correlator. When the ambient trace
    /// already sits inside the anchored transaction the segment stays in
    /// the live trace instead of re-parenting under the remote context, so
    /// redundant in-process resumes do not fragment the trace.
    pub async fn resume_transaction<F, Fut, R>(
        &self,
        anchor: Option<&TransactionAnchor>,
        options: SegmentOptions,
        callback: F,
    ) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        if self.tracer.active_span().is_none() {
            debug!("no active trace; running segment callback untraced");
            return callback().await;
        }
        let Some(anchor) = anchor else {
            debug!("no anchor; running segment callback untraced");
            return callback().await;
        };
        let Some(anchor_context) = pickle::unpickle(&self.tracer, anchor) else {
            debug!("anchor does not decode to a parent context; running segment callback untraced");
            return callback().await;
        };
        let Some(trx_correlator) = anchor.trx_correlator.clone() else {
            debug!("anchor carries no transaction correlator; running segment callback untraced");
            return callback().await;
        };

        let wrapper_name = format!("transaction-segment-wrapper-{}", options.segment_label);
        let segment_name = format!("transaction-segment-{}", options.segment_label);

        trace_scope(&self.tracer, &wrapper_name, |wrapper| async move {
            let parent_context = self.choose_segment_parent(&wrapper, &trx_correlator, anchor_context);

            trace_scope_with_parent(
                &self.tracer,
                &segment_name,
                &parent_context,
                |segment| async move {
                    tags::apply(&segment, &tags::read(&segment));
                    correlate::ensure_segment_correlation(&segment, &wrapper);

                    for (key, value) in &options.tags {
                        segment.set_tag(key.clone(), value.clone());
                    }
                    segment.set_tag(RESOURCE_NAME_TAG, "transaction-segment");

                    callback().await
                },
            )
            .await
        })
        .await
    }

    /// Snapshot the ambient active span into an anchor. `None` when no
    /// span is active.
    pub fn pickle_active_span(&self) -> Option<TransactionAnchor> {
        let span = self.tracer.active_span()?;
        Some(pickle::pickle_span(&self.tracer, &span))
    }

    /// Recover a parent context from `anchor`; `None` means "no
    /// transaction to resume".
    pub fn unpickle(&self, anchor: &TransactionAnchor) -> Option<SpanContext> {
        pickle::unpickle(&self.tracer, anchor)
    }

    /// A wrapper whose inherited transaction correlator equals the
    /// anchor's is already inside the transaction being resumed; parent
    /// the segment at the wrapper to stay in the live trace.
    fn choose_segment_parent(
        &self,
        wrapper: &SpanHandle,
        trx_correlator: &str,
        anchor_context: SpanContext,
    ) -> SpanContext {
        let same_transaction = tags::read(wrapper)
            .get(TRX_CORRELATOR_TAG)
            .and_then(Value::as_str)
            .is_some_and(|inherited| inherited == trx_correlator);
        if same_transaction {
            wrapper.context()
        } else {
            anchor_context
        }
    }

    fn build_bootstrap_span(&self, service_name: &str, options: &TransactionOptions) -> SpanHandle {
        let span = self
            .tracer
            .start_span(&format!("transaction-bootstrap-{service_name}"));

        let mut propagated = options.propagated_tags.clone();
        propagated.insert(SERVICE_NAME_TAG.to_string(), Value::from(service_name));
        tags::apply(&span, &propagated);

        for (key, value) in &options.tags {
            span.set_tag(key.clone(), value.clone());
        }
        for (key, value) in &options.baggage_items {
            span.set_baggage_item(key.clone(), value.clone());
        }

        // persist the propagated set after raw baggage items so a caller
        // item keyed at the reserved slot cannot clobber it
        tags::write(&span, &propagated);

        // forced last so caller-supplied tags cannot override identity
        span.set_tag(SERVICE_NAME_TAG, service_name);
        span.set_tag(SERVICE_TAG, service_name);
        span.set_tag(RESOURCE_NAME_TAG, "transaction-bootstrap");

        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PROPAGATED_TAGS_KEY, SEG_CORRELATOR_TAG};
    use tyme_trace_core::{current_span, MemoryTracer};

    fn setup() -> (MemoryTracer, TransactionTracer<MemoryTracer>) {
        let backend = MemoryTracer::new();
        (backend.clone(), TransactionTracer::new(backend))
    }

    fn active_trx_correlator() -> Option<String> {
        let span = current_span()?;
        tags::read(&span)
            .get(TRX_CORRELATOR_TAG)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_bootstrap_opens_an_isolated_trace() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |inbound| async move {
            let ambient_trace = inbound.trace_id().to_string();
            let bootstrap_trace = txn
                .begin_transaction("svc-a", TransactionOptions::default(), || async {
                    current_span().unwrap().trace_id().to_string()
                })
                .await;
            assert_ne!(bootstrap_trace, ambient_trace);
            // ambient span restored after the call
            assert_eq!(current_span().unwrap().trace_id(), ambient_trace);
        })
        .await;
    }

    #[tokio::test]
    async fn test_bootstrap_propagates_a_transaction_correlator() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |_| async move {
            let trx = txn
                .begin_transaction("svc-a", TransactionOptions::default(), || async {
                    active_trx_correlator()
                })
                .await;
            assert!(trx.is_some());
        })
        .await;
    }

    #[tokio::test]
    async fn test_nested_transactions_share_one_correlator() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |_| async move {
            txn.begin_transaction("outer", TransactionOptions::default(), || async move {
                let outer_trx = active_trx_correlator().unwrap();
                let inner_trx = txn
                    .begin_transaction("inner", TransactionOptions::default(), || async {
                        active_trx_correlator().unwrap()
                    })
                    .await;
                assert_eq!(inner_trx, outer_trx);
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_untraced_host_is_a_passthrough() {
        let (backend, txn) = setup();
        let value = txn
            .begin_transaction("svc-a", TransactionOptions::default(), || async { 42 })
            .await;
        assert_eq!(value, 42);
        assert!(backend.spans().is_empty());
    }

    #[tokio::test]
    async fn test_resume_without_anchor_is_a_passthrough() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "worker", |worker| async move {
            let seen = txn
                .resume_transaction(None, SegmentOptions::default(), || async {
                    current_span().unwrap().span_id().to_string()
                })
                .await;
            assert_eq!(seen, worker.span_id());
            assert_eq!(current_span().unwrap().span_id(), worker.span_id());
        })
        .await;
        // only the worker span was ever created
        assert_eq!(backend.spans().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_with_undecodable_anchor_is_a_passthrough() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);
        let anchor = TransactionAnchor {
            service_name: Some(String::from("svc-a")),
            trx_correlator: Some(String::from("trx-1")),
            tracer_context: Default::default(),
        };
        let anchor = &anchor;

        trace_scope(backend, "worker", |_| async move {
            let value = txn
                .resume_transaction(Some(anchor), SegmentOptions::default(), || async { "ok" })
                .await;
            assert_eq!(value, "ok");
        })
        .await;
        assert_eq!(backend.spans().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_without_transaction_correlator_is_a_passthrough() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        // anchor taken from a plain span that never entered a transaction
        let anchor = trace_scope(backend, "plain", |_| async move {
            txn.pickle_active_span().unwrap()
        })
        .await;
        assert!(anchor.trx_correlator.is_none());
        let anchor = &anchor;

        trace_scope(backend, "worker", |_| async move {
            txn.resume_transaction(Some(anchor), SegmentOptions::default(), || async {})
                .await;
        })
        .await;
        assert!(backend.spans_named("transaction-segment-default").is_empty());
    }

    #[tokio::test]
    async fn test_callback_value_passes_through_unchanged() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |_| async move {
            let ok = txn
                .begin_transaction("svc", TransactionOptions::default(), || async { 42 })
                .await;
            assert_eq!(ok, 42);

            let err: Result<(), String> = txn
                .begin_transaction("svc", TransactionOptions::default(), || async {
                    Err(String::from("boom"))
                })
                .await;
            assert_eq!(err, Err(String::from("boom")));
        })
        .await;

        // failure path still finished every bootstrap span
        let bootstraps = backend.spans_named("transaction-bootstrap-svc");
        assert_eq!(bootstraps.len(), 2);
        for span in bootstraps {
            assert!(span.is_finished());
        }
    }

    #[tokio::test]
    async fn test_resumed_segments_share_transaction_and_parent() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        let (anchor, bootstrap_span_id) = trace_scope(backend, "inbound", |_| async move {
            txn.begin_transaction("svc-a", TransactionOptions::default(), || async move {
                let span = current_span().unwrap();
                (txn.pickle_active_span().unwrap(), span.span_id().to_string())
            })
            .await
        })
        .await;

        assert_eq!(anchor.service_name.as_deref(), Some("svc-a"));
        let trx = anchor.trx_correlator.clone().unwrap();
        let anchor = &anchor;

        // two independent resumes, as if in two receiving processes
        let mut seg_correlators = Vec::new();
        let mut segment_ids = Vec::new();
        for _ in 0..2 {
            let (seg_trx, seg_corr, span_id, parent_id) =
                trace_scope(backend, "queue-worker", |_| async move {
                    txn.resume_transaction(Some(anchor), SegmentOptions::default(), || async {
                        let span = current_span().unwrap();
                        (
                            span.get_tag(TRX_CORRELATOR_TAG),
                            span.get_tag(SEG_CORRELATOR_TAG),
                            span.span_id().to_string(),
                            span.parent_span_id().map(str::to_string),
                        )
                    })
                    .await
                })
                .await;

            assert_eq!(seg_trx, Some(Value::from(trx.as_str())));
            assert_eq!(parent_id.as_deref(), Some(bootstrap_span_id.as_str()));
            seg_correlators.push(seg_corr.unwrap());
            segment_ids.push(span_id);
        }

        assert_ne!(seg_correlators[0], seg_correlators[1]);
        assert_ne!(segment_ids[0], segment_ids[1]);
    }

    #[tokio::test]
    async fn test_in_process_resume_stays_in_the_live_trace() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |_| async move {
            txn.begin_transaction("svc-a", TransactionOptions::default(), || async move {
                let bootstrap = current_span().unwrap();
                let anchor = txn.pickle_active_span().unwrap();

                let (trace_id, parent_id) = txn
                    .resume_transaction(Some(&anchor), SegmentOptions::default(), || async {
                        let span = current_span().unwrap();
                        (
                            span.trace_id().to_string(),
                            span.parent_span_id().map(str::to_string),
                        )
                    })
                    .await;

                // same live trace, parented at the wrapper rather than the
                // pickled bootstrap span
                assert_eq!(trace_id, bootstrap.trace_id());
                let wrapper = &backend.spans_named("transaction-segment-wrapper-default")[0];
                assert_eq!(parent_id.as_deref(), Some(wrapper.span_id()));
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_span_tags_never_enter_the_propagated_set() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        let anchor = trace_scope(backend, "inbound", |_| async move {
            let options = TransactionOptions::new().tag("one-shot", true);
            txn.begin_transaction("svc-a", options, || async move {
                let span = current_span().unwrap();
                assert_eq!(span.get_tag("one-shot"), Some(Value::from(true)));
                assert!(!tags::read(&span).contains_key("one-shot"));
                txn.pickle_active_span().unwrap()
            })
            .await
        })
        .await;
        let anchor = &anchor;

        trace_scope(backend, "worker", |_| async move {
            let options = SegmentOptions::new().tag("seg-only", 1);
            txn.resume_transaction(Some(anchor), options, || async {
                let span = current_span().unwrap();
                assert_eq!(span.get_tag("seg-only"), Some(Value::from(1)));
                let propagated = tags::read(&span);
                assert!(!propagated.contains_key("one-shot"));
                assert!(!propagated.contains_key("seg-only"));
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_options_reach_span_baggage_and_descendants() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        let anchor = trace_scope(backend, "inbound", |_| async move {
            let options = TransactionOptions::new()
                .propagated_tag("tenant", "acme")
                .baggage_item("raw-item", "verbatim");
            txn.begin_transaction("svc-a", options, || async move {
                let span = current_span().unwrap();
                assert_eq!(tags::read(&span).get("tenant"), Some(&Value::from("acme")));
                assert_eq!(
                    span.get_baggage_item("raw-item").as_deref(),
                    Some("verbatim")
                );
                txn.pickle_active_span().unwrap()
            })
            .await
        })
        .await;
        let anchor = &anchor;

        trace_scope(backend, "worker", |_| async move {
            let options = SegmentOptions::new().label("billing");
            txn.resume_transaction(Some(anchor), options, || async {
                let span = current_span().unwrap();
                // propagated tag inherited and applied as a queryable tag
                assert_eq!(span.get_tag("tenant"), Some(Value::from("acme")));
                assert_eq!(span.get_tag(SERVICE_TAG), Some(Value::from("svc-a")));
                assert_eq!(
                    span.get_tag(RESOURCE_NAME_TAG),
                    Some(Value::from("transaction-segment"))
                );
            })
            .await;
        })
        .await;

        assert_eq!(backend.spans_named("transaction-segment-billing").len(), 1);
        assert_eq!(
            backend
                .spans_named("transaction-segment-wrapper-billing")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_reserved_slot_baggage_item_cannot_clobber_propagated_set() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |_| async move {
            let options = TransactionOptions::new()
                .propagated_tag("tenant", "acme")
                .baggage_item(PROPAGATED_TAGS_KEY, "{}");
            txn.begin_transaction("svc-a", options, || async move {
                let span = current_span().unwrap();
                let propagated = tags::read(&span);
                assert_eq!(
                    propagated.get(SERVICE_NAME_TAG),
                    Some(&Value::from("svc-a"))
                );
                assert_eq!(propagated.get("tenant"), Some(&Value::from("acme")));

                let anchor = txn.pickle_active_span().unwrap();
                assert_eq!(anchor.service_name.as_deref(), Some("svc-a"));
                assert!(anchor.trx_correlator.is_some());
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_foreign_anchor_resumes_uncorrelated() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        // a context that decodes but carries no propagated-tag slot, with a
        // correlator bolted on by hand
        let mut anchor = trace_scope(backend, "plain", |_| async move {
            txn.pickle_active_span().unwrap()
        })
        .await;
        anchor.trx_correlator = Some(String::from("trx-foreign"));
        let anchor = &anchor;

        trace_scope(backend, "worker", |_| async move {
            txn.resume_transaction(Some(anchor), SegmentOptions::default(), || async {
                let span = current_span().unwrap();
                assert!(tags::read(&span).is_empty());
                assert!(span.get_tag(TRX_CORRELATOR_TAG).is_none());
                assert!(span.get_tag(SEG_CORRELATOR_TAG).is_none());
                "still ran"
            })
            .await
        })
        .await;

        // the segment span was still created and closed
        let segment = &backend.spans_named("transaction-segment-default")[0];
        assert!(segment.is_finished());
    }

    #[tokio::test]
    async fn test_wrapper_and_bootstrap_share_correlator_stamps() {
        let (backend, txn) = setup();
        let (backend, txn) = (&backend, &txn);

        trace_scope(backend, "inbound", |_| async move {
            txn.begin_transaction("svc-a", TransactionOptions::default(), || async {})
                .await;
        })
        .await;

        let wrapper = &backend.spans_named("transaction-bootstrap-wrapper-svc-a")[0];
        let bootstrap = &backend.spans_named("transaction-bootstrap-svc-a")[0];

        assert_eq!(
            wrapper.get_tag(TRX_CORRELATOR_TAG),
            bootstrap.get_tag(TRX_CORRELATOR_TAG)
        );
        assert_eq!(
            wrapper.get_tag(SEG_CORRELATOR_TAG),
            bootstrap.get_tag(SEG_CORRELATOR_TAG)
        );
        assert!(wrapper.is_finished());
        assert!(bootstrap.is_finished());
        // wrapper stays in the ambient trace; bootstrap roots its own
        assert_ne!(wrapper.trace_id(), bootstrap.trace_id());
        assert!(bootstrap.parent_span_id().is_none());
    }
}
