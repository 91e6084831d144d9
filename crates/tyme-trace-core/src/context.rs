//! Ambient active-span context
//!
//! The active span is carried in a tokio task-local, scoped to a future.
//! Activation is reentrant per logical call chain: nested activations
//! shadow the outer span for the duration of the inner future and restore
//! it afterwards. Concurrent tasks never observe each other's activations.

use crate::span::SpanHandle;
use std::future::Future;

tokio::task_local! {
    static ACTIVE_SPAN: SpanHandle;
}

/// Run `fut` with `span` as the ambient active span.
pub async fn with_active_span<F>(span: SpanHandle, fut: F) -> F::Output
where
    F: Future,
{
    ACTIVE_SPAN.scope(span, fut).await
}

/// The currently active span of this call chain, if any.
pub fn current_span() -> Option<SpanHandle> {
    ACTIVE_SPAN.try_with(|span| span.clone()).ok()
}
