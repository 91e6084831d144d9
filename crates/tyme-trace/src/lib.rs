//! Tyme Trace - transaction correlation over a pluggable tracer
//!
//! This crate lets a process start a logically independent "transaction"
//! trace that stays linked to whatever trace was active when it started,
//! ship that linkage across process boundaries as a serializable
//! [`TransactionAnchor`], and resume on the receiving side as a new,
//! correctly-parented "segment" trace:
//!
//! - **Transactions**: [`TransactionTracer::begin_transaction`] opens a new
//!   trace for a callback, correlated back to the ambient trace
//! - **Anchors**: [`TransactionTracer::pickle_active_span`] snapshots the
//!   current position into a transport-safe value
//! - **Segments**: [`TransactionTracer::resume_transaction`] re-enters the
//!   same logical transaction from an anchor
//!
//! Everything degrades to plain callback invocation when there is no
//! active trace or the anchor is unusable; this layer never fails the
//! caller's work.

pub mod config;
pub mod correlate;
pub mod pickle;
pub mod tags;
pub mod transaction;

// Re-export commonly used types
pub use config::{SegmentOptions, TransactionOptions};
pub use pickle::{AnchorError, TransactionAnchor};
pub use transaction::TransactionTracer;

pub use tyme_trace_core::{
    current_span, trace_scope, trace_scope_with_parent, with_active_span, MemoryTracer,
    SpanContext, SpanHandle, TextMapCarrier, Tracer,
};

/// Baggage slot holding the serialized propagated-tag set
pub const PROPAGATED_TAGS_KEY: &str = "x-tymegroup-propagated-tags";

/// Tag identifying the whole logical transaction; stable across segments
pub const TRX_CORRELATOR_TAG: &str = "trx-correlator";

/// Tag identifying one hop within a transaction; fresh at every bootstrap
/// and resume
pub const SEG_CORRELATOR_TAG: &str = "seg-correlator";

/// Canonical service-name tag
pub const SERVICE_NAME_TAG: &str = "service.name";

/// Normalized mirror of [`SERVICE_NAME_TAG`] for tracers that key on it
pub const SERVICE_TAG: &str = "service";

/// Resource label tag forced onto bootstrap and segment spans
pub const RESOURCE_NAME_TAG: &str = "resource.name";
