//! Tyme Trace Core - span model, tracer trait, and context propagation
//!
//! This crate provides the foundational types for the tyme-trace
//! transaction correlation layer:
//!
//! - **Spans**: shared span handles with tags, baggage, and timestamps
//! - **Tracer**: the trait a concrete tracer backend implements
//! - **Context**: the ambient active-span mechanism (task-local)
//! - **Memory**: an in-memory reference tracer for tests and local runs

pub mod context;
pub mod memory;
pub mod span;
pub mod tracer;

// Re-export commonly used types
pub use context::{current_span, with_active_span};
pub use memory::MemoryTracer;
pub use span::{FinishGuard, SpanContext, SpanHandle};
pub use tracer::{trace_scope, trace_scope_with_parent, TextMapCarrier, Tracer};

/// Core version
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
