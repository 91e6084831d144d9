//! Options for beginning and resuming transactions

use serde_json::Value;
use std::collections::HashMap;

/// Options for [`begin_transaction`](crate::TransactionTracer::begin_transaction)
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Tags attached to the bootstrap span only; never propagated
    pub tags: HashMap<String, Value>,

    /// Entries merged into the propagated-tag set; inherited by every
    /// descendant of the transaction
    pub propagated_tags: HashMap<String, Value>,

    /// Raw baggage entries set verbatim on the bootstrap span, independent
    /// of the propagated-tag mechanism
    pub baggage_items: HashMap<String, String>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn propagated_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.propagated_tags.insert(key.into(), value.into());
        self
    }

    pub fn baggage_item(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage_items.insert(key.into(), value.into());
        self
    }
}

/// Options for [`resume_transaction`](crate::TransactionTracer::resume_transaction)
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// Tags attached to the segment span only; never propagated
    pub tags: HashMap<String, Value>,

    /// Names the wrapper and segment spans
    pub segment_label: String,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            tags: HashMap::new(),
            segment_label: String::from("default"),
        }
    }
}

impl SegmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn label(mut self, segment_label: impl Into<String>) -> Self {
        self.segment_label = segment_label.into();
        self
    }
}
