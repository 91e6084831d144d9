//! Propagated-tag store
//!
//! Propagated tags are a string→primitive mapping carried as one JSON
//! string under the reserved baggage key [`PROPAGATED_TAGS_KEY`]. Keeping
//! the whole set in a single entry avoids scattering entries across the
//! tracer's shared baggage namespace; this module is the only place that
//! knows the slot's wire format.
//!
//! The set is append-only along a transaction: every new span that
//! continues the transaction re-attaches it, and merges never drop keys.

use crate::{PROPAGATED_TAGS_KEY, SERVICE_NAME_TAG, SERVICE_TAG};
use serde_json::Value;
use std::collections::HashMap;
use tyme_trace_core::SpanHandle;

/// A parsed propagated-tag set
pub type TagSet = HashMap<String, Value>;

/// Read the propagated-tag set from `span`'s reserved baggage slot.
///
/// Absent or unparsable data degrades to an empty set; this never errors.
pub fn read(span: &SpanHandle) -> TagSet {
    span.get_baggage_item(PROPAGATED_TAGS_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Serialize `tags` into `span`'s reserved baggage slot, replacing any
/// previous value.
pub fn write(span: &SpanHandle, tags: &TagSet) {
    let raw = serde_json::to_string(tags).unwrap_or_else(|_| String::from("{}"));
    span.set_baggage_item(PROPAGATED_TAGS_KEY, raw);
}

/// Copy every entry of `tags` onto `span` as individually-queryable tags
/// while keeping the set in the baggage slot for forward propagation.
///
/// Also forces a normalized `service` tag mirroring `service.name`, for
/// tracers that key on the shorter name.
pub fn apply(span: &SpanHandle, tags: &TagSet) {
    for (key, value) in tags {
        span.set_tag(key.clone(), value.clone());
    }
    if let Some(service) = tags.get(SERVICE_NAME_TAG) {
        span.set_tag(SERVICE_TAG, service.clone());
    }
    write(span, tags);
}

/// Read-modify-write a single entry of `span`'s propagated-tag set.
pub fn merge_entry(span: &SpanHandle, key: &str, value: impl Into<Value>) {
    let mut tags = read(span);
    tags.insert(key.to_string(), value.into());
    write(span, &tags);
}
