//! Key layout and entry tags.
//!
//! Decisions and events share one keyspace:
//!
//! | record   | key                        | tag          |
//! |----------|----------------------------|--------------|
//! | decision | `trace_id`                 | `'s'` / `'u'`|
//! | event    | `trace_id ':' event_id`    | `'e'`        |
//!
//! Trace IDs may not contain the separator. With that rule a decision key
//! cannot collide with an event key, and the scan prefix `trace_id ':'`
//! matches only that trace's events. Tag values are persisted and must
//! never change meaning.

use crate::error::{Result, StorageError};

/// Tag of a decision record for a sampled trace.
pub const META_TRACE_SAMPLED: u8 = b's';
/// Tag of a decision record for an unsampled trace.
pub const META_TRACE_UNSAMPLED: u8 = b'u';
/// Tag of a trace event record.
pub const META_TRACE_EVENT: u8 = b'e';

/// Separator between trace ID and event ID in event keys.
pub const SEPARATOR: u8 = b':';

/// Tag for a decision record.
pub fn decision_meta(sampled: bool) -> u8 {
    if sampled {
        META_TRACE_SAMPLED
    } else {
        META_TRACE_UNSAMPLED
    }
}

/// Reject trace IDs containing [`SEPARATOR`].
///
/// Events of `"a:b"` would be keyed `a:b:<id>` and fall inside the scan
/// prefix `a:` of trace `"a"`.
pub fn check_trace_id(trace_id: &str) -> Result<()> {
    if trace_id.as_bytes().contains(&SEPARATOR) {
        return Err(StorageError::InvalidTraceId(trace_id.to_string()));
    }
    Ok(())
}

/// Decision key: the raw trace ID bytes.
pub fn decision_key(trace_id: &str) -> Vec<u8> {
    trace_id.as_bytes().to_vec()
}

/// Event key: `trace_id ':' event_id`.
pub fn event_key(trace_id: &str, event_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(trace_id.len() + 1 + event_id.len());
    key.extend_from_slice(trace_id.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(event_id.as_bytes());
    key
}

/// Write the scan prefix for a trace's events into `buf`, reusing its allocation.
pub fn write_events_prefix(buf: &mut Vec<u8>, trace_id: &str) {
    buf.clear();
    buf.extend_from_slice(trace_id.as_bytes());
    buf.push(SEPARATOR);
}
