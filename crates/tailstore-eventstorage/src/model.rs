//! Trace event model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What kind of event a [`TraceEvent`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Root or entry-point unit of work of a service
    Transaction,
    /// Operation within a transaction
    Span,
}

/// Result of the operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    #[default]
    Unknown,
}

/// One event (span or transaction) belonging to a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub trace_id: String,
    /// Unique within the trace; used as the event key suffix
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub kind: EventKind,
    pub name: String,
    pub service_name: String,
    #[serde(default)]
    pub outcome: Outcome,
    /// Start time, microseconds since the unix epoch
    pub timestamp_us: u64,
    pub duration_us: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl TraceEvent {
    /// A transaction with no parent, labels or duration.
    pub fn transaction(
        trace_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::Transaction, trace_id, id, name)
    }

    /// A span with no parent, labels or duration.
    pub fn span(
        trace_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::Span, trace_id, id, name)
    }

    fn new(
        kind: EventKind,
        trace_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            id: id.into(),
            parent_id: None,
            kind,
            name: name.into(),
            service_name: String::new(),
            outcome: Outcome::Unknown,
            timestamp_us: 0,
            duration_us: 0,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Events read back for a trace, in key order.
pub type Batch = Vec<TraceEvent>;
