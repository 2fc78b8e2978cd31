//! `ShardedReadWriter`: a fixed pool of ReadWriters routed by trace ID.
//!
//! Every trace ID hashes to one shard for the pool's lifetime, so a trace
//! is only ever written through one transaction. Each shard has its own
//! lock; operations on different shards run in parallel.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::model::{Batch, TraceEvent};
use crate::readwriter::ReadWriter;
use crate::storage::Storage;

/// Shard for `trace_id` in a pool of `shards`.
pub fn shard_index(trace_id: &str, shards: usize) -> usize {
    (xxh3_64(trace_id.as_bytes()) % shards as u64) as usize
}

/// A pool of [`ReadWriter`]s, safe to share between threads.
pub struct ShardedReadWriter {
    readwriters: Box<[Mutex<ReadWriter>]>,
}

impl ShardedReadWriter {
    pub(crate) fn new(storage: &Arc<Storage>, shards: usize) -> Self {
        let readwriters = (0..shards.max(1))
            .map(|_| Mutex::new(storage.new_read_writer()))
            .collect();
        Self { readwriters }
    }

    /// Number of shards, fixed at creation.
    pub fn shard_count(&self) -> usize {
        self.readwriters.len()
    }

    /// Flush every shard. All shards are attempted; the first error is
    /// returned and any later ones are logged.
    pub fn flush(&self) -> Result<()> {
        let mut first_err = None;
        for (shard, rw) in self.readwriters.iter().enumerate() {
            if let Err(e) = rw.lock().flush() {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    warn!(shard, error = %e, "failed to flush shard");
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Discard unflushed writes in every shard.
    pub fn close(self) {
        for rw in self.readwriters.into_vec() {
            rw.into_inner().close();
        }
    }

    /// See [`ReadWriter::write_trace_sampled`].
    pub fn write_trace_sampled(&self, trace_id: &str, sampled: bool) -> Result<()> {
        self.get_readwriter(trace_id)
            .lock()
            .write_trace_sampled(trace_id, sampled)
    }

    /// See [`ReadWriter::is_trace_sampled`].
    pub fn is_trace_sampled(&self, trace_id: &str) -> Result<bool> {
        self.get_readwriter(trace_id)
            .lock()
            .is_trace_sampled(trace_id)
    }

    /// See [`ReadWriter::write_trace_event`].
    pub fn write_trace_event(
        &self,
        trace_id: &str,
        event_id: &str,
        event: &TraceEvent,
    ) -> Result<()> {
        self.get_readwriter(trace_id)
            .lock()
            .write_trace_event(trace_id, event_id, event)
    }

    /// See [`ReadWriter::delete_trace_event`].
    pub fn delete_trace_event(&self, trace_id: &str, event_id: &str) -> Result<()> {
        self.get_readwriter(trace_id)
            .lock()
            .delete_trace_event(trace_id, event_id)
    }

    /// See [`ReadWriter::read_trace_events`].
    pub fn read_trace_events(&self, trace_id: &str, out: &mut Batch) -> Result<()> {
        self.get_readwriter(trace_id)
            .lock()
            .read_trace_events(trace_id, out)
    }

    fn get_readwriter(&self, trace_id: &str) -> &Mutex<ReadWriter> {
        &self.readwriters[shard_index(trace_id, self.readwriters.len())]
    }
}

impl std::fmt::Debug for ShardedReadWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedReadWriter")
            .field("shards", &self.readwriters.len())
            .finish()
    }
}
