//! `ReadWriter`: one open transaction for reading and writing trace data.
//!
//! A ReadWriter is not safe for concurrent use. All operations on a trace
//! should go through the same ReadWriter so writers never conflict on a
//! key; [`crate::ShardedReadWriter`] arranges that by hashing trace IDs.

use std::mem;
use std::sync::Arc;

use tailstore_core::{Entry, Txn};

use crate::error::{Result, StorageError};
use crate::keys::{
    check_trace_id, decision_key, decision_meta, event_key, write_events_prefix, META_TRACE_EVENT,
    META_TRACE_SAMPLED,
};
use crate::model::{Batch, TraceEvent};
use crate::storage::Storage;

/// Uncommitted writes after which a write flushes on its own. Prefix scans
/// merge every pending key, so this bounds read cost.
pub const FLUSH_THRESHOLD: usize = 200;

/// Reads events from storage and writes them in batches.
pub struct ReadWriter {
    storage: Arc<Storage>,
    txn: Txn,
    /// Reusable buffer for read keys only; write keys are owned by the txn.
    read_key_buf: Vec<u8>,
    pending_writes: usize,
}

impl ReadWriter {
    pub(crate) fn new(storage: Arc<Storage>) -> Self {
        let txn = storage.engine().begin();
        Self {
            storage,
            txn,
            read_key_buf: Vec::new(),
            pending_writes: 0,
        }
    }

    /// Commit buffered writes.
    ///
    /// Returns [`StorageError::LimitReached`] without committing when the
    /// storage limit is reached; the buffered writes stay pending. Otherwise
    /// the transaction is committed and a new one opened, whether or not
    /// the commit succeeded.
    pub fn flush(&mut self) -> Result<()> {
        if self.storage.limit_reached() {
            return Err(StorageError::limit_reached());
        }
        let txn = mem::replace(&mut self.txn, self.storage.engine().begin());
        self.pending_writes = 0;
        txn.commit()?;
        Ok(())
    }

    /// Record the sampling decision for `trace_id`.
    ///
    /// Every trace-scoped operation returns [`StorageError::InvalidTraceId`]
    /// for a trace ID containing `':'`.
    pub fn write_trace_sampled(&mut self, trace_id: &str, sampled: bool) -> Result<()> {
        check_trace_id(trace_id)?;
        let entry = Entry::new(decision_key(trace_id), Vec::new())
            .with_meta(decision_meta(sampled))
            .with_ttl(self.storage.ttl());
        self.write_entry(&entry)
    }

    /// Whether `trace_id` was sampled. Sees this writer's unflushed writes.
    ///
    /// Returns [`StorageError::NotFound`] when no decision was recorded.
    pub fn is_trace_sampled(&mut self, trace_id: &str) -> Result<bool> {
        check_trace_id(trace_id)?;
        self.read_key_buf.clear();
        self.read_key_buf.extend_from_slice(trace_id.as_bytes());
        match self.txn.get(&self.read_key_buf) {
            Ok(item) => Ok(item.user_meta() == META_TRACE_SAMPLED),
            Err(e) if e.is_not_found() => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Buffer an event under `trace_id:event_id`. Call [`ReadWriter::flush`]
    /// to commit it.
    pub fn write_trace_event(
        &mut self,
        trace_id: &str,
        event_id: &str,
        event: &TraceEvent,
    ) -> Result<()> {
        check_trace_id(trace_id)?;
        let data = self
            .storage
            .codec()
            .encode_event(event)
            .map_err(StorageError::Codec)?;
        let entry = Entry::new(event_key(trace_id, event_id), data)
            .with_meta(META_TRACE_EVENT)
            .with_ttl(self.storage.ttl());
        self.write_entry(&entry)
    }

    /// Buffer deletion of the event stored under `trace_id:event_id`.
    pub fn delete_trace_event(&mut self, trace_id: &str, event_id: &str) -> Result<()> {
        check_trace_id(trace_id)?;
        let key = event_key(trace_id, event_id);
        self.write_with_retry(|txn| txn.delete(&key))
    }

    /// Append every live event of `trace_id` to `out`, in event ID order.
    pub fn read_trace_events(&mut self, trace_id: &str, out: &mut Batch) -> Result<()> {
        check_trace_id(trace_id)?;
        write_events_prefix(&mut self.read_key_buf, trace_id);
        for item in self.txn.prefix_iter(&self.read_key_buf) {
            if item.is_deleted_or_expired() {
                continue;
            }
            match item.user_meta() {
                META_TRACE_EVENT => {
                    let event = self
                        .storage
                        .codec()
                        .decode_event(item.value())
                        .map_err(StorageError::Codec)?;
                    out.push(event);
                }
                // Unknown tag: ignore.
                _ => continue,
            }
        }
        Ok(())
    }

    /// Discard unflushed writes.
    pub fn close(self) {
        self.txn.discard();
    }

    /// Writes buffered since the last flush.
    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        self.write_with_retry(|txn| txn.set_entry(entry))
    }

    /// Apply `op` to the open transaction. If the transaction is too big to
    /// take it, flush once and apply it to the fresh transaction.
    fn write_with_retry<F>(&mut self, mut op: F) -> Result<()>
    where
        F: FnMut(&mut Txn) -> tailstore_core::EngineResult<()>,
    {
        let mut retried = false;
        loop {
            match op(&mut self.txn) {
                Err(e) if e.is_txn_too_big() && !retried => {
                    self.flush()?;
                    retried = true;
                }
                result => {
                    result?;
                    break;
                }
            }
        }

        self.pending_writes += 1;
        if self.pending_writes >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReadWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWriter")
            .field("pending_writes", &self.pending_writes)
            .finish()
    }
}
