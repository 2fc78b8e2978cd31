//! `Storage`: factory for read/write handles over a TailStore engine.

use std::sync::Arc;
use std::time::Duration;

use tailstore_core::TailStoreEngine;

use crate::codec::Codec;
use crate::readwriter::ReadWriter;
use crate::sharded::ShardedReadWriter;

/// Share of the configured limit that may actually be used. The engine's
/// size accounting lags real usage; the remainder absorbs that lag.
const STORAGE_LIMIT_THRESHOLD: f64 = 0.90;

/// Storage for sampled trace events and trace sampling decisions.
///
/// Entries expire `ttl` after they are written. The effective byte limit is
/// 90% of the configured one; 0 means unlimited.
pub struct Storage {
    engine: Arc<TailStoreEngine>,
    codec: Arc<dyn Codec>,
    ttl: Duration,
    limit: u64,
}

impl Storage {
    pub fn new(
        engine: Arc<TailStoreEngine>,
        codec: Arc<dyn Codec>,
        ttl: Duration,
        limit: u64,
    ) -> Self {
        Self {
            engine,
            codec,
            ttl,
            limit: effective_limit(limit),
        }
    }

    /// A reader/writer over one fresh transaction.
    ///
    /// Writes that are not flushed before the writer is closed are lost.
    pub fn new_read_writer(self: &Arc<Self>) -> ReadWriter {
        ReadWriter::new(Arc::clone(self))
    }

    /// A pool of writers, one per available CPU.
    pub fn new_sharded_read_writer(self: &Arc<Self>) -> ShardedReadWriter {
        let shards = std::thread::available_parallelism().map_or(1, |n| n.get());
        self.new_sharded_read_writer_with(shards)
    }

    /// A pool of exactly `shards` writers (at least one).
    pub fn new_sharded_read_writer_with(self: &Arc<Self>, shards: usize) -> ShardedReadWriter {
        ShardedReadWriter::new(self, shards)
    }

    /// Whether the engine's last reported on-disk size reached the
    /// effective limit. A single atomic load; cheap on every flush.
    pub fn limit_reached(&self) -> bool {
        self.limit != 0 && self.engine.size() >= self.limit
    }

    /// Entry time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Effective byte limit after the safety margin; 0 = unlimited.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn engine(&self) -> &Arc<TailStoreEngine> {
        &self.engine
    }

    pub(crate) fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.engine.path())
            .field("ttl", &self.ttl)
            .field("limit", &self.limit)
            .finish()
    }
}

/// 90% of `limit`, never rounded down to 0 (which would mean unlimited).
fn effective_limit(limit: u64) -> u64 {
    if limit == 0 {
        return 0;
    }
    ((limit as f64 * STORAGE_LIMIT_THRESHOLD) as u64).max(1)
}
