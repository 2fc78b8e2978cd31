//! Core storage engine of TailStore.
//!
//! TailStoreEngine combines an ordered RAM index with a crash-safe WAL and a
//! background maintenance thread.
//!
//! **Read path**: RAM-first, ordered (`BTreeMap` behind an `RwLock`) so
//! prefix scans come back in key order
//! **Write path**: buffered in a [`Txn`]; commit appends the batch to the
//! WAL, then applies it to RAM
//! **Background**: size accounting refresh on a cadence, periodic GC of
//! expired entries with log compaction when dead space piles up

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::compaction::{compact_log, CompactionResult};
use crate::config::Config;
use crate::entry::{now_millis, Record};
use crate::error::{EngineError, EngineResult};
use crate::format::{encode_commit, encode_record, encoded_len, Operation};
use crate::maintenance::{start_maintenance, MaintenanceHandle};
use crate::txn::{Pending, Txn};
use crate::wal::{disk_usage, WalReader, WalWriter};

/// Ordered RAM index of committed entries.
pub(crate) struct Index {
    pub(crate) map: BTreeMap<Vec<u8>, Record>,
    /// Encoded size of every live record, for the dead-space estimate
    pub(crate) live_bytes: u64,
}

impl Index {
    fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            live_bytes: 0,
        }
    }

    fn insert(&mut self, key: Vec<u8>, record: Record) {
        let key_len = key.len();
        self.live_bytes += encoded_len(key_len, record.value.len()) as u64;
        // An overwrite replaces the old record's bytes instead of adding to them.
        if let Some(old) = self.map.insert(key, record) {
            let old_bytes = encoded_len(key_len, old.value.len()) as u64;
            self.live_bytes = self.live_bytes.saturating_sub(old_bytes);
        }
    }

    fn remove(&mut self, key: &[u8]) {
        if let Some(old) = self.map.remove(key) {
            let old_bytes = encoded_len(key.len(), old.value.len()) as u64;
            self.live_bytes = self.live_bytes.saturating_sub(old_bytes);
        }
    }

    /// Drop every entry whose TTL has passed. Returns (entries, bytes) removed.
    fn sweep_expired(&mut self, now: u64) -> (u64, u64) {
        let mut entries = 0u64;
        let mut bytes = 0u64;
        self.map.retain(|key, record| {
            if record.is_expired(now) {
                entries += 1;
                bytes += encoded_len(key.len(), record.value.len()) as u64;
                false
            } else {
                true
            }
        });
        self.live_bytes = self.live_bytes.saturating_sub(bytes);
        (entries, bytes)
    }
}

#[derive(Default)]
struct Counters {
    disk_bytes: AtomicU64,
    commits: AtomicU64,
    gc_cycles: AtomicU64,
    expired_reclaimed: AtomicU64,
    compactions: AtomicU64,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Cached on-disk size, as of the last refresh
    pub disk_bytes: u64,
    /// Estimated encoded size of live entries
    pub live_bytes: u64,
    /// Entries in the RAM index (may include expired, unswept entries)
    pub entries: usize,
    pub commits: u64,
    pub gc_cycles: u64,
    pub expired_reclaimed: u64,
    pub compactions: u64,
}

/// Outcome of one GC cycle.
#[derive(Debug)]
pub struct GcReport {
    /// Expired entries dropped from the RAM index
    pub expired_entries: u64,
    /// Dead share of the log measured before compaction (0.0 - 1.0)
    pub dead_space_ratio: f64,
    /// Set when the dead space crossed the trigger and the log was rewritten
    pub compaction: Option<CompactionResult>,
}

/// State shared by the engine handle, transactions and the maintenance thread.
///
/// Lock order is always `wal` before `index`.
pub(crate) struct Shared {
    pub(crate) index: RwLock<Index>,
    pub(crate) wal: Mutex<WalWriter>,
    pub(crate) config: Config,
    wal_dir: PathBuf,
    counters: Counters,
}

impl Shared {
    /// Append a transaction's writes to the WAL as one batch, then apply
    /// them to the RAM index. If the WAL append fails, RAM is untouched.
    pub(crate) fn commit_batch(&self, pending: BTreeMap<Vec<u8>, Pending>) -> EngineResult<()> {
        // Step 1: encode the whole batch outside any lock.
        let mut batch = Vec::new();
        for (key, op) in &pending {
            match op {
                Pending::Put(record) => encode_record(
                    &mut batch,
                    Operation::Put,
                    key,
                    &record.value,
                    record.user_meta,
                    record.expires_at,
                )?,
                Pending::Delete => encode_record(&mut batch, Operation::Delete, key, &[], 0, 0)?,
            }
        }
        // The Commit record is what makes the batch count on replay.
        encode_commit(&mut batch, pending.len() as u32)?;

        // Step 2: WAL append. The WAL lock is held across the index update
        // so both see batches in the same order.
        let mut wal = self.wal.lock();
        wal.append_batch(&batch, self.config.sync_writes)?;

        // Step 3: publish to RAM only after the WAL accepted the batch.
        let mut index = self.index.write();
        for (key, op) in pending {
            match op {
                Pending::Put(record) => index.insert(key, record),
                Pending::Delete => index.remove(&key),
            }
        }
        drop(index);
        drop(wal);

        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn size(&self) -> u64 {
        self.counters.disk_bytes.load(Ordering::Acquire)
    }

    pub(crate) fn refresh_size(&self) -> EngineResult<u64> {
        let bytes = disk_usage(&self.wal_dir)?;
        self.counters.disk_bytes.store(bytes, Ordering::Release);
        Ok(bytes)
    }

    pub(crate) fn run_gc(&self) -> EngineResult<GcReport> {
        // Expired entries leave RAM first; their bytes stay in the log
        // until a compaction rewrites it.
        let (expired_entries, _) = self.index.write().sweep_expired(now_millis());

        // Dead space is whatever the log holds beyond the live records.
        let log_bytes = self.refresh_size()?;
        let live_bytes = self.index.read().live_bytes;
        let dead_space_ratio = if log_bytes == 0 {
            0.0
        } else {
            (1.0 - live_bytes as f64 / log_bytes as f64).clamp(0.0, 1.0)
        };

        let compaction = if dead_space_ratio > self.config.compaction_trigger_ratio {
            Some(self.compact()?)
        } else {
            None
        };

        self.counters.gc_cycles.fetch_add(1, Ordering::Relaxed);
        self.counters
            .expired_reclaimed
            .fetch_add(expired_entries, Ordering::Relaxed);
        debug!(
            expired_entries,
            dead_space_ratio,
            compacted = compaction.is_some(),
            "gc cycle finished"
        );

        Ok(GcReport {
            expired_entries,
            dead_space_ratio,
            compaction,
        })
    }

    pub(crate) fn compact(&self) -> EngineResult<CompactionResult> {
        let result = {
            // Both locks for the whole rewrite: no commit may land between
            // the snapshot and the segment switch.
            let mut wal = self.wal.lock();
            let index = self.index.read();
            compact_log(&mut wal, index.map.iter(), now_millis())?
        };
        self.counters.compactions.fetch_add(1, Ordering::Relaxed);
        self.refresh_size()?;

        info!(
            live_entries = result.live_entries,
            removed_segments = result.removed_segments,
            bytes_saved = result.bytes_saved(),
            "compacted WAL"
        );
        Ok(result)
    }
}

/// Embedded ordered key-value engine: RAM index + WAL + maintenance thread.
///
/// All public methods take `&self`. Writes go through transactions from
/// [`TailStoreEngine::begin`]; each transaction is owned by one caller, and
/// any number of transactions may be open at once.
pub struct TailStoreEngine {
    shared: Arc<Shared>,
    /// Background maintenance handle (None if not started)
    maintenance: Mutex<Option<MaintenanceHandle>>,
    /// Data directory path
    path: PathBuf,
}

impl TailStoreEngine {
    /// Open or create a store at the given path.
    ///
    /// Creates the WAL directory, replays committed batches into RAM (entries
    /// whose TTL already passed are skipped), and computes the initial disk size.
    /// Maintenance is not started; see [`TailStoreEngine::start_maintenance`].
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> EngineResult<Self> {
        config.validate()?;

        let path = path.as_ref().to_path_buf();
        let wal_dir = path.join("wal");
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| EngineError::io(&wal_dir, "Failed to create WAL directory", e))?;
        // A .compact file means a crash before its rename; the old segments
        // it would have replaced are still intact.
        remove_stale_compaction_files(&wal_dir);

        // Replay: only batches whose Commit made it to disk come back.
        let mut index = Index::new();
        let now = now_millis();
        let batches = WalReader::new(&wal_dir).recover_batches()?;
        let batch_count = batches.len();
        for record in batches.into_iter().flatten() {
            match record.operation {
                Operation::Put => {
                    let record_value = Record {
                        value: record.value,
                        user_meta: record.user_meta,
                        expires_at: record.expires_at,
                    };
                    if record_value.is_expired(now) {
                        // The newer write expired; it still shadows older values.
                        index.remove(&record.key);
                    } else {
                        index.insert(record.key, record_value);
                    }
                }
                Operation::Delete => index.remove(&record.key),
                // Commit markers are consumed by the reader.
                Operation::Commit => {}
            }
        }

        if batch_count > 0 {
            info!(
                batches = batch_count,
                entries = index.map.len(),
                wal = %wal_dir.display(),
                "recovered entries from WAL"
            );
        }

        // The writer resumes the newest segment, after everything replayed.
        let wal = WalWriter::open(&wal_dir, config.wal_rotation_size_bytes)?;
        let shared = Arc::new(Shared {
            index: RwLock::new(index),
            wal: Mutex::new(wal),
            config,
            wal_dir,
            counters: Counters::default(),
        });
        shared.refresh_size()?;

        Ok(Self {
            shared,
            maintenance: Mutex::new(None),
            path,
        })
    }

    /// Start a read-write transaction.
    pub fn begin(&self) -> Txn {
        Txn::new(Arc::clone(&self.shared))
    }

    /// Start the background maintenance thread (size refresh + GC).
    /// Calling it while already running is a no-op.
    pub fn start_maintenance(&self) -> EngineResult<()> {
        let mut maintenance = self.maintenance.lock();
        if maintenance.as_ref().map_or(false, MaintenanceHandle::is_running) {
            return Ok(());
        }
        *maintenance = Some(start_maintenance(Arc::clone(&self.shared))?);
        Ok(())
    }

    /// Stop the background maintenance thread gracefully.
    pub fn stop_maintenance(&self) {
        let mut maintenance = self.maintenance.lock();
        if let Some(handle) = maintenance.take() {
            handle.shutdown();
        }
    }

    /// Approximate on-disk size in bytes.
    ///
    /// A cached value: refreshed by the maintenance thread every
    /// `size_refresh_interval`, after GC, and by [`TailStoreEngine::refresh_size`].
    /// It may lag real usage, but reading it is a single atomic load.
    pub fn size(&self) -> u64 {
        self.shared.size()
    }

    /// Recompute the on-disk size now and update the cached value.
    pub fn refresh_size(&self) -> EngineResult<u64> {
        self.shared.refresh_size()
    }

    /// Run one GC cycle now: drop expired entries and compact the log if
    /// its dead space exceeds `compaction_trigger_ratio`.
    pub fn run_gc(&self) -> EngineResult<GcReport> {
        self.shared.run_gc()
    }

    /// Rewrite the log from live entries regardless of dead space.
    pub fn compact(&self) -> EngineResult<CompactionResult> {
        self.shared.compact()
    }

    /// Sync the current WAL segment to persistent storage.
    pub fn sync_wal(&self) -> EngineResult<()> {
        self.shared.wal.lock().sync()
    }

    /// Number of entries in the RAM index, including expired entries that
    /// GC has not swept yet.
    pub fn len(&self) -> usize {
        self.shared.index.read().map.len()
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.shared.index.read().map.is_empty()
    }

    /// Data directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> EngineStats {
        let (entries, live_bytes) = {
            let index = self.shared.index.read();
            (index.map.len(), index.live_bytes)
        };
        let c = &self.shared.counters;
        EngineStats {
            disk_bytes: c.disk_bytes.load(Ordering::Acquire),
            live_bytes,
            entries,
            commits: c.commits.load(Ordering::Relaxed),
            gc_cycles: c.gc_cycles.load(Ordering::Relaxed),
            expired_reclaimed: c.expired_reclaimed.load(Ordering::Relaxed),
            compactions: c.compactions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TailStoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailStoreEngine")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("disk_bytes", &self.size())
            .finish()
    }
}

impl Drop for TailStoreEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.shutdown();
        }
    }
}

/// Leftovers from a compaction interrupted before its rename.
fn remove_stale_compaction_files(wal_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(wal_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "compact") {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "failed to remove stale compaction file"
                );
            }
        }
    }
}
