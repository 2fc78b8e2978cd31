//! Compaction: Dead space reclamation for the WAL
//!
//! Over time the log accumulates overwritten values, deletes and expired
//! entries. Compaction writes the live RAM index out as a fresh snapshot
//! segment and drops every older segment.
//!
//! Compaction uses the atomic rename pattern for crash safety:
//! 1. Write the snapshot to wal-{seq+1}.log.compact
//! 2. sync_file the snapshot
//! 3. Rename it to wal-{seq+1}.log (atomic on POSIX)
//! 4. sync_dir the WAL directory
//! 5. Switch the writer to the snapshot segment, delete older segments
//!
//! If the process crashes at any point:
//! - Before rename: old segments are intact, the temp file is removed on open
//! - After rename: replay applies old segments, then the snapshot, which
//!   restates every live entry, so the result is the same

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::entry::Record;
use crate::error::{EngineError, EngineResult};
use crate::format::{encode_commit, encode_record, Operation};
use crate::sync::{sync_dir, sync_file};
use crate::wal::{disk_usage, list_segments, segment_name, WalWriter};

/// Records per commit batch in a snapshot segment.
const SNAPSHOT_BATCH_RECORDS: usize = 1024;

/// Result of a compaction operation.
#[derive(Debug)]
pub struct CompactionResult {
    /// Path to the snapshot segment
    pub segment: PathBuf,
    /// Number of live entries written to the snapshot
    pub live_entries: usize,
    /// Number of segments deleted
    pub removed_segments: usize,
    /// Log size in bytes before compaction
    pub original_bytes: u64,
    /// Snapshot size in bytes
    pub compacted_bytes: u64,
}

impl CompactionResult {
    /// Space saved in bytes.
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Rewrite the log as a snapshot of `live`, skipping entries expired at `now`.
///
/// The caller must hold the WAL lock for the whole call and keep `live`
/// consistent with it (no commits may land in between).
pub(crate) fn compact_log<'a, I>(
    wal: &mut WalWriter,
    live: I,
    now: u64,
) -> EngineResult<CompactionResult>
where
    I: IntoIterator<Item = (&'a Vec<u8>, &'a Record)>,
{
    let wal_dir = wal.wal_dir().to_path_buf();
    let original_bytes = disk_usage(&wal_dir)?;
    let old_segments = list_segments(&wal_dir)?;

    let snapshot_seq = wal.sequence() + 1;
    let segment = wal_dir.join(segment_name(snapshot_seq));
    let compact_path = wal_dir.join(format!("{}.compact", segment_name(snapshot_seq)));

    let mut live_entries = 0usize;
    let compacted_bytes = {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&compact_path)
            .map_err(|e| EngineError::io(&compact_path, "Failed to create compact file", e))?;

        let mut batch = Vec::new();
        let mut in_batch = 0usize;
        let mut written = 0u64;
        for (key, record) in live {
            if record.is_expired(now) {
                continue;
            }
            encode_record(
                &mut batch,
                Operation::Put,
                key,
                &record.value,
                record.user_meta,
                record.expires_at,
            )?;
            in_batch += 1;
            live_entries += 1;

            if in_batch == SNAPSHOT_BATCH_RECORDS {
                written += flush_snapshot_batch(&mut file, &mut batch, in_batch, &compact_path)?;
                in_batch = 0;
            }
        }
        if in_batch > 0 {
            written += flush_snapshot_batch(&mut file, &mut batch, in_batch, &compact_path)?;
        }

        sync_file(&file)
            .map_err(|e| EngineError::io(&compact_path, "Failed to sync compacted segment", e))?;
        written
    };

    fs::rename(&compact_path, &segment)
        .map_err(|e| EngineError::io(&segment, "Failed to rename compacted segment", e))?;
    sync_dir(&wal_dir).map_err(|e| {
        EngineError::io(&wal_dir, "Failed to sync WAL directory after compaction", e)
    })?;

    // New commits go after the snapshot from here on.
    wal.switch_to(snapshot_seq)?;

    let mut removed_segments = 0;
    for (_, path) in &old_segments {
        fs::remove_file(path)
            .map_err(|e| EngineError::io(path, "Failed to remove compacted segment", e))?;
        removed_segments += 1;
    }
    sync_dir(&wal_dir).map_err(|e| {
        EngineError::io(&wal_dir, "Failed to sync WAL directory after compaction", e)
    })?;

    Ok(CompactionResult {
        segment,
        live_entries,
        removed_segments,
        original_bytes,
        compacted_bytes,
    })
}

fn flush_snapshot_batch(
    file: &mut fs::File,
    batch: &mut Vec<u8>,
    count: usize,
    path: &Path,
) -> EngineResult<u64> {
    encode_commit(batch, count as u32)?;
    file.write_all(batch)
        .map_err(|e| EngineError::io(path, "Failed to write compacted batch", e))?;
    let len = batch.len() as u64;
    batch.clear();
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalReader;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(value: &str, expires_at: u64) -> Record {
        Record {
            value: value.as_bytes().to_vec(),
            user_meta: 0,
            expires_at,
        }
    }

    fn append_put(wal: &mut WalWriter, key: &str, value: &str) {
        let mut batch = Vec::new();
        encode_record(
            &mut batch,
            Operation::Put,
            key.as_bytes(),
            value.as_bytes(),
            0,
            0,
        )
        .unwrap();
        encode_commit(&mut batch, 1).unwrap();
        wal.append_batch(&batch, false).unwrap();
    }

    #[test]
    fn test_compaction_replaces_segments_with_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut wal = WalWriter::open(tmp.path(), 64 * 1024).unwrap();
        for i in 0..100 {
            append_put(&mut wal, "hot", &format!("value{}", i));
        }

        let mut live = BTreeMap::new();
        live.insert(b"hot".to_vec(), record("value99", 0));

        let result = compact_log(&mut wal, live.iter(), 1_000).unwrap();
        assert_eq!(result.live_entries, 1);
        assert_eq!(result.removed_segments, 1);
        assert!(result.bytes_saved() > 0);
        assert_eq!(wal.sequence(), 1);

        let segments = list_segments(tmp.path()).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].1, result.segment);

        let batches = WalReader::new(tmp.path()).recover_batches().unwrap();
        let records: Vec<_> = batches.into_iter().flatten().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, b"value99");
    }

    #[test]
    fn test_compaction_skips_expired() {
        let tmp = TempDir::new().unwrap();
        let mut wal = WalWriter::open(tmp.path(), 64 * 1024).unwrap();
        append_put(&mut wal, "a", "1");

        let mut live = BTreeMap::new();
        live.insert(b"a".to_vec(), record("1", 500));
        live.insert(b"b".to_vec(), record("2", 0));

        let result = compact_log(&mut wal, live.iter(), 1_000).unwrap();
        assert_eq!(result.live_entries, 1);
    }

    #[test]
    fn test_snapshot_splits_into_batches() {
        let tmp = TempDir::new().unwrap();
        let mut wal = WalWriter::open(tmp.path(), 64 * 1024 * 1024).unwrap();

        let mut live = BTreeMap::new();
        for i in 0..(SNAPSHOT_BATCH_RECORDS + 10) {
            live.insert(format!("k{:05}", i).into_bytes(), record("v", 0));
        }
        compact_log(&mut wal, live.iter(), 0).unwrap();

        let batches = WalReader::new(tmp.path()).recover_batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), SNAPSHOT_BATCH_RECORDS);
        assert_eq!(batches[1].len(), 10);
    }

    #[test]
    fn test_writes_continue_after_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut wal = WalWriter::open(tmp.path(), 64 * 1024).unwrap();
        append_put(&mut wal, "a", "1");

        let mut live = BTreeMap::new();
        live.insert(b"a".to_vec(), record("1", 0));
        compact_log(&mut wal, live.iter(), 0).unwrap();
        append_put(&mut wal, "b", "2");

        let batches = WalReader::new(tmp.path()).recover_batches().unwrap();
        let keys: Vec<_> = batches.into_iter().flatten().map(|r| r.key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
