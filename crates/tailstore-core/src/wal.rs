//! Write-Ahead Log for TailStore
//!
//! The WAL is the only on-disk state. A committed transaction is appended as
//! one contiguous batch: its Put/Delete records followed by a Commit record.
//! Write ordering on commit:
//! 1. Encode the whole batch into one buffer
//! 2. Append the buffer to the current segment
//! 3. Sync if the engine runs with `sync_writes`
//! 4. Return success (caller applies the batch to the RAM index AFTER this)
//!
//! Segments are named `wal-{seq:016x}.log` and rotate between batches, so a
//! batch never spans two segments.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::format::{decode_record, Operation, WalRecord, HEADER_SIZE, MAGIC_ARRAY};
use crate::sync::sync_file;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// File name for segment `seq`.
pub fn segment_name(seq: u64) -> String {
    format!("{}{:016x}{}", SEGMENT_PREFIX, seq, SEGMENT_SUFFIX)
}

fn parse_segment_seq(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// All segments in `wal_dir`, sorted by sequence number.
pub fn list_segments(wal_dir: &Path) -> EngineResult<Vec<(u64, PathBuf)>> {
    let entries = std::fs::read_dir(wal_dir)
        .map_err(|e| EngineError::io(wal_dir, "Failed to read WAL directory", e))?;

    let mut segments = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| EngineError::io(wal_dir, "Failed to read directory entry", e))?;
        // Anything not named like a segment (temp files, strays) is ignored.
        let seq = entry.file_name().to_str().and_then(parse_segment_seq);
        if let Some(seq) = seq {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

/// Total bytes occupied by WAL segments on disk.
///
/// Walks the directory and stats every segment, so it is not meant for hot
/// paths; the engine caches the result and refreshes it on a cadence.
pub fn disk_usage(wal_dir: &Path) -> EngineResult<u64> {
    let mut total = 0u64;
    for (_, path) in list_segments(wal_dir)? {
        match std::fs::metadata(&path) {
            Ok(meta) => total += meta.len(),
            // Removed by a concurrent compaction between listing and stat.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EngineError::io(path, "Failed to stat WAL segment", e)),
        }
    }
    Ok(total)
}

fn open_append(path: &Path) -> EngineResult<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::io(path, "Failed to open WAL segment", e))?;
    let size = file
        .metadata()
        .map_err(|e| EngineError::io(path, "Failed to stat WAL segment", e))?
        .len();
    Ok((file, size))
}

/// Appends committed batches to the current WAL segment.
pub struct WalWriter {
    /// Current segment handle
    file: File,
    /// Path to current segment (for error context)
    path: PathBuf,
    /// Current segment size in bytes (tracked to avoid stat calls)
    size: u64,
    /// WAL directory for rotation
    wal_dir: PathBuf,
    /// Sequence number of the current segment
    sequence: u64,
    /// Rotate once a segment would grow past this many bytes
    rotation_size: u64,
}

impl WalWriter {
    /// Open a writer in `wal_dir`, resuming the highest existing segment.
    pub fn open<P: AsRef<Path>>(wal_dir: P, rotation_size: u64) -> EngineResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| EngineError::io(&wal_dir, "Failed to create WAL directory", e))?;

        // Resume the newest segment; a fresh directory starts at sequence 0.
        let sequence = list_segments(&wal_dir)?.last().map_or(0, |(seq, _)| *seq);
        let path = wal_dir.join(segment_name(sequence));
        let (file, size) = open_append(&path)?;

        Ok(Self {
            file,
            path,
            size,
            wal_dir,
            sequence,
            rotation_size,
        })
    }

    /// Append one encoded batch (records + Commit) as a single write.
    ///
    /// The batch lands in the OS page cache; with `sync` it is also flushed
    /// to media before this returns.
    pub fn append_batch(&mut self, batch: &[u8], sync: bool) -> EngineResult<()> {
        // Rotate before the write so a batch never straddles two segments.
        // An empty segment always takes the batch, however large.
        if self.size > 0 && self.size + batch.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        // One write_all per batch; a crash mid-write leaves a torn tail that
        // replay discards along with its missing Commit.
        self.file
            .write_all(batch)
            .map_err(|e| EngineError::io(&self.path, "WAL write failed", e))?;
        if sync {
            sync_file(&self.file)
                .map_err(|e| EngineError::io(&self.path, "WAL sync failed", e))?;
        }

        self.size += batch.len() as u64;
        Ok(())
    }

    /// Seal the current segment and continue in `wal-{seq+1}`.
    fn rotate(&mut self) -> EngineResult<()> {
        // Seal the old segment on disk before any write lands in the new one.
        sync_file(&self.file)
            .map_err(|e| EngineError::io(&self.path, "WAL sync before rotation failed", e))?;
        self.switch_to(self.sequence + 1)
    }

    /// Continue appending in segment `sequence`, which may already exist
    /// (compaction installs a snapshot segment before switching to it).
    pub(crate) fn switch_to(&mut self, sequence: u64) -> EngineResult<()> {
        let path = self.wal_dir.join(segment_name(sequence));
        let (file, size) = open_append(&path)?;
        self.file = file;
        self.path = path;
        self.size = size;
        self.sequence = sequence;
        Ok(())
    }

    /// Sync the current segment without writing anything.
    pub fn sync(&self) -> EngineResult<()> {
        sync_file(&self.file).map_err(|e| EngineError::io(&self.path, "WAL sync failed", e))
    }

    /// Current segment path (for diagnostics)
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Current segment size in bytes
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Sequence number of the current segment
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Directory holding the segments
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }
}

/// Replays committed batches from WAL segments.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    /// Create a reader for `wal_dir`.
    pub fn new<P: AsRef<Path>>(wal_dir: P) -> Self {
        Self {
            wal_dir: wal_dir.as_ref().to_path_buf(),
        }
    }

    /// Recover every committed batch, oldest segment first.
    ///
    /// Per segment:
    /// 1. Read the 32-byte header and check magic
    /// 2. Check the payload fits in the remaining bytes
    /// 3. Decode and verify CRC32C
    /// 4. Buffer Put/Delete records until a Commit whose count matches
    /// 5. On corruption: drop the open batch and resync to the next magic
    /// 6. On a torn record at EOF: stop, the open batch is discarded
    pub fn recover_batches(&self) -> EngineResult<Vec<Vec<WalRecord>>> {
        let mut batches = Vec::new();
        for (_, path) in list_segments(&self.wal_dir)? {
            self.recover_from_segment(&path, &mut batches)?;
        }
        Ok(batches)
    }

    fn recover_from_segment(
        &self,
        path: &Path,
        batches: &mut Vec<Vec<WalRecord>>,
    ) -> EngineResult<()> {
        // Segments are bounded by the rotation size, so read each one whole.
        let mut buffer = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut buffer))
            .map_err(|e| EngineError::io(path, "Failed to read WAL segment", e))?;

        let mut open_batch: Vec<WalRecord> = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            // Step 1: magic check. Garbage here means we lost record
            // alignment; skip ahead to the next magic and drop the open
            // batch, since it can no longer commit as written.
            if buffer[offset..offset + 4] != MAGIC_ARRAY {
                warn!(
                    segment = %path.display(),
                    offset,
                    "bad magic in WAL, scanning for next record"
                );
                open_batch.clear();
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            // Step 2: the header's payload length must fit in what is left.
            let length = u32::from_le_bytes([
                buffer[offset + 4],
                buffer[offset + 5],
                buffer[offset + 6],
                buffer[offset + 7],
            ]) as usize;
            let total = HEADER_SIZE + length;

            // A record cut short at EOF is a torn write from a crash. Nothing
            // valid can follow it in this segment.
            if offset + total > buffer.len() {
                warn!(
                    segment = %path.display(),
                    offset,
                    needed = total,
                    available = buffer.len() - offset,
                    "torn write in WAL, stopping replay of segment"
                );
                break;
            }

            // Step 3: decode verifies the CRC32C over header and payload.
            match decode_record(&buffer[offset..offset + total]) {
                Ok(record) => {
                    offset += total;
                    match record.operation {
                        // Step 4: buffer until the batch's Commit arrives.
                        Operation::Put | Operation::Delete => open_batch.push(record),
                        Operation::Commit => {
                            let batch = std::mem::take(&mut open_batch);
                            // The count guards against a batch that lost
                            // records to a resync but kept its Commit.
                            if record.commit_count() == Some(batch.len() as u32) {
                                batches.push(batch);
                            } else {
                                warn!(
                                    segment = %path.display(),
                                    offset,
                                    expected = ?record.commit_count(),
                                    found = batch.len(),
                                    "commit record does not match its batch, discarding batch"
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    // Step 5: checksum or format failure. The whole open batch
                    // goes, then resync on the next magic.
                    warn!(
                        segment = %path.display(),
                        offset,
                        error = %e,
                        "corrupt WAL record, discarding open batch"
                    );
                    open_batch.clear();
                    match find_next_magic(&buffer, offset + 1) {
                        Some(next) => {
                            offset = next;
                            continue;
                        }
                        None => break,
                    }
                }
            }
        }

        // Step 6: records with no Commit at the end were never acknowledged.
        if !open_batch.is_empty() {
            warn!(
                segment = %path.display(),
                records = open_batch.len(),
                "uncommitted batch at end of segment, discarding"
            );
        }
        Ok(())
    }
}

/// Next occurrence of the record magic at or after `start`.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    if start >= buffer.len() {
        return None;
    }
    buffer[start..]
        .windows(MAGIC_ARRAY.len())
        .position(|w| w == MAGIC_ARRAY)
        .map(|pos| start + pos)
}
