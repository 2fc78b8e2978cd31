//! Integration tests: event storage over an on-disk TailStore engine.
//!
//! These tests exercise the full Storage -> ReadWriter / ShardedReadWriter
//! -> engine pipeline, including reopening the engine from its WAL.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tempfile::TempDir;

use tailstore_core::{Config, TailStoreEngine};
use tailstore_eventstorage::sharded::shard_index;
use tailstore_eventstorage::{
    open_storage, Batch, JsonCodec, Storage, StorageError, TailSamplingConfig, TraceEvent,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_engine(dir: &TempDir) -> Arc<TailStoreEngine> {
    Arc::new(TailStoreEngine::open(dir.path(), Config::default()).unwrap())
}

fn storage_with(dir: &TempDir, ttl: Duration, limit: u64) -> Arc<Storage> {
    Arc::new(Storage::new(open_engine(dir), Arc::new(JsonCodec), ttl, limit))
}

fn test_storage() -> (Arc<Storage>, TempDir) {
    let dir = TempDir::new().unwrap();
    (storage_with(&dir, Duration::from_secs(60), 0), dir)
}

fn span(trace_id: &str, id: &str) -> TraceEvent {
    TraceEvent::span(trace_id, id, format!("span {}", id))
        .with_parent("tx")
        .with_service("checkout")
}

fn read_ids(storage: &Arc<Storage>, trace_id: &str) -> Vec<String> {
    let mut rw = storage.new_read_writer();
    let mut out = Batch::new();
    rw.read_trace_events(trace_id, &mut out).unwrap();
    rw.close();
    out.into_iter().map(|e| e.id).collect()
}

// ---------------------------------------------------------------------------
// Events and decisions
// ---------------------------------------------------------------------------

#[test]
fn test_event_round_trip() {
    let (storage, _dir) = test_storage();
    let event = TraceEvent::transaction("trace", "tx1", "GET /cart")
        .with_service("frontend")
        .with_label("http.status", "200");

    let mut rw = storage.new_read_writer();
    rw.write_trace_event("trace", "tx1", &event).unwrap();
    rw.flush().unwrap();

    let mut out = Batch::new();
    rw.read_trace_events("trace", &mut out).unwrap();
    assert_eq!(out, vec![event]);
}

#[test]
fn test_decision_visible_before_and_after_flush() {
    let (storage, _dir) = test_storage();
    let mut rw = storage.new_read_writer();
    rw.write_trace_sampled("trace", true).unwrap();
    assert!(rw.is_trace_sampled("trace").unwrap());
    rw.flush().unwrap();
    assert!(rw.is_trace_sampled("trace").unwrap());

    // Other writers see it once flushed.
    let mut other = storage.new_read_writer();
    assert!(other.is_trace_sampled("trace").unwrap());
}

#[test]
fn test_unknown_trace_is_not_found() {
    let (storage, _dir) = test_storage();
    let mut rw = storage.new_read_writer();
    let err = rw.is_trace_sampled("never-written").unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[test]
fn test_decision_does_not_shadow_events() {
    let (storage, _dir) = test_storage();
    let mut rw = storage.new_read_writer();
    rw.write_trace_event("abc", "1", &span("abc", "1")).unwrap();
    rw.write_trace_sampled("abc", false).unwrap();
    rw.flush().unwrap();

    assert!(!rw.is_trace_sampled("abc").unwrap());
    assert_eq!(read_ids(&storage, "abc"), vec!["1"]);
}

// ---------------------------------------------------------------------------
// Batching and durability
// ---------------------------------------------------------------------------

#[test]
fn test_auto_flush_with_250_events() {
    let (storage, _dir) = test_storage();
    let mut rw = storage.new_read_writer();
    for i in 0..250 {
        let id = format!("{:04}", i);
        rw.write_trace_event("trace", &id, &span("trace", &id)).unwrap();
    }

    // Our own reads span committed and pending writes.
    let mut out = Batch::new();
    rw.read_trace_events("trace", &mut out).unwrap();
    assert_eq!(out.len(), 250);

    // The first 200 were committed by the automatic flush.
    assert_eq!(read_ids(&storage, "trace").len(), 200);

    rw.flush().unwrap();
    rw.close();

    let ids = read_ids(&storage, "trace");
    assert_eq!(ids.len(), 250);
    assert_eq!(ids.first().map(String::as_str), Some("0000"));
    assert_eq!(ids.last().map(String::as_str), Some("0249"));
}

#[test]
fn test_auto_flush_without_explicit_flush_keeps_200() {
    let dir = TempDir::new().unwrap();
    {
        let storage = storage_with(&dir, Duration::from_secs(60), 0);
        let mut rw = storage.new_read_writer();
        for i in 0..250 {
            let id = format!("{:04}", i);
            rw.write_trace_event("trace", &id, &span("trace", &id)).unwrap();
        }
        rw.close();
    }

    // Only the automatic flush at the 200th write reached the log.
    let storage = storage_with(&dir, Duration::from_secs(60), 0);
    let ids = read_ids(&storage, "trace");
    assert_eq!(ids.len(), 200);
    assert_eq!(ids.last().map(String::as_str), Some("0199"));
}

#[test]
fn test_flushed_writes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let storage = storage_with(&dir, Duration::from_secs(60), 0);
        let mut rw = storage.new_read_writer();
        rw.write_trace_sampled("kept", true).unwrap();
        rw.write_trace_event("kept", "1", &span("kept", "1")).unwrap();
        rw.flush().unwrap();
        rw.write_trace_sampled("lost", true).unwrap();
        rw.close();
    }

    let storage = storage_with(&dir, Duration::from_secs(60), 0);
    let mut rw = storage.new_read_writer();
    assert!(rw.is_trace_sampled("kept").unwrap());
    assert!(rw.is_trace_sampled("lost").unwrap_err().is_not_found());
    assert_eq!(read_ids(&storage, "kept"), vec!["1"]);
}

#[test]
fn test_explicit_deletion() {
    let (storage, _dir) = test_storage();
    let mut rw = storage.new_read_writer();
    for id in ["a", "b", "c"] {
        rw.write_trace_event("trace", id, &span("trace", id)).unwrap();
    }
    rw.flush().unwrap();

    rw.delete_trace_event("trace", "b").unwrap();
    rw.flush().unwrap();
    rw.close();

    assert_eq!(read_ids(&storage, "trace"), vec!["a", "c"]);
}

// ---------------------------------------------------------------------------
// Expiry and storage limit
// ---------------------------------------------------------------------------

#[test]
fn test_ttl_expiry() {
    let dir = TempDir::new().unwrap();
    let storage = storage_with(&dir, Duration::from_millis(50), 0);

    let mut rw = storage.new_read_writer();
    rw.write_trace_sampled("trace", true).unwrap();
    rw.write_trace_event("trace", "1", &span("trace", "1")).unwrap();
    rw.flush().unwrap();
    assert_eq!(read_ids(&storage, "trace"), vec!["1"]);

    std::thread::sleep(Duration::from_millis(120));
    assert!(read_ids(&storage, "trace").is_empty());
    assert!(rw.is_trace_sampled("trace").unwrap_err().is_not_found());

    // GC reclaims what expired without any delete.
    let report = storage.engine().run_gc().unwrap();
    assert_eq!(report.expired_entries, 2);
    assert!(storage.engine().is_empty());
}

#[test]
fn test_storage_limit_enforced_on_flush() {
    let dir = TempDir::new().unwrap();
    let storage = storage_with(&dir, Duration::from_secs(60), 2000);
    assert_eq!(storage.limit(), 1800);

    let mut rw = storage.new_read_writer();
    for i in 0..10 {
        let id = i.to_string();
        rw.write_trace_event("trace", &id, &span("trace", &id)).unwrap();
    }
    rw.flush().unwrap();

    // The engine only reports the new size once accounting catches up.
    assert!(!storage.limit_reached());
    let size = storage.engine().refresh_size().unwrap();
    assert!(size >= 1800);

    rw.write_trace_event("trace", "late", &span("trace", "late")).unwrap();
    let err = rw.flush().unwrap_err();
    assert!(err.is_limit_reached());
    assert!(err.to_string().contains("storage limit reached"));

    // Reads keep working.
    let mut out = Batch::new();
    rw.read_trace_events("trace", &mut out).unwrap();
    assert_eq!(out.len(), 11);
    assert_eq!(read_ids(&storage, "trace").len(), 10);
}

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

#[test]
fn test_shard_selection_is_stable() {
    let shards = 8;
    for i in 0..200 {
        let trace_id = format!("trace-{:08x}", i);
        let expected = shard_index(&trace_id, shards);
        for _ in 0..50 {
            assert_eq!(shard_index(&trace_id, shards), expected);
        }
    }
}

#[test]
fn test_sharded_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = TailSamplingConfig::default();
    {
        let storage = open_storage(dir.path(), &config, Arc::new(JsonCodec)).unwrap();
        let sharded = storage.new_sharded_read_writer_with(4);
        for t in 0..20 {
            let trace_id = format!("trace-{}", t);
            for e in 0..3 {
                let id = e.to_string();
                sharded.write_trace_event(&trace_id, &id, &span(&trace_id, &id)).unwrap();
            }
            sharded.write_trace_sampled(&trace_id, t % 2 == 0).unwrap();
        }
        sharded.flush().unwrap();
        sharded.close();
    }

    let storage = open_storage(dir.path(), &config, Arc::new(JsonCodec)).unwrap();
    let sharded = storage.new_sharded_read_writer_with(4);
    for t in 0..20 {
        let trace_id = format!("trace-{}", t);
        assert_eq!(sharded.is_trace_sampled(&trace_id).unwrap(), t % 2 == 0);
        let mut out = Batch::new();
        sharded.read_trace_events(&trace_id, &mut out).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|e| e.trace_id == trace_id));
    }
}

// ---------------------------------------------------------------------------
// Trace isolation
// ---------------------------------------------------------------------------

#[test]
fn test_trace_id_with_separator_cannot_leak_into_prefix_trace() {
    let (storage, _dir) = test_storage();
    let mut rw = storage.new_read_writer();
    let err = rw.write_trace_event("a:b", "1", &span("a:b", "1")).unwrap_err();
    assert!(matches!(err, StorageError::InvalidTraceId(_)));
    rw.flush().unwrap();

    let mut out = Batch::new();
    rw.read_trace_events("a", &mut out).unwrap();
    assert!(out.is_empty());

    let sharded = storage.new_sharded_read_writer_with(4);
    assert!(matches!(
        sharded.write_trace_sampled("a:b", true),
        Err(StorageError::InvalidTraceId(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Events of one trace never show up when reading another, even when
    /// one trace ID is a byte prefix of the other.
    #[test]
    fn prop_traces_are_isolated(
        base in "[a-zA-Z0-9_./-]{1,8}",
        suffix in "[a-zA-Z0-9_./-]{1,4}",
        ids in prop::collection::btree_set("[a-z0-9]{1,6}", 1..8),
    ) {
        let (storage, _dir) = test_storage();
        let short = base.clone();
        let long = format!("{}{}", base, suffix);

        let mut rw = storage.new_read_writer();
        for id in &ids {
            rw.write_trace_event(&short, id, &span(&short, id)).unwrap();
        }
        rw.write_trace_event(&long, "only-long", &span(&long, "only-long")).unwrap();
        rw.flush().unwrap();

        let mut out = Batch::new();
        rw.read_trace_events(&short, &mut out).unwrap();
        prop_assert!(out.iter().all(|e| e.trace_id == short));
        let got: Vec<String> = out.into_iter().map(|e| e.id).collect();
        let want: Vec<String> = ids.iter().cloned().collect();
        prop_assert_eq!(got, want);

        let mut out = Batch::new();
        rw.read_trace_events(&long, &mut out).unwrap();
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(&out[0].trace_id, &long);
    }
}
