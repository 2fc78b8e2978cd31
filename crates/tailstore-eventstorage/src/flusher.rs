//! Background flushing of a [`ShardedReadWriter`].
//!
//! Writes only become durable on flush. The flusher thread flushes every
//! shard once per interval and once more on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, StorageError};
use crate::sharded::ShardedReadWriter;

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Handle to a running flusher thread.
/// Dropping this handle stops the thread after a final flush.
pub struct FlusherHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FlusherHandle {
    /// Stop the thread and wait for its final flush.
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |h| !h.is_finished())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlusherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Flush `readwriters` every `interval` on a background thread.
pub fn spawn_flusher(
    readwriters: Arc<ShardedReadWriter>,
    interval: Duration,
) -> Result<FlusherHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name("tailstore-flusher".to_string())
        .spawn(move || flush_loop(&readwriters, interval, &shutdown_clone))
        .map_err(|e| StorageError::Engine(e.into()))?;

    Ok(FlusherHandle {
        shutdown,
        thread: Some(thread),
    })
}

fn flush_loop(readwriters: &ShardedReadWriter, interval: Duration, shutdown: &AtomicBool) {
    let slice = interval.min(SLEEP_SLICE);
    loop {
        let wake_time = Instant::now() + interval;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) {
                flush_once(readwriters);
                debug!("flusher stopped");
                return;
            }
            thread::sleep(slice);
        }
        flush_once(readwriters);
    }
}

fn flush_once(readwriters: &ShardedReadWriter) {
    match readwriters.flush() {
        Ok(()) => {}
        Err(e) if e.is_limit_reached() => {
            warn!(error = %e, "storage limit reached, writes held in memory")
        }
        Err(e) => warn!(error = %e, "periodic flush failed"),
    }
}
