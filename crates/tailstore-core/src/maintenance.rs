//! Maintenance thread: size accounting and GC in the background
//!
//! The maintenance thread wakes every `size_refresh_interval`, recomputes the
//! cached on-disk size, and every `gc_interval` runs a GC cycle (expiry sweep
//! plus compaction when dead space crosses the trigger). It never blocks
//! writers for longer than a single GC cycle holds the WAL lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::engine::Shared;
use crate::error::{EngineError, EngineResult};

/// Longest uninterrupted sleep, so shutdown is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Handle to a running maintenance thread.
/// Dropping this handle signals the thread to stop.
pub struct MaintenanceHandle {
    /// Signal the background thread to stop
    shutdown: Arc<AtomicBool>,
    /// Background thread join handle
    thread: Option<thread::JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Request graceful shutdown and wait for the background thread to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Check if the maintenance thread is still running.
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

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn start_maintenance(shared: Arc<Shared>) -> EngineResult<MaintenanceHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    let thread = thread::Builder::new()
        .name("tailstore-maintenance".to_string())
        .spawn(move || maintenance_loop(shared, shutdown_clone))
        .map_err(|e| EngineError::Io {
            path: None,
            kind: e.kind(),
            message: format!("Failed to spawn maintenance thread: {}", e),
        })?;

    Ok(MaintenanceHandle {
        shutdown,
        thread: Some(thread),
    })
}

fn maintenance_loop(shared: Arc<Shared>, shutdown: Arc<AtomicBool>) {
    let cadence = shared.config.size_refresh_interval;
    let gc_interval = shared.config.gc_interval;
    let slice = cadence.min(SLEEP_SLICE);
    let mut next_gc = Instant::now() + gc_interval;

    debug!(?cadence, ?gc_interval, "maintenance thread started");
    loop {
        let wake_time = Instant::now() + cadence;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) {
                debug!("maintenance thread stopping");
                return;
            }
            thread::sleep(slice);
        }

        if let Err(e) = shared.refresh_size() {
            warn!(error = %e, "failed to refresh storage size");
        }

        if Instant::now() >= next_gc {
            next_gc = Instant::now() + gc_interval;
            if let Err(e) = shared.run_gc() {
                warn!(error = %e, "gc cycle failed");
            }
        }
    }
}
