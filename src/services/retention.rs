use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::store::TelemetryStore;

/// Deletes measurements older than `now - retention`.
///
/// Never fails: store errors are logged and reported as zero deleted rows so a
/// caller's request is never aborted by cleanup. Sensors and devices are kept.
pub fn cleanup(store: &dyn TelemetryStore, retention: Duration, now: DateTime<Utc>) -> usize {
    let cutoff = now - retention;
    match store.delete_measurements_before(cutoff) {
        Ok(deleted) => {
            if deleted > 0 {
                info!("Cleanup: deleted {} measurement(s) older than {}", deleted, cutoff);
            }
            deleted
        }
        Err(e) => {
            error!("Cleanup failed: {}", e);
            0
        }
    }
}

/// Lets at most one background cleanup hold a pool connection at a time.
#[derive(Debug, Clone, Default)]
pub struct CleanupGate {
    running: Arc<AtomicBool>,
}

/// Releases its gate when dropped, including on panic.
#[derive(Debug)]
pub struct CleanupPermit {
    running: Arc<AtomicBool>,
}

impl CleanupGate {
    pub fn try_acquire(&self) -> Option<CleanupPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(CleanupPermit {
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for CleanupPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Launches a cleanup on the blocking pool without waiting for it. Returns
/// `false`, and does nothing, while an earlier background cleanup is running.
pub fn spawn_cleanup(store: Arc<dyn TelemetryStore>, retention: Duration, gate: &CleanupGate) -> bool {
    let Some(permit) = gate.try_acquire() else {
        debug!("Cleanup: previous run still in progress, skipping");
        return false;
    };
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        cleanup(store.as_ref(), retention, Utc::now());
    });
    true
}

/// Runs a cleanup every `period` until the runtime shuts down. Ticks that find
/// a cleanup already running are skipped.
pub async fn run_timer(
    store: Arc<dyn TelemetryStore>,
    retention: Duration,
    period: std::time::Duration,
    gate: CleanupGate,
) {
    let mut ticker = tokio::time::interval(period);
    // first tick completes immediately; startup already ran a cleanup
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(permit) = gate.try_acquire() else {
            debug!("Cleanup timer: previous run still in progress, skipping");
            continue;
        };
        let store = store.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            cleanup(store.as_ref(), retention, Utc::now())
        });
        if let Err(e) = task.await {
            warn!("Cleanup timer task failed: {}", e);
        }
    }
}
