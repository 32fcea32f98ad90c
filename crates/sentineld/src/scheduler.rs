//! Interval scheduler for the auto-close scanner.
//!
//! One background task owns the tick loop, so at most one pass runs at a
//! time. A tick that fires while a pass is still in flight is coalesced
//! into a single delayed execution, never a queue. Shutdown is
//! cooperative: the in-flight pass completes and no further ticks are
//! dispatched. `start` and `shutdown` are both idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::scanner::Scanner;

/// Snapshot of the scheduler for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub last_pass_started_at: Option<DateTime<Utc>>,
}

pub struct ScannerScheduler {
    scanner: Arc<Scanner>,
    interval: Duration,
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    /// Separate from shutdown: shutting down lets the in-flight pass
    /// finish, while cancelling makes the pass record itself as failed.
    cancel: watch::Sender<bool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    last_pass_started_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ScannerScheduler {
    pub fn new(scanner: Scanner, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (cancel, _) = watch::channel(false);
        Self {
            scanner: Arc::new(scanner),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            cancel,
            handle: tokio::sync::Mutex::new(None),
            last_pass_started_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the tick loop. A second call while running is a no-op.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("scheduler already running, start is a no-op");
            return;
        }

        let scanner = Arc::clone(&self.scanner);
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown.subscribe();
        let cancel_rx = self.cancel.subscribe();
        let last_started = Arc::clone(&self.last_pass_started_at);

        let handle = tokio::spawn(async move {
            // First pass fires one interval after start, matching the
            // store-driven scanner cadence rather than scanning at boot.
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        *lock_state(&last_started) = Some(Utc::now());
                        if let Err(err) = scanner.run_once(cancel_rx.clone()).await {
                            error!("scanner pass failed: {err}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("scheduler loop exiting");
                        break;
                    }
                }
            }
        });
        *self.handle.lock().await = Some(handle);
        info!(interval_secs = self.interval.as_secs(), "scanner scheduler started");
    }

    /// Stop dispatching ticks and wait for the loop (and any in-flight
    /// pass) to finish. A second call is a no-op.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("scheduler not running, shutdown is a no-op");
            return;
        }
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle.await {
                error!("scheduler task join failed: {err}");
            }
        }
        info!("scanner scheduler stopped");
    }

    /// Ask the in-flight pass (if any) to stop early; it records itself
    /// as failed with the cancellation reason.
    pub fn cancel_current_pass(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            interval_secs: self.interval.as_secs(),
            last_pass_started_at: *lock_state(&self.last_pass_started_at),
        }
    }
}

fn lock_state<T>(state: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
