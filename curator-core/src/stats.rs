//! Pipeline counters and the rolling processing-time window.
//!
//! Counters are per-field atomics so every worker sees every increment;
//! the performance window sits behind its own short-lived mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

const WINDOW_SIZE: usize = 100;

#[derive(Debug)]
pub struct PipelineStats {
    pub detected: AtomicU64,
    pub duplicates: AtomicU64,
    pub stable: AtomicU64,
    pub unstable: AtomicU64,
    pub hashed: AtomicU64,
    pub digest_failures: AtomicU64,
    pub processed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub initial_scan_completed: AtomicBool,
    started: Instant,
    perf: Mutex<PerfWindow>,
}

#[derive(Debug)]
struct PerfWindow {
    times: VecDeque<f64>,
    last_update: Instant,
    last_processed: u64,
    average_secs: f64,
    files_per_minute: f64,
}

/// Point-in-time copy of all counters for status reporting.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub detected: u64,
    pub duplicates: u64,
    pub stable: u64,
    pub unstable: u64,
    pub hashed: u64,
    pub digest_failures: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub initial_scan_completed: bool,
    pub uptime: Duration,
    pub average_processing_secs: f64,
    pub files_per_minute: f64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            detected: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            stable: AtomicU64::new(0),
            unstable: AtomicU64::new(0),
            hashed: AtomicU64::new(0),
            digest_failures: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            initial_scan_completed: AtomicBool::new(false),
            started: Instant::now(),
            perf: Mutex::new(PerfWindow {
                times: VecDeque::with_capacity(WINDOW_SIZE),
                last_update: Instant::now(),
                last_processed: 0,
                average_secs: 0.0,
                files_per_minute: 0.0,
            }),
        }
    }

    /// Record one file's processing duration and refresh the derived rates
    /// once per `monitor_interval`.
    pub fn record_processing_time(&self, elapsed: Duration, monitor_interval: Duration) {
        let mut perf = self.perf.lock().expect("stats lock poisoned");

        if perf.times.len() == WINDOW_SIZE {
            perf.times.pop_front();
        }
        perf.times.push_back(elapsed.as_secs_f64());

        let since_update = perf.last_update.elapsed();
        if since_update >= monitor_interval {
            if !perf.times.is_empty() {
                perf.average_secs = perf.times.iter().sum::<f64>() / perf.times.len() as f64;
            }

            let processed = self.processed.load(Ordering::Relaxed);
            let recent = processed.saturating_sub(perf.last_processed);
            perf.files_per_minute = if since_update.as_secs_f64() > 0.0 {
                recent as f64 / since_update.as_secs_f64() * 60.0
            } else {
                0.0
            };
            perf.last_processed = processed;
            perf.last_update = Instant::now();

            info!(
                average_secs = perf.average_secs,
                files_per_minute = perf.files_per_minute,
                "processing performance"
            );
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let perf = self.perf.lock().expect("stats lock poisoned");
        StatsSnapshot {
            detected: self.detected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stable: self.stable.load(Ordering::Relaxed),
            unstable: self.unstable.load(Ordering::Relaxed),
            hashed: self.hashed.load(Ordering::Relaxed),
            digest_failures: self.digest_failures.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            initial_scan_completed: self.initial_scan_completed.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
            average_processing_secs: perf.average_secs,
            files_per_minute: perf.files_per_minute,
        }
    }

    /// Final summary, logged once at shutdown.
    pub fn log_summary(&self, pending: usize) {
        let snap = self.snapshot();
        let secs = snap.uptime.as_secs();
        info!(
            uptime = %format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60),
            detected = snap.detected,
            duplicates = snap.duplicates,
            stable = snap.stable,
            unstable = snap.unstable,
            hashed = snap.hashed,
            digest_failures = snap.digest_failures,
            processed = snap.processed,
            succeeded = snap.succeeded,
            failed = snap.failed,
            pending,
            initial_scan_completed = snap.initial_scan_completed,
            "pipeline summary"
        );
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
