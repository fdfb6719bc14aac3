//! The staged ingestion pipeline.
//!
//! Three bounded queues (raw, stable, fingerprinted) connected by three
//! worker pools. Admission canonicalizes and filters a detected path, claims
//! it in the pending registry and runs the cheap path-only ledger check;
//! stability workers wait for the file to settle; hash workers attach the
//! content digest and re-check the ledger with it; processing workers run
//! identification, enrichment and publishing, then write the ledger entry.
//!
//! Within one descriptor those steps are strictly ordered. Across
//! descriptors there are no ordering guarantees at all.

pub mod stability;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use curator_config::ConfigHandle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::ProcessedFilesDb;
use crate::digest::file_digest;
use crate::error::{CuratorError, Result};
use crate::identify::Identifier;
use crate::metadata::FilmDatabase;
use crate::pending::PendingRegistry;
use crate::publisher::LibraryPublisher;
use crate::resilience::{retry_with_backoff, BreakerStatus, CircuitBreaker, RetryPolicy};
use crate::scan::matches_ignore_pattern;
use crate::stats::PipelineStats;
use crate::types::{is_video_file, FileDescriptor, Origin, Priority, ProvisionalIdent};
use stability::{await_stability, StabilityPolicy, StabilityVerdict};

const IDENTIFY_BREAKER_THRESHOLD: u32 = 3;
const FILMDB_BREAKER_THRESHOLD: u32 = 5;
const BREAKER_RESET: Duration = Duration::from_secs(300);

/// Knobs that tests shrink to milliseconds; production uses the defaults.
#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub queue_capacity: usize,
    pub queue_get_timeout: Duration,
    /// Sleep for low-priority descriptors while the initial scan runs.
    pub low_priority_delay: Duration,
    pub stable_reads: u32,
    pub stability_initial_backoff: Duration,
    pub stability_max_backoff: Duration,
    pub stability_error_retry: Duration,
    pub process_retry: RetryPolicy,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            queue_get_timeout: Duration::from_secs(1),
            low_priority_delay: Duration::from_secs(2),
            stable_reads: 3,
            stability_initial_backoff: Duration::from_secs(2),
            stability_max_backoff: Duration::from_secs(5),
            stability_error_retry: Duration::from_secs(2),
            process_retry: RetryPolicy::new(2, Duration::from_secs(2)),
        }
    }
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Enqueued,
    Duplicate,
    AlreadyProcessed,
    Filtered,
    Rejected,
}

struct Shared {
    config: Arc<ConfigHandle>,
    ledger: Arc<ProcessedFilesDb>,
    identifier: Arc<dyn Identifier>,
    filmdb: Arc<dyn FilmDatabase>,
    publisher: Arc<LibraryPublisher>,
    pending: Arc<PendingRegistry>,
    stats: Arc<PipelineStats>,
    identify_breaker: CircuitBreaker,
    filmdb_breaker: CircuitBreaker,
    cancel: CancellationToken,
    scan_in_progress: AtomicBool,
    tuning: PipelineTuning,
    stable_tx: mpsc::Sender<FileDescriptor>,
    fingerprinted_tx: mpsc::Sender<FileDescriptor>,
    raw_rx: Mutex<mpsc::Receiver<FileDescriptor>>,
    stable_rx: Mutex<mpsc::Receiver<FileDescriptor>>,
    fingerprinted_rx: Mutex<mpsc::Receiver<FileDescriptor>>,
}

pub struct Pipeline {
    shared: Arc<Shared>,
    raw_tx: mpsc::Sender<FileDescriptor>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ConfigHandle>,
        ledger: Arc<ProcessedFilesDb>,
        identifier: Arc<dyn Identifier>,
        filmdb: Arc<dyn FilmDatabase>,
        publisher: Arc<LibraryPublisher>,
        pending: Arc<PendingRegistry>,
        stats: Arc<PipelineStats>,
        cancel: CancellationToken,
        tuning: PipelineTuning,
    ) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel(tuning.queue_capacity);
        let (stable_tx, stable_rx) = mpsc::channel(tuning.queue_capacity);
        let (fingerprinted_tx, fingerprinted_rx) = mpsc::channel(tuning.queue_capacity);

        let shared = Arc::new(Shared {
            config,
            ledger,
            identifier,
            filmdb,
            publisher,
            pending,
            stats,
            identify_breaker: CircuitBreaker::new(
                "identification",
                IDENTIFY_BREAKER_THRESHOLD,
                BREAKER_RESET,
            ),
            filmdb_breaker: CircuitBreaker::new(
                "film-database",
                FILMDB_BREAKER_THRESHOLD,
                BREAKER_RESET,
            ),
            cancel,
            scan_in_progress: AtomicBool::new(false),
            tuning,
            stable_tx,
            fingerprinted_tx,
            raw_rx: Mutex::new(raw_rx),
            stable_rx: Mutex::new(stable_rx),
            fingerprinted_rx: Mutex::new(fingerprinted_rx),
        });

        Self { shared, raw_tx }
    }

    pub fn set_scan_in_progress(&self, value: bool) {
        self.shared.scan_in_progress.store(value, Ordering::SeqCst);
    }

    pub fn scan_in_progress(&self) -> bool {
        self.shared.scan_in_progress.load(Ordering::SeqCst)
    }

    /// Depths of the three queues (raw, stable, fingerprinted).
    pub fn queue_depths(&self) -> (usize, usize, usize) {
        let depth = |tx: &mpsc::Sender<FileDescriptor>| tx.max_capacity() - tx.capacity();
        (
            depth(&self.raw_tx),
            depth(&self.shared.stable_tx),
            depth(&self.shared.fingerprinted_tx),
        )
    }

    pub fn breaker_statuses(&self) -> (BreakerStatus, BreakerStatus) {
        (
            self.shared.identify_breaker.status(),
            self.shared.filmdb_breaker.status(),
        )
    }

    /// Admit a newly detected path.
    ///
    /// Watcher detections arriving while the initial scan is still running
    /// are marked low priority so live events keep flowing first.
    pub async fn admit(&self, path: &Path, origin: Origin) -> Admission {
        let canonical = match tokio::fs::canonicalize(path).await {
            Ok(canonical) => canonical,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "cannot canonicalize, dropping");
                return Admission::Filtered;
            }
        };

        let Ok(meta) = tokio::fs::metadata(&canonical).await else {
            return Admission::Filtered;
        };
        if !meta.is_file() || !is_video_file(&canonical) {
            return Admission::Filtered;
        }

        let snapshot = self.shared.config.snapshot();
        if let Some(name) = canonical.file_name().and_then(|n| n.to_str()) {
            if matches_ignore_pattern(name, &snapshot.ignore_patterns) {
                debug!(path = %canonical.display(), "ignore pattern match, dropping");
                return Admission::Filtered;
            }
        }

        // size is deliberately not checked here: the file may still be
        // downloading, and the floor applies only after stability

        if !self.shared.pending.try_add(&canonical) {
            self.shared
                .stats
                .duplicates
                .fetch_add(1, Ordering::Relaxed);
            debug!(path = %canonical.display(), "already in flight, dropping");
            return Admission::Duplicate;
        }

        match self.shared.ledger.is_processed(&canonical, None, false).await {
            Ok(true) => {
                self.shared.stats.processed.fetch_add(1, Ordering::Relaxed);
                self.shared.pending.remove(&canonical);
                debug!(path = %canonical.display(), "already published, dropping");
                return Admission::AlreadyProcessed;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(path = %canonical.display(), error = %err, "ledger pre-check failed, continuing");
            }
        }

        let priority = if origin == Origin::Watch && self.scan_in_progress() {
            Priority::Low
        } else {
            Priority::Normal
        };
        let descriptor = FileDescriptor::new(canonical.clone(), meta.len(), priority, origin);

        if self.raw_tx.send(descriptor).await.is_err() {
            self.shared.pending.remove(&canonical);
            return Admission::Rejected;
        }

        self.shared.stats.detected.fetch_add(1, Ordering::Relaxed);
        info!(path = %canonical.display(), ?origin, "file admitted");
        Admission::Enqueued
    }

    /// Spawn the three worker pools, sized from the current configuration.
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let snapshot = self.shared.config.snapshot();
        let mut handles = Vec::new();

        for i in 0..snapshot.stability_worker_threads {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(async move {
                debug!(worker = i, "stability worker started");
                stability_worker(shared).await;
                debug!(worker = i, "stability worker stopped");
            }));
        }
        for i in 0..snapshot.md5_worker_threads {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(async move {
                debug!(worker = i, "hash worker started");
                hash_worker(shared).await;
                debug!(worker = i, "hash worker stopped");
            }));
        }
        for i in 0..snapshot.worker_threads {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(async move {
                debug!(worker = i, "processing worker started");
                processing_worker(shared).await;
                debug!(worker = i, "processing worker stopped");
            }));
        }

        info!(
            stability = snapshot.stability_worker_threads,
            hashing = snapshot.md5_worker_threads,
            processing = snapshot.worker_threads,
            "pipeline workers started"
        );
        handles
    }
}

/// Blocking-get with timeout against a shared receiver. `None` means the
/// loop should exit, `Some(None)` that it should poll again.
async fn next_item(
    rx: &Mutex<mpsc::Receiver<FileDescriptor>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<Option<FileDescriptor>> {
    if cancel.is_cancelled() {
        return None;
    }
    let received = {
        let mut rx = rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await
    };
    match received {
        Ok(Some(desc)) => Some(Some(desc)),
        Ok(None) => None,
        Err(_) => Some(None),
    }
}

async fn stability_worker(shared: Arc<Shared>) {
    while let Some(item) = next_item(
        &shared.raw_rx,
        shared.tuning.queue_get_timeout,
        &shared.cancel,
    )
    .await
    {
        let Some(mut desc) = item else { continue };
        let snapshot = shared.config.snapshot();
        let policy = StabilityPolicy {
            stable_reads: shared.tuning.stable_reads,
            initial_backoff: shared.tuning.stability_initial_backoff,
            max_backoff: shared.tuning.stability_max_backoff,
            error_retry: shared.tuning.stability_error_retry,
            max_wait: Duration::from_secs(snapshot.max_file_wait_time),
            min_size: snapshot.ignore_file_size,
        };

        match await_stability(&desc.path, &policy, &shared.cancel).await {
            StabilityVerdict::Stable(size) => {
                desc.size = size;
                shared.stats.stable.fetch_add(1, Ordering::Relaxed);
                if shared.stable_tx.send(desc).await.is_err() {
                    break;
                }
            }
            StabilityVerdict::BelowSizeFloor(size) => {
                info!(
                    path = %desc.path.display(),
                    size,
                    floor = policy.min_size,
                    "file below size floor, skipping"
                );
                shared.stats.unstable.fetch_add(1, Ordering::Relaxed);
                shared.pending.remove(&desc.path);
            }
            StabilityVerdict::Vanished | StabilityVerdict::TimedOut => {
                warn!(path = %desc.path.display(), "file never stabilized, skipping");
                shared.stats.unstable.fetch_add(1, Ordering::Relaxed);
                shared.pending.remove(&desc.path);
            }
            StabilityVerdict::Cancelled => {
                shared.pending.remove(&desc.path);
            }
        }
    }
}

async fn hash_worker(shared: Arc<Shared>) {
    while let Some(item) = next_item(
        &shared.stable_rx,
        shared.tuning.queue_get_timeout,
        &shared.cancel,
    )
    .await
    {
        let Some(mut desc) = item else { continue };

        if shared.config.snapshot().use_md5 {
            match file_digest(&desc.path).await {
                Ok(digest) => {
                    shared.stats.hashed.fetch_add(1, Ordering::Relaxed);

                    // digest in hand: the stronger idempotence check
                    match shared
                        .ledger
                        .is_processed(&desc.path, Some(&digest), true)
                        .await
                    {
                        Ok(true) => {
                            debug!(path = %desc.path.display(), "digest already published, dropping");
                            shared.stats.processed.fetch_add(1, Ordering::Relaxed);
                            shared.pending.remove(&desc.path);
                            continue;
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(path = %desc.path.display(), error = %err, "digest ledger check failed, continuing");
                        }
                    }

                    desc.digest = Some(digest);
                }
                Err(err) => {
                    warn!(path = %desc.path.display(), error = %err, "digest failed, skipping file");
                    shared.stats.digest_failures.fetch_add(1, Ordering::Relaxed);
                    shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                    shared.pending.remove(&desc.path);
                    continue;
                }
            }
        }

        if shared.fingerprinted_tx.send(desc).await.is_err() {
            break;
        }
    }
}

async fn processing_worker(shared: Arc<Shared>) {
    while let Some(item) = next_item(
        &shared.fingerprinted_rx,
        shared.tuning.queue_get_timeout,
        &shared.cancel,
    )
    .await
    {
        let Some(desc) = item else { continue };

        if desc.priority == Priority::Low && shared.scan_in_progress.load(Ordering::SeqCst) {
            tokio::time::sleep(shared.tuning.low_priority_delay).await;
        }

        let started = Instant::now();
        let outcome = retry_with_backoff(
            &shared.tuning.process_retry,
            CuratorError::is_transient,
            || process_one(&shared, &desc),
        )
        .await;

        match outcome {
            Ok(Some(target)) => {
                shared.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(
                    path = %desc.path.display(),
                    target = %target.display(),
                    "file published"
                );
            }
            Ok(None) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(path = %desc.path.display(), error = %err, "processing failed");
            }
        }

        shared.stats.processed.fetch_add(1, Ordering::Relaxed);
        shared.pending.remove(&desc.path);

        let interval =
            Duration::from_secs(shared.config.snapshot().performance_monitor_interval);
        shared.stats.record_processing_time(started.elapsed(), interval);
    }
}

/// Identification, enrichment, publish, ledger - strictly in that order.
/// `Ok(None)` is a per-file failure that retrying cannot fix.
async fn process_one(shared: &Arc<Shared>, desc: &FileDescriptor) -> Result<Option<PathBuf>> {
    let filename = desc
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let ident = shared
        .identify_breaker
        .call(|| shared.identifier.identify(&filename))
        .await?;
    let Some(ident) = ident else {
        warn!(path = %desc.path.display(), "filename could not be identified");
        return Ok(None);
    };
    debug!(path = %desc.path.display(), ?ident, "identification result");

    let record = match &ident {
        ProvisionalIdent::Movie { title, year } => {
            shared
                .filmdb_breaker
                .call(|| shared.filmdb.search_movie(title, *year))
                .await?
        }
        ProvisionalIdent::Series { title, .. } => {
            shared
                .filmdb_breaker
                .call(|| shared.filmdb.search_series(title))
                .await?
        }
    };
    let Some(record) = record else {
        warn!(path = %desc.path.display(), title = ident.title(), "no film-database match");
        return Ok(None);
    };

    let publisher = Arc::clone(&shared.publisher);
    let source = desc.path.clone();
    let publish_record = record.clone();
    let publish_ident = ident.clone();
    let target = tokio::task::spawn_blocking(move || {
        publisher.publish(&source, &publish_record, &publish_ident)
    })
    .await
    .map_err(|err| CuratorError::Internal(format!("publish task panicked: {err}")))??;

    shared
        .ledger
        .add(
            &desc.path,
            desc.size,
            desc.digest.as_deref(),
            Some(record.external_id),
            Some(record.media_kind.as_str()),
            Some(&target),
            desc.digest.is_some(),
        )
        .await?;

    Ok(Some(target))
}
