//! Lifecycle supervisor.
//!
//! Owns every component, wires the watcher and the initial scan into the
//! pipeline, and runs the 5-second control tick that drives hot reload,
//! cache expiry, status logging and the health aggregate. Shutdown is
//! cooperative: clear the cancel token, stop the watcher and prober, join
//! workers with a bounded wait, then close the pools.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use curator_config::{ConfigHandle, Settings};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::database::{open_pool, MetadataCache, ProcessedFilesDb};
use crate::digest::file_digest;
use crate::error::Result;
use crate::health::{
    DatabaseProbe, DependencyConfigProbe, FilesystemProbe, HealthProber, SystemResourcesProbe,
};
use crate::identify::{ChatCompletionIdentifier, Identifier, UnconfiguredIdentifier};
use crate::metadata::TmdbClient;
use crate::pending::PendingRegistry;
use crate::pipeline::{Pipeline, PipelineTuning};
use crate::publisher::LibraryPublisher;
use crate::scan::{DirectoryWatcher, MediaScanner};
use crate::stats::PipelineStats;
use crate::types::{is_video_file, format_file_size, Origin, ProvisionalIdent};

const PENDING_TTL: Duration = Duration::from_secs(2 * 3600);
const HEALTH_INTERVAL: Duration = Duration::from_secs(300);
const CONTROL_TICK: Duration = Duration::from_secs(5);
const CONFIG_CHECK_EVERY: Duration = Duration::from_secs(30);
const CACHE_PURGE_EVERY: Duration = Duration::from_secs(24 * 3600);
const STATUS_LOG_EVERY: Duration = Duration::from_secs(300);
const HEALTH_LOG_EVERY: Duration = Duration::from_secs(120);
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback invoked with the new log level after a successful hot reload.
pub type LogLevelSetter = Arc<dyn Fn(&str) + Send + Sync>;

pub struct MediaOrganizer {
    config: Arc<ConfigHandle>,
    ledger: Arc<ProcessedFilesDb>,
    cache: Arc<MetadataCache>,
    identifier: Arc<dyn Identifier>,
    filmdb: Arc<TmdbClient>,
    publisher: Arc<LibraryPublisher>,
    pending: Arc<PendingRegistry>,
    stats: Arc<PipelineStats>,
    pipeline: Arc<Pipeline>,
    health: Arc<HealthProber>,
    cancel: CancellationToken,
    log_level_setter: Option<LogLevelSetter>,
}

impl std::fmt::Debug for MediaOrganizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaOrganizer")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl MediaOrganizer {
    pub async fn new(config: Arc<ConfigHandle>) -> Result<Self> {
        Self::with_tuning(config, PipelineTuning::default()).await
    }

    pub async fn with_tuning(
        config: Arc<ConfigHandle>,
        tuning: PipelineTuning,
    ) -> Result<Self> {
        let settings = config.snapshot();

        // databases first, on the startup path, so schema creation and the
        // digest migration happen before any worker touches them
        info!("initializing databases");
        let ledger_pool = open_pool(&settings.processed_files_db).await?;
        let ledger = Arc::new(
            ProcessedFilesDb::open(ledger_pool, settings.processed_files_db.clone()).await?,
        );
        let cache_pool = open_pool(&settings.tmdb_cache_db).await?;
        let cache =
            Arc::new(MetadataCache::open(cache_pool, settings.cache_expire_days).await?);

        let published = ledger.count().await?;
        let cache_stats = cache.stats().await?;
        info!(
            published,
            cached = cache_stats.total,
            "databases ready"
        );

        let identifier: Arc<dyn Identifier> =
            match ChatCompletionIdentifier::from_settings(&settings.ai) {
                Ok(client) => Arc::new(client),
                Err(err) => {
                    warn!(error = %err, "identification service unavailable");
                    Arc::new(UnconfiguredIdentifier::new(settings.ai.service.as_str()))
                }
            };

        let filmdb = Arc::new(TmdbClient::new(
            settings.tmdb_api_key.clone(),
            &settings.tmdb_proxy,
            Arc::clone(&cache),
        )?);
        match filmdb.configuration().await {
            Ok(_) => info!("film database reachable"),
            Err(err) => warn!(error = %err, "film database connectivity check failed"),
        }

        let publisher = Arc::new(LibraryPublisher::new(
            settings.library_path.clone(),
            settings.anime_directory.clone(),
            settings.link_method,
        )?);

        let pending = Arc::new(PendingRegistry::new(settings.max_pending_files, PENDING_TTL));
        let stats = Arc::new(PipelineStats::new());
        let cancel = CancellationToken::new();

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&config),
            Arc::clone(&ledger),
            Arc::clone(&identifier),
            filmdb.clone(),
            Arc::clone(&publisher),
            Arc::clone(&pending),
            Arc::clone(&stats),
            cancel.clone(),
            tuning,
        ));

        let health = Arc::new(HealthProber::new(
            vec![
                Arc::new(DatabaseProbe::new(ledger.pool().clone())),
                Arc::new(FilesystemProbe::new(
                    settings.monitor_directories.clone(),
                    settings.library_path.clone(),
                )),
                Arc::new(SystemResourcesProbe::new()),
                Arc::new(DependencyConfigProbe::new(Arc::clone(&config))),
            ],
            HEALTH_INTERVAL,
        ));

        info!("media organizer initialized");
        Ok(Self {
            config,
            ledger,
            cache,
            identifier,
            filmdb,
            publisher,
            pending,
            stats,
            pipeline,
            health,
            cancel,
            log_level_setter: None,
        })
    }

    /// Hook for the binary to apply hot-reloaded log levels to its
    /// subscriber.
    pub fn set_log_level_setter(&mut self, setter: LogLevelSetter) {
        self.log_level_setter = Some(setter);
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &Arc<ProcessedFilesDb> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Run monitor mode until a signal or cancellation arrives.
    pub async fn run(&self) -> Result<()> {
        let settings = self.config.snapshot();
        for (key, value) in settings.sanitized() {
            info!(option = key.as_str(), value = value.as_str(), "effective configuration");
        }

        let health_handle = self.health.start();
        let worker_handles = self.pipeline.spawn_workers();

        let (watcher, watch_rx) = DirectoryWatcher::start(
            &settings.monitor_directories,
            settings.watches_created(),
            settings.watches_moved(),
        )?;
        let watch_task = self.spawn_watch_feed(watch_rx);
        info!("file watcher started");

        let scan_task = if settings.initial_scan {
            Some(self.spawn_initial_scan(&settings))
        } else {
            info!("initial scan disabled");
            self.stats.initial_scan_completed.store(true, Ordering::Relaxed);
            None
        };

        info!("media organizer running, send SIGINT or SIGTERM to stop");
        self.control_loop().await;

        self.shutdown(watcher, watch_task, scan_task, worker_handles, health_handle)
            .await;
        Ok(())
    }

    fn spawn_watch_feed(
        &self,
        mut rx: tokio::sync::mpsc::UnboundedReceiver<std::path::PathBuf>,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    detected = rx.recv() => {
                        let Some(path) = detected else { break };
                        pipeline.admit(&path, Origin::Watch).await;
                    }
                }
            }
        })
    }

    fn spawn_initial_scan(&self, settings: &Settings) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();
        let directories = settings.monitor_directories.clone();
        let scanner = MediaScanner::new(
            settings.ignore_patterns.clone(),
            // initial-scan files are assumed stable, so the floor applies here
            Some(settings.ignore_file_size),
        );

        pipeline.set_scan_in_progress(true);
        tokio::spawn(async move {
            info!("initial scan started");
            let mut admitted = 0usize;

            for directory in directories {
                if cancel.is_cancelled() {
                    break;
                }
                let scanner = scanner.clone();
                let dir = directory.clone();
                let found = tokio::task::spawn_blocking(move || {
                    scanner.scan_directory(&dir).collect::<Vec<_>>()
                })
                .await
                .unwrap_or_default();

                for (path, _size) in found {
                    if cancel.is_cancelled() {
                        break;
                    }
                    pipeline.admit(&path, Origin::Scan).await;
                    admitted += 1;
                }
            }

            pipeline.set_scan_in_progress(false);
            stats.initial_scan_completed.store(true, Ordering::Relaxed);
            info!(admitted, "initial scan finished");
        })
    }

    async fn control_loop(&self) {
        let mut tick = tokio::time::interval(CONTROL_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last_config_check = Instant::now();
        let mut last_cache_purge = Instant::now();
        let mut last_status_log = Instant::now();
        let mut last_health_log = Instant::now();

        let mut sigterm = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "cannot install SIGTERM handler");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received interrupt, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let now = Instant::now();

            if now.duration_since(last_config_check) >= CONFIG_CHECK_EVERY {
                if self.config.snapshot().auto_reload && self.config.reload_if_changed() {
                    self.apply_dynamic_config();
                }
                last_config_check = now;
            }

            if now.duration_since(last_cache_purge) >= CACHE_PURGE_EVERY {
                if let Err(err) = self.cache.purge_expired().await {
                    error!(error = %err, "cache purge failed");
                }
                last_cache_purge = now;
            }

            if now.duration_since(last_status_log) >= STATUS_LOG_EVERY {
                let (raw, stable, fingerprinted) = self.pipeline.queue_depths();
                let snap = self.stats.snapshot();
                info!(
                    raw,
                    stable,
                    fingerprinted,
                    pending = self.pending.len(),
                    detected = snap.detected,
                    succeeded = snap.succeeded,
                    failed = snap.failed,
                    "pipeline status"
                );
                last_status_log = now;
            }

            if now.duration_since(last_health_log) >= HEALTH_LOG_EVERY {
                if !self.health.is_healthy() {
                    warn!(unhealthy = ?self.health.unhealthy_names(), "system health degraded");
                }
                last_health_log = now;
            }
        }
    }

    /// Runtime-safe settings that take effect immediately after a reload.
    /// Monitored directories need a restart; worker counts apply to future
    /// spawns only.
    fn apply_dynamic_config(&self) {
        let settings = self.config.snapshot();
        self.publisher.set_link_method(settings.link_method);
        info!(link_method = settings.link_method.as_str(), "link method updated");
        if let Some(setter) = &self.log_level_setter {
            setter(&settings.log_level);
            info!(level = settings.log_level.as_str(), "log level updated");
        }
    }

    async fn shutdown(
        &self,
        watcher: DirectoryWatcher,
        watch_task: JoinHandle<()>,
        scan_task: Option<JoinHandle<()>>,
        worker_handles: Vec<JoinHandle<()>>,
        health_handle: JoinHandle<()>,
    ) {
        info!("stopping media organizer");
        self.cancel.cancel();

        drop(watcher);
        info!("file watcher stopped");

        self.health.stop();
        let _ = health_handle.await;
        info!("health prober stopped");

        watch_task.abort();
        if let Some(task) = scan_task {
            task.abort();
        }

        for handle in worker_handles {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("worker did not stop within the join timeout");
            }
        }
        info!("pipeline workers stopped");

        self.ledger.pool().close().await;
        self.cache.pool().close().await;
        info!("database pools closed");

        self.stats.log_summary(self.pending.len());
        info!("media organizer stopped");
    }

    /// Aggregate status for operators and tests.
    pub async fn system_status(&self) -> serde_json::Value {
        let (raw, stable, fingerprinted) = self.pipeline.queue_depths();
        let snap = self.stats.snapshot();
        let (identify_breaker, filmdb_breaker) = self.pipeline.breaker_statuses();

        json!({
            "running": !self.cancel.is_cancelled(),
            "initial_scan_completed": snap.initial_scan_completed,
            "initial_scan_in_progress": self.pipeline.scan_in_progress(),
            "queues": {
                "raw": raw,
                "stable": stable,
                "fingerprinted": fingerprinted,
            },
            "pending_files": self.pending.len(),
            "stats": {
                "detected": snap.detected,
                "duplicates": snap.duplicates,
                "stable": snap.stable,
                "unstable": snap.unstable,
                "hashed": snap.hashed,
                "processed": snap.processed,
                "succeeded": snap.succeeded,
                "failed": snap.failed,
                "average_processing_secs": snap.average_processing_secs,
                "files_per_minute": snap.files_per_minute,
            },
            "health": {
                "healthy": self.health.is_healthy(),
                "unhealthy": self.health.unhealthy_names(),
            },
            "circuit_breakers": {
                "identification": {
                    "state": identify_breaker.state.as_str(),
                    "failures": identify_breaker.failure_count,
                },
                "film_database": {
                    "state": filmdb_breaker.state.as_str(),
                    "failures": filmdb_breaker.failure_count,
                },
            },
        })
    }

    /// One-shot organization of a single file, outside the pipeline.
    ///
    /// In test mode lookups run but nothing is written to the ledger.
    pub async fn organize_single_file(&self, path: &Path, test_mode: bool) -> Result<bool> {
        let settings = self.config.snapshot();
        let Ok(path) = tokio::fs::canonicalize(path).await else {
            error!(path = %path.display(), "file does not exist");
            return Ok(false);
        };

        let Ok(meta) = tokio::fs::metadata(&path).await else {
            error!(path = %path.display(), "file is not accessible");
            return Ok(false);
        };
        if !meta.is_file() || !is_video_file(&path) {
            error!(path = %path.display(), "not a video file");
            return Ok(false);
        }
        if meta.len() < settings.ignore_file_size {
            warn!(
                path = %path.display(),
                size = %format_file_size(meta.len()),
                "file below size floor"
            );
            return Ok(false);
        }

        let digest = if settings.use_md5 {
            match file_digest(&path).await {
                Ok(digest) => Some(digest),
                Err(err) => {
                    error!(path = %path.display(), error = %err, "digest failed");
                    return Ok(false);
                }
            }
        } else {
            None
        };

        if !test_mode
            && self
                .ledger
                .is_processed(&path, digest.as_deref(), settings.use_md5)
                .await?
        {
            info!(path = %path.display(), "already published");
            return Ok(true);
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(ident) = self.identifier.identify(&filename).await? else {
            error!(path = %path.display(), "filename could not be identified");
            return Ok(false);
        };

        let record = match &ident {
            ProvisionalIdent::Movie { title, year } => {
                self.filmdb.search_movie(title, *year).await?
            }
            ProvisionalIdent::Series { title, .. } => self.filmdb.search_series(title).await?,
        };
        let Some(record) = record else {
            error!(path = %path.display(), title = ident.title(), "no film-database match");
            return Ok(false);
        };

        let publisher = Arc::clone(&self.publisher);
        let source = path.clone();
        let publish_record = record.clone();
        let publish_ident = ident.clone();
        let target = tokio::task::spawn_blocking(move || {
            publisher.publish(&source, &publish_record, &publish_ident)
        })
        .await
        .map_err(|err| crate::error::CuratorError::Internal(format!("publish task panicked: {err}")))??;

        if !test_mode {
            self.ledger
                .add(
                    &path,
                    meta.len(),
                    digest.as_deref(),
                    Some(record.external_id),
                    Some(record.media_kind.as_str()),
                    Some(&target),
                    settings.use_md5,
                )
                .await?;
        }

        info!(path = %path.display(), target = %target.display(), "file published");
        Ok(true)
    }

    /// One-shot organization of every candidate under `directory`.
    /// Returns `(succeeded, failed)`.
    pub async fn organize_directory(
        &self,
        directory: &Path,
        test_mode: bool,
    ) -> Result<(usize, usize)> {
        let settings = self.config.snapshot();
        let scanner = MediaScanner::new(
            settings.ignore_patterns.clone(),
            Some(settings.ignore_file_size),
        );

        let dir = directory.to_path_buf();
        let found = tokio::task::spawn_blocking(move || {
            scanner.scan_directory(&dir).collect::<Vec<_>>()
        })
        .await
        .unwrap_or_default();

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for (path, _size) in found {
            match self.organize_single_file(&path, test_mode).await {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "organization failed");
                    failed += 1;
                }
            }
        }

        info!(succeeded, failed, directory = %directory.display(), "directory organized");
        Ok((succeeded, failed))
    }
}
