//! End-to-end pipeline behaviour with stubbed external services.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use curator_config::{ConfigHandle, LinkMethod};
use curator_core::database::{open_pool, ProcessedFilesDb};
use curator_core::error::{CuratorError, Result};
use curator_core::identify::Identifier;
use curator_core::metadata::FilmDatabase;
use curator_core::pending::PendingRegistry;
use curator_core::pipeline::{Admission, Pipeline, PipelineTuning};
use curator_core::publisher::LibraryPublisher;
use curator_core::resilience::{BreakerState, RetryPolicy};
use curator_core::stats::PipelineStats;
use curator_core::types::{EnrichedRecord, MediaKind, Origin, ProvisionalIdent};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DEFAULT_SYSTEM: &str = "worker_threads = 2\nstability_worker_threads = 1\n\
                              md5_worker_threads = 1\nignore_file_size = 0\n\
                              max_file_wait_time = 5\n";

struct StubIdentifier {
    response: Option<ProvisionalIdent>,
    calls: AtomicU32,
}

impl StubIdentifier {
    fn answering(response: Option<ProvisionalIdent>) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Identifier for StubIdentifier {
    async fn identify(&self, _filename: &str) -> Result<Option<ProvisionalIdent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    fn service_name(&self) -> &str {
        "stub"
    }
}

enum FilmDbBehaviour {
    Record(EnrichedRecord),
    Miss,
    Fail,
}

struct StubFilmDb {
    behaviour: FilmDbBehaviour,
    calls: AtomicU32,
}

impl StubFilmDb {
    fn with(behaviour: FilmDbBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicU32::new(0),
        })
    }

    fn answer(&self) -> Result<Option<EnrichedRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            FilmDbBehaviour::Record(record) => Ok(Some(record.clone())),
            FilmDbBehaviour::Miss => Ok(None),
            FilmDbBehaviour::Fail => Err(CuratorError::Internal("film database down".into())),
        }
    }
}

#[async_trait]
impl FilmDatabase for StubFilmDb {
    async fn search_movie(
        &self,
        _title: &str,
        _year: Option<i32>,
    ) -> Result<Option<EnrichedRecord>> {
        self.answer()
    }

    async fn search_series(&self, _title: &str) -> Result<Option<EnrichedRecord>> {
        self.answer()
    }
}

struct Harness {
    _workspace: TempDir,
    monitor: PathBuf,
    library: PathBuf,
    ledger: Arc<ProcessedFilesDb>,
    pending: Arc<PendingRegistry>,
    stats: Arc<PipelineStats>,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
}

impl Harness {
    async fn new(
        identifier: Arc<dyn Identifier>,
        filmdb: Arc<dyn FilmDatabase>,
        system: &str,
    ) -> Self {
        let workspace = TempDir::new().unwrap();
        let monitor = workspace.path().join("incoming");
        let library = workspace.path().join("library");
        std::fs::create_dir_all(&monitor).unwrap();
        std::fs::create_dir_all(&library).unwrap();

        let config_path = workspace.path().join("config.ini");
        std::fs::write(
            &config_path,
            format!(
                "[PATHS]\nmonitor_directories = {}\nlibrary_path = {}\nanime_directory = 动漫\n\
                 [TMDB]\ntmdb_api_key = test-key\n\
                 [DATABASE]\ntmdb_cache_db = {}\nprocessed_files_db = {}\n\
                 [SYSTEM]\n{system}",
                monitor.display(),
                library.display(),
                workspace.path().join("tmdb_cache.db").display(),
                workspace.path().join("processed_files.db").display(),
            ),
        )
        .unwrap();
        let config = Arc::new(ConfigHandle::load(&config_path).unwrap());

        let db_path = workspace.path().join("processed_files.db");
        let pool = open_pool(&db_path).await.unwrap();
        let ledger = Arc::new(ProcessedFilesDb::open(pool, db_path).await.unwrap());

        let publisher = Arc::new(
            LibraryPublisher::new(library.clone(), "动漫", LinkMethod::Hardlink).unwrap(),
        );
        let pending = Arc::new(PendingRegistry::new(100, Duration::from_secs(3600)));
        let stats = Arc::new(PipelineStats::new());
        let cancel = CancellationToken::new();

        let tuning = PipelineTuning {
            queue_capacity: 64,
            queue_get_timeout: Duration::from_millis(20),
            low_priority_delay: Duration::from_millis(1),
            stable_reads: 2,
            stability_initial_backoff: Duration::from_millis(2),
            stability_max_backoff: Duration::from_millis(4),
            stability_error_retry: Duration::from_millis(2),
            process_retry: RetryPolicy {
                max_retries: 0,
                initial_delay: Duration::from_millis(1),
                exponential_base: 2.0,
                max_delay: Duration::from_millis(5),
            },
        };

        let pipeline = Arc::new(Pipeline::new(
            config,
            Arc::clone(&ledger),
            identifier,
            filmdb,
            publisher,
            Arc::clone(&pending),
            Arc::clone(&stats),
            cancel.clone(),
            tuning,
        ));

        Self {
            _workspace: workspace,
            monitor,
            library,
            ledger,
            pending,
            stats,
            pipeline,
            cancel,
        }
    }

    fn write_file(&self, name: &str, bytes: usize) -> PathBuf {
        let path = self.monitor.join(name);
        std::fs::write(&path, vec![0xCDu8; bytes]).unwrap();
        path
    }

    async fn wait_until(&self, what: &str, predicate: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !predicate(self) {
            assert!(Instant::now() < deadline, "timed out waiting for: {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

fn matrix_ident() -> ProvisionalIdent {
    ProvisionalIdent::Movie {
        title: "The Matrix".to_owned(),
        year: Some(1999),
    }
}

fn matrix_record() -> EnrichedRecord {
    EnrichedRecord {
        external_id: 603,
        media_kind: MediaKind::Movie,
        title: "黑客帝国".to_owned(),
        release_year: Some(1999),
        genres: vec!["动作".to_owned(), "科幻".to_owned()],
        genre_ids: vec![28, 878],
        payload: json!({"id": 603}),
    }
}

#[tokio::test]
async fn happy_path_movie_is_published_and_recorded() {
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        StubFilmDb::with(FilmDbBehaviour::Record(matrix_record())),
        DEFAULT_SYSTEM,
    )
    .await;
    let workers = harness.pipeline.spawn_workers();

    let source = harness.write_file("The.Matrix.1999.1080p.mkv", 64 * 1024);
    let admission = harness.pipeline.admit(&source, Origin::Watch).await;
    assert_eq!(admission, Admission::Enqueued);

    harness
        .wait_until("publish to complete", |h| {
            h.stats.succeeded.load(Ordering::SeqCst) == 1
        })
        .await;

    let target = harness
        .library
        .join("电影/黑客帝国 (1999)/黑客帝国 (1999).mkv");
    assert!(target.exists(), "expected {} to exist", target.display());

    // success is never recorded without a ledger entry
    let canonical = source.canonicalize().unwrap();
    assert!(harness.ledger.is_processed(&canonical, None, false).await.unwrap());
    let entry = &harness.ledger.recent(1).await.unwrap()[0];
    assert_eq!(entry.external_id, Some(603));
    assert_eq!(entry.media_kind.as_deref(), Some("movie"));
    assert!(entry.file_digest.is_some());
    assert_eq!(entry.target_path.as_deref(), target.to_str());

    harness
        .wait_until("pending registry to drain", |h| h.pending.is_empty())
        .await;

    harness.stop();
    for worker in workers {
        let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;
    }
}

#[tokio::test]
async fn animation_series_lands_under_the_anime_tree() {
    let ident = ProvisionalIdent::Series {
        title: "SPY x FAMILY".to_owned(),
        season: 1,
        episode: 3,
    };
    let record = EnrichedRecord {
        external_id: 120089,
        media_kind: MediaKind::Series,
        title: "SPY×FAMILY".to_owned(),
        release_year: Some(2022),
        genres: vec!["动画".to_owned(), "喜剧".to_owned()],
        genre_ids: vec![16, 35],
        payload: json!({"id": 120089}),
    };

    let harness = Harness::new(
        StubIdentifier::answering(Some(ident)),
        StubFilmDb::with(FilmDbBehaviour::Record(record)),
        DEFAULT_SYSTEM,
    )
    .await;
    let _workers = harness.pipeline.spawn_workers();

    let source = harness.write_file("SPY x FAMILY S01E03.mp4", 64 * 1024);
    assert_eq!(
        harness.pipeline.admit(&source, Origin::Watch).await,
        Admission::Enqueued
    );

    harness
        .wait_until("publish to complete", |h| {
            h.stats.succeeded.load(Ordering::SeqCst) == 1
        })
        .await;

    let target = harness
        .library
        .join("动漫/电视/SPY×FAMILY (2022)/Season 01/SPY×FAMILY S01E03.mp4");
    assert!(target.exists(), "expected {} to exist", target.display());

    harness.stop();
}

#[tokio::test]
async fn duplicate_admission_leaves_one_descriptor_in_flight() {
    // no workers: both admissions race only against each other
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        StubFilmDb::with(FilmDbBehaviour::Record(matrix_record())),
        DEFAULT_SYSTEM,
    )
    .await;

    let source = harness.write_file("dupe.mkv", 1024);
    assert_eq!(
        harness.pipeline.admit(&source, Origin::Watch).await,
        Admission::Enqueued
    );
    assert_eq!(
        harness.pipeline.admit(&source, Origin::Watch).await,
        Admission::Duplicate
    );

    assert_eq!(harness.stats.duplicates.load(Ordering::SeqCst), 1);
    assert_eq!(harness.stats.detected.load(Ordering::SeqCst), 1);
    let (raw, stable, fingerprinted) = harness.pipeline.queue_depths();
    assert_eq!((raw, stable, fingerprinted), (1, 0, 0));
}

#[tokio::test]
async fn republished_path_is_dropped_at_admission() {
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        StubFilmDb::with(FilmDbBehaviour::Record(matrix_record())),
        DEFAULT_SYSTEM,
    )
    .await;
    let _workers = harness.pipeline.spawn_workers();

    let source = harness.write_file("once.mkv", 64 * 1024);
    harness.pipeline.admit(&source, Origin::Watch).await;
    harness
        .wait_until("first publish", |h| {
            h.stats.succeeded.load(Ordering::SeqCst) == 1 && h.pending.is_empty()
        })
        .await;

    // idempotence: repeated admission yields no second ledger entry
    assert_eq!(
        harness.pipeline.admit(&source, Origin::Watch).await,
        Admission::AlreadyProcessed
    );
    assert_eq!(harness.ledger.count().await.unwrap(), 1);

    harness.stop();
}

#[tokio::test]
async fn file_below_the_size_floor_is_counted_unstable() {
    // floor of 1 MiB; the file is stable but far smaller
    let system = "worker_threads = 1\nstability_worker_threads = 1\n\
                  md5_worker_threads = 1\nignore_file_size = 1\nmax_file_wait_time = 5\n";
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        StubFilmDb::with(FilmDbBehaviour::Record(matrix_record())),
        system,
    )
    .await;
    let _workers = harness.pipeline.spawn_workers();

    let source = harness.write_file("small.mkv", 100 * 1024);
    assert_eq!(
        harness.pipeline.admit(&source, Origin::Watch).await,
        Admission::Enqueued
    );

    harness
        .wait_until("size gate", |h| h.stats.unstable.load(Ordering::SeqCst) == 1)
        .await;
    harness
        .wait_until("pending registry to drain", |h| h.pending.is_empty())
        .await;

    assert_eq!(harness.stats.succeeded.load(Ordering::SeqCst), 0);
    assert_eq!(harness.ledger.count().await.unwrap(), 0);
    // nothing materialized under the library
    let movie_dir = harness.library.join("电影");
    assert_eq!(std::fs::read_dir(movie_dir).unwrap().count(), 0);

    harness.stop();
}

#[tokio::test]
async fn film_database_outage_opens_the_breaker() {
    let filmdb = StubFilmDb::with(FilmDbBehaviour::Fail);
    let system = "worker_threads = 1\nstability_worker_threads = 1\n\
                  md5_worker_threads = 1\nignore_file_size = 0\nmax_file_wait_time = 5\n";
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        Arc::clone(&filmdb) as Arc<dyn FilmDatabase>,
        system,
    )
    .await;
    let _workers = harness.pipeline.spawn_workers();

    for i in 0..6 {
        let source = harness.write_file(&format!("movie{i}.mkv"), 8 * 1024);
        assert_eq!(
            harness.pipeline.admit(&source, Origin::Watch).await,
            Admission::Enqueued
        );
    }

    harness
        .wait_until("all six files to fail", |h| {
            h.stats.processed.load(Ordering::SeqCst) == 6
        })
        .await;

    // threshold five: the sixth call is rejected without reaching the stub
    assert_eq!(filmdb.calls.load(Ordering::SeqCst), 5);
    assert_eq!(harness.stats.failed.load(Ordering::SeqCst), 6);
    let (_, filmdb_status) = harness.pipeline.breaker_statuses();
    assert_eq!(filmdb_status.state, BreakerState::Open);

    harness.stop();
}

#[tokio::test]
async fn unidentifiable_file_fails_without_touching_the_film_database() {
    let filmdb = StubFilmDb::with(FilmDbBehaviour::Record(matrix_record()));
    let harness = Harness::new(
        StubIdentifier::answering(None),
        Arc::clone(&filmdb) as Arc<dyn FilmDatabase>,
        DEFAULT_SYSTEM,
    )
    .await;
    let _workers = harness.pipeline.spawn_workers();

    let source = harness.write_file("garbled.mkv", 8 * 1024);
    harness.pipeline.admit(&source, Origin::Watch).await;

    harness
        .wait_until("file to fail", |h| h.stats.failed.load(Ordering::SeqCst) == 1)
        .await;

    assert_eq!(filmdb.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.ledger.count().await.unwrap(), 0);

    harness.stop();
}

#[tokio::test]
async fn disabled_digests_publish_with_a_null_digest() {
    let system = "worker_threads = 1\nstability_worker_threads = 1\n\
                  md5_worker_threads = 1\nignore_file_size = 0\n\
                  max_file_wait_time = 5\nuse_md5 = false\n";
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        StubFilmDb::with(FilmDbBehaviour::Record(matrix_record())),
        system,
    )
    .await;
    let _workers = harness.pipeline.spawn_workers();

    let source = harness.write_file("nodigest.mkv", 8 * 1024);
    harness.pipeline.admit(&source, Origin::Watch).await;

    harness
        .wait_until("publish", |h| h.stats.succeeded.load(Ordering::SeqCst) == 1)
        .await;

    assert_eq!(harness.stats.hashed.load(Ordering::SeqCst), 0);
    let entry = &harness.ledger.recent(1).await.unwrap()[0];
    assert_eq!(entry.file_digest, None);

    harness.stop();
}

#[tokio::test]
async fn non_video_and_ignored_files_are_filtered() {
    let harness = Harness::new(
        StubIdentifier::answering(Some(matrix_ident())),
        StubFilmDb::with(FilmDbBehaviour::Record(matrix_record())),
        DEFAULT_SYSTEM,
    )
    .await;

    let text = harness.monitor.join("notes.txt");
    std::fs::write(&text, b"hello").unwrap();
    assert_eq!(
        harness.pipeline.admit(&text, Origin::Watch).await,
        Admission::Filtered
    );

    let partial = harness.write_file("movie.mkv.part", 1024);
    assert_eq!(
        harness.pipeline.admit(&partial, Origin::Watch).await,
        Admission::Filtered
    );

    assert_eq!(
        harness
            .pipeline
            .admit(Path::new("/does/not/exist.mkv"), Origin::Watch)
            .await,
        Admission::Filtered
    );

    assert_eq!(harness.stats.detected.load(Ordering::SeqCst), 0);
    assert!(harness.pending.is_empty());
}
