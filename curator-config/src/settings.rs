use std::path::PathBuf;

/// API keys that still carry the template placeholder are treated as unset.
pub const PLACEHOLDER_KEY_PREFIX: &str = "your_";

/// Generative-text backend used for filename identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiService {
    DeepSeek,
    Spark,
    ModelScope,
    Zhipu,
}

impl AiService {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiService::DeepSeek => "deepseek",
            AiService::Spark => "spark",
            AiService::ModelScope => "model_scope",
            AiService::Zhipu => "zhipu",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Some(AiService::DeepSeek),
            "spark" => Some(AiService::Spark),
            "model_scope" | "modelscope" => Some(AiService::ModelScope),
            "zhipu" => Some(AiService::Zhipu),
            _ => None,
        }
    }
}

/// How published files are materialized inside the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMethod {
    #[default]
    Hardlink,
    Symlink,
    Copy,
}

impl LinkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMethod::Hardlink => "hardlink",
            LinkMethod::Symlink => "symlink",
            LinkMethod::Copy => "copy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hardlink" => Some(LinkMethod::Hardlink),
            "symlink" => Some(LinkMethod::Symlink),
            "copy" => Some(LinkMethod::Copy),
            _ => None,
        }
    }
}

/// Filesystem event classes the watcher subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Created,
    Moved,
}

impl WatchEvent {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Some(WatchEvent::Created),
            "moved" => Some(WatchEvent::Moved),
            _ => None,
        }
    }
}

/// Endpoint + credentials for one chat-completion service.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub api_key: String,
    pub url: String,
    pub model: String,
}

impl ServiceEndpoint {
    /// A key is considered configured when non-empty and not the template
    /// placeholder.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_key.starts_with(PLACEHOLDER_KEY_PREFIX)
    }
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub service: AiService,
    pub max_concurrent: usize,
    pub max_tokens: u32,
    pub deepseek: ServiceEndpoint,
    pub spark: ServiceEndpoint,
    pub model_scope: ServiceEndpoint,
    pub zhipu: ServiceEndpoint,
}

impl AiSettings {
    pub fn endpoint(&self, service: AiService) -> &ServiceEndpoint {
        match service {
            AiService::DeepSeek => &self.deepseek,
            AiService::Spark => &self.spark,
            AiService::ModelScope => &self.model_scope,
            AiService::Zhipu => &self.zhipu,
        }
    }

    /// Endpoint for the configured service.
    pub fn active_endpoint(&self) -> &ServiceEndpoint {
        self.endpoint(self.service)
    }
}

/// One immutable snapshot of the effective configuration.
///
/// Readers hold an `Arc<Settings>`; a hot reload swaps the whole snapshot so
/// no reader ever observes a half-applied edit.
#[derive(Debug, Clone)]
pub struct Settings {
    // PATHS
    pub monitor_directories: Vec<PathBuf>,
    pub library_path: PathBuf,
    pub anime_directory: String,

    // AI
    pub ai: AiSettings,

    // TMDB
    pub tmdb_api_key: String,
    pub tmdb_proxy: String,
    pub cache_expire_days: u32,

    // DATABASE
    pub tmdb_cache_db: PathBuf,
    pub processed_files_db: PathBuf,

    // SYSTEM
    pub worker_threads: usize,
    pub stability_worker_threads: usize,
    pub md5_worker_threads: usize,
    pub log_level: String,
    pub initial_scan: bool,
    pub watch_events: Vec<WatchEvent>,
    pub file_stable_delay: u64,
    pub ignore_patterns: Vec<String>,
    pub max_file_wait_time: u64,
    /// Minimum publishable file size in bytes (the INI option is in MiB).
    pub ignore_file_size: u64,
    pub file_retry_interval: u64,
    pub max_pending_files: usize,
    pub performance_monitor_interval: u64,
    pub use_md5: bool,
    pub link_method: LinkMethod,
    pub auto_reload: bool,
}

impl Settings {
    pub fn tmdb_key_configured(&self) -> bool {
        !self.tmdb_api_key.is_empty() && !self.tmdb_api_key.starts_with(PLACEHOLDER_KEY_PREFIX)
    }

    pub fn watches_created(&self) -> bool {
        self.watch_events.contains(&WatchEvent::Created)
    }

    pub fn watches_moved(&self) -> bool {
        self.watch_events.contains(&WatchEvent::Moved)
    }

    /// Effective configuration with credentials masked, for logging.
    pub fn sanitized(&self) -> Vec<(String, String)> {
        fn mask(key: &str) -> String {
            if key.is_empty() || key.starts_with(PLACEHOLDER_KEY_PREFIX) {
                "<unset>".to_owned()
            } else {
                "***".to_owned()
            }
        }

        vec![
            (
                "monitor_directories".into(),
                self.monitor_directories
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            ("library_path".into(), self.library_path.display().to_string()),
            ("anime_directory".into(), self.anime_directory.clone()),
            ("ai_type".into(), self.ai.service.as_str().to_owned()),
            ("ai_max_concurrent".into(), self.ai.max_concurrent.to_string()),
            ("ai_api_key".into(), mask(&self.ai.active_endpoint().api_key)),
            ("tmdb_api_key".into(), mask(&self.tmdb_api_key)),
            ("tmdb_proxy".into(), self.tmdb_proxy.clone()),
            ("cache_expire_days".into(), self.cache_expire_days.to_string()),
            ("worker_threads".into(), self.worker_threads.to_string()),
            (
                "stability_worker_threads".into(),
                self.stability_worker_threads.to_string(),
            ),
            ("md5_worker_threads".into(), self.md5_worker_threads.to_string()),
            ("log_level".into(), self.log_level.clone()),
            ("initial_scan".into(), self.initial_scan.to_string()),
            ("use_md5".into(), self.use_md5.to_string()),
            ("link_method".into(), self.link_method.as_str().to_owned()),
            ("auto_reload".into(), self.auto_reload.to_string()),
        ]
    }
}
