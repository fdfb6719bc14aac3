use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use tracing::{info, warn};

use crate::settings::{
    AiService, AiSettings, LinkMethod, ServiceEndpoint, Settings, WatchEvent,
};
use crate::{ConfigError, Result};

const DEEPSEEK_URL: &str = "https://api.deepseek.com/v1/chat/completions";
const SPARK_URL: &str = "https://spark-api-open.xf-yun.com/v1/chat/completions";
const MODEL_SCOPE_URL: &str = "https://api-inference.modelscope.cn/v1/chat/completions";
const ZHIPU_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

/// Load settings from `path`, creating the file with defaults when absent.
///
/// Per-option parse failures fall back to the option's default with a
/// warning; only an unreadable/unparseable file is an error here. Call
/// [`validate`] afterwards for the options that cannot be defaulted.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        warn!(path = %path.display(), "configuration file missing, creating defaults");
        write_default_config(path)?;
    }

    let raw = Config::builder()
        .add_source(File::from(path.to_path_buf()).format(FileFormat::Ini))
        .build()?;

    Ok(settings_from(&raw))
}

fn settings_from(raw: &Config) -> Settings {
    let ai_type = get_string(raw, "ai.ai_type", "deepseek");
    let service = AiService::parse(&ai_type).unwrap_or_else(|| {
        warn!(value = %ai_type, "unknown ai_type, falling back to deepseek");
        AiService::DeepSeek
    });

    let link_method_raw = get_string(raw, "system.link_method", "hardlink");
    let link_method = LinkMethod::parse(&link_method_raw).unwrap_or_else(|| {
        warn!(value = %link_method_raw, "unknown link_method, falling back to hardlink");
        LinkMethod::Hardlink
    });

    let watch_events: Vec<WatchEvent> =
        get_list(raw, "system.watch_events", "created,moved")
            .iter()
            .filter_map(|item| {
                let parsed = WatchEvent::parse(item);
                if parsed.is_none() {
                    warn!(value = %item, "unknown watch event, ignoring");
                }
                parsed
            })
            .collect();
    let watch_events = if watch_events.is_empty() {
        vec![WatchEvent::Created, WatchEvent::Moved]
    } else {
        watch_events
    };

    Settings {
        monitor_directories: get_list(raw, "paths.monitor_directories", "")
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        library_path: PathBuf::from(get_string(raw, "paths.library_path", "./media_library")),
        anime_directory: get_string(raw, "paths.anime_directory", "动漫"),

        ai: AiSettings {
            service,
            max_concurrent: get_u64(raw, "ai.ai_max_concurrent", 5).max(1) as usize,
            max_tokens: get_u64(raw, "ai.ai_max_tokens", 200) as u32,
            deepseek: ServiceEndpoint {
                api_key: get_string(raw, "ai.deepseek_api_key", ""),
                url: get_string(raw, "ai.deepseek_url", DEEPSEEK_URL),
                model: "deepseek-chat".to_owned(),
            },
            spark: ServiceEndpoint {
                api_key: get_string(raw, "ai.spark_api_key", ""),
                url: get_string(raw, "ai.spark_url", SPARK_URL),
                model: get_string(raw, "ai.spark_model", "Lite"),
            },
            model_scope: ServiceEndpoint {
                api_key: get_string(raw, "ai.model_scope_api_key", ""),
                url: get_string(raw, "ai.model_scope_url", MODEL_SCOPE_URL),
                model: get_string(raw, "ai.model_scope_model", "Qwen3-235B-A22B-Instruct-2507"),
            },
            zhipu: ServiceEndpoint {
                api_key: get_string(raw, "ai.zhipu_api_key", ""),
                url: get_string(raw, "ai.zhipu_url", ZHIPU_URL),
                model: get_string(raw, "ai.zhipu_model", "GLM-4.5-Flash"),
            },
        },

        tmdb_api_key: get_string(raw, "tmdb.tmdb_api_key", ""),
        tmdb_proxy: get_string(raw, "tmdb.tmdb_proxy", ""),
        cache_expire_days: get_u64(raw, "tmdb.cache_expire_days", 30) as u32,

        tmdb_cache_db: PathBuf::from(get_string(raw, "database.tmdb_cache_db", "tmdb_cache.db")),
        processed_files_db: PathBuf::from(get_string(
            raw,
            "database.processed_files_db",
            "processed_files.db",
        )),

        worker_threads: get_u64(raw, "system.worker_threads", 5).max(1) as usize,
        stability_worker_threads: get_u64(raw, "system.stability_worker_threads", 2).max(1)
            as usize,
        md5_worker_threads: get_u64(raw, "system.md5_worker_threads", 2).max(1) as usize,
        log_level: get_string(raw, "system.log_level", "INFO"),
        initial_scan: get_bool(raw, "system.initial_scan", true),
        watch_events,
        file_stable_delay: get_u64(raw, "system.file_stable_delay", 5),
        ignore_patterns: get_list(
            raw,
            "system.ignore_patterns",
            "*.tmp,*.part,*.crdownload,*.swp",
        ),
        max_file_wait_time: get_u64(raw, "system.max_file_wait_time", 300),
        ignore_file_size: get_u64(raw, "system.ignore_file_size", 10) * 1024 * 1024,
        file_retry_interval: get_u64(raw, "system.file_retry_interval", 5),
        max_pending_files: get_u64(raw, "system.max_pending_files", 10_000) as usize,
        performance_monitor_interval: get_u64(raw, "system.performance_monitor_interval", 60),
        use_md5: get_bool(raw, "system.use_md5", true),
        link_method,
        auto_reload: get_bool(raw, "system.auto_reload", true),
    }
}

/// Validate the options without a usable default.
///
/// The library root is created when missing; a root that cannot be created is
/// a validation error, matching startup-fatal semantics. During a hot reload
/// the caller keeps the prior snapshot when this fails.
pub fn validate(settings: &Settings) -> Result<()> {
    let mut errors = Vec::new();

    if !settings.tmdb_key_configured() {
        errors.push("tmdb_api_key is not configured".to_owned());
    }

    if settings.monitor_directories.is_empty() {
        errors.push("no monitor_directories configured".to_owned());
    }

    if !settings.library_path.exists() {
        if let Err(err) = std::fs::create_dir_all(&settings.library_path) {
            errors.push(format!(
                "library root {} does not exist and cannot be created: {err}",
                settings.library_path.display()
            ));
        } else {
            info!(path = %settings.library_path.display(), "created library root");
        }
    } else if !settings.library_path.is_dir() {
        errors.push(format!(
            "library root {} is not a directory",
            settings.library_path.display()
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

/// Fetch a raw string value, tolerating either key casing for the section
/// segment (`[PATHS]` headers versus normalized lowercase keys).
fn get_raw(raw: &Config, key: &str) -> Option<String> {
    if let Ok(value) = raw.get_string(key) {
        return Some(value);
    }
    let (section, rest) = key.split_once('.')?;
    raw.get_string(&format!("{}.{rest}", section.to_ascii_uppercase()))
        .ok()
}

fn get_string(raw: &Config, key: &str, default: &str) -> String {
    match get_raw(raw, key) {
        Some(value) => value.trim().to_owned(),
        None => default.to_owned(),
    }
}

fn get_u64(raw: &Config, key: &str, default: u64) -> u64 {
    match get_raw(raw, key) {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key, value = %value, default, "invalid integer option, using default");
                default
            }
        },
        None => default,
    }
}

fn get_bool(raw: &Config, key: &str, default: bool) -> bool {
    match get_raw(raw, key) {
        Some(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1" | "on"
        ),
        None => default,
    }
}

fn get_list(raw: &Config, key: &str, default: &str) -> Vec<String> {
    let joined = get_string(raw, key, default);
    joined
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Commented INI template written on first boot.
pub fn default_template() -> String {
    let template = r#"[PATHS]
; Directories to monitor, comma separated
monitor_directories = /path/to/movies,/path/to/tv_shows
; Library root
library_path = /path/to/media_library
; Anime subdirectory name
anime_directory = 动漫

[AI]
; Identification service: deepseek, spark, model_scope, zhipu
ai_type = deepseek
; Concurrent identification requests
ai_max_concurrent = 5
; Output token cap (200 is plenty for media info extraction)
ai_max_tokens = 200
deepseek_api_key = your_deepseek_api_key
deepseek_url = https://api.deepseek.com/v1/chat/completions
spark_api_key = your_spark_api_key
spark_url = https://spark-api-open.xf-yun.com/v1/chat/completions
spark_model = Lite
model_scope_api_key = your_model_scope_api_key
model_scope_url = https://api-inference.modelscope.cn/v1/chat/completions
model_scope_model = Qwen3-235B-A22B-Instruct-2507
zhipu_api_key = your_zhipu_api_key
zhipu_url = https://open.bigmodel.cn/api/paas/v4/chat/completions
zhipu_model = GLM-4.5-Flash

[TMDB]
tmdb_api_key = your_tmdb_api_key
; Optional HTTP proxy for film-database requests
tmdb_proxy =
cache_expire_days = 30

[DATABASE]
tmdb_cache_db = tmdb_cache.db
processed_files_db = processed_files.db

[SYSTEM]
worker_threads = 5
stability_worker_threads = 2
md5_worker_threads = 2
; Log level: DEBUG, INFO, WARNING, ERROR
log_level = INFO
; Scan monitored directories at startup (true/false)
initial_scan = true
; Watched event classes: created, moved
watch_events = created,moved
file_stable_delay = 5
ignore_patterns = *.tmp,*.part,*.crdownload,*.swp
; Stability check ceiling in seconds
max_file_wait_time = 300
; Minimum file size in MiB
ignore_file_size = 10
file_retry_interval = 5
max_pending_files = 10000
performance_monitor_interval = 60
; Content digest dedup (true/false)
use_md5 = true
; Link method: hardlink, symlink, copy
link_method = hardlink
auto_reload = true
"#;
    template.to_owned()
}

/// Write the default template to `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, default_template())?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}
