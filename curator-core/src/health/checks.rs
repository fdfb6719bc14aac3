use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use curator_config::ConfigHandle;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use sysinfo::{Disks, System};
use tokio::sync::Mutex;

use super::{HealthProbe, ProbeReport};

/// One trivial query under timed measurement.
#[derive(Debug)]
pub struct DatabaseProbe {
    pool: SqlitePool,
}

impl DatabaseProbe {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for DatabaseProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> ProbeReport {
        let started = Instant::now();
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => ProbeReport::healthy(json!({
                "query_time_seconds": started.elapsed().as_secs_f64(),
            })),
            Err(err) => ProbeReport::unhealthy(json!({"error": err.to_string()})),
        }
    }
}

/// Monitored directories readable; library root writable (verified by
/// creating and deleting a disposable sub-entry).
#[derive(Debug)]
pub struct FilesystemProbe {
    monitor_directories: Vec<PathBuf>,
    library_path: PathBuf,
}

impl FilesystemProbe {
    pub fn new(monitor_directories: Vec<PathBuf>, library_path: PathBuf) -> Self {
        Self {
            monitor_directories,
            library_path,
        }
    }
}

#[async_trait]
impl HealthProbe for FilesystemProbe {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn check(&self) -> ProbeReport {
        let mut details = serde_json::Map::new();
        let mut all_healthy = true;

        for (i, directory) in self.monitor_directories.iter().enumerate() {
            let key = format!("monitor_dir_{i}");
            let entry = if !directory.exists() {
                all_healthy = false;
                json!({"status": "unhealthy", "error": "directory does not exist",
                       "path": directory.display().to_string()})
            } else if !directory.is_dir() {
                all_healthy = false;
                json!({"status": "unhealthy", "error": "not a directory",
                       "path": directory.display().to_string()})
            } else if std::fs::read_dir(directory).is_err() {
                all_healthy = false;
                json!({"status": "unhealthy", "error": "not readable",
                       "path": directory.display().to_string()})
            } else {
                json!({"status": "healthy", "path": directory.display().to_string()})
            };
            details.insert(key, entry);
        }

        let library_entry = match self.check_library_writable() {
            Ok(()) => json!({"status": "healthy", "permissions": "read_write",
                             "path": self.library_path.display().to_string()}),
            Err(err) => {
                all_healthy = false;
                json!({"status": "unhealthy", "error": err,
                       "path": self.library_path.display().to_string()})
            }
        };
        details.insert("library".to_owned(), library_entry);

        let details = serde_json::Value::Object(details);
        if all_healthy {
            ProbeReport::healthy(details)
        } else {
            ProbeReport::unhealthy(details)
        }
    }
}

impl FilesystemProbe {
    fn check_library_writable(&self) -> Result<(), String> {
        if !self.library_path.exists() {
            std::fs::create_dir_all(&self.library_path)
                .map_err(|err| format!("library root cannot be created: {err}"))?;
        } else if !self.library_path.is_dir() {
            return Err("library root is not a directory".to_owned());
        }

        let probe_dir = self.library_path.join(".health_check");
        std::fs::create_dir_all(&probe_dir)
            .map_err(|err| format!("library root not writable: {err}"))?;
        let probe_file = probe_dir.join("probe");
        std::fs::write(&probe_file, b"ok")
            .map_err(|err| format!("library root not writable: {err}"))?;
        let _ = std::fs::remove_file(&probe_file);
        let _ = std::fs::remove_dir(&probe_dir);
        Ok(())
    }
}

/// CPU, memory and disk headroom, reported without threshold enforcement.
#[derive(Debug)]
pub struct SystemResourcesProbe {
    system: Mutex<System>,
}

impl SystemResourcesProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemResourcesProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for SystemResourcesProbe {
    fn name(&self) -> &str {
        "system_resources"
    }

    async fn check(&self) -> ProbeReport {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        // cpu usage needs two samples
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let memory_percent = if system.total_memory() > 0 {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.iter().fold((0u64, 0u64), |(t, a), disk| {
            (t + disk.total_space(), a + disk.available_space())
        });

        ProbeReport::healthy(json!({
            "cpu_percent": system.global_cpu_usage(),
            "memory_percent": memory_percent,
            "memory_available_gb": system.available_memory() as f64 / 1e9,
            "disk_free_gb": available as f64 / 1e9,
            "disk_total_gb": total as f64 / 1e9,
        }))
    }
}

/// Configuration presence checks for the film-database and identification
/// services.
#[derive(Debug)]
pub struct DependencyConfigProbe {
    config: Arc<ConfigHandle>,
}

impl DependencyConfigProbe {
    pub fn new(config: Arc<ConfigHandle>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HealthProbe for DependencyConfigProbe {
    fn name(&self) -> &str {
        "dependencies"
    }

    async fn check(&self) -> ProbeReport {
        let settings = self.config.snapshot();
        let tmdb_ok = settings.tmdb_key_configured();
        let ai_ok = settings.ai.active_endpoint().is_configured();

        let details = json!({
            "tmdb": {
                "status": if tmdb_ok { "configured" } else { "unconfigured" },
            },
            "ai": {
                "status": if ai_ok { "configured" } else { "unconfigured" },
                "type": settings.ai.service.as_str(),
                "max_concurrent": settings.ai.max_concurrent,
            },
        });

        if tmdb_ok && ai_ok {
            ProbeReport::healthy(details)
        } else {
            ProbeReport::unhealthy(details)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn filesystem_probe_reports_missing_directory() {
        let library = tempdir().unwrap();
        let probe = FilesystemProbe::new(
            vec![PathBuf::from("/does/not/exist")],
            library.path().to_path_buf(),
        );

        let report = probe.check().await;
        assert!(!report.is_healthy());
        assert_eq!(
            report.details["monitor_dir_0"]["status"].as_str(),
            Some("unhealthy")
        );
        assert_eq!(report.details["library"]["status"].as_str(), Some("healthy"));
    }

    #[tokio::test]
    async fn filesystem_probe_passes_on_real_directories() {
        let monitored = tempdir().unwrap();
        let library = tempdir().unwrap();
        let probe = FilesystemProbe::new(
            vec![monitored.path().to_path_buf()],
            library.path().to_path_buf(),
        );

        let report = probe.check().await;
        assert!(report.is_healthy());
        // the disposable probe entry must be cleaned up
        assert!(!library.path().join(".health_check").exists());
    }

    #[tokio::test]
    async fn system_resources_probe_reports_numbers() {
        let probe = SystemResourcesProbe::new();
        let report = probe.check().await;
        assert!(report.is_healthy());
        assert!(report.details["memory_percent"].as_f64().is_some());
    }
}
