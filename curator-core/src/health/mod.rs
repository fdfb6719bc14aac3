//! Periodic liveness probes over the organizer's dependencies.

mod checks;

pub use checks::{
    DatabaseProbe, DependencyConfigProbe, FilesystemProbe, SystemResourcesProbe,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of one probe run. `details` carries probe-specific measurements
/// (query latency, resource percentages, per-directory results).
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: ProbeStatus,
    pub details: Value,
}

impl ProbeReport {
    pub fn healthy(details: Value) -> Self {
        Self {
            status: ProbeStatus::Healthy,
            details,
        }
    }

    pub fn unhealthy(details: Value) -> Self {
        Self {
            status: ProbeStatus::Unhealthy,
            details,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ProbeStatus::Healthy
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> ProbeReport;
}

/// Runs every registered probe on a fixed interval and keeps the latest
/// result per probe under a mutex.
pub struct HealthProber {
    probes: Vec<Arc<dyn HealthProbe>>,
    results: Mutex<HashMap<String, ProbeReport>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HealthProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProber")
            .field("probes", &self.probes.len())
            .field("interval", &self.interval)
            .finish()
    }
}

impl HealthProber {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, interval: Duration) -> Self {
        Self {
            probes,
            results: Mutex::new(HashMap::new()),
            interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Run every probe once and store the results.
    pub async fn run_once(&self) {
        let mut current = HashMap::new();
        for probe in &self.probes {
            let report = probe.check().await;
            if !report.is_healthy() {
                warn!(probe = probe.name(), details = %report.details, "health probe failed");
            }
            current.insert(probe.name().to_owned(), report);
        }
        *self.results.lock().expect("health lock poisoned") = current;

        if self.is_healthy() {
            debug!("all health probes passing");
        }
    }

    /// Spawn the periodic probe loop. Stopped via [`HealthProber::stop`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let prober = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                prober.run_once().await;
                tokio::select! {
                    _ = prober.cancel.cancelled() => break,
                    _ = tokio::time::sleep(prober.interval) => {}
                }
            }
            debug!("health prober stopped");
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// All probes healthy. False until the first run completes.
    pub fn is_healthy(&self) -> bool {
        let results = self.results.lock().expect("health lock poisoned");
        !results.is_empty() && results.values().all(ProbeReport::is_healthy)
    }

    pub fn unhealthy_names(&self) -> Vec<String> {
        self.results
            .lock()
            .expect("health lock poisoned")
            .iter()
            .filter(|(_, report)| !report.is_healthy())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn status(&self) -> HashMap<String, ProbeReport> {
        self.results.lock().expect("health lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticProbe {
        name: &'static str,
        healthy: bool,
    }

    #[async_trait]
    impl HealthProbe for StaticProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> ProbeReport {
            if self.healthy {
                ProbeReport::healthy(json!({}))
            } else {
                ProbeReport::unhealthy(json!({"error": "down"}))
            }
        }
    }

    #[tokio::test]
    async fn aggregate_reflects_probe_results() {
        let prober = HealthProber::new(
            vec![
                Arc::new(StaticProbe {
                    name: "database",
                    healthy: true,
                }),
                Arc::new(StaticProbe {
                    name: "filesystem",
                    healthy: false,
                }),
            ],
            Duration::from_secs(300),
        );

        assert!(!prober.is_healthy()); // nothing has run yet
        prober.run_once().await;

        assert!(!prober.is_healthy());
        assert_eq!(prober.unhealthy_names(), vec!["filesystem".to_owned()]);
    }

    #[tokio::test]
    async fn all_healthy_when_every_probe_passes() {
        let prober = HealthProber::new(
            vec![Arc::new(StaticProbe {
                name: "database",
                healthy: true,
            })],
            Duration::from_secs(300),
        );

        prober.run_once().await;
        assert!(prober.is_healthy());
        assert!(prober.unhealthy_names().is_empty());
    }
}
