//! File stability detection.
//!
//! A file is stable once its size is unchanged for a configured number of
//! consecutive reads and one byte can actually be read from it. The size
//! floor is enforced strictly after stability is established, because a
//! file that is still being downloaded may legitimately be small.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StabilityPolicy {
    /// Consecutive identical size reads required.
    pub stable_reads: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Gap after a transient stat/read error.
    pub error_retry: Duration,
    /// Total wall-clock budget.
    pub max_wait: Duration,
    /// Minimum publishable size in bytes.
    pub min_size: u64,
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self {
            stable_reads: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(5),
            error_retry: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
            min_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityVerdict {
    /// Stable and at or above the size floor; carries the settled size.
    Stable(u64),
    /// Stable but below the size floor.
    BelowSizeFloor(u64),
    Vanished,
    TimedOut,
    Cancelled,
}

/// Poll `path` until it settles, vanishes, or the budget runs out.
pub async fn await_stability(
    path: &Path,
    policy: &StabilityPolicy,
    cancel: &CancellationToken,
) -> StabilityVerdict {
    let started = Instant::now();
    let mut last_size: Option<u64> = None;
    let mut stable_count: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return StabilityVerdict::Cancelled;
        }
        if started.elapsed() > policy.max_wait {
            warn!(path = %path.display(), "stability check timed out");
            return StabilityVerdict::TimedOut;
        }

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "file vanished during stability check");
                return StabilityVerdict::Vanished;
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "stat failed during stability check");
                tokio::time::sleep(policy.error_retry).await;
                continue;
            }
        };

        if last_size == Some(size) {
            stable_count += 1;
        } else {
            stable_count = 0;
            last_size = Some(size);
        }

        if stable_count >= policy.stable_reads {
            if can_read_one_byte(path).await {
                if size < policy.min_size {
                    return StabilityVerdict::BelowSizeFloor(size);
                }
                debug!(
                    path = %path.display(),
                    waited_secs = started.elapsed().as_secs_f64(),
                    size,
                    "file stable"
                );
                return StabilityVerdict::Stable(size);
            }
            // locked or mid-move; the next pass re-verifies size and access
        }

        let backoff = backoff_for(policy, stable_count);
        tokio::time::sleep(backoff).await;
    }
}

fn backoff_for(policy: &StabilityPolicy, stable_count: u32) -> Duration {
    let doubled = policy
        .initial_backoff
        .saturating_mul(1 << (stable_count / 2).min(8));
    doubled.min(policy.max_backoff)
}

async fn can_read_one_byte(path: &Path) -> bool {
    let mut buf = [0u8; 1];
    match tokio::fs::File::open(path).await {
        Ok(mut file) => file.read(&mut buf).await.is_ok(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "cannot open file for read probe");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast_policy(min_size: u64) -> StabilityPolicy {
        StabilityPolicy {
            stable_reads: 2,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(5),
            error_retry: Duration::from_millis(2),
            max_wait: Duration::from_millis(500),
            min_size,
        }
    }

    #[tokio::test]
    async fn settled_file_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let verdict = await_stability(&path, &fast_policy(1024), &CancellationToken::new()).await;
        assert_eq!(verdict, StabilityVerdict::Stable(4096));
    }

    #[tokio::test]
    async fn small_file_hits_the_size_floor_after_stability() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let verdict = await_stability(&path, &fast_policy(1024), &CancellationToken::new()).await;
        assert_eq!(verdict, StabilityVerdict::BelowSizeFloor(100));
    }

    #[tokio::test]
    async fn missing_file_vanishes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.mkv");

        let verdict = await_stability(&path, &fast_policy(1024), &CancellationToken::new()).await;
        assert_eq!(verdict, StabilityVerdict::Vanished);
    }

    #[tokio::test]
    async fn growing_file_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growing.mkv");
        std::fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..200 {
                let current = std::fs::read(&writer_path).unwrap_or_default();
                let mut grown = current;
                grown.extend_from_slice(b"more");
                let _ = std::fs::write(&writer_path, grown);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let mut policy = fast_policy(1);
        policy.max_wait = Duration::from_millis(60);
        let verdict = await_stability(&path, &policy, &CancellationToken::new()).await;
        writer.abort();

        assert_eq!(verdict, StabilityVerdict::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mkv");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let verdict = await_stability(&path, &fast_policy(1024), &cancel).await;
        assert_eq!(verdict, StabilityVerdict::Cancelled);
    }

    #[test]
    fn backoff_starts_low_and_clamps() {
        let policy = StabilityPolicy::default();
        assert_eq!(backoff_for(&policy, 0), Duration::from_secs(2));
        assert_eq!(backoff_for(&policy, 1), Duration::from_secs(2));
        assert_eq!(backoff_for(&policy, 2), Duration::from_secs(4));
        assert_eq!(backoff_for(&policy, 4), Duration::from_secs(5));
        assert_eq!(backoff_for(&policy, 40), Duration::from_secs(5));
    }
}
