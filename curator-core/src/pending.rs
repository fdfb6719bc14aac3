//! Process-wide set of in-flight file paths.
//!
//! Admission inserts a path here before anything else touches it, which is
//! what prevents two descriptors for the same file from coexisting across
//! the queues. Entries carry an insertion timestamp; anything older than the
//! TTL is swept opportunistically on each insertion attempt so a crashed
//! worker cannot pin a path forever.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<PathBuf, Instant>>,
    capacity: usize,
    ttl: Duration,
}

impl PendingRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
        }
    }

    /// Try to claim `path`. Returns false when it is already in flight or
    /// the registry is at capacity.
    pub fn try_add(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock().expect("pending lock poisoned");

        let now = Instant::now();
        let before = entries.len();
        entries.retain(|expired, added| {
            let keep = now.duration_since(*added) <= self.ttl;
            if !keep {
                debug!(path = %expired.display(), "sweeping expired pending entry");
            }
            keep
        });
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "pending registry sweep");
        }

        if entries.contains_key(path) {
            return false;
        }

        if entries.len() >= self.capacity {
            warn!(
                capacity = self.capacity,
                path = %path.display(),
                "pending registry at capacity, rejecting admission"
            );
            return false;
        }

        entries.insert(path.to_path_buf(), now);
        true
    }

    pub fn remove(&self, path: &Path) {
        self.entries
            .lock()
            .expect("pending lock poisoned")
            .remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("pending lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_admission_is_rejected() {
        let registry = PendingRegistry::new(100, Duration::from_secs(3600));
        let path = Path::new("/in/The.Matrix.1999.mkv");

        assert!(registry.try_add(path));
        assert!(!registry.try_add(path));
        assert_eq!(registry.len(), 1);

        registry.remove(path);
        assert!(registry.try_add(path));
    }

    #[test]
    fn capacity_limit_rejects_new_paths() {
        let registry = PendingRegistry::new(2, Duration::from_secs(3600));

        assert!(registry.try_add(Path::new("/in/a.mkv")));
        assert!(registry.try_add(Path::new("/in/b.mkv")));
        assert!(!registry.try_add(Path::new("/in/c.mkv")));

        registry.remove(Path::new("/in/a.mkv"));
        assert!(registry.try_add(Path::new("/in/c.mkv")));
    }

    #[test]
    fn expired_entries_are_swept_on_insert() {
        let registry = PendingRegistry::new(100, Duration::from_millis(10));

        assert!(registry.try_add(Path::new("/in/a.mkv")));
        std::thread::sleep(Duration::from_millis(25));

        // the sweep runs as part of this attempt, freeing the stale entry
        assert!(registry.try_add(Path::new("/in/a.mkv")));
        assert_eq!(registry.len(), 1);
    }
}
