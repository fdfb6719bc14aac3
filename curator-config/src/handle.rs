use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use tracing::{error, info};

use crate::loader::{load_settings, validate};
use crate::settings::Settings;
use crate::Result;

/// Shared handle to the live configuration.
///
/// Readers take a cheap `Arc<Settings>` snapshot; the supervisor's control
/// tick calls [`ConfigHandle::reload_if_changed`] which swaps in a new
/// snapshot only after the replacement loads and validates. A failed reload
/// leaves the prior snapshot in place.
#[derive(Debug)]
pub struct ConfigHandle {
    path: PathBuf,
    current: RwLock<Arc<Settings>>,
    last_mtime: Mutex<Option<SystemTime>>,
}

impl ConfigHandle {
    /// Load and validate the configuration at `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = load_settings(&path)?;
        validate(&settings)?;
        let mtime = file_mtime(&path);
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(settings)),
            last_mtime: Mutex::new(mtime),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot. Never blocks on a reload in progress for long; the
    /// write side only swaps an `Arc`.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.read().expect("config lock poisoned").clone()
    }

    /// True when the file's mtime moved past the last one we loaded.
    fn should_reload(&self) -> bool {
        let Some(mtime) = file_mtime(&self.path) else {
            return false;
        };
        let mut last = self.last_mtime.lock().expect("config lock poisoned");
        match *last {
            Some(seen) if mtime <= seen => false,
            _ => {
                *last = Some(mtime);
                true
            }
        }
    }

    /// Reload when the file changed on disk. Returns true when a new
    /// snapshot was installed.
    pub fn reload_if_changed(&self) -> bool {
        if !self.should_reload() {
            return false;
        }

        info!(path = %self.path.display(), "configuration file changed, reloading");
        match self.try_reload() {
            Ok(()) => {
                info!("configuration reloaded");
                true
            }
            Err(err) => {
                error!(error = %err, "configuration reload failed, keeping previous snapshot");
                false
            }
        }
    }

    fn try_reload(&self) -> Result<()> {
        let settings = load_settings(&self.path)?;
        validate(&settings)?;
        *self.current.write().expect("config lock poisoned") = Arc::new(settings);
        Ok(())
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
