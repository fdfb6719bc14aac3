//! Library-layout publisher.
//!
//! Computes the canonical target path for an enriched record and
//! materializes the link: hardlink first, symlink on cross-device errors,
//! byte copy as the last resort. Publishing an already-present target is a
//! success, which is what makes re-runs idempotent at the filesystem level.

use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use curator_config::LinkMethod;
use tracing::{debug, info, warn};

use crate::error::{CuratorError, Result};
use crate::types::{EnrichedRecord, MediaKind, ProvisionalIdent};

const MOVIE_DIR: &str = "电影";
const SERIES_DIR: &str = "电视";

/// Linux EXDEV: link target on a different filesystem.
const CROSS_DEVICE: i32 = 18;

/// Strip characters that are invalid in library file names.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect::<String>()
        .trim()
        .to_owned()
}

#[derive(Debug)]
pub struct LibraryPublisher {
    library_root: PathBuf,
    anime_directory: String,
    link_method: Mutex<LinkMethod>,
}

impl LibraryPublisher {
    /// Build the publisher and lay down the library skeleton
    /// (`电影/`, `电视/` and their anime counterparts).
    pub fn new(
        library_root: impl Into<PathBuf>,
        anime_directory: impl Into<String>,
        link_method: LinkMethod,
    ) -> Result<Self> {
        let publisher = Self {
            library_root: library_root.into(),
            anime_directory: anime_directory.into(),
            link_method: Mutex::new(link_method),
        };

        for media_dir in [MOVIE_DIR, SERIES_DIR] {
            std::fs::create_dir_all(publisher.library_root.join(media_dir))?;
            std::fs::create_dir_all(
                publisher
                    .library_root
                    .join(&publisher.anime_directory)
                    .join(media_dir),
            )?;
        }

        Ok(publisher)
    }

    /// Swap the link method at runtime (hot reload).
    pub fn set_link_method(&self, method: LinkMethod) {
        *self.link_method.lock().expect("publisher lock poisoned") = method;
    }

    pub fn link_method(&self) -> LinkMethod {
        *self.link_method.lock().expect("publisher lock poisoned")
    }

    fn base_dir(&self, kind: MediaKind, is_animation: bool) -> PathBuf {
        let media_dir = match kind {
            MediaKind::Movie => MOVIE_DIR,
            MediaKind::Series => SERIES_DIR,
        };
        if is_animation {
            self.library_root.join(&self.anime_directory).join(media_dir)
        } else {
            self.library_root.join(media_dir)
        }
    }

    /// Canonical target path for `source` under the library.
    pub fn target_path(
        &self,
        source: &Path,
        record: &EnrichedRecord,
        ident: &ProvisionalIdent,
    ) -> PathBuf {
        let title = sanitize_title(&record.title);
        let year = record
            .release_year
            .map(|y| y.to_string())
            .unwrap_or_default();
        let suffix = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let folder = format!("{title} ({year})");
        let base = self.base_dir(record.media_kind, record.is_animation());

        match ident {
            ProvisionalIdent::Series {
                season, episode, ..
            } => base
                .join(folder)
                .join(format!("Season {season:02}"))
                .join(format!("{title} S{season:02}E{episode:02}{suffix}")),
            ProvisionalIdent::Movie { .. } => {
                base.join(folder).join(format!("{title} ({year}){suffix}"))
            }
        }
    }

    /// Publish `source` into the library, returning the target path.
    pub fn publish(
        &self,
        source: &Path,
        record: &EnrichedRecord,
        ident: &ProvisionalIdent,
    ) -> Result<PathBuf> {
        if !source.exists() {
            return Err(CuratorError::NotFound(format!(
                "source vanished: {}",
                source.display()
            )));
        }

        let target = self.target_path(source, record, ident);
        if target.exists() {
            info!(target = %target.display(), "target already present, treating as published");
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match self.link_method() {
            LinkMethod::Hardlink => self.hardlink(source, &target)?,
            LinkMethod::Symlink => self.symlink(source, &target)?,
            LinkMethod::Copy => self.copy(source, &target)?,
        }

        Ok(target)
    }

    fn hardlink(&self, source: &Path, target: &Path) -> Result<()> {
        match std::fs::hard_link(source, target) {
            Ok(()) => {
                info!(source = %source.display(), target = %target.display(), "hardlink created");
                Ok(())
            }
            Err(err) if err.raw_os_error() == Some(CROSS_DEVICE) => {
                warn!(
                    source = %source.display(),
                    "hardlink crosses devices, falling back to symlink"
                );
                self.symlink(source, target)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn symlink(&self, source: &Path, target: &Path) -> Result<()> {
        let absolute = source.canonicalize()?;
        match std::os::unix::fs::symlink(&absolute, target) {
            Ok(()) => {
                info!(source = %absolute.display(), target = %target.display(), "symlink created");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "symlink failed, falling back to copy");
                self.copy(source, target)
            }
        }
    }

    fn copy(&self, source: &Path, target: &Path) -> Result<()> {
        std::fs::copy(source, target)?;

        // carry the source timestamps over
        let meta = std::fs::metadata(source)?;
        let mut times = FileTimes::new();
        if let Ok(modified) = meta.modified() {
            times = times.set_modified(modified);
        }
        if let Ok(accessed) = meta.accessed() {
            times = times.set_accessed(accessed);
        }
        let file = std::fs::File::options().write(true).open(target)?;
        if let Err(err) = file.set_times(times) {
            debug!(error = %err, "could not preserve timestamps on copy");
        }

        info!(source = %source.display(), target = %target.display(), "file copied");
        Ok(())
    }
}
