use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::types::is_video_file;

/// Case-insensitive ignore match on the file name: `*suffix` globs and exact
/// names.
pub fn matches_ignore_pattern(file_name: &str, patterns: &[String]) -> bool {
    let lower = file_name.to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        match pattern.strip_prefix('*') {
            Some(suffix) => lower.ends_with(suffix),
            None => lower == pattern,
        }
    })
}

/// Walks directory trees and yields candidate video files.
#[derive(Debug, Clone)]
pub struct MediaScanner {
    ignore_patterns: Vec<String>,
    /// Size floor applied only to initial scans, where files are assumed
    /// stable already. Live detections defer the size check to the
    /// stability stage.
    min_size: Option<u64>,
}

impl MediaScanner {
    pub fn new(ignore_patterns: Vec<String>, min_size: Option<u64>) -> Self {
        Self {
            ignore_patterns,
            min_size,
        }
    }

    fn skip_reason(&self, path: &Path, size: u64) -> Option<&'static str> {
        if !is_video_file(path) {
            return Some("not a video file");
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if matches_ignore_pattern(name, &self.ignore_patterns) {
                return Some("ignore pattern");
            }
        }
        if let Some(min) = self.min_size {
            if size < min {
                return Some("below size floor");
            }
        }
        None
    }

    /// Enumerate candidate `(path, size)` pairs under `directory`.
    pub fn scan_directory<'a>(
        &'a self,
        directory: &Path,
    ) -> impl Iterator<Item = (PathBuf, u64)> + 'a {
        if !directory.exists() {
            warn!(directory = %directory.display(), "scan directory does not exist");
        } else {
            info!(directory = %directory.display(), "scanning directory");
        }

        WalkDir::new(directory)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "walk error, skipping entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let path = entry.path().to_path_buf();
                let size = match entry.metadata() {
                    Ok(meta) => meta.len(),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "cannot stat file");
                        return None;
                    }
                };
                match self.skip_reason(&path, size) {
                    Some(reason) => {
                        debug!(path = %path.display(), reason, "skipping file");
                        None
                    }
                    None => Some((path, size)),
                }
            })
    }

    /// Scan several trees back to back.
    pub fn scan_directories<'a>(
        &'a self,
        directories: &'a [PathBuf],
    ) -> impl Iterator<Item = (PathBuf, u64)> + 'a {
        directories
            .iter()
            .flat_map(move |dir| self.scan_directory(dir))
    }
}
