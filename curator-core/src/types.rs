//! Shared domain types for the ingestion pipeline.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

/// Candidate file extensions, matched case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "rm", "rmvb", "ts",
    "m2ts", "3gp", "asf", "f4v", "m2t", "mts", "ogv", "qt", "vob", "dat",
];

/// TMDB genre id for Animation.
pub const ANIMATION_GENRE_ID: i64 = 16;

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Human-readable file size for log lines.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0B".to_owned();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    /// Wire/database spelling. Series use the film database's `tv` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "tv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(MediaKind::Movie),
            "tv" | "series" => Some(MediaKind::Series),
            _ => None,
        }
    }
}

/// Scheduling hint: files surfacing from the watcher while the initial scan
/// is still running yield to live events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Watch,
    Scan,
}

/// One in-flight file. Owned by exactly one queue at a time; the pending
/// registry keeps only the path.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    pub detected_at: SystemTime,
    pub priority: Priority,
    pub origin: Origin,
    pub digest: Option<String>,
}

impl FileDescriptor {
    pub fn new(path: PathBuf, size: u64, priority: Priority, origin: Origin) -> Self {
        Self {
            path,
            size,
            detected_at: SystemTime::now(),
            priority,
            origin,
            digest: None,
        }
    }
}

/// What the identification client extracted from a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionalIdent {
    Movie {
        title: String,
        year: Option<i32>,
    },
    Series {
        title: String,
        season: u32,
        episode: u32,
    },
}

impl ProvisionalIdent {
    pub fn kind(&self) -> MediaKind {
        match self {
            ProvisionalIdent::Movie { .. } => MediaKind::Movie,
            ProvisionalIdent::Series { .. } => MediaKind::Series,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ProvisionalIdent::Movie { title, .. } => title,
            ProvisionalIdent::Series { title, .. } => title,
        }
    }
}

/// Film-database record after enrichment; cached between runs.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub external_id: i64,
    pub media_kind: MediaKind,
    pub title: String,
    pub release_year: Option<i32>,
    pub genres: Vec<String>,
    pub genre_ids: Vec<i64>,
    pub payload: Value,
}

impl EnrichedRecord {
    /// Derived, never stored independently of `genre_ids`.
    pub fn is_animation(&self) -> bool {
        self.genre_ids.contains(&ANIMATION_GENRE_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_extension_matching_is_case_insensitive() {
        assert!(is_video_file(Path::new("/in/The.Matrix.1999.mkv")));
        assert!(is_video_file(Path::new("/in/UPPER.MKV")));
        assert!(is_video_file(Path::new("/in/clip.M2TS")));
        assert!(!is_video_file(Path::new("/in/notes.txt")));
        assert!(!is_video_file(Path::new("/in/no_extension")));
    }

    #[test]
    fn file_size_formatting() {
        assert_eq!(format_file_size(0), "0B");
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(10 * 1024 * 1024), "10.00 MB");
        assert_eq!(format_file_size(2_000_000_000), "1.86 GB");
    }

    #[test]
    fn animation_derived_from_genre_ids() {
        let record = EnrichedRecord {
            external_id: 120089,
            media_kind: MediaKind::Series,
            title: "SPY×FAMILY".to_owned(),
            release_year: Some(2022),
            genres: vec!["Animation".to_owned(), "Comedy".to_owned()],
            genre_ids: vec![16, 35],
            payload: Value::Null,
        };
        assert!(record.is_animation());

        let record = EnrichedRecord {
            genre_ids: vec![28, 878],
            ..record
        };
        assert!(!record.is_animation());
    }

    #[test]
    fn media_kind_round_trip() {
        assert_eq!(MediaKind::parse("movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse("tv"), Some(MediaKind::Series));
        assert_eq!(MediaKind::Series.as_str(), "tv");
        assert_eq!(MediaKind::parse("podcast"), None);
    }
}
