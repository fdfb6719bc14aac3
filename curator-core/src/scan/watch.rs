use std::path::PathBuf;

use notify::event::{CreateKind, EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{CuratorError, Result};
use crate::types::is_video_file;

/// Recursive create/move watcher over the monitored directories.
///
/// Raw notify events are filtered down to the configured event classes and
/// to video files before the path is handed to pipeline admission. Dropping
/// the watcher stops the notify streams.
pub struct DirectoryWatcher {
    // held for its Drop side effect
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DirectoryWatcher")
    }
}

impl DirectoryWatcher {
    /// Start watching `directories`, returning the stream of detected paths.
    pub fn start(
        directories: &[PathBuf],
        watch_created: bool,
        watch_moved: bool,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PathBuf>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for path in detected_paths(&event, watch_created, watch_moved) {
                        if is_video_file(&path) {
                            debug!(path = %path.display(), "watcher detected video file");
                            // receiver gone means we are shutting down
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(err) => warn!(error = %err, "watcher error"),
            })
            .map_err(|err| CuratorError::Internal(format!("watcher init failed: {err}")))?;

        let mut watched = 0usize;
        for directory in directories {
            if !directory.exists() {
                warn!(directory = %directory.display(), "monitored directory does not exist");
                continue;
            }
            watcher
                .watch(directory, RecursiveMode::Recursive)
                .map_err(|err| {
                    CuratorError::Internal(format!(
                        "cannot watch {}: {err}",
                        directory.display()
                    ))
                })?;
            info!(directory = %directory.display(), "watching directory");
            watched += 1;
        }

        if watched == 0 {
            warn!("no monitored directories could be watched");
        }

        Ok((Self { _watcher: watcher }, rx))
    }
}

/// Map one notify event to the paths the pipeline should consider.
fn detected_paths(event: &Event, watch_created: bool, watch_moved: bool) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any)
            if watch_created =>
        {
            event.paths.clone()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) if watch_moved => event.paths.clone(),
        // a Both rename carries [from, to]; only the destination matters
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if watch_moved => {
            event.paths.iter().skip(1).cloned().collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::RenameMode;

    fn event(kind: EventKind, paths: Vec<&str>) -> Event {
        let mut ev = Event::new(kind);
        for path in paths {
            ev = ev.add_path(PathBuf::from(path));
        }
        ev
    }

    #[test]
    fn create_events_respect_configuration() {
        let ev = event(EventKind::Create(CreateKind::File), vec!["/in/a.mkv"]);
        assert_eq!(detected_paths(&ev, true, true).len(), 1);
        assert!(detected_paths(&ev, false, true).is_empty());
    }

    #[test]
    fn rename_to_uses_destination() {
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            vec!["/in/b.mkv"],
        );
        assert_eq!(detected_paths(&ev, true, true), vec![PathBuf::from("/in/b.mkv")]);
        assert!(detected_paths(&ev, true, false).is_empty());
    }

    #[test]
    fn rename_both_skips_the_source_path() {
        let ev = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec!["/in/old.mkv", "/in/new.mkv"],
        );
        assert_eq!(
            detected_paths(&ev, true, true),
            vec![PathBuf::from("/in/new.mkv")]
        );
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let ev = event(EventKind::Remove(notify::event::RemoveKind::File), vec!["/in/c.mkv"]);
        assert!(detected_paths(&ev, true, true).is_empty());
    }
}
