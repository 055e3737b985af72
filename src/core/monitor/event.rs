use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a normalized filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileEventType {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for FileEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileEventType::Created => "created",
            FileEventType::Modified => "modified",
            FileEventType::Deleted => "deleted",
            FileEventType::Renamed => "renamed",
        };
        write!(f, "{}", s)
    }
}

/// A normalized filesystem event as emitted by the watcher.
///
/// `old_path` is non-empty only for renames synthesized by pairing a recent
/// delete with a create in the same directory; raw OS renames carry an
/// empty `old_path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEvent {
    pub event_type: FileEventType,
    pub path: PathBuf,
    pub old_path: PathBuf,
    pub directory: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(event_type: FileEventType, path: PathBuf) -> Self {
        let directory = parent_dir(&path);
        Self {
            event_type,
            path,
            old_path: PathBuf::new(),
            directory,
            timestamp: Utc::now(),
        }
    }

    /// A rename synthesized from a delete/create pair.
    pub fn renamed(old_path: PathBuf, path: PathBuf) -> Self {
        let mut ev = Self::new(FileEventType::Renamed, path);
        ev.old_path = old_path;
        ev
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_fills_directory_from_parent() {
        let ev = FileEvent::new(FileEventType::Created, PathBuf::from("/tmp/in/a.csv"));
        assert_eq!(ev.directory, PathBuf::from("/tmp/in"));
        assert_eq!(ev.file_name(), "a.csv");
        assert!(ev.old_path.as_os_str().is_empty());
    }

    #[test]
    fn renamed_event_carries_old_path() {
        let ev = FileEvent::renamed(
            PathBuf::from("/tmp/in/old.csv"),
            PathBuf::from("/tmp/in/new.csv"),
        );
        assert_eq!(ev.event_type, FileEventType::Renamed);
        assert_eq!(ev.old_path, PathBuf::from("/tmp/in/old.csv"));
        assert_ne!(ev.old_path, ev.path);
    }

    #[test]
    fn event_serializes_for_diagnostics() {
        let ev = FileEvent::new(FileEventType::Modified, PathBuf::from("/tmp/in/a.csv"));
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"Modified\""));
        assert!(json.contains("a.csv"));
    }

    #[test]
    fn event_type_display_is_lowercase() {
        assert_eq!(FileEventType::Created.to_string(), "created");
        assert_eq!(FileEventType::Modified.to_string(), "modified");
        assert_eq!(FileEventType::Deleted.to_string(), "deleted");
        assert_eq!(FileEventType::Renamed.to_string(), "renamed");
    }
}
