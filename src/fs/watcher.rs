//! Filesystem watcher built on top of `notify`.
//!
//! Raw OS notifications are normalized into [`FileEvent`]s: uninteresting
//! filenames are filtered out, delete/create pairs within a short window are
//! collapsed into renames, and every surviving event is offered to a bounded
//! channel (never blocking the OS notification source) and fanned out to the
//! registered per-directory handlers.

use crate::core::monitor::event::{FileEvent, FileEventType, parent_dir};
use crate::err::Result;
use crate::fs::util::check_dir_permissions;
use crate::utilities::AsyncLogger;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Window within which a DELETE followed by a CREATE in the same directory
/// is interpreted as a rename.
pub const MOVE_PAIR_WINDOW: Duration = Duration::from_millis(500);

/// Pending delete waiting for a create in the same directory.
struct RenamePair {
    old_path: PathBuf,
    created_at: Instant,
}

type Handler = Box<dyn Fn(FileEvent) + Send + Sync>;

struct HandlerEntry {
    base_dir: PathBuf,
    handler: Handler,
}

struct WatcherState {
    logger: AsyncLogger,
    // None once the watcher has been stopped.
    watcher: Mutex<Option<RecommendedWatcher>>,
    watched_dirs: RwLock<HashSet<PathBuf>>,
    handlers: RwLock<Vec<HandlerEntry>>,
    // Keyed by parent directory.
    move_pairs: Mutex<HashMap<PathBuf, RenamePair>>,
    events_tx: mpsc::Sender<FileEvent>,
    stopping: AtomicBool,
}

/// Watcher over a set of directory trees. Keep it alive while consuming the
/// receiver returned from [`FsWatcher::new`].
pub struct FsWatcher {
    state: Arc<WatcherState>,
    worker: Option<JoinHandle<()>>,
}

impl FsWatcher {
    /// Create the watcher and its normalized-event channel. Directories are
    /// added with [`FsWatcher::watch`].
    pub fn new(
        logger: AsyncLogger,
        channel_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<FileEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(channel_capacity);
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Runs on the notify thread; hand off without blocking.
                let _ = raw_tx.send(res);
            },
            NotifyConfig::default().with_follow_symlinks(false),
        )?;

        let state = Arc::new(WatcherState {
            logger,
            watcher: Mutex::new(Some(watcher)),
            watched_dirs: RwLock::new(HashSet::new()),
            handlers: RwLock::new(Vec::new()),
            move_pairs: Mutex::new(HashMap::new()),
            events_tx,
            stopping: AtomicBool::new(false),
        });

        let worker_state = state.clone();
        let worker = tokio::spawn(async move {
            while let Some(res) = raw_rx.recv().await {
                if worker_state.stopping.load(Ordering::SeqCst) {
                    break;
                }
                match res {
                    Ok(event) => worker_state.handle_raw_event(event),
                    Err(err) => {
                        worker_state
                            .logger
                            .error(format!("Watcher error: {}", err));
                    }
                }
            }
        });

        Ok((
            Self {
                state,
                worker: Some(worker),
            },
            events_rx,
        ))
    }

    /// Register `base_dir` (and every directory below it) in the OS watch
    /// set and install a handler invoked for every normalized event whose
    /// path falls under `base_dir`.
    ///
    /// Failing to add the root is an error; failures on descendants are
    /// logged and skipped.
    pub fn watch<F>(&self, base_dir: &Path, handler: F) -> Result<()>
    where
        F: Fn(FileEvent) + Send + Sync + 'static,
    {
        self.state.handlers.write().unwrap().push(HandlerEntry {
            base_dir: base_dir.to_path_buf(),
            handler: Box::new(handler),
        });
        self.state.setup_watch(base_dir)
    }

    /// Stop observing. Releases OS resources and guarantees that no handler
    /// fires after this returns.
    pub async fn stop(&mut self) {
        self.state.stopping.store(true, Ordering::SeqCst);
        // Dropping the notify watcher stops its thread and closes the raw
        // channel, which ends the worker loop.
        let inner = self.state.watcher.lock().unwrap().take();
        drop(inner);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl WatcherState {
    fn setup_watch(&self, base_dir: &Path) -> Result<()> {
        let meta = std::fs::metadata(base_dir)
            .map_err(|e| format!("stat failed for {}: {}", base_dir.display(), e))?;
        if !meta.is_dir() {
            return Err(format!("{} is not a directory", base_dir.display()).into());
        }

        let perms = check_dir_permissions(base_dir);
        if !(perms.read && perms.execute) {
            self.logger.warn(format!(
                "Insufficient permissions on watch root {}: read={}, execute={}",
                base_dir.display(),
                perms.read,
                perms.execute
            ));
        }

        // The root must register; descendants are best-effort.
        self.add_watch_dir(base_dir)?;
        self.register_descendants(base_dir);
        Ok(())
    }

    fn register_descendants(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                self.logger.warn(format!(
                    "Failed to enumerate {}: {}",
                    dir.display(),
                    err
                ));
                return;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Err(err) = self.add_watch_dir(&path) {
                self.logger.warn(format!(
                    "Failed to add watch for directory {}: {}",
                    path.display(),
                    err
                ));
                continue;
            }
            self.register_descendants(&path);
        }
    }

    fn add_watch_dir(&self, path: &Path) -> Result<()> {
        if self.watched_dirs.read().unwrap().contains(path) {
            return Ok(());
        }
        let mut guard = self.watcher.lock().unwrap();
        let Some(watcher) = guard.as_mut() else {
            return Err("watcher has been stopped".into());
        };
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        drop(guard);
        self.watched_dirs
            .write()
            .unwrap()
            .insert(path.to_path_buf());
        Ok(())
    }

    /// Remove `path` and every watched descendant from the OS watch set.
    fn remove_watch_recursive(&self, path: &Path) {
        let stale: Vec<PathBuf> = {
            let dirs = self.watched_dirs.read().unwrap();
            dirs.iter()
                .filter(|d| d.starts_with(path))
                .cloned()
                .collect()
        };
        if stale.is_empty() {
            return;
        }

        let mut guard = self.watcher.lock().unwrap();
        let mut dirs = self.watched_dirs.write().unwrap();
        for dir in stale {
            dirs.remove(&dir);
            if let Some(watcher) = guard.as_mut() {
                if let Err(err) = watcher.unwatch(&dir) {
                    self.logger.error(format!(
                        "Failed to remove watch for {}: {}",
                        dir.display(),
                        err
                    ));
                }
            }
        }
    }

    fn handle_raw_event(&self, event: Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    self.on_create(path);
                }
            }
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                for path in event.paths {
                    self.on_write(path);
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    self.on_remove(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                // A move into the watch scope surfaces as a create.
                for path in event.paths {
                    self.on_create(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if event.paths.len() == 2 {
                    let mut paths = event.paths;
                    let to = paths.pop().unwrap();
                    let from = paths.pop().unwrap();
                    self.on_rename_pair(from, to);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Moved away; the new location, if watched, arrives separately.
                for path in event.paths {
                    self.on_rename_away(path);
                }
            }
            // Metadata changes, access notifications and anything
            // unrecognized are dropped.
            _ => {}
        }
    }

    fn on_create(&self, path: PathBuf) {
        if should_ignore_file(&path) {
            return;
        }
        let dir = parent_dir(&path);
        let paired_old = {
            let mut pairs = self.move_pairs.lock().unwrap();
            match pairs.remove(&dir) {
                Some(pair) if pair.created_at.elapsed() <= MOVE_PAIR_WINDOW => {
                    Some(pair.old_path)
                }
                // Expired or absent; an expired pair is discarded here.
                _ => None,
            }
        };
        match paired_old {
            Some(old_path) => {
                self.logger.debug(format!(
                    "Paired rename detected: {} -> {}",
                    old_path.display(),
                    path.display()
                ));
                self.emit(FileEvent::renamed(old_path, path));
            }
            None => {
                self.logger
                    .debug(format!("File created: {}", path.display()));
                self.emit(FileEvent::new(FileEventType::Created, path));
            }
        }
    }

    fn on_write(&self, path: PathBuf) {
        if should_ignore_file(&path) {
            return;
        }
        self.logger
            .debug(format!("File modified: {}", path.display()));
        self.emit(FileEvent::new(FileEventType::Modified, path));
    }

    fn on_remove(&self, path: PathBuf) {
        if should_ignore_file(&path) {
            return;
        }
        let dir = parent_dir(&path);
        self.move_pairs.lock().unwrap().insert(
            dir,
            RenamePair {
                old_path: path.clone(),
                created_at: Instant::now(),
            },
        );
        self.remove_watch_recursive(&path);
        self.logger
            .debug(format!("File deleted: {}", path.display()));
        self.emit(FileEvent::new(FileEventType::Deleted, path));
    }

    fn on_rename_away(&self, path: PathBuf) {
        if should_ignore_file(&path) {
            return;
        }
        self.remove_watch_recursive(&path);
        self.logger
            .debug(format!("File renamed away: {}", path.display()));
        self.emit(FileEvent::new(FileEventType::Renamed, path));
    }

    fn on_rename_pair(&self, from: PathBuf, to: PathBuf) {
        if should_ignore_file(&to) {
            return;
        }
        self.remove_watch_recursive(&from);
        self.logger.debug(format!(
            "File renamed: {} -> {}",
            from.display(),
            to.display()
        ));
        self.emit(FileEvent::renamed(from, to));
    }

    fn emit(&self, event: FileEvent) {
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        if let Err(mpsc::error::TrySendError::Full(ev)) = self.events_tx.try_send(event.clone()) {
            self.logger.debug(format!(
                "Event channel full, dropping event: {}",
                ev.path.display()
            ));
        }

        let handlers = self.handlers.read().unwrap();
        for entry in handlers.iter() {
            if event.path.starts_with(&entry.base_dir) {
                (entry.handler)(event.clone());
            }
        }
    }
}

/// Filenames the pipeline never reacts to: hidden files and common
/// temporary/backup suffixes left behind by editors and copy tools.
pub fn should_ignore_file(path: &Path) -> bool {
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if base.starts_with('.') || base.ends_with('~') || base.ends_with(".tmp") {
        return true;
    }
    if base.ends_with(".swp") || base.ends_with(".swo") || base.ends_with(".swn") {
        return true;
    }
    if base.ends_with(".lock") || base.ends_with(".bak") {
        return true;
    }
    false
}
