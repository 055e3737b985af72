//! Per-directory event aggregation.
//!
//! Events for a directory are buffered until the directory goes quiet for
//! the configured period, at which point the buffer is flushed downstream as
//! a single batch. A directory that never goes quiet is force-flushed by an
//! overall stability timeout armed when its buffer is first created.
//!
//! Within a buffer the key is the file path and the value is the latest
//! event seen for it, so a create followed by repeated modifies surfaces as
//! exactly one modify.

use crate::core::monitor::event::FileEvent;
use crate::utilities::AsyncLogger;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Events collected for one directory during its quiet window.
#[derive(Debug)]
pub struct DirectoryBatch {
    pub directory: PathBuf,
    pub events: HashMap<PathBuf, FileEvent>,
}

type BatchSink = Box<dyn Fn(DirectoryBatch) + Send + Sync>;

pub struct Aggregator {
    inner: Arc<AggregatorInner>,
}

struct AggregatorInner {
    logger: AsyncLogger,
    quiet: Duration,
    stability_timeout: Duration,
    state: Mutex<AggState>,
    sink: BatchSink,
    stopped: AtomicBool,
}

#[derive(Default)]
struct AggState {
    buffers: HashMap<PathBuf, HashMap<PathBuf, FileEvent>>,
    // At most one armed quiet timer per directory.
    timers: HashMap<PathBuf, JoinHandle<()>>,
}

impl Aggregator {
    pub fn new<F>(
        logger: AsyncLogger,
        quiet: Duration,
        stability_timeout: Duration,
        sink: F,
    ) -> Self
    where
        F: Fn(DirectoryBatch) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(AggregatorInner {
                logger,
                quiet,
                stability_timeout,
                state: Mutex::new(AggState::default()),
                sink: Box::new(sink),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Merge `event` into its directory's buffer and re-arm the quiet timer.
    pub fn on_event(&self, event: FileEvent) {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        let dir = event.directory.clone();
        let mut st = inner.state.lock().unwrap();

        let newly_buffered = !st.buffers.contains_key(&dir);
        let buffer = st.buffers.entry(dir.clone()).or_default();
        buffer.insert(event.path.clone(), event);
        let pending = buffer.len();

        inner.logger.debug(format!(
            "Buffered event for {} ({} pending)",
            dir.display(),
            pending
        ));

        if let Some(timer) = st.timers.remove(&dir) {
            timer.abort();
        }
        let quiet_inner = inner.clone();
        let quiet_dir = dir.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(quiet_inner.quiet).await;
            quiet_inner.flush(&quiet_dir, false);
        });
        st.timers.insert(dir.clone(), timer);

        // The fallback is armed once per buffer, and only when it extends
        // beyond the quiet period.
        if newly_buffered && inner.stability_timeout > inner.quiet {
            let timeout_inner = inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout_inner.stability_timeout).await;
                timeout_inner.flush(&dir, true);
            });
        }
    }

    /// Cancel all timers and discard pending buffers. Late timer fires
    /// become no-ops.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let mut st = self.inner.state.lock().unwrap();
        for (_, timer) in st.timers.drain() {
            timer.abort();
        }
        st.buffers.clear();
    }
}

impl AggregatorInner {
    fn flush(&self, dir: &Path, forced: bool) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let events = {
            let mut st = self.state.lock().unwrap();
            let Some(events) = st.buffers.remove(dir) else {
                // Already flushed, or never buffered.
                return;
            };
            if let Some(timer) = st.timers.remove(dir) {
                timer.abort();
            }
            events
        };
        if events.is_empty() {
            return;
        }

        if forced {
            self.logger.warn(format!(
                "Stability timeout reached for {}, forcing flush ({} files)",
                dir.display(),
                events.len()
            ));
        } else {
            self.logger.debug(format!(
                "Directory {} went quiet, flushing {} files",
                dir.display(),
                events.len()
            ));
        }

        (self.sink)(DirectoryBatch {
            directory: dir.to_path_buf(),
            events,
        });
    }
}
