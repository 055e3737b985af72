//! Small time-keyed caches: execution deduplication and drop-log throttling.
//!
//! Both are plain maps behind their own mutex, garbage-collected by the
//! periodic cleanup job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Interval between "channel full" log lines for the same path.
pub const DROP_LOG_THROTTLE: Duration = Duration::from_secs(10);

/// Age past which dedup and drop-log entries are expired.
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(10 * 60);

/// Suppresses re-execution of the same (command, path) pair inside the
/// configured window. Keyed by `command + "|" + path`.
pub struct ExecutionDedup {
    entries: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl ExecutionDedup {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    /// True when the pair may execute now; records the execution instant.
    pub fn should_execute(&self, command: &str, path: &Path) -> bool {
        let key = format!("{}|{}", command, path.display());
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = entries.get(&key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        entries.insert(key, now);
        true
    }

    pub fn cleanup(&self, expiration: Duration) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, last| now.duration_since(*last) <= expiration);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Rate-limits "event channel full, dropping" log lines per path.
pub struct DropLogThrottle {
    entries: Mutex<HashMap<PathBuf, Instant>>,
}

impl DropLogThrottle {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True at most once per [`DROP_LOG_THROTTLE`] for a given path.
    pub fn should_log(&self, path: &Path) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = entries.get(path) {
            if now.duration_since(*last) < DROP_LOG_THROTTLE {
                return false;
            }
        }
        entries.insert(path.to_path_buf(), now);
        true
    }

    pub fn cleanup(&self, expiration: Duration) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, last| now.duration_since(*last) <= expiration);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for DropLogThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn dedup_suppresses_within_interval() {
        let dedup = ExecutionDedup::new(Duration::from_millis(80));
        let path = Path::new("/tmp/in/a.csv");

        assert!(dedup.should_execute("echo", path));
        assert!(!dedup.should_execute("echo", path));

        sleep(Duration::from_millis(100));
        assert!(dedup.should_execute("echo", path));
    }

    #[test]
    fn dedup_key_includes_command_and_path() {
        let dedup = ExecutionDedup::new(Duration::from_secs(60));
        let path = Path::new("/tmp/in/a.csv");

        assert!(dedup.should_execute("first", path));
        // Different command, same path: independent entry.
        assert!(dedup.should_execute("second", path));
        // Same command, different path: independent entry.
        assert!(dedup.should_execute("first", Path::new("/tmp/in/b.csv")));
        assert!(!dedup.should_execute("first", path));
    }

    #[test]
    fn dedup_cleanup_expires_stale_entries() {
        let dedup = ExecutionDedup::new(Duration::from_secs(60));
        assert!(dedup.should_execute("echo", Path::new("/a")));
        assert!(dedup.should_execute("echo", Path::new("/b")));
        assert_eq!(dedup.len(), 2);

        sleep(Duration::from_millis(60));
        dedup.cleanup(Duration::from_millis(40));
        assert_eq!(dedup.len(), 0);
    }

    #[test]
    fn drop_log_throttles_per_path() {
        let throttle = DropLogThrottle::new();
        let a = Path::new("/tmp/in/a.csv");
        let b = Path::new("/tmp/in/b.csv");

        assert!(throttle.should_log(a));
        assert!(!throttle.should_log(a));
        // Independent paths throttle independently.
        assert!(throttle.should_log(b));
    }

    #[test]
    fn drop_log_cleanup_expires_stale_entries() {
        let throttle = DropLogThrottle::new();
        assert!(throttle.should_log(Path::new("/a")));
        assert_eq!(throttle.len(), 1);

        sleep(Duration::from_millis(60));
        throttle.cleanup(Duration::from_millis(40));
        assert_eq!(throttle.len(), 0);
    }
}
