//! Asynchronous logger backed by a Tokio channel.
//!
//! Log calls never block: the `AsyncLogger` handle pushes a record onto an
//! mpsc channel and a background task writes it to the configured sink
//! (stdout or an append-mode file). The file sink rotates itself once it
//! grows past a configured size, keeping a bounded number of `.bak` files.
//!
//! The handle is cheap to clone; components receive their own clone at
//! construction time instead of reaching for a process-wide logger.

use crate::err::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LOG_CHANNEL_CAPACITY: usize = 1024;
const BACKUP_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Severity of a log record. Ordered so that a minimum level can gate output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a config-supplied level name. Unknown names fall back to `Info`.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "\x1b[34mDEBUG\x1b[0m",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "\x1b[33mWARN \x1b[0m",
            LogLevel::Error => "\x1b[31mERROR\x1b[0m",
        };
        write!(f, "{}", s)
    }
}

/// A cloneable logging handle. Records below `min_level` are discarded
/// before they ever reach the channel.
#[derive(Clone, Debug)]
pub struct AsyncLogger {
    tx: mpsc::Sender<LogRecord>,
    min_level: LogLevel,
}

impl AsyncLogger {
    fn log<S: Into<String>>(&self, level: LogLevel, msg: S) {
        if level < self.min_level {
            return;
        }
        if let Err(err) = self.tx.try_send(LogRecord::new(level, msg.into())) {
            eprintln!("Failed to send log message: {}", err);
        }
    }

    /// Ask the writer task to flush and exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(LogRecord::Shutdown).await;
    }

    pub fn debug<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Debug, msg);
    }
    pub fn info<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Info, msg);
    }
    pub fn warn<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Warn, msg);
    }
    pub fn error<S: Into<String>>(&self, msg: S) {
        self.log(LogLevel::Error, msg);
    }
}

#[derive(Debug)]
enum LogRecord {
    Message {
        level: LogLevel,
        msg: String,
        ts_millis: i64,
    },
    Shutdown,
}

impl LogRecord {
    fn new(level: LogLevel, msg: String) -> Self {
        Self::Message {
            level,
            msg,
            ts_millis: Utc::now().timestamp_millis(),
        }
    }

    fn format_line(&self) -> Option<String> {
        match self {
            LogRecord::Message {
                level,
                msg,
                ts_millis,
            } => {
                let dt = DateTime::from_timestamp_millis(*ts_millis).unwrap_or_else(Utc::now);
                let ts = dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                Some(format!("{} [{}] {}\n", ts, level, msg))
            }
            LogRecord::Shutdown => None,
        }
    }
}

enum LogSink {
    Stdout(tokio::io::Stdout),
    File {
        writer: BufWriter<tokio::fs::File>,
        path: PathBuf,
        written: u64,
        max_size: u64,
        max_backups: usize,
    },
}

impl LogSink {
    async fn write_line(&mut self, line: &str) {
        match self {
            LogSink::Stdout(out) => {
                let _ = out.write_all(line.as_bytes()).await;
                let _ = out.flush().await;
            }
            LogSink::File {
                writer, written, ..
            } => {
                let _ = writer.write_all(line.as_bytes()).await;
                let _ = writer.flush().await;
                *written += line.len() as u64;
            }
        }
        self.maybe_rotate().await;
    }

    async fn flush(&mut self) {
        match self {
            LogSink::Stdout(out) => {
                let _ = out.flush().await;
            }
            LogSink::File { writer, .. } => {
                let _ = writer.flush().await;
            }
        }
    }

    /// Rotate the file sink when it exceeds `max_size`: the current file is
    /// renamed to `<path>.<timestamp>.bak` and a fresh one is opened.
    /// Backups beyond `max_backups` are pruned oldest-first.
    async fn maybe_rotate(&mut self) {
        let LogSink::File {
            writer,
            path,
            written,
            max_size,
            max_backups,
        } = self
        else {
            return;
        };
        if *max_size == 0 || *written < *max_size {
            return;
        }

        let _ = writer.flush().await;
        let stamp = Utc::now().format(BACKUP_TIME_FORMAT);
        let backup = PathBuf::from(format!("{}.{}.bak", path.display(), stamp));
        if tokio::fs::rename(&path, &backup).await.is_err() {
            // Could not move the file aside; keep appending to it.
            return;
        }
        prune_backups(path, *max_backups);

        match open_log_file(path).await {
            Ok(file) => {
                *writer = BufWriter::new(file);
                *written = 0;
            }
            Err(err) => {
                eprintln!("Failed to reopen log file after rotation: {}", err);
            }
        }
    }
}

fn prune_backups(path: &Path, max_backups: usize) {
    let Some(parent) = path.parent() else { return };
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let prefix = format!("{}.", name);

    let mut backups: Vec<PathBuf> = match std::fs::read_dir(parent) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => return,
    };

    // Backup names embed a sortable timestamp.
    backups.sort();
    while backups.len() > max_backups {
        let oldest = backups.remove(0);
        let _ = std::fs::remove_file(oldest);
    }
}

async fn open_log_file(path: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(file)
}

fn spawn_writer(mut rx: mpsc::Receiver<LogRecord>, mut sink: LogSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(rec) = rx.recv().await {
            match rec.format_line() {
                Some(line) => sink.write_line(&line).await,
                None => break,
            }
        }
        sink.flush().await;
    })
}

/// Logger writing to stdout. Used before a config is available and when no
/// log file is configured.
pub fn init_console_logger(min_level: LogLevel) -> (AsyncLogger, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<LogRecord>(LOG_CHANNEL_CAPACITY);
    let task = spawn_writer(rx, LogSink::Stdout(tokio::io::stdout()));
    (AsyncLogger { tx, min_level }, task)
}

/// Logger appending to a file, rotating past `max_size` bytes and keeping at
/// most `max_backups` rotated files.
pub async fn init_file_logger<P: AsRef<Path>>(
    path: P,
    min_level: LogLevel,
    max_size: u64,
    max_backups: usize,
) -> Result<(AsyncLogger, JoinHandle<()>)> {
    let path = path.as_ref().to_path_buf();
    let file = open_log_file(&path).await?;
    let written = file.metadata().await.map(|m| m.len()).unwrap_or(0);

    let (tx, rx) = mpsc::channel::<LogRecord>(LOG_CHANNEL_CAPACITY);
    let sink = LogSink::File {
        writer: BufWriter::new(file),
        path,
        written,
        max_size,
        max_backups,
    };
    let task = spawn_writer(rx, sink);
    Ok((AsyncLogger { tx, min_level }, task))
}

#[cfg(test)]
pub(crate) fn test_logger() -> AsyncLogger {
    // Keep a channel alive without a writer task; records are discarded.
    let (tx, rx) = mpsc::channel::<LogRecord>(LOG_CHANNEL_CAPACITY);
    let _ = Box::leak(Box::new(rx));
    AsyncLogger {
        tx,
        min_level: LogLevel::Debug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_path(name: &str) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let mut p = std::env::temp_dir();
        p.push(format!("{}_{}_{}.log", name, std::process::id(), millis));
        p
    }

    struct TempFileGuard(PathBuf);
    impl TempFileGuard {
        fn new<P: AsRef<Path>>(path: P) -> Self {
            Self(path.as_ref().to_path_buf())
        }
    }
    impl Drop for TempFileGuard {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
            if let (Some(parent), Some(name)) = (
                self.0.parent(),
                self.0.file_name().and_then(|n| n.to_str()),
            ) {
                if let Ok(entries) = fs::read_dir(parent) {
                    for entry in entries.filter_map(|e| e.ok()) {
                        let keep = entry
                            .file_name()
                            .to_str()
                            .map(|n| !n.starts_with(name))
                            .unwrap_or(true);
                        if !keep {
                            let _ = fs::remove_file(entry.path());
                        }
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn file_logger_writes_lines() {
        let path = unique_temp_path("logger_writes_lines");
        let _guard = TempFileGuard::new(&path);
        let (logger, task) = init_file_logger(&path, LogLevel::Info, 0, 0)
            .await
            .expect("init logger");

        logger.info("hello info");
        logger.warn("be careful");
        logger.error("something went wrong");

        logger.shutdown().await;
        task.await.expect("logger task join");

        let content = fs::read_to_string(&path).expect("read log file");
        assert!(content.contains("hello info"), "content=\n{}", content);
        assert!(content.contains("be careful"), "content=\n{}", content);
        assert!(
            content.contains("something went wrong"),
            "content=\n{}",
            content
        );
        assert!(content.ends_with('\n'));
    }

    #[tokio::test]
    async fn min_level_discards_lower_records() {
        let path = unique_temp_path("logger_min_level");
        let _guard = TempFileGuard::new(&path);
        let (logger, task) = init_file_logger(&path, LogLevel::Warn, 0, 0)
            .await
            .expect("init logger");

        logger.debug("debug noise");
        logger.info("info noise");
        logger.warn("warn kept");

        logger.shutdown().await;
        task.await.expect("logger task join");

        let content = fs::read_to_string(&path).expect("read log file");
        assert!(!content.contains("debug noise"));
        assert!(!content.contains("info noise"));
        assert!(content.contains("warn kept"));
    }

    #[tokio::test]
    async fn file_logger_rotates_past_max_size() {
        let path = unique_temp_path("logger_rotation");
        let _guard = TempFileGuard::new(&path);
        // Tiny threshold so the very first record trips a rotation.
        let (logger, task) = init_file_logger(&path, LogLevel::Info, 16, 3)
            .await
            .expect("init logger");

        logger.info("first record, longer than the threshold");
        logger.info("second record after rotation");

        logger.shutdown().await;
        task.await.expect("logger task join");

        let parent = path.parent().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        let backups = fs::read_dir(parent)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .map(|n| n.starts_with(name) && n.ends_with(".bak"))
                    .unwrap_or(false)
            })
            .count();
        assert!(backups >= 1, "expected at least one rotated backup");
    }

    #[test]
    fn parse_level_names() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warn"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("error"), LogLevel::Error);
        assert_eq!(LogLevel::parse("info"), LogLevel::Info);
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Info);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }
}
