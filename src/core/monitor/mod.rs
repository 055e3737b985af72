//! The supervisor: owns the watcher, the aggregator, the caches and the
//! execution gate, wires them together and orchestrates startup and
//! graceful shutdown.

pub mod aggregator;
pub mod caches;
pub mod event;
pub mod executor;
pub mod matcher;
pub mod process_kill;

use crate::config::{Config, DEFAULT_EVENT_CHANNEL_BUFFER_SIZE, MonitorRule};
use crate::core::monitor::aggregator::{Aggregator, DirectoryBatch};
use crate::core::monitor::caches::{DropLogThrottle, ExecutionDedup};
use crate::core::monitor::event::FileEvent;
use crate::core::monitor::executor::{CommandExecutor, ExecutionOutcome};
use crate::core::monitor::matcher::match_rules;
use crate::core::tasks::JobSummary;
use crate::core::tasks::jobs::{cache_cleanup_closure, launch_periodic_job};
use crate::core::tasks::task_queue::TaskQueue;
use crate::err::Result;
use crate::fs::FsWatcher;
use crate::utilities::AsyncLogger;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

pub struct Monitor {
    shared: Arc<MonitorShared>,
    aggregator: Arc<Aggregator>,
    watcher: FsWatcher,
    // The watcher's own normalized stream; the supervisor feeds from its
    // handler-fed channel instead, but the receiver stays alive here.
    _watcher_events: mpsc::Receiver<FileEvent>,
    event_tx: mpsc::Sender<FileEvent>,
    event_rx: Option<mpsc::Receiver<FileEvent>>,
    worker: Option<JoinHandle<()>>,
    cleanup_job: Option<JobSummary>,
}

struct MonitorShared {
    config: Config,
    logger: AsyncLogger,
    dedup: Arc<ExecutionDedup>,
    drop_log: Arc<DropLogThrottle>,
    stopped: AtomicBool,
    // Flips to true once; cancels semaphore waits and running commands.
    shutdown_tx: watch::Sender<bool>,
    op_sem: Arc<Semaphore>,
    op_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(config: Config, logger: AsyncLogger) -> Result<Self> {
        let (watcher, watcher_events) =
            FsWatcher::new(logger.clone(), DEFAULT_EVENT_CHANNEL_BUFFER_SIZE)?;
        let (event_tx, event_rx) = mpsc::channel(config.settings.event_channel_buffer_size);
        let (shutdown_tx, _) = watch::channel(false);

        let quiet = Duration::from_millis(config.settings.directory_stability_quiet_ms);
        let stability_timeout =
            Duration::from_secs(config.settings.directory_stability_timeout_seconds);
        let dedup_interval =
            Duration::from_secs(config.settings.execution_dedup_interval_seconds);
        let max_ops = config.settings.max_concurrent_operations;

        let shared = Arc::new(MonitorShared {
            config,
            logger: logger.clone(),
            dedup: Arc::new(ExecutionDedup::new(dedup_interval)),
            drop_log: Arc::new(DropLogThrottle::new()),
            stopped: AtomicBool::new(false),
            shutdown_tx,
            op_sem: Arc::new(Semaphore::new(max_ops)),
            op_tasks: Mutex::new(Vec::new()),
        });

        let sink_shared = shared.clone();
        let aggregator = Arc::new(Aggregator::new(
            logger,
            quiet,
            stability_timeout,
            move |batch| sink_shared.process_batch(batch),
        ));

        Ok(Self {
            shared,
            aggregator,
            watcher,
            _watcher_events: watcher_events,
            event_tx,
            event_rx: Some(event_rx),
            worker: None,
            cleanup_job: None,
        })
    }

    /// Register one watch per distinct enabled directory, launch the
    /// event-processing loop and the periodic cache cleanup.
    pub async fn start(&mut self, task_queue: &TaskQueue) -> Result<()> {
        let shared = &self.shared;
        let logger = &shared.logger;

        let enabled = shared
            .config
            .monitors
            .iter()
            .filter(|m| m.enabled)
            .count();
        logger.info(format!(
            "Starting directory monitor: {} monitors configured, {} enabled",
            shared.config.monitors.len(),
            enabled
        ));

        let dirs: HashSet<&str> = shared
            .config
            .monitors
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.directory.as_str())
            .collect();

        let mut watch_count = 0;
        for dir in dirs {
            let handler_shared = shared.clone();
            let tx = self.event_tx.clone();
            let result = self.watcher.watch(Path::new(dir), move |event| {
                if handler_shared.stopped.load(Ordering::SeqCst) {
                    return;
                }
                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(ev)) => {
                        if handler_shared.drop_log.should_log(&ev.path) {
                            handler_shared.logger.warn(format!(
                                "Event channel full, dropping event: {}",
                                ev.path.display()
                            ));
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            });
            match result {
                Ok(()) => {
                    watch_count += 1;
                    logger.info(format!("Watching directory: {}", dir));
                }
                Err(e) => {
                    logger.error(format!("Failed to watch directory {}: {}", dir, e));
                }
            }
        }
        if watch_count == 0 {
            return Err("no directories to watch".into());
        }

        let mut event_rx = self
            .event_rx
            .take()
            .ok_or("monitor has already been started")?;
        let worker_shared = shared.clone();
        let worker_aggregator = self.aggregator.clone();
        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        self.worker = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    maybe_event = event_rx.recv() => {
                        let Some(ev) = maybe_event else { break };
                        if worker_shared.stopped.load(Ordering::SeqCst) {
                            continue;
                        }
                        worker_shared.process_event(&worker_aggregator, ev);
                    }
                }
            }
            worker_shared.logger.info("Event processor stopped");
        }));

        let cleanup = cache_cleanup_closure(
            shared.dedup.clone(),
            shared.drop_log.clone(),
            logger.clone(),
        );
        self.cleanup_job = Some(
            launch_periodic_job(
                "cache-cleanup",
                "expire stale dedup and drop-log cache entries",
                cleanup,
                shared.config.settings.health_check_interval_seconds,
                task_queue.sender(),
                logger.clone(),
            )
            .await?,
        );

        logger.info("Directory monitor started");
        Ok(())
    }

    /// Graceful shutdown: no new dispatches, in-flight commands are
    /// cancelled and their process trees terminated, every worker drains
    /// before this returns.
    pub async fn stop(&mut self) {
        let logger = self.shared.logger.clone();
        logger.info("Stopping directory monitor");

        self.shared.stopped.store(true, Ordering::SeqCst);
        let _ = self.shared.shutdown_tx.send(true);

        self.aggregator.stop();

        if let Some(job) = self.cleanup_job.take() {
            let _ = job.shutdown().await;
        }

        self.watcher.stop().await;

        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.shared.op_tasks.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        logger.info("Directory monitor stopped");
    }
}

impl MonitorShared {
    fn process_event(self: &Arc<Self>, aggregator: &Aggregator, event: FileEvent) {
        self.logger.debug(format!(
            "Processing event: {} - {}",
            event.event_type,
            event.path.display()
        ));

        if !event.path.exists() {
            self.logger.debug(format!(
                "File no longer present, skipping: {}",
                event.path.display()
            ));
            return;
        }

        aggregator.on_event(event);
    }

    fn process_batch(self: &Arc<Self>, batch: DirectoryBatch) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.logger.info(format!(
            "Directory stable, processing batch: {} ({} files)",
            batch.directory.display(),
            batch.events.len()
        ));

        let triggers = match_rules(&self.config.monitors, &batch, &self.logger);
        for (rule, event) in triggers {
            self.logger.info(format!(
                "Batch triggers command: {} (file: {})",
                rule.command,
                event.path.display()
            ));
            self.execute_command(rule, event);
        }
    }

    fn execute_command(self: &Arc<Self>, rule: &MonitorRule, event: FileEvent) {
        if !self.dedup.should_execute(&rule.command, &event.path) {
            self.logger.info(format!(
                "Duplicate execution suppressed: command={}, file={}",
                rule.command,
                event.path.display()
            ));
            return;
        }

        let mut executor = CommandExecutor::new(self.logger.clone(), rule.directory.clone());
        executor.set_env_var("FILE_PATH", event.path.to_string_lossy());
        executor.set_env_var("FILE_NAME", event.file_name());
        executor.set_env_var("FILE_DIR", event.directory.to_string_lossy());
        executor.set_env_var("EVENT_TYPE", event.event_type.to_string());

        let command = rule.command.clone();
        let timeout = self.config.command_timeout(rule);
        let shared = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    shared.logger.info(format!(
                        "Shutdown started, command not spawned: {}",
                        command
                    ));
                    return;
                }
                permit = shared.op_sem.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    }
                }
            };

            match executor.execute(&command, &event, timeout, shutdown_rx).await {
                Ok(ExecutionOutcome::Completed) => {
                    shared
                        .logger
                        .info(format!("Command completed: {}", command));
                }
                Ok(ExecutionOutcome::ExitError(msg)) => {
                    shared
                        .logger
                        .error(format!("Command failed: {}: {}", command, msg));
                }
                Ok(ExecutionOutcome::TimedOut) => {
                    shared.logger.error(format!(
                        "Command timed out after {}s: {}",
                        timeout, command
                    ));
                }
                Ok(ExecutionOutcome::Cancelled) => {
                    shared
                        .logger
                        .info(format!("Command cancelled by shutdown: {}", command));
                }
                Err(err) => {
                    shared
                        .logger
                        .error(format!("Command could not run: {}: {}", command, err));
                }
            }
        });

        let mut tasks = self.op_tasks.lock().unwrap();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::core::monitor::event::FileEventType;
    use crate::utilities::logger::test_logger;
    use std::fs;
    use std::path::PathBuf;

    struct TempDirGuard(PathBuf);
    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let mut p = std::env::temp_dir();
            let ts = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            p.push(format!("{}_{}_{}", prefix, std::process::id(), ts));
            fs::create_dir_all(&p).unwrap();
            TempDirGuard(p)
        }
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn test_settings(max_ops: usize) -> Settings {
        Settings {
            log_level: None,
            log_file: None,
            log_max_size: 0,
            log_max_backups: 0,
            log_show_caller: false,
            max_concurrent_operations: max_ops,
            operation_timeout_seconds: 300,
            file_watcher_buffer_size: 0,
            event_channel_buffer_size: 16,
            min_stability_time_ms: 500,
            execution_dedup_interval_seconds: 5,
            directory_stability_quiet_ms: 100,
            directory_stability_timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_seconds: 5,
            health_check_interval_seconds: 60,
        }
    }

    fn test_config(rules: Vec<MonitorRule>, max_ops: usize) -> Config {
        Config {
            version: "test".into(),
            metadata: None,
            monitors: rules,
            settings: test_settings(max_ops),
            log_file: None,
            log_level: None,
        }
    }

    fn counting(dir: &Path, log: &Path) -> MonitorRule {
        MonitorRule {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            directory: dir.to_string_lossy().into_owned(),
            command: format!(
                "echo start >> {log}; sleep 0.5; echo end >> {log}",
                log = log.display()
            ),
            file_patterns: vec!["*.csv".into()],
            timeout: Some(30),
            schedule: String::new(),
            enabled: true,
            debounce_seconds: 0,
        }
    }

    fn count_lines(path: &Path, needle: &str) -> usize {
        fs::read_to_string(path)
            .map(|c| c.lines().filter(|l| *l == needle).count())
            .unwrap_or(0)
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn semaphore_serializes_commands_beyond_the_bound() {
        let inbox = TempDirGuard::new("dirwatch_sem_in");
        let out = TempDirGuard::new("dirwatch_sem_out");
        let log = out.path().join("phases.log");

        let rule = counting(inbox.path(), &log);
        let a = inbox.path().join("a.csv");
        let b = inbox.path().join("b.csv");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();

        let monitor = Monitor::new(test_config(vec![rule.clone()], 1), test_logger()).unwrap();

        monitor
            .shared
            .execute_command(&rule, FileEvent::new(FileEventType::Created, a));
        monitor
            .shared
            .execute_command(&rule, FileEvent::new(FileEventType::Created, b));

        // With a single slot, the second command waits for the first.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count_lines(&log, "start"), 1, "second start must be gated");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count_lines(&log, "start"), 2);
        assert_eq!(count_lines(&log, "end"), 2);
    }

    #[tokio::test]
    async fn dedup_gate_suppresses_repeat_triggers() {
        let inbox = TempDirGuard::new("dirwatch_dedup_gate_in");
        let out = TempDirGuard::new("dirwatch_dedup_gate_out");
        let log = out.path().join("runs.log");

        let mut rule = counting(inbox.path(), &log);
        rule.command = format!("echo run >> {}", log.display());
        let a = inbox.path().join("a.csv");
        fs::write(&a, b"x").unwrap();

        let monitor = Monitor::new(test_config(vec![rule.clone()], 5), test_logger()).unwrap();

        monitor
            .shared
            .execute_command(&rule, FileEvent::new(FileEventType::Created, a.clone()));
        monitor
            .shared
            .execute_command(&rule, FileEvent::new(FileEventType::Created, a));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(count_lines(&log, "run"), 1, "second trigger is a duplicate");
    }
}

