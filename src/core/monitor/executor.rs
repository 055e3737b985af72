//! Shell command execution with placeholder substitution, a hard deadline
//! and whole-tree termination.
//!
//! One executor instance is built per trigger. The command string has its
//! `${...}` placeholders replaced literally, the child inherits the parent
//! environment overlaid with the file-context variables, and on POSIX runs
//! under `/bin/sh -c` as its own process-group leader so a timeout or
//! shutdown can take the entire tree down.

use crate::core::monitor::event::FileEvent;
use crate::core::monitor::process_kill::kill_process_tree;
use crate::err::Result;
use crate::utilities::AsyncLogger;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

/// Cap on captured stdout/stderr bytes per stream.
pub const COMMAND_OUTPUT_BUFFER_SIZE: usize = 4096;

/// How a single command execution ended. Timeouts, exit failures and
/// shutdown cancellation stay distinguishable for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    ExitError(String),
    TimedOut,
    Cancelled,
}

pub struct CommandExecutor {
    logger: AsyncLogger,
    working_dir: String,
    env_vars: HashMap<String, String>,
}

impl CommandExecutor {
    pub fn new(logger: AsyncLogger, working_dir: String) -> Self {
        Self {
            logger,
            working_dir,
            env_vars: HashMap::new(),
        }
    }

    pub fn set_env_var<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.env_vars.insert(key.into(), value.into());
    }

    /// Run `command` for `event` with a `timeout_secs` deadline. `shutdown`
    /// flipping to true cancels the run and kills the process tree.
    ///
    /// Pre-spawn failures (missing file, blank command, spawn error) are
    /// `Err`; everything after a successful spawn is an [`ExecutionOutcome`].
    pub async fn execute(
        &self,
        command: &str,
        event: &FileEvent,
        timeout_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ExecutionOutcome> {
        self.logger.info(format!(
            "Executing command: {} - file: {}",
            command,
            event.path.display()
        ));

        if !event.path.exists() {
            return Err(format!("file not found: {}", event.path.display()).into());
        }

        let command_line = self.substitute_placeholders(command, event);
        if command_line.trim().is_empty() {
            return Err("empty command".into());
        }

        let mut cmd = build_shell_command(&command_line);
        if !self.working_dir.is_empty() {
            cmd.current_dir(&self.working_dir);
        }
        cmd.envs(&self.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("command start failed: {}", e))?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = tokio::spawn(read_capped(stdout));
        let err_task = tokio::spawn(read_capped(stderr));

        let outcome = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if status.success() => ExecutionOutcome::Completed,
                    Ok(status) => ExecutionOutcome::ExitError(format!(
                        "command exited with {}",
                        status
                    )),
                    Err(err) => ExecutionOutcome::ExitError(format!(
                        "failed to wait for command: {}",
                        err
                    )),
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                if let Some(pid) = pid {
                    kill_process_tree(pid).await;
                }
                let _ = child.wait().await;
                ExecutionOutcome::TimedOut
            }
            _ = shutdown.changed() => {
                if let Some(pid) = pid {
                    kill_process_tree(pid).await;
                }
                let _ = child.wait().await;
                ExecutionOutcome::Cancelled
            }
        };

        let stdout = out_task.await.unwrap_or_default();
        let stderr = err_task.await.unwrap_or_default();
        let output = format!("{}\n{}", stdout, stderr).trim().to_string();
        if !output.is_empty() {
            self.logger.debug(format!("Command output: {}", output));
        }

        Ok(outcome)
    }

    /// Literal replacement, in order: event placeholders, executor-set env
    /// keys, then every key from the parent environment.
    fn substitute_placeholders(&self, command: &str, event: &FileEvent) -> String {
        let mut line = command.replace("${EVENT_TYPE}", &event.event_type.to_string());
        line = line.replace("${FILE_PATH}", &event.path.to_string_lossy());
        line = line.replace("${FILE_NAME}", &event.file_name());
        line = line.replace("${FILE_DIR}", &event.directory.to_string_lossy());
        line = line.replace(
            "${EVENT_TIME}",
            &event
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        );

        for (key, value) in &self.env_vars {
            line = line.replace(&format!("${{{}}}", key), value);
        }
        for (key, value) in std::env::vars() {
            line = line.replace(&format!("${{{}}}", key), &value);
        }

        line
    }
}

#[cfg(unix)]
fn build_shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command_line);
    // New process group so the whole tree can be signalled.
    cmd.process_group(0);
    cmd
}

#[cfg(windows)]
fn build_shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/c").arg(command_line);
    cmd
}

async fn read_capped<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                // Keep draining past the cap so the pipe never backs up.
                if captured.len() < COMMAND_OUTPUT_BUFFER_SIZE {
                    let take = n.min(COMMAND_OUTPUT_BUFFER_SIZE - captured.len());
                    captured.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}
