use crate::err::Result;
use crate::utilities::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap as Map;
use std::fs;
use std::io::Write;
use std::path::Path;

pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 5;
pub const DEFAULT_OPERATION_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_EVENT_CHANNEL_BUFFER_SIZE: usize = 100;
pub const DEFAULT_MIN_STABILITY_TIME_MS: u64 = 500;
pub const DEFAULT_DIRECTORY_STABILITY_QUIET_MS: u64 = 2000;
pub const DEFAULT_EXECUTION_DEDUP_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_DIRECTORY_STABILITY_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_LOG_MAX_BACKUPS: usize = 5;
pub const DEFAULT_LOG_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// One configured monitor: a directory to anchor on, filename patterns, and
/// the command to run when a stable batch matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    /// Per-rule command deadline in seconds. When absent, the effective
    /// deadline is `settings.operation_timeout_seconds`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Optional 5-field cron expression gating execution.
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub enabled: bool,
    /// Accepted but not wired into the pipeline.
    #[serde(default)]
    pub debounce_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub log_max_size: u64,
    pub log_max_backups: usize,
    pub log_show_caller: bool,

    pub max_concurrent_operations: usize,
    pub operation_timeout_seconds: u64,

    /// Accepted but not wired into the pipeline.
    pub file_watcher_buffer_size: u32,

    pub event_channel_buffer_size: usize,
    /// Accepted but not wired into the pipeline.
    pub min_stability_time_ms: u64,

    pub execution_dedup_interval_seconds: u64,

    pub directory_stability_quiet_ms: u64,
    pub directory_stability_timeout_seconds: u64,

    /// Accepted but not wired into the pipeline.
    pub retry_attempts: u32,
    /// Accepted but not wired into the pipeline.
    pub retry_delay_seconds: u64,

    pub health_check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, String>>,
    #[serde(default)]
    pub monitors: Vec<MonitorRule>,
    #[serde(default)]
    pub settings: Settings,
    /// Fallbacks when the settings block leaves these unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.monitors.is_empty() {
            return Err("at least one monitor must be configured".into());
        }

        let mut monitor_ids = Map::new();
        for monitor in &self.monitors {
            if monitor.directory.is_empty() {
                return Err("monitor directory cannot be empty".into());
            }
            if monitor.command.is_empty() {
                return Err("monitor command cannot be empty".into());
            }
            if monitor.file_patterns.is_empty() {
                return Err(format!(
                    "monitor must have at least one file pattern: {}",
                    monitor.directory
                )
                .into());
            }
            if monitor.timeout == Some(0) {
                return Err(format!(
                    "monitor timeout must be greater than 0: {}",
                    monitor.directory
                )
                .into());
            }

            if !monitor.id.is_empty() {
                if monitor_ids.insert(monitor.id.clone(), true).is_some() {
                    return Err(format!("duplicate monitor ID: {}", monitor.id).into());
                }
            }
        }

        for monitor in &self.monitors {
            if !monitor.schedule.is_empty() {
                if let Err(e) = validate_cron_expression(&monitor.schedule) {
                    return Err(
                        format!("invalid cron expression {}: {}", monitor.schedule, e).into(),
                    );
                }
            }
        }

        Ok(())
    }

    fn apply_defaults(&mut self) {
        let s = &mut self.settings;
        if s.max_concurrent_operations == 0 {
            s.max_concurrent_operations = DEFAULT_MAX_CONCURRENT_OPERATIONS;
        }
        if s.operation_timeout_seconds == 0 {
            s.operation_timeout_seconds = DEFAULT_OPERATION_TIMEOUT_SECONDS;
        }
        if s.event_channel_buffer_size == 0 {
            s.event_channel_buffer_size = DEFAULT_EVENT_CHANNEL_BUFFER_SIZE;
        }
        if s.min_stability_time_ms == 0 {
            s.min_stability_time_ms = DEFAULT_MIN_STABILITY_TIME_MS;
        }
        if s.directory_stability_quiet_ms == 0 {
            s.directory_stability_quiet_ms = DEFAULT_DIRECTORY_STABILITY_QUIET_MS;
        }
        if s.execution_dedup_interval_seconds == 0 {
            s.execution_dedup_interval_seconds = DEFAULT_EXECUTION_DEDUP_INTERVAL_SECONDS;
        }
        if s.directory_stability_timeout_seconds == 0 {
            s.directory_stability_timeout_seconds = DEFAULT_DIRECTORY_STABILITY_TIMEOUT_SECONDS;
        }
        if s.retry_attempts == 0 {
            s.retry_attempts = DEFAULT_RETRY_ATTEMPTS;
        }
        if s.retry_delay_seconds == 0 {
            s.retry_delay_seconds = DEFAULT_RETRY_DELAY_SECONDS;
        }
        if s.health_check_interval_seconds == 0 {
            s.health_check_interval_seconds = DEFAULT_HEALTH_CHECK_INTERVAL_SECONDS;
        }
        if s.log_max_backups == 0 {
            s.log_max_backups = DEFAULT_LOG_MAX_BACKUPS;
        }
        if s.log_max_size == 0 {
            s.log_max_size = DEFAULT_LOG_MAX_SIZE;
        }
    }

    /// Deadline for a rule's command, falling back to the settings-wide
    /// operation timeout when the rule leaves `timeout` unset.
    pub fn command_timeout(&self, rule: &MonitorRule) -> u64 {
        rule.timeout
            .unwrap_or(self.settings.operation_timeout_seconds)
    }

    /// Log level resolved from settings first, then the top-level fallback.
    pub fn effective_log_level(&self) -> LogLevel {
        let name = self
            .settings
            .log_level
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.log_level.as_deref())
            .unwrap_or("info");
        LogLevel::parse(name)
    }

    /// Log file resolved from settings first, then the top-level fallback.
    pub fn effective_log_file(&self) -> Option<&str> {
        self.settings
            .log_file
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                self.log_file
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
            })
    }

    pub fn dump<P: AsRef<Path>>(&self, config_path: P) -> Result<()> {
        let path = config_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(serde_json::to_string_pretty(&self)?.as_bytes())?;
        Ok(())
    }
}

/// A schedule must have exactly 5 whitespace-separated fields and must
/// actually parse with the same rules the matcher applies at runtime.
fn validate_cron_expression(expr: &str) -> Result<()> {
    crate::core::monitor::matcher::parse_schedule(expr)?;
    Ok(())
}

pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<Config> {
    let path = config_path.as_ref();
    if !path.exists() {
        return Err(format!("configuration file does not exist: {}", path.display()).into());
    }

    let data = fs::read_to_string(path)
        .map_err(|e| format!("failed to read configuration file: {}", e))?;

    let mut cfg: Config = serde_json::from_str(&data)
        .map_err(|e| format!("failed to parse configuration file: {}", e))?;

    cfg.validate()
        .map_err(|e| format!("configuration validation failed: {}", e))?;

    cfg.apply_defaults();

    // Anchor directories must compare equal to the absolute parents the
    // watcher reports, so shell-style home shorthands are expanded here.
    for monitor in &mut cfg.monitors {
        monitor.directory = crate::fs::util::expand_tilde(&monitor.directory);
    }

    Ok(cfg)
}
