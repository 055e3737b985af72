use dirwatch::Monitor;
use dirwatch::config::{Opts, load_config};
use dirwatch::core::tasks::{init_core, shutdown_core};
use dirwatch::fs::util::expand_tilde;
use dirwatch::utilities::{AsyncLogger, LogLevel, init_console_logger, init_file_logger};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Poll cadence for the --stop-file marker.
const STOP_FILE_CHECK_INTERVAL: Duration = Duration::from_millis(200);

fn print_version_and_exit() -> ! {
    // These are set by build.rs; fall back to unknown if missing
    let pkg_version = env!("CARGO_PKG_VERSION");
    let commit = option_env!("GIT_COMMIT").unwrap_or("unknown");
    let state = option_env!("GIT_STATE").unwrap_or("unknown");
    let built = option_env!("BUILD_TIME").unwrap_or("unknown time");
    println!(
        "dirwatch {} (commit: {}, state: {}, built: {})",
        pkg_version, commit, state, built
    );
    std::process::exit(0)
}

async fn close_logger(logger: &AsyncLogger, handle: JoinHandle<()>) {
    logger.shutdown().await;
    let _ = handle.await;
}

async fn report_failure(logger: AsyncLogger, handle: JoinHandle<()>, message: String) {
    logger.error(message);
    close_logger(&logger, handle).await;
}

#[tokio::main]
async fn main() {
    let opts = Opts::from_args();

    if opts.version {
        print_version_and_exit();
    }

    let config = match load_config(&opts.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let level = if opts.debug {
        LogLevel::Debug
    } else {
        config.effective_log_level()
    };
    let (logger, logger_handle) = match config.effective_log_file() {
        Some(path) => {
            let path = expand_tilde(path);
            match init_file_logger(
                &path,
                level,
                config.settings.log_max_size,
                config.settings.log_max_backups,
            )
            .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    eprintln!("Failed to initialize file logger: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => init_console_logger(level),
    };

    logger.info(format!(
        "dirwatch {} starting, {} monitors configured",
        env!("CARGO_PKG_VERSION"),
        config.monitors.len()
    ));

    if opts.dry_run {
        logger.info("Dry run: configuration validated, exiting");
        close_logger(&logger, logger_handle).await;
        return;
    }

    let task_queue = match init_core(logger.clone()).await {
        Ok(task_queue) => task_queue,
        Err(e) => {
            report_failure(
                logger,
                logger_handle,
                format!("Failed to initialize task queue: {}", e),
            )
            .await;
            std::process::exit(1);
        }
    };

    let mut monitor = match Monitor::new(config, logger.clone()) {
        Ok(monitor) => monitor,
        Err(e) => {
            report_failure(
                logger,
                logger_handle,
                format!("Failed to create monitor: {}", e),
            )
            .await;
            std::process::exit(1);
        }
    };

    if let Err(e) = monitor.start(&task_queue).await {
        report_failure(
            logger,
            logger_handle,
            format!("Failed to start monitor: {}", e),
        )
        .await;
        std::process::exit(1);
    }

    wait_for_shutdown(&logger, opts.stop_file).await;

    logger.info("Shutting down...");
    monitor.stop().await;
    let _ = shutdown_core(task_queue).await;
    close_logger(&logger, logger_handle).await;
}

/// Block until SIGINT/SIGTERM arrives or the stop-file marker appears.
async fn wait_for_shutdown(logger: &AsyncLogger, stop_file: Option<PathBuf>) {
    let stop_file_seen = async {
        match stop_file {
            Some(path) => loop {
                if path.exists() {
                    break;
                }
                tokio::time::sleep(STOP_FILE_CHECK_INTERVAL).await;
            },
            None => std::future::pending::<()>().await,
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                logger.error(format!("Failed to install SIGTERM handler: {}", e));
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => logger.info("SIGINT received"),
            _ = sigterm.recv() => logger.info("SIGTERM received"),
            _ = stop_file_seen => logger.info("Stop file detected"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => logger.info("Interrupt received"),
            _ = stop_file_seen => logger.info("Stop file detected"),
        }
    }
}
