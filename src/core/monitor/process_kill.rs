use std::time::Duration;

/// Grace period between SIGTERM and SIGKILL.
pub const PROCESS_KILL_DELAY: Duration = Duration::from_millis(500);

/// Terminate the whole process tree rooted at `pid`.
///
/// The child is spawned as the leader of its own process group, so
/// signalling the group reaches every descendant.
#[cfg(unix)]
pub async fn kill_process_tree(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(pid as i32);
    let _ = killpg(pgid, Signal::SIGTERM);
    tokio::time::sleep(PROCESS_KILL_DELAY).await;
    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(windows)]
pub async fn kill_process_tree(pid: u32) {
    use std::process::Command;

    let _ = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status();
}
