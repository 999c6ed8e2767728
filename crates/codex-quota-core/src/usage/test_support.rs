//! Helpers for tests that drive fake `codex` processes.

use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use tokio::time::Instant;

/// Shell line that records the script's pid in `pid_file`
pub fn record_pid(pid_file: &Path) -> String {
    format!("echo $$ > '{}'", pid_file.display())
}

/// Pid written by [`record_pid`]
pub fn read_pid(pid_file: &Path) -> Pid {
    let text = std::fs::read_to_string(pid_file).unwrap();
    Pid::from_raw(text.trim().parse().unwrap())
}

/// Poll until `pid` has exited; a zombie waiting to be reaped counts as exited
pub async fn exited_within(pid: Pid, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if matches!(signal::kill(pid, None::<signal::Signal>), Err(Errno::ESRCH)) || is_zombie(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn is_zombie(pid: Pid) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .map(|stat| {
            stat.rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}
