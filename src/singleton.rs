//! Process-name based termination of competing instances.
//!
//! The applet is a singleton per session: on startup it terminates any other
//! instance of itself, and any stray idle helper, before taking over. A few
//! SIGTERM rounds are tried before escalating to SIGKILL; survivors are
//! logged and otherwise left alone.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::process::Command;

const SIGNAL_ROUNDS: [Signal; 5] = [
    Signal::SIGTERM,
    Signal::SIGTERM,
    Signal::SIGTERM,
    Signal::SIGKILL,
    Signal::SIGKILL,
];

/// Terminate every process whose name is `name`, except ourselves.
pub async fn terminate_others(name: &str) {
    for sig in SIGNAL_ROUNDS {
        let targets = find_instances(name).await;
        if targets.is_empty() {
            return;
        }
        for (pid, line) in &targets {
            log::info!("sending {:?} to: {}", sig, line);
            if let Err(e) = signal::kill(Pid::from_raw(*pid), sig) {
                log::debug!("kill {} failed: {}", pid, e);
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    for (_, line) in find_instances(name).await {
        log::warn!("still running after kill rounds: {}", line);
    }
}

async fn find_instances(name: &str) -> Vec<(i32, String)> {
    let output = match Command::new("ps").args(["-eo", "pid,comm"]).output().await {
        Ok(output) => output,
        Err(e) => {
            log::error!("couldn't run ps: {}", e);
            return vec![];
        }
    };
    let own_pid = std::process::id() as i32;
    let mut instances = vec![];
    for line in String::from_utf8_lossy(&output.stdout).lines().skip(1) {
        let mut words = line.split_whitespace();
        let pid = match words.next().and_then(|w| w.parse::<i32>().ok()) {
            Some(pid) => pid,
            None => continue,
        };
        let comm = match words.next() {
            Some(comm) => comm,
            None => continue,
        };
        if pid != own_pid && comm == name {
            instances.push((pid, line.trim().to_string()));
        }
    }
    instances
}
