//! Session inhibitor and media playback probes.
//!
//! Inhibitors come from logind's `ListInhibitors`; the listing is reduced to
//! "is something besides us blocking idle/sleep" plus the display rows shown
//! in the tray menu. Media playback is probed through the environment's
//! player-status command and treated as one more inhibition source.

use crate::external::runner::CommandRunner;
use anyhow::{Context, Result};
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

// Desktop power daemons hold a permanent inhibitor lock; they are the very
// thing this applet replaces, so their locks don't count.
const IGNORED_HOLDERS: &[&str] = &["xfce4-power-man", "org_kde_powerde", "vigilo"];

/// What `ListInhibitors` returned, reduced for the applet's purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InhibitorScan {
    /// Human-readable rows for the tray menu, one per relevant inhibitor.
    pub rows: Vec<String>,
    /// True when an application other than the applet blocks idle or sleep.
    pub inhibited: bool,
}

pub struct InhibitorSensor {
    manager: zbus::Proxy<'static>,
}

type InhibitorRow = (String, String, String, String, u32, u32);

impl InhibitorSensor {
    pub async fn new(connection: &zbus::Connection) -> Result<InhibitorSensor> {
        let manager = zbus::Proxy::new(
            connection,
            "org.freedesktop.login1",
            "/org/freedesktop/login1",
            "org.freedesktop.login1.Manager",
        )
        .await
        .context("couldn't create login1 manager proxy")?;
        Ok(InhibitorSensor { manager })
    }

    pub async fn scan(&self) -> Result<InhibitorScan> {
        let inhibitors: Vec<InhibitorRow> =
            tokio::time::timeout(QUERY_TIMEOUT, self.manager.call("ListInhibitors", &()))
                .await
                .context("ListInhibitors timed out")?
                .context("ListInhibitors failed")?;
        Ok(reduce(&inhibitors))
    }
}

fn reduce(inhibitors: &[InhibitorRow]) -> InhibitorScan {
    let mut scan = InhibitorScan::default();
    for (what, who, why, mode, _uid, pid) in inhibitors {
        if mode != "block" {
            continue;
        }
        if !what.split(':').any(|w| matches!(w, "idle" | "sleep")) {
            continue;
        }
        if IGNORED_HOLDERS.iter().any(|ignored| who.contains(ignored)) {
            continue;
        }
        scan.rows.push(format!("{} [{}]: {} ({})", who, pid, why, what));
        scan.inhibited = true;
    }
    scan
}

/// True when a media player reports active playback. Any query failure
/// (no playerctl, no player running) counts as "not playing".
pub async fn media_playing(runner: &CommandRunner, player_status: Option<&str>) -> bool {
    let command = match player_status {
        Some(command) => command,
        None => return false,
    };
    match runner.query(command).await {
        Ok(output) => output.eq_ignore_ascii_case("playing"),
        Err(e) => {
            log::debug!("player status query failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(what: &str, who: &str, mode: &str) -> InhibitorRow {
        (
            what.to_string(),
            who.to_string(),
            "because".to_string(),
            mode.to_string(),
            1000,
            4242,
        )
    }

    #[test]
    fn test_reduce_blocking_idle_inhibitor() {
        let scan = reduce(&[row("idle", "firefox", "block")]);
        assert!(scan.inhibited);
        assert_eq!(scan.rows.len(), 1);
        assert!(scan.rows[0].starts_with("firefox"));
    }

    #[test]
    fn test_reduce_skips_delay_and_unrelated_locks() {
        let scan = reduce(&[
            row("sleep", "NetworkManager", "delay"),
            row("handle-power-key", "gnome-shell", "block"),
        ]);
        assert!(!scan.inhibited);
        assert!(scan.rows.is_empty());
    }

    #[test]
    fn test_reduce_ignores_power_daemons_and_self() {
        let scan = reduce(&[
            row("idle", "xfce4-power-man", "block"),
            row("sleep:idle", "org_kde_powerde", "block"),
            row("idle", "vigilo", "block"),
        ]);
        assert!(!scan.inhibited);
    }

    #[test]
    fn test_reduce_compound_what() {
        let scan = reduce(&[row("shutdown:sleep", "mpv", "block")]);
        assert!(scan.inhibited);
    }
}
