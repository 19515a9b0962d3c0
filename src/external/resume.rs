//! Resume detection through logind's `PrepareForSleep` signal.
//!
//! The applet restarts itself after every resume to get a clean tray
//! registration; this module only reports the wake edges.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_stream::StreamExt;

/// Spawns a watcher task and returns a channel whose value increments on
/// every wake-from-sleep. The initial value is 0 and never sent, so
/// `changed()` only fires on real resumes.
pub async fn spawn_watcher(connection: &zbus::Connection) -> Result<watch::Receiver<u32>> {
    let manager = zbus::Proxy::new(
        connection,
        "org.freedesktop.login1",
        "/org/freedesktop/login1",
        "org.freedesktop.login1.Manager",
    )
    .await
    .context("couldn't create login1 manager proxy")?;
    let mut stream = manager
        .receive_signal("PrepareForSleep")
        .await
        .context("couldn't subscribe to PrepareForSleep")?;

    let (sender, receiver) = watch::channel(0u32);
    tokio::spawn(async move {
        let mut resumes = 0u32;
        while let Some(message) = stream.next().await {
            match message.body::<bool>() {
                Ok(true) => log::info!("system is preparing to go to sleep"),
                Ok(false) => {
                    resumes += 1;
                    log::info!("system woke up from sleep (resume #{})", resumes);
                    if sender.send(resumes).is_err() {
                        return;
                    }
                }
                Err(e) => log::error!("couldn't decode PrepareForSleep: {}", e),
            }
        }
        log::warn!("PrepareForSleep signal stream ended");
    });
    Ok(receiver)
}
