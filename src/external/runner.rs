//! The single funnel through which the applet executes shell commands.
//!
//! Actions (`run`) are awaited but their failures never propagate - a failing
//! lock or blank command degrades to a log line. Queries (`query`) capture
//! stdout and are bounded by a timeout so a wedged subprocess cannot stall
//! the tick loop indefinitely.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tokio::process::Command;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Run an action command, waiting for it to finish. The suspend command
    /// is expected to block until the machine resumes; that is normal.
    pub async fn run(&self, command: &str) {
        log::info!("+ {}", command);
        match Command::new("sh").arg("-c").arg(command).status().await {
            Ok(status) if !status.success() => {
                log::warn!("command exited with {}: {}", status, command)
            }
            Ok(_) => {}
            Err(e) => log::error!("couldn't spawn {:?}: {}", command, e),
        }
    }

    /// Run a query command and return its trimmed stdout. Timeouts and
    /// non-zero exits are errors; the caller decides how to degrade.
    pub async fn query(&self, command: &str) -> Result<String> {
        let output = tokio::time::timeout(
            QUERY_TIMEOUT,
            Command::new("sh").arg("-c").arg(command).output(),
        )
        .await
        .map_err(|_| anyhow!("query timed out after {:?}: {}", QUERY_TIMEOUT, command))?
        .with_context(|| format!("couldn't spawn {:?}", command))?;
        if !output.status.success() {
            return Err(anyhow!(
                "query exited with {}: {}",
                output.status,
                command
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_query_captures_stdout() {
        let runner = CommandRunner;
        let out = runner.query("echo 1234").await.unwrap();
        assert_eq!(out, "1234");
    }

    #[tokio::test]
    async fn test_query_failure_is_error() {
        let runner = CommandRunner;
        assert!(runner.query("exit 3").await.is_err());
        assert!(runner.query("/nonexistent-bin-for-test").await.is_err());
    }
}
