//! Management of the swayidle helper process.
//!
//! Compositors without a pollable idle time delegate idle-driven actions to
//! an always-running swayidle whose timeouts are baked into its command line
//! at launch. There is no reconfiguration protocol: whenever the desired
//! command line changes, the old helper is terminated and a new one started.

use crate::control::state_machine::Mode;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

const HELPER_PROGRAM: &str = "swayidle";

/// The typed inputs the helper command line is built from.
#[derive(Debug, Clone)]
pub struct HelperParams {
    pub effective_mode: Mode,
    pub lock_mins: u32,
    pub sleep_mins: u32,
    pub blank_enabled: bool,
    pub quick: bool,
    /// Full lock command, locker arguments already applied.
    pub locker: String,
    pub monitors_off: String,
    pub monitors_on: String,
    pub suspend: String,
}

/// A fully built helper command line. Building is deterministic, so equality
/// of two commands is the change-detection test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    args: Vec<String>,
}

impl HelperCommand {
    pub fn build(p: &HelperParams) -> HelperCommand {
        let mut args: Vec<String> = Vec::new();
        let lock_wanted = matches!(p.effective_mode, Mode::LockOnly | Mode::SleepAfterLock);
        let lock_s = p.lock_mins as u64 * 60;
        let lock_action = format!("exec {}", p.locker);
        let blanking = lock_wanted && p.blank_enabled;

        if lock_wanted {
            args.extend(["timeout".to_string(), lock_s.to_string(), lock_action.clone()]);
            if p.effective_mode == Mode::SleepAfterLock {
                // The sleep timeout is an offset from the lock timeout, not
                // an independent clock.
                let sleep_s = lock_s + p.sleep_mins as u64 * 60;
                args.extend(["timeout".to_string(), sleep_s.to_string(), p.suspend.clone()]);
            }
            if blanking {
                let grace = if p.quick { 5 } else { 20 };
                args.extend([
                    "timeout".to_string(),
                    (lock_s + grace).to_string(),
                    p.monitors_off.clone(),
                ]);
            }
        }
        // System-initiated suspend must lock too, whatever the timeouts say.
        args.extend(["before-sleep".to_string(), lock_action]);
        if blanking {
            args.extend(["after-resume".to_string(), p.monitors_on.clone()]);
        }
        HelperCommand { args }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// A shell-ish rendering for the log.
    pub fn rendered(&self) -> String {
        let mut out = HELPER_PROGRAM.to_string();
        for arg in &self.args {
            if arg.contains(' ') {
                out.push_str(&format!(" '{}'", arg));
            } else {
                out.push_str(&format!(" {}", arg));
            }
        }
        out
    }
}

pub struct IdleHelper {
    child: Option<Child>,
    current: Option<HelperCommand>,
}

impl IdleHelper {
    pub fn new() -> IdleHelper {
        IdleHelper {
            child: None,
            current: None,
        }
    }

    /// Kill any helper instance left over from a previous applet run. It's
    /// fine for none to exist.
    pub async fn kill_strays() {
        crate::singleton::terminate_others(HELPER_PROGRAM).await;
    }

    /// Restart-on-change: terminate a helper whose command line diverged
    /// from the wanted one, then make sure a helper with the wanted command
    /// is running.
    pub async fn ensure_running(&mut self, command: HelperCommand) {
        if self.child.is_some() && self.current.as_ref() != Some(&command) {
            self.stop().await;
        }
        self.current = Some(command);
        if self.child.is_none() {
            self.spawn_current();
        }
    }

    /// Detect an unexpected helper exit and bring it back.
    pub async fn checkup(&mut self) {
        let needs_respawn = match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    log::warn!("{} exited unexpectedly with {}", HELPER_PROGRAM, status);
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    log::error!("couldn't poll {}: {}", HELPER_PROGRAM, e);
                    true
                }
            },
            None => self.current.is_some(),
        };
        if needs_respawn {
            self.child = None;
            self.spawn_current();
        }
    }

    /// Graceful terminate-then-wait. The helper is always stopped before a
    /// replacement is started, so two helpers never coexist.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    log::warn!("couldn't terminate {}: {}", HELPER_PROGRAM, e);
                }
            }
            if let Err(e) = child.wait().await {
                log::error!("couldn't wait for {}: {}", HELPER_PROGRAM, e);
            }
        }
    }

    fn spawn_current(&mut self) {
        let command = match &self.current {
            Some(command) => command,
            None => return,
        };
        match Command::new(HELPER_PROGRAM).args(command.args()).spawn() {
            Ok(child) => {
                log::info!("started helper: {}", command.rendered());
                self.child = Some(child);
            }
            Err(e) => log::error!("couldn't start {}: {}", HELPER_PROGRAM, e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(mode: Mode) -> HelperParams {
        HelperParams {
            effective_mode: mode,
            lock_mins: 10,
            sleep_mins: 2,
            blank_enabled: false,
            quick: false,
            locker: "swaylock -f".to_string(),
            monitors_off: r#"swaymsg "output * dpms off""#.to_string(),
            monitors_on: r#"swaymsg "output * dpms on""#.to_string(),
            suspend: "systemctl suspend".to_string(),
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let p = params(Mode::SleepAfterLock);
        assert_eq!(HelperCommand::build(&p), HelperCommand::build(&p));
        let mut changed = p.clone();
        changed.sleep_mins = 3;
        assert_ne!(HelperCommand::build(&p), HelperCommand::build(&changed));
    }

    #[test]
    fn test_sleep_timeout_is_cumulative() {
        let command = HelperCommand::build(&params(Mode::SleepAfterLock));
        let args = command.args();
        // lock at 600s, suspend at 600 + 120 = 720s
        assert_eq!(args[1], "600");
        assert_eq!(args[4], "720");
        assert_eq!(args[5], "systemctl suspend");
    }

    #[test]
    fn test_lock_only_has_no_sleep_clause() {
        let command = HelperCommand::build(&params(Mode::LockOnly));
        assert!(!command.args().contains(&"systemctl suspend".to_string()));
        assert!(command.args().contains(&"exec swaylock -f".to_string()));
    }

    #[test]
    fn test_presentation_keeps_only_before_sleep() {
        let command = HelperCommand::build(&params(Mode::Presentation));
        assert_eq!(
            command.args(),
            &["before-sleep".to_string(), "exec swaylock -f".to_string()]
        );
    }

    #[test]
    fn test_blank_clause_and_resume_restore() {
        let mut p = params(Mode::SleepAfterLock);
        p.blank_enabled = true;
        let command = HelperCommand::build(&p);
        let rendered = command.rendered();
        // blank at lock + 20s grace
        assert!(rendered.contains("620"));
        assert!(command.args().contains(&"after-resume".to_string()));

        p.quick = true;
        let quick = HelperCommand::build(&p);
        assert!(quick.rendered().contains("605"));
    }

    #[test]
    fn test_blanking_needs_a_lock_clause() {
        let mut p = params(Mode::Presentation);
        p.blank_enabled = true;
        let command = HelperCommand::build(&p);
        assert!(!command.rendered().contains("dpms"));
    }

    #[test]
    fn test_before_sleep_is_unconditional() {
        for mode in Mode::ALL {
            let command = HelperCommand::build(&params(mode));
            assert!(command.args().contains(&"before-sleep".to_string()));
        }
    }
}
