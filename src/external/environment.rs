//! Desktop environment detection and the per-environment command tables.
//!
//! Detection is a data-driven rule table evaluated once at startup over a
//! snapshot of the session's environment variables. Each recognized
//! environment maps to a [CommandSet], the vocabulary of shell commands the
//! rest of the applet uses for locking, idle queries and power actions.

use std::time::Duration;
use std::{env, fmt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("cannot determine desktop environment (session={session:?}, current_desktop={current_desktop:?})")]
    Unrecognized {
        session: String,
        current_desktop: String,
    },

    #[error("unknown desktop environment {0:?}, expected one of i3, sway, kde-x11, kde-wayland, gnome-x11, gnome-wayland")]
    UnknownName(String),

    #[error("commands not found on $PATH: {0:?}")]
    MissingExecutables(Vec<&'static str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    I3,
    Sway,
    KdeX11,
    KdeWayland,
    GnomeX11,
    GnomeWayland,
}

impl Environment {
    pub fn name(&self) -> &'static str {
        match self {
            Environment::I3 => "i3",
            Environment::Sway => "sway",
            Environment::KdeX11 => "kde-x11",
            Environment::KdeWayland => "kde-wayland",
            Environment::GnomeX11 => "gnome-x11",
            Environment::GnomeWayland => "gnome-wayland",
        }
    }

    pub fn from_name(name: &str) -> Result<Environment, EnvironmentError> {
        match name {
            "i3" => Ok(Environment::I3),
            "sway" => Ok(Environment::Sway),
            "kde-x11" => Ok(Environment::KdeX11),
            "kde-wayland" => Ok(Environment::KdeWayland),
            "gnome-x11" => Ok(Environment::GnomeX11),
            "gnome-wayland" => Ok(Environment::GnomeWayland),
            other => Err(EnvironmentError::UnknownName(other.to_string())),
        }
    }

    fn is_x11(&self) -> bool {
        matches!(
            self,
            Environment::I3 | Environment::KdeX11 | Environment::GnomeX11
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The environment variables detection runs on, captured once so the rule
/// table stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    pub session: String,
    pub current_desktop: String,
    pub has_sway_socket: bool,
    pub has_wayland_display: bool,
    pub has_display: bool,
}

impl EnvSnapshot {
    pub fn from_env() -> EnvSnapshot {
        let lower = |name: &str| env::var(name).unwrap_or_default().to_lowercase();
        let set = |name: &str| env::var_os(name).map(|v| !v.is_empty()).unwrap_or(false);
        EnvSnapshot {
            session: format!("{} {}", lower("DESKTOP_SESSION"), lower("XDG_SESSION_DESKTOP")),
            current_desktop: lower("XDG_CURRENT_DESKTOP"),
            has_sway_socket: set("SWAYSOCK"),
            has_wayland_display: set("WAYLAND_DISPLAY"),
            has_display: set("DISPLAY"),
        }
    }

    fn mentions(&self, needle: &str) -> bool {
        self.session.contains(needle) || self.current_desktop.contains(needle)
    }
}

#[derive(Debug, Clone, Copy)]
enum DisplayKind {
    X11,
    Wayland,
    SwaySocket,
}

struct Rule {
    environment: Environment,
    hints: &'static [&'static str],
    display: DisplayKind,
}

// Order matters: the first matching rule wins, so the Wayland variant of a
// desktop must precede its X11 variant.
const DETECTION_RULES: &[Rule] = &[
    Rule {
        environment: Environment::Sway,
        hints: &["sway"],
        display: DisplayKind::SwaySocket,
    },
    Rule {
        environment: Environment::I3,
        hints: &["i3"],
        display: DisplayKind::X11,
    },
    Rule {
        environment: Environment::KdeWayland,
        hints: &["plasma", "kde"],
        display: DisplayKind::Wayland,
    },
    Rule {
        environment: Environment::KdeX11,
        hints: &["plasma", "kde"],
        display: DisplayKind::X11,
    },
    Rule {
        environment: Environment::GnomeWayland,
        hints: &["gnome"],
        display: DisplayKind::Wayland,
    },
    Rule {
        environment: Environment::GnomeX11,
        hints: &["gnome"],
        display: DisplayKind::X11,
    },
];

pub fn detect(snapshot: &EnvSnapshot) -> Result<Environment, EnvironmentError> {
    for rule in DETECTION_RULES {
        let hinted = rule.hints.iter().any(|hint| snapshot.mentions(hint));
        let displayed = match rule.display {
            DisplayKind::X11 => snapshot.has_display,
            DisplayKind::Wayland => snapshot.has_wayland_display,
            DisplayKind::SwaySocket => snapshot.has_sway_socket,
        };
        if hinted && displayed {
            log::info!("detected desktop environment: {}", rule.environment);
            return Ok(rule.environment);
        }
    }
    Err(EnvironmentError::Unrecognized {
        session: snapshot.session.clone(),
        current_desktop: snapshot.current_desktop.clone(),
    })
}

/// The unit in which an environment's idle query reports its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleUnit {
    Milliseconds,
    Seconds,
}

impl IdleUnit {
    pub fn to_duration(&self, raw: f64) -> Duration {
        let raw = raw.max(0.0);
        match self {
            IdleUnit::Milliseconds => Duration::from_secs_f64(raw / 1000.0),
            IdleUnit::Seconds => Duration::from_secs_f64(raw),
        }
    }
}

/// The named shell capabilities of one desktop environment.
///
/// A `None` capability means the environment doesn't support the action and
/// the corresponding menu entries and transitions are skipped.
#[derive(Debug, Clone)]
pub struct CommandSet {
    pub environment: Environment,
    pub suspend: String,
    pub poweroff: String,
    pub reboot: String,
    pub logoff: Option<String>,
    pub monitors_off: Option<String>,
    pub monitors_on: Option<String>,
    pub locker: Option<String>,
    pub get_idle: Option<String>,
    pub reset_idle: Option<String>,
    pub reload_wm: Option<String>,
    pub restart_wm: Option<String>,
    pub player_status: Option<String>,
    pub idle_unit: IdleUnit,
    pub uses_idle_helper: bool,
    must_haves: Vec<&'static str>,
}

impl CommandSet {
    pub fn for_environment(environment: Environment) -> CommandSet {
        let mut set = CommandSet::base(environment);
        if environment.is_x11() {
            set.apply_x11_overlay();
        }
        set.apply_environment_overlay();
        set
    }

    fn base(environment: Environment) -> CommandSet {
        CommandSet {
            environment,
            suspend: "systemctl suspend".to_string(),
            poweroff: "systemctl poweroff".to_string(),
            reboot: "systemctl reboot".to_string(),
            logoff: None,
            monitors_off: None,
            monitors_on: None,
            locker: None,
            get_idle: None,
            reset_idle: None,
            reload_wm: None,
            restart_wm: None,
            player_status: Some("playerctl status".to_string()),
            idle_unit: IdleUnit::Milliseconds,
            uses_idle_helper: false,
            must_haves: vec!["systemctl", "playerctl"],
        }
    }

    fn apply_x11_overlay(&mut self) {
        self.reset_idle = Some("xset s reset".to_string());
        self.get_idle = Some("xprintidle".to_string());
        self.monitors_off = Some("sleep 1.0; xset dpms force off".to_string());
        self.monitors_on = Some("xset dpms force on".to_string());
        self.must_haves.extend(["xset", "xprintidle"]);
    }

    fn apply_environment_overlay(&mut self) {
        match self.environment {
            Environment::I3 => {
                self.reload_wm = Some("i3-msg reload".to_string());
                self.restart_wm = Some("i3-msg restart".to_string());
                self.logoff = Some("i3-msg exit".to_string());
                self.locker = Some(
                    "pkill -x i3lock; sleep 0.5; i3lock --ignore-empty-password --show-failed-attempts"
                        .to_string(),
                );
                self.must_haves.extend(["i3-msg", "i3lock"]);
            }
            Environment::Sway => {
                self.reload_wm = Some("swaymsg reload".to_string());
                self.logoff = Some("swaymsg exit".to_string());
                self.locker =
                    Some("swaylock --ignore-empty-password --show-failed-attempts".to_string());
                self.monitors_off = Some(r#"swaymsg "output * dpms off""#.to_string());
                self.monitors_on = Some(r#"swaymsg "output * dpms on""#.to_string());
                self.uses_idle_helper = true;
                self.must_haves.extend(["swaymsg", "swaylock", "swayidle"]);
            }
            Environment::KdeX11 => {
                self.locker = Some("loginctl lock-session".to_string());
                self.logoff = Some(
                    "qdbus org.kde.ksmserver /KSMServer org.kde.KSMServerInterface.logout 0 0 0"
                        .to_string(),
                );
                self.restart_wm = Some("killall plasmashell && kstart5 plasmashell".to_string());
                self.must_haves.extend(["loginctl", "qdbus"]);
            }
            Environment::KdeWayland => {
                self.locker = Some("loginctl lock-session".to_string());
                self.reset_idle = Some(
                    "qdbus org.freedesktop.ScreenSaver /ScreenSaver SimulateUserActivity"
                        .to_string(),
                );
                self.get_idle = Some(
                    "qdbus org.freedesktop.ScreenSaver /ScreenSaver GetSessionIdleTime".to_string(),
                );
                self.idle_unit = IdleUnit::Seconds;
                self.must_haves.extend(["loginctl", "qdbus"]);
            }
            Environment::GnomeX11 => {
                self.locker = Some("loginctl lock-session".to_string());
                self.must_haves.extend(["loginctl"]);
            }
            Environment::GnomeWayland => {
                self.locker = Some("loginctl lock-session".to_string());
                self.reset_idle = Some(
                    "gdbus call --session --dest org.gnome.ScreenSaver --object-path /org/gnome/ScreenSaver --method org.gnome.ScreenSaver.SimulateUserActivity"
                        .to_string(),
                );
                self.must_haves.extend(["loginctl", "gdbus"]);
            }
        }
    }

    /// The lock command with the user's locker arguments appended. Only the
    /// lockers of i3 and sway accept extra arguments.
    pub fn locker_with_args(&self, i3lock_args: &str, swaylock_args: &str) -> Option<String> {
        let locker = self.locker.as_ref()?;
        let args = match self.environment {
            Environment::I3 => i3lock_args,
            Environment::Sway => swaylock_args,
            _ => "",
        };
        if args.is_empty() {
            Some(locker.clone())
        } else {
            Some(format!("{} {}", locker, args))
        }
    }

    /// Fails fast when any executable the environment depends on cannot be
    /// resolved on `$PATH`.
    pub fn verify_must_haves(&self) -> Result<(), EnvironmentError> {
        let mut missing: Vec<&'static str> = self
            .must_haves
            .iter()
            .copied()
            .filter(|name| !on_path(name))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EnvironmentError::MissingExecutables(missing))
        }
    }
}

fn on_path(name: &str) -> bool {
    match env::var_os("PATH") {
        Some(paths) => env::split_paths(&paths).any(|dir| dir.join(name).is_file()),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshot(session: &str, desktop: &str) -> EnvSnapshot {
        EnvSnapshot {
            session: session.to_string(),
            current_desktop: desktop.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_detection_rules() {
        let mut snap = snapshot("sway", "");
        snap.has_sway_socket = true;
        assert_eq!(detect(&snap).unwrap(), Environment::Sway);

        let mut snap = snapshot("i3", "i3");
        snap.has_display = true;
        assert_eq!(detect(&snap).unwrap(), Environment::I3);

        let mut snap = snapshot("plasma", "kde");
        snap.has_display = true;
        assert_eq!(detect(&snap).unwrap(), Environment::KdeX11);
        snap.has_wayland_display = true;
        assert_eq!(detect(&snap).unwrap(), Environment::KdeWayland);

        let mut snap = snapshot("gnome", "");
        snap.has_wayland_display = true;
        assert_eq!(detect(&snap).unwrap(), Environment::GnomeWayland);
    }

    #[test]
    fn test_detection_failures() {
        // A hint with no usable display doesn't match, and neither does a
        // display with no hint.
        let snap = snapshot("i3", "");
        assert!(matches!(
            detect(&snap),
            Err(EnvironmentError::Unrecognized { .. })
        ));
        let mut snap = snapshot("ratpoison", "");
        snap.has_display = true;
        assert!(detect(&snap).is_err());
    }

    #[test]
    fn test_environment_roundtrip() {
        for name in ["i3", "sway", "kde-x11", "kde-wayland", "gnome-x11", "gnome-wayland"] {
            assert_eq!(Environment::from_name(name).unwrap().name(), name);
        }
        assert!(Environment::from_name("cde").is_err());
    }

    #[test]
    fn test_command_set_overlays() {
        let i3 = CommandSet::for_environment(Environment::I3);
        assert_eq!(i3.get_idle.as_deref(), Some("xprintidle"));
        assert_eq!(i3.idle_unit, IdleUnit::Milliseconds);
        assert!(!i3.uses_idle_helper);

        let sway = CommandSet::for_environment(Environment::Sway);
        assert!(sway.get_idle.is_none());
        assert!(sway.uses_idle_helper);
        assert!(sway.must_haves.contains(&"swayidle"));

        let kde = CommandSet::for_environment(Environment::KdeWayland);
        assert_eq!(kde.idle_unit, IdleUnit::Seconds);
        assert!(kde.monitors_off.is_none());
    }

    #[test]
    fn test_locker_args() {
        let sway = CommandSet::for_environment(Environment::Sway);
        let augmented = sway.locker_with_args("-c 200020", "-i wall.png").unwrap();
        assert!(augmented.ends_with("-i wall.png"));
        let plain = sway.locker_with_args("", "").unwrap();
        assert_eq!(plain.as_str(), sway.locker.as_deref().unwrap());

        let kde = CommandSet::for_environment(Environment::KdeX11);
        // non-i3/sway lockers never get argument augmentation
        assert_eq!(
            kde.locker_with_args("-c 1", "-c 2").unwrap(),
            "loginctl lock-session"
        );
    }

    #[test]
    fn test_idle_unit_conversion() {
        assert_eq!(
            IdleUnit::Milliseconds.to_duration(1500.0),
            Duration::from_millis(1500)
        );
        assert_eq!(IdleUnit::Seconds.to_duration(90.0), Duration::from_secs(90));
    }
}
