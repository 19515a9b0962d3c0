//! The tray presentation sink.
//!
//! The tray is a StatusNotifierItem rendered from a [TrayModel] snapshot the
//! applet pushes after every visible change. Menu activations only send an
//! [AppletCommand] back over a channel; all state lives in the applet.

use crate::control::rotation;
use crate::control::selector::Selector;
use crate::control::state_machine::Mode;
use ksni::menu::{MenuItem, StandardItem};
use ksni::{Tray, TrayService};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppletCommand {
    SetMode(Mode),
    RotateLock,
    RotateSleep,
    LockScreen,
    BlankMonitors,
    ReloadWm,
    RestartWm,
    LogOff,
    Suspend,
    Reboot,
    PowerOff,
    CycleBattery,
    EditConfig,
    RestartApplet,
    Quit,
}

/// The icon states of the applet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconKind {
    SleepAfterLock,
    Presentation,
    LockOnly,
    LoBattery,
    Inhibited,
    LockingSoon,
    LockingSoonNoSleep,
}

impl IconKind {
    /// Pick the icon for the current situation. `inhibited` means externally
    /// inhibited (inhibitor lock or playback), not Presentation mode.
    pub fn pick(
        effective_mode: Mode,
        selector: Selector,
        inhibited: bool,
        idle: Duration,
        lock_threshold: Duration,
    ) -> IconKind {
        let kind = if selector == Selector::LoBattery {
            IconKind::LoBattery
        } else if inhibited {
            IconKind::Inhibited
        } else if effective_mode == Mode::Presentation {
            IconKind::Presentation
        } else if effective_mode == Mode::SleepAfterLock {
            IconKind::SleepAfterLock
        } else {
            IconKind::LockOnly
        };
        // Close to the lock threshold the sun icons turn into moons.
        let moon_when =
            lock_threshold.saturating_sub(Duration::min(Duration::from_secs(60), lock_threshold / 8));
        match kind {
            IconKind::SleepAfterLock if idle >= moon_when => IconKind::LockingSoon,
            IconKind::LockOnly if idle >= moon_when => IconKind::LockingSoonNoSleep,
            other => other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IconKind::SleepAfterLock => "daytime-sunset-symbolic",
            IconKind::Presentation => "weather-clear-symbolic",
            IconKind::LockOnly => "changes-allow-symbolic",
            IconKind::LoBattery => "battery-caution-symbolic",
            IconKind::Inhibited => "media-playback-start-symbolic",
            IconKind::LockingSoon => "weather-clear-night-symbolic",
            IconKind::LockingSoonNoSleep => "alarm-symbolic",
        }
    }
}

/// Everything the tray needs to render itself.
#[derive(Debug, Clone)]
pub struct TrayModel {
    pub icon: IconKind,
    pub inhibitor_rows: Vec<String>,
    pub mode: Mode,
    pub selector: Selector,
    pub battery_absent: bool,
    pub percent: f64,
    pub environment: String,
    pub lock_label: String,
    pub sleep_label: String,
    pub can_blank: bool,
    pub can_reload_wm: bool,
    pub can_restart_wm: bool,
    pub can_logoff: bool,
    pub has_gui_editor: bool,
}

impl Default for TrayModel {
    fn default() -> TrayModel {
        TrayModel {
            icon: IconKind::SleepAfterLock,
            inhibitor_rows: vec![],
            mode: Mode::SleepAfterLock,
            selector: Selector::Settings,
            battery_absent: false,
            percent: 100.0,
            environment: String::new(),
            lock_label: rotation::label(&[15, 30]),
            sleep_label: rotation::label(&[5, 30]),
            can_blank: false,
            can_reload_wm: false,
            can_restart_wm: false,
            can_logoff: false,
            has_gui_editor: false,
        }
    }
}

impl TrayModel {
    fn battery_label(&self) -> String {
        if self.selector == Selector::Settings {
            if self.percent < 100.0 {
                format!("🗲 Plugged In {}%", self.percent)
            } else {
                "🗲 Plugged In".to_string()
            }
        } else {
            let gauge = if self.selector == Selector::HiBattery {
                "█"
            } else {
                "▃"
            };
            format!("{} {} {}%", gauge, self.selector.label(), self.percent)
        }
    }
}

pub struct PowerTray {
    model: TrayModel,
    commands: mpsc::UnboundedSender<AppletCommand>,
}

impl PowerTray {
    pub fn set_model(&mut self, model: TrayModel) {
        self.model = model;
    }

    fn item(&self, label: String, command: AppletCommand) -> MenuItem<Self> {
        let sender = self.commands.clone();
        StandardItem {
            label,
            activate: Box::new(move |_: &mut PowerTray| {
                if sender.send(command).is_err() {
                    log::error!("applet loop is gone, dropping menu action {:?}", command);
                }
            }),
            ..Default::default()
        }
        .into()
    }

    fn row_item(&self, label: String) -> MenuItem<Self> {
        StandardItem {
            label,
            enabled: false,
            ..Default::default()
        }
        .into()
    }
}

impl Tray for PowerTray {
    fn id(&self) -> String {
        crate::config::APP_NAME.to_string()
    }

    fn icon_name(&self) -> String {
        self.model.icon.name().to_string()
    }

    fn title(&self) -> String {
        crate::config::APP_NAME.to_string()
    }

    fn menu(&self) -> Vec<MenuItem<Self>> {
        let m = &self.model;
        let mut items: Vec<MenuItem<Self>> = vec![];

        for row in &m.inhibitor_rows {
            items.push(self.row_item(row.clone()));
        }
        if !m.inhibitor_rows.is_empty() {
            items.push(MenuItem::Separator);
        }

        for (glyph, mode) in [
            ("🅟", Mode::Presentation),
            ("🅛", Mode::LockOnly),
            ("🅢", Mode::SleepAfterLock),
        ] {
            if m.mode != mode {
                items.push(self.item(
                    format!("{} {} ⮜ {} Mode", glyph, mode.label(), m.mode.label()),
                    AppletCommand::SetMode(mode),
                ));
            }
        }

        items.push(self.item(
            format!("{}:  ▷ Lock Screen", m.environment),
            AppletCommand::LockScreen,
        ));
        if m.can_blank {
            items.push(self.item("   ▷ Blank Monitors".to_string(), AppletCommand::BlankMonitors));
        }
        if m.can_reload_wm {
            items.push(self.item("   ▷ Reload".to_string(), AppletCommand::ReloadWm));
        }
        if m.can_restart_wm {
            items.push(self.item("   ▷ Restart".to_string(), AppletCommand::RestartWm));
        }
        if m.can_logoff {
            items.push(self.item("   ▷ Log Off".to_string(), AppletCommand::LogOff));
        }

        items.push(self.item("System:  ▼ Suspend".to_string(), AppletCommand::Suspend));
        items.push(self.item("    ▼ Reboot".to_string(), AppletCommand::Reboot));
        items.push(self.item("    ▼ PowerOff".to_string(), AppletCommand::PowerOff));

        if m.battery_absent {
            items.push(self.item(m.battery_label(), AppletCommand::CycleBattery));
        } else {
            items.push(self.row_item(m.battery_label()));
        }

        items.push(self.item(
            format!("  ♺ Lock: {}", m.lock_label),
            AppletCommand::RotateLock,
        ));
        items.push(self.item(
            format!("  ♺ Sleep (after Lock): {}", m.sleep_label),
            AppletCommand::RotateSleep,
        ));

        if m.has_gui_editor {
            items.push(self.item("🖹  Edit Applet Config".to_string(), AppletCommand::EditConfig));
        }
        items.push(self.item("☓ Quit this Applet".to_string(), AppletCommand::Quit));
        items.push(self.item("↺ Restart this Applet".to_string(), AppletCommand::RestartApplet));
        items
    }
}

/// Start the tray service thread and return the handle used to push model
/// updates into it.
pub fn spawn(
    model: TrayModel,
    commands: mpsc::UnboundedSender<AppletCommand>,
) -> ksni::Handle<PowerTray> {
    let service = TrayService::new(PowerTray { model, commands });
    let handle = service.handle();
    service.spawn();
    handle
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_icon_pick_priorities() {
        let idle = Duration::ZERO;
        let lock = Duration::from_secs(900);
        // LoBattery wins over everything, including Presentation
        assert_eq!(
            IconKind::pick(Mode::SleepAfterLock, Selector::LoBattery, true, idle, lock),
            IconKind::LoBattery
        );
        assert_eq!(
            IconKind::pick(Mode::Presentation, Selector::HiBattery, true, idle, lock),
            IconKind::Inhibited
        );
        assert_eq!(
            IconKind::pick(Mode::Presentation, Selector::Settings, false, idle, lock),
            IconKind::Presentation
        );
        assert_eq!(
            IconKind::pick(Mode::LockOnly, Selector::Settings, false, idle, lock),
            IconKind::LockOnly
        );
    }

    #[test]
    fn test_icon_moon_variants() {
        let lock = Duration::from_secs(600);
        // moon threshold is 600 - min(60, 75) = 540s
        let close = Duration::from_secs(545);
        assert_eq!(
            IconKind::pick(Mode::SleepAfterLock, Selector::Settings, false, close, lock),
            IconKind::LockingSoon
        );
        assert_eq!(
            IconKind::pick(Mode::LockOnly, Selector::Settings, false, close, lock),
            IconKind::LockingSoonNoSleep
        );
        let far = Duration::from_secs(500);
        assert_eq!(
            IconKind::pick(Mode::SleepAfterLock, Selector::Settings, false, far, lock),
            IconKind::SleepAfterLock
        );
    }
}
