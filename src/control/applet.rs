//! The applet context: owns all mutable state and runs the tick loop.
//!
//! Everything here executes on one task. Menu activations and resume
//! notifications arrive over channels and are folded into the same loop, so
//! there is never a concurrent writer to the applet's state.

use crate::config::ConfigStore;
use crate::control::idle_helper::{HelperCommand, HelperParams, IdleHelper};
use crate::control::rotation::{self, RotationKind};
use crate::control::selector::{effective_mode, BatteryState, Selector};
use crate::control::state_machine::{ActionSink, Mode, PowerStateMachine, TickInput};
use crate::external::battery::BatteryReader;
use crate::external::environment::CommandSet;
use crate::external::inhibitors::{media_playing, InhibitorScan, InhibitorSensor};
use crate::external::resume;
use crate::external::runner::CommandRunner;
use crate::tray::{self, AppletCommand, IconKind, PowerTray, TrayModel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::os::unix::process::CommandExt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const FAST_POLL: Duration = Duration::from_millis(100);

pub struct Applet {
    store: ConfigStore,
    commands: CommandSet,
    runner: CommandRunner,
    quick: bool,
    mode: Mode,
    machine: PowerStateMachine,
    battery: BatteryState,
    battery_reader: Option<BatteryReader>,
    inhibitor_sensor: Option<InhibitorSensor>,
    resume_rx: Option<watch::Receiver<u32>>,
    command_rx: Option<mpsc::UnboundedReceiver<AppletCommand>>,
    helper: Option<IdleHelper>,
    tray: ksni::Handle<PowerTray>,
    running_idle: Duration,
    loop_count: u32,
    loop_sample: u32,
    poll_fast: bool,
    rebuild_menu: bool,
    current_icon: Option<IconKind>,
    last_scan: InhibitorScan,
    externally_inhibited: bool,
}

impl Applet {
    pub async fn new(mut store: ConfigStore, commands: CommandSet, quick: bool) -> Result<Applet> {
        let mode = store.restore_picks().unwrap_or(Mode::SleepAfterLock);

        let connection = zbus::Connection::system()
            .await
            .context("couldn't connect to the system bus")?;
        let battery_reader = match BatteryReader::new(&connection).await {
            Ok(reader) => Some(reader),
            Err(e) => {
                log::warn!("battery monitoring unavailable: {}", e);
                None
            }
        };
        let inhibitor_sensor = match InhibitorSensor::new(&connection).await {
            Ok(sensor) => Some(sensor),
            Err(e) => {
                log::warn!("inhibitor monitoring unavailable: {}", e);
                None
            }
        };
        let resume_rx = match resume::spawn_watcher(&connection).await {
            Ok(receiver) => Some(receiver),
            Err(e) => {
                log::warn!("resume detection unavailable: {}", e);
                None
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let tray = tray::spawn(TrayModel::default(), command_tx);

        let helper = if commands.uses_idle_helper {
            IdleHelper::kill_strays().await;
            Some(IdleHelper::new())
        } else {
            None
        };

        Ok(Applet {
            store,
            commands,
            runner: CommandRunner,
            quick,
            mode,
            machine: PowerStateMachine::new(),
            battery: BatteryState::new(),
            battery_reader,
            inhibitor_sensor,
            resume_rx,
            command_rx: Some(command_rx),
            helper,
            tray,
            running_idle: Duration::ZERO,
            loop_count: 0,
            loop_sample: if quick { 1 } else { 15 },
            poll_fast: true,
            rebuild_menu: true,
            current_icon: None,
            last_scan: InhibitorScan::default(),
            externally_inhibited: false,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        self.sync_helper().await;
        let mut command_rx = self.command_rx.take().expect("run() called twice");
        let mut resume_rx = self.resume_rx.take();
        loop {
            let delay = if self.poll_fast {
                self.poll_fast = false;
                // make the next tick a full sampling tick too
                self.loop_count = self.loop_sample;
                FAST_POLL
            } else {
                POLL_INTERVAL
            };
            tokio::select! {
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    self.tick().await;
                }
                resumed = resume_edge(&mut resume_rx) => {
                    if resumed {
                        self.restart_applet().await;
                    }
                }
            }
        }
        if let Some(helper) = &mut self.helper {
            helper.stop().await;
        }
        log::info!("applet stopped");
        Ok(())
    }

    fn debug(&self) -> bool {
        self.store.params(self.battery.selector).debug_mode
    }

    fn effective_mode(&self) -> Mode {
        effective_mode(self.mode, self.battery.selector)
    }

    fn lock_threshold(&self) -> Duration {
        let mins = self.store.params(self.battery.selector).lock_min_list[0];
        Duration::from_secs(mins as u64 * 60)
    }

    fn down_threshold(&self) -> Duration {
        let mins = self.store.params(self.battery.selector).sleep_min_list[0];
        self.lock_threshold() + Duration::from_secs(mins as u64 * 60)
    }

    fn blanking_enabled(&self) -> bool {
        self.store.params(self.battery.selector).turn_off_monitors
            && self.commands.monitors_off.is_some()
    }

    fn locker_command(&self) -> Option<String> {
        let params = self.store.params(self.battery.selector);
        self.commands
            .locker_with_args(&params.i3lock_args, &params.swaylock_args)
    }

    async fn tick(&mut self) {
        self.loop_count += 1;
        if self.debug() {
            log::debug!("tick {}/{}", self.loop_count, self.loop_sample);
        }
        if self.store.reload_if_changed() {
            self.rebuild_menu = true;
        }
        if let Some(helper) = &mut self.helper {
            helper.checkup().await;
        }
        if self.refresh_battery().await {
            self.rebuild_menu = true;
            self.sync_helper().await;
        }

        let scan = self.scan_inhibitors().await;
        let playing = media_playing(&self.runner, self.commands.player_status.as_deref()).await;
        self.externally_inhibited = scan.inhibited || playing;
        let scan_changed = scan != self.last_scan;
        self.last_scan = scan;

        if self.update_icon() {
            self.poll_fast = true;
            self.sync_helper().await;
        }
        if scan_changed || self.rebuild_menu {
            self.push_tray_model();
            self.rebuild_menu = false;
            log::debug!("re-built menu");
        }

        if self.loop_count >= self.loop_sample {
            self.loop_count = 0;
            self.refresh_idle().await;
            self.emit_status();
            self.evaluate_ladder().await;
        }
    }

    async fn refresh_battery(&mut self) -> bool {
        let lo_battery_pct = self.store.params(self.battery.selector).lo_battery_pct;
        let reading = match &self.battery_reader {
            Some(reader) => match reader.read().await {
                Ok(reading) => Some(reading),
                Err(e) => {
                    log::warn!("battery read failed: {}", e);
                    None
                }
            },
            None => None,
        };
        if reading.is_none() {
            self.battery_reader = None;
        }
        self.battery.refresh(reading, lo_battery_pct)
    }

    async fn scan_inhibitors(&mut self) -> InhibitorScan {
        match &self.inhibitor_sensor {
            Some(sensor) => match sensor.scan().await {
                Ok(scan) => {
                    if self.debug() && scan.inhibited {
                        log::debug!("inhibitors: {:?}", scan.rows);
                    }
                    scan
                }
                Err(e) => {
                    // flaky queries count as "not inhibited", never as a fault
                    log::warn!("inhibitor query failed: {}", e);
                    InhibitorScan::default()
                }
            },
            None => InhibitorScan::default(),
        }
    }

    async fn refresh_idle(&mut self) {
        let command = match &self.commands.get_idle {
            Some(command) => command.clone(),
            None => return,
        };
        match self.runner.query(&command).await {
            Ok(output) => match output.parse::<f64>() {
                Ok(raw) => {
                    let mut idle = self.commands.idle_unit.to_duration(raw);
                    if self.quick {
                        // time warp: a configured minute passes in 30 real seconds
                        idle *= 2;
                    }
                    self.running_idle = idle;
                }
                Err(e) => log::warn!("couldn't parse idle reading {:?}: {}", output, e),
            },
            Err(e) => log::warn!("idle query failed, keeping previous reading: {}", e),
        }
    }

    fn emit_status(&self) {
        let emode = self.effective_mode();
        let params = self.store.params(self.battery.selector);
        let mut line = format!(
            "idle_s={:.1} state={:?},{:.0}s",
            self.running_idle.as_secs_f64(),
            self.machine.phase(),
            self.machine.entered_at_idle().as_secs_f64()
        );
        if emode != Mode::Presentation {
            line.push_str(&format!(" @{}m", params.lock_min_list[0]));
        }
        if emode == Mode::SleepAfterLock {
            line.push_str(&format!("+{}m", params.sleep_min_list[0]));
        }
        if self.battery.selector != Selector::Settings {
            line.push_str(&format!(" {}", self.battery.selector.label()));
        }
        log::info!("{}", line);
    }

    async fn evaluate_ladder(&mut self) {
        let emode = self.effective_mode();
        let params = self.store.params(self.battery.selector);
        let input = TickInput {
            idle: self.running_idle,
            effective_mode: emode,
            inhibited: self.externally_inhibited || emode == Mode::Presentation,
            helper_owns_timing: self.commands.uses_idle_helper,
            lock_threshold: self.lock_threshold(),
            down_threshold: self.down_threshold(),
            blank_grace: Duration::from_secs(if self.quick { 5 } else { 20 }),
            blanking_enabled: self.blanking_enabled(),
            power_down: params.power_down,
        };
        let mut sink = CommandActions {
            runner: &self.runner,
            commands: &self.commands,
            locker: self.locker_command(),
        };
        let machine = &mut self.machine;
        machine.step(&input, &mut sink).await;
    }

    fn update_icon(&mut self) -> bool {
        let icon = IconKind::pick(
            self.effective_mode(),
            self.battery.selector,
            self.externally_inhibited,
            self.running_idle,
            self.lock_threshold(),
        );
        if self.current_icon == Some(icon) {
            return false;
        }
        self.current_icon = Some(icon);
        true
    }

    fn push_tray_model(&self) {
        let params = self.store.params(self.battery.selector);
        let model = TrayModel {
            icon: self.current_icon.unwrap_or(IconKind::SleepAfterLock),
            inhibitor_rows: self.last_scan.rows.clone(),
            mode: self.mode,
            selector: self.battery.selector,
            battery_absent: self.battery.is_absent(),
            percent: self.battery.percent,
            environment: self.commands.environment.to_string(),
            lock_label: rotation::label(&params.lock_min_list),
            sleep_label: rotation::label(&params.sleep_min_list),
            can_blank: self.blanking_enabled(),
            can_reload_wm: self.commands.reload_wm.is_some(),
            can_restart_wm: self.commands.restart_wm.is_some(),
            can_logoff: self.commands.logoff.is_some(),
            has_gui_editor: !params.gui_editor.is_empty(),
        };
        self.tray.update(move |tray| tray.set_model(model));
    }

    /// Returns false when the applet should quit.
    async fn handle_command(&mut self, command: AppletCommand) -> bool {
        log::info!("menu action: {:?}", command);
        match command {
            AppletCommand::SetMode(mode) => {
                self.mode = mode;
                self.rebuild_menu = true;
                self.poll_fast = true;
                self.store.save_picks(self.mode);
                self.sync_helper().await;
            }
            AppletCommand::RotateLock => self.rotate(RotationKind::Lock).await,
            AppletCommand::RotateSleep => self.rotate(RotationKind::Sleep).await,
            AppletCommand::LockScreen => self.lock_now().await,
            AppletCommand::BlankMonitors => self.blank_now().await,
            AppletCommand::ReloadWm => self.run_capability(self.commands.reload_wm.clone()).await,
            AppletCommand::RestartWm => self.run_capability(self.commands.restart_wm.clone()).await,
            AppletCommand::LogOff => self.run_capability(self.commands.logoff.clone()).await,
            AppletCommand::Suspend => self.suspend_now().await,
            AppletCommand::Reboot => self.runner.run(&self.commands.reboot).await,
            AppletCommand::PowerOff => self.runner.run(&self.commands.poweroff).await,
            AppletCommand::CycleBattery => {
                if self.battery.is_absent() {
                    self.battery.cycle_selector();
                    self.rebuild_menu = true;
                    self.poll_fast = true;
                    self.sync_helper().await;
                }
            }
            AppletCommand::EditConfig => self.edit_config(),
            AppletCommand::RestartApplet => self.restart_applet().await,
            AppletCommand::Quit => return false,
        }
        true
    }

    async fn rotate(&mut self, kind: RotationKind) {
        let selector = self.battery.selector;
        let params = self.store.params_mut(selector);
        let list = match kind {
            RotationKind::Lock => &mut params.lock_min_list,
            RotationKind::Sleep => &mut params.sleep_min_list,
        };
        let front = list[0];
        let picked = rotation::advance(list);
        log::info!("picked {}={}m for {:?}", kind.label(), picked, selector);
        self.rebuild_menu = front != picked;
        self.poll_fast = true;
        self.store.save_picks(self.mode);
        self.sync_helper().await;
    }

    async fn lock_now(&mut self) {
        match self.locker_command() {
            Some(command) => {
                self.runner.run(&command).await;
                self.refresh_idle().await;
                self.machine.note_locked(self.running_idle);
            }
            None => log::warn!("locking unsupported in this environment"),
        }
    }

    async fn blank_now(&mut self) {
        if !self.blanking_enabled() {
            log::info!("blanking monitors unsupported or disabled");
            return;
        }
        self.lock_now().await;
        if let Some(command) = self.commands.monitors_off.clone() {
            self.runner.run(&command).await;
            self.machine.note_blanked(self.running_idle);
        }
    }

    async fn suspend_now(&mut self) {
        self.machine.note_asleep(self.running_idle);
        if let Some(command) = self.commands.reset_idle.clone() {
            self.runner.run(&command).await;
        }
        self.runner.run(&self.commands.suspend).await;
    }

    async fn run_capability(&mut self, command: Option<String>) {
        match command {
            Some(command) => self.runner.run(&command).await,
            None => log::warn!("action unsupported in this environment"),
        }
    }

    fn edit_config(&self) {
        let editor = self.store.params(self.battery.selector).gui_editor.clone();
        if editor.is_empty() {
            return;
        }
        let command = format!("{} {}", editor, self.store.config_path().display());
        log::info!("+ {}", command);
        if let Err(e) = tokio::process::Command::new("sh").arg("-c").arg(&command).spawn() {
            log::error!("couldn't start editor: {}", e);
        }
    }

    /// Re-sync the helper with the current effective parameters; a no-op
    /// when the command line hasn't changed or the environment polls idle
    /// time itself.
    async fn sync_helper(&mut self) {
        if self.helper.is_none() {
            return;
        }
        let params = self.store.params(self.battery.selector);
        let helper_params = HelperParams {
            effective_mode: self.effective_mode(),
            lock_mins: params.lock_min_list[0],
            sleep_mins: params.sleep_min_list[0],
            blank_enabled: self.blanking_enabled(),
            quick: self.quick,
            locker: self.locker_command().unwrap_or_default(),
            monitors_off: self.commands.monitors_off.clone().unwrap_or_default(),
            monitors_on: self.commands.monitors_on.clone().unwrap_or_default(),
            suspend: self.commands.suspend.clone(),
        };
        let command = HelperCommand::build(&helper_params);
        if let Some(helper) = &mut self.helper {
            helper.ensure_running(command).await;
        }
    }

    /// Replace this process with a fresh copy of itself. Used from the menu
    /// and after every resume, so the tray re-registers cleanly.
    async fn restart_applet(&mut self) {
        log::info!("restarting applet...");
        self.store.save_picks(self.mode);
        if let Some(helper) = &mut self.helper {
            helper.stop().await;
        }
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                log::error!("couldn't find own executable: {}", e);
                return;
            }
        };
        let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
        let error = std::process::Command::new(exe).args(args).exec();
        log::error!("couldn't re-exec: {}", error);
        std::process::exit(1);
    }
}

async fn resume_edge(receiver: &mut Option<watch::Receiver<u32>>) -> bool {
    match receiver {
        Some(rx) => match rx.changed().await {
            Ok(()) => true,
            Err(_) => {
                // watcher task died; don't busy-loop on it
                *receiver = None;
                false
            }
        },
        None => std::future::pending().await,
    }
}

struct CommandActions<'a> {
    runner: &'a CommandRunner,
    commands: &'a CommandSet,
    locker: Option<String>,
}

#[async_trait]
impl ActionSink for CommandActions<'_> {
    async fn lock(&mut self) {
        match &self.locker {
            Some(command) => self.runner.run(command).await,
            None => log::warn!("locking unsupported in this environment"),
        }
    }

    async fn blank(&mut self) {
        if let Some(command) = &self.commands.monitors_off {
            self.runner.run(command).await;
        }
    }

    async fn suspend(&mut self) {
        self.reset_idle().await;
        self.runner.run(&self.commands.suspend).await;
    }

    async fn poweroff(&mut self) {
        self.runner.run(&self.commands.poweroff).await;
    }

    async fn reset_idle(&mut self) {
        if let Some(command) = &self.commands.reset_idle {
            self.runner.run(command).await;
        }
    }
}
