//! Configuration loading and the persisted picks store.
//!
//! The config file is TOML with one table per battery profile. The `settings`
//! table is the base; `hi_battery` and `lo_battery` inherit from it field by
//! field. The file is re-read whenever its modification time changes, so
//! edits take effect without a restart. User-chosen rotation fronts and the
//! operating mode are persisted separately in `picks.toml`.

use crate::control::rotation;
use crate::control::selector::Selector;
use crate::control::state_machine::Mode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use std::{env, fs};

pub const APP_NAME: &str = "vigilo";

const QUICK_MIN_LIST: &[u32] = &[1, 2, 4, 8, 32, 128];

const DEFAULT_CONFIG: &str = "\
# vigilo configuration. Timeout lists are minutes; the first entry is the
# active pick and the tray menu rotates through the rest.

[settings]
debug_mode = false
power_down = false
turn_off_monitors = false
lock_min_list = [15, 30]
sleep_min_list = [5, 30]
lo_battery_pct = 10
i3lock_args = \"\"
swaylock_args = \"\"
gui_editor = \"\"

[hi_battery]
power_down = false
lock_min_list = [10, 20]
sleep_min_list = [1, 10]

[lo_battery]
power_down = true
lock_min_list = [1]
sleep_min_list = [1]
";

#[derive(Debug, Clone)]
pub struct Paths {
    pub folder: PathBuf,
    pub config_path: PathBuf,
    pub picks_path: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Paths> {
        let home = env::var_os("HOME").context("HOME is not set")?;
        let folder = PathBuf::from(home).join(".config").join(APP_NAME);
        fs::create_dir_all(&folder)
            .with_context(|| format!("couldn't create {}", folder.display()))?;
        Ok(Paths {
            config_path: folder.join("config.toml"),
            picks_path: folder.join("picks.toml"),
            folder,
        })
    }

    /// The file flexi_logger writes under rotation.
    pub fn log_file(&self) -> PathBuf {
        self.folder.join(format!("{}_rCURRENT.log", APP_NAME))
    }
}

/// The typed parameters of one battery profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileParams {
    pub debug_mode: bool,
    pub power_down: bool,
    pub turn_off_monitors: bool,
    pub lock_min_list: Vec<u32>,
    pub sleep_min_list: Vec<u32>,
    pub lo_battery_pct: u8,
    pub i3lock_args: String,
    pub swaylock_args: String,
    pub gui_editor: String,
}

impl ProfileParams {
    fn defaults_for(selector: Selector) -> ProfileParams {
        let settings = ProfileParams {
            debug_mode: false,
            power_down: false,
            turn_off_monitors: false,
            lock_min_list: vec![15, 30],
            sleep_min_list: vec![5, 30],
            lo_battery_pct: 10,
            i3lock_args: String::new(),
            swaylock_args: String::new(),
            gui_editor: String::new(),
        };
        match selector {
            Selector::Settings => settings,
            Selector::HiBattery => ProfileParams {
                lock_min_list: vec![10, 20],
                sleep_min_list: vec![1, 10],
                ..settings
            },
            Selector::LoBattery => ProfileParams {
                power_down: true,
                lock_min_list: vec![1, 1],
                sleep_min_list: vec![1, 1],
                ..settings
            },
        }
    }

    fn apply(&mut self, raw: &RawProfile) {
        if let Some(v) = raw.debug_mode {
            self.debug_mode = v;
        }
        if let Some(v) = raw.power_down {
            self.power_down = v;
        }
        if let Some(v) = raw.turn_off_monitors {
            self.turn_off_monitors = v;
        }
        if let Some(list) = &raw.lock_min_list {
            self.lock_min_list = normalize_minutes(list, &self.lock_min_list);
        }
        if let Some(list) = &raw.sleep_min_list {
            self.sleep_min_list = normalize_minutes(list, &self.sleep_min_list);
        }
        if let Some(v) = raw.lo_battery_pct {
            self.lo_battery_pct = v;
        }
        if let Some(v) = &raw.i3lock_args {
            self.i3lock_args = v.clone();
        }
        if let Some(v) = &raw.swaylock_args {
            self.swaylock_args = v.clone();
        }
        if let Some(v) = &raw.gui_editor {
            self.gui_editor = v.clone();
        }
    }
}

/// Keep the positive entries and guarantee at least two, duplicating a
/// singleton so "current" and "next" always exist. Lists with no usable
/// entries fall back to the previous value.
fn normalize_minutes(raw: &[i64], fallback: &[u32]) -> Vec<u32> {
    let mut minutes: Vec<u32> = raw
        .iter()
        .filter(|v| **v > 0 && **v <= u32::MAX as i64)
        .map(|v| *v as u32)
        .collect();
    if minutes.is_empty() {
        return fallback.to_vec();
    }
    if minutes.len() == 1 {
        minutes.push(minutes[0]);
    }
    minutes
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct RawProfile {
    debug_mode: Option<bool>,
    power_down: Option<bool>,
    turn_off_monitors: Option<bool>,
    lock_min_list: Option<Vec<i64>>,
    sleep_min_list: Option<Vec<i64>>,
    lo_battery_pct: Option<u8>,
    i3lock_args: Option<String>,
    swaylock_args: Option<String>,
    gui_editor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    settings: RawProfile,
    hi_battery: RawProfile,
    lo_battery: RawProfile,
}

fn resolve_profiles(raw: &RawConfig) -> [ProfileParams; 3] {
    Selector::ALL.map(|selector| {
        let mut params = ProfileParams::defaults_for(selector);
        params.apply(&raw.settings);
        match selector {
            Selector::Settings => {}
            Selector::HiBattery => params.apply(&raw.hi_battery),
            Selector::LoBattery => params.apply(&raw.lo_battery),
        }
        params
    })
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
struct PickSet {
    settings: u32,
    hi_battery: u32,
    lo_battery: u32,
}

impl PickSet {
    fn get(&self, selector: Selector) -> u32 {
        match selector {
            Selector::Settings => self.settings,
            Selector::HiBattery => self.hi_battery,
            Selector::LoBattery => self.lo_battery,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Picks {
    mode: Mode,
    lock_mins: PickSet,
    sleep_mins: PickSet,
}

pub struct ConfigStore {
    pub paths: Paths,
    profiles: [ProfileParams; 3],
    last_mtime: Option<SystemTime>,
    quick: bool,
}

impl ConfigStore {
    pub fn load(paths: Paths, quick: bool) -> Result<ConfigStore> {
        if !paths.config_path.exists() {
            fs::write(&paths.config_path, DEFAULT_CONFIG)
                .with_context(|| format!("couldn't write {}", paths.config_path.display()))?;
            log::info!("wrote default config to {}", paths.config_path.display());
        }
        let mut store = ConfigStore {
            paths,
            profiles: Selector::ALL.map(ProfileParams::defaults_for),
            last_mtime: None,
            quick,
        };
        store.reload_if_changed();
        Ok(store)
    }

    /// Re-reads the config file if it changed on disk. Returns whether
    /// anything was re-read; parse failures keep the previous values.
    pub fn reload_if_changed(&mut self) -> bool {
        let mtime = match fs::metadata(&self.paths.config_path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                log::warn!("couldn't stat config file: {}", e);
                return false;
            }
        };
        if self.last_mtime == Some(mtime) {
            return false;
        }
        self.last_mtime = Some(mtime);
        log::info!("parsing {}", self.paths.config_path.display());
        let raw: RawConfig = match fs::read_to_string(&self.paths.config_path)
            .map_err(anyhow::Error::new)
            .and_then(|text| toml::from_str(&text).map_err(anyhow::Error::new))
        {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("config file unusable, keeping previous values: {}", e);
                return false;
            }
        };
        // Keep the user's current picks at the front across a re-read.
        let fronts: Vec<(Selector, u32, u32)> = Selector::ALL
            .iter()
            .map(|s| {
                let p = self.params(*s);
                (*s, p.lock_min_list[0], p.sleep_min_list[0])
            })
            .collect();
        self.profiles = resolve_profiles(&raw);
        if self.quick {
            self.apply_quick_lists();
        }
        for (selector, lock_front, sleep_front) in fronts {
            let params = self.params_mut(selector);
            rotation::rotate_to_front(&mut params.lock_min_list, lock_front);
            rotation::rotate_to_front(&mut params.sleep_min_list, sleep_front);
        }
        for selector in Selector::ALL {
            log::debug!("{:?} params: {:?}", selector, self.params(selector));
        }
        true
    }

    pub fn params(&self, selector: Selector) -> &ProfileParams {
        &self.profiles[selector as usize]
    }

    pub fn params_mut(&mut self, selector: Selector) -> &mut ProfileParams {
        &mut self.profiles[selector as usize]
    }

    /// One-time override from the --debug flag.
    pub fn force_debug(&mut self) {
        for params in self.profiles.iter_mut() {
            params.debug_mode = true;
        }
    }

    fn apply_quick_lists(&mut self) {
        for params in self.profiles.iter_mut() {
            params.lock_min_list = QUICK_MIN_LIST.to_vec();
            params.sleep_min_list = QUICK_MIN_LIST.to_vec();
        }
    }

    /// Persist the mode and the rotation fronts. Failures keep the in-memory
    /// state authoritative; the next successful write re-syncs.
    pub fn save_picks(&self, mode: Mode) {
        if self.quick {
            return;
        }
        let pick = |f: fn(&ProfileParams) -> u32| PickSet {
            settings: f(self.params(Selector::Settings)),
            hi_battery: f(self.params(Selector::HiBattery)),
            lo_battery: f(self.params(Selector::LoBattery)),
        };
        let picks = Picks {
            mode,
            lock_mins: pick(|p| p.lock_min_list[0]),
            sleep_mins: pick(|p| p.sleep_min_list[0]),
        };
        let result = toml::to_string(&picks)
            .map_err(anyhow::Error::new)
            .and_then(|text| fs::write(&self.paths.picks_path, text).map_err(anyhow::Error::new));
        match result {
            Ok(()) => log::info!(
                "picks saved: mode={:?} lock={:?} sleep={:?}",
                picks.mode,
                picks.lock_mins,
                picks.sleep_mins
            ),
            Err(e) => log::error!("couldn't save picks: {}", e),
        }
    }

    /// Restore the persisted mode and rotate each list so the saved picks
    /// are at the front again. Returns None when there is nothing usable.
    pub fn restore_picks(&mut self) -> Option<Mode> {
        let picks: Picks = match fs::read_to_string(&self.paths.picks_path)
            .map_err(anyhow::Error::new)
            .and_then(|text| toml::from_str(&text).map_err(anyhow::Error::new))
        {
            Ok(picks) => picks,
            Err(e) => {
                log::info!("no picks restored: {}", e);
                return None;
            }
        };
        for selector in Selector::ALL {
            let lock_front = picks.lock_mins.get(selector);
            let sleep_front = picks.sleep_mins.get(selector);
            let params = self.params_mut(selector);
            rotation::rotate_to_front(&mut params.lock_min_list, lock_front);
            rotation::rotate_to_front(&mut params.sleep_min_list, sleep_front);
        }
        log::info!("restored picks, mode={:?}", picks.mode);
        Some(picks.mode)
    }

    pub fn config_path(&self) -> &Path {
        &self.paths.config_path
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_config_parses_to_defaults() {
        let raw: RawConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        let profiles = resolve_profiles(&raw);
        assert_eq!(profiles[Selector::Settings as usize].lock_min_list, vec![15, 30]);
        assert_eq!(profiles[Selector::HiBattery as usize].sleep_min_list, vec![1, 10]);
        // the lo_battery singleton lists get self-duplicated
        assert_eq!(profiles[Selector::LoBattery as usize].lock_min_list, vec![1, 1]);
        assert!(profiles[Selector::LoBattery as usize].power_down);
    }

    #[test]
    fn test_battery_sections_inherit_from_settings() {
        let raw: RawConfig = toml::from_str(
            "[settings]\nturn_off_monitors = true\nlock_min_list = [7]\n\n[hi_battery]\nlock_min_list = [3, 9]\n",
        )
        .unwrap();
        let profiles = resolve_profiles(&raw);
        // hi_battery overrides the list but inherits the flag
        assert!(profiles[Selector::HiBattery as usize].turn_off_monitors);
        assert_eq!(profiles[Selector::HiBattery as usize].lock_min_list, vec![3, 9]);
        // lo_battery inherits settings' singleton list, duplicated
        assert_eq!(profiles[Selector::LoBattery as usize].lock_min_list, vec![7, 7]);
    }

    #[test]
    fn test_normalize_minutes() {
        assert_eq!(normalize_minutes(&[5], &[1, 2]), vec![5, 5]);
        assert_eq!(normalize_minutes(&[0, -3, 4, 8], &[1, 2]), vec![4, 8]);
        assert_eq!(normalize_minutes(&[0, -3], &[1, 2]), vec![1, 2]);
    }

    #[test]
    fn test_picks_roundtrip() {
        let picks = Picks {
            mode: Mode::LockOnly,
            lock_mins: PickSet {
                settings: 30,
                hi_battery: 10,
                lo_battery: 1,
            },
            sleep_mins: PickSet {
                settings: 5,
                hi_battery: 1,
                lo_battery: 1,
            },
        };
        let text = toml::to_string(&picks).unwrap();
        let back: Picks = toml::from_str(&text).unwrap();
        assert!(matches!(back.mode, Mode::LockOnly));
        assert_eq!(back.lock_mins.settings, 30);
    }
}
