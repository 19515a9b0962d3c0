//! Battery profile selection.
//!
//! The hardware battery picks one of three configuration profiles. Plugged-in
//! machines always run on `Settings`; unplugged ones run on `HiBattery` until
//! the charge drops under the configured threshold, then on `LoBattery`.

use crate::control::state_machine::Mode;
use crate::external::battery::BatteryReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Settings,
    HiBattery,
    LoBattery,
}

impl Selector {
    pub const ALL: [Selector; 3] = [Selector::Settings, Selector::HiBattery, Selector::LoBattery];

    pub fn label(&self) -> &'static str {
        match self {
            Selector::Settings => "Settings",
            Selector::HiBattery => "HiBattery",
            Selector::LoBattery => "LoBattery",
        }
    }
}

/// The mode that actually governs timing. A critically low battery forces
/// the safe behavior no matter what the user selected.
pub fn effective_mode(mode: Mode, selector: Selector) -> Mode {
    if selector == Selector::LoBattery {
        Mode::SleepAfterLock
    } else {
        mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Unknown,
    Present,
    Absent,
}

/// Live battery state with the absence latch.
///
/// Once a battery query fails the battery is considered absent for the rest
/// of the process lifetime; the tray then offers a manual selector toggle
/// instead of live readings.
#[derive(Debug, Clone, Copy)]
pub struct BatteryState {
    presence: Presence,
    pub plugged: bool,
    pub percent: f64,
    pub selector: Selector,
}

impl BatteryState {
    pub fn new() -> BatteryState {
        BatteryState {
            presence: Presence::Unknown,
            plugged: true,
            percent: 100.0,
            selector: Selector::Settings,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.presence == Presence::Absent
    }

    /// Fold in a reading. Returns true when the plugged flag or the selector
    /// changed, which callers use to rebuild the menu and restart the idle
    /// helper.
    pub fn refresh(&mut self, reading: Option<BatteryReading>, lo_battery_pct: u8) -> bool {
        if self.presence == Presence::Absent {
            return false;
        }
        let reading = match reading {
            Some(reading) => reading,
            None => {
                log::info!("no battery readable, latching battery as absent");
                self.presence = Presence::Absent;
                return false;
            }
        };
        self.presence = Presence::Present;
        let was = (self.plugged, self.selector);
        self.plugged = reading.plugged;
        self.percent = reading.percent;
        self.selector = if self.plugged {
            Selector::Settings
        } else if self.percent > lo_battery_pct as f64 {
            Selector::HiBattery
        } else {
            Selector::LoBattery
        };
        (self.plugged, self.selector) != was
    }

    /// Manual selector rotation for machines without a battery; lets the
    /// battery profiles be repurposed or tested.
    pub fn cycle_selector(&mut self) {
        self.selector = match self.selector {
            Selector::HiBattery => Selector::LoBattery,
            Selector::LoBattery => Selector::Settings,
            Selector::Settings => Selector::HiBattery,
        };
    }
}
