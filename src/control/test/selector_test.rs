use crate::control::selector::{effective_mode, BatteryState, Selector};
use crate::control::state_machine::Mode;
use crate::external::battery::BatteryReading;

fn reading(plugged: bool, percent: f64) -> Option<BatteryReading> {
    Some(BatteryReading { plugged, percent })
}

#[test]
fn test_selector_invariant() {
    let mut state = BatteryState::new();
    // plugged always selects Settings, whatever the charge
    for percent in [1.0, 50.0, 100.0] {
        state.refresh(reading(true, percent), 10);
        assert_eq!(state.selector, Selector::Settings);
    }
    // unplugged splits on the threshold, strictly
    state.refresh(reading(false, 50.0), 10);
    assert_eq!(state.selector, Selector::HiBattery);
    state.refresh(reading(false, 10.0), 10);
    assert_eq!(state.selector, Selector::LoBattery);
    state.refresh(reading(false, 10.1), 10);
    assert_eq!(state.selector, Selector::HiBattery);
    state.refresh(reading(false, 3.0), 10);
    assert_eq!(state.selector, Selector::LoBattery);
}

#[test]
fn test_refresh_signals_changes() {
    let mut state = BatteryState::new();
    assert!(!state.refresh(reading(true, 80.0), 10));
    // same plugged flag and selector: no change
    assert!(!state.refresh(reading(true, 70.0), 10));
    // unplugging changes both the flag and the selector
    assert!(state.refresh(reading(false, 70.0), 10));
    // selector change alone is a change
    assert!(state.refresh(reading(false, 5.0), 10));
    assert!(!state.refresh(reading(false, 4.0), 10));
}

#[test]
fn test_absence_latches() {
    let mut state = BatteryState::new();
    state.refresh(reading(false, 50.0), 10);
    assert!(!state.is_absent());
    state.refresh(None, 10);
    assert!(state.is_absent());
    // a later good reading does not unlatch
    assert!(!state.refresh(reading(false, 5.0), 10));
    assert!(state.is_absent());
    assert_eq!(state.selector, Selector::HiBattery);
}

#[test]
fn test_manual_cycle_when_absent() {
    let mut state = BatteryState::new();
    state.refresh(None, 10);
    assert_eq!(state.selector, Selector::Settings);
    state.cycle_selector();
    assert_eq!(state.selector, Selector::HiBattery);
    state.cycle_selector();
    assert_eq!(state.selector, Selector::LoBattery);
    state.cycle_selector();
    assert_eq!(state.selector, Selector::Settings);
}

#[test]
fn test_effective_mode_override() {
    for mode in Mode::ALL {
        assert_eq!(effective_mode(mode, Selector::LoBattery), Mode::SleepAfterLock);
        assert_eq!(effective_mode(mode, Selector::Settings), mode);
        assert_eq!(effective_mode(mode, Selector::HiBattery), mode);
    }
}
