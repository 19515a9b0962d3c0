//! The idle-driven power state machine.
//!
//! Once per sampling window the applet evaluates a five-branch transition
//! ladder against the measured idle time. Only the first matching branch
//! fires. Side effects go through the [ActionSink] seam so tests can record
//! them instead of shelling out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User-selected operating intent. Only ever changed by an explicit menu
/// action; low battery overrides it through
/// [effective_mode](crate::control::selector::effective_mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Presentation,
    LockOnly,
    SleepAfterLock,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Presentation, Mode::LockOnly, Mode::SleepAfterLock];

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Presentation => "Presentation",
            Mode::LockOnly => "LockOnly",
            Mode::SleepAfterLock => "SleepAfterLock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Awake,
    Locked,
    Blanked,
    Asleep,
    Inhibited,
}

/// Side-effecting actions the ladder can fire.
#[async_trait]
pub trait ActionSink {
    async fn lock(&mut self);
    async fn blank(&mut self);
    async fn suspend(&mut self);
    async fn poweroff(&mut self);
    async fn reset_idle(&mut self);
}

/// Everything one ladder evaluation depends on, captured up front so the
/// step itself is a pure function of its input and the current phase.
#[derive(Debug, Clone)]
pub struct TickInput {
    pub idle: Duration,
    pub effective_mode: Mode,
    /// External inhibitor, active media playback or Presentation mode.
    pub inhibited: bool,
    /// True when an idle-helper process enforces the timeouts; the ladder
    /// then never resets the idle clock (the helper can't observe it).
    pub helper_owns_timing: bool,
    pub lock_threshold: Duration,
    /// Lock threshold plus sleep threshold; power-down fires here.
    pub down_threshold: Duration,
    pub blank_grace: Duration,
    pub blanking_enabled: bool,
    /// Profile flag: power off instead of suspending.
    pub power_down: bool,
}

pub struct PowerStateMachine {
    phase: Phase,
    /// Idle reading at the time the current phase was entered.
    entered_at_idle: Duration,
}

impl PowerStateMachine {
    pub fn new() -> PowerStateMachine {
        PowerStateMachine {
            phase: Phase::Awake,
            entered_at_idle: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn entered_at_idle(&self) -> Duration {
        self.entered_at_idle
    }

    fn set_phase(&mut self, phase: Phase, idle: Duration) {
        log::info!(
            "state: {:?} at {:.1}s idle (was {:?} at {:.1}s)",
            phase,
            idle.as_secs_f64(),
            self.phase,
            self.entered_at_idle.as_secs_f64()
        );
        self.phase = phase;
        self.entered_at_idle = idle;
    }

    /// Record a lock performed outside the ladder (menu action).
    pub fn note_locked(&mut self, idle: Duration) {
        self.set_phase(Phase::Locked, idle);
    }

    pub fn note_blanked(&mut self, idle: Duration) {
        self.set_phase(Phase::Blanked, idle);
    }

    pub fn note_asleep(&mut self, idle: Duration) {
        self.set_phase(Phase::Asleep, idle);
    }

    /// Evaluate the transition ladder once. At most one branch fires.
    pub async fn step(&mut self, input: &TickInput, sink: &mut impl ActionSink) {
        if input.inhibited {
            // Keep the idle clock from ever reaching the lock threshold
            // while inhibited. With a helper in charge there is nothing to
            // do; the helper enforces its own before-sleep lock regardless.
            if !input.helper_owns_timing && input.idle >= inhibit_reset_threshold(input.lock_threshold)
            {
                sink.reset_idle().await;
            }
            if self.phase == Phase::Awake && input.effective_mode != Mode::Presentation {
                self.set_phase(Phase::Inhibited, input.idle);
            }
            return;
        }

        if input.idle >= input.down_threshold
            && input.effective_mode != Mode::LockOnly
            && matches!(self.phase, Phase::Awake | Phase::Locked | Phase::Blanked)
        {
            self.set_phase(Phase::Asleep, input.idle);
            if input.power_down {
                sink.poweroff().await;
            } else {
                sink.suspend().await;
            }
            return;
        }

        if input.idle >= input.lock_threshold
            && input.effective_mode != Mode::Presentation
            && self.phase == Phase::Awake
        {
            sink.lock().await;
            self.set_phase(Phase::Locked, input.idle);
            return;
        }

        if input.blanking_enabled
            && input.effective_mode != Mode::Presentation
            && self.phase == Phase::Locked
            && input.idle >= self.entered_at_idle + input.blank_grace
        {
            sink.blank().await;
            self.set_phase(Phase::Blanked, input.idle);
            return;
        }

        // The system can't observe an unlock directly, only the idle clock
        // restarting; any activity below the lock threshold wakes us.
        if input.idle < input.lock_threshold && self.phase != Phase::Awake {
            self.set_phase(Phase::Awake, input.idle);
        }
    }
}

// While inhibited, reset the idle clock once it gets anywhere near the lock
// threshold (40% of it, capped at 50s).
fn inhibit_reset_threshold(lock_threshold: Duration) -> Duration {
    Duration::min(Duration::from_secs(50), lock_threshold * 2 / 5)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_inhibit_reset_threshold() {
        assert_eq!(
            inhibit_reset_threshold(Duration::from_secs(60)),
            Duration::from_secs(24)
        );
        assert_eq!(
            inhibit_reset_threshold(Duration::from_secs(1800)),
            Duration::from_secs(50)
        );
    }
}
