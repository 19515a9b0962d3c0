use crate::control::state_machine::{ActionSink, Mode, Phase, PowerStateMachine, TickInput};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    fired: Vec<&'static str>,
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn lock(&mut self) {
        self.fired.push("lock");
    }
    async fn blank(&mut self) {
        self.fired.push("blank");
    }
    async fn suspend(&mut self) {
        self.fired.push("suspend");
    }
    async fn poweroff(&mut self) {
        self.fired.push("poweroff");
    }
    async fn reset_idle(&mut self) {
        self.fired.push("reset_idle");
    }
}

fn input(idle_secs: u64) -> TickInput {
    TickInput {
        idle: Duration::from_secs(idle_secs),
        effective_mode: Mode::SleepAfterLock,
        inhibited: false,
        helper_owns_timing: false,
        lock_threshold: Duration::from_secs(60),
        down_threshold: Duration::from_secs(180),
        blank_grace: Duration::from_secs(20),
        blanking_enabled: false,
        power_down: false,
    }
}

async fn step(machine: &mut PowerStateMachine, input: &TickInput) -> Vec<&'static str> {
    let mut sink = RecordingSink::default();
    machine.step(input, &mut sink).await;
    sink.fired
}

// 1m lock pick, 2m sleep pick, blanking disabled.
#[tokio::test]
async fn test_ladder_end_to_end() {
    let mut machine = PowerStateMachine::new();
    assert_eq!(machine.phase(), Phase::Awake);

    assert!(step(&mut machine, &input(0)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Awake);

    assert_eq!(step(&mut machine, &input(61)).await, vec!["lock"]);
    assert_eq!(machine.phase(), Phase::Locked);

    // locked and still under the down threshold: nothing more fires
    assert!(step(&mut machine, &input(120)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Locked);

    assert_eq!(step(&mut machine, &input(181)).await, vec!["suspend"]);
    assert_eq!(machine.phase(), Phase::Asleep);

    // activity after resume reverts to Awake without firing anything
    assert!(step(&mut machine, &input(30)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Awake);
}

#[tokio::test]
async fn test_ladder_with_blanking() {
    let mut machine = PowerStateMachine::new();
    let blanked = |idle| {
        let mut i = input(idle);
        i.blanking_enabled = true;
        i
    };
    assert_eq!(step(&mut machine, &blanked(61)).await, vec!["lock"]);
    // grace runs from the idle value at lock time
    assert!(step(&mut machine, &blanked(75)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Locked);
    assert_eq!(step(&mut machine, &blanked(81)).await, vec!["blank"]);
    assert_eq!(machine.phase(), Phase::Blanked);
    assert_eq!(step(&mut machine, &blanked(181)).await, vec!["suspend"]);
    assert_eq!(machine.phase(), Phase::Asleep);
}

#[tokio::test]
async fn test_power_down_fires_once_from_awake() {
    let mut machine = PowerStateMachine::new();
    assert_eq!(step(&mut machine, &input(10_000)).await, vec!["suspend"]);
    assert_eq!(machine.phase(), Phase::Asleep);
    // asleep is not a power-down state; nothing fires again
    assert!(step(&mut machine, &input(10_001)).await.is_empty());
}

#[tokio::test]
async fn test_lock_only_never_powers_down() {
    let mut machine = PowerStateMachine::new();
    let lock_only = |idle| {
        let mut i = input(idle);
        i.effective_mode = Mode::LockOnly;
        i
    };
    assert_eq!(step(&mut machine, &lock_only(61)).await, vec!["lock"]);
    assert!(step(&mut machine, &lock_only(100_000)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Locked);
}

#[tokio::test]
async fn test_power_down_flag_selects_poweroff() {
    let mut machine = PowerStateMachine::new();
    let mut i = input(200);
    i.power_down = true;
    assert_eq!(step(&mut machine, &i).await, vec!["poweroff"]);
    assert_eq!(machine.phase(), Phase::Asleep);
}

#[tokio::test]
async fn test_inhibition_suppresses_everything() {
    let mut machine = PowerStateMachine::new();
    for idle in [0u64, 61, 181, 100_000] {
        let mut i = input(idle);
        i.inhibited = true;
        let fired = step(&mut machine, &i).await;
        // the idle clock reset is the only permitted side effect
        assert!(fired.iter().all(|a| *a == "reset_idle"), "fired {:?}", fired);
        assert_ne!(machine.phase(), Phase::Locked);
        assert_ne!(machine.phase(), Phase::Asleep);
    }
    assert_eq!(machine.phase(), Phase::Inhibited);
}

#[tokio::test]
async fn test_inhibited_reset_respects_threshold_and_helper() {
    let mut machine = PowerStateMachine::new();
    // 40% of 60s = 24s; below that the clock is left alone
    let mut i = input(20);
    i.inhibited = true;
    assert!(step(&mut machine, &i).await.is_empty());

    let mut i = input(30);
    i.inhibited = true;
    assert_eq!(step(&mut machine, &i).await, vec!["reset_idle"]);

    // with a helper in charge of timing the clock is never reset
    let mut i = input(30);
    i.inhibited = true;
    i.helper_owns_timing = true;
    assert!(step(&mut machine, &i).await.is_empty());
}

#[tokio::test]
async fn test_presentation_stays_awake() {
    let mut machine = PowerStateMachine::new();
    let mut i = input(100_000);
    i.effective_mode = Mode::Presentation;
    i.inhibited = true; // presentation mode is an inhibition source
    let fired = step(&mut machine, &i).await;
    assert_eq!(fired, vec!["reset_idle"]);
    // presentation does not latch the Inhibited phase
    assert_eq!(machine.phase(), Phase::Awake);
}

#[tokio::test]
async fn test_recovery_from_inhibited() {
    let mut machine = PowerStateMachine::new();
    let mut i = input(30);
    i.inhibited = true;
    step(&mut machine, &i).await;
    assert_eq!(machine.phase(), Phase::Inhibited);

    // inhibition gone but idle still above the lock threshold: the ladder
    // neither locks (wrong phase) nor reverts until activity happens
    assert!(step(&mut machine, &input(90)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Inhibited);

    assert!(step(&mut machine, &input(5)).await.is_empty());
    assert_eq!(machine.phase(), Phase::Awake);
}

#[tokio::test]
async fn test_menu_notes_move_the_phase() {
    let mut machine = PowerStateMachine::new();
    machine.note_locked(Duration::from_secs(3));
    assert_eq!(machine.phase(), Phase::Locked);
    assert_eq!(machine.entered_at_idle(), Duration::from_secs(3));
    machine.note_blanked(Duration::from_secs(4));
    assert_eq!(machine.phase(), Phase::Blanked);
    machine.note_asleep(Duration::from_secs(5));
    assert_eq!(machine.phase(), Phase::Asleep);
}
