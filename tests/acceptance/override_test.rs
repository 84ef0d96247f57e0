//! Safety override acceptance tests.
//!
//! An override forces its state from anywhere, holds while its condition
//! holds, stops timers on entry and never counts as a fault.

use super::common::{pressed, run, start_stop, states, CYCLE};
use fsm_common::signal::Inputs;
use fsm_engine::{Controller, LatchState, MachineBuilder, MachineDefinition};
use std::time::Duration;

fn interlocked() -> MachineDefinition {
    start_stop()
        .state("Halted")
        .transition("Halted", "Idle", "start")
        .safety_override("estop", "estop", "Halted")
        .override_output("estop", "motor", false)
        .build()
        .unwrap()
}

#[test]
fn test_override_wins_from_every_state() {
    let def = interlocked();
    // Inputs that would also satisfy every transition guard.
    let inputs = pressed(&["estop", "start", "stop"]);

    for (id, state) in def.states() {
        let mut ctl = Controller::new(def.clone());
        ctl.request_state(id);

        let report = ctl.advance(&inputs, CYCLE);
        assert_eq!(def.state_name(report.state), "Halted", "from {}", state.name);
        assert_eq!(report.override_rule.as_deref(), Some("estop"));
        assert!(report.transition.is_none());
        assert!(!report.outputs.digital("motor"));
    }
}

#[test]
fn test_override_during_stopping_restarts_timer_later() {
    let def = interlocked();
    let mut ctl = Controller::new(def.clone());
    let t1 = ctl.timers().id("T1").unwrap();

    let reports = run(
        &mut ctl,
        &[
            (pressed(&["start"]), 1),
            (pressed(&["stop"]), 1),
            (Inputs::new(), 1),
        ],
    );
    assert_eq!(states(&def, &reports), ["Idle", "Running", "Stopping"]);
    assert_eq!(ctl.timers().get(t1).unwrap().elapsed(), CYCLE);

    let forced = ctl.advance(&pressed(&["estop"]), CYCLE);
    assert_eq!(def.state_name(forced.state), "Halted");
    assert_eq!(def.state_name(forced.previous), "Stopping");
    assert_eq!(forced.timers_stopped, 1);
    assert_eq!(ctl.timers().get(t1).unwrap().elapsed(), Duration::ZERO);
    assert!(!ctl.timers().get(t1).unwrap().is_running());

    let resumed = run(
        &mut ctl,
        &[
            (pressed(&["estop"]), 1),
            (pressed(&["start"]), 2),
            (pressed(&["stop"]), 1),
            (Inputs::new(), 1),
        ],
    );
    assert_eq!(
        states(&def, &resumed),
        ["Halted", "Halted", "Idle", "Running", "Stopping"]
    );
    // Fresh run: one cycle of elapsed time, not carried over.
    assert_eq!(ctl.timers().get(t1).unwrap().elapsed(), CYCLE);
    assert!(!ctl.timers().get(t1).unwrap().is_expired());
}

#[test]
fn test_override_is_not_a_fault() {
    let def = interlocked();
    let mut ctl = Controller::new(def);

    let reports = run(&mut ctl, &[(pressed(&["estop"]), 5)]);
    for report in &reports {
        assert_eq!(report.fault.state, LatchState::Clear);
        assert_eq!(report.fault.retries, 0);
        assert_eq!(report.faults_raised, 0);
    }
}

#[test]
fn test_first_declared_override_wins() {
    let def = MachineBuilder::new("press", "Idle", "Idle")
        .input("estop")
        .input("door_open")
        .input("resume")
        .state("Idle")
        .state("EStopped")
        .state("DoorHold")
        .transition("EStopped", "Idle", "resume")
        .transition("DoorHold", "Idle", "resume")
        .safety_override("estop", "estop", "EStopped")
        .safety_override("door", "door_open", "DoorHold")
        .build()
        .unwrap();
    let mut ctl = Controller::new(def.clone());

    let both = ctl.advance(&pressed(&["estop", "door_open"]), CYCLE);
    assert_eq!(def.state_name(both.state), "EStopped");

    let door = ctl.advance(&pressed(&["door_open"]), CYCLE);
    assert_eq!(def.state_name(door.state), "DoorHold");
    assert_eq!(door.override_rule.as_deref(), Some("door"));
}
