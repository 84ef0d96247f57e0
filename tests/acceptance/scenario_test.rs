//! Cycle-level scenarios: state sequences, transition firing and timers.

use super::common::{pressed, run, start_stop, states, CYCLE};
use fsm_common::signal::Inputs;
use fsm_engine::{Controller, MachineBuilder};
use std::time::Duration;

#[test]
fn test_start_stop_sequence() {
    let def = start_stop().build().unwrap();
    let mut ctl = Controller::new(def.clone());

    let reports = run(
        &mut ctl,
        &[
            (pressed(&["start"]), 1),
            (pressed(&["stop"]), 1),
            (Inputs::new(), 3),
        ],
    );

    assert_eq!(
        states(&def, &reports),
        ["Idle", "Running", "Stopping", "Stopping", "Idle"]
    );
    assert!(reports[1].outputs.digital("motor"));
    assert!(!reports[2].outputs.digital("motor"));
}

#[test]
fn test_at_most_one_transition_per_cycle() {
    // Every guard holds, so only the one-per-cycle rule limits progress.
    let def = MachineBuilder::new("ring", "A", "A")
        .state("A")
        .state("B")
        .state("C")
        .state("D")
        .transition("A", "B", "true")
        .transition("B", "C", "true")
        .transition("C", "D", "true")
        .transition("D", "A", "true")
        .build()
        .unwrap();
    let mut ctl = Controller::new(def.clone());

    let reports = run(&mut ctl, &[(Inputs::new(), 6)]);
    assert_eq!(states(&def, &reports), ["A", "B", "C", "D", "A", "B"]);
    for report in &reports {
        let fired = report.transition.unwrap();
        assert_eq!(fired.source, report.state);
        assert_eq!(fired.target, report.next_state);
    }
}

#[test]
fn test_state_change_stops_timers() {
    let def = start_stop().build().unwrap();
    let mut ctl = Controller::new(def);
    let t1 = ctl.timers().id("T1").unwrap();

    run(
        &mut ctl,
        &[(pressed(&["start"]), 1), (pressed(&["stop"]), 1), (Inputs::new(), 2)],
    );
    // T1 expired in the last Stopping cycle and is still held.
    assert!(ctl.timers().get(t1).unwrap().is_expired());

    let report = ctl.advance(&Inputs::new(), CYCLE);
    assert!(report.changed);
    assert_eq!(report.timers_stopped, 1);
    let timer = ctl.timers().get(t1).unwrap();
    assert!(!timer.is_running());
    assert!(!timer.is_expired());
    assert_eq!(timer.elapsed(), Duration::ZERO);
}

#[test]
fn test_expired_is_held_until_stopped() {
    let def = MachineBuilder::new("dwell", "Wait", "Wait")
        .timer("T", CYCLE * 2)
        .state_timer("Wait", "T")
        .build()
        .unwrap();
    let mut ctl = Controller::new(def);
    let t = ctl.timers().id("T").unwrap();

    let mut expired = Vec::new();
    for _ in 0..6 {
        ctl.advance(&Inputs::new(), CYCLE);
        expired.push(ctl.timers().get(t).unwrap().is_expired());
    }
    assert_eq!(expired, [false, true, true, true, true, true]);
    assert_eq!(ctl.timers().get(t).unwrap().elapsed(), CYCLE * 2);
}

#[test]
fn test_identical_inputs_give_identical_runs() {
    let def = start_stop().build().unwrap();
    let steps = [
        (pressed(&["start"]), 2),
        (Inputs::new().with("stop", true).with("start", true), 1),
        (Inputs::new(), 4),
        (pressed(&["start"]), 1),
    ];

    let mut first = Controller::new(def.clone());
    let mut second = Controller::new(def.clone());
    let a = run(&mut first, &steps);
    let b = run(&mut second, &steps);

    assert_eq!(states(&def, &a), states(&def, &b));
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.transition, y.transition);
        assert_eq!(
            x.outputs.iter().collect::<Vec<_>>(),
            y.outputs.iter().collect::<Vec<_>>()
        );
    }
}

#[test]
fn test_cycle_counter_and_previous_state() {
    let def = start_stop().build().unwrap();
    let mut ctl = Controller::new(def.clone());

    run(&mut ctl, &[(pressed(&["start"]), 1), (Inputs::new(), 1)]);
    assert_eq!(ctl.cycle().0, 2);
    assert_eq!(ctl.state_name(), "Running");
    assert_eq!(def.state_name(ctl.previous_state()), "Running");
}
