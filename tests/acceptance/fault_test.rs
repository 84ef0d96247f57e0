//! Fault latch acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - The retry count never exceeds the configured maximum
//! - Exceeding the budget requires manual acknowledgment
//! - Acknowledging while the condition persists keeps the fault, even
//!   after the machine has left the states that raise it
//! - Unknown states force the fault state with a terminal fault

use super::common::{pressed, run, start_stop, CYCLE};
use fsm_common::config::MachineConfig;
use fsm_common::signal::Inputs;
use fsm_common::state::StateId;
use fsm_engine::{
    AckOutcome, Controller, FaultLatch, LatchState, MachineDefinition, UNKNOWN_STATE_FAULT_CODE,
};

#[test]
fn test_latch_retry_exhaustion() {
    let mut latch = FaultLatch::new(3);
    latch.set_condition(true);

    for expected in 1..=3 {
        assert_eq!(latch.raise(2001, "jam"), LatchState::Latched);
        assert_eq!(latch.retries(), expected);
    }

    assert_eq!(latch.raise(2001, "jam"), LatchState::RetryExceeded);
    assert_eq!(latch.retries(), 3);

    assert_eq!(latch.acknowledge(), AckOutcome::ConditionPresent);
    assert_eq!(latch.state(), LatchState::RetryExceeded);
    assert_eq!(latch.code(), Some(2001));

    latch.set_condition(false);
    assert_eq!(latch.acknowledge(), AckOutcome::Cleared);
    assert_eq!(latch.state(), LatchState::Clear);
    assert_eq!(latch.retries(), 0);
}

#[test]
fn test_controller_retry_budget() {
    let def = start_stop()
        .input("jam")
        .input("reset")
        .max_retries(3)
        .acknowledge_input("reset")
        .fault_rule(2001, "Belt jam", "jam")
        .build()
        .unwrap();
    let mut ctl = Controller::new(def);

    let mut pulses = Vec::new();
    for _ in 0..6 {
        pulses.push((pressed(&["jam"]), 1));
        pulses.push((Inputs::new(), 1));
    }
    let reports = run(&mut ctl, &pulses);

    for report in &reports {
        assert!(report.fault.retries <= 3);
    }
    let raised: u32 = reports.iter().map(|r| r.faults_raised).sum();
    assert_eq!(raised, 6);
    assert_eq!(ctl.fault().state(), LatchState::RetryExceeded);
    assert_eq!(ctl.fault().retries(), 3);

    // Acknowledge while the jam is still there: nothing changes.
    let report = ctl.advance(&pressed(&["jam", "reset"]), CYCLE);
    assert_eq!(report.fault.state, LatchState::RetryExceeded);
    assert!(report.fault.condition_present);

    // Jam gone, fresh reset edge: manual intervention done.
    run(&mut ctl, &[(Inputs::new(), 1), (pressed(&["reset"]), 1)]);
    assert_eq!(ctl.fault().state(), LatchState::Clear);
    assert_eq!(ctl.fault().retries(), 0);
}

#[test]
fn test_ack_refused_while_jam_held_in_fault_state() {
    let config = MachineConfig::from_toml(include_str!("../../machines/conveyor.toml")).unwrap();
    let mut ctl = Controller::new(MachineDefinition::from_config(&config).unwrap());

    // The jam rule only raises in Running; `faulted` then moves to Fault.
    let reports = run(
        &mut ctl,
        &[(pressed(&["start"]), 1), (pressed(&["jam"]), 2)],
    );
    assert_eq!(reports[1].faults_raised, 1);
    assert_eq!(ctl.state_name(), "Fault");

    // Jam still there: the reset edge and a direct acknowledge are refused.
    let report = ctl.advance(&pressed(&["jam", "reset"]), CYCLE);
    assert_eq!(ctl.definition().state_name(report.state), "Fault");
    assert!(report.fault.condition_present);
    assert_eq!(report.fault.state, LatchState::Latched);
    assert_eq!(ctl.acknowledge_fault(), AckOutcome::ConditionPresent);

    let report = ctl.advance(&pressed(&["jam", "reset"]), CYCLE);
    assert_eq!(report.fault.state, LatchState::Latched);
    assert_eq!(ctl.state_name(), "Fault");

    // Jam cleared: a fresh reset edge acknowledges, the next cycle leaves Fault.
    let reports = run(
        &mut ctl,
        &[(Inputs::new(), 1), (pressed(&["reset"]), 2)],
    );
    assert!(!reports[0].fault.condition_present);
    assert_eq!(reports[1].fault.state, LatchState::Clear);
    assert_eq!(ctl.state_name(), "Idle");
}

#[test]
fn test_unknown_state_forces_fault_state() {
    let def = start_stop().build().unwrap();
    let mut ctl = Controller::new(def.clone());
    run(&mut ctl, &[(pressed(&["start"]), 2)]);
    assert_eq!(ctl.state_name(), "Running");

    ctl.request_state(StateId::from_raw(99));
    let report = ctl.advance(&pressed(&["start", "stop"]), CYCLE);

    assert_eq!(report.state, def.fault_state());
    assert_eq!(report.unknown_state, Some(StateId::from_raw(99)));
    assert!(report.transition.is_none());
    assert_eq!(report.fault.state, LatchState::RetryExceeded);
    assert_eq!(report.fault.code, Some(UNKNOWN_STATE_FAULT_CODE));

    assert_eq!(ctl.acknowledge_fault(), AckOutcome::Cleared);
    assert!(!ctl.fault().is_active());
}
