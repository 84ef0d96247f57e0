//! Common utilities for acceptance tests.

#![allow(dead_code)]

use fsm_common::signal::Inputs;
use fsm_engine::{Controller, CycleReport, MachineBuilder, MachineDefinition};
use std::time::Duration;

/// Nominal cycle period used by every test.
pub const CYCLE: Duration = Duration::from_millis(100);

/// Inputs with the given digital signals asserted.
pub fn pressed(names: &[&str]) -> Inputs {
    names
        .iter()
        .fold(Inputs::new(), |inputs, name| inputs.with(*name, true))
}

/// Run one cycle per entry of `steps`, holding each input set for its count.
pub fn run(controller: &mut Controller, steps: &[(Inputs, u32)]) -> Vec<CycleReport> {
    let mut reports = Vec::new();
    for (inputs, cycles) in steps {
        for _ in 0..*cycles {
            reports.push(controller.advance(inputs, CYCLE));
        }
    }
    reports
}

/// Names of the states in effect, one per report.
pub fn states(definition: &MachineDefinition, reports: &[CycleReport]) -> Vec<String> {
    reports
        .iter()
        .map(|r| definition.state_name(r.state).to_string())
        .collect()
}

/// Start/stop machine with a run-down timer of two cycles.
///
/// Idle -> Running on `start`, Running -> Stopping on `stop`,
/// Stopping -> Idle once `T1` expires. `estop` forces Idle.
pub fn start_stop() -> MachineBuilder {
    MachineBuilder::new("start_stop", "Idle", "Idle")
        .input("start")
        .input("stop")
        .input("estop")
        .output("motor", false)
        .timer("T1", CYCLE * 2)
        .state("Idle")
        .state_output("Running", "motor", true)
        .state_timer("Stopping", "T1")
        .transition("Idle", "Running", "start")
        .transition("Running", "Stopping", "stop")
        .transition("Stopping", "Idle", "expired(T1)")
}

/// Absolute path of a file shipped with the workspace.
pub fn workspace_file(relative: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}
