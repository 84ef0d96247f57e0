//! The machine definitions and configuration shipped with the workspace.

use super::common::{pressed, run, states, workspace_file, CYCLE};
use fsm_common::config::{ControllerEntry, EngineConfig, InputScript, MachineConfig};
use fsm_common::signal::Inputs;
use fsm_engine::{
    Controller, CycleDriver, CycleDriverBuilder, InputSource, LatchState, MachineDefinition,
    ScriptSource,
};

const CONVEYOR: &str = include_str!("../../machines/conveyor.toml");
const CONVEYOR_SCRIPT: &str = include_str!("../../machines/conveyor_script.toml");
const TRAFFIC_LIGHT: &str = include_str!("../../machines/traffic_light.toml");

fn load(text: &str) -> MachineDefinition {
    let config = MachineConfig::from_toml(text).unwrap();
    MachineDefinition::from_config(&config).unwrap()
}

#[test]
fn test_shipped_definitions_validate() {
    let conveyor = load(CONVEYOR);
    assert_eq!(conveyor.name(), "conveyor");
    assert_eq!(conveyor.state_count(), 4);
    assert_eq!(conveyor.max_retries(), 3);
    assert_eq!(conveyor.acknowledge_input(), Some("reset"));
    let alarm = conveyor
        .output_names()
        .iter()
        .position(|n| n == "alarm")
        .unwrap();
    assert!(conveyor.is_latched(alarm));

    let light = load(TRAFFIC_LIGHT);
    assert_eq!(light.state_name(light.initial()), "Red");
    assert_eq!(light.state_name(light.fault_state()), "Flashing");
    assert_eq!(light.overrides().len(), 1);
}

#[test]
fn test_conveyor_script_run() {
    let def = load(CONVEYOR);
    let script = InputScript::from_toml(CONVEYOR_SCRIPT).unwrap();
    assert_eq!(script.total_cycles(), 23);

    let mut ctl = Controller::new(def.clone());
    let mut source = ScriptSource::new(script);
    let mut reports = Vec::new();
    while let Some(inputs) = source.next_inputs() {
        reports.push(ctl.advance(&inputs, CYCLE));
    }

    let mut expected = vec!["Idle"; 3];
    expected.extend(["Running"; 6]);
    expected.extend(["Fault"; 3]);
    expected.push("Idle");
    expected.extend(["Running"; 4]);
    expected.extend(["Stopping"; 2]);
    expected.push("Idle");
    expected.extend(["Fault"; 3]);
    assert_eq!(states(&def, &reports), expected);

    // Running follows the speed setpoint; without one it reads zero.
    assert_eq!(reports[3].outputs.analog("speed"), 40.0);
    assert!(reports[3].outputs.digital("motor"));
    assert!(!reports[3].outputs.digital("brake"));
    assert_eq!(reports[8].outputs.analog("speed"), 0.0);

    // Jam latched in cycle 8, acknowledged by the reset edge in cycle 11.
    assert_eq!(reports[7].fault.state, LatchState::Latched);
    assert_eq!(reports[7].fault.code, Some(2001));
    assert_eq!(reports[9].fault.state, LatchState::Latched);
    assert_eq!(reports[10].fault.state, LatchState::Clear);

    // The alarm output is latched: set in Fault, cleared only by Idle.
    assert!(reports[9].outputs.digital("alarm"));
    assert!(reports[11].outputs.digital("alarm"));
    assert!(!reports[12].outputs.digital("alarm"));

    // Emergency stop in cycle 21.
    let estop = &reports[20];
    assert_eq!(estop.override_rule.as_deref(), Some("emergency_stop"));
    assert!(!estop.outputs.digital("motor"));
    assert!(estop.outputs.digital("brake"));
    assert!(estop.outputs.digital("alarm"));

    assert_eq!(ctl.state_name(), "Fault");
    assert_eq!(ctl.fault().state(), LatchState::Clear);
    assert_eq!(ctl.fault().retries(), 1);
}

#[test]
fn test_traffic_light_sequence() {
    let def = load(TRAFFIC_LIGHT);
    let mut ctl = Controller::new(def.clone());

    let reports = run(
        &mut ctl,
        &[
            (Inputs::new(), 6),
            (pressed(&["ped_request"]), 1),
            (Inputs::new(), 3),
            (pressed(&["lamp_fault"]), 3),
            (Inputs::new(), 3),
            (pressed(&["manual_flash"]), 2),
            (Inputs::new(), 2),
        ],
    );

    let mut expected = vec!["Red"; 5];
    expected.extend(["Green"; 2]);
    expected.extend(["Yellow"; 2]);
    expected.extend(["Red"; 3]);
    expected.extend(["Flashing"; 3]);
    expected.extend(["Red"; 1]);
    expected.extend(["Flashing"; 3]);
    expected.push("Red");
    assert_eq!(states(&def, &reports), expected);

    assert!(reports[0].outputs.digital("red"));
    assert!(reports[0].outputs.digital("walk"));
    assert!(reports[5].outputs.digital("green"));
    assert!(reports[7].outputs.digital("yellow"));

    // Lamp fault clears itself once the condition goes away.
    assert_eq!(reports[11].fault.state, LatchState::Latched);
    assert_eq!(reports[14].fault.state, LatchState::Clear);

    // Manual flashing forces yellow only.
    let forced = &reports[16];
    assert_eq!(forced.override_rule.as_deref(), Some("manual_flash"));
    assert!(forced.outputs.digital("yellow"));
    assert!(!forced.outputs.digital("red"));
}

#[test]
fn test_default_config_drives_shipped_machines() {
    let config = EngineConfig::from_file(&workspace_file("config/default.toml")).unwrap();
    assert_eq!(config.cycle_time, CYCLE);
    assert_eq!(config.controllers.len(), 2);
    assert!(config.controllers[0].machine.ends_with("config/../machines/conveyor.toml"));

    let mut driver = CycleDriver::from_config(&config).unwrap();
    driver.set_free_run(true);
    assert_eq!(driver.run(Some(23)).unwrap(), 23);

    assert_eq!(driver.controller("conveyor-1").unwrap().state_name(), "Fault");
    assert_eq!(driver.controller("traffic-1").unwrap().cycle().0, 23);

    let snapshot = driver.metrics().snapshot();
    assert_eq!(snapshot.total_cycles, 23);
    assert_eq!(snapshot.overrides, 1);
    assert_eq!(snapshot.fault_raises, 1);
}

#[test]
fn test_driver_loads_machine_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let machine = dir.path().join("conveyor.toml");
    let script = dir.path().join("script.toml");
    std::fs::write(&machine, CONVEYOR).unwrap();
    std::fs::write(
        &script,
        "[[steps]]\ninputs = { start = true }\n\n[[steps]]\ncycles = 2\ninputs = { speed_setpoint = 10.0 }\n",
    )
    .unwrap();

    let mut config = EngineConfig::default();
    config.fault_policy.max_retries = 5;
    config.controllers.push(ControllerEntry {
        name: "line".to_string(),
        machine,
        script: Some(script),
    });

    assert!(CycleDriverBuilder::new().config(config.clone()).build().is_empty());

    let mut driver = CycleDriver::from_config(&config).unwrap();
    driver.set_free_run(true);
    assert_eq!(driver.run(None).unwrap(), 3);

    let line = driver.controller("line").unwrap();
    assert_eq!(line.state_name(), "Running");
    assert_eq!(line.outputs().analog("speed"), 10.0);
    // The machine sets its own budget, which wins over the engine default.
    assert_eq!(line.fault().max_retries(), 3);
}
