//! Fixed-period cycle driver.
//!
//! The engine never schedules itself. [`CycleDriver`] is the external clock:
//! once per period it samples inputs for every controller, calls
//! [`Controller::advance`], records execution time, and sleeps until the
//! next deadline.
//!
//! Several controllers can share one driver. They run one after the other
//! in the same thread, each with its own [`InputSource`]; nothing is shared
//! between them.
//!
//! Controllers are always credited the nominal period, never the measured
//! wall time, so a run is reproducible from its inputs alone.
//!
//! Uses `clock_nanosleep` on Linux for low-jitter waits.

use crate::controller::{Controller, CycleReport};
use crate::definition::MachineDefinition;
use fsm_common::config::{EngineConfig, InputScript, MachineConfig, OverrunPolicy};
use fsm_common::error::{FsmError, FsmResult};
use fsm_common::metrics::CycleMetrics;
use fsm_common::signal::Inputs;
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

/// Where a controller's inputs come from.
pub trait InputSource {
    /// Inputs for the next cycle, or `None` once the source is exhausted.
    fn next_inputs(&mut self) -> Option<Inputs>;
}

/// Replays an [`InputScript`] step by step.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    script: InputScript,
    cycle: u64,
}

impl ScriptSource {
    /// Create a source positioned at the first step.
    #[must_use]
    pub fn new(script: InputScript) -> Self {
        Self { script, cycle: 0 }
    }
}

impl InputSource for ScriptSource {
    fn next_inputs(&mut self) -> Option<Inputs> {
        let inputs = self.script.inputs_at(self.cycle).cloned();
        if inputs.is_some() {
            self.cycle += 1;
        }
        inputs
    }
}

/// Feeds the same inputs forever.
#[derive(Debug, Clone, Default)]
pub struct IdleSource {
    inputs: Inputs,
}

impl IdleSource {
    /// Feed the given inputs every cycle.
    #[must_use]
    pub fn new(inputs: Inputs) -> Self {
        Self { inputs }
    }
}

impl InputSource for IdleSource {
    fn next_inputs(&mut self) -> Option<Inputs> {
        Some(self.inputs.clone())
    }
}

struct Slot {
    controller: Controller,
    source: Box<dyn InputSource>,
    exhausted: bool,
}

/// Result of one driver cycle.
#[derive(Debug, Clone)]
pub struct DriverCycle {
    /// Cycles executed so far, this one included.
    pub cycle_count: u64,
    /// Time spent in `advance` across all controllers.
    pub execution_time: Duration,
    /// Whether the execution exceeded the cycle period.
    pub overrun: bool,
    /// Reports in controller order.
    pub reports: Vec<CycleReport>,
    /// Every input source was exhausted, so no controller ran.
    pub exhausted: bool,
}

/// Runs controllers at a fixed period.
pub struct CycleDriver {
    slots: Vec<Slot>,
    cycle_period: Duration,
    max_overrun: Duration,
    on_overrun: OverrunPolicy,
    free_run: bool,
    next_deadline: Option<Instant>,
    cycle_count: u64,
    metrics: CycleMetrics,
}

impl CycleDriver {
    /// Create an empty driver.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            slots: Vec::new(),
            cycle_period: config.cycle_time,
            max_overrun: config.max_overrun,
            on_overrun: config.fault_policy.on_overrun,
            free_run: false,
            next_deadline: None,
            cycle_count: 0,
            metrics: CycleMetrics::new(config.metrics.histogram_size, config.cycle_time),
        }
    }

    /// Create a driver and load every controller listed in the
    /// configuration. Controllers without a script get neutral inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if a machine or script cannot be loaded or a
    /// definition does not validate.
    pub fn from_config(config: &EngineConfig) -> FsmResult<Self> {
        let mut driver = Self::new(config);
        for entry in &config.controllers {
            let machine = MachineConfig::from_file(&entry.machine)?;
            let definition = MachineDefinition::compile(&machine, config.fault_policy.max_retries)?;
            let controller = Controller::with_name(entry.name.as_str(), definition);
            match &entry.script {
                Some(path) => {
                    let script = InputScript::from_file(path)?;
                    driver.add_controller(controller, ScriptSource::new(script));
                }
                None => driver.add_controller(controller, IdleSource::default()),
            }
        }
        Ok(driver)
    }

    /// Add a controller with its input source.
    pub fn add_controller(&mut self, controller: Controller, source: impl InputSource + 'static) {
        info!(
            controller = controller.name(),
            machine = controller.definition().name(),
            state = controller.state_name(),
            "Controller added"
        );
        self.slots.push(Slot {
            controller,
            source: Box::new(source),
            exhausted: false,
        });
    }

    /// Skip the sleep between cycles.
    pub fn set_free_run(&mut self, free_run: bool) {
        self.free_run = free_run;
    }

    /// Look up a controller by name.
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::UnknownController`] if no controller has that name.
    pub fn controller(&self, name: &str) -> FsmResult<&Controller> {
        self.slots
            .iter()
            .map(|s| &s.controller)
            .find(|c| c.name() == name)
            .ok_or_else(|| FsmError::UnknownController(name.to_string()))
    }

    /// Look up a controller by name for operator commands.
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::UnknownController`] if no controller has that name.
    pub fn controller_mut(&mut self, name: &str) -> FsmResult<&mut Controller> {
        self.slots
            .iter_mut()
            .map(|s| &mut s.controller)
            .find(|c| c.name() == name)
            .ok_or_else(|| FsmError::UnknownController(name.to_string()))
    }

    /// Iterate over controllers in the order they were added.
    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.slots.iter().map(|s| &s.controller)
    }

    /// Number of controllers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no controller was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cycle metrics.
    #[must_use]
    pub fn metrics(&self) -> &CycleMetrics {
        &self.metrics
    }

    /// Total cycles executed.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Configured cycle period.
    #[must_use]
    pub fn cycle_period(&self) -> Duration {
        self.cycle_period
    }

    /// Arm the first deadline.
    pub fn start(&mut self) {
        info!(
            cycle_period_us = self.cycle_period.as_micros(),
            controllers = self.slots.len(),
            free_run = self.free_run,
            "Starting cyclic execution"
        );
        self.next_deadline = Some(Instant::now() + self.cycle_period);
    }

    /// Execute one cycle for every controller, then wait for the next
    /// deadline.
    ///
    /// Once every input source is exhausted nothing runs and the result
    /// has `exhausted` set.
    ///
    /// # Errors
    ///
    /// Returns [`FsmError::CycleOverrun`] if the overrun policy is `fault`
    /// and execution exceeded the period by more than `max_overrun`.
    pub fn run_cycle(&mut self) -> FsmResult<DriverCycle> {
        let mut sampled = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let inputs = slot.source.next_inputs();
            if inputs.is_none() && !slot.exhausted {
                info!(controller = slot.controller.name(), "Input source exhausted");
                slot.exhausted = true;
            }
            sampled.push(inputs);
        }

        if !self.slots.is_empty() && self.slots.iter().all(|s| s.exhausted) {
            return Ok(DriverCycle {
                cycle_count: self.cycle_count,
                execution_time: Duration::ZERO,
                overrun: false,
                reports: Vec::new(),
                exhausted: true,
            });
        }

        let mut reports = Vec::with_capacity(self.slots.len());
        let mut execution_time = Duration::ZERO;

        for (slot, inputs) in self.slots.iter_mut().zip(sampled) {
            // Exhausted sources hold neutral inputs while others still run.
            let inputs = inputs.unwrap_or_default();

            let start = Instant::now();
            let report = slot.controller.advance(&inputs, self.cycle_period);
            execution_time += start.elapsed();

            if report.transition.is_some() {
                self.metrics.note_transition();
            }
            if report.override_rule.is_some() {
                self.metrics.note_override();
            }
            for _ in 0..report.faults_raised {
                self.metrics.note_fault_raise();
            }
            reports.push(report);
        }

        self.cycle_count += 1;
        self.metrics.record(execution_time);

        let overrun = execution_time > self.cycle_period;
        if overrun {
            let overrun_amount = execution_time - self.cycle_period;
            match self.on_overrun {
                OverrunPolicy::Fault if overrun_amount > self.max_overrun => {
                    error!(
                        execution_us = execution_time.as_micros(),
                        deadline_us = self.cycle_period.as_micros(),
                        overrun_us = overrun_amount.as_micros(),
                        "Critical cycle overrun - stopping driver"
                    );
                    return Err(FsmError::CycleOverrun {
                        expected_ns: duration_ns(self.cycle_period),
                        actual_ns: duration_ns(execution_time),
                    });
                }
                OverrunPolicy::Fault | OverrunPolicy::Warn => {
                    warn!(
                        cycle = self.cycle_count,
                        execution_us = execution_time.as_micros(),
                        deadline_us = self.cycle_period.as_micros(),
                        "Cycle overrun"
                    );
                }
                OverrunPolicy::Ignore => {}
            }
        }

        if !self.free_run {
            if let Some(deadline) = self.next_deadline {
                wait_until(deadline);
                self.next_deadline = Some(deadline + self.cycle_period);
            }
        }

        trace!(
            cycle = self.cycle_count,
            execution_us = execution_time.as_micros(),
            "Cycle complete"
        );

        Ok(DriverCycle {
            cycle_count: self.cycle_count,
            execution_time,
            overrun,
            reports,
            exhausted: false,
        })
    }

    /// Run until every input source is exhausted or `max_cycles` cycles
    /// have executed. Returns the number of cycles executed by this call.
    ///
    /// With only [`IdleSource`]s and no limit this never returns.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`CycleDriver::run_cycle`].
    pub fn run(&mut self, max_cycles: Option<u64>) -> FsmResult<u64> {
        if self.next_deadline.is_none() {
            self.start();
        }

        let mut executed = 0;
        while max_cycles.map_or(true, |max| executed < max) {
            if self.run_cycle()?.exhausted {
                break;
            }
            executed += 1;
        }

        info!(cycles = self.cycle_count, "Driver loop exited");
        Ok(executed)
    }
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Sleep until the deadline using `clock_nanosleep`.
#[cfg(target_os = "linux")]
fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }

    let remaining = deadline - now;
    let ts = libc::timespec {
        tv_sec: libc::time_t::try_from(remaining.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_nsec: remaining.subsec_nanos() as libc::c_long,
    };

    // SAFETY: `ts` is a valid timespec and the remainder pointer may be null.
    unsafe {
        libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &ts, std::ptr::null_mut());
    }
}

#[cfg(not(target_os = "linux"))]
fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

/// Builder for configuring the driver.
pub struct CycleDriverBuilder {
    config: EngineConfig,
    free_run: bool,
}

impl CycleDriverBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            free_run: false,
        }
    }

    /// Set the cycle period.
    #[must_use]
    pub fn cycle_period(mut self, period: Duration) -> Self {
        self.config.cycle_time = period;
        self
    }

    /// Set the maximum tolerated overrun.
    #[must_use]
    pub fn max_overrun(mut self, max: Duration) -> Self {
        self.config.max_overrun = max;
        self
    }

    /// Set the overrun policy.
    #[must_use]
    pub fn on_overrun(mut self, policy: OverrunPolicy) -> Self {
        self.config.fault_policy.on_overrun = policy;
        self
    }

    /// Skip the sleep between cycles.
    #[must_use]
    pub fn free_run(mut self, free_run: bool) -> Self {
        self.free_run = free_run;
        self
    }

    /// Set the full engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the driver (controllers are added afterwards).
    #[must_use]
    pub fn build(self) -> CycleDriver {
        let mut driver = CycleDriver::new(&self.config);
        driver.set_free_run(self.free_run);
        driver
    }
}

impl Default for CycleDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::MachineBuilder;
    use fsm_common::config::ScriptStep;

    fn blinker(name: &str) -> Controller {
        let def = MachineBuilder::new("blinker", "Off", "Off")
            .input("enable")
            .output("lamp", false)
            .state("Off")
            .state_output("On", "lamp", true)
            .transition("Off", "On", "enable")
            .transition("On", "Off", "true")
            .build()
            .unwrap();
        Controller::with_name(name, def)
    }

    fn script(steps: &[(u32, bool)]) -> InputScript {
        InputScript {
            steps: steps
                .iter()
                .map(|&(cycles, enable)| ScriptStep {
                    cycles,
                    inputs: Inputs::new().with("enable", enable),
                })
                .collect(),
        }
    }

    #[test]
    fn test_script_source_exhausts() {
        let mut source = ScriptSource::new(script(&[(2, true), (1, false)]));
        assert!(source.next_inputs().unwrap().digital("enable"));
        assert!(source.next_inputs().unwrap().digital("enable"));
        assert!(!source.next_inputs().unwrap().digital("enable"));
        assert!(source.next_inputs().is_none());
        assert!(source.next_inputs().is_none());
    }

    #[test]
    fn test_driver_runs_until_scripts_exhausted() {
        let mut driver = CycleDriverBuilder::new()
            .cycle_period(Duration::from_millis(10))
            .free_run(true)
            .build();
        driver.add_controller(blinker("a"), ScriptSource::new(script(&[(3, true)])));
        driver.add_controller(blinker("b"), ScriptSource::new(script(&[(1, false)])));

        let executed = driver.run(Some(100)).unwrap();
        assert_eq!(executed, 3);
        assert_eq!(driver.cycle_count(), 3);
        assert_eq!(driver.metrics().total_cycles(), 3);
        // a: Off -> On -> Off -> On; b never leaves Off.
        assert_eq!(driver.metrics().snapshot().transitions, 3);

        let after = driver.run_cycle().unwrap();
        assert!(after.exhausted);
        assert!(after.reports.is_empty());
        assert_eq!(driver.cycle_count(), 3);
    }

    #[test]
    fn test_idle_source_respects_max_cycles() {
        let mut driver = CycleDriverBuilder::new().free_run(true).build();
        driver.add_controller(blinker("a"), IdleSource::new(Inputs::new().with("enable", true)));

        assert_eq!(driver.run(Some(5)).unwrap(), 5);
        assert_eq!(driver.controller("a").unwrap().cycle().0, 5);
    }

    #[test]
    fn test_controllers_are_independent() {
        let mut driver = CycleDriverBuilder::new().free_run(true).build();
        driver.add_controller(blinker("on"), IdleSource::new(Inputs::new().with("enable", true)));
        driver.add_controller(blinker("off"), IdleSource::default());
        driver.start();

        driver.run_cycle().unwrap();
        let cycle = driver.run_cycle().unwrap();
        assert!(cycle.reports[0].outputs.digital("lamp"));
        assert!(!cycle.reports[1].outputs.digital("lamp"));
        assert!(!cycle.exhausted);
    }

    #[test]
    fn test_controller_lookup() {
        let mut driver = CycleDriverBuilder::new().build();
        driver.add_controller(blinker("line-1"), IdleSource::default());

        assert_eq!(driver.len(), 1);
        assert!(driver.controller("line-1").is_ok());
        driver.controller_mut("line-1").unwrap().reset();
        assert!(matches!(
            driver.controller("line-9"),
            Err(FsmError::UnknownController(ref n)) if n == "line-9"
        ));
    }

    #[test]
    fn test_fixed_period_waits() {
        let period = Duration::from_millis(5);
        let mut driver = CycleDriverBuilder::new().cycle_period(period).build();
        driver.add_controller(blinker("a"), IdleSource::default());
        driver.start();

        let begin = Instant::now();
        for _ in 0..3 {
            driver.run_cycle().unwrap();
        }
        assert!(begin.elapsed() >= period * 2);
    }

    #[test]
    fn test_overrun_fault_policy() {
        let mut driver = CycleDriverBuilder::new()
            .cycle_period(Duration::ZERO)
            .max_overrun(Duration::ZERO)
            .on_overrun(OverrunPolicy::Fault)
            .free_run(true)
            .build();
        driver.add_controller(blinker("a"), IdleSource::default());

        // Any measurable execution time overruns a zero period.
        match driver.run_cycle() {
            Err(FsmError::CycleOverrun { expected_ns, .. }) => assert_eq!(expected_ns, 0),
            Ok(cycle) => assert_eq!(cycle.execution_time, Duration::ZERO),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_config_reports_missing_machine() {
        let mut config = EngineConfig::default();
        config.controllers.push(fsm_common::config::ControllerEntry {
            name: "x".to_string(),
            machine: "/nonexistent/machine.toml".into(),
            script: None,
        });
        assert!(matches!(
            CycleDriver::from_config(&config),
            Err(FsmError::Config(_))
        ));
    }
}
