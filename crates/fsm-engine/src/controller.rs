//! State machine core.
//!
//! A [`Controller`] holds exactly one current state and runs one evaluation
//! pass per call to [`Controller::advance`]. The caller decides when cycles
//! happen; the controller never reads a clock or sleeps.
//!
//! # Cycle
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │ 1. unknown state?  ──yes──► fault state, terminal fault      │
//!  │ 2. state != prior  ──yes──► stop every timer                 │
//!  │ 3. outputs := defaults (latched outputs keep their value)    │
//!  │ 4. safety override? ─yes─► forced state now, stop timers,    │
//!  │                            override outputs, skip 5          │
//!  │ 5. state body (outputs, timer starts), advance timers,       │
//!  │    transition table (first match becomes next state)         │
//!  │ 6. fault rules (rising edges raise, ack handling)            │
//!  │ 7. prior := state in effect, current := next                 │
//!  └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `advance` never fails. Everything that can go wrong at run time
//! (unknown state, fault conditions, interlocks) is expressed as state.

use crate::definition::MachineDefinition;
use crate::fault_latch::{AckOutcome, FaultLatch, FaultStatus, LatchState, UNKNOWN_STATE_FAULT_CODE};
use crate::guard::GuardContext;
use crate::table::{FiredTransition, Transition};
use fsm_common::config::MachineConfig;
use fsm_common::error::ConfigResult;
use fsm_common::signal::{Inputs, Outputs};
use fsm_common::state::StateId;
use fsm_common::time::CycleIndex;
use fsm_stdlib::timers::TimerService;
use fsm_stdlib::triggers::{FTrig, RTrig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// What happened during one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Index of the cycle (first cycle is `#1`).
    pub cycle: CycleIndex,
    /// State in effect during the cycle.
    pub state: StateId,
    /// State in effect during the previous cycle.
    pub previous: StateId,
    /// Whether `state` differs from `previous`.
    pub changed: bool,
    /// Transition selected by the table, if any.
    pub transition: Option<FiredTransition>,
    /// Name of the safety override that forced the state, if any.
    pub override_rule: Option<String>,
    /// State the next cycle starts in.
    pub next_state: StateId,
    /// Output image.
    pub outputs: Outputs,
    /// Fault latch after the cycle.
    pub fault: FaultStatus,
    /// Number of fault raises during the cycle.
    pub faults_raised: u32,
    /// Number of running timers stopped during the cycle.
    pub timers_stopped: usize,
    /// Raw id of an unknown state that was replaced by the fault state.
    pub unknown_state: Option<StateId>,
}

/// One controller instance.
#[derive(Debug, Clone)]
pub struct Controller {
    name: String,
    definition: Arc<MachineDefinition>,
    current: StateId,
    prior: StateId,
    requested: Option<StateId>,
    timers: TimerService,
    latch: FaultLatch,
    outputs: Outputs,
    cycle: CycleIndex,
    rule_edges: Vec<RTrig>,
    condition_edge: FTrig,
    ack_edge: RTrig,
    active_override: Option<usize>,
}

impl Controller {
    /// Create a controller named after its machine, in the initial state.
    #[must_use]
    pub fn new(definition: impl Into<Arc<MachineDefinition>>) -> Self {
        let definition = definition.into();
        let name = definition.name().to_string();
        Self::with_name(name, definition)
    }

    /// Create a named controller instance, in the initial state.
    #[must_use]
    pub fn with_name(name: impl Into<String>, definition: impl Into<Arc<MachineDefinition>>) -> Self {
        let definition: Arc<MachineDefinition> = definition.into();
        let initial = definition.initial();
        Self {
            name: name.into(),
            current: initial,
            prior: initial,
            requested: None,
            timers: definition.timers().clone(),
            latch: FaultLatch::new(definition.max_retries()),
            outputs: definition.default_outputs(),
            cycle: CycleIndex::default(),
            rule_edges: vec![RTrig::new(); definition.fault_rules().len()],
            condition_edge: FTrig::new(),
            ack_edge: RTrig::new(),
            active_override: None,
            definition,
        }
    }

    /// Validate a configuration and create a controller for it.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn from_config(config: &MachineConfig) -> ConfigResult<Self> {
        Ok(Self::new(MachineDefinition::from_config(config)?))
    }

    /// Run one cycle.
    ///
    /// `inputs` is held constant for the whole pass; `cycle_time` is the
    /// time credited to running timers.
    pub fn advance(&mut self, inputs: &Inputs, cycle_time: Duration) -> CycleReport {
        let def = Arc::clone(&self.definition);
        self.cycle = self.cycle.next();

        if let Some(requested) = self.requested.take() {
            debug!(controller = %self.name, state = def.state_name(requested), "Applying requested state");
            self.current = requested;
        }

        // 1. Unknown state
        let mut unknown_state = None;
        if !def.contains(self.current) {
            error!(
                controller = %self.name,
                state = %self.current,
                fault_state = def.state_name(def.fault_state()),
                "Unknown state - forcing fault state"
            );
            unknown_state = Some(self.current);
            self.latch.raise_terminal(
                UNKNOWN_STATE_FAULT_CODE,
                format!("unknown state {}", self.current),
            );
            self.current = def.fault_state();
        }

        // 2. Change detection
        let previous = self.prior;
        let mut state = self.current;
        let mut timers_stopped = 0;
        if state != previous || unknown_state.is_some() {
            timers_stopped += self.timers.stop_all();
        }

        // 3. Output baseline
        self.reset_outputs(&def);

        // 4. Safety overrides, also on a cycle that replaced an unknown state
        let forced = def.overrides().evaluate(inputs, state);
        let mut override_rule = None;
        let mut transition = None;

        if let Some(forced) = forced {
            if let Some(rule) = def.overrides().rule(forced.rule) {
                if self.active_override != Some(forced.rule) {
                    info!(
                        controller = %self.name,
                        rule = %rule.name,
                        from = def.state_name(state),
                        to = def.state_name(forced.state),
                        "Safety override engaged"
                    );
                }
                for &(pos, value) in &rule.outputs {
                    self.outputs.set_at(pos, value);
                }
                override_rule = Some(rule.name.clone());
            }
            state = forced.state;
            timers_stopped += self.timers.stop_all();
        } else {
            if let Some(rule) = self
                .active_override
                .and_then(|index| def.overrides().rule(index))
            {
                info!(controller = %self.name, rule = %rule.name, "Safety override released");
            }

            // 5. State body, timers, transition table
            if unknown_state.is_none() {
                self.run_body(&def, state, inputs);
                self.timers.advance(cycle_time);
                let ctx = GuardContext {
                    inputs,
                    timers: &self.timers,
                    fault: self.latch.status(),
                };
                transition = def.table().next(state, &ctx).map(Transition::fired);
            }
        }
        self.active_override = forced.map(|f| f.rule);

        // 6. Fault latch
        let faults_raised = self.update_faults(&def, state, inputs);

        // 7. Bookkeeping
        let changed = state != previous;
        if changed {
            info!(
                controller = %self.name,
                cycle = self.cycle.0,
                from = def.state_name(previous),
                to = def.state_name(state),
                "State changed"
            );
        }
        if let Some(t) = transition {
            debug!(
                controller = %self.name,
                from = def.state_name(t.source),
                to = def.state_name(t.target),
                priority = t.priority,
                "Transition fired"
            );
        }

        let next_state = transition.map_or(state, |t| t.target);
        self.prior = state;
        self.current = next_state;

        trace!(
            controller = %self.name,
            cycle = self.cycle.0,
            state = def.state_name(state),
            next = def.state_name(next_state),
            "Cycle complete"
        );

        CycleReport {
            cycle: self.cycle,
            state,
            previous,
            changed,
            transition,
            override_rule,
            next_state,
            outputs: self.outputs.clone(),
            fault: self.latch.status(),
            faults_raised,
            timers_stopped,
            unknown_state,
        }
    }

    fn reset_outputs(&mut self, def: &MachineDefinition) {
        for index in 0..self.outputs.len() {
            if !def.is_latched(index) {
                self.outputs.set_at(index, def.output_default(index));
            }
        }
    }

    fn run_body(&mut self, def: &MachineDefinition, state: StateId, inputs: &Inputs) {
        let Some(body) = def.state(state) else {
            return;
        };
        for (pos, value) in &body.outputs {
            self.outputs
                .set_at(*pos, value.resolve(inputs, def.output_default(*pos)));
        }
        for &timer in &body.timers {
            if let Some(&preset) = def.timer_presets().get(timer.index()) {
                self.timers.start(timer, preset);
            }
        }
    }

    fn update_faults(&mut self, def: &MachineDefinition, state: StateId, inputs: &Inputs) -> u32 {
        let ctx = GuardContext {
            inputs,
            timers: &self.timers,
            fault: self.latch.status(),
        };

        let mut raised = 0;
        for (rule, edge) in def.fault_rules().iter().zip(self.rule_edges.iter_mut()) {
            let active = rule.applies_in(state) && rule.guard.evaluate(&ctx);
            if edge.call(active) {
                self.latch.raise(rule.code, rule.message.as_str());
                raised += 1;
            }
        }

        // `active_in` only gates raising. The latched rule's condition stays
        // present after the machine has moved on to another state.
        let latched = self.latch.code();
        let present = def.fault_rules().iter().any(|rule| {
            (rule.applies_in(state) || Some(rule.code) == latched) && rule.guard.evaluate(&ctx)
        });
        self.latch.set_condition(present);

        if self.condition_edge.call(present) && self.latch.state() == LatchState::Latched {
            let code = self.latch.code();
            let auto = def
                .fault_rules()
                .iter()
                .any(|r| r.auto_acknowledge && Some(r.code) == code);
            if auto {
                debug!(controller = %self.name, ?code, "Fault condition cleared, auto-acknowledging");
                self.latch.acknowledge();
            }
        }

        if let Some(input) = def.acknowledge_input() {
            if self.ack_edge.call(inputs.digital(input)) {
                self.acknowledge_fault();
            }
        }

        raised
    }

    /// Return to the initial state with stopped timers and a clear latch.
    pub fn reset(&mut self) {
        let initial = self.definition.initial();
        self.current = initial;
        self.prior = initial;
        self.requested = None;
        self.timers
            .reset_all(self.definition.timer_presets().iter().copied());
        self.latch.reset();
        self.outputs = self.definition.default_outputs();
        self.rule_edges.iter_mut().for_each(RTrig::reset);
        self.condition_edge.reset();
        self.ack_edge.reset();
        self.active_override = None;
        info!(
            controller = %self.name,
            state = self.definition.state_name(initial),
            "Controller reset"
        );
    }

    /// Replace the definition and reset.
    pub fn reconfigure(&mut self, definition: impl Into<Arc<MachineDefinition>>) {
        let definition: Arc<MachineDefinition> = definition.into();
        info!(
            controller = %self.name,
            machine = definition.name(),
            "Reconfiguring controller"
        );
        self.timers = definition.timers().clone();
        self.latch = FaultLatch::new(definition.max_retries());
        self.rule_edges = vec![RTrig::new(); definition.fault_rules().len()];
        self.definition = definition;
        self.reset();
    }

    /// Validate a configuration, then replace the definition and reset.
    /// On error the controller keeps running the old definition.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn reconfigure_from(&mut self, config: &MachineConfig) -> ConfigResult<()> {
        let definition = MachineDefinition::from_config(config)?;
        self.reconfigure(definition);
        Ok(())
    }

    /// Operator acknowledgment of the fault latch.
    pub fn acknowledge_fault(&mut self) -> AckOutcome {
        let outcome = self.latch.acknowledge();
        debug!(controller = %self.name, ?outcome, "Fault acknowledge");
        outcome
    }

    /// Force the state the next cycle starts in.
    ///
    /// Ids that do not name a declared state go through the unknown-state
    /// path on the next cycle.
    pub fn request_state(&mut self, state: StateId) {
        info!(
            controller = %self.name,
            state = %state,
            name = self.definition.state_name(state),
            "State requested"
        );
        self.requested = Some(state);
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The definition being executed.
    #[must_use]
    pub fn definition(&self) -> &Arc<MachineDefinition> {
        &self.definition
    }

    /// State the next cycle starts in.
    #[must_use]
    pub fn state(&self) -> StateId {
        self.current
    }

    /// Name of [`Controller::state`].
    #[must_use]
    pub fn state_name(&self) -> &str {
        self.definition.state_name(self.current)
    }

    /// State in effect during the last cycle.
    #[must_use]
    pub fn previous_state(&self) -> StateId {
        self.prior
    }

    /// Fault latch.
    #[must_use]
    pub fn fault(&self) -> &FaultLatch {
        &self.latch
    }

    /// Timers.
    #[must_use]
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Output image of the last cycle.
    #[must_use]
    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Number of cycles executed.
    #[must_use]
    pub fn cycle(&self) -> CycleIndex {
        self.cycle
    }
}
