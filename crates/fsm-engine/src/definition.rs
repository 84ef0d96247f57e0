//! Validated, immutable machine definitions.
//!
//! A [`MachineConfig`] is raw data read from TOML. [`MachineDefinition::compile`]
//! checks it and resolves every name to a dense index, so the cycle path
//! never looks anything up by string except input names. A definition that
//! compiled is guaranteed to have:
//!
//! - unique state, input, output, timer and override names
//! - no input named after a guard keyword
//! - only references to declared states, inputs, outputs and timers
//! - parseable guards, with input-only guards on safety overrides
//! - distinct transition priorities within each source state
//! - non-zero timer presets
//! - at most `u16::MAX` states and timers
//! - every state reachable from the initial state, and able to reach both
//!   the initial state and the fault state
//!
//! Definitions can also be assembled in code with [`MachineBuilder`].

use crate::guard::{Guard, RESERVED_WORDS};
use crate::safety::{OverrideRule, SafetyLayer};
use crate::table::{Transition, TransitionTable};
use fsm_common::config::{
    FaultRuleConfig, MachineConfig, OutputConfig, OutputValueConfig, OverrideConfig, StateConfig,
    TimerConfig, TransitionConfig, DEFAULT_MAX_RETRIES,
};
use fsm_common::error::{ConfigError, ConfigResult};
use fsm_common::signal::{Inputs, Outputs, Signal};
use fsm_common::state::StateId;
use fsm_stdlib::timers::{TimerId, TimerService};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Value a state body writes to an output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    /// Constant.
    Const(Signal),
    /// Copy of an input.
    Follow(String),
}

impl OutputValue {
    /// Resolve against the current inputs. A followed input that was not
    /// provided yields the neutral value of the output's default.
    #[must_use]
    pub fn resolve(&self, inputs: &Inputs, default: Signal) -> Signal {
        match self {
            Self::Const(value) => *value,
            Self::Follow(input) => inputs.get(input).unwrap_or_else(|| default.neutral()),
        }
    }
}

/// A state and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDef {
    /// State name.
    pub name: String,
    /// Output writes `(position, value)`.
    pub outputs: Vec<(usize, OutputValue)>,
    /// Timers started while the state is in effect.
    pub timers: Vec<TimerId>,
}

/// Operational fault rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultRule {
    /// Fault code.
    pub code: u32,
    /// Operator message.
    pub message: String,
    /// Fault condition.
    pub guard: Guard,
    /// States in which the rule is evaluated; empty means all.
    pub active_in: Vec<StateId>,
    /// Acknowledge automatically once the condition clears.
    pub auto_acknowledge: bool,
}

impl FaultRule {
    /// Whether the rule is evaluated while `state` is in effect.
    #[must_use]
    pub fn applies_in(&self, state: StateId) -> bool {
        self.active_in.is_empty() || self.active_in.contains(&state)
    }
}

/// Executable machine definition.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    name: String,
    states: Vec<StateDef>,
    initial: StateId,
    fault_state: StateId,
    inputs: Vec<String>,
    output_names: Arc<[String]>,
    output_defaults: Vec<Signal>,
    output_latched: Vec<bool>,
    timers: TimerService,
    timer_presets: Vec<Duration>,
    table: TransitionTable,
    overrides: SafetyLayer,
    faults: Vec<FaultRule>,
    max_retries: u32,
    acknowledge_input: Option<String>,
}

impl MachineDefinition {
    /// Validate a configuration using the default retry budget.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn from_config(config: &MachineConfig) -> ConfigResult<Self> {
        Self::compile(config, DEFAULT_MAX_RETRIES)
    }

    /// Validate a configuration. `default_max_retries` applies when the
    /// machine does not set its own budget.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn compile(config: &MachineConfig, default_max_retries: u32) -> ConfigResult<Self> {
        let machine = &config.name;

        if config.states.is_empty() {
            return Err(ConfigError::NoStates {
                machine: machine.clone(),
            });
        }
        let limit = usize::from(u16::MAX);
        if config.states.len() > limit {
            return Err(ConfigError::TooManyStates {
                machine: machine.clone(),
                count: config.states.len(),
                limit,
            });
        }
        if config.timers.len() > limit {
            return Err(ConfigError::TooManyTimers {
                machine: machine.clone(),
                count: config.timers.len(),
                limit,
            });
        }

        // Names
        let state_ids = index_names("state", config.states.iter().map(|s| s.name.as_str()))?;
        let input_set = index_names("input", config.inputs.iter().map(String::as_str))?;
        let output_ids = index_names("output", config.outputs.iter().map(|o| o.name.as_str()))?;
        index_names("timer", config.timers.iter().map(|t| t.name.as_str()))?;
        index_names("override", config.overrides.iter().map(|o| o.name.as_str()))?;

        if let Some(word) = config
            .inputs
            .iter()
            .find(|name| RESERVED_WORDS.contains(&name.as_str()))
        {
            return Err(ConfigError::ReservedName(word.clone()));
        }

        let lookup_state = |context: &str, name: &str| -> ConfigResult<StateId> {
            state_ids
                .get(name)
                .map(|&i| state_id(i))
                .ok_or_else(|| ConfigError::UnknownState {
                    context: context.to_string(),
                    name: name.to_string(),
                })
        };
        let lookup_output = |context: &str, name: &str| -> ConfigResult<usize> {
            output_ids
                .get(name)
                .copied()
                .ok_or_else(|| ConfigError::UnknownOutput {
                    context: context.to_string(),
                    name: name.to_string(),
                })
        };
        let check_input = |context: &str, name: &str| -> ConfigResult<()> {
            if input_set.contains_key(name) {
                Ok(())
            } else {
                Err(ConfigError::UnknownInput {
                    context: context.to_string(),
                    name: name.to_string(),
                })
            }
        };

        let initial = lookup_state("initial", &config.initial)?;
        let fault_state = lookup_state("fault_state", &config.fault_state)?;

        if let Some(input) = &config.acknowledge_input {
            check_input("acknowledge_input", input)?;
        }

        // Timers
        let mut timers = TimerService::new();
        let mut timer_presets = Vec::with_capacity(config.timers.len());
        for timer in &config.timers {
            if timer.preset.is_zero() {
                return Err(ConfigError::ZeroPreset(timer.name.clone()));
            }
            timers.add(timer.name.as_str(), timer.preset);
            timer_presets.push(timer.preset);
        }
        let lookup_timer = |context: &str, name: &str| -> ConfigResult<TimerId> {
            timers.id(name).ok_or_else(|| ConfigError::UnknownTimer {
                context: context.to_string(),
                name: name.to_string(),
            })
        };
        let check_guard = |context: &str, expr: &str| -> ConfigResult<Guard> {
            let guard = Guard::parse(expr)?;
            for input in guard.input_names() {
                check_input(context, input)?;
            }
            for timer in guard.timer_names() {
                lookup_timer(context, timer)?;
            }
            Ok(guard)
        };

        // State bodies
        let mut states = Vec::with_capacity(config.states.len());
        for state in &config.states {
            let context = format!("state '{}'", state.name);
            let mut outputs = Vec::with_capacity(state.outputs.len());
            for (output, value) in &state.outputs {
                let pos = lookup_output(&context, output)?;
                let value = match value {
                    OutputValueConfig::Const(v) => OutputValue::Const(*v),
                    OutputValueConfig::Follow { input } => {
                        check_input(&context, input)?;
                        OutputValue::Follow(input.clone())
                    }
                };
                outputs.push((pos, value));
            }
            let body_timers = state
                .timers
                .iter()
                .map(|t| lookup_timer(&context, t))
                .collect::<ConfigResult<Vec<_>>>()?;
            states.push(StateDef {
                name: state.name.clone(),
                outputs,
                timers: body_timers,
            });
        }

        // Transition table
        let mut table = TransitionTable::new(states.len());
        let mut declared_per_source: Vec<u32> = vec![0; states.len()];
        for transition in &config.transitions {
            let context = format!("transition {} -> {}", transition.from, transition.to);
            let source = lookup_state(&context, &transition.from)?;
            let target = lookup_state(&context, &transition.to)?;
            let guard = check_guard(&context, &transition.when)?;

            let declared = &mut declared_per_source[source.index()];
            let priority = transition.priority.unwrap_or(*declared);
            *declared += 1;

            let inserted = table.insert(Transition {
                source,
                target,
                guard,
                priority,
            });
            if !inserted {
                return Err(ConfigError::DuplicatePriority {
                    state: transition.from.clone(),
                    priority,
                });
            }
        }

        // Safety overrides
        let mut rules = Vec::with_capacity(config.overrides.len());
        for rule in &config.overrides {
            let context = format!("override '{}'", rule.name);
            let target = lookup_state(&context, &rule.force)?;
            let guard = check_guard(&context, &rule.when)?;
            if !guard.is_input_only() {
                return Err(ConfigError::OverrideNotInputOnly {
                    rule: rule.name.clone(),
                });
            }
            let outputs = rule
                .outputs
                .iter()
                .map(|(name, value)| -> ConfigResult<(usize, Signal)> {
                    Ok((lookup_output(&context, name)?, *value))
                })
                .collect::<ConfigResult<Vec<_>>>()?;
            rules.push(OverrideRule {
                name: rule.name.clone(),
                guard,
                target,
                outputs,
            });
        }

        // Fault rules
        let mut faults = Vec::with_capacity(config.faults.len());
        for rule in &config.faults {
            let context = format!("fault rule {}", rule.code);
            let guard = check_guard(&context, &rule.when)?;
            let active_in = rule
                .active_in
                .iter()
                .map(|s| lookup_state(&context, s))
                .collect::<ConfigResult<Vec<_>>>()?;
            faults.push(FaultRule {
                code: rule.code,
                message: rule.message.clone(),
                guard,
                active_in,
                auto_acknowledge: rule.auto_acknowledge,
            });
        }

        let overrides = SafetyLayer::new(rules);
        check_reachability(&states, &table, &overrides, initial, fault_state)?;

        let output_names: Arc<[String]> = config.outputs.iter().map(|o| o.name.clone()).collect();
        let definition = Self {
            name: machine.clone(),
            states,
            initial,
            fault_state,
            inputs: config.inputs.clone(),
            output_names,
            output_defaults: config.outputs.iter().map(|o| o.default).collect(),
            output_latched: config.outputs.iter().map(|o| o.latched).collect(),
            timers,
            timer_presets,
            table,
            overrides,
            faults,
            max_retries: config.max_retries.unwrap_or(default_max_retries),
            acknowledge_input: config.acknowledge_input.clone(),
        };

        debug!(
            machine = %definition.name,
            states = definition.states.len(),
            transitions = definition.table.len(),
            overrides = definition.overrides.len(),
            fault_rules = definition.faults.len(),
            "Machine definition validated"
        );
        Ok(definition)
    }

    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of states.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Whether the id names a declared state.
    #[must_use]
    pub fn contains(&self, id: StateId) -> bool {
        id.index() < self.states.len()
    }

    /// State with its body.
    #[must_use]
    pub fn state(&self, id: StateId) -> Option<&StateDef> {
        self.states.get(id.index())
    }

    /// Look up a state id by name.
    #[must_use]
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.states
            .iter()
            .position(|s| s.name == name)
            .map(state_id)
    }

    /// Name of a state, or `"?"` for ids outside the definition.
    #[must_use]
    pub fn state_name(&self, id: StateId) -> &str {
        self.state(id).map_or("?", |s| s.name.as_str())
    }

    /// Iterate over `(id, state)` pairs in declaration order.
    pub fn states(&self) -> impl Iterator<Item = (StateId, &StateDef)> {
        self.states
            .iter()
            .enumerate()
            .map(|(i, s)| (state_id(i), s))
    }

    /// State entered at creation and after reset.
    #[must_use]
    pub fn initial(&self) -> StateId {
        self.initial
    }

    /// State entered on unknown-state errors.
    #[must_use]
    pub fn fault_state(&self) -> StateId {
        self.fault_state
    }

    /// Declared input names.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared output names.
    #[must_use]
    pub fn output_names(&self) -> &Arc<[String]> {
        &self.output_names
    }

    /// Default value of the output at a position.
    #[must_use]
    pub fn output_default(&self, index: usize) -> Signal {
        self.output_defaults.get(index).copied().unwrap_or_default()
    }

    /// Whether the output at a position keeps its value across cycles.
    #[must_use]
    pub fn is_latched(&self, index: usize) -> bool {
        self.output_latched.get(index).copied().unwrap_or(false)
    }

    /// Output image holding every default.
    #[must_use]
    pub fn default_outputs(&self) -> Outputs {
        Outputs::new(Arc::clone(&self.output_names), self.output_defaults.clone())
    }

    /// Timer set every controller starts from, all stopped.
    #[must_use]
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Configured presets in timer-id order.
    #[must_use]
    pub fn timer_presets(&self) -> &[Duration] {
        &self.timer_presets
    }

    /// Transition table.
    #[must_use]
    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Safety override layer.
    #[must_use]
    pub fn overrides(&self) -> &SafetyLayer {
        &self.overrides
    }

    /// Operational fault rules.
    #[must_use]
    pub fn fault_rules(&self) -> &[FaultRule] {
        &self.faults
    }

    /// Retry budget of the fault latch.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Input whose rising edge acknowledges the fault latch.
    #[must_use]
    pub fn acknowledge_input(&self) -> Option<&str> {
        self.acknowledge_input.as_deref()
    }
}

impl TryFrom<&MachineConfig> for MachineDefinition {
    type Error = ConfigError;

    fn try_from(config: &MachineConfig) -> Result<Self, Self::Error> {
        Self::from_config(config)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn state_id(index: usize) -> StateId {
    // Callers only pass positions of validated state lists (< u16::MAX).
    StateId::from_raw(index as u16)
}

fn index_names<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> ConfigResult<BTreeMap<&'a str, usize>> {
    let mut map = BTreeMap::new();
    for (i, name) in names.enumerate() {
        if map.insert(name, i).is_some() {
            return Err(ConfigError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(map)
}

fn check_reachability(
    states: &[StateDef],
    table: &TransitionTable,
    overrides: &SafetyLayer,
    initial: StateId,
    fault_state: StateId,
) -> ConfigResult<()> {
    let n = states.len();
    let mut forward: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for t in table.iter() {
        forward[t.source.index()].insert(t.target.index());
    }
    // An override can fire from any state.
    for rule in overrides.rules() {
        for edges in &mut forward {
            edges.insert(rule.target.index());
        }
    }

    let mut backward: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for (from, edges) in forward.iter().enumerate() {
        for &to in edges {
            backward[to].insert(from);
        }
    }

    let first_missing = |seen: &[bool]| seen.iter().position(|s| !s).map(|i| states[i].name.clone());

    if let Some(name) = first_missing(&bfs(&forward, initial.index())) {
        return Err(ConfigError::Unreachable(name));
    }
    if let Some(name) = first_missing(&bfs(&backward, initial.index())) {
        return Err(ConfigError::CannotReachInitial(name));
    }
    if let Some(name) = first_missing(&bfs(&backward, fault_state.index())) {
        return Err(ConfigError::CannotReachFault(name));
    }
    Ok(())
}

fn bfs(edges: &[HashSet<usize>], start: usize) -> Vec<bool> {
    let mut seen = vec![false; edges.len()];
    let mut queue = VecDeque::from([start]);
    seen[start] = true;
    while let Some(node) = queue.pop_front() {
        for &next in &edges[node] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    seen
}

/// Assemble a machine definition in code.
///
/// # Example
///
/// ```
/// use fsm_engine::definition::MachineBuilder;
/// use std::time::Duration;
///
/// let definition = MachineBuilder::new("press", "Idle", "Fault")
///     .input("start")
///     .input("reset")
///     .output("motor", false)
///     .timer("T1", Duration::from_secs(2))
///     .state("Idle")
///     .state_output("Running", "motor", true)
///     .state_timer("Running", "T1")
///     .state("Fault")
///     .transition("Idle", "Running", "start")
///     .transition("Running", "Idle", "expired(T1)")
///     .transition("Running", "Fault", "faulted")
///     .transition("Fault", "Idle", "reset && !faulted")
///     .build()
///     .unwrap();
///
/// assert_eq!(definition.state_count(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MachineBuilder {
    config: MachineConfig,
}

impl MachineBuilder {
    /// Start a definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        initial: impl Into<String>,
        fault_state: impl Into<String>,
    ) -> Self {
        Self {
            config: MachineConfig {
                name: name.into(),
                initial: initial.into(),
                fault_state: fault_state.into(),
                max_retries: None,
                acknowledge_input: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
                timers: Vec::new(),
                states: Vec::new(),
                transitions: Vec::new(),
                overrides: Vec::new(),
                faults: Vec::new(),
            },
        }
    }

    /// Set the retry budget.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = Some(max_retries);
        self
    }

    /// Name the input whose rising edge acknowledges faults.
    #[must_use]
    pub fn acknowledge_input(mut self, input: impl Into<String>) -> Self {
        self.config.acknowledge_input = Some(input.into());
        self
    }

    /// Declare an input.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.config.inputs.push(name.into());
        self
    }

    /// Declare an output with its default value.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, default: impl Into<Signal>) -> Self {
        self.config.outputs.push(OutputConfig {
            name: name.into(),
            default: default.into(),
            latched: false,
        });
        self
    }

    /// Declare an output that keeps its value across cycles.
    #[must_use]
    pub fn latched_output(mut self, name: impl Into<String>, default: impl Into<Signal>) -> Self {
        self.config.outputs.push(OutputConfig {
            name: name.into(),
            default: default.into(),
            latched: true,
        });
        self
    }

    /// Declare a timer.
    #[must_use]
    pub fn timer(mut self, name: impl Into<String>, preset: Duration) -> Self {
        self.config.timers.push(TimerConfig {
            name: name.into(),
            preset,
        });
        self
    }

    /// Declare a state (no-op if it already exists).
    #[must_use]
    pub fn state(mut self, name: &str) -> Self {
        self.state_entry(name);
        self
    }

    /// Make a state write a constant to an output.
    #[must_use]
    pub fn state_output(mut self, state: &str, output: &str, value: impl Into<Signal>) -> Self {
        self.state_entry(state)
            .outputs
            .insert(output.to_string(), OutputValueConfig::Const(value.into()));
        self
    }

    /// Make a state copy an input to an output.
    #[must_use]
    pub fn state_follow(mut self, state: &str, output: &str, input: &str) -> Self {
        self.state_entry(state).outputs.insert(
            output.to_string(),
            OutputValueConfig::Follow {
                input: input.to_string(),
            },
        );
        self
    }

    /// Make a state run a timer.
    #[must_use]
    pub fn state_timer(mut self, state: &str, timer: &str) -> Self {
        self.state_entry(state).timers.push(timer.to_string());
        self
    }

    /// Add a transition with declaration-order priority.
    #[must_use]
    pub fn transition(mut self, from: &str, to: &str, when: impl Into<String>) -> Self {
        self.config.transitions.push(TransitionConfig {
            from: from.to_string(),
            to: to.to_string(),
            when: when.into(),
            priority: None,
        });
        self
    }

    /// Add a transition with an explicit priority.
    #[must_use]
    pub fn transition_with_priority(
        mut self,
        from: &str,
        to: &str,
        when: impl Into<String>,
        priority: u32,
    ) -> Self {
        self.config.transitions.push(TransitionConfig {
            from: from.to_string(),
            to: to.to_string(),
            when: when.into(),
            priority: Some(priority),
        });
        self
    }

    /// Add a safety override.
    #[must_use]
    pub fn safety_override(mut self, name: &str, when: impl Into<String>, force: &str) -> Self {
        self.config.overrides.push(OverrideConfig {
            name: name.to_string(),
            when: when.into(),
            force: force.to_string(),
            outputs: BTreeMap::new(),
        });
        self
    }

    /// Make an override write an output while active. The override must
    /// already be declared.
    #[must_use]
    pub fn override_output(mut self, name: &str, output: &str, value: impl Into<Signal>) -> Self {
        if let Some(rule) = self.config.overrides.iter_mut().find(|o| o.name == name) {
            rule.outputs.insert(output.to_string(), value.into());
        }
        self
    }

    /// Add an operational fault rule evaluated in every state.
    #[must_use]
    pub fn fault_rule(mut self, code: u32, message: &str, when: impl Into<String>) -> Self {
        self.config.faults.push(FaultRuleConfig {
            code,
            message: message.to_string(),
            when: when.into(),
            active_in: Vec::new(),
            auto_acknowledge: false,
        });
        self
    }

    /// Add a fully specified fault rule.
    #[must_use]
    pub fn fault_rule_config(mut self, rule: FaultRuleConfig) -> Self {
        self.config.faults.push(rule);
        self
    }

    /// The configuration assembled so far.
    #[must_use]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Give up the configuration without validating it.
    #[must_use]
    pub fn into_config(self) -> MachineConfig {
        self.config
    }

    /// Validate into a definition.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn build(self) -> ConfigResult<MachineDefinition> {
        MachineDefinition::from_config(&self.config)
    }

    fn state_entry(&mut self, name: &str) -> &mut StateConfig {
        let pos = match self.config.states.iter().position(|s| s.name == name) {
            Some(pos) => pos,
            None => {
                self.config.states.push(StateConfig {
                    name: name.to_string(),
                    outputs: BTreeMap::new(),
                    timers: Vec::new(),
                });
                self.config.states.len() - 1
            }
        };
        &mut self.config.states[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conveyor() -> MachineBuilder {
        MachineBuilder::new("conveyor", "Idle", "Fault")
            .input("start")
            .input("stop")
            .input("estop")
            .input("reset")
            .output("motor", false)
            .output("lamp", false)
            .timer("T1", Duration::from_millis(200))
            .state("Idle")
            .state_output("Running", "motor", true)
            .state_timer("Stopping", "T1")
            .state_output("Fault", "lamp", true)
            .transition("Idle", "Running", "start")
            .transition("Running", "Stopping", "stop")
            .transition("Stopping", "Idle", "expired(T1)")
            .transition("Running", "Fault", "faulted")
            .transition("Fault", "Idle", "reset && !faulted")
            .safety_override("estop", "estop", "Fault")
    }

    #[test]
    fn test_builder_compiles() {
        let def = conveyor().build().unwrap();
        assert_eq!(def.name(), "conveyor");
        assert_eq!(def.state_count(), 4);
        assert_eq!(def.state_name(def.initial()), "Idle");
        assert_eq!(def.state_name(def.fault_state()), "Fault");
        assert_eq!(def.table().len(), 5);
        assert_eq!(def.overrides().len(), 1);
        assert_eq!(def.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(def.timers().len(), 1);
        assert_eq!(def.state_name(StateId::from_raw(99)), "?");

        let running = def.state(def.state_id("Running").unwrap()).unwrap();
        assert_eq!(running.outputs, vec![(0, OutputValue::Const(Signal::Bool(true)))]);
    }

    #[test]
    fn test_default_priority_is_declaration_index() {
        let def = conveyor().build().unwrap();
        let running = def.state_id("Running").unwrap();
        let row = def.table().transitions_from(running);
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].priority, 0);
        assert_eq!(row[0].target, def.state_id("Stopping").unwrap());
        assert_eq!(row[1].priority, 1);
    }

    #[test]
    fn test_explicit_priority_collides_with_default() {
        let def = conveyor()
            .transition_with_priority("Idle", "Fault", "faulted", 0)
            .transition_with_priority("Idle", "Running", "start", 5)
            .build();
        // "start" got default priority 0 as the first Idle transition.
        assert!(matches!(
            def,
            Err(ConfigError::DuplicatePriority { ref state, priority: 0 }) if state == "Idle"
        ));
    }

    #[test]
    fn test_rejects_unknown_references() {
        let err = conveyor().transition("Idle", "Nowhere", "start").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownState { ref name, .. } if name == "Nowhere"));

        let err = conveyor().transition("Idle", "Running", "go").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInput { ref name, .. } if name == "go"));

        let err = conveyor()
            .transition("Idle", "Running", "expired(T9)")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTimer { ref name, .. } if name == "T9"));

        let err = conveyor().state_output("Idle", "horn", true).build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOutput { ref name, .. } if name == "horn"));

        let err = conveyor().state_follow("Idle", "motor", "speed").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInput { ref name, .. } if name == "speed"));
    }

    #[test]
    fn test_rejects_bad_names() {
        let err = conveyor().input("start").build().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { kind: "input", .. }));

        let err = conveyor().input("faulted").build().unwrap_err();
        assert!(matches!(err, ConfigError::ReservedName(ref n) if n == "faulted"));

        let err = conveyor()
            .timer("T1", Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { kind: "timer", .. }));
    }

    #[test]
    fn test_rejects_invalid_guard_and_zero_preset() {
        let err = conveyor().transition("Idle", "Running", "start &&").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGuard { .. }));

        let err = conveyor().timer("T0", Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPreset(ref n) if n == "T0"));
    }

    #[test]
    fn test_override_must_be_input_only() {
        let err = conveyor()
            .safety_override("slow", "estop || expired(T1)", "Fault")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OverrideNotInputOnly { ref rule } if rule == "slow"));

        let err = conveyor()
            .safety_override("latched", "faulted", "Fault")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OverrideNotInputOnly { .. }));
    }

    #[test]
    fn test_reachability() {
        // Orphan: nothing leads to it.
        let err = conveyor().state("Orphan").build().unwrap_err();
        assert!(matches!(err, ConfigError::Unreachable(ref n) if n == "Orphan"));

        // Sink without override: can reach neither initial nor fault.
        let err = MachineBuilder::new("m", "A", "F")
            .input("go")
            .state("A")
            .state("B")
            .state("F")
            .transition("A", "B", "go")
            .transition("A", "F", "faulted")
            .transition("F", "A", "true")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::CannotReachInitial(ref n) if n == "B"));

        // Fault state unreachable except through an override: accepted.
        let def = MachineBuilder::new("m", "A", "F")
            .input("go")
            .input("estop")
            .state("A")
            .state("B")
            .state("F")
            .transition("A", "B", "go")
            .transition("B", "A", "!go")
            .transition("F", "A", "!estop")
            .safety_override("estop", "estop", "F")
            .build();
        assert!(def.is_ok());

        // Without the override F is unreachable from A.
        let err = MachineBuilder::new("m", "A", "F")
            .input("go")
            .state("A")
            .state("B")
            .state("F")
            .transition("A", "B", "go")
            .transition("B", "A", "!go")
            .transition("F", "A", "true")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Unreachable(ref n) if n == "F"));
    }

    #[test]
    fn test_fault_reached_through_initial() {
        // C has no direct edge to F but gets there through A.
        let def = MachineBuilder::new("m", "A", "F")
            .input("go")
            .state("A")
            .state("B")
            .state("F")
            .state("C")
            .transition("A", "B", "go")
            .transition("B", "A", "!go")
            .transition("A", "F", "faulted")
            .transition("F", "A", "true")
            .transition("B", "C", "go")
            .transition("C", "A", "true")
            .build();
        assert!(def.is_ok());
    }

    #[test]
    fn test_fault_rules_and_retry_default() {
        let def = conveyor()
            .acknowledge_input("reset")
            .fault_rule_config(FaultRuleConfig {
                code: 2001,
                message: "jam".to_string(),
                when: "stop && start".to_string(),
                active_in: vec!["Running".to_string()],
                auto_acknowledge: true,
            })
            .max_retries(5);
        let def = MachineDefinition::compile(def.config(), 9).unwrap();
        assert_eq!(def.max_retries(), 5);
        assert_eq!(def.acknowledge_input(), Some("reset"));
        let rule = &def.fault_rules()[0];
        assert!(rule.applies_in(def.state_id("Running").unwrap()));
        assert!(!rule.applies_in(def.state_id("Idle").unwrap()));

        let def = MachineDefinition::compile(conveyor().config(), 9).unwrap();
        assert_eq!(def.max_retries(), 9);

        let err = conveyor().acknowledge_input("ack").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInput { ref context, .. } if context == "acknowledge_input"));
    }

    #[test]
    fn test_too_many_timers() {
        let mut config = conveyor().into_config();
        config.timers = (0..=usize::from(u16::MAX))
            .map(|i| TimerConfig {
                name: format!("T{i}"),
                preset: Duration::from_millis(10),
            })
            .collect();

        let err = MachineDefinition::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooManyTimers { count: 65_536, limit: 65_535, .. }
        ));
    }

    #[test]
    fn test_no_states() {
        let err = MachineBuilder::new("empty", "A", "A").build().unwrap_err();
        assert!(matches!(err, ConfigError::NoStates { .. }));
    }

    #[test]
    fn test_output_value_resolution() {
        let inputs = Inputs::new().with("setpoint", 12.5);
        assert_eq!(
            OutputValue::Follow("setpoint".to_string()).resolve(&inputs, Signal::Number(0.0)),
            Signal::Number(12.5)
        );
        assert_eq!(
            OutputValue::Follow("missing".to_string()).resolve(&inputs, Signal::Number(3.0)),
            Signal::Number(0.0)
        );
        assert_eq!(
            OutputValue::Const(Signal::Bool(true)).resolve(&inputs, Signal::Bool(false)),
            Signal::Bool(true)
        );
    }
}
