//! Configuration structures for the engine and for machine definitions.
//!
//! Both are TOML documents. [`EngineConfig`] describes how controllers are
//! driven (cycle time, overrun policy, which machines to load).
//! [`MachineConfig`] is the declarative description of one controller:
//! its signals, timers, states, transitions, safety overrides and fault
//! rules. A `MachineConfig` is only raw data; the engine validates it into
//! an executable definition.

use crate::error::ConfigError;
use crate::signal::{Inputs, Signal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default retry budget for operational faults.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the control cycle.
    #[serde(with = "humantime_serde")]
    pub cycle_time: Duration,

    /// Maximum tolerated execution time beyond the cycle period.
    #[serde(with = "humantime_serde")]
    pub max_overrun: Duration,

    /// Controllers to instantiate.
    pub controllers: Vec<ControllerEntry>,

    /// Fault handling policy.
    pub fault_policy: FaultPolicyConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_millis(100),
            max_overrun: Duration::from_millis(50),
            controllers: Vec::new(),
            fault_policy: FaultPolicyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Policy for handling cycle overruns in the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Stop the driver on an overrun beyond `max_overrun`.
    Fault,
    /// Log a warning and continue.
    #[default]
    Warn,
    /// Silently ignore overruns.
    Ignore,
}

/// Fault handling policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPolicyConfig {
    /// How the driver reacts to cycle overruns.
    pub on_overrun: OverrunPolicy,
    /// Retry budget used when a machine does not set its own.
    pub max_retries: u32,
}

impl Default for FaultPolicyConfig {
    fn default() -> Self {
        Self {
            on_overrun: OverrunPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable execution-time collection.
    pub enabled: bool,

    /// Size of the execution-time ring buffer.
    pub histogram_size: usize,

    /// Percentiles reported in the shutdown summary.
    pub percentiles: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_size: 10_000,
            percentiles: vec![50.0, 99.0, 99.9],
        }
    }
}

/// One controller instance to load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEntry {
    /// Instance name (log target and lookup key).
    pub name: String,
    /// Path to the machine definition.
    pub machine: PathBuf,
    /// Optional input script driving this instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        let mut config = Self::from_toml(&content)?;
        // Machine paths are relative to the config file.
        if let Some(dir) = path.parent() {
            for entry in &mut config.controllers {
                if entry.machine.is_relative() {
                    entry.machine = dir.join(&entry.machine);
                }
                if let Some(script) = entry.script.as_mut() {
                    if script.is_relative() {
                        *script = dir.join(&*script);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Declarative description of one state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine name.
    pub name: String,

    /// State entered at creation and after reset.
    pub initial: String,

    /// State entered on unknown-state errors; target of fault handling.
    pub fault_state: String,

    /// Retry budget for operational faults (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Input whose rising edge acknowledges the fault latch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge_input: Option<String>,

    /// Declared input names.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    /// Declared timers.
    #[serde(default)]
    pub timers: Vec<TimerConfig>,

    /// States, in identifier order.
    pub states: Vec<StateConfig>,

    /// Guarded transitions.
    #[serde(default)]
    pub transitions: Vec<TransitionConfig>,

    /// Safety overrides, most critical first.
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,

    /// Operational fault rules.
    #[serde(default)]
    pub faults: Vec<FaultRuleConfig>,
}

impl MachineConfig {
    /// Load a machine definition from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        let config = Self::from_toml(&content)?;
        debug!(machine = %config.name, ?path, "Machine definition loaded");
        Ok(config)
    }

    /// Parse a machine definition from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }
}

/// Output declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output name.
    pub name: String,
    /// Value written at the start of every cycle.
    #[serde(default)]
    pub default: Signal,
    /// Keep the previous cycle's value instead of the default.
    #[serde(default)]
    pub latched: bool,
}

/// Timer declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Timer name.
    pub name: String,
    /// Configured duration.
    #[serde(with = "humantime_serde")]
    pub preset: Duration,
}

/// Value a state body writes to an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValueConfig {
    /// Copy the value of an input.
    Follow {
        /// Input to follow.
        input: String,
    },
    /// Constant value.
    Const(Signal),
}

/// State declaration with its body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// State name.
    pub name: String,
    /// Outputs written while the state is in effect.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValueConfig>,
    /// Timers started (and kept running) while the state is in effect.
    #[serde(default)]
    pub timers: Vec<String>,
}

/// Transition declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Source state.
    pub from: String,
    /// Target state.
    pub to: String,
    /// Guard expression.
    pub when: String,
    /// Evaluation priority (lower first); defaults to declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

/// Safety override declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideConfig {
    /// Rule name.
    pub name: String,
    /// Input-only guard expression.
    pub when: String,
    /// State forced while the guard holds.
    pub force: String,
    /// Outputs written while the override is active.
    #[serde(default)]
    pub outputs: BTreeMap<String, Signal>,
}

/// Operational fault rule declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRuleConfig {
    /// Fault code.
    pub code: u32,
    /// Operator message.
    pub message: String,
    /// Fault condition.
    pub when: String,
    /// Only evaluate the rule in these states (all states when empty).
    #[serde(default)]
    pub active_in: Vec<String>,
    /// Acknowledge automatically once the condition clears.
    #[serde(default)]
    pub auto_acknowledge: bool,
}

/// Scripted input sequence used to drive a controller offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputScript {
    /// Steps executed in order.
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

/// One step of an input script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Number of cycles the inputs are held.
    #[serde(default = "one")]
    pub cycles: u32,
    /// Inputs asserted during the step.
    #[serde(default)]
    pub inputs: Inputs,
}

fn one() -> u32 {
    1
}

impl InputScript {
    /// Load a script from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        Self::from_toml(&content)
    }

    /// Parse a script from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Total number of cycles covered by the script.
    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.steps.iter().map(|s| u64::from(s.cycles)).sum()
    }

    /// Inputs for a zero-based cycle number, if the script covers it.
    #[must_use]
    pub fn inputs_at(&self, cycle: u64) -> Option<&Inputs> {
        let mut remaining = cycle;
        for step in &self.steps {
            let len = u64::from(step.cycles);
            if remaining < len {
                return Some(&step.inputs);
            }
            remaining -= len;
        }
        None
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
