use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors: the engine refuses to start when any of these is found.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The definition declares no states.
    #[error("machine '{machine}' declares no states")]
    NoStates {
        /// Machine name.
        machine: String,
    },

    /// More states than a `StateId` can address.
    #[error("machine '{machine}' declares {count} states (limit {limit})")]
    TooManyStates {
        /// Machine name.
        machine: String,
        /// Declared state count.
        count: usize,
        /// Maximum supported.
        limit: usize,
    },

    /// More timers than a timer id can address.
    #[error("machine '{machine}' declares {count} timers (limit {limit})")]
    TooManyTimers {
        /// Machine name.
        machine: String,
        /// Declared timer count.
        count: usize,
        /// Maximum supported.
        limit: usize,
    },

    /// A name was declared twice.
    #[error("duplicate {kind} '{name}'")]
    DuplicateName {
        /// What kind of item (state, input, output, timer, override).
        kind: &'static str,
        /// The duplicated name.
        name: String,
    },

    /// An input name collides with a guard-language keyword.
    #[error("input name '{0}' is a reserved guard keyword")]
    ReservedName(String),

    /// A referenced state does not exist.
    #[error("{context}: unknown state '{name}'")]
    UnknownState {
        /// Where the reference appeared.
        context: String,
        /// The unknown state name.
        name: String,
    },

    /// A referenced input does not exist.
    #[error("{context}: unknown input '{name}'")]
    UnknownInput {
        /// Where the reference appeared.
        context: String,
        /// The unknown input name.
        name: String,
    },

    /// A referenced output does not exist.
    #[error("{context}: unknown output '{name}'")]
    UnknownOutput {
        /// Where the reference appeared.
        context: String,
        /// The unknown output name.
        name: String,
    },

    /// A referenced timer does not exist.
    #[error("{context}: unknown timer '{name}'")]
    UnknownTimer {
        /// Where the reference appeared.
        context: String,
        /// The unknown timer name.
        name: String,
    },

    /// A guard expression could not be parsed.
    #[error("invalid guard '{expr}': {reason}")]
    InvalidGuard {
        /// The offending expression.
        expr: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Two transitions out of the same state share a priority.
    #[error("state '{state}' has two transitions with priority {priority}")]
    DuplicatePriority {
        /// Source state.
        state: String,
        /// The shared priority.
        priority: u32,
    },

    /// A timer preset of zero would expire before it starts.
    #[error("timer '{0}' has a zero preset")]
    ZeroPreset(String),

    /// A safety override guard references something other than inputs.
    #[error("override '{rule}' may only reference inputs")]
    OverrideNotInputOnly {
        /// Override rule name.
        rule: String,
    },

    /// A state cannot be reached from the initial state.
    #[error("state '{0}' is unreachable from the initial state")]
    Unreachable(String),

    /// A state has no path back to the initial state.
    #[error("state '{0}' cannot reach the initial state")]
    CannotReachInitial(String),

    /// A state has no path to the fault state.
    #[error("state '{0}' cannot reach the fault state")]
    CannotReachFault(String),
}

/// Convenience type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors surfaced by the cycle driver and tooling around the engine.
///
/// The engine's per-cycle `advance` never returns an error; these only
/// occur at setup or in the driver loop.
#[derive(Debug, Error)]
pub enum FsmError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A controller name was not found in the driver.
    #[error("unknown controller '{0}'")]
    UnknownController(String),

    /// Cycle execution exceeded the configured deadline.
    #[error("cycle overrun: expected {expected_ns}ns, actual {actual_ns}ns")]
    CycleOverrun {
        /// Expected cycle time in nanoseconds.
        expected_ns: u64,
        /// Actual cycle time in nanoseconds.
        actual_ns: u64,
    },
}

/// Convenience type alias for driver operations.
pub type FsmResult<T> = Result<T, FsmError>;
