//! Input and output signal snapshots.
//!
//! A controller samples its inputs once per cycle as an [`Inputs`]
//! snapshot and produces an [`Outputs`] image. Both hold [`Signal`]
//! values, which are either discrete (`BOOL`) or numeric (setpoints,
//! actuator commands).
//!
//! Outputs are dense: their order is fixed by the machine definition, so
//! the engine writes them by position and collaborators read them by name.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single process signal value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    /// Discrete signal.
    Bool(bool),
    /// Numeric signal (setpoint, measurement, actuator command).
    Number(f64),
}

impl Default for Signal {
    fn default() -> Self {
        Self::Bool(false)
    }
}

impl Signal {
    /// Truthiness: `true`, or any non-zero number.
    #[must_use]
    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Number(n) => n != 0.0 && !n.is_nan(),
        }
    }

    /// Numeric view: booleans map to `1.0` / `0.0`.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(true) => 1.0,
            Self::Bool(false) => 0.0,
            Self::Number(n) => n,
        }
    }

    /// The neutral ("off") value of the same kind.
    #[must_use]
    pub fn neutral(self) -> Self {
        match self {
            Self::Bool(_) => Self::Bool(false),
            Self::Number(_) => Self::Number(0.0),
        }
    }
}

impl From<bool> for Signal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Signal {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Input snapshot sampled at the start of a cycle.
///
/// Names that are not present read as the neutral value, so a caller only
/// has to provide the signals that are asserted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inputs {
    values: BTreeMap<String, Signal>,
}

impl Inputs {
    /// Create an empty snapshot (every input neutral).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Signal>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a single input.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Signal>) {
        self.values.insert(name.into(), value.into());
    }

    /// Raw value of an input, if provided.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Signal> {
        self.values.get(name).copied()
    }

    /// Discrete view of an input (`false` when absent).
    #[must_use]
    pub fn digital(&self, name: &str) -> bool {
        self.get(name).is_some_and(Signal::as_bool)
    }

    /// Numeric view of an input (`0.0` when absent).
    #[must_use]
    pub fn analog(&self, name: &str) -> f64 {
        self.get(name).map_or(0.0, Signal::as_f64)
    }

    /// Overlay another snapshot on top of this one.
    pub fn merge(&mut self, other: &Inputs) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), *value);
        }
    }

    /// Iterate over provided inputs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Signal)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of provided inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no input is provided.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Signal>> FromIterator<(K, V)> for Inputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut inputs = Self::new();
        for (k, v) in iter {
            inputs.set(k, v);
        }
        inputs
    }
}

/// Output image computed by one cycle.
///
/// The name table is shared with the machine definition; only the values
/// are copied per cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs {
    names: Arc<[String]>,
    values: Vec<Signal>,
}

impl Outputs {
    /// Create an output image from a name table and initial values.
    ///
    /// Missing values are filled with `FALSE`; extra values are dropped.
    #[must_use]
    pub fn new(names: Arc<[String]>, mut values: Vec<Signal>) -> Self {
        values.resize(names.len(), Signal::default());
        Self { names, values }
    }

    /// Position of a named output.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Value of a named output.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Signal> {
        self.position(name).map(|i| self.values[i])
    }

    /// Discrete view of a named output (`false` when undeclared).
    #[must_use]
    pub fn digital(&self, name: &str) -> bool {
        self.get(name).is_some_and(Signal::as_bool)
    }

    /// Numeric view of a named output (`0.0` when undeclared).
    #[must_use]
    pub fn analog(&self, name: &str) -> f64 {
        self.get(name).map_or(0.0, Signal::as_f64)
    }

    /// Value at a position.
    #[must_use]
    pub fn value_at(&self, index: usize) -> Option<Signal> {
        self.values.get(index).copied()
    }

    /// Write the value at a position. Out-of-range writes are ignored.
    #[inline]
    pub fn set_at(&mut self, index: usize, value: Signal) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    /// Iterate over `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Signal)> {
        self.names
            .iter()
            .zip(self.values.iter())
            .map(|(n, v)| (n.as_str(), *v))
    }

    /// Number of declared outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no output is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Outputs {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}
