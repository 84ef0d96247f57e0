//! State identifiers for controller instances.
//!
//! Each machine definition declares a closed list of states. A [`StateId`]
//! is the dense position of a state in that list, so the transition table
//! can be indexed directly. Raw ids can also come from outside the engine
//! (e.g. a "go to state" register written by a supervisory system); those
//! are checked against the definition before use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a state within one machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(u16);

impl StateId {
    /// Build an id from a raw register value.
    ///
    /// The value is not validated here; the controller treats ids that do
    /// not name a declared state as an unknown-state fault.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw register value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Position in the definition's state list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}
