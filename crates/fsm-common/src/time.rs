//! Cycle counting.
//!
//! The engine never reads a wall clock. Time advances only through the
//! cycle duration handed to each `advance` call, and cycles are numbered
//! by the controller that executes them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic index of an executed control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CycleIndex(pub u64);

impl CycleIndex {
    /// The index following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for CycleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
