//! Transition table.
//!
//! One row per state. Each row lists that state's outgoing transitions
//! sorted by priority (lower number first). Evaluation walks the row and
//! returns the first transition whose guard holds, so at most one
//! transition fires per cycle.

use crate::guard::{Guard, GuardContext};
use fsm_common::state::StateId;
use serde::Serialize;

/// A guarded transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Source state.
    pub source: StateId,
    /// Target state.
    pub target: StateId,
    /// Guard.
    pub guard: Guard,
    /// Evaluation priority within the source state (lower first).
    pub priority: u32,
}

impl Transition {
    /// Whether source and target are the same state.
    #[must_use]
    pub fn is_self_transition(&self) -> bool {
        self.source == self.target
    }

    /// Copyable summary for reports.
    #[must_use]
    pub fn fired(&self) -> FiredTransition {
        FiredTransition {
            source: self.source,
            target: self.target,
            priority: self.priority,
        }
    }
}

/// Transition that fired in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiredTransition {
    /// Source state.
    pub source: StateId,
    /// Target state.
    pub target: StateId,
    /// Priority of the transition.
    pub priority: u32,
}

/// Per-state ordered transition lists.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    rows: Vec<Vec<Transition>>,
}

impl TransitionTable {
    /// Create a table with an empty row for each state.
    #[must_use]
    pub fn new(state_count: usize) -> Self {
        Self {
            rows: vec![Vec::new(); state_count],
        }
    }

    /// Insert a transition, keeping its row sorted by priority.
    ///
    /// Returns `false` (and leaves the table unchanged) if the source row
    /// does not exist or already holds a transition with that priority.
    pub fn insert(&mut self, transition: Transition) -> bool {
        let Some(row) = self.rows.get_mut(transition.source.index()) else {
            return false;
        };
        match row.binary_search_by_key(&transition.priority, |t| t.priority) {
            Ok(_) => false,
            Err(pos) => {
                row.insert(pos, transition);
                true
            }
        }
    }

    /// First transition out of `state` whose guard holds.
    ///
    /// Unknown states have no transitions.
    #[must_use]
    pub fn next(&self, state: StateId, ctx: &GuardContext<'_>) -> Option<&Transition> {
        self.transitions_from(state)
            .iter()
            .find(|t| t.guard.evaluate(ctx))
    }

    /// Outgoing transitions of a state in evaluation order.
    #[must_use]
    pub fn transitions_from(&self, state: StateId) -> &[Transition] {
        self.rows.get(state.index()).map_or(&[], Vec::as_slice)
    }

    /// Iterate over every transition, row by row.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.rows.iter().flatten()
    }

    /// Total number of transitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Whether the table holds no transition.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }
}
