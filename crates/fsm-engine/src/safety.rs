//! Safety override layer.
//!
//! Overrides are standing interlocks (emergency stop, guard door open,
//! light curtain broken). Each rule is an input-only predicate and a state
//! to force. Rules are checked in declaration order, before the state body
//! and the transition table, and the first match wins. An override does not
//! count as a fault: it holds exactly as long as its condition does.

use crate::guard::Guard;
use fsm_common::signal::{Inputs, Signal};
use fsm_common::state::StateId;
use serde::Serialize;
use tracing::trace;

/// One safety override rule.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRule {
    /// Rule name.
    pub name: String,
    /// Input-only condition.
    pub guard: Guard,
    /// State forced while the condition holds.
    pub target: StateId,
    /// Output writes `(position, value)` applied while active.
    pub outputs: Vec<(usize, Signal)>,
}

/// Result of a firing override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ForcedState {
    /// Index of the rule in the layer.
    pub rule: usize,
    /// State that was in effect when the rule fired.
    pub from: StateId,
    /// Forced state.
    pub state: StateId,
}

/// Ordered list of override rules.
#[derive(Debug, Clone, Default)]
pub struct SafetyLayer {
    rules: Vec<OverrideRule>,
}

impl SafetyLayer {
    /// Create a layer from rules in priority order.
    #[must_use]
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    /// Check every rule against the inputs; the first match forces its state.
    ///
    /// The current state does not influence the outcome: an override wins
    /// from every state.
    #[must_use]
    pub fn evaluate(&self, inputs: &Inputs, current: StateId) -> Option<ForcedState> {
        let (rule, matched) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.guard.evaluate_inputs(inputs))?;

        trace!(rule = %matched.name, from = %current, to = %matched.target, "Override matched");
        Some(ForcedState {
            rule,
            from: current,
            state: matched.target,
        })
    }

    /// Rule at an index.
    #[must_use]
    pub fn rule(&self, index: usize) -> Option<&OverrideRule> {
        self.rules.get(index)
    }

    /// All rules in priority order.
    #[must_use]
    pub fn rules(&self) -> &[OverrideRule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the layer has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
