//! Sticky fault record with retry accounting and acknowledgment.
//!
//! # State Diagram
//!
//! ```text
//!            raise (retries < max)
//!   CLEAR ─────────────────────────► LATCHED ◄──┐ raise (retries < max)
//!     ▲                                │  │     │ replaces code/message
//!     │  acknowledge + condition clear │  └─────┘
//!     ├────────────────────────────────┘
//!     │                                │ raise (retries == max)
//!     │                                ▼
//!     │  acknowledge + condition clear
//!     └──────────────────────────── RETRY_EXCEEDED
//! ```
//!
//! Every raise from `CLEAR` or `LATCHED` counts one retry. The count
//! survives a `LATCHED → CLEAR` acknowledgment, so a fault that keeps coming
//! back after automatic recovery eventually needs an operator. Only an
//! acknowledgment out of `RETRY_EXCEEDED`, or [`FaultLatch::reset`], zeroes it.
//! Raises in `RETRY_EXCEEDED` are ignored so the operator sees the first
//! terminal cause.

use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Fault code reserved for unknown-state errors.
pub const UNKNOWN_STATE_FAULT_CODE: u32 = 0xFFFF;

/// Latch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatchState {
    /// No fault recorded.
    #[default]
    Clear,
    /// Fault recorded, retries remain.
    Latched,
    /// Retry budget exhausted; manual intervention required.
    RetryExceeded,
}

impl fmt::Display for LatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => write!(f, "CLEAR"),
            Self::Latched => write!(f, "LATCHED"),
            Self::RetryExceeded => write!(f, "RETRY_EXCEEDED"),
        }
    }
}

/// The fault currently held by the latch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    /// Fault code.
    pub code: u32,
    /// Operator message.
    pub message: String,
}

/// Result of an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AckOutcome {
    /// The latch was cleared.
    Cleared,
    /// The fault condition is still present; nothing changed.
    ConditionPresent,
    /// There was nothing to acknowledge.
    NotLatched,
}

/// Copyable view of the latch used by guards and cycle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FaultStatus {
    /// Latch state.
    pub state: LatchState,
    /// Code of the held fault.
    pub code: Option<u32>,
    /// Retries counted so far.
    pub retries: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Whether a fault condition is currently present.
    pub condition_present: bool,
}

impl FaultStatus {
    /// Whether the latch is not clear.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != LatchState::Clear
    }
}

/// Sticky fault latch of one controller.
#[derive(Debug, Clone)]
pub struct FaultLatch {
    state: LatchState,
    record: Option<FaultRecord>,
    retries: u32,
    max_retries: u32,
    condition_present: bool,
}

impl FaultLatch {
    /// Create a clear latch with the given retry budget.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: LatchState::Clear,
            record: None,
            retries: 0,
            max_retries,
            condition_present: false,
        }
    }

    /// Record an operational fault.
    ///
    /// Returns the latch state after the raise.
    pub fn raise(&mut self, code: u32, message: impl Into<String>) -> LatchState {
        if self.state == LatchState::RetryExceeded {
            debug!(code, "Fault raise ignored, manual intervention pending");
            return self.state;
        }

        let message = message.into();
        if self.retries >= self.max_retries {
            error!(
                code,
                %message,
                retries = self.retries,
                max_retries = self.max_retries,
                "Retry budget exhausted - manual intervention required"
            );
            self.state = LatchState::RetryExceeded;
        } else {
            self.retries += 1;
            warn!(
                code,
                %message,
                retries = self.retries,
                max_retries = self.max_retries,
                "Fault latched"
            );
            self.state = LatchState::Latched;
        }
        self.record = Some(FaultRecord { code, message });
        self.state
    }

    /// Record a fault that requires manual intervention regardless of the
    /// retry budget.
    pub fn raise_terminal(&mut self, code: u32, message: impl Into<String>) {
        if self.state == LatchState::RetryExceeded {
            debug!(code, "Terminal fault ignored, manual intervention pending");
            return;
        }

        let message = message.into();
        error!(code, %message, "Terminal fault - manual intervention required");
        self.state = LatchState::RetryExceeded;
        self.record = Some(FaultRecord { code, message });
    }

    /// Update whether the fault condition is currently present.
    pub fn set_condition(&mut self, present: bool) {
        self.condition_present = present;
    }

    /// Acknowledge the held fault.
    ///
    /// Clears the latch only when the fault condition is gone.
    pub fn acknowledge(&mut self) -> AckOutcome {
        if self.state == LatchState::Clear {
            return AckOutcome::NotLatched;
        }

        if self.condition_present {
            warn!(
                code = self.code(),
                state = %self.state,
                "Acknowledge ignored, fault condition still present"
            );
            return AckOutcome::ConditionPresent;
        }

        if self.state == LatchState::RetryExceeded {
            self.retries = 0;
        }
        info!(code = self.code(), from = %self.state, retries = self.retries, "Fault cleared");
        self.state = LatchState::Clear;
        self.record = None;
        AckOutcome::Cleared
    }

    /// Clear everything, including the retry count.
    pub fn reset(&mut self) {
        self.state = LatchState::Clear;
        self.record = None;
        self.retries = 0;
        self.condition_present = false;
    }

    /// Whether the latch is not clear.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != LatchState::Clear
    }

    /// Current latch state.
    #[must_use]
    pub fn state(&self) -> LatchState {
        self.state
    }

    /// Held fault, if any.
    #[must_use]
    pub fn record(&self) -> Option<&FaultRecord> {
        self.record.as_ref()
    }

    /// Code of the held fault.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        self.record.as_ref().map(|r| r.code)
    }

    /// Retries counted so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the fault condition is currently present.
    #[must_use]
    pub fn condition_present(&self) -> bool {
        self.condition_present
    }

    /// Snapshot for guards and reports.
    #[must_use]
    pub fn status(&self) -> FaultStatus {
        FaultStatus {
            state: self.state,
            code: self.code(),
            retries: self.retries,
            max_retries: self.max_retries,
            condition_present: self.condition_present,
        }
    }
}
