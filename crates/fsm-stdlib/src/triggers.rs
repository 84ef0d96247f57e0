//! Edge triggers.
//!
//! The engine raises faults on the cycle a fault condition *appears*, not
//! on every cycle it persists, and reacts to acknowledge buttons on their
//! press. Both need edge detection across scan cycles:
//! - [`RTrig`] - rising edge (FALSE→TRUE)
//! - [`FTrig`] - falling edge (TRUE→FALSE)

use serde::{Deserialize, Serialize};

/// Rising edge trigger (`R_TRIG`).
///
/// `Q` is TRUE for exactly one cycle when `CLK` goes from FALSE to TRUE.
///
/// ```text
/// CLK  ___/‾‾‾‾‾‾\___/‾‾‾
/// Q    ___/‾\_________/‾\_
/// ```
///
/// # Example
///
/// ```
/// use fsm_stdlib::triggers::RTrig;
///
/// let mut rtrig = RTrig::new();
/// assert!(!rtrig.call(false));
/// assert!(rtrig.call(true));
/// assert!(!rtrig.call(true));
/// assert!(!rtrig.call(false));
/// assert!(rtrig.call(true));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RTrig {
    /// Previous CLK value (M in IEC terms).
    prev_clk: bool,
}

impl RTrig {
    /// Create a new trigger with CLK memory FALSE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one scan cycle; returns `true` on a rising edge.
    pub fn call(&mut self, clk: bool) -> bool {
        let q = clk && !self.prev_clk;
        self.prev_clk = clk;
        q
    }

    /// Forget the previous CLK value.
    pub fn reset(&mut self) {
        self.prev_clk = false;
    }

    /// Previous CLK value.
    #[must_use]
    pub fn prev_clk(&self) -> bool {
        self.prev_clk
    }
}

/// Falling edge trigger (`F_TRIG`).
///
/// `Q` is TRUE for exactly one cycle when `CLK` goes from TRUE to FALSE.
///
/// ```text
/// CLK  ___/‾‾‾‾‾‾\___/‾‾‾
/// Q    __________/‾\_____
/// ```
///
/// # Example
///
/// ```
/// use fsm_stdlib::triggers::FTrig;
///
/// let mut ftrig = FTrig::new();
/// assert!(!ftrig.call(true));
/// assert!(ftrig.call(false));
/// assert!(!ftrig.call(false));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FTrig {
    /// Previous CLK value (M in IEC terms).
    prev_clk: bool,
}

impl FTrig {
    /// Create a new trigger with CLK memory FALSE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one scan cycle; returns `true` on a falling edge.
    pub fn call(&mut self, clk: bool) -> bool {
        let q = !clk && self.prev_clk;
        self.prev_clk = clk;
        q
    }

    /// Forget the previous CLK value.
    pub fn reset(&mut self) {
        self.prev_clk = false;
    }

    /// Previous CLK value.
    #[must_use]
    pub fn prev_clk(&self) -> bool {
        self.prev_clk
    }
}
