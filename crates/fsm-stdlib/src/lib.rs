//! IEC 61131-3 style building blocks used by the scan-fsm engine.
//!
//! - **Timers** ([`timers`]): on-delay cycle timers and the per-controller [`TimerService`]
//! - **Triggers** ([`triggers`]): `R_TRIG`, `F_TRIG`
//!
//! # Example
//!
//! ```
//! use fsm_stdlib::timers::TimerService;
//! use fsm_stdlib::triggers::RTrig;
//! use std::time::Duration;
//!
//! let mut timers = TimerService::new();
//! let t1 = timers.add("T1", Duration::from_millis(200));
//! timers.start(t1, Duration::from_millis(200));
//! timers.advance(Duration::from_millis(100));
//! timers.advance(Duration::from_millis(100));
//! assert!(timers.is_expired("T1"));
//!
//! let mut rtrig = RTrig::new();
//! assert!(rtrig.call(true));
//! assert!(!rtrig.call(true));
//! ```

pub mod timers;
pub mod triggers;

pub use timers::{Timer, TimerId, TimerService, TimerStatus};
pub use triggers::{FTrig, RTrig};
