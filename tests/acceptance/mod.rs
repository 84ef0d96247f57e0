//! Integration tests for scan-fsm acceptance testing.
//!
//! Everything here runs in-process and needs no privileges. Timing-sensitive
//! checks use free-running drivers so results do not depend on the host.

mod common;
mod fault_test;
mod machines_test;
mod override_test;
mod scenario_test;
