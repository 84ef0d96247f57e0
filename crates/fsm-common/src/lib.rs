#![doc = "Common types shared across the scan-fsm workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod signal;
pub mod state;
pub mod time;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use signal::*;
pub use state::*;
pub use time::*;
