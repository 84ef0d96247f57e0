#![doc = "Cyclic, deterministic state-machine engine for industrial control."]

pub mod controller;
pub mod definition;
pub mod driver;
pub mod fault_latch;
pub mod guard;
pub mod safety;
pub mod table;

pub use controller::*;
pub use definition::*;
pub use driver::*;
pub use fault_latch::*;
pub use guard::{Guard, GuardContext, RESERVED_WORDS};
pub use safety::*;
pub use table::*;
