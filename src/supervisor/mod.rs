//! Supervisor module for launching a process and wiring its streams.

mod runner;

pub use runner::*;
