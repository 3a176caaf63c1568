//! Byte, line and fan-out streams between a child and its consumers.

mod lines;
mod pump;

pub use lines::*;
pub use pump::*;
