//! ANSI SGR decoding into clean text and style ranges.

mod code;
mod decoder;

pub use code::*;
pub use decoder::*;
