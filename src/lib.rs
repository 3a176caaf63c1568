//! execstream - Launch processes over pipes or a PTY and stream their
//! output, lines and ANSI styles.

#[cfg(not(unix))]
compile_error!("execstream supports unix platforms only");

pub mod ansi;
pub mod config;
pub mod exec;
pub mod stream;
pub mod supervisor;
