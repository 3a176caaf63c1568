//! Colored CLI display utilities for run status.
//!
//! Status lines go to stderr so that stdout carries only child output.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use execstream::exec::{
    LaunchMode, ProcessDescriptor, ProcessSignal, TerminationEvent, TerminationReason,
    SIGNAL_STATUS_BASE,
};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 80;

/// Truncate a string to a maximum number of characters, adding ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

/// Describe how a process ended, without colors.
#[must_use]
pub fn describe_termination(event: &TerminationEvent) -> String {
    match event.reason {
        TerminationReason::Exited => format!("exited with status {}", event.status),
        TerminationReason::Signaled => {
            let signal = nix::sys::signal::Signal::try_from(event.status - SIGNAL_STATUS_BASE)
                .map_or_else(|_| "unknown signal".to_string(), |s| s.as_str().to_string());
            format!("killed by {signal} (status {})", event.status)
        }
    }
}

/// Print launch information.
pub fn print_launch(descriptor: &ProcessDescriptor, pid: u32, mode: LaunchMode) {
    let mode = match mode {
        LaunchMode::Direct => "pipes",
        LaunchMode::Pty => "pty",
    };
    eprintln!(
        "{} {} pid={} via {} {}",
        timestamp().dimmed(),
        "[LAUNCH]".blue().bold(),
        pid.cyan(),
        mode,
        truncate(&descriptor.command_line(), DEFAULT_MAX_LEN).dimmed()
    );
    let _ = io::stderr().flush();
}

/// Print the termination summary.
pub fn print_termination(event: &TerminationEvent) {
    let summary = describe_termination(event);
    let ts = timestamp();
    if event.success() {
        eprintln!("{} {} {}", ts.dimmed(), "[EXIT]".green().bold(), summary);
    } else if event.reason == TerminationReason::Signaled {
        eprintln!("{} {} {}", ts.dimmed(), "[EXIT]".yellow().bold(), summary.yellow());
    } else {
        eprintln!("{} {} {}", ts.dimmed(), "[EXIT]".red().bold(), summary.red());
    }
    let _ = io::stderr().flush();
}

/// Print a forwarded signal.
pub fn print_signal(signal: ProcessSignal) {
    eprintln!(
        "{} {} forwarding {}",
        timestamp().dimmed(),
        "[SIGNAL]".magenta().bold(),
        signal
    );
    let _ = io::stderr().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stderr().flush();
}

/// Print one line of child output.
pub fn print_line(line: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}
