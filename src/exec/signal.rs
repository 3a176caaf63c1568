//! Signal delivery to a running child.

use std::fmt;
use std::str::FromStr;

use futures_util::stream::{self, BoxStream, StreamExt};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Signals that can be forwarded to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessSignal {
    Interrupt,
    Kill,
    Hangup,
    Quit,
    Terminate,
}

impl ProcessSignal {
    #[must_use]
    pub fn as_signal(self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Kill => Signal::SIGKILL,
            Self::Hangup => Signal::SIGHUP,
            Self::Quit => Signal::SIGQUIT,
            Self::Terminate => Signal::SIGTERM,
        }
    }
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_signal().as_str())
    }
}

impl FromStr for ProcessSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_ascii_uppercase();
        match name.strip_prefix("SIG").unwrap_or(&name) {
            "INT" | "INTERRUPT" => Ok(Self::Interrupt),
            "KILL" => Ok(Self::Kill),
            "HUP" | "HANGUP" => Ok(Self::Hangup),
            "QUIT" => Ok(Self::Quit),
            "TERM" | "TERMINATE" => Ok(Self::Terminate),
            _ => Err(format!("unknown signal: {s}")),
        }
    }
}

/// Forwards signals to a pid for as long as the process is alive.
///
/// Holds the pid and a receiver for the reaped flag, not the process
/// itself. Once the pid is reaped it may be reused, so nothing is sent.
#[derive(Debug, Clone)]
pub struct Signaler {
    pid: Pid,
    reaped: watch::Receiver<bool>,
}

impl Signaler {
    #[must_use]
    pub fn new(pid: Pid, reaped: watch::Receiver<bool>) -> Self {
        Self { pid, reaped }
    }

    /// Whether the target has not yet been reaped.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !*self.reaped.borrow()
    }

    /// Deliver `signal` if the process is still alive.
    ///
    /// Returns `Ok(false)` when the signal was dropped because the process
    /// already exited.
    ///
    /// # Errors
    ///
    /// Returns the OS error if delivery fails for any other reason.
    pub fn deliver(&self, signal: ProcessSignal) -> Result<bool, Errno> {
        if !self.is_live() {
            tracing::debug!(pid = self.pid.as_raw(), %signal, "Dropping signal, process exited");
            return Ok(false);
        }

        match kill(self.pid, signal.as_signal()) {
            Ok(()) => {
                tracing::debug!(pid = self.pid.as_raw(), %signal, "Delivered signal");
                Ok(true)
            }
            Err(Errno::ESRCH) => {
                tracing::debug!(pid = self.pid.as_raw(), %signal, "Dropping signal, no such process");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Forward every signal from `sources` until they end or the process
    /// is reaped.
    ///
    /// Order is kept within each source; interleaving between sources is
    /// arbitrary.
    pub fn spawn(self, sources: Vec<BoxStream<'static, ProcessSignal>>) -> JoinHandle<()> {
        let mut merged = stream::select_all(sources);
        let mut reaped = self.reaped.clone();

        tokio::spawn(async move {
            loop {
                if !self.is_live() {
                    break;
                }
                tokio::select! {
                    next = merged.next() => match next {
                        Some(signal) => {
                            if let Err(e) = self.deliver(signal) {
                                tracing::warn!(pid = self.pid.as_raw(), %signal, error = %e, "Signal delivery failed");
                            }
                        }
                        None => break,
                    },
                    changed = reaped.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::trace!(pid = self.pid.as_raw(), "Signal forwarding stopped");
        })
    }
}
