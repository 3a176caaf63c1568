//! Termination detection and the one-shot termination event.

use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{Priority, ProcessDescriptor};

/// Base added to the signal number when a child dies from a signal.
pub const SIGNAL_STATUS_BASE: i32 = 128;

/// Status reported when the exit status could not be collected.
pub const UNKNOWN_STATUS: i32 = -1;

/// Why a process stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The process called `exit`.
    Exited,
    /// The process was killed by a signal (or dumped core).
    Signaled,
}

/// Emitted exactly once per launched process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationEvent {
    pub pid: u32,
    /// Exit status, or `128 + signal` when signaled.
    pub status: i32,
    pub reason: TerminationReason,
    pub descriptor: ProcessDescriptor,
}

impl TerminationEvent {
    /// Whether the process exited normally with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.reason == TerminationReason::Exited && self.status == 0
    }
}

/// Block until `pid` changes to a terminal state.
///
/// Interrupted waits and non-terminal status changes are retried.
#[must_use]
pub fn wait_for_exit(pid: Pid) -> (i32, TerminationReason) {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return (code, TerminationReason::Exited),
            Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                tracing::debug!(pid = pid.as_raw(), ?signal, core_dumped, "Process killed by signal");
                return (SIGNAL_STATUS_BASE + signal as i32, TerminationReason::Signaled);
            }
            Ok(status) => {
                tracing::trace!(pid = pid.as_raw(), ?status, "Non-terminal wait status");
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                tracing::warn!(pid = pid.as_raw(), error = %e, "waitpid failed, exit status lost");
                return (UNKNOWN_STATUS, TerminationReason::Exited);
            }
        }
    }
}

/// Single-assignment slot for a [`TerminationEvent`].
///
/// Waiters can block on it synchronously or subscribe to a watch channel.
/// The cell also records when the pid was reaped, which happens before the
/// event fires if the child's output is still being drained.
#[derive(Debug)]
pub struct TerminationCell {
    slot: Mutex<Option<TerminationEvent>>,
    ready: Condvar,
    notify: watch::Sender<Option<TerminationEvent>>,
    reaped: watch::Sender<bool>,
}

impl Default for TerminationCell {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationCell {
    #[must_use]
    pub fn new() -> Self {
        let (notify, _) = watch::channel(None);
        let (reaped, _) = watch::channel(false);
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
            notify,
            reaped,
        }
    }

    /// Record that the pid has been reaped and must no longer be signaled.
    pub fn mark_reaped(&self) {
        self.reaped.send_if_modified(|reaped| !std::mem::replace(reaped, true));
    }

    #[must_use]
    pub fn is_reaped(&self) -> bool {
        *self.reaped.borrow()
    }

    /// Receiver that changes to `true` once the pid has been reaped.
    #[must_use]
    pub fn subscribe_reaped(&self) -> watch::Receiver<bool> {
        self.reaped.subscribe()
    }

    /// Store the event and wake every waiter.
    ///
    /// Returns `false` (and keeps the first event) if already completed.
    pub fn complete(&self, event: TerminationEvent) -> bool {
        self.mark_reaped();
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            tracing::warn!(pid = existing.pid, "Termination already recorded, ignoring");
            return false;
        }
        *slot = Some(event.clone());
        drop(slot);

        self.ready.notify_all();
        self.notify.send_replace(Some(event));
        true
    }

    #[must_use]
    pub fn get(&self) -> Option<TerminationEvent> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.get().is_some()
    }

    /// Receiver that observes `Some(event)` once the process terminates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<TerminationEvent>> {
        self.notify.subscribe()
    }

    /// Wait asynchronously for the event.
    pub async fn wait(&self) -> TerminationEvent {
        let mut rx = self.notify.subscribe();
        loop {
            if let Some(event) = rx.borrow_and_update().clone() {
                return event;
            }
            // The sender lives in `self`, so this cannot fail while we wait.
            let _ = rx.changed().await;
        }
    }

    /// Block the current thread until the event is available.
    #[must_use]
    pub fn wait_blocking(&self) -> TerminationEvent {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(event) = slot.as_ref() {
                return event.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Start the background wait loop for `pid`.
///
/// After the exit status is collected the loop joins `readers`, so every
/// byte the child wrote is published before the termination event fires.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn_wait_loop(
    pid: Pid,
    descriptor: ProcessDescriptor,
    readers: Vec<JoinHandle<()>>,
    cell: std::sync::Arc<TerminationCell>,
) -> std::io::Result<JoinHandle<()>> {
    let priority: Priority = descriptor.priority_class();
    std::thread::Builder::new()
        .name(format!("wait-{}-{priority}", pid.as_raw()))
        .spawn(move || {
            let (status, reason) = wait_for_exit(pid);
            cell.mark_reaped();
            tracing::debug!(pid = pid.as_raw(), status, ?reason, "Process reaped, draining output");

            for reader in readers {
                if reader.join().is_err() {
                    tracing::warn!(pid = pid.as_raw(), "Read pump panicked");
                }
            }

            publish(pid, status, reason, descriptor, &cell);
        })
}

/// Kill `pid` and record its termination on the calling thread.
///
/// Used when the wait loop could not be started, so the event still fires.
pub fn kill_and_reap(pid: Pid, descriptor: ProcessDescriptor, cell: &TerminationCell) {
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        tracing::debug!(pid = pid.as_raw(), error = %e, "Kill before reap failed");
    }
    let (status, reason) = wait_for_exit(pid);
    publish(pid, status, reason, descriptor, cell);
}

fn publish(
    pid: Pid,
    status: i32,
    reason: TerminationReason,
    descriptor: ProcessDescriptor,
    cell: &TerminationCell,
) {
    let event = TerminationEvent {
        pid: u32::try_from(pid.as_raw()).unwrap_or_default(),
        status,
        reason,
        descriptor,
    };
    tracing::info!(pid = event.pid, status, ?reason, "Process terminated");
    cell.complete(event);
}
