//! Supervisor for launching a process and wiring its streams.
//!
//! This module connects the launcher, the read and write pumps, the line
//! splitter, the ANSI decoder and the signaler. Inputs and signal sources
//! are attached before launch; output can be subscribed to at any time.

use std::fmt::Display;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::stream::{BoxStream, StreamExt};
use nix::unistd::Pid;
use tokio::sync::watch;

use crate::ansi::{styled, Ansi, AnsiDecoder, StyledText};
use crate::config::ExecConfig;
use crate::exec::{
    kill_and_reap, spawn_wait_loop, LaunchError, LaunchMode, ProcessDescriptor, ProcessHandle,
    ProcessSignal, PtySize, Signaler, TerminationCell, TerminationEvent,
};
use crate::stream::{
    lines, spawn_read_pump, spawn_write_pump, ByteChunk, Fanout, OutputStream, StreamError,
    StreamResult,
};

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// Inputs and signal sources must be attached before launch.
    #[error("Cannot attach to a process that has already been launched")]
    AttachAfterLaunch,
    /// `launch` was called twice.
    #[error("Process has already been launched")]
    AlreadyLaunched,
    /// The process has not been launched yet.
    #[error("Process has not been launched")]
    NotLaunched,
    /// Stderr is only separate in direct mode.
    #[error("No separate stderr channel in PTY mode")]
    NoStderr,
    /// Attached inputs or signals need a tokio runtime to drive them.
    #[error("Launching with attached inputs or signals requires a tokio runtime")]
    NoRuntime,
    /// The loaded configuration has no `[process]` table.
    #[error("Configuration does not describe a process")]
    NoProcess,
    /// Launching the process failed.
    #[error("Failed to launch process: {0}")]
    Launch(#[from] LaunchError),
    /// Starting a worker thread failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

type InputSource = BoxStream<'static, StreamResult<Vec<u8>>>;
type SignalSource = BoxStream<'static, ProcessSignal>;

/// Launches one process and exposes its I/O as streams.
pub struct Supervisor {
    descriptor: ProcessDescriptor,
    mode: LaunchMode,
    pty_size: PtySize,
    inputs: Vec<InputSource>,
    signal_sources: Vec<SignalSource>,
    stdout: Arc<Fanout<ByteChunk>>,
    stderr: Option<Arc<Fanout<ByteChunk>>>,
    termination: Arc<TerminationCell>,
    pid: Option<Pid>,
    input_task: Option<tokio::task::JoinHandle<StreamResult<()>>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("descriptor", &self.descriptor)
            .field("mode", &self.mode)
            .field("pid", &self.pid)
            .field("inputs", &self.inputs.len())
            .field("signal_sources", &self.signal_sources.len())
            .field("terminated", &self.termination.is_complete())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor that launches over pipes.
    #[must_use]
    pub fn new(descriptor: ProcessDescriptor) -> Self {
        Self::with_mode(descriptor, LaunchMode::Direct)
    }

    /// Create a supervisor that launches in a pseudo-terminal.
    #[must_use]
    pub fn pty(descriptor: ProcessDescriptor) -> Self {
        Self::with_mode(descriptor, LaunchMode::Pty)
    }

    #[must_use]
    pub fn with_mode(descriptor: ProcessDescriptor, mode: LaunchMode) -> Self {
        let stderr = match mode {
            LaunchMode::Direct => Some(Arc::new(Fanout::new())),
            LaunchMode::Pty => None,
        };
        Self {
            descriptor,
            mode,
            pty_size: PtySize::default(),
            inputs: Vec::new(),
            signal_sources: Vec::new(),
            stdout: Arc::new(Fanout::new()),
            stderr,
            termination: Arc::new(TerminationCell::new()),
            pid: None,
            input_task: None,
        }
    }

    /// Create a supervisor from a loaded launch profile.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NoProcess` if the profile has no process.
    pub fn from_config(config: &ExecConfig) -> Result<Self, SupervisorError> {
        let descriptor = config.process.clone().ok_or(SupervisorError::NoProcess)?;
        Ok(Self::with_mode(descriptor, config.mode).pty_size(config.pty))
    }

    /// Set the window size used in PTY mode.
    #[must_use]
    pub fn pty_size(mut self, size: PtySize) -> Self {
        self.pty_size = size;
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> &ProcessDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// Feed byte chunks from `source` into the child's stdin.
    ///
    /// Multiple sources are written in attachment order. Stdin is closed
    /// once every source has ended.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AttachAfterLaunch` after launch.
    pub fn attach_input<S>(&mut self, source: S) -> Result<(), SupervisorError>
    where
        S: Stream<Item = Vec<u8>> + Send + 'static,
    {
        self.push_input(source.map(Ok).boxed())
    }

    /// Like [`attach_input`](Self::attach_input), for sources that can fail.
    ///
    /// An error closes stdin and is reported by
    /// [`input_finished`](Self::input_finished). The child keeps running.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AttachAfterLaunch` after launch.
    pub fn attach_fallible_input<S, E>(&mut self, source: S) -> Result<(), SupervisorError>
    where
        S: Stream<Item = Result<Vec<u8>, E>> + Send + 'static,
        E: Display,
    {
        self.push_input(
            source
                .map(|item| item.map_err(|e| StreamError::Upstream(e.to_string())))
                .boxed(),
        )
    }

    /// Feed lines into the child's stdin, each followed by `\n`.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AttachAfterLaunch` after launch.
    pub fn attach_lines<S>(&mut self, source: S) -> Result<(), SupervisorError>
    where
        S: Stream<Item = String> + Send + 'static,
    {
        self.push_input(
            source
                .map(|line| {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    Ok(bytes)
                })
                .boxed(),
        )
    }

    /// Forward signals from `source` to the child while it runs.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::AttachAfterLaunch` after launch.
    pub fn attach_signals<S>(&mut self, source: S) -> Result<(), SupervisorError>
    where
        S: Stream<Item = ProcessSignal> + Send + 'static,
    {
        self.ensure_not_launched()?;
        self.signal_sources.push(source.boxed());
        Ok(())
    }

    fn push_input(&mut self, source: InputSource) -> Result<(), SupervisorError> {
        self.ensure_not_launched()?;
        self.inputs.push(source);
        Ok(())
    }

    fn ensure_not_launched(&self) -> Result<(), SupervisorError> {
        if self.pid.is_some() {
            tracing::debug!(pid = ?self.pid, "Rejecting attachment after launch");
            return Err(SupervisorError::AttachAfterLaunch);
        }
        Ok(())
    }

    /// Raw stdout chunks. In PTY mode this is the terminal output.
    #[must_use]
    pub fn stdout(&self) -> OutputStream<ByteChunk> {
        self.stdout.subscribe().boxed()
    }

    /// Raw stderr chunks.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NoStderr` in PTY mode.
    pub fn stderr(&self) -> Result<OutputStream<ByteChunk>, SupervisorError> {
        Ok(self.stderr_fanout()?.subscribe().boxed())
    }

    /// Stdout split into lines.
    #[must_use]
    pub fn lines_out(&self) -> OutputStream<String> {
        lines(self.stdout.subscribe())
    }

    /// Stderr split into lines.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NoStderr` in PTY mode.
    pub fn lines_err(&self) -> Result<OutputStream<String>, SupervisorError> {
        Ok(lines(self.stderr_fanout()?.subscribe()))
    }

    /// Stdout lines decoded into clean text and style ranges.
    #[must_use]
    pub fn styled_out(&self, ansi: Ansi) -> OutputStream<StyledText> {
        styled(self.lines_out(), AnsiDecoder::new(ansi))
    }

    /// Stderr lines decoded into clean text and style ranges.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NoStderr` in PTY mode.
    pub fn styled_err(&self, ansi: Ansi) -> Result<OutputStream<StyledText>, SupervisorError> {
        Ok(styled(self.lines_err()?, AnsiDecoder::new(ansi)))
    }

    fn stderr_fanout(&self) -> Result<&Arc<Fanout<ByteChunk>>, SupervisorError> {
        self.stderr.as_ref().ok_or(SupervisorError::NoStderr)
    }

    /// Launch the process and start its pumps.
    ///
    /// # Errors
    ///
    /// Returns an error if called twice, if inputs or signals are attached
    /// outside a tokio runtime, or if the launch itself fails. If the child
    /// was forked but its worker threads could not start, it is killed and
    /// its termination is still recorded.
    pub fn launch(&mut self) -> Result<u32, SupervisorError> {
        if self.pid.is_some() {
            return Err(SupervisorError::AlreadyLaunched);
        }
        let needs_runtime = !self.inputs.is_empty() || !self.signal_sources.is_empty();
        if needs_runtime && tokio::runtime::Handle::try_current().is_err() {
            return Err(SupervisorError::NoRuntime);
        }

        let mut handle = ProcessHandle::launch(&self.descriptor, self.mode, self.pty_size)?;
        let pid = handle.pid();
        let raw_pid = handle.raw_pid();
        self.pid = Some(raw_pid);

        if let Err(e) = self.start_output(&mut handle) {
            tracing::warn!(pid, error = %e, "Failed to start output threads, killing process");
            self.stdout.close();
            if let Some(fanout) = &self.stderr {
                fanout.close();
            }
            kill_and_reap(raw_pid, self.descriptor.clone(), &self.termination);
            return Err(e.into());
        }

        let inputs = std::mem::take(&mut self.inputs);
        match handle.take_input() {
            Some(input) if !inputs.is_empty() => {
                let merged = futures_util::stream::iter(inputs).flatten().boxed();
                self.input_task = Some(spawn_write_pump(
                    pid,
                    input,
                    merged,
                    self.mode == LaunchMode::Pty,
                ));
            }
            Some(input) => {
                tracing::debug!(pid, "No input attached, closing stdin");
                drop(input);
            }
            None => {}
        }

        let sources = std::mem::take(&mut self.signal_sources);
        if !sources.is_empty() {
            Signaler::new(raw_pid, self.termination.subscribe_reaped()).spawn(sources);
        }

        Ok(pid)
    }

    /// Start the read pumps and the wait loop that joins them.
    fn start_output(&self, handle: &mut ProcessHandle) -> std::io::Result<()> {
        let pid = handle.pid();
        let priority = self.descriptor.priority_class();

        let mut readers = Vec::with_capacity(2);
        if let Some(output) = handle.take_output() {
            readers.push(spawn_read_pump("stdout", pid, priority, output, Arc::clone(&self.stdout))?);
        }
        if let (Some(error), Some(fanout)) = (handle.take_error(), &self.stderr) {
            readers.push(spawn_read_pump("stderr", pid, priority, error, Arc::clone(fanout))?);
        }
        spawn_wait_loop(
            handle.raw_pid(),
            self.descriptor.clone(),
            readers,
            Arc::clone(&self.termination),
        )?;
        Ok(())
    }

    /// Process id, once launched.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
            .map(|pid| u32::try_from(pid.as_raw()).unwrap_or_default())
    }

    #[must_use]
    pub fn is_launched(&self) -> bool {
        self.pid.is_some()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.termination.is_complete()
    }

    /// The termination event, if the process has terminated.
    #[must_use]
    pub fn termination(&self) -> Option<TerminationEvent> {
        self.termination.get()
    }

    /// Receiver that changes to `Some(event)` exactly once.
    #[must_use]
    pub fn on_termination(&self) -> watch::Receiver<Option<TerminationEvent>> {
        self.termination.subscribe()
    }

    /// Wait for the process to terminate.
    ///
    /// All output has been published to subscribers when this resolves.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NotLaunched` before launch.
    pub async fn wait(&self) -> Result<TerminationEvent, SupervisorError> {
        if self.pid.is_none() {
            return Err(SupervisorError::NotLaunched);
        }
        Ok(self.termination.wait().await)
    }

    /// Block the current thread until the process terminates.
    ///
    /// Do not call from inside an async task.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::NotLaunched` before launch.
    pub fn wait_blocking(&self) -> Result<TerminationEvent, SupervisorError> {
        if self.pid.is_none() {
            return Err(SupervisorError::NotLaunched);
        }
        Ok(self.termination.wait_blocking())
    }

    /// Wait for the input path to finish.
    ///
    /// Resolves immediately when no input was attached.
    ///
    /// # Errors
    ///
    /// Returns the upstream error if an attached input source failed.
    pub async fn input_finished(&mut self) -> StreamResult<()> {
        match self.input_task.take() {
            Some(task) => task
                .await
                .map_err(|e| StreamError::Upstream(e.to_string()))?,
            None => Ok(()),
        }
    }

    /// A signaler for the launched process.
    #[must_use]
    pub fn signaler(&self) -> Option<Signaler> {
        self.pid
            .map(|pid| Signaler::new(pid, self.termination.subscribe_reaped()))
    }
}
