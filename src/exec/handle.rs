//! Child process launch over pipes or a pseudo-terminal.
//!
//! The launcher forks and execs directly instead of going through
//! `std::process::Command`, so a PTY slave can become the child's
//! controlling terminal and an exec failure stays on the child side.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::libc;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{signal, sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::termios::Termios;
use nix::unistd::{chdir, dup2, fork, pipe2, setsid, ForkResult, Pid};
use serde::{Deserialize, Serialize};

use super::ProcessDescriptor;

/// Error type for launch operations.
///
/// These are parent-side failures. An `execve` failure happens in the
/// child, which aborts; the parent only observes an abnormal termination.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    /// A path, argument or environment entry contains a NUL byte.
    #[error("Launch parameter contains an interior NUL byte: {0:?}")]
    InvalidArgument(String),
    /// Pipe creation failed.
    #[error("Failed to create pipe: {0}")]
    Pipe(#[source] Errno),
    /// Pseudo-terminal allocation failed.
    #[error("Failed to allocate pseudo-terminal: {0}")]
    Pty(#[source] Errno),
    /// `fork` failed.
    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),
    /// Other I/O error while wiring descriptors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the child's standard streams are connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Three pipes for stdin, stdout and stderr.
    #[default]
    Direct,
    /// A pseudo-terminal; stdout and stderr share the master side.
    Pty,
}

/// Window size reported to a child running in a pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl PtySize {
    fn winsize(self) -> Winsize {
        Winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

/// A launched child and the parent's ends of its descriptors.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    mode: LaunchMode,
    input: Option<File>,
    output: Option<File>,
    error: Option<File>,
}

impl ProcessHandle {
    /// Fork and exec the described program.
    ///
    /// The child starts running before this returns.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError` if descriptors cannot be allocated, a launch
    /// parameter contains a NUL byte, or `fork` fails.
    pub fn launch(
        descriptor: &ProcessDescriptor,
        mode: LaunchMode,
        pty_size: PtySize,
    ) -> Result<Self, LaunchError> {
        let program = Program::prepare(descriptor)?;
        let handle = match mode {
            LaunchMode::Direct => Self::launch_direct(&program)?,
            LaunchMode::Pty => Self::launch_pty(&program, pty_size)?,
        };

        tracing::info!(
            pid = handle.pid.as_raw(),
            mode = ?mode,
            command = %descriptor.command_line(),
            "Launched process"
        );
        Ok(handle)
    }

    fn launch_direct(program: &Program) -> Result<Self, LaunchError> {
        let (stdin_read, stdin_write) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;
        let (stdout_read, stdout_write) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;
        let (stderr_read, stderr_write) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;

        let stdio = ChildStdio {
            stdin: stdin_read.as_raw_fd(),
            stdout: stdout_write.as_raw_fd(),
            stderr: stderr_write.as_raw_fd(),
            controlling_terminal: false,
        };
        let pid = spawn_child(program, &stdio)?;

        // Only the child keeps these ends.
        drop(stdin_read);
        drop(stdout_write);
        drop(stderr_write);

        Ok(Self {
            pid,
            mode: LaunchMode::Direct,
            input: Some(File::from(stdin_write)),
            output: Some(File::from(stdout_read)),
            error: Some(File::from(stderr_read)),
        })
    }

    fn launch_pty(program: &Program, size: PtySize) -> Result<Self, LaunchError> {
        let pty = openpty(Some(&size.winsize()), None::<&Termios>).map_err(LaunchError::Pty)?;
        set_cloexec(&pty.master).map_err(LaunchError::Pty)?;
        set_cloexec(&pty.slave).map_err(LaunchError::Pty)?;

        let slave = pty.slave.as_raw_fd();
        let stdio = ChildStdio {
            stdin: slave,
            stdout: slave,
            stderr: slave,
            controlling_terminal: true,
        };
        let pid = spawn_child(program, &stdio)?;
        drop(pty.slave);

        let writer = pty.master.try_clone()?;
        Ok(Self {
            pid,
            mode: LaunchMode::Pty,
            input: Some(File::from(writer)),
            output: Some(File::from(pty.master)),
            error: None,
        })
    }

    /// Process id of the child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        u32::try_from(self.pid.as_raw()).unwrap_or_default()
    }

    pub(crate) fn raw_pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    /// Take the writing end connected to the child's stdin.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_input(&mut self) -> Option<File> {
        self.input.take()
    }

    /// Take the reading end connected to the child's stdout.
    ///
    /// In PTY mode this is the master side and carries stderr as well.
    pub fn take_output(&mut self) -> Option<File> {
        self.output.take()
    }

    /// Take the reading end connected to the child's stderr.
    ///
    /// Always `None` in PTY mode.
    pub fn take_error(&mut self) -> Option<File> {
        self.error.take()
    }
}

/// Everything the child needs, allocated before `fork`.
struct Program {
    path: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<CString>,
}

impl Program {
    fn prepare(descriptor: &ProcessDescriptor) -> Result<Self, LaunchError> {
        let path = c_string(descriptor.path().as_os_str().as_bytes().to_vec())?;
        let argv = descriptor
            .argv()
            .into_iter()
            .map(c_string)
            .collect::<Result<Vec<_>, _>>()?;
        let envp = descriptor
            .environment()
            .into_iter()
            .map(c_string)
            .collect::<Result<Vec<_>, _>>()?;
        let cwd = descriptor
            .working_dir()
            .map(|dir| c_string(dir.as_os_str().as_bytes().to_vec()))
            .transpose()?;

        Ok(Self {
            path,
            argv,
            envp,
            cwd,
        })
    }
}

fn c_string(bytes: Vec<u8>) -> Result<CString, LaunchError> {
    CString::new(bytes).map_err(|e| {
        LaunchError::InvalidArgument(String::from_utf8_lossy(&e.into_vec()).into_owned())
    })
}

/// NULL-terminated pointer array for the `exec` family.
fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

struct ChildStdio {
    stdin: RawFd,
    stdout: RawFd,
    stderr: RawFd,
    controlling_terminal: bool,
}

/// Dispositions restored to default in the child, since ignored signals
/// survive `execve`.
const RESET_SIGNALS: [Signal; 8] = [
    Signal::SIGPIPE,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGHUP,
    Signal::SIGTERM,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

fn set_cloexec(fd: &OwnedFd) -> Result<(), Errno> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(drop)
}

#[allow(unsafe_code)]
fn spawn_child(program: &Program, stdio: &ChildStdio) -> Result<Pid, LaunchError> {
    let argv = null_terminated(&program.argv);
    let envp = null_terminated(&program.envp);
    let empty_mask = SigSet::empty();

    // SAFETY: between fork and exec the child only makes async-signal-safe
    // calls on memory prepared above, then either execs or aborts.
    match unsafe { fork() }.map_err(LaunchError::Fork)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => exec_child(program, &argv, &envp, &empty_mask, stdio),
    }
}

#[allow(unsafe_code)]
fn exec_child(
    program: &Program,
    argv: &[*const c_char],
    envp: &[*const c_char],
    mask: &SigSet,
    stdio: &ChildStdio,
) -> ! {
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(mask), None);
    for sig in RESET_SIGNALS {
        // SAFETY: restoring the default disposition installs no handler.
        let _ = unsafe { signal(sig, SigHandler::SigDfl) };
    }

    if stdio.controlling_terminal {
        let _ = setsid();
        // SAFETY: plain ioctl on a descriptor owned by this process.
        if unsafe { libc::ioctl(stdio.stdin, libc::TIOCSCTTY as _, 0) } == -1 {
            std::process::abort();
        }
    }

    for (fd, target) in [(stdio.stdin, 0), (stdio.stdout, 1), (stdio.stderr, 2)] {
        let wired = if fd == target {
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map(drop)
        } else {
            dup2(fd, target).map(drop)
        };
        if wired.is_err() {
            std::process::abort();
        }
    }

    if let Some(cwd) = &program.cwd {
        if chdir(cwd.as_c_str()).is_err() {
            std::process::abort();
        }
    }

    // SAFETY: all three arrays are NULL-terminated and outlive the call.
    unsafe {
        libc::execve(program.path.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }

    // execve only returns on failure, which the child cannot report.
    std::process::abort()
}
