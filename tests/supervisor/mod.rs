//! Supervisor module tests.

mod io_test;
mod runner_test;

use execstream::exec::ProcessDescriptor;

/// A `/bin/sh -c` descriptor.
pub fn sh(script: &str) -> ProcessDescriptor {
    ProcessDescriptor::new("/bin/sh").args(["-c", script])
}

/// Verify all public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use execstream::exec::{LaunchMode, PtySize};
    use execstream::supervisor::{Supervisor, SupervisorError};

    let supervisor = Supervisor::with_mode(sh("true"), LaunchMode::Pty).pty_size(PtySize {
        rows: 40,
        cols: 120,
    });
    assert_eq!(supervisor.mode(), LaunchMode::Pty);

    let _: fn() -> SupervisorError = || SupervisorError::AttachAfterLaunch;
    let _: fn() -> SupervisorError = || SupervisorError::NoStderr;
}
