//! Tests for launch, output and termination through the supervisor.

use futures_util::StreamExt;

use execstream::ansi::Ansi;
use execstream::exec::{ProcessDescriptor, TerminationReason, SIGNAL_STATUS_BASE};
use execstream::supervisor::{Supervisor, SupervisorError};

use super::sh;

#[tokio::test]
async fn echo_emits_line_then_clean_exit() {
    let descriptor = ProcessDescriptor::new("/bin/echo").arg("hello world");
    let mut supervisor = Supervisor::new(descriptor.clone());
    let lines = supervisor.lines_out();

    let pid = supervisor.launch().unwrap();
    assert!(pid > 0);
    assert_eq!(supervisor.pid(), Some(pid));

    let event = supervisor.wait().await.unwrap();
    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;

    assert_eq!(lines, vec!["hello world"]);
    assert_eq!(event.status, 0);
    assert_eq!(event.reason, TerminationReason::Exited);
    assert_eq!(event.pid, pid);
    assert_eq!(event.descriptor, descriptor);
    assert!(supervisor.is_terminated());
}

#[tokio::test]
async fn exit_code_propagates() {
    let mut supervisor = Supervisor::new(sh("exit 3"));
    supervisor.launch().unwrap();
    let event = supervisor.wait().await.unwrap();
    assert_eq!(event.status, 3);
    assert_eq!(event.reason, TerminationReason::Exited);
    assert!(!event.success());
}

#[tokio::test]
async fn stderr_is_separate_in_direct_mode() {
    let mut supervisor = Supervisor::new(sh("echo out; echo err >&2; echo more"));
    let out = supervisor.lines_out();
    let err = supervisor.lines_err().unwrap();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let out: Vec<String> = out.map(Result::unwrap).collect().await;
    let err: Vec<String> = err.map(Result::unwrap).collect().await;
    assert_eq!(out, vec!["out", "more"]);
    assert_eq!(err, vec!["err"]);
}

#[tokio::test]
async fn raw_chunks_end_with_empty_chunk() {
    let mut supervisor = Supervisor::new(sh("printf abc"));
    let chunks = supervisor.stdout();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let chunks: Vec<_> = chunks.map(Result::unwrap).collect().await;
    let last = chunks.last().unwrap();
    assert!(last.is_empty());
    let data: Vec<u8> = chunks.iter().flat_map(|c| c.data().to_vec()).collect();
    assert_eq!(data, b"abc");
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.seq(), i as u64);
    }
}

#[tokio::test]
async fn unterminated_last_line_is_emitted() {
    let mut supervisor = Supervisor::new(sh("printf 'one\\ntwo'"));
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["one", "two"]);
}

#[tokio::test]
async fn styled_output_has_ranges() {
    let mut supervisor = Supervisor::new(sh("printf '\\033[31mred\\033[0m plain\\n\\033[1mbold\\n'"));
    let styled = supervisor.styled_out(Ansi::new());
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let styled: Vec<_> = styled.map(Result::unwrap).collect().await;
    assert_eq!(styled.len(), 2);
    assert_eq!(styled[0].text, "red plain");
    assert_eq!(styled[0].ranges.len(), 1);
    assert_eq!((styled[0].ranges[0].start, styled[0].ranges[0].end), (0, 3));
    assert_eq!(styled[0].ranges[0].code.code(), 31);
    assert_eq!(styled[1].offset, 9);
    assert_eq!(styled[1].text, "bold");
    assert_eq!(styled[1].open.len(), 1);
}

#[tokio::test]
async fn late_subscriber_sees_completed_stream() {
    let mut supervisor = Supervisor::new(sh("echo early"));
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let late: Vec<_> = supervisor.lines_out().collect().await;
    assert!(late.is_empty());
}

#[tokio::test]
async fn nonexistent_program_terminates_signaled() {
    let mut supervisor = Supervisor::new(ProcessDescriptor::new("/nonexistent/execstream-test"));
    supervisor.launch().unwrap();
    let event = supervisor.wait().await.unwrap();
    assert_eq!(event.reason, TerminationReason::Signaled);
    assert_eq!(event.status, SIGNAL_STATUS_BASE + 6);
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let mut supervisor = Supervisor::new(sh("pwd").cwd(dir.path()));
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines.len(), 1);
    assert_eq!(
        std::path::Path::new(&lines[0]).canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn explicit_environment_replaces_inherited() {
    std::env::set_var("EXECSTREAM_INHERITED", "leaked");
    let descriptor = sh("echo \"$GREETING-$EXECSTREAM_INHERITED\"").env_var("GREETING", "hi");
    let mut supervisor = Supervisor::new(descriptor);
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["hi-"]);
}

#[tokio::test]
async fn on_termination_fires_once() {
    let mut supervisor = Supervisor::new(sh("exit 0"));
    let mut rx = supervisor.on_termination();
    assert!(rx.borrow().is_none());
    supervisor.launch().unwrap();

    rx.changed().await.unwrap();
    let event = rx.borrow_and_update().clone().unwrap();
    assert!(event.success());
    assert_eq!(supervisor.termination(), Some(event));
}

#[test]
fn wait_blocking_without_runtime() {
    let mut supervisor = Supervisor::new(sh("echo sync; exit 5"));
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();

    let event = supervisor.wait_blocking().unwrap();
    assert_eq!(event.status, 5);

    let lines: Vec<_> = tokio_test::block_on(lines.collect::<Vec<_>>());
    assert_eq!(lines, vec![Ok("sync".to_string())]);
}

#[tokio::test]
async fn wait_before_launch_fails() {
    let supervisor = Supervisor::new(sh("true"));
    assert!(matches!(
        supervisor.wait().await,
        Err(SupervisorError::NotLaunched)
    ));
}
