//! Tests for stdin forwarding and PTY mode.

use std::time::Duration;

use futures_util::{stream, StreamExt};

use execstream::exec::{LaunchMode, ProcessSignal, PtySize, TerminationReason};
use execstream::stream::StreamError;
use execstream::supervisor::{Supervisor, SupervisorError};

use super::sh;

#[tokio::test]
async fn attached_lines_reach_stdin_and_close_it() {
    let mut supervisor = Supervisor::new(sh("cat"));
    supervisor
        .attach_lines(stream::iter(vec!["first".to_string(), "second".to_string()]))
        .unwrap();
    let lines = supervisor.lines_out();

    supervisor.launch().unwrap();
    let event = supervisor.wait().await.unwrap();
    assert!(supervisor.input_finished().await.is_ok());

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["first", "second"]);
    assert!(event.success());
}

#[tokio::test]
async fn multiple_inputs_are_written_in_order() {
    let mut supervisor = Supervisor::new(sh("cat"));
    supervisor
        .attach_input(stream::iter(vec![b"a".to_vec(), b"b".to_vec()]))
        .unwrap();
    supervisor
        .attach_input(stream::iter(vec![b"c\n".to_vec()]))
        .unwrap();
    let lines = supervisor.lines_out();

    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["abc"]);
}

#[tokio::test]
async fn stdin_is_closed_without_input() {
    let mut supervisor = Supervisor::new(sh("cat; echo eof"));
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["eof"]);
}

#[tokio::test]
async fn input_error_closes_stdin_without_killing_child() {
    let mut supervisor = Supervisor::new(sh("cat; echo after"));
    supervisor
        .attach_fallible_input(stream::iter(vec![
            Ok(b"kept\n".to_vec()),
            Err("source broke"),
            Ok(b"dropped\n".to_vec()),
        ]))
        .unwrap();
    let lines = supervisor.lines_out();

    supervisor.launch().unwrap();
    let event = supervisor.wait().await.unwrap();

    assert_eq!(
        supervisor.input_finished().await,
        Err(StreamError::Upstream("source broke".to_string()))
    );
    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["kept", "after"]);
    assert!(event.success());
}

#[tokio::test]
async fn attach_after_launch_is_rejected() {
    let mut supervisor = Supervisor::new(sh("echo done"));
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();

    assert!(matches!(
        supervisor.attach_input(stream::iter(vec![b"late".to_vec()])),
        Err(SupervisorError::AttachAfterLaunch)
    ));
    assert!(matches!(
        supervisor.attach_lines(stream::iter(vec!["late".to_string()])),
        Err(SupervisorError::AttachAfterLaunch)
    ));
    assert!(matches!(
        supervisor.attach_signals(stream::iter(vec![ProcessSignal::Kill])),
        Err(SupervisorError::AttachAfterLaunch)
    ));

    let event = supervisor.wait().await.unwrap();
    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["done"]);
    assert!(event.success());
}

#[tokio::test]
async fn pty_output_arrives_on_master() {
    let mut supervisor = Supervisor::pty(sh("test -t 0 && test -t 1 && echo tty"));
    assert_eq!(supervisor.mode(), LaunchMode::Pty);
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();
    let event = supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["tty"]);
    assert!(event.success());
}

#[tokio::test]
async fn pty_window_size_is_applied() {
    let mut supervisor = Supervisor::pty(sh("stty size")).pty_size(PtySize { rows: 33, cols: 101 });
    let lines = supervisor.lines_out();
    supervisor.launch().unwrap();
    supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["33 101"]);
}

#[tokio::test]
async fn pty_input_ends_with_terminal_eof() {
    let mut supervisor = Supervisor::pty(sh("cat"));
    supervisor
        .attach_lines(stream::iter(vec!["typed".to_string()]))
        .unwrap();
    let lines = supervisor.lines_out();

    supervisor.launch().unwrap();
    let event = supervisor.wait().await.unwrap();

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert!(lines.iter().any(|l| l == "typed"), "got {lines:?}");
    assert_eq!(event.reason, TerminationReason::Exited);
    assert_eq!(event.status, 0);
}

#[tokio::test]
async fn pty_input_without_trailing_newline_reaches_eof() {
    let mut supervisor = Supervisor::pty(sh("cat; echo; echo eof-seen"));
    supervisor
        .attach_input(stream::iter(vec![b"abc".to_vec()]))
        .unwrap();
    let lines = supervisor.lines_out();

    supervisor.launch().unwrap();
    let event = tokio::time::timeout(Duration::from_secs(10), supervisor.wait())
        .await
        .expect("child never saw end of input")
        .unwrap();
    assert!(supervisor.input_finished().await.is_ok());

    let lines: Vec<String> = lines.map(Result::unwrap).collect().await;
    assert!(lines.iter().any(|l| l.contains("abc")), "got {lines:?}");
    assert_eq!(lines.last().map(String::as_str), Some("eof-seen"));
    assert!(event.success());
}
