//! Tests driving real executables through the stage and pipeline API.
//!
//! These exercise the full path: builder rendering, spawn, capture, chaining,
//! cancellation, and combinator interop. They assume a Unix environment with
//! `sh`, `echo`, `cat`, `wc`, `sleep`, and `env` on PATH.

use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use rill_sh::{Awaitable, CmdBuilder, TaskError};
use rill_task::{wait_all, wait_timeout, CancellationToken};
use tokio::io::AsyncWrite;

/// Install a fmt subscriber once so RUST_LOG surfaces stage tracing.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An `AsyncWrite` the test can read back after the stage finishes.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedBuf {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn marker_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rill-sh-{name}-{}", std::process::id()))
}

// ============================================================================
// Single-stage execution
// ============================================================================

#[tokio::test]
async fn echo_captures_stdout() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("echo")
        .arg("hello world")
        .build(&scope)
        .unwrap();

    let output = cmd.start().wait().await.unwrap();
    assert!(output.ok());
    assert_eq!(output.stdout_string().trim(), "hello world");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn wait_starts_the_stage_implicitly() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("echo").arg("implicit").build(&scope).unwrap();

    // No explicit start.
    let output = cmd.wait().await.unwrap();
    assert_eq!(output.stdout_string().trim(), "implicit");
}

#[tokio::test]
async fn run_executes_synchronously() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("echo").arg("direct").build(&scope).unwrap();

    let output = cmd.run().await.unwrap();
    assert!(output.ok());
    assert_eq!(output.stdout_string().trim(), "direct");
}

#[tokio::test]
async fn start_is_idempotent_under_repeats() {
    let scope = CancellationToken::new();
    let marker = marker_path("start-once");
    let _ = std::fs::remove_file(&marker);

    let cmd = CmdBuilder::new("sh")
        .opt("-c", format!("echo x >> {}", marker.display()))
        .build(&scope)
        .unwrap();

    cmd.start();
    cmd.start();
    cmd.start();
    let output = cmd.wait().await.unwrap();
    assert!(output.ok());

    let contents = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(contents.lines().count(), 1, "process must spawn exactly once");
    let _ = std::fs::remove_file(&marker);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_waiters_see_identical_output() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("echo").arg("shared").build(&scope).unwrap();
    cmd.start();

    let mut waiters = Vec::new();
    for _ in 0..8 {
        let handle = cmd.clone();
        waiters.push(tokio::spawn(async move { handle.wait().await }));
    }
    for waiter in waiters {
        let output = waiter.await.unwrap().unwrap();
        assert_eq!(output.stdout_string().trim(), "shared");
        assert_eq!(output.code, 0);
    }
}

// ============================================================================
// Exit-code normalization
// ============================================================================

#[tokio::test]
async fn non_zero_exit_is_data_not_error() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("sh").opt("-c", "exit 3").build(&scope).unwrap();

    let output = cmd.wait().await.unwrap();
    assert!(!output.ok());
    assert_eq!(output.code, 3);
}

#[tokio::test]
async fn signal_termination_normalizes_to_minus_one() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("sh")
        .opt("-c", "kill -KILL $$")
        .build(&scope)
        .unwrap();

    let output = cmd.wait().await.unwrap();
    assert_eq!(output.code, -1);
}

#[tokio::test]
async fn missing_program_is_a_stage_error() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("/definitely/not/a/real/binary")
        .build(&scope)
        .unwrap();

    let err = cmd.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Failed(_)));
    assert!(err.to_string().contains("/definitely/not/a/real/binary"));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_kills_a_long_running_process() {
    init_logging();
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("sleep").arg("10").build(&scope).unwrap();
    cmd.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    cmd.cancel();
    let err = cmd.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn pre_cancelled_scope_never_spawns() {
    let scope = CancellationToken::new();
    let marker = marker_path("pre-cancel");
    let _ = std::fs::remove_file(&marker);

    let cmd = CmdBuilder::new("sh")
        .opt("-c", format!("echo ran >> {}", marker.display()))
        .build(&scope)
        .unwrap();
    scope.cancel();

    let err = cmd.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
    assert!(!marker.exists());
}

#[tokio::test]
async fn stage_timeout_cancels_the_process() {
    let scope = CancellationToken::new();
    let slow = CmdBuilder::new("sleep").arg("5").build(&scope).unwrap();
    slow.start();

    let started = Instant::now();
    let err = wait_timeout(Duration::from_millis(50), &slow)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(5));

    let err = slow.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
}

// ============================================================================
// Pipelines
// ============================================================================

#[tokio::test]
async fn pipeline_feeds_stdout_to_stdin() {
    init_logging();
    let scope = CancellationToken::new();
    let echo = CmdBuilder::new("echo")
        .arg("hello world")
        .build(&scope)
        .unwrap();
    let wc = echo.pipe("wc").flag("-w").build().unwrap();

    let output = wc.wait().await.unwrap();
    assert!(output.ok());
    assert_eq!(output.stdout_string().trim(), "2");

    let upstream = echo.wait().await.unwrap();
    assert!(upstream.ok());
    assert_eq!(upstream.stdout_string().trim(), "hello world");
}

#[tokio::test]
async fn three_stage_pipeline() {
    let scope = CancellationToken::new();
    let head = CmdBuilder::new("echo")
        .arg("one two three")
        .build(&scope)
        .unwrap();
    let middle = head.pipe("cat").build().unwrap();
    let tail = middle.pipe("wc").flag("-w").build().unwrap();

    let output = tail.wait().await.unwrap();
    assert_eq!(output.stdout_string().trim(), "3");
}

#[tokio::test]
async fn upstream_failure_short_circuits_downstream() {
    let scope = CancellationToken::new();
    let marker = marker_path("short-circuit");
    let _ = std::fs::remove_file(&marker);

    let head = CmdBuilder::new("/definitely/not/a/real/binary")
        .build(&scope)
        .unwrap();
    let tail = head
        .pipe("sh")
        .opt("-c", format!("echo ran >> {}", marker.display()))
        .build()
        .unwrap();

    let err = tail.wait().await.unwrap_err();
    assert!(err.to_string().contains("/definitely/not/a/real/binary"));

    // The downstream stage reaches its own terminal state without spawning.
    let mut done = tail.done();
    let _ = done.wait_for(|&fired| fired).await;
    assert!(!marker.exists(), "downstream process must never run");
    let _ = std::fs::remove_file(&marker);
}

#[tokio::test]
async fn cancelling_downstream_cancels_the_whole_chain() {
    let scope = CancellationToken::new();
    let head = CmdBuilder::new("sleep").arg("10").build(&scope).unwrap();
    let tail = head.pipe("cat").build().unwrap();
    tail.start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tail.cancel();
    let err = tail.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
    let err = head.wait().await.unwrap_err();
    assert!(matches!(err, TaskError::Cancelled));
}

#[tokio::test]
async fn non_zero_upstream_exit_still_feeds_downstream() {
    // A non-zero exit is data, not an error, so the chain keeps flowing.
    let scope = CancellationToken::new();
    let head = CmdBuilder::new("sh")
        .opt("-c", "echo partial; exit 3")
        .build(&scope)
        .unwrap();
    let tail = head.pipe("cat").build().unwrap();

    let output = tail.wait().await.unwrap();
    assert!(output.ok());
    assert_eq!(output.stdout_string().trim(), "partial");
    assert_eq!(head.wait().await.unwrap().code, 3);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn env_overrides_add_to_inherited_environment() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("env")
        .build(&scope)
        .unwrap()
        .env("RILL_TEST_VAR", "cmd_value");

    let output = cmd.wait().await.unwrap();
    assert!(output.ok());
    let stdout = output.stdout_string();
    assert!(stdout.contains("RILL_TEST_VAR=cmd_value"));
    assert!(stdout.contains("PATH="), "inherited environment must survive");
}

#[tokio::test]
async fn env_clear_drops_the_inherited_environment() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("/usr/bin/env")
        .build(&scope)
        .unwrap()
        .env_clear()
        .env("ONLY_VAR", "1");

    let output = cmd.wait().await.unwrap();
    assert!(output.ok());
    let stdout = output.stdout_string();
    assert!(stdout.contains("ONLY_VAR=1"));
    assert!(!stdout.contains("PATH="));
}

#[tokio::test]
async fn working_directory_applies() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("sh")
        .opt("-c", "pwd")
        .build(&scope)
        .unwrap()
        .current_dir("/tmp");

    let output = cmd.wait().await.unwrap();
    assert_eq!(output.stdout_string().trim(), "/tmp");
}

#[tokio::test]
async fn stdin_reader_feeds_the_process() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("cat")
        .build(&scope)
        .unwrap()
        .stdin(Cursor::new(b"hello from stdin".to_vec()));

    let output = cmd.wait().await.unwrap();
    assert_eq!(output.stdout_string(), "hello from stdin");
}

#[tokio::test]
async fn tee_stdout_receives_a_copy() {
    let scope = CancellationToken::new();
    let tee = SharedBuf::default();
    let cmd = CmdBuilder::new("echo")
        .arg("test output")
        .build(&scope)
        .unwrap()
        .tee_stdout(tee.clone());

    let output = cmd.wait().await.unwrap();
    assert_eq!(output.stdout_string().trim(), "test output");
    assert_eq!(tee.contents().trim(), "test output");
}

#[tokio::test]
async fn tee_stderr_receives_a_copy() {
    let scope = CancellationToken::new();
    let tee = SharedBuf::default();
    let cmd = CmdBuilder::new("sh")
        .opt("-c", "echo 'error message' >&2")
        .build(&scope)
        .unwrap()
        .tee_stderr(tee.clone());

    let output = cmd.wait().await.unwrap();
    assert!(output.ok());
    assert_eq!(output.stderr_string().trim(), "error message");
    assert_eq!(tee.contents().trim(), "error message");
}

#[tokio::test]
async fn interactive_stage_still_captures() {
    let scope = CancellationToken::new();
    let cmd = CmdBuilder::new("echo")
        .arg("interactive test")
        .build(&scope)
        .unwrap()
        .interactive();

    let output = cmd.wait().await.unwrap();
    assert!(output.ok());
    assert_eq!(output.stdout_string().trim(), "interactive test");
}

// ============================================================================
// Combinator interop
// ============================================================================

#[tokio::test]
async fn wait_all_collects_stage_outputs_in_order() {
    let scope = CancellationToken::new();
    let stages = vec![
        CmdBuilder::new("echo").arg("one").build(&scope).unwrap(),
        CmdBuilder::new("echo").arg("two").build(&scope).unwrap(),
        CmdBuilder::new("echo").arg("three").build(&scope).unwrap(),
    ];
    for stage in &stages {
        stage.start();
    }

    let outputs = wait_all(&scope, &stages).await.unwrap();
    let words: Vec<String> = outputs
        .iter()
        .map(|o| o.stdout_string().trim().to_string())
        .collect();
    assert_eq!(words, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn wait_all_surfaces_the_first_stage_error() {
    let scope = CancellationToken::new();
    let ok = CmdBuilder::new("echo").arg("fine").build(&scope).unwrap();
    let broken = CmdBuilder::new("/definitely/not/a/real/binary")
        .build(&scope)
        .unwrap();
    ok.start();
    broken.start();

    let err = wait_all(&scope, &[ok, broken]).await.unwrap_err();
    assert!(err.to_string().contains("/definitely/not/a/real/binary"));
}
