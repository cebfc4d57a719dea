//! Process launcher: spawns one external process with the resolved argv,
//! environment, directory, and I/O wiring, and reports a normalized exit
//! code.
//!
//! Cancellation is honoured by killing the child; the capture buffers hold
//! the complete stream contents by the time [`launch`] returns.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use rill_task::TaskError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where a stage's standard input comes from.
#[derive(Default)]
pub(crate) enum StdinSource {
    /// No input; the child sees EOF immediately.
    #[default]
    Null,
    /// Inherit the current process's stdin.
    Inherit,
    /// A frozen byte buffer, used when chaining from an upstream stage.
    Bytes(Vec<u8>),
    /// A caller-supplied reader.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// An extra destination receiving a copy of one output stream.
pub(crate) type TeeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Capture buffer plus any tee destinations for one output stream.
pub(crate) struct SinkSet {
    pub capture: Arc<Mutex<Vec<u8>>>,
    pub tees: Vec<TeeWriter>,
}

/// Everything the launcher needs for one process invocation.
pub(crate) struct LaunchRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub env_clear: bool,
    pub dir: Option<PathBuf>,
    pub stdin: StdinSource,
    pub stdout: SinkSet,
    pub stderr: SinkSet,
}

/// Run the process to completion, or until `scope` fires.
///
/// Returns the normalized exit code: 0 on success, the process's own code on
/// a recognized non-zero exit, -1 when the process terminated without a clean
/// exit code. Spawn failure and cancellation are [`TaskError`]s.
pub(crate) async fn launch(
    req: LaunchRequest,
    scope: &CancellationToken,
) -> Result<i64, TaskError> {
    if scope.is_cancelled() {
        return Err(TaskError::Cancelled);
    }

    let mut cmd = Command::new(&req.program);
    cmd.args(&req.args);
    if req.env_clear {
        cmd.env_clear();
    }
    for (key, value) in &req.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &req.dir {
        cmd.current_dir(dir);
    }
    let stdin = req.stdin;
    cmd.stdin(match &stdin {
        StdinSource::Null => Stdio::null(),
        StdinSource::Inherit => Stdio::inherit(),
        StdinSource::Bytes(_) | StdinSource::Reader(_) => Stdio::piped(),
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        TaskError::failed(anyhow::anyhow!("failed to spawn {}: {e}", req.program))
    })?;
    tracing::debug!(program = %req.program, pid = child.id(), "spawned process");

    let mut feeder: Option<JoinHandle<()>> = None;
    if let Some(mut sink) = child.stdin.take() {
        feeder = match stdin {
            StdinSource::Bytes(bytes) => Some(tokio::spawn(async move {
                let _ = sink.write_all(&bytes).await;
                let _ = sink.shutdown().await;
            })),
            StdinSource::Reader(mut reader) => Some(tokio::spawn(async move {
                let _ = tokio::io::copy(&mut reader, &mut sink).await;
                let _ = sink.shutdown().await;
            })),
            StdinSource::Null | StdinSource::Inherit => None,
        };
    }

    let mut pumps = Vec::new();
    if let Some(out) = child.stdout.take() {
        pumps.push(pump(out, req.stdout));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(pump(err, req.stderr));
    }

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| {
                TaskError::failed(anyhow::anyhow!("failed to reap {}: {e}", req.program))
            })?
        }
        _ = scope.cancelled() => {
            tracing::debug!(program = %req.program, "cancellation fired, killing process");
            let _ = child.start_kill();
            let _ = child.wait().await;
            if let Some(feeder) = feeder {
                feeder.abort();
            }
            return Err(TaskError::Cancelled);
        }
    };

    // The capture buffers are complete only once both pumps have drained.
    for handle in pumps {
        let _ = handle.await;
    }
    if let Some(feeder) = feeder {
        feeder.abort();
    }

    let code = i64::from(status.code().unwrap_or(-1));
    tracing::debug!(program = %req.program, code, "process exited");
    Ok(code)
}

/// Copy a child stream into its capture buffer and every tee writer,
/// 16 KiB at a time.
fn pump<R>(mut rd: R, mut sink: SinkSet) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = match rd.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            sink.capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(&buf[..n]);
            for tee in sink.tees.iter_mut() {
                let _ = tee.write_all(&buf[..n]).await;
            }
        }
        for tee in sink.tees.iter_mut() {
            let _ = tee.flush().await;
        }
    })
}
