//! Cmd — one external-process stage with the task lifecycle.
//!
//! A [`Cmd`] carries the same state machine as a `rill_task::Task` (start
//! latch, write-once outcome slot, one-shot completion signal) with one
//! addition: an optional upstream stage. Start and cancel recurse head-to-tail
//! through the chain, an upstream error short-circuits the downstream stage
//! before any process is spawned, and the upstream's captured stdout becomes
//! this stage's stdin.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rill_task::{Awaitable, TaskError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::builder::{CmdBuilder, PipeBuilder};
use crate::output::CmdOutput;
use crate::spawn::{self, LaunchRequest, SinkSet, StdinSource, TeeWriter};

/// Pre-start stage configuration. Guarded by one lock; mutation after start
/// is best-effort and may not be observed by the running execution.
#[derive(Default)]
struct Config {
    env: Vec<(String, String)>,
    env_clear: bool,
    dir: Option<PathBuf>,
    stdin: StdinSource,
    tee_stdout: Vec<TeeWriter>,
    tee_stderr: Vec<TeeWriter>,
}

struct Inner {
    program: String,
    args: Vec<String>,
    /// Forward-only edge: the downstream stage holds its upstream, never the
    /// reverse.
    upstream: Option<Cmd>,
    scope: CancellationToken,
    started: AtomicBool,
    config: Mutex<Config>,
    stdout_buf: Arc<Mutex<Vec<u8>>>,
    stderr_buf: Arc<Mutex<Vec<u8>>>,
    /// Terminal outcome. Written exactly once, before `done` fires.
    outcome: Mutex<Option<Result<CmdOutput, TaskError>>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Inner {
    /// Store the outcome, then fire the completion signal. The order is
    /// load-bearing: waiters read the slot only after observing the signal.
    fn publish(&self, outcome: Result<CmdOutput, TaskError>) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        *slot = Some(outcome);
        drop(slot);
        self.done_tx.send_replace(true);
    }
}

/// One external-process stage, optionally chained to an upstream stage.
///
/// Cheap to clone; every clone refers to the same stage, and the process is
/// spawned at most once no matter how many clones start it. Built via
/// [`CmdBuilder::build`] or [`PipeBuilder::build`].
pub struct Cmd {
    inner: Arc<Inner>,
}

impl Clone for Cmd {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmd").finish_non_exhaustive()
    }
}

impl Cmd {
    pub(crate) fn new(
        program: String,
        args: Vec<String>,
        scope: &CancellationToken,
        upstream: Option<Cmd>,
    ) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                program,
                args,
                upstream,
                scope: scope.child_token(),
                started: AtomicBool::new(false),
                config: Mutex::new(Config::default()),
                stdout_buf: Arc::new(Mutex::new(Vec::new())),
                stderr_buf: Arc::new(Mutex::new(Vec::new())),
                outcome: Mutex::new(None),
                done_tx,
                done_rx,
            }),
        }
    }

    pub(crate) fn scope(&self) -> &CancellationToken {
        &self.inner.scope
    }

    fn with_config(self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.inner.config.lock().unwrap_or_else(|e| e.into_inner()));
        self
    }

    /// Add an environment override on top of the inherited environment.
    pub fn env(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.with_config(|cfg| cfg.env.push((key, value)))
    }

    /// Start the child from an empty environment instead of inheriting;
    /// overrides added with [`Cmd::env`] still apply.
    pub fn env_clear(self) -> Self {
        self.with_config(|cfg| cfg.env_clear = true)
    }

    /// Set the child's working directory.
    pub fn current_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.with_config(|cfg| cfg.dir = Some(dir))
    }

    /// Redirect the child's stdin from a reader.
    ///
    /// Ignored when the stage is chained: an upstream's captured stdout
    /// always wins.
    pub fn stdin(self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.with_config(|cfg| cfg.stdin = StdinSource::Reader(Box::new(reader)))
    }

    /// Send a copy of the child's stdout to `writer` in addition to the
    /// capture buffer.
    pub fn tee_stdout(self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.with_config(|cfg| cfg.tee_stdout.push(Box::new(writer)))
    }

    /// Send a copy of the child's stderr to `writer` in addition to the
    /// capture buffer.
    pub fn tee_stderr(self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.with_config(|cfg| cfg.tee_stderr.push(Box::new(writer)))
    }

    /// Wire the stage for interactive use: inherit the caller's stdin and
    /// mirror stdout/stderr to the caller's terminal while still capturing.
    pub fn interactive(self) -> Self {
        self.with_config(|cfg| {
            cfg.stdin = StdinSource::Inherit;
            cfg.tee_stdout.push(Box::new(tokio::io::stdout()));
            cfg.tee_stderr.push(Box::new(tokio::io::stderr()));
        })
    }

    /// Begin building a stage whose stdin is this stage's captured stdout.
    ///
    /// No execution happens at pipe time; the chain activates when the
    /// downstream stage is started or awaited.
    pub fn pipe(&self, program: impl Into<String>) -> PipeBuilder {
        PipeBuilder::new(self.clone(), CmdBuilder::new(program))
    }

    /// Execute now and return the outcome, without the start/wait split.
    pub async fn run(&self) -> Result<CmdOutput, TaskError> {
        self.start();
        self.wait().await
    }
}

#[async_trait]
impl Awaitable for Cmd {
    type Output = CmdOutput;

    fn start(&self) -> &Self {
        if let Some(upstream) = &self.inner.upstream {
            upstream.start();
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return self;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(execute(inner));
        self
    }

    fn cancel(&self) {
        if let Some(upstream) = &self.inner.upstream {
            upstream.cancel();
        }
        self.inner.scope.cancel();
    }

    fn done(&self) -> watch::Receiver<bool> {
        self.inner.done_rx.clone()
    }

    /// Unlike a bare `Task`, waiting implicitly starts the stage. An upstream
    /// error is propagated without waiting on this stage's own completion.
    async fn wait(&self) -> Result<CmdOutput, TaskError> {
        self.start();
        if let Some(upstream) = &self.inner.upstream {
            if let Err(err) = upstream.wait().await {
                return Err(err);
            }
        }
        let mut done = self.inner.done_rx.clone();
        let _ = done.wait_for(|&fired| fired).await;
        let slot = self.inner.outcome.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().unwrap_or(Err(TaskError::Cancelled))
    }
}

/// The stage body; runs at most once, on its own tokio task.
#[tracing::instrument(skip_all, fields(program = %inner.program))]
async fn execute(inner: Arc<Inner>) {
    let mut stdin = None;
    if let Some(upstream) = &inner.upstream {
        match upstream.wait().await {
            // The upstream buffer is frozen once its wait has returned; the
            // bytes handed downstream are a copy, never an alias.
            Ok(output) => stdin = Some(StdinSource::Bytes(output.stdout)),
            Err(err) => {
                tracing::debug!("upstream stage failed, process never spawned");
                inner.publish(Err(err));
                return;
            }
        }
    }

    let request = {
        let mut config = inner.config.lock().unwrap_or_else(|e| e.into_inner());
        LaunchRequest {
            program: inner.program.clone(),
            args: inner.args.clone(),
            env: std::mem::take(&mut config.env),
            env_clear: config.env_clear,
            dir: config.dir.take(),
            stdin: match stdin {
                Some(upstream_bytes) => upstream_bytes,
                None => std::mem::take(&mut config.stdin),
            },
            stdout: SinkSet {
                capture: Arc::clone(&inner.stdout_buf),
                tees: std::mem::take(&mut config.tee_stdout),
            },
            stderr: SinkSet {
                capture: Arc::clone(&inner.stderr_buf),
                tees: std::mem::take(&mut config.tee_stderr),
            },
        }
    };

    let outcome = match spawn::launch(request, &inner.scope).await {
        Ok(code) => {
            let stdout = inner
                .stdout_buf
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            let stderr = inner
                .stderr_buf
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            Ok(CmdOutput::new(code, stdout, stderr))
        }
        Err(err) => Err(err),
    };
    inner.publish(outcome);
}
