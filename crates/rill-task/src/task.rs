//! Task — a handle to one cancellable asynchronous computation.
//!
//! A [`Task`] wraps a body closure (async, receiving a
//! [`CancellationToken`]) and runs it at most once on its own tokio task.
//! Completion is broadcast through a one-shot `watch` signal; the outcome is
//! stored exactly once and handed out as a clone to every waiter.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Terminal error of an [`Awaitable`] handle.
///
/// Stored once per handle and cloned to every waiter, so arbitrary task-body
/// failures are carried behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The handle's cancellation scope fired before the work completed.
    #[error("task cancelled")]
    Cancelled,
    /// A deadline expired while waiting (see [`crate::wait_timeout`]).
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The task body returned an error of its own.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
}

impl TaskError {
    /// Wrap an arbitrary error as a task failure.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Failed(Arc::new(err.into()))
    }

    /// True for the cancellation class of outcomes (explicit cancel, parent
    /// scope cancellation, or deadline expiry).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled | TaskError::DeadlineExceeded)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::failed(err)
    }
}

/// Lifecycle contract shared by every awaitable handle.
///
/// [`Task`] implements it directly; `rill-sh` re-implements the same state
/// machine for process stages. The combinators in [`crate::combinator`]
/// accept any implementor.
#[async_trait]
pub trait Awaitable: Send + Sync {
    /// The payload produced on success. Cloned to every waiter.
    type Output: Clone + Send + 'static;

    /// Request that execution begin.
    ///
    /// Idempotent: racing callers collapse to a single execution of the task
    /// body. Returns the handle so calls can be chained.
    fn start(&self) -> &Self;

    /// Request cooperative cancellation.
    ///
    /// Never blocks and never forces termination: the task body must observe
    /// its token. Safe before start, during execution, after completion, and
    /// repeatedly.
    fn cancel(&self);

    /// The completion signal, for use in multi-way waits.
    ///
    /// The receiver observes `true` only after the outcome has been
    /// published, and the signal never resets.
    fn done(&self) -> watch::Receiver<bool>;

    /// Non-blocking completion check.
    fn is_done(&self) -> bool {
        *self.done().borrow()
    }

    /// Wait until the handle is terminal, then return the stored outcome.
    ///
    /// Whether `wait` also starts the handle is implementor-defined: a bare
    /// [`Task`] must be started explicitly, a pipeline stage starts itself.
    async fn wait(&self) -> Result<Self::Output, TaskError>;
}

/// Boxed future produced by a task body.
type BoxOutcome<T> = Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send + 'static>>;

/// The task body closure: consumed by the start winner, at most once.
type TaskSpec<T> = Box<dyn FnOnce(CancellationToken) -> BoxOutcome<T> + Send + 'static>;

struct Inner<T> {
    /// Child scope derived from the creation scope.
    scope: CancellationToken,
    /// Start latch: the first swap wins, every later call is a no-op.
    started: AtomicBool,
    /// Taken by the start winner.
    spec: Mutex<Option<TaskSpec<T>>>,
    /// Terminal outcome. Written exactly once, before `done` fires.
    outcome: Mutex<Option<Result<T, TaskError>>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl<T> Inner<T> {
    /// Store the outcome, then fire the completion signal.
    ///
    /// The order is load-bearing: waiters read the slot only after observing
    /// the signal, so the slot must be filled first.
    fn publish(&self, outcome: Result<T, TaskError>) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        *slot = Some(outcome);
        drop(slot);
        self.done_tx.send_replace(true);
    }
}

/// Handle to one cancellable asynchronous computation.
///
/// Cheap to clone; every clone refers to the same task instance, and the
/// underlying body runs at most once no matter how many clones call
/// [`Awaitable::start`].
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Create a task in the pending state.
    ///
    /// Derives a child cancellation scope from `scope` and stores `spec`
    /// without running it; call [`Awaitable::start`] to begin execution.
    pub fn new<F, Fut>(scope: &CancellationToken, spec: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let (done_tx, done_rx) = watch::channel(false);
        let spec: TaskSpec<T> = Box::new(move |scope| {
            let fut: BoxOutcome<T> = Box::pin(spec(scope));
            fut
        });
        Self {
            inner: Arc::new(Inner {
                scope: scope.child_token(),
                started: AtomicBool::new(false),
                spec: Mutex::new(Some(spec)),
                outcome: Mutex::new(None),
                done_tx,
                done_rx,
            }),
        }
    }

    /// Create a task and immediately start it.
    pub fn spawn<F, Fut>(scope: &CancellationToken, spec: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let task = Self::new(scope, spec);
        task.start();
        task
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Awaitable for Task<T> {
    type Output = T;

    fn start(&self) -> &Self {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return self;
        }
        let Some(spec) = self
            .inner
            .spec
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return self;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let scope = inner.scope.clone();
            let outcome = spec(scope).await;
            tracing::trace!(failed = outcome.is_err(), "task body finished");
            inner.publish(outcome);
        });
        self
    }

    fn cancel(&self) {
        self.inner.scope.cancel();
    }

    fn done(&self) -> watch::Receiver<bool> {
        self.inner.done_rx.clone()
    }

    async fn wait(&self) -> Result<T, TaskError> {
        let mut done = self.inner.done_rx.clone();
        let _ = done.wait_for(|&fired| fired).await;
        let slot = self.inner.outcome.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().unwrap_or(Err(TaskError::Cancelled))
    }
}
