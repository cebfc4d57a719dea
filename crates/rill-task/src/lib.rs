//! rill-task: cancellable task handles and wait combinators.
//!
//! This crate provides:
//!
//! - **[`Task`]**: a handle to one asynchronous computation, with
//!   start/cancel/wait/poll lifecycle operations
//! - **[`Awaitable`]**: the lifecycle contract shared by every handle, so
//!   other crates can plug their own specializations into the combinators
//! - **[`TaskError`]**: the cancellation / deadline / task-body error taxonomy
//! - **[`wait_all`] / [`wait_timeout`]**: compose independent handles under a
//!   shared cancellation scope or deadline
//!
//! Cancellation is cooperative and hierarchical: every handle derives a child
//! [`CancellationToken`] from the scope it was created under, and the task
//! body must observe its token to actually stop early.

pub mod combinator;
mod task;

pub use combinator::{wait_all, wait_timeout};
pub use task::{Awaitable, Task, TaskError};

// The cancellation scope type is part of the public API surface.
pub use tokio_util::sync::CancellationToken;
