//! Combinators for waiting on several handles under one scope.
//!
//! - [`wait_all`]: wait for every handle in input order, failing fast on the
//!   first error
//! - [`wait_timeout`]: bound one handle's wait with a deadline that cancels
//!   the handle on expiry

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::task::{Awaitable, TaskError};

/// Wait for every handle, in the order given.
///
/// Each handle's completion signal is raced against a child scope derived
/// from `scope`. The first handle error is returned as-is, without cancelling
/// the remaining handles; if the scope itself fires first, every handle in
/// the input list is cancelled before [`TaskError::Cancelled`] is returned.
///
/// Results are collected in input order, not completion order. An empty
/// input yields `Ok(vec![])` immediately.
///
/// `wait_all` never starts a handle: callers start them (or rely on
/// implicit-start semantics of the handle type) before waiting.
pub async fn wait_all<A: Awaitable>(
    scope: &CancellationToken,
    handles: &[A],
) -> Result<Vec<A::Output>, TaskError> {
    let scope = scope.child_token();
    let mut results = Vec::with_capacity(handles.len());

    for handle in handles {
        let mut done = handle.done();
        tokio::select! {
            _ = done.wait_for(|&fired| fired) => {
                results.push(handle.wait().await?);
            }
            _ = scope.cancelled() => {
                for handle in handles {
                    handle.cancel();
                }
                return Err(TaskError::Cancelled);
            }
        }
    }

    Ok(results)
}

/// Wait for one handle with an overall deadline.
///
/// The deadline lives in its own scope, independent of whatever scope the
/// handle was created under: on expiry the handle is cancelled and
/// [`TaskError::DeadlineExceeded`] is returned, even if the handle's own
/// parent scope never fires. Completion before the deadline yields the
/// handle's own outcome.
pub async fn wait_timeout<A: Awaitable>(
    timeout: Duration,
    handle: &A,
) -> Result<A::Output, TaskError> {
    let mut done = handle.done();
    tokio::select! {
        _ = done.wait_for(|&fired| fired) => handle.wait().await,
        _ = tokio::time::sleep(timeout) => {
            handle.cancel();
            Err(TaskError::DeadlineExceeded)
        }
    }
}
