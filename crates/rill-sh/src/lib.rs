//! rill-sh: external commands as cancellable, pipeable stages.
//!
//! A [`Cmd`] is a pipeline stage: one external-process invocation with the
//! same start/cancel/wait/poll lifecycle as a `rill_task::Task`, plus an
//! optional upstream stage whose captured stdout becomes this stage's stdin.
//! Stages are built with the fluent [`CmdBuilder`] and chained with
//! [`Cmd::pipe`]; a chain activates head-to-tail on start, propagates
//! cancellation through the whole chain, and never spawns a downstream
//! process whose input producer failed.
//!
//! ```no_run
//! use rill_sh::{Awaitable, CmdBuilder};
//! use rill_task::CancellationToken;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = CancellationToken::new();
//! let words = CmdBuilder::new("echo")
//!     .arg("hello world")
//!     .build(&scope)?
//!     .pipe("wc")
//!     .flag("-w")
//!     .build()?;
//! let output = words.wait().await?;
//! assert_eq!(output.stdout_string().trim(), "2");
//! # Ok(())
//! # }
//! ```
//!
//! A non-zero exit is data, not an error: `wait` returns `Ok` with
//! [`CmdOutput::code`] set, and callers check it explicitly. Stage-level
//! errors are cancellation, spawn failure, and upstream-failure propagation.

mod builder;
mod cmd;
mod output;
mod spawn;

pub use builder::{BuildError, CmdBuilder, PipeBuilder};
pub use cmd::Cmd;
pub use output::CmdOutput;

// Re-exported so stages interoperate with the combinators without a separate
// rill-task import at every call site.
pub use rill_task::{Awaitable, CancellationToken, TaskError};
