//! Fluent builders for command stages.
//!
//! [`CmdBuilder`] renders a program name plus flags, options, arguments, and
//! subcommands into an argv list and constructs a pending [`Cmd`].
//! [`PipeBuilder`] does the same for a stage chained to an existing stage's
//! captured stdout. Nothing executes until the built stage is started or
//! awaited.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cmd::Cmd;

/// Error constructing a stage from a builder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// The builder was given an empty program name.
    #[error("no program specified")]
    EmptyProgram,
}

enum Component {
    Flag(String),
    Opt(String, String),
    Arg(String),
    Subcommand(String),
}

impl Component {
    fn render(&self, argv: &mut Vec<String>) {
        match self {
            Component::Flag(flag) => argv.push(flag.clone()),
            Component::Opt(key, value) => {
                argv.push(key.clone());
                argv.push(value.clone());
            }
            Component::Arg(value) => argv.push(value.clone()),
            Component::Subcommand(name) => argv.push(name.clone()),
        }
    }
}

/// Fluent builder for one command stage.
///
/// Components render in the order they are added, after the program name.
pub struct CmdBuilder {
    program: String,
    components: Vec<Component>,
}

impl CmdBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            components: Vec::new(),
        }
    }

    /// Add a boolean flag such as `-v`. Empty flags are skipped.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        let flag = flag.into();
        if !flag.is_empty() {
            self.components.push(Component::Flag(flag));
        }
        self
    }

    /// Add a flag with a value, such as `--output json`. Empty keys are
    /// skipped.
    pub fn opt(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.components.push(Component::Opt(key, value.to_string()));
        }
        self
    }

    /// Add a positional argument.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.components.push(Component::Arg(value.into()));
        self
    }

    /// Add a subcommand name, as in `git status`. Flags and arguments added
    /// after this call render after the subcommand name.
    pub fn subcommand(mut self, name: impl Into<String>) -> Self {
        self.components.push(Component::Subcommand(name.into()));
        self
    }

    /// The rendered command line, program name first.
    pub fn render(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.components.len() * 2 + 1);
        argv.push(self.program.clone());
        for component in &self.components {
            component.render(&mut argv);
        }
        argv
    }

    /// Construct a pending stage under a child scope of `scope`.
    pub fn build(self, scope: &CancellationToken) -> Result<Cmd, BuildError> {
        self.build_stage(scope, None)
    }

    fn build_stage(
        self,
        scope: &CancellationToken,
        upstream: Option<Cmd>,
    ) -> Result<Cmd, BuildError> {
        if self.program.is_empty() {
            return Err(BuildError::EmptyProgram);
        }
        let mut argv = self.render();
        let program = argv.remove(0);
        Ok(Cmd::new(program, argv, scope, upstream))
    }
}

/// Builder for a stage whose stdin is an existing stage's captured stdout.
///
/// Produced by [`Cmd::pipe`]. The downstream stage's scope derives from the
/// upstream stage's scope, so a cancellation anywhere upstream reaches it.
pub struct PipeBuilder {
    from: Cmd,
    builder: CmdBuilder,
}

impl PipeBuilder {
    pub(crate) fn new(from: Cmd, builder: CmdBuilder) -> Self {
        Self { from, builder }
    }

    /// Add a boolean flag to the downstream command.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.builder = self.builder.flag(flag);
        self
    }

    /// Add a flag with a value to the downstream command.
    pub fn opt(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.builder = self.builder.opt(key, value);
        self
    }

    /// Add a positional argument to the downstream command.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.builder = self.builder.arg(value);
        self
    }

    /// Add a subcommand name to the downstream command.
    pub fn subcommand(mut self, name: impl Into<String>) -> Self {
        self.builder = self.builder.subcommand(name);
        self
    }

    /// Construct the downstream stage with its upstream reference in place.
    pub fn build(self) -> Result<Cmd, BuildError> {
        let scope = self.from.scope().clone();
        self.builder.build_stage(&scope, Some(self.from))
    }
}
