//! Task specifications — what a job runs.
//!
//! A task is either an external command (program + argv + env) or an op: a
//! named function dispatched inside a worker binary, carried to the child as
//! a base64-encoded payload on its argv. Ops default to re-executing the
//! current executable, so an embedder that calls `hatch_worker::serve` early
//! in `main` can fan its own functions out across processes.

use std::path::PathBuf;

use serde_json::Value;

use hatch_types::encode_op_call;

/// Description of an external command to spawn.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Program name or path. Resolution is left to the OS.
    pub program: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
    /// Extra environment entries.
    pub env: Vec<(String, String)>,
    /// Working directory, if overridden.
    pub cwd: Option<PathBuf>,
    /// Start from an empty environment.
    pub clear_env: bool,
}

impl CommandSpec {
    /// A command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            clear_env: false,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the child's working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Start the child with an empty environment.
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Short human-readable description, for logs.
    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// An op invocation: a named function run inside a worker binary.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    /// Worker binary to execute. `None` means the current executable.
    pub worker: Option<PathBuf>,
    /// Registered op name.
    pub name: String,
    /// Argument value handed to the op.
    pub arg: Value,
}

/// What a job runs. Retained by the job so it can be restarted.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSpec {
    /// Spawn an external command.
    Command(CommandSpec),
    /// Dispatch a named op in a worker process.
    Op(OpSpec),
}

impl TaskSpec {
    /// An external command task.
    pub fn command(program: impl Into<String>) -> CommandSpec {
        CommandSpec::new(program)
    }

    /// An op task against the current executable.
    pub fn op(name: impl Into<String>, arg: Value) -> Self {
        TaskSpec::Op(OpSpec { worker: None, name: name.into(), arg })
    }

    /// An op task against an explicit worker binary.
    pub fn op_in(worker: impl Into<PathBuf>, name: impl Into<String>, arg: Value) -> Self {
        TaskSpec::Op(OpSpec {
            worker: Some(worker.into()),
            name: name.into(),
            arg,
        })
    }

    /// Resolve this task into the command line actually spawned.
    pub fn to_command(&self) -> CommandSpec {
        match self {
            TaskSpec::Command(spec) => spec.clone(),
            TaskSpec::Op(op) => {
                let program = op
                    .worker
                    .clone()
                    .or_else(|| std::env::current_exe().ok())
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "hatch-worker".to_string());
                CommandSpec::new(program).arg(encode_op_call(&op.name, &op.arg))
            }
        }
    }

    /// Short human-readable description, for logs.
    pub fn describe(&self) -> String {
        match self {
            TaskSpec::Command(spec) => spec.describe(),
            TaskSpec::Op(op) => format!("op:{}", op.name),
        }
    }
}

impl From<CommandSpec> for TaskSpec {
    fn from(spec: CommandSpec) -> Self {
        TaskSpec::Command(spec)
    }
}
