//! Op registration and the bootstrap protocol.
//!
//! A worker process is invoked with one argument: a base64-encoded
//! `{op, arg}` call. The bootstrap validates it, dispatches through the
//! registry, hands the op a [`WorkerLink`] bound to the child's stdio, and
//! frames the op's return value as the final frame on stdout. Failures are
//! written to stderr as structured records with exit code 1, so the parent
//! can reconstitute them.

use std::collections::HashMap;

use serde_json::Value;

use hatch_types::{decode_op_call, WorkerError};

use crate::link::WorkerLink;

/// An op: the child-side unit of work.
pub type OpFn = Box<dyn Fn(Value, &mut WorkerLink) -> Result<Value, WorkerError> + Send + Sync>;

/// Name → op table, compiled into the worker binary.
#[derive(Default)]
pub struct OpRegistry {
    ops: HashMap<String, OpFn>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an op under a name. A later registration under the same
    /// name replaces the earlier one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        op: impl Fn(Value, &mut WorkerLink) -> Result<Value, WorkerError> + Send + Sync + 'static,
    ) {
        self.ops.insert(name.into(), Box::new(op));
    }

    pub fn get(&self, name: &str) -> Option<&OpFn> {
        self.ops.get(name)
    }

    /// Registered op names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Run the bootstrap protocol over the given argv tail and link. Returns the
/// process exit code.
pub fn run(registry: &OpRegistry, args: &[String], link: &mut WorkerLink) -> i32 {
    let payload = match args.first().map(String::as_str) {
        Some(p) if !p.trim().is_empty() => p,
        _ => {
            return fail(
                link,
                WorkerError::Usage("hatch-worker <encoded-task>".to_string()),
            )
        }
    };

    let Some((name, arg)) = decode_op_call(payload) else {
        return fail(
            link,
            WorkerError::Decode("argument is not an encoded op call".to_string()),
        );
    };

    let Some(op) = registry.get(&name) else {
        return fail(link, WorkerError::UnknownOp(name));
    };

    match op(arg, link) {
        Ok(value) => match link.finish(&value) {
            Ok(()) => 0,
            Err(e) => fail(link, e),
        },
        Err(e) => fail(link, e),
    }
}

/// Bootstrap entry for a worker binary: run the protocol over the real argv
/// and stdio and exit with its code.
pub fn serve(registry: &OpRegistry) -> ! {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut link = WorkerLink::stdio();
    let code = run(registry, &args, &mut link);
    std::process::exit(code);
}

fn fail(link: &mut WorkerLink, err: WorkerError) -> i32 {
    link.report(&err.to_record());
    1
}
