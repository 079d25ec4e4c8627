//! hatch-worker: the child-side bootstrap for the hatch runtime.
//!
//! A worker binary is what the parent spawns for op tasks. This crate is
//! both that binary and the library for building custom ones:
//!
//! ```no_run
//! use hatch_worker::{register_builtins, serve, OpRegistry};
//!
//! fn main() {
//!     let mut registry = OpRegistry::new();
//!     register_builtins(&mut registry);
//!     registry.register("greet", |arg, _link| {
//!         Ok(serde_json::json!(format!("hello, {arg}")))
//!     });
//!     serve(&registry);
//! }
//! ```
//!
//! The protocol: the worker receives one encoded `{op, arg}` call on argv,
//! runs the op with a [`WorkerLink`] bound to its stdio, writes the return
//! value as a final frame, and exits 0 — or writes a structured error
//! record to stderr and exits 1.

pub mod link;
pub mod ops;
pub mod registry;

pub use link::WorkerLink;
pub use ops::register_builtins;
pub use registry::{run, serve, OpFn, OpRegistry};
