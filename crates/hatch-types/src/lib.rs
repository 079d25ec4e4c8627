//! Pure data types for hatch — job identity, exit summaries, wire frames,
//! and the error taxonomy.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. It
//! exists so that child-side code (workers) and the parent-side runtime can
//! share the wire protocol and vocabulary without pulling in hatch-core's
//! process machinery.

pub mod error;
pub mod frame;
pub mod job;

// Flat re-exports for convenience
pub use error::*;
pub use frame::*;
pub use job::*;
