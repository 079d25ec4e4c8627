//! hatch-core: the process-based concurrency runtime.
//!
//! This crate provides:
//!
//! - **Tasks**: what to run — external commands or worker ops
//! - **Process handles**: one abstraction over a reactor-backed and a
//!   blocking subprocess backend
//! - **Jobs**: the lifecycle state machine for one spawned unit of work,
//!   with timeouts, typed callbacks, and output/result decoding
//! - **Channel**: the framed IPC pump between parent and child
//! - **Tracker**: in-flight bookkeeping and the per-tick dispatch step
//! - **Pool**: the bounded-concurrency FIFO scheduler
//! - **Free functions**: `run`, `output`, `run_all` for one-shot use
//!
//! ```no_run
//! use hatch_core::{Pool, TaskSpec};
//!
//! # async fn demo() -> Result<(), hatch_core::JobError> {
//! let mut pool = Pool::with_concurrency(4);
//! for host in ["one", "two", "three"] {
//!     pool.add(TaskSpec::command("ping").args(["-c", "1", host]));
//! }
//! let results = pool.wait().await?;
//! # let _ = results; Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod job;
pub mod pool;
pub mod process;
pub mod run;
pub mod task;
pub mod tracker;

pub use channel::{Channel, Drain, Message};
pub use codec::{FrameScanner, StreamItem};
pub use job::{DeliveryMode, Job, Outcome, Progress, DEFAULT_POLL};
pub use pool::{Pool, DEFAULT_CONCURRENCY};
pub use process::{launch, BlockingProcess, ProcessHandle, ReactorProcess};
pub use run::{job, output, run, run_all};
pub use task::{CommandSpec, OpSpec, TaskSpec};
pub use tracker::{Tracker, DEFAULT_SLEEP};

// Wire vocabulary, re-exported for embedders
pub use hatch_types::{
    ChannelError, ErrorRecord, ExitSummary, Frame, FrameTag, JobError, JobId, JobStatus,
    SpawnError,
};
