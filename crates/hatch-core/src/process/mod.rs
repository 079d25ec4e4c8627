//! Subprocess backends behind one handle abstraction.
//!
//! The runtime never talks to an OS process directly; it drives a
//! [`ProcessHandle`], which exposes non-blocking drains of the child's
//! stdout/stderr, a best-effort stdin sink, signal delivery, and a polled
//! completion summary. Two implementations satisfy the contract:
//!
//! - [`ReactorProcess`] — `tokio::process` based; pipes are pumped by
//!   spawned reader tasks, exit is observed by a waiter task. Stops are
//!   asynchronous: the signal is sent and the exit shows up on a later poll.
//! - [`BlockingProcess`] — `std::process` based; pipes are pumped by plain
//!   threads, exit is observed via `try_wait`. Stops are synchronous: the
//!   call returns only once the child is confirmed gone.
//!
//! The backend is chosen once, at launch, from runtime capability: inside a
//! tokio runtime the reactor backend is used, otherwise the blocking one.
//! Nothing above this module branches on backend identity.

mod blocking;
mod reactor;

pub use blocking::BlockingProcess;
pub use reactor::ReactorProcess;

use async_trait::async_trait;

use hatch_types::{ExitSummary, SpawnError};

use crate::task::TaskSpec;

/// Strongest available stop signal (SIGKILL).
pub const STOP_SIGNAL: i32 = 9;
/// Soft stop used by the timeout path (SIGINT).
pub const TIMEOUT_SIGNAL: i32 = 2;

/// One spawned OS process, as the runtime sees it.
///
/// All methods except `start` are non-blocking unless the implementation
/// documents otherwise.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Spawn the process. Calling `start` twice is an error.
    async fn start(&mut self) -> Result<(), SpawnError>;

    /// OS pid, once started.
    fn pid(&self) -> Option<u32>;

    /// Completion summary, once the process has been reaped. Non-blocking;
    /// `None` while the process is still running (or not yet started). All
    /// captured output is observable through the drains by the time this
    /// returns `Some`.
    fn poll_exit(&mut self) -> Option<ExitSummary>;

    /// Deliver a signal. Reactor: fire-and-forget. Blocking: waits for the
    /// confirmed exit before returning.
    fn stop(&mut self, signal: i32);

    /// Everything the child wrote to stdout since the last drain.
    fn drain_stdout(&mut self) -> Vec<u8>;

    /// Everything the child wrote to stderr since the last drain.
    fn drain_stderr(&mut self) -> Vec<u8>;

    /// Queue bytes for the child's stdin. Best-effort: writes to a child
    /// that is gone are dropped.
    fn write_stdin(&mut self, bytes: &[u8]);

    /// Close the child's stdin, delivering EOF to its next read.
    fn close_stdin(&mut self);

    /// True from a successful `start` until `poll_exit` reports.
    fn is_running(&mut self) -> bool {
        self.pid().is_some() && self.poll_exit().is_none()
    }

    /// True once the process has been reaped.
    fn is_terminated(&mut self) -> bool {
        self.poll_exit().is_some()
    }

    /// True once reaped with exit code zero.
    fn is_successful(&mut self) -> bool {
        self.poll_exit().is_some_and(|e| e.success())
    }
}

/// Build the right backend for the current runtime.
pub fn launch(task: &TaskSpec) -> Box<dyn ProcessHandle> {
    let spec = task.to_command();
    if tokio::runtime::Handle::try_current().is_ok() {
        Box::new(ReactorProcess::new(spec))
    } else {
        Box::new(BlockingProcess::new(spec))
    }
}

/// Map an OS exit status to a summary.
pub(crate) fn summarize(status: std::process::ExitStatus) -> ExitSummary {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitSummary::signaled(signal);
        }
    }
    ExitSummary::exited(status.code().unwrap_or(-1))
}

/// Deliver `signal` to `pid`, best-effort.
#[cfg(unix)]
pub(crate) fn deliver_signal(pid: u32, signal: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let sig = Signal::try_from(signal).unwrap_or(Signal::SIGKILL);
    if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
        tracing::debug!("signal {} to pid {} failed: {}", signal, pid, e);
    }
}

#[cfg(not(unix))]
pub(crate) fn deliver_signal(_pid: u32, _signal: i32) {
    tracing::debug!("signal delivery is not supported on this platform");
}
