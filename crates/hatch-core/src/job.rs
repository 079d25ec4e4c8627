//! One spawned unit of work and its eventual outcome.
//!
//! A `Job` owns one process handle plus its own timeout clock, output
//! accumulation, result decoding, and callback lists. Its lifecycle is
//!
//! ```text
//!   Unset ──start──▶ Running ──▶ Success | Failed | TimedOut | Signaled
//! ```
//!
//! Terminal states are absorbing; a job leaves `Running` exactly once and
//! exactly one callback family fires for the transition. A failure with no
//! error callback registered propagates as `Err` out of the waiting call;
//! timeouts and signals never do.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use hatch_types::{
    decode_frame, ErrorRecord, ExitSummary, FrameTag, JobError, JobId, JobStatus, SpawnError,
};

use crate::channel::{Channel, Message};
use crate::codec::{value_to_text, FrameScanner, StreamItem};
use crate::process::{self, ProcessHandle, STOP_SIGNAL, TIMEOUT_SIGNAL};
use crate::task::TaskSpec;

/// Default interval between polls inside [`Job::wait`].
pub const DEFAULT_POLL: Duration = Duration::from_millis(1);

/// One piece of streamed child activity, delivered to progress callbacks in
/// arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// A decoded IPC message frame.
    Message(Value),
    /// Plain stdout text.
    Stdout(String),
    /// Plain stderr text.
    Stderr(String),
}

/// How a terminal transition reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Run the registered callbacks at the transition (the default).
    #[default]
    Immediate,
    /// Park the outcome for the caller to pull via [`Job::take_outcome`].
    Deferred,
}

/// A parked terminal outcome, for [`DeliveryMode::Deferred`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Option<Value>),
    Failed(JobError),
    TimedOut,
    Signaled(i32),
}

type SuccessFn = Box<dyn FnMut(Option<&Value>) + Send>;
type ErrorFn = Box<dyn FnMut(&JobError) + Send>;
type TimeoutFn = Box<dyn FnMut() + Send>;
type SignalFn = Box<dyn FnMut(i32) + Send>;
type ProgressFn = Box<dyn FnMut(&Progress, &Channel) + Send>;

#[derive(Default)]
struct Callbacks {
    success: Vec<SuccessFn>,
    error: Vec<ErrorFn>,
    timeout: Vec<TimeoutFn>,
    signal: HashMap<i32, Vec<SignalFn>>,
    progress: Vec<ProgressFn>,
}

/// A handle to one spawned unit of work. See the module docs.
pub struct Job {
    id: JobId,
    task: TaskSpec,
    timeout: Duration,
    started_at: Option<Instant>,
    status: JobStatus,
    signal: Option<i32>,
    handle: Option<Box<dyn ProcessHandle>>,
    pid: Option<u32>,
    scanner: FrameScanner,
    output: String,
    err_output: String,
    result: Option<Value>,
    error: Option<JobError>,
    callbacks: Callbacks,
    channel: Channel,
    stdin_closed: bool,
    delivery: DeliveryMode,
    outcome: Option<Outcome>,
    delivered: bool,
}

impl Job {
    /// A fresh, unstarted job with no timeout and a fresh channel.
    pub fn new(task: impl Into<TaskSpec>) -> Self {
        Self {
            id: JobId::next(),
            task: task.into(),
            timeout: Duration::ZERO,
            started_at: None,
            status: JobStatus::Unset,
            signal: None,
            handle: None,
            pid: None,
            scanner: FrameScanner::new(),
            output: String::new(),
            err_output: String::new(),
            result: None,
            error: None,
            callbacks: Callbacks::default(),
            channel: Channel::new(),
            stdin_closed: false,
            delivery: DeliveryMode::Immediate,
            outcome: None,
            delivered: false,
        }
    }

    /// Wall-clock budget; zero (the default) disables the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach an externally held channel instead of the job's own.
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Select how the terminal transition is delivered.
    pub fn with_delivery(mut self, mode: DeliveryMode) -> Self {
        self.delivery = mode;
        self
    }

    /// Run on success, with the decoded final value if the child returned one.
    pub fn on_success(mut self, f: impl FnMut(Option<&Value>) + Send + 'static) -> Self {
        self.callbacks.success.push(Box::new(f));
        self
    }

    /// Run on failure. Registering any error callback stops the failure from
    /// propagating out of `wait`.
    pub fn on_error(mut self, f: impl FnMut(&JobError) + Send + 'static) -> Self {
        self.callbacks.error.push(Box::new(f));
        self
    }

    /// Run when the timeout fires.
    pub fn on_timeout(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.callbacks.timeout.push(Box::new(f));
        self
    }

    /// Run when the child is killed by exactly this signal.
    pub fn on_signal(mut self, signal: i32, f: impl FnMut(i32) + Send + 'static) -> Self {
        self.callbacks.signal.entry(signal).or_default().push(Box::new(f));
        self
    }

    /// Run for every streamed chunk and IPC message, with a channel handle
    /// for replying to the child.
    pub fn on_progress(mut self, f: impl FnMut(&Progress, &Channel) + Send + 'static) -> Self {
        self.callbacks.progress.push(Box::new(f));
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// The signal that terminated the child, if one did.
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The task this job runs; kept for `restart`.
    pub fn task(&self) -> &TaskSpec {
        &self.task
    }

    /// The channel feeding this job's child.
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Everything visible the child has produced: plain stdout plus the text
    /// rendering of streamed message frames, in arrival order.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Raw accumulated stderr.
    pub fn error_output(&self) -> &str {
        &self.err_output
    }

    /// The decoded final value, once the child has returned one.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The resolved failure, once the job has failed.
    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_successful(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn is_terminated(&self) -> bool {
        self.status.is_terminal()
    }

    /// True while a configured timeout has been exceeded.
    pub fn is_timed_out(&self) -> bool {
        if self.timeout.is_zero() {
            return false;
        }
        match self.started_at {
            Some(at) => at.elapsed() > self.timeout,
            None => false,
        }
    }

    /// Spawn the child. Idempotent: a second call on a started job is a
    /// no-op, it never re-registers the stream readers.
    pub async fn start(&mut self) -> Result<(), SpawnError> {
        if self.handle.is_some() || self.status.is_terminal() {
            return Ok(());
        }
        let mut handle = process::launch(&self.task);
        match handle.start().await {
            Ok(()) => {
                self.pid = handle.pid();
                self.handle = Some(handle);
                self.started_at = Some(Instant::now());
                self.status = JobStatus::Running;
                tracing::debug!("job {} started {} (pid {:?})", self.id, self.task.describe(), self.pid);
                Ok(())
            }
            Err(e) => {
                self.status = JobStatus::Failed;
                self.error = Some(JobError::Spawn(e.clone()));
                tracing::debug!("job {} failed to start: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Request termination with the given signal (default: the strongest
    /// available). Reactor-backed children exit asynchronously; the blocking
    /// backend confirms the exit before returning.
    pub fn stop(&mut self, signal: Option<i32>) {
        let signal = signal.unwrap_or(STOP_SIGNAL);
        if let Some(handle) = self.handle.as_mut() {
            tracing::debug!("job {} stopping with signal {}", self.id, signal);
            handle.stop(signal);
        }
    }

    /// Stop this job if running and clone its definition into a brand-new
    /// job with the same id and timeout. The old instance stays terminal;
    /// callers rebind to the returned one.
    pub fn restart(&mut self) -> Job {
        if self.status == JobStatus::Running {
            self.stop(None);
        }
        let mut job = Job::new(self.task.clone());
        job.id = self.id;
        job.timeout = self.timeout;
        job
    }

    /// Release process resources and empty every buffer. Idempotent; never
    /// reopens a terminal job.
    pub fn close(&mut self) {
        self.handle = None;
        self.scanner = FrameScanner::new();
        self.output.clear();
        self.err_output.clear();
        self.result = None;
        self.error = None;
        self.outcome = None;
        self.stdin_closed = false;
    }

    /// Block until the job reaches a terminal state, then deliver it.
    /// Returns the decoded final value on success.
    pub async fn wait(&mut self) -> Result<Option<Value>, JobError> {
        self.wait_with(DEFAULT_POLL).await
    }

    /// [`Job::wait`] with an explicit poll interval. The timeout check runs
    /// every iteration so it preempts a long-running child.
    pub async fn wait_with(&mut self, poll: Duration) -> Result<Option<Value>, JobError> {
        if self.status == JobStatus::Unset {
            // A spawn failure leaves the job Failed; delivery below decides
            // whether it propagates.
            let _ = self.start().await;
        }
        while !self.tick() {
            tokio::time::sleep(poll).await;
        }
        self.deliver()?;
        Ok(self.result.clone())
    }

    /// Blocking counterpart of [`Job::wait`], for callers outside a
    /// reactor: the backend selected at launch is the blocking one, and the
    /// poll loop sleeps on the thread. Timeout checks still run every
    /// iteration.
    pub fn wait_blocking(&mut self, poll: Duration) -> Result<Option<Value>, JobError> {
        if self.status == JobStatus::Unset {
            let _ = futures::executor::block_on(self.start());
        }
        while !self.tick() {
            std::thread::sleep(poll);
        }
        self.deliver()?;
        Ok(self.result.clone())
    }

    /// The parked outcome, in deferred delivery mode.
    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    /// One scheduler step: pump IPC and streams, then check timeout and
    /// completion. Returns true once the job is terminal. Stream draining
    /// happens before the checks so terminal buffers are complete.
    pub(crate) fn tick(&mut self) -> bool {
        if self.status.is_terminal() {
            return true;
        }
        if self.status == JobStatus::Unset {
            return false;
        }

        self.pump_channel();
        self.pump_streams();

        // Timeout preempts the completion check.
        if self.is_timed_out() {
            self.status = JobStatus::TimedOut;
            tracing::debug!("job {} timed out after {:?}", self.id, self.timeout);
            if let Some(handle) = self.handle.as_mut() {
                handle.stop(TIMEOUT_SIGNAL);
            }
            return true;
        }

        let exit = match self.handle.as_mut() {
            Some(handle) => handle.poll_exit(),
            None => None,
        };
        if let Some(exit) = exit {
            // The backend guarantees all output is drainable once the exit
            // is visible; collect it, flush the scanner, classify.
            self.pump_streams();
            let tail = self.scanner.finish();
            self.apply_items(tail);
            self.classify(exit);
            return true;
        }
        false
    }

    /// Deliver the terminal outcome exactly once, per the delivery mode.
    pub(crate) fn deliver(&mut self) -> Result<(), JobError> {
        if self.delivered || !self.status.is_terminal() {
            return Ok(());
        }
        self.delivered = true;

        let outcome = match self.status {
            JobStatus::Success => Outcome::Success(self.result.clone()),
            JobStatus::Failed => Outcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| JobError::Output("process failed".to_string())),
            ),
            JobStatus::TimedOut => Outcome::TimedOut,
            JobStatus::Signaled => Outcome::Signaled(self.signal.unwrap_or(0)),
            JobStatus::Unset | JobStatus::Running => unreachable!("guarded by is_terminal"),
        };

        match self.delivery {
            DeliveryMode::Deferred => {
                self.outcome = Some(outcome);
                Ok(())
            }
            DeliveryMode::Immediate => self.dispatch(outcome),
        }
    }

    fn dispatch(&mut self, outcome: Outcome) -> Result<(), JobError> {
        match outcome {
            Outcome::Success(value) => {
                for cb in &mut self.callbacks.success {
                    cb(value.as_ref());
                }
                Ok(())
            }
            Outcome::Failed(error) => {
                if self.callbacks.error.is_empty() {
                    // Nobody opted in: the failure belongs to the caller.
                    return Err(error);
                }
                for cb in &mut self.callbacks.error {
                    cb(&error);
                }
                Ok(())
            }
            Outcome::TimedOut => {
                for cb in &mut self.callbacks.timeout {
                    cb();
                }
                Ok(())
            }
            Outcome::Signaled(signal) => {
                if let Some(cbs) = self.callbacks.signal.get_mut(&signal) {
                    for cb in cbs {
                        cb(signal);
                    }
                }
                Ok(())
            }
        }
    }

    /// Flush queued channel messages into the child's stdin; once the
    /// channel is closed and drained, close stdin so the child sees EOF.
    fn pump_channel(&mut self) {
        let batch = self.channel.pump_batch();
        let Some(handle) = self.handle.as_mut() else { return };
        for message in batch {
            match message {
                Message::Text(text) => {
                    let line =
                        hatch_types::encode_frame(&Value::String(text), FrameTag::Message);
                    handle.write_stdin(line.as_bytes());
                }
                Message::Bytes(bytes) => handle.write_stdin(&bytes),
                // send() flattens to Text/Bytes leaves
                Message::Null | Message::Value(_) | Message::Seq(_) => {}
            }
        }
        if self.channel.is_closed() && self.channel.is_empty() && !self.stdin_closed {
            handle.close_stdin();
            self.stdin_closed = true;
        }
    }

    fn pump_streams(&mut self) {
        let (out, err) = match self.handle.as_mut() {
            Some(handle) => (handle.drain_stdout(), handle.drain_stderr()),
            None => return,
        };
        if !out.is_empty() {
            let items = self.scanner.push(&out);
            self.apply_items(items);
        }
        if !err.is_empty() {
            let text = String::from_utf8_lossy(&err).into_owned();
            self.err_output.push_str(&text);
            self.fire_progress(Progress::Stderr(text));
        }
    }

    fn apply_items(&mut self, items: Vec<StreamItem>) {
        for item in items {
            match item {
                StreamItem::Text(text) => {
                    self.output.push_str(&text);
                    self.fire_progress(Progress::Stdout(text));
                }
                StreamItem::Frame(frame) => match frame.tag {
                    FrameTag::Final => {
                        self.result = Some(frame.payload);
                    }
                    FrameTag::Message => {
                        self.output.push_str(&value_to_text(&frame.payload));
                        self.fire_progress(Progress::Message(frame.payload));
                    }
                    // An error record on stdout is misplaced; keep it visible
                    FrameTag::Error => {
                        self.output.push_str(&value_to_text(&frame.payload));
                    }
                },
            }
        }
    }

    fn fire_progress(&mut self, progress: Progress) {
        if self.callbacks.progress.is_empty() {
            return;
        }
        let channel = self.channel.clone();
        for cb in &mut self.callbacks.progress {
            cb(&progress, &channel);
        }
    }

    /// Resolve the terminal state from an exit summary. Only reached while
    /// `Running`: the timeout path marks its status before its signal lands,
    /// which is what tells an internally sent SIGINT apart from a user stop.
    fn classify(&mut self, exit: ExitSummary) {
        if let Some(signal) = exit.signal {
            self.signal = Some(signal);
            self.status = JobStatus::Signaled;
            tracing::debug!("job {} terminated by signal {}", self.id, signal);
            return;
        }
        if exit.success() && self.err_output.is_empty() {
            self.status = JobStatus::Success;
            tracing::debug!("job {} succeeded", self.id);
        } else {
            // Any stderr text fails the job, even on a zero exit.
            self.error = Some(self.resolve_error(exit));
            self.status = JobStatus::Failed;
            tracing::debug!("job {} failed: {:?}", self.id, self.error);
        }
    }

    /// Reconstitute the child's failure: a structured record on stderr wins,
    /// raw stderr text is the fallback, and an empty stderr reports the code.
    fn resolve_error(&self, exit: ExitSummary) -> JobError {
        for line in self.err_output.lines() {
            if let Some(frame) = decode_frame(line) {
                if frame.tag == FrameTag::Error {
                    if let Some(record) = ErrorRecord::from_payload(&frame.payload) {
                        return JobError::from_record(record);
                    }
                }
            }
        }
        if self.err_output.is_empty() {
            JobError::Output(format!(
                "process exited with code {}",
                exit.code.unwrap_or(-1)
            ))
        } else {
            JobError::Output(self.err_output.clone())
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("status", &self.status)
            .field("task", &self.task.describe())
            .finish()
    }
}
