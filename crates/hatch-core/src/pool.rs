//! The bounded-concurrency scheduler.
//!
//! ```text
//!   add ──▶ [pending queue] ──notify──▶ [tracker] ──▶ result bins
//!                 ▲                        │
//!                 └── backfill on every ───┘
//!                     terminal transition
//! ```
//!
//! At most `concurrency` jobs run at once; the rest wait in a FIFO queue.
//! Every terminal transition first backfills the freed slot from the queue,
//! then records the job into its bin, then runs the job's own dispatch —
//! so the pool is always saturated while work remains. `results` collects
//! decoded final values in completion order, which is not submission order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;

use hatch_types::{JobError, JobId, JobStatus};

use crate::job::Job;
use crate::task::TaskSpec;
use crate::tracker::Tracker;

/// Default cap on simultaneously running jobs.
pub const DEFAULT_CONCURRENCY: usize = 100;

/// A reusable pool of subprocess jobs. See the module docs.
pub struct Pool {
    concurrency: usize,
    queue: VecDeque<Job>,
    tracker: Tracker,
    finished: HashMap<u32, Job>,
    failed: HashMap<u32, Job>,
    timed_out: HashMap<u32, Job>,
    signaled: HashMap<u32, Job>,
    results: Vec<Value>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            queue: VecDeque::new(),
            tracker: Tracker::new(),
            finished: HashMap::new(),
            failed: HashMap::new(),
            timed_out: HashMap::new(),
            signaled: HashMap::new(),
            results: Vec::new(),
        }
    }

    /// Adjust the concurrency cap. Affects jobs not yet promoted; running
    /// jobs are never preempted by a lower cap.
    pub fn concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Adjust the tick backoff used while waiting.
    pub fn sleep_time(&mut self, sleep_time: Duration) -> &mut Self {
        self.tracker.set_sleep_time(sleep_time);
        self
    }

    /// Queue a task and immediately try to promote it into a running slot.
    pub fn add(&mut self, task: impl Into<TaskSpec>) -> JobId {
        self.add_job(Job::new(task))
    }

    /// Queue a preconfigured job (timeout, callbacks, channel already set).
    pub fn add_job(&mut self, job: Job) -> JobId {
        let id = job.id();
        self.queue.push_back(job);
        self.notify();
        id
    }

    /// Promote the head of the pending queue if a slot is free. Does nothing
    /// at the cap — that refusal is the pool's back-pressure.
    pub fn notify(&mut self) {
        if self.tracker.len() >= self.concurrency {
            return;
        }
        if let Some(job) = self.queue.pop_front() {
            self.tracker.register(job);
        }
    }

    /// Jobs currently promoted and being polled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Jobs still waiting for a slot.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drive every queued and running job to completion. Returns the decoded
    /// final values in completion order. An unhandled job failure aborts the
    /// remaining drain and propagates, matching single-job `wait`.
    pub async fn wait(&mut self) -> Result<Vec<Value>, JobError> {
        loop {
            while self.tracker.len() < self.concurrency && !self.queue.is_empty() {
                self.notify();
            }
            if self.tracker.is_empty() && self.queue.is_empty() {
                break;
            }

            let finished = self.tracker.processing().await;
            let progressed = !finished.is_empty();
            for job in finished {
                // Backfill the freed slot before anything else: admission
                // control must not wait on callback work.
                self.notify();
                self.settle(job)?;
            }

            if !progressed && !(self.tracker.is_empty() && self.queue.is_empty()) {
                self.tracker.idle_wait().await;
            }
        }
        Ok(self.results.clone())
    }

    /// Record a terminal job into its bin and run its dispatch.
    fn settle(&mut self, mut job: Job) -> Result<(), JobError> {
        let key = Self::bin_key(&job);
        let status = job.status();
        let delivery = job.deliver();

        match status {
            JobStatus::Success => {
                // One entry per success; a child with no final frame counts
                // as returning null.
                self.results.push(job.result().cloned().unwrap_or(Value::Null));
                self.finished.insert(key, job);
            }
            JobStatus::TimedOut => {
                self.timed_out.insert(key, job);
            }
            JobStatus::Signaled => {
                self.signaled.insert(key, job);
            }
            _ => {
                self.failed.insert(key, job);
            }
        }
        delivery
    }

    /// Bins are keyed by OS pid; a job that never spawned has none and falls
    /// back to its sequence number.
    fn bin_key(job: &Job) -> u32 {
        job.pid().unwrap_or_else(|| job.id().seq())
    }

    /// Re-enqueue a previously run (or still tracked) job as a fresh restart
    /// of the same task. Pool bins and `results` are left as they are:
    /// further `wait` calls keep appending. Returns false for unknown ids.
    pub fn retry(&mut self, id: JobId) -> bool {
        let mut job = if let Some(job) = self.tracker.remove(id) {
            job
        } else if let Some(job) = self.take_from_bins(id) {
            job
        } else {
            return false;
        };
        self.add_job(job.restart());
        true
    }

    fn take_from_bins(&mut self, id: JobId) -> Option<Job> {
        for bin in [
            &mut self.finished,
            &mut self.failed,
            &mut self.timed_out,
            &mut self.signaled,
        ] {
            if let Some(key) = bin
                .iter()
                .find_map(|(key, job)| (job.id() == id).then_some(*key))
            {
                return bin.remove(&key);
            }
        }
        None
    }

    /// Look up a job anywhere in the pool: pending, running, or binned.
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.queue
            .iter()
            .find(|job| job.id() == id)
            .or_else(|| self.tracker.get(id))
            .or_else(|| {
                [&self.finished, &self.failed, &self.timed_out, &self.signaled]
                    .into_iter()
                    .find_map(|bin| bin.values().find(|job| job.id() == id))
            })
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.get(id).is_some()
    }

    /// Stop tracking a pending or running job and hand it back, without
    /// closing it.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        if let Some(pos) = self.queue.iter().position(|job| job.id() == id) {
            return self.queue.remove(pos);
        }
        self.tracker.remove(id)
    }

    /// Decoded final values from every successful job so far, in completion
    /// order.
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    pub fn finished(&self) -> &HashMap<u32, Job> {
        &self.finished
    }

    pub fn failed(&self) -> &HashMap<u32, Job> {
        &self.failed
    }

    pub fn timed_out(&self) -> &HashMap<u32, Job> {
        &self.timed_out
    }

    pub fn signaled(&self) -> &HashMap<u32, Job> {
        &self.signaled
    }

    /// Close every tracked job and reset all pool state. The pool is
    /// reusable afterwards, as if newly constructed.
    pub fn close(&mut self) {
        self.reset(false);
    }

    /// Forcibly stop every running job, then reset like `close`.
    pub fn kill(&mut self) {
        self.reset(true);
    }

    fn reset(&mut self, force: bool) {
        for mut job in self.queue.drain(..) {
            job.close();
        }
        for id in self.tracker.ids() {
            if let Some(mut job) = self.tracker.remove(id) {
                if force {
                    job.stop(None);
                }
                job.close();
            }
        }
        for bin in [
            &mut self.finished,
            &mut self.failed,
            &mut self.timed_out,
            &mut self.signaled,
        ] {
            for (_, mut job) in bin.drain() {
                job.close();
            }
        }
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use hatch_types::{encode_frame, FrameTag};
    use serde_json::json;

    fn sh(script: &str) -> TaskSpec {
        TaskSpec::command("/bin/sh").arg("-c").arg(script).into()
    }

    /// A task that sleeps, then returns `value` as its final frame.
    fn final_after(value: &Value, sleep: &str) -> TaskSpec {
        let line = encode_frame(value, FrameTag::Final);
        sh(&format!("sleep {sleep}; printf '%s' '{}'", line.trim_end()))
    }

    #[tokio::test]
    async fn test_results_in_completion_order() {
        let mut pool = Pool::new();
        pool.add(final_after(&json!("slow"), "0.4"));
        pool.add(final_after(&json!("fast"), "0"));

        let results = pool.wait().await.unwrap();
        assert_eq!(results, vec![json!("fast"), json!("slow")]);
        assert_eq!(pool.results(), &[json!("fast"), json!("slow")]);
        assert_eq!(pool.finished().len(), 2);
    }

    #[tokio::test]
    async fn test_one_result_per_finished_task() {
        let mut pool = Pool::new();
        for i in 0..5 {
            pool.add(final_after(&json!(i), "0"));
        }
        let mut results = pool.wait().await.unwrap();
        results.sort_by_key(|v| v.as_i64().unwrap());
        assert_eq!(results, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_concurrency_cap_staggers_starts() {
        let mut pool = Pool::with_concurrency(2);
        for _ in 0..3 {
            pool.add(sh("sleep 0.5"));
        }
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.pending(), 1);

        let started = Instant::now();
        pool.wait().await.unwrap();
        let elapsed = started.elapsed();

        // Third task waits for a slot: two rounds, but never three
        assert!(elapsed >= Duration::from_millis(950), "too fast: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1450), "too slow: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_unhandled_failure_aborts_the_drain() {
        let mut pool = Pool::new();
        pool.add(sh("echo kaboom >&2; exit 1"));
        let err = pool.wait().await.unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_handled_failure_lands_in_the_failed_bin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        let mut pool = Pool::new();
        pool.add_job(
            Job::new(sh("echo bad >&2; exit 1")).on_error(move |_| {
                calls_in.fetch_add(1, Ordering::SeqCst);
            }),
        );
        pool.add(final_after(&json!("ok"), "0"));

        let results = pool.wait().await.unwrap();
        assert_eq!(results, vec![json!("ok")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.failed().len(), 1);
        assert_eq!(pool.finished().len(), 1);
    }

    #[tokio::test]
    async fn test_timed_out_jobs_fill_their_bin() {
        let mut pool = Pool::new();
        pool.add_job(Job::new(sh("sleep 10")).with_timeout(Duration::from_millis(150)));
        pool.add(final_after(&json!(1), "0"));

        let results = pool.wait().await.unwrap();
        assert_eq!(results, vec![json!(1)]);
        assert_eq!(pool.timed_out().len(), 1);
        let job = pool.timed_out().values().next().unwrap();
        assert_eq!(job.status(), JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_retry_appends_to_the_same_results() {
        let mut pool = Pool::new();
        let id = pool.add(final_after(&json!("again"), "0"));
        pool.wait().await.unwrap();
        assert_eq!(pool.results().len(), 1);

        assert!(pool.retry(id));
        pool.wait().await.unwrap();
        assert_eq!(pool.results(), &[json!("again"), json!("again")]);
    }

    #[tokio::test]
    async fn test_retry_unknown_id_is_refused() {
        let mut pool = Pool::new();
        assert!(!pool.retry(JobId(12345)));
    }

    #[tokio::test]
    async fn test_close_resets_for_reuse() {
        let mut pool = Pool::new();
        pool.add(final_after(&json!("first"), "0"));
        pool.wait().await.unwrap();
        assert_eq!(pool.results().len(), 1);

        pool.close();
        assert!(pool.results().is_empty());
        assert_eq!(pool.finished().len(), 0);
        assert_eq!(pool.in_flight() + pool.pending(), 0);

        pool.add(final_after(&json!("second"), "0"));
        let results = pool.wait().await.unwrap();
        assert_eq!(results, vec![json!("second")]);
    }

    #[tokio::test]
    async fn test_remove_unqueues_without_running() {
        let mut pool = Pool::with_concurrency(1);
        pool.add(sh("sleep 0.2"));
        let id = pool.add(sh("echo never"));
        // Second job is still pending behind the cap
        let removed = pool.remove(id).unwrap();
        assert_eq!(removed.status(), JobStatus::Unset);

        pool.wait().await.unwrap();
        assert!(!pool.contains(id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_stops_running_jobs() {
        let mut pool = Pool::new();
        pool.add(sh("sleep 30"));
        // Let the job get promoted and started
        let _ = pool.tracker.processing().await;
        assert_eq!(pool.in_flight(), 1);

        let started = Instant::now();
        pool.kill();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.results().is_empty());
    }
}
