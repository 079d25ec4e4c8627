//! In-flight job tracking and the per-tick dispatch step.
//!
//! The tracker owns every running job, keyed by id — the one table that
//! lets an exit notification carrying only process-level data find its job.
//! Entries are inserted when the scheduler promotes a job and removed the
//! moment it turns terminal, always before its callbacks run, so a callback
//! can never observe its own job as still in-flight.
//!
//! Between ticks the owning pool parks in [`Tracker::idle_wait`]. On Unix,
//! inside a reactor, a SIGCHLD listener cuts the wait short as children
//! exit; the configurable sleep bounds it either way, so a coalesced signal
//! can never stall the loop. The wake strategy is picked once, at
//! construction.

use std::collections::HashMap;
use std::time::Duration;

use hatch_types::{JobId, JobStatus};

use crate::job::Job;

/// Default pause between scheduler ticks when nothing wakes us sooner.
pub const DEFAULT_SLEEP: Duration = Duration::from_millis(15);

/// Bookkeeping for the set of currently in-flight jobs.
pub struct Tracker {
    jobs: HashMap<JobId, Job>,
    sleep_time: Duration,
    #[cfg(unix)]
    sigchld: Option<tokio::signal::unix::Signal>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// A tracker with the wake strategy picked from the current runtime:
    /// SIGCHLD-assisted inside a reactor, plain polling otherwise.
    pub fn new() -> Self {
        #[cfg(unix)]
        let sigchld = if tokio::runtime::Handle::try_current().is_ok() {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::child()).ok()
        } else {
            None
        };

        Self {
            jobs: HashMap::new(),
            sleep_time: DEFAULT_SLEEP,
            #[cfg(unix)]
            sigchld,
        }
    }

    /// The poll backoff used when no faster wake-up is available.
    pub fn sleep_time(&self) -> Duration {
        self.sleep_time
    }

    pub fn set_sleep_time(&mut self, sleep_time: Duration) {
        self.sleep_time = sleep_time;
    }

    /// Track a job. The job is started on the next tick if it has not been
    /// started already.
    pub fn register(&mut self, job: Job) {
        self.jobs.insert(job.id(), job);
    }

    /// Stop tracking a job without closing it.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.jobs.remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Ids of every tracked job.
    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    /// One scheduler tick over every tracked job: start the unstarted, pump
    /// the running, and hand back every job that turned terminal — each
    /// removed from tracking before anyone dispatches it.
    pub async fn processing(&mut self) -> Vec<Job> {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        let mut finished = Vec::new();

        for id in ids {
            let Some(job) = self.jobs.get_mut(&id) else { continue };
            if job.status() == JobStatus::Unset {
                // A spawn failure leaves the job Failed; the tick below
                // hands it back through the normal terminal path.
                let _ = job.start().await;
            }
            if job.tick() {
                let job = self.jobs.remove(&id).expect("job is tracked");
                finished.push(job);
            }
        }

        finished
    }

    /// Park until the next tick is due: a child-exit signal if the fast path
    /// is installed, bounded by the sleep time either way.
    pub async fn idle_wait(&mut self) {
        #[cfg(unix)]
        if let Some(sigchld) = self.sigchld.as_mut() {
            tokio::select! {
                _ = sigchld.recv() => {}
                _ = tokio::time::sleep(self.sleep_time) => {}
            }
            return;
        }
        tokio::time::sleep(self.sleep_time).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSpec;

    fn sh(script: &str) -> Job {
        Job::new(TaskSpec::command("/bin/sh").arg("-c").arg(script))
    }

    #[tokio::test]
    async fn test_processing_starts_and_reaps() {
        let mut tracker = Tracker::new();
        tracker.register(sh("echo a"));
        tracker.register(sh("echo b"));
        assert_eq!(tracker.len(), 2);

        let mut done = Vec::new();
        while !tracker.is_empty() {
            done.extend(tracker.processing().await);
            tracker.idle_wait().await;
        }

        assert_eq!(done.len(), 2);
        for job in &done {
            assert_eq!(job.status(), JobStatus::Success);
            // Removed from tracking before being handed back
            assert!(!tracker.contains(job.id()));
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_as_failed_job() {
        let mut tracker = Tracker::new();
        tracker.register(Job::new(TaskSpec::command("/nonexistent/binary")));

        let done = tracker.processing().await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status(), JobStatus::Failed);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_remove_stops_tracking_without_closing() {
        let mut tracker = Tracker::new();
        let job = sh("echo gone");
        let id = job.id();
        tracker.register(job);

        let removed = tracker.remove(id).unwrap();
        assert_eq!(removed.id(), id);
        assert_eq!(removed.status(), JobStatus::Unset);
        assert!(tracker.is_empty());
    }
}
