//! Single-shot conveniences over [`Job`] and [`Pool`].

use serde_json::Value;

use hatch_types::JobError;

use crate::job::Job;
use crate::pool::Pool;
use crate::task::TaskSpec;

/// Build an unstarted job for a task.
pub fn job(task: impl Into<TaskSpec>) -> Job {
    Job::new(task)
}

/// Spawn one task and wait it out. Returns the decoded final value, if the
/// child returned one.
pub async fn run(task: impl Into<TaskSpec>) -> Result<Option<Value>, JobError> {
    Job::new(task).wait().await
}

/// Spawn one task, wait it out, and return its captured output text.
pub async fn output(task: impl Into<TaskSpec>) -> Result<String, JobError> {
    let mut job = Job::new(task);
    job.wait().await?;
    Ok(job.output().to_string())
}

/// Run a batch of tasks through a pool and collect every decoded result, in
/// completion order.
pub async fn run_all(
    tasks: impl IntoIterator<Item = TaskSpec>,
) -> Result<Vec<Value>, JobError> {
    let mut pool = Pool::new();
    for task in tasks {
        pool.add(task);
    }
    pool.wait().await
}
