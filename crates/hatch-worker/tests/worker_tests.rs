//! End-to-end tests driving the real worker binary through the runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::{json, Value};

use hatch_core::{Job, JobError, JobStatus, Pool, Progress, TaskSpec};

/// An op task against the freshly built worker binary.
fn worker_op(name: &str, arg: Value) -> TaskSpec {
    TaskSpec::op_in(env!("CARGO_BIN_EXE_hatch-worker"), name, arg)
}

#[tokio::test]
async fn test_probe_returns_the_decoded_value() -> Result<()> {
    let payload = json!({"numbers": [1, 2, 3], "label": "x"});
    let result = hatch_core::run(worker_op("probe", payload.clone())).await?;
    assert_eq!(result, Some(payload));
    Ok(())
}

#[tokio::test]
async fn test_ipc_volley_round_trip() -> Result<()> {
    let step = Arc::new(AtomicUsize::new(0));
    let step_in = step.clone();

    let mut job = Job::new(worker_op(
        "volley",
        json!({"greet": "ping", "reads": 2, "reply": "The game!"}),
    ))
    .on_progress(move |_, channel| {
        match step_in.fetch_add(1, Ordering::SeqCst) {
            0 => channel.send("pang").unwrap(),
            1 => channel.send("pong").unwrap(),
            _ => channel.close(),
        }
    });

    let result = job.wait().await?;
    assert_eq!(result, Some(json!("The game!")));
    assert_eq!(job.output(), "pingpangpong");
    assert!(job.is_successful());
    Ok(())
}

#[tokio::test]
async fn test_unhandled_failure_propagates_with_the_message() {
    let mut job = Job::new(worker_op("fail", json!("catastrophic boom")));
    let err = job.wait().await.unwrap_err();
    assert!(err.to_string().contains("catastrophic boom"));
    match err {
        JobError::Remote { kind, .. } => assert_eq!(kind, "OpError"),
        other => panic!("expected a reconstituted remote error, got {other:?}"),
    }
    assert_eq!(job.status(), JobStatus::Failed);
}

#[tokio::test]
async fn test_stderr_traffic_fails_a_clean_exit() -> Result<()> {
    let seen = Arc::new(Mutex::new(String::new()));
    let seen_in = seen.clone();

    let mut job = Job::new(worker_op("complain", json!({"text": "ERROR", "times": 3})))
        .on_error(move |e| *seen_in.lock().unwrap() = e.to_string());

    job.wait().await?;
    assert!(!job.is_successful());
    assert_eq!(seen.lock().unwrap().matches("ERROR").count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_emitted_messages_stream_in_order() -> Result<()> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let messages_in = messages.clone();

    let mut job = Job::new(worker_op("emit", json!({"count": 4, "text": "beat"})))
        .on_progress(move |progress, _| {
            if let Progress::Message(value) = progress {
                messages_in.lock().unwrap().push(value.clone());
            }
        });

    let result = job.wait().await?;
    assert_eq!(result, Some(json!(4)));
    assert_eq!(
        *messages.lock().unwrap(),
        vec![json!("beat0"), json!("beat1"), json!("beat2"), json!("beat3")]
    );
    assert_eq!(job.output(), "beat0beat1beat2beat3");
    Ok(())
}

#[tokio::test]
async fn test_timeout_cuts_a_long_nap_short() -> Result<()> {
    let timeout = Duration::from_millis(300);
    let mut job = Job::new(worker_op("nap", json!(30))).with_timeout(timeout);

    let started = Instant::now();
    let result = job.wait().await?;
    assert!(result.is_none());
    assert_eq!(job.status(), JobStatus::TimedOut);
    assert!(!job.is_successful());
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[tokio::test]
async fn test_pool_of_workers_collects_every_result() -> Result<()> {
    let mut pool = Pool::with_concurrency(4);
    for i in 0..6 {
        pool.add(worker_op("probe", json!(i)));
    }

    let mut results = pool.wait().await?;
    results.sort_by_key(|v| v.as_i64().unwrap());
    assert_eq!(results, (0..6).map(|i| json!(i)).collect::<Vec<_>>());
    assert_eq!(pool.finished().len(), 6);
    Ok(())
}

#[tokio::test]
async fn test_missing_payload_is_an_argument_error() {
    let task = TaskSpec::command(env!("CARGO_BIN_EXE_hatch-worker"));
    let err = hatch_core::run(task).await.unwrap_err();
    match err {
        JobError::Remote { kind, message, .. } => {
            assert_eq!(kind, "UsageError");
            assert!(message.contains("encoded-task"));
        }
        other => panic!("expected a usage error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_payload_is_a_decode_error() {
    let task = TaskSpec::command(env!("CARGO_BIN_EXE_hatch-worker")).arg("!!garbage!!");
    let err = hatch_core::run(task).await.unwrap_err();
    match err {
        JobError::Remote { kind, .. } => assert_eq!(kind, "DecodeError"),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_op_is_rejected() {
    let err = hatch_core::run(worker_op("mystery", json!(null)))
        .await
        .unwrap_err();
    match err {
        JobError::Remote { kind, message, .. } => {
            assert_eq!(kind, "UnknownOpError");
            assert!(message.contains("mystery"));
        }
        other => panic!("expected an unknown-op error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_list_flag_names_the_builtins() -> Result<()> {
    let task = TaskSpec::command(env!("CARGO_BIN_EXE_hatch-worker")).arg("--list");
    let output = hatch_core::output(task).await?;
    for op in ["probe", "nap", "emit", "volley", "fail", "complain"] {
        assert!(output.contains(op), "missing {op} in: {output}");
    }
    Ok(())
}
