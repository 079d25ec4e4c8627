//! Built-in diagnostic ops.
//!
//! These ship with the stand-alone worker binary and exercise every runtime
//! path end to end: plain returns, sleeps, streamed messages, the full IPC
//! round trip, raised failures, and stderr traffic. Embedders registering
//! their own ops get them too unless they build their own registry.

use serde_json::{json, Value};

use hatch_types::{value_to_text, WorkerError};

use crate::link::WorkerLink;
use crate::registry::OpRegistry;

/// Register every built-in op.
pub fn register_builtins(registry: &mut OpRegistry) {
    registry.register("probe", probe);
    registry.register("nap", nap);
    registry.register("emit", emit);
    registry.register("volley", volley);
    registry.register("fail", fail);
    registry.register("complain", complain);
}

/// `probe` — return the argument untouched. The loopback op.
fn probe(arg: Value, _link: &mut WorkerLink) -> Result<Value, WorkerError> {
    Ok(arg)
}

/// `nap` — sleep for `seconds` (a number, or `{seconds}`), then return the
/// time slept.
fn nap(arg: Value, _link: &mut WorkerLink) -> Result<Value, WorkerError> {
    let seconds = arg
        .as_f64()
        .or_else(|| arg.get("seconds").and_then(Value::as_f64))
        .ok_or_else(|| WorkerError::Op("nap: seconds required".to_string()))?;
    if seconds < 0.0 {
        return Err(WorkerError::Op("nap: seconds must be non-negative".to_string()));
    }
    std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
    Ok(json!(seconds))
}

/// `emit` — stream `count` messages built from `text`, then return the
/// count. Exercises the progress path.
fn emit(arg: Value, link: &mut WorkerLink) -> Result<Value, WorkerError> {
    let count = arg
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| WorkerError::Op("emit: count required".to_string()))?;
    let text = arg.get("text").and_then(Value::as_str).unwrap_or("tick");
    for i in 0..count {
        link.send(&json!(format!("{text}{i}")))?;
    }
    Ok(json!(count))
}

/// `volley` — the IPC round-trip diagnostic: send `greet`, echo `reads`
/// inbound messages to stdout verbatim, return `reply`.
fn volley(arg: Value, link: &mut WorkerLink) -> Result<Value, WorkerError> {
    let greet = arg.get("greet").and_then(Value::as_str).unwrap_or("ping");
    let reads = arg.get("reads").and_then(Value::as_u64).unwrap_or(1);
    let reply = arg.get("reply").and_then(Value::as_str).unwrap_or("pong");

    link.send(&json!(greet))?;
    for _ in 0..reads {
        match link.recv()? {
            Some(message) => link.write(&value_to_text(&message))?,
            None => break,
        }
    }
    Ok(json!(reply))
}

/// `fail` — raise an error carrying `message` (a string, or `{message}`).
fn fail(arg: Value, _link: &mut WorkerLink) -> Result<Value, WorkerError> {
    let message = arg
        .as_str()
        .or_else(|| arg.get("message").and_then(Value::as_str))
        .unwrap_or("requested failure");
    Err(WorkerError::Op(message.to_string()))
}

/// `complain` — write `text` to stderr `times` times, then exit cleanly.
/// The parent still fails the job: stderr overrides a zero exit.
fn complain(arg: Value, link: &mut WorkerLink) -> Result<Value, WorkerError> {
    let text = arg.get("text").and_then(Value::as_str).unwrap_or("ERROR");
    let times = arg.get("times").and_then(Value::as_u64).unwrap_or(1);
    for _ in 0..times {
        link.error(&format!("{text}\n"))?;
    }
    Ok(Value::Null)
}
