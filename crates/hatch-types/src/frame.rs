//! The wire protocol between a parent and its subprocesses.
//!
//! Every structured value crossing a process boundary travels as one frame:
//! a JSON two-element array `[payload, tag]`, base64-wrapped for binary
//! safety, terminated by a newline so multiple frames can share a stream.
//!
//! ```text
//!   [payload, "message"]  — streamed progress, ordinary IPC traffic
//!   [payload, "final"]    — the child's return value; at most one, last
//!   [record,  "error"]    — a structured failure record, on stderr
//! ```
//!
//! Every frame line starts with [`FRAME_PREFIX`]; anything else on a stream
//! is plain text and passes through untouched — a child can freely mix
//! `println!` output with framed traffic, and the parent can forward text
//! the moment it arrives instead of waiting for a newline.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel that opens every frame line on the wire.
pub const FRAME_PREFIX: &str = "%hatch%";

/// Discriminates the three kinds of framed traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Streamed progress or IPC message.
    Message,
    /// The child's final return value.
    Final,
    /// A structured failure record.
    Error,
}

impl FrameTag {
    /// The literal marker carried on the wire.
    pub fn marker(&self) -> &'static str {
        match self {
            FrameTag::Message => "message",
            FrameTag::Final => "final",
            FrameTag::Error => "error",
        }
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "message" => Some(FrameTag::Message),
            "final" => Some(FrameTag::Final),
            "error" => Some(FrameTag::Error),
            _ => None,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The transported value.
    pub payload: Value,
    /// What the value means.
    pub tag: FrameTag,
}

impl Frame {
    /// A progress/IPC message frame.
    pub fn message(payload: Value) -> Self {
        Self { payload, tag: FrameTag::Message }
    }

    /// A final-return-value frame.
    pub fn final_value(payload: Value) -> Self {
        Self { payload, tag: FrameTag::Final }
    }
}

/// Encode a frame as a wire line, including the trailing newline.
pub fn encode_frame(payload: &Value, tag: FrameTag) -> String {
    let body = serde_json::json!([payload, tag.marker()]);
    format!("{}{}\n", FRAME_PREFIX, BASE64.encode(body.to_string()))
}

/// Try to decode one wire line (with or without its newline) as a frame.
///
/// Returns `None` for anything that is not a frame — the caller treats such
/// lines as plain text.
pub fn decode_frame(line: &str) -> Option<Frame> {
    let body = line.trim().strip_prefix(FRAME_PREFIX)?;
    let bytes = BASE64.decode(body).ok()?;
    let (payload, marker): (Value, String) = serde_json::from_slice(&bytes).ok()?;
    let tag = FrameTag::from_marker(&marker)?;
    Some(Frame { payload, tag })
}

/// Encode an op invocation for a worker's argv: `{op, arg}` as
/// base64-wrapped JSON, safe to pass through any shell or exec layer.
pub fn encode_op_call(name: &str, arg: &Value) -> String {
    let body = serde_json::json!({ "op": name, "arg": arg });
    BASE64.encode(body.to_string())
}

/// Decode an op invocation received on a worker's argv.
pub fn decode_op_call(payload: &str) -> Option<(String, Value)> {
    #[derive(Deserialize)]
    struct Call {
        op: String,
        #[serde(default)]
        arg: Value,
    }
    let bytes = BASE64.decode(payload.trim()).ok()?;
    let call: Call = serde_json::from_slice(&bytes).ok()?;
    Some((call.op, call.arg))
}

/// Render a frame payload the way it should appear in captured output:
/// strings verbatim, null as nothing, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// A structured failure record, written by a child to its stderr when an op
/// raises. Carries enough to reconstitute the failure on the parent side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The failure's kind, e.g. the error type name.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Backtrace or context text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorRecord {
    /// Build a record from kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), trace: None }
    }

    /// Attach trace text.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Encode this record as an error frame wire line.
    pub fn encode(&self) -> String {
        let payload = serde_json::to_value(self).unwrap_or(Value::Null);
        encode_frame(&payload, FrameTag::Error)
    }

    /// Try to reconstitute a record from a frame payload.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}
