//! The parent-side IPC channel.
//!
//! A `Channel` is a cloneable handle over an outbound FIFO queue feeding a
//! subprocess's stdin. Clones share state, so a progress callback can hold
//! one and reply to the child mid-run while the job owns another.
//!
//! Messages are validated and flattened at `send` time: strings and scalars
//! become text leaves, raw bytes pass through untouched, nested sequences
//! flatten recursively, `Null` is a silent no-op. A closed channel rejects
//! every further send.
//!
//! The pump yields an empty-string placeholder when asked for output while
//! the queue is open but empty — a heartbeat consumers can use to keep a
//! poll loop alive. It is never written to the wire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use hatch_types::ChannelError;

/// One outbound message, before framing.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// No message. `send` ignores it.
    Null,
    /// Text, framed as a JSON string on the wire.
    Text(String),
    /// Raw bytes, written to the child's stdin unframed.
    Bytes(Vec<u8>),
    /// A structured value. Scalars are coerced to text at send time.
    Value(Value),
    /// A nested sequence, flattened at send time.
    Seq(Vec<Message>),
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<i64> for Message {
    fn from(n: i64) -> Self {
        Message::Text(n.to_string())
    }
}

impl From<f64> for Message {
    fn from(n: f64) -> Self {
        Message::Text(n.to_string())
    }
}

impl From<bool> for Message {
    fn from(b: bool) -> Self {
        Message::Text(b.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Message::Bytes(bytes)
    }
}

impl From<Vec<Message>> for Message {
    fn from(items: Vec<Message>) -> Self {
        Message::Seq(items)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Value(value)
    }
}

/// Flatten a message into queue-ready leaves.
///
/// Leaves are only ever `Text` or `Bytes`; `Null` vanishes; JSON objects
/// have no leaf form and are rejected.
fn flatten(message: Message, out: &mut Vec<Message>) -> Result<(), ChannelError> {
    match message {
        Message::Null => Ok(()),
        Message::Text(_) | Message::Bytes(_) => {
            out.push(message);
            Ok(())
        }
        Message::Seq(items) => {
            for item in items {
                flatten(item, out)?;
            }
            Ok(())
        }
        Message::Value(value) => match value {
            Value::Null => Ok(()),
            Value::String(s) => {
                out.push(Message::Text(s));
                Ok(())
            }
            Value::Bool(b) => {
                out.push(Message::Text(b.to_string()));
                Ok(())
            }
            Value::Number(n) => {
                out.push(Message::Text(n.to_string()));
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    flatten(Message::Value(item), out)?;
                }
                Ok(())
            }
            Value::Object(_) => Err(ChannelError::Unsupported("json object".to_string())),
        },
    }
}

type RefillFn = Box<dyn FnMut() -> Message + Send>;

struct ChannelInner {
    queue: VecDeque<Message>,
    closed: bool,
    refill: Option<RefillFn>,
}

/// Cloneable IPC channel handle. See the module docs.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Mutex<ChannelInner>>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    /// A fresh, open channel.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                queue: VecDeque::new(),
                closed: false,
                refill: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a message for the child. `Null` is a no-op; a closed channel
    /// rejects the send; unsupported shapes are rejected.
    pub fn send(&self, message: impl Into<Message>) -> Result<(), ChannelError> {
        let message = message.into();
        let mut inner = self.lock();
        if inner.closed {
            return Err(ChannelError::Closed);
        }
        let mut leaves = Vec::new();
        flatten(message, &mut leaves)?;
        inner.queue.extend(leaves);
        Ok(())
    }

    /// Register the drain hook: invoked when the queue runs empty while the
    /// channel is still open; a non-null return is re-enqueued, so a hook
    /// that keeps producing makes the channel an on-demand infinite source.
    pub fn on_drain(&self, refill: impl FnMut() -> Message + Send + 'static) {
        self.lock().refill = Some(Box::new(refill));
    }

    /// Close the channel. Queued messages are not flushed here — whatever
    /// the pump has not yet taken stays until it does; further sends fail.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// One pump step, the channel's iterator contract: the queued head if
    /// any; `None` once closed and empty; otherwise the drain hook's yield
    /// or, failing that, the empty-string heartbeat placeholder.
    pub fn next_outbound(&self) -> Option<Message> {
        let mut inner = self.lock();
        if let Some(message) = inner.queue.pop_front() {
            return Some(message);
        }
        if inner.closed {
            return None;
        }
        if let Some(refill) = inner.refill.as_mut() {
            let produced = refill();
            let mut leaves = Vec::new();
            if flatten(produced, &mut leaves).is_ok() && !leaves.is_empty() {
                inner.queue.extend(leaves);
                return inner.queue.pop_front();
            }
        }
        Some(Message::Text(String::new()))
    }

    /// Take everything currently queued, in order. Invoked once per
    /// scheduler tick by the owning job; the drain hook fires at most once
    /// per call, so a self-refilling producer emits at the tick cadence
    /// instead of spinning.
    pub(crate) fn pump_batch(&self) -> Vec<Message> {
        let mut inner = self.lock();
        let mut batch: Vec<Message> = inner.queue.drain(..).collect();
        if !inner.closed {
            if let Some(refill) = inner.refill.as_mut() {
                let produced = refill();
                let mut leaves = Vec::new();
                if flatten(produced, &mut leaves).is_ok() {
                    if batch.is_empty() {
                        batch = leaves;
                    } else {
                        inner.queue.extend(leaves);
                    }
                }
            }
        }
        batch
    }

    /// Iterator over the pump. Yields heartbeats while the channel is open
    /// and idle; ends once the channel is closed and drained.
    pub fn drain(&self) -> Drain {
        Drain { channel: self.clone() }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Channel")
            .field("queued", &inner.queue.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Iterator form of [`Channel::next_outbound`].
pub struct Drain {
    channel: Channel,
}

impl Iterator for Drain {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.channel.next_outbound()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(channel: &Channel) -> Vec<String> {
        channel
            .drain()
            .map(|m| match m {
                Message::Text(s) => s,
                other => panic!("unexpected leaf: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_send_preserves_fifo_order() {
        let channel = Channel::new();
        channel.send("one").unwrap();
        channel.send(2i64).unwrap();
        channel.send(true).unwrap();
        channel.close();
        assert_eq!(texts(&channel), vec!["one", "2", "true"]);
    }

    #[test]
    fn test_nested_sequences_flatten_in_order() {
        let channel = Channel::new();
        channel
            .send(Message::Seq(vec![
                Message::Text("a".into()),
                Message::Seq(vec![Message::Text("b".into()), Message::Null]),
                Message::Value(json!(["c", 4])),
            ]))
            .unwrap();
        channel.close();
        assert_eq!(texts(&channel), vec!["a", "b", "c", "4"]);
    }

    #[test]
    fn test_null_is_a_silent_no_op() {
        let channel = Channel::new();
        channel.send(Message::Null).unwrap();
        assert_eq!(channel.len(), 0);
        channel.send("x").unwrap();
        channel.send(Message::Value(Value::Null)).unwrap();
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_raw_bytes_pass_through_unframed() {
        let channel = Channel::new();
        channel.send("text first").unwrap();
        channel.send(vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        channel.close();

        let leaves: Vec<Message> = channel.drain().collect();
        assert_eq!(
            leaves,
            vec![
                Message::Text("text first".into()),
                Message::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            ]
        );
    }

    #[test]
    fn test_send_after_close_fails() {
        let channel = Channel::new();
        channel.send("before").unwrap();
        channel.close();
        assert_eq!(channel.send("after"), Err(ChannelError::Closed));
        // The earlier message is still deliverable
        assert_eq!(texts(&channel), vec!["before"]);
    }

    #[test]
    fn test_objects_are_unsupported() {
        let channel = Channel::new();
        let err = channel.send(Message::Value(json!({"k": "v"}))).unwrap_err();
        assert!(matches!(err, ChannelError::Unsupported(_)));
        assert_eq!(channel.len(), 0);
    }

    #[test]
    fn test_heartbeat_while_open_and_idle() {
        let channel = Channel::new();
        assert_eq!(channel.next_outbound(), Some(Message::Text(String::new())));
        channel.close();
        assert_eq!(channel.next_outbound(), None);
    }

    #[test]
    fn test_drain_hook_refills() {
        let channel = Channel::new();
        let mut remaining = 3;
        channel.on_drain(move || {
            if remaining > 0 {
                remaining -= 1;
                Message::Text(format!("tick{remaining}"))
            } else {
                Message::Null
            }
        });

        assert_eq!(channel.next_outbound(), Some(Message::Text("tick2".into())));
        assert_eq!(channel.next_outbound(), Some(Message::Text("tick1".into())));
        assert_eq!(channel.next_outbound(), Some(Message::Text("tick0".into())));
        // Hook exhausted: back to heartbeats
        assert_eq!(channel.next_outbound(), Some(Message::Text(String::new())));
    }

    #[test]
    fn test_pump_batch_takes_everything_once() {
        let channel = Channel::new();
        channel.send("a").unwrap();
        channel.send("b").unwrap();
        assert_eq!(
            channel.pump_batch(),
            vec![Message::Text("a".into()), Message::Text("b".into())]
        );
        assert!(channel.pump_batch().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let channel = Channel::new();
        let other = channel.clone();
        channel.send("via-first").unwrap();
        other.close();
        assert!(channel.is_closed());
        assert_eq!(texts(&channel), vec!["via-first"]);
    }
}
