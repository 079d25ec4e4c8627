//! Incremental decoding of a child's output stream.
//!
//! Child stdout is a mix of plain text and frame lines (see
//! [`hatch_types::frame`]). Output arrives in arbitrary chunks, so the
//! scanner keeps the smallest possible tail buffered:
//!
//! - a partial frame line (sentinel seen, newline not yet) is held until its
//!   terminator arrives;
//! - plain text is emitted the moment it arrives, even without a newline —
//!   interactive children write prompts and partial lines, and the IPC
//!   round-trip depends on seeing them immediately;
//! - a chunk boundary may split the sentinel itself, so a trailing fragment
//!   of it is held back until the next chunk disambiguates.

use hatch_types::{decode_frame, Frame, FRAME_PREFIX};

pub use hatch_types::value_to_text;

/// One decoded piece of a child's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Pass-through text, exactly as the child wrote it.
    Text(String),
    /// A decoded frame.
    Frame(Frame),
}

/// Incremental splitter turning chunked bytes into [`StreamItem`]s.
#[derive(Debug, Default)]
pub struct FrameScanner {
    pending: String,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every item completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamItem> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut items = Vec::new();

        loop {
            if self.pending.starts_with(FRAME_PREFIX) {
                // A frame line: complete only once its newline arrives.
                let Some(idx) = self.pending.find('\n') else { break };
                let line: String = self.pending.drain(..=idx).collect();
                items.push(classify(&line));
            } else if let Some(pos) = self.pending.find(FRAME_PREFIX) {
                // Text runs up to the next sentinel.
                let text: String = self.pending.drain(..pos).collect();
                items.push(StreamItem::Text(text));
            } else {
                // Pure text. Hold back only a trailing fragment that could
                // still grow into the sentinel.
                let keep = trailing_sentinel_fragment(&self.pending);
                let cut = self.pending.len() - keep;
                if cut > 0 {
                    let text: String = self.pending.drain(..cut).collect();
                    items.push(StreamItem::Text(text));
                }
                break;
            }
        }

        items
    }

    /// Flush whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Vec<StreamItem> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.pending);
        vec![classify(&rest)]
    }
}

/// Decide whether a completed line is a frame or text.
fn classify(line: &str) -> StreamItem {
    match decode_frame(line) {
        Some(frame) => StreamItem::Frame(frame),
        None => StreamItem::Text(line.to_string()),
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of the frame
/// sentinel.
fn trailing_sentinel_fragment(s: &str) -> usize {
    let max = (FRAME_PREFIX.len() - 1).min(s.len());
    for k in (1..=max).rev() {
        if s.ends_with(&FRAME_PREFIX[..k]) {
            return k;
        }
    }
    0
}
