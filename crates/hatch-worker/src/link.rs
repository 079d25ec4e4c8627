//! The child side of the IPC channel.
//!
//! A `WorkerLink` binds an op to the process's own stdio: framed sends on
//! stdout, framed receives from stdin, plus the raw primitives (`read`,
//! `write`, `error`, `passthru`) for ops that want the streams untouched.
//! Everything here is synchronous — the child is a plain blocking process;
//! the parent's reactor does the multiplexing.

use std::io::{self, BufRead, BufReader, Write};

use serde_json::Value;

use hatch_types::{decode_frame, encode_frame, ErrorRecord, FrameTag, WorkerError};

/// Stdio-bound IPC endpoint handed to every op.
pub struct WorkerLink {
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
    errors: Box<dyn Write + Send>,
}

impl WorkerLink {
    /// A link over the process's real stdio.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout(), io::stderr())
    }

    /// A link over arbitrary streams; tests feed cursors through this.
    pub fn new(
        reader: impl BufRead + Send + 'static,
        writer: impl Write + Send + 'static,
        errors: impl Write + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            errors: Box::new(errors),
        }
    }

    /// Send one structured message to the parent.
    pub fn send(&mut self, payload: &Value) -> Result<(), WorkerError> {
        let line = encode_frame(payload, FrameTag::Message);
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Receive the next inbound message. Blocks until the parent sends one;
    /// `None` once stdin hits EOF (the parent closed the channel). Raw
    /// unframed lines arrive as plain string values.
    pub fn recv(&mut self) -> Result<Option<Value>, WorkerError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if let Some(frame) = decode_frame(&line) {
                return Ok(Some(frame.payload));
            }
            let raw = line.trim_end_matches('\n');
            if !raw.is_empty() {
                return Ok(Some(Value::String(raw.to_string())));
            }
            // Blank line: keep waiting
        }
    }

    /// Raw primitive: read one line from stdin, newline stripped. `None` at
    /// EOF.
    pub fn read(&mut self) -> Result<Option<String>, WorkerError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Raw primitive: write text to stdout, unframed.
    pub fn write(&mut self, text: &str) -> Result<(), WorkerError> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Raw primitive: write text to stderr, unframed.
    pub fn error(&mut self, text: &str) -> Result<(), WorkerError> {
        self.errors.write_all(text.as_bytes())?;
        self.errors.flush()?;
        Ok(())
    }

    /// Raw primitive: copy the rest of stdin to stdout. Returns the number
    /// of bytes moved.
    pub fn passthru(&mut self) -> Result<u64, WorkerError> {
        let moved = io::copy(&mut self.reader, &mut self.writer)?;
        self.writer.flush()?;
        Ok(moved)
    }

    /// Write the final-value frame. The bootstrap calls this once, with the
    /// op's return value.
    pub(crate) fn finish(&mut self, value: &Value) -> Result<(), WorkerError> {
        let line = encode_frame(value, FrameTag::Final);
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a structured failure record to stderr.
    pub(crate) fn report(&mut self, record: &ErrorRecord) {
        let _ = self.errors.write_all(record.encode().as_bytes());
        let _ = self.errors.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn link_with_input(input: &str) -> (WorkerLink, SharedBuf, SharedBuf) {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let link = WorkerLink::new(
            Cursor::new(input.to_string()),
            out.clone(),
            err.clone(),
        );
        (link, out, err)
    }

    /// A clonable in-memory sink, so the test can read what the link wrote.
    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_writes_a_message_frame() {
        let (mut link, out, _) = link_with_input("");
        link.send(&json!("hi")).unwrap();
        let frame = decode_frame(out.text().trim()).unwrap();
        assert_eq!(frame.tag, FrameTag::Message);
        assert_eq!(frame.payload, json!("hi"));
    }

    #[test]
    fn test_recv_decodes_frames_and_raw_lines() {
        let framed = encode_frame(&json!("first"), FrameTag::Message);
        let input = format!("{framed}raw second\n");
        let (mut link, _, _) = link_with_input(&input);

        assert_eq!(link.recv().unwrap(), Some(json!("first")));
        assert_eq!(link.recv().unwrap(), Some(json!("raw second")));
        assert_eq!(link.recv().unwrap(), None);
    }

    #[test]
    fn test_recv_skips_blank_lines() {
        let framed = encode_frame(&json!("kept"), FrameTag::Message);
        let input = format!("\n\n{framed}");
        let (mut link, _, _) = link_with_input(&input);
        assert_eq!(link.recv().unwrap(), Some(json!("kept")));
    }

    #[test]
    fn test_raw_primitives() {
        let (mut link, out, err) = link_with_input("line one\nline two");
        assert_eq!(link.read().unwrap(), Some("line one".to_string()));
        link.write("to stdout").unwrap();
        link.error("to stderr").unwrap();
        assert_eq!(out.text(), "to stdout");
        assert_eq!(err.text(), "to stderr");
    }

    #[test]
    fn test_passthru_copies_everything() {
        let (mut link, out, _) = link_with_input("a\nb\nc");
        let moved = link.passthru().unwrap();
        assert_eq!(moved, 5);
        assert_eq!(out.text(), "a\nb\nc");
    }

    #[test]
    fn test_finish_writes_a_final_frame() {
        let (mut link, out, _) = link_with_input("");
        link.finish(&json!({"answer": 42})).unwrap();
        let frame = decode_frame(out.text().trim()).unwrap();
        assert_eq!(frame.tag, FrameTag::Final);
    }
}
