//! Reassembles text chunks into protocol events.
//!
//! An event block ends at the first blank line, i.e. a line break
//! immediately followed by another one. `\n`, `\r\n` and `\n\r` are all
//! accepted as line breaks. Whatever follows the last complete block stays
//! buffered until more data arrives, so the emitted events never depend on
//! where the transport split the stream.

use super::event::ProtocolEvent;
use crate::error::BroadcastError;

/// Turns arbitrary-sized chunks into complete [`ProtocolEvent`]s.
#[derive(Debug, Default)]
pub struct EventSlicer {
    buffer: String,
}

impl EventSlicer {
    /// Creates an empty slicer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every event completed by it, in stream
    /// order. A block that fails to parse yields an `Err` in its place and
    /// does not affect the blocks after it.
    pub fn receive_chunk(&mut self, chunk: &str) -> Vec<Result<ProtocolEvent, BroadcastError>> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(raw) = self.next_block() {
            events.push(ProtocolEvent::parse(&raw));
        }
        events
    }

    /// Discards buffered partial data. Called when the connection restarts.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes waiting for the rest of their block.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_block(&mut self) -> Option<String> {
        // Line breaks left over between blocks carry no data.
        let leading = self.buffer.len() - self.buffer.trim_start_matches(['\r', '\n']).len();
        self.buffer.replace_range(..leading, "");

        let length = block_length(self.buffer.as_bytes())?;
        Some(self.buffer.drain(..length).collect())
    }
}

/// Length of the first complete block including its terminating blank line.
fn block_length(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;
    let mut after_break = false;
    while i < bytes.len() {
        match line_break_len(bytes, i) {
            Some(len) if after_break => return Some(i + len),
            Some(len) => {
                after_break = true;
                i += len;
            }
            None => {
                after_break = false;
                i += 1;
            }
        }
    }
    None
}

fn line_break_len(bytes: &[u8], i: usize) -> Option<usize> {
    match (bytes.get(i), bytes.get(i + 1)) {
        (Some(b'\r'), Some(b'\n')) | (Some(b'\n'), Some(b'\r')) => Some(2),
        (Some(b'\n'), _) => Some(1),
        _ => None,
    }
}
