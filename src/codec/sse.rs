//! Server-Sent Events codec.
//!
//! Splits a byte stream into blank-line-terminated records. Within a record,
//! `data:` field values are concatenated with `\n`, an `event:` field names
//! the frame, comment lines (leading `:`) and unknown fields are ignored.
//! A record whose data is the literal `[DONE]` terminates the stream.

use crate::error::LlmError;

use super::{Frame, FrameCodec};

/// Incremental SSE record decoder.
#[derive(Debug, Default)]
pub struct SseCodec {
    buffer: Vec<u8>,
    terminated: bool,
    /// Error hit after valid frames in the same feed; surfaced on the next
    /// call so those frames are not lost.
    pending_error: Option<String>,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the end of the first complete record in `buf`, returning the
    /// index just past its blank-line terminator.
    fn record_end(buf: &[u8]) -> Option<usize> {
        let mut i = 0;
        while i < buf.len() {
            // A record ends at an empty line: \n\n, \n\r\n, \r\n\n, \r\n\r\n.
            if buf[i] == b'\n' {
                let rest = &buf[i + 1..];
                if rest.first() == Some(&b'\n') {
                    return Some(i + 2);
                }
                if rest.len() >= 2 && rest[0] == b'\r' && rest[1] == b'\n' {
                    return Some(i + 3);
                }
            }
            i += 1;
        }
        None
    }

    /// Parses one complete record into a frame, or `None` for records with
    /// no data (comments, keep-alives).
    fn parse_record(record: &str) -> Option<Frame> {
        let mut event_name: Option<String> = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in record.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => data_lines.push(value),
                "event" => event_name = Some(value.to_string()),
                // id / retry and unknown fields carry nothing we consume.
                _ => {}
            }
        }

        if data_lines.is_empty() {
            return None;
        }
        let payload = data_lines.join("\n");
        Some(Frame::Event {
            name: event_name,
            payload: payload.into_bytes(),
        })
    }
}

impl FrameCodec for SseCodec {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, LlmError> {
        if let Some(message) = &self.pending_error {
            return Err(LlmError::FramingError(message.clone()));
        }
        if self.terminated {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(end) = Self::record_end(&self.buffer) {
            let record_bytes: Vec<u8> = self.buffer.drain(..end).collect();
            let record = match std::str::from_utf8(&record_bytes) {
                Ok(record) => record,
                Err(e) => {
                    let message = format!("invalid UTF-8 in SSE record: {e}");
                    if frames.is_empty() {
                        return Err(LlmError::FramingError(message));
                    }
                    // Frames decoded before the bad record still count;
                    // the error surfaces on the next feed.
                    self.pending_error = Some(message);
                    return Ok(frames);
                }
            };

            let Some(frame) = Self::parse_record(record) else {
                continue;
            };
            if frame.payload() == b"[DONE]" {
                self.terminated = true;
                break;
            }
            frames.push(frame);
        }
        Ok(frames)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
