//! AWS binary event-stream codec.
//!
//! Frame layout, big-endian throughout:
//!
//! ```text
//! [4B total length][4B header length][headers][payload][4B CRC32]
//! total length == 4 + 4 + header length + payload length + 4
//! ```
//!
//! The trailing CRC32 covers every frame byte before the checksum field. A
//! length or checksum mismatch fails the stream; the codec never skips bytes
//! to resynchronize. Headers are a flat name/type/value list; the
//! `:message-type` header distinguishes events from in-band exceptions and
//! the `:event-type` header names each event.

use crate::error::LlmError;

use super::{Frame, FrameCodec};

/// Prelude (8) plus trailing CRC (4).
const FRAME_OVERHEAD: usize = 12;
/// Upper bound accepted for one frame; anything larger is treated as
/// corruption rather than a buffer to grow into.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Incremental decoder for the binary event-stream framing.
#[derive(Debug, Default)]
pub struct EventStreamCodec {
    buffer: Vec<u8>,
    poisoned: Option<String>,
}

impl EventStreamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poisons the codec. Frames already decoded in this feed are returned;
    /// the error itself surfaces now if there are none, otherwise on the
    /// next call.
    fn fail(&mut self, message: String, frames: Vec<Frame>) -> Result<Vec<Frame>, LlmError> {
        self.poisoned = Some(message.clone());
        if frames.is_empty() {
            Err(LlmError::FramingError(message))
        } else {
            Ok(frames)
        }
    }

    /// Decodes the header block into (name, value) pairs.
    fn parse_headers(block: &[u8]) -> Result<Vec<(String, HeaderValue)>, String> {
        let mut headers = Vec::new();
        let mut i = 0usize;

        while i < block.len() {
            let name_len = block[i] as usize;
            i += 1;
            if i + name_len > block.len() {
                return Err("truncated header name".to_string());
            }
            let name = std::str::from_utf8(&block[i..i + name_len])
                .map_err(|_| "header name is not UTF-8".to_string())?
                .to_string();
            i += name_len;

            let type_tag = *block
                .get(i)
                .ok_or_else(|| "missing header value type".to_string())?;
            i += 1;

            let value = match type_tag {
                0 => HeaderValue::Bool(true),
                1 => HeaderValue::Bool(false),
                2 => {
                    let b = *block
                        .get(i)
                        .ok_or_else(|| "truncated byte header".to_string())?;
                    i += 1;
                    HeaderValue::Byte(b)
                }
                3 => {
                    let raw = take(block, &mut i, 2)?;
                    HeaderValue::Int16(i16::from_be_bytes([raw[0], raw[1]]))
                }
                4 => {
                    let raw = take(block, &mut i, 4)?;
                    HeaderValue::Int32(i32::from_be_bytes(raw.try_into().unwrap()))
                }
                5 => {
                    let raw = take(block, &mut i, 8)?;
                    HeaderValue::Int64(i64::from_be_bytes(raw.try_into().unwrap()))
                }
                6 | 7 => {
                    let len_raw = take(block, &mut i, 2)?;
                    let len = u16::from_be_bytes([len_raw[0], len_raw[1]]) as usize;
                    let raw = take(block, &mut i, len)?;
                    if type_tag == 7 {
                        let s = std::str::from_utf8(raw)
                            .map_err(|_| "string header is not UTF-8".to_string())?;
                        HeaderValue::String(s.to_string())
                    } else {
                        HeaderValue::Bytes(raw.to_vec())
                    }
                }
                8 => {
                    let raw = take(block, &mut i, 8)?;
                    HeaderValue::Timestamp(i64::from_be_bytes(raw.try_into().unwrap()))
                }
                9 => {
                    let raw = take(block, &mut i, 16)?;
                    HeaderValue::Uuid(raw.try_into().unwrap())
                }
                other => return Err(format!("unknown header value type {other}")),
            };
            headers.push((name, value));
        }
        Ok(headers)
    }

    fn header<'a>(headers: &'a [(String, HeaderValue)], name: &str) -> Option<&'a HeaderValue> {
        headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn frame_from(headers: &[(String, HeaderValue)], payload: Vec<u8>) -> Frame {
        let message_type = Self::header(headers, ":message-type")
            .and_then(HeaderValue::as_str)
            .unwrap_or("event");
        match message_type {
            "exception" => Frame::Exception {
                kind: Self::header(headers, ":exception-type")
                    .and_then(HeaderValue::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                payload,
            },
            "error" => Frame::Exception {
                kind: Self::header(headers, ":error-code")
                    .and_then(HeaderValue::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                payload,
            },
            _ => Frame::Event {
                name: Self::header(headers, ":event-type")
                    .and_then(HeaderValue::as_str)
                    .map(str::to_string),
                payload,
            },
        }
    }
}

fn take<'a>(block: &'a [u8], i: &mut usize, len: usize) -> Result<&'a [u8], String> {
    if *i + len > block.len() {
        return Err("truncated header value".to_string());
    }
    let raw = &block[*i..*i + len];
    *i += len;
    Ok(raw)
}

impl FrameCodec for EventStreamCodec {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, LlmError> {
        if let Some(message) = &self.poisoned {
            return Err(LlmError::FramingError(message.clone()));
        }
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            if self.buffer.len() < 8 {
                break;
            }
            let total = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
            let header_len = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap()) as usize;

            if total < FRAME_OVERHEAD + header_len || total > MAX_FRAME_LEN {
                return self.fail(
                    format!("invalid frame length: total {total}, headers {header_len}"),
                    frames,
                );
            }
            if self.buffer.len() < total {
                break;
            }

            let frame_bytes: Vec<u8> = self.buffer.drain(..total).collect();
            let expected = u32::from_be_bytes(frame_bytes[total - 4..].try_into().unwrap());
            let actual = crc32fast::hash(&frame_bytes[..total - 4]);
            if expected != actual {
                return self.fail(
                    format!(
                        "frame checksum mismatch: expected {expected:#010x}, computed {actual:#010x}"
                    ),
                    frames,
                );
            }

            let headers = match Self::parse_headers(&frame_bytes[8..8 + header_len]) {
                Ok(headers) => headers,
                Err(message) => return self.fail(message, frames),
            };
            let payload = frame_bytes[8 + header_len..total - 4].to_vec();
            frames.push(Self::frame_from(&headers, payload));
        }
        Ok(frames)
    }

    fn is_terminated(&self) -> bool {
        // The binary protocol has no in-band terminator; the stream ends when
        // the transport closes.
        false
    }
}

/// Encodes one frame. Used by tests and stub backends; the client itself only
/// decodes.
pub fn encode_frame(headers: &[(&str, HeaderValue)], payload: &[u8]) -> Vec<u8> {
    let mut header_block = Vec::new();
    for (name, value) in headers {
        header_block.push(name.len() as u8);
        header_block.extend_from_slice(name.as_bytes());
        match value {
            HeaderValue::Bool(true) => header_block.push(0),
            HeaderValue::Bool(false) => header_block.push(1),
            HeaderValue::Byte(b) => {
                header_block.push(2);
                header_block.push(*b);
            }
            HeaderValue::Int16(v) => {
                header_block.push(3);
                header_block.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Int32(v) => {
                header_block.push(4);
                header_block.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Int64(v) => {
                header_block.push(5);
                header_block.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Bytes(raw) => {
                header_block.push(6);
                header_block.extend_from_slice(&(raw.len() as u16).to_be_bytes());
                header_block.extend_from_slice(raw);
            }
            HeaderValue::String(s) => {
                header_block.push(7);
                header_block.extend_from_slice(&(s.len() as u16).to_be_bytes());
                header_block.extend_from_slice(s.as_bytes());
            }
            HeaderValue::Timestamp(v) => {
                header_block.push(8);
                header_block.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Uuid(raw) => {
                header_block.push(9);
                header_block.extend_from_slice(raw);
            }
        }
    }

    let total = FRAME_OVERHEAD + header_block.len() + payload.len();
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_be_bytes());
    frame.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
    frame.extend_from_slice(&header_block);
    frame.extend_from_slice(payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Convenience for building a `chunk`-style event frame in tests.
pub fn encode_event(event_type: &str, payload: &[u8]) -> Vec<u8> {
    encode_frame(
        &[
            (":message-type", HeaderValue::String("event".to_string())),
            (":event-type", HeaderValue::String(event_type.to_string())),
            (
                ":content-type",
                HeaderValue::String("application/json".to_string()),
            ),
        ],
        payload,
    )
}
