use bytes::Bytes;
use serde::Serialize;

pub const DONE_LINE: &str = "data: [DONE]\n\n";

/// Splits an incoming byte stream into complete lines.
///
/// Bytes are buffered rather than text so that a chunk boundary falling inside
/// a multi-byte UTF-8 sequence never corrupts the decoded line: `\n` cannot
/// occur inside a multi-byte sequence, so every complete line is complete
/// UTF-8 as well.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// Returns the unterminated trailing line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Extracts the payload of a `data:` line; both `data: x` and `data:x` are
/// accepted. Every other line shape yields `None`.
pub fn data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let payload = trimmed.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    Some(payload)
}

pub fn encode_data<T: Serialize>(value: &T) -> Option<Bytes> {
    let json = serde_json::to_string(value).ok()?;
    Some(Bytes::from(format!("data: {json}\n\n")))
}
