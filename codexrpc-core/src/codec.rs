//! Newline-delimited JSON framing
//!
//! The app-server writes one JSON object per line on stdout. Output arrives in
//! arbitrary chunks, so [`LineDecoder`] accumulates bytes and hands back one
//! decoded value per complete line.
//!
//! # Framing rules
//!
//! - Lines are split on `\n` only; a trailing `\r` is removed with the rest
//!   of the surrounding whitespace
//! - Invalid UTF-8 is replaced rather than rejected
//! - Blank lines are skipped
//! - A line that is not valid JSON is a decode error
//! - If the bytes held without a newline exceed the configured limit, the
//!   buffer is discarded and a decode error with line `<buffer overflow>`
//!   is returned
//!
//! Decode errors are fatal to the connection; the decoder does not try to
//! resynchronise after one.
//!
//! # Examples
//!
//! ```rust
//! use codexrpc_core::codec::LineDecoder;
//!
//! let mut decoder = LineDecoder::new(1024);
//! decoder.push(b"{\"id\":1,\"res");
//! assert!(decoder.next_message().unwrap().is_none());
//!
//! decoder.push(b"ult\":{}}\n");
//! let value = decoder.next_message().unwrap().unwrap();
//! assert_eq!(value["id"], 1);
//! ```

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Default limit on unflushed output, 1 MiB
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Incremental decoder for newline-delimited JSON
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_buffer_size: usize,
}

impl LineDecoder {
    /// Create a decoder that tolerates at most `max_buffer_size` bytes
    /// without a newline
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer_size,
        }
    }

    /// Append a chunk of raw output
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes currently held
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete line
    ///
    /// Returns `Ok(None)` once no complete line is left. Call repeatedly after
    /// each [`push`](Self::push) until it does.
    pub fn next_message(&mut self) -> Result<Option<Value>> {
        loop {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                if self.buffer.len() > self.max_buffer_size {
                    self.buffer.clear();
                    return Err(Error::buffer_overflow(self.max_buffer_size));
                }
                return Ok(None);
            };

            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| Error::decode(line, e));
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

/// Encode a message as a single line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BUFFER_OVERFLOW_LINE;
    use serde_json::json;

    fn drain(decoder: &mut LineDecoder) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(v) = decoder.next_message().unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"{\"a\":");
        assert!(drain(&mut decoder).is_empty());
        decoder.push(b"1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(drain(&mut decoder), vec![json!({"a": 1}), json!({"b": 2})]);
        decoder.push(b":3}\n");
        assert_eq!(drain(&mut decoder), vec![json!({"c": 3})]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"\n   \n{\"x\":true}\r\n\n");
        assert_eq!(drain(&mut decoder), vec![json!({"x": true})]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"{\"s\":\"a\xffb\"}\n");
        let value = decoder.next_message().unwrap().unwrap();
        assert_eq!(value["s"], "a\u{FFFD}b");
    }

    #[test]
    fn test_malformed_line() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"hello world\n");
        match decoder.next_message() {
            Err(Error::Decode { line, .. }) => assert_eq!(line, "hello world"),
            other => panic!("Expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_overflow_clears_buffer() {
        let mut decoder = LineDecoder::new(16);
        decoder.push(&[b'x'; 32]);
        match decoder.next_message() {
            Err(Error::Decode { line, .. }) => assert_eq!(line, BUFFER_OVERFLOW_LINE),
            other => panic!("Expected overflow, got {:?}", other),
        }
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_limit_applies_to_unterminated_tail_only() {
        let mut decoder = LineDecoder::new(16);
        // A long complete line is fine; only the leftover counts
        decoder.push(b"{\"long\":\"aaaaaaaaaaaaaaaaaaaaaaaa\"}\n{\"k\"");
        assert_eq!(drain(&mut decoder).len(), 1);
        assert_eq!(decoder.buffered_len(), 4);
    }

    #[test]
    fn test_encode_line() {
        let line = encode_line(&json!({"method": "initialized"})).unwrap();
        assert_eq!(line, "{\"method\":\"initialized\"}\n");
    }
}
