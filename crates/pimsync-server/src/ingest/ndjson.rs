//! Newline-delimited JSON decoding
//!
//! [`NdjsonCodec`] frames a byte stream into non-blank lines, buffering a
//! partial line across reads. Framing and parsing are separate steps so a
//! reader can skip lines by position without paying for [`parse_line`].

use bytes::BytesMut;
use serde_json::Value;
use std::io;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Characters of a rejected line included in its warning
const PREVIEW_CHARS: usize = 100;

/// Frames input into lines. Blank and whitespace-only lines are dropped here
/// so they never count as records; a trailing `\r` is removed.
#[derive(Debug, Default)]
pub struct NdjsonCodec {
    /// Bytes of the buffer already searched for a newline
    scanned: usize,
}

impl NdjsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_line(mut line: BytesMut) -> Option<BytesMut> {
        if line.last() == Some(&b'\n') {
            line.truncate(line.len() - 1);
        }
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(line)
        }
    }
}

impl Decoder for NdjsonCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        loop {
            let Some(pos) = buf[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = buf.len();
                return Ok(None);
            };

            let line = buf.split_to(self.scanned + pos + 1);
            self.scanned = 0;

            if let Some(line) = Self::finish_line(line) {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Final line without a terminating newline
        let rest = buf.split_to(buf.len());
        self.scanned = 0;
        Ok(Self::finish_line(rest))
    }
}

/// Parse one framed line, logging and returning `None` when it is not JSON.
pub fn parse_line(line: &[u8], line_number: u64) -> Option<Value> {
    match serde_json::from_slice(line) {
        Ok(value) => Some(value),
        Err(e) => {
            let preview: String = String::from_utf8_lossy(line).chars().take(PREVIEW_CHARS).collect();
            warn!(line_number, error = %e, preview = %preview, "Skipping malformed NDJSON line");
            None
        }
    }
}
