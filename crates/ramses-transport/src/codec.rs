//! Async line framing for tokio streams.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::TransportError;
use crate::line::DEFAULT_MAX_LINE;

/// `tokio_util` codec yielding one gateway line per item.
///
/// Mirrors [`crate::LineReader`]: `\r\n` or `\n` terminated, overlong lines are
/// skipped up to the next delimiter.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line: usize,
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            max_line,
            discarding: false,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_line {
                    if !self.discarding {
                        warn!(buffered = src.len(), "discarding overlong line");
                    }
                    self.discarding = true;
                    src.advance(src.len());
                }
                return Ok(None);
            };

            let raw = src.split_to(pos + 1);
            if std::mem::take(&mut self.discarding) || raw.len() > self.max_line {
                continue;
            }
            let text = String::from_utf8_lossy(&raw);
            return Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(String::from_utf8_lossy(&rest).trim_end().to_string()))
    }
}

impl Encoder<&str> for LineCodec {
    type Error = TransportError;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<(), TransportError> {
        let line = line.trim_end_matches(['\r', '\n']);
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

impl Encoder<String> for LineCodec {
    type Error = TransportError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), TransportError> {
        Encoder::<&str>::encode(self, line.as_str(), dst)
    }
}
