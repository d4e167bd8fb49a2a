//! Incremental NDJSON frame decoding.
//!
//! The transport hands us arbitrary byte chunks: a line may arrive split
//! across reads, and a multi-byte UTF-8 character may itself straddle a
//! chunk boundary.  The decoder therefore buffers raw bytes and only
//! interprets them once a full line (or the end of the stream) is in hand.
//! A `\n` byte never occurs inside a multi-byte UTF-8 sequence, so scanning
//! for it on raw bytes is safe.

use bytes::BytesMut;
use thiserror::Error;

/// A line that was not valid JSON.
///
/// Transport failures are a different thing entirely and never reach this
/// type; they surface as read errors in [`crate::stream::relay`].
#[derive(Debug, Error)]
#[error("malformed stream line {raw_line:?}: {source}")]
pub struct FrameDecodeError {
    /// The offending line, lossily decoded for diagnostics.
    pub raw_line: String,
    #[source]
    pub source: serde_json::Error,
}

/// Streaming NDJSON decoder.
///
/// Feed chunks with [`feed`](Self::feed), then drain complete records with
/// [`next_record`](Self::next_record) until it returns `Ok(None)`; call
/// [`finish`](Self::finish) exactly once at end of stream to flush a final
/// record that had no trailing newline.
///
/// The first malformed line poisons the decoder: the error is returned
/// once, the buffer is dropped, and every later call yields `Ok(None)`.
/// There is no resynchronization; silently skipping a line would corrupt
/// whatever transcript is being assembled downstream.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: BytesMut,
    poisoned: bool,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk as delivered by the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        if !self.poisoned {
            self.buf.extend_from_slice(chunk);
        }
    }

    /// Next complete record already sitting in the buffer, if any.
    ///
    /// Blank lines (and `\r` from `\r\n` producers) are skipped; the
    /// daemon occasionally emits keepalive blank lines.
    pub fn next_record(&mut self) -> Result<Option<serde_json::Value>, FrameDecodeError> {
        if self.poisoned {
            return Ok(None);
        }
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let line = line[..pos].trim_ascii();
            if line.is_empty() {
                continue;
            }
            return self.parse(line).map(Some);
        }
        Ok(None)
    }

    /// Flush the final record once the stream has ended.
    ///
    /// A producer may omit the newline on its very last line; the leftover
    /// bytes are treated as one record.  A whitespace-only remainder is the
    /// normal empty tail and yields `Ok(None)`.
    pub fn finish(&mut self) -> Result<Option<serde_json::Value>, FrameDecodeError> {
        if self.poisoned {
            return Ok(None);
        }
        let rest = self.buf.split();
        let line = rest[..].trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }
        self.parse(line).map(Some)
    }

    fn parse(&mut self, line: &[u8]) -> Result<serde_json::Value, FrameDecodeError> {
        match serde_json::from_slice(line) {
            Ok(value) => Ok(value),
            Err(source) => {
                self.poisoned = true;
                self.buf.clear();
                Err(FrameDecodeError {
                    raw_line: String::from_utf8_lossy(line).into_owned(),
                    source,
                })
            }
        }
    }
}
