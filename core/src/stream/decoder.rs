//! Line framing for `data: ` event streams.
//!
//! Chunks may end anywhere, including inside a multi-byte UTF-8 sequence, so
//! the carry-over buffer stays byte-oriented and lines are only decoded to text
//! once their terminator has arrived.

use bytes::BytesMut;
use tracing::{debug, trace};

/// Marker every accepted frame line starts with.
pub const DATA_PREFIX: &str = "data: ";

/// One `data: ` line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    line: String,
}

impl Frame {
    fn from_line(line: &[u8]) -> Option<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if !line.starts_with(DATA_PREFIX.as_bytes()) {
            return None;
        }
        match std::str::from_utf8(line) {
            Ok(text) => Some(Self {
                line: text.to_owned(),
            }),
            Err(err) => {
                trace!(%err, "dropping frame with invalid utf-8");
                None
            }
        }
    }

    /// The text following the `data: ` marker.
    pub fn payload(&self) -> &str {
        &self.line[DATA_PREFIX.len()..]
    }
}

/// Splits a chunked byte stream into frames.
///
/// One decoder belongs to one exchange; the unterminated tail of each chunk is
/// kept until the next [`feed`](Self::feed) completes it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Leading bytes of `buffer` already known to hold no line terminator.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns the frames it completes.
    ///
    /// Lines are split off lazily as the iterator advances. Anything not
    /// pulled stays buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { decoder: self }
    }

    /// Ends the input, dropping any unterminated fragment. Returns the number
    /// of bytes discarded.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 {
            debug!(bytes = dropped, "discarding unterminated trailing frame");
        }
        self.buffer.clear();
        self.scanned = 0;
        dropped
    }

    /// Bytes waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_line(&mut self) -> Option<BytesMut> {
        match self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let line = self.buffer.split_to(self.scanned + offset + 1);
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

/// Lazy iterator over the frames completed by one [`FrameDecoder::feed`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            let line = self.decoder.next_line()?;
            if let Some(frame) = Frame::from_line(&line) {
                return Some(frame);
            }
        }
    }
}
