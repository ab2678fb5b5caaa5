//! Newline framing for the TLS byte stream
//!
//! The controller writes one JSON envelope per line. TLS records do not line
//! up with envelope boundaries, so chunks are buffered until a `\n` arrives.

use leap_core::prelude::*;

/// Largest partial line kept while waiting for its terminator.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Splits byte chunks into complete lines.
///
/// Lines are terminated by `\n`; a preceding `\r` is stripped. Blank lines
/// are skipped. A trailing partial line stays buffered until the next chunk.
#[derive(Debug, Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completes, in order.
    ///
    /// A line that is not valid UTF-8 yields an `Err` in its position;
    /// following lines are still returned. A partial line growing past
    /// [`MAX_LINE_LEN`] is discarded with a protocol error.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            let line = if self.buf.is_empty() {
                head.to_vec()
            } else {
                let mut line = std::mem::take(&mut self.buf);
                line.extend_from_slice(head);
                line
            };

            if let Some(decoded) = decode_line(line) {
                lines.push(decoded);
            }
        }

        if !rest.is_empty() {
            if self.buf.len() + rest.len() > MAX_LINE_LEN {
                warn!(
                    "Discarding {} buffered bytes without a line terminator",
                    self.buf.len() + rest.len()
                );
                self.buf.clear();
                lines.push(Err(Error::protocol(format!(
                    "line exceeds {} bytes",
                    MAX_LINE_LEN
                ))));
            } else {
                self.buf.extend_from_slice(rest);
            }
        }

        lines
    }

    /// Bytes held for an unterminated line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(mut line: Vec<u8>) -> Option<Result<String>> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    Some(
        String::from_utf8(line)
            .map_err(|e| Error::protocol(format!("line is not valid UTF-8: {}", e))),
    )
}
