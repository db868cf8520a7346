// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Incremental line splitter for newline-delimited JSON streams.
//!
//! The network hands us arbitrary byte chunks; a JSON object may be split
//! across any number of them. Each streaming request owns one `LineBuffer`,
//! so concurrent streams can never see each other's bytes.

use crate::error::ApiError;

/// Accumulates raw byte chunks and yields complete lines.
///
/// Bytes after the last `\n` are retained until a later chunk completes
/// them. Empty lines are returned as empty strings; callers filter them
/// before decoding.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line completed by it.
    ///
    /// A completed line that is not valid UTF-8 is a fatal decode error for
    /// this stream; the buffer is left empty so the caller tears the stream
    /// down.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, ApiError> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            match std::str::from_utf8(&self.buf[start..end]) {
                Ok(line) => lines.push(line.to_string()),
                Err(e) => {
                    let lossy = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
                    self.buf.clear();
                    return Err(ApiError::Decode {
                        line: lossy,
                        message: format!("stream is not valid UTF-8: {}", e),
                    });
                }
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        Ok(lines)
    }

    /// Bytes held back waiting for a terminating newline.
    pub fn tail(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
