//! Event-stream framing.
//!
//! Bytes are buffered until a full line is available, and lines are
//! collected until a blank line closes the frame. Lines are only decoded once
//! complete, so a multi-byte character split across two network chunks is
//! reassembled before it reaches `from_utf8`.

use thiserror::Error;

const DATA_FIELD: &str = "data:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a `data:` frame with the field prefix removed and trimmed.
    Data(String),
    /// Comment, `event:`/`id:`/`retry:` only frames, or anything else.
    Ignorable,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stream is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no newline.
    scanned: usize,
    lines: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame, DecodeError>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(off) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + off;
            let line = &self.buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line).to_vec();
            self.take_line(line, &mut out);
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        out
    }

    /// Flush whatever is buffered once the transport has no more data.
    ///
    /// A trailing frame that never saw its blank-line terminator is still
    /// emitted.
    pub fn finish(&mut self) -> Vec<Result<Frame, DecodeError>> {
        let mut out = Vec::new();

        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if !rest.is_empty() {
            let rest = rest.strip_suffix(b"\r").unwrap_or(&rest).to_vec();
            self.take_line(rest, &mut out);
        }
        if let Some(frame) = self.close_frame() {
            out.push(Ok(frame));
        }

        out
    }

    fn take_line(&mut self, line: Vec<u8>, out: &mut Vec<Result<Frame, DecodeError>>) {
        if line.is_empty() {
            if let Some(frame) = self.close_frame() {
                out.push(Ok(frame));
            }
            return;
        }

        match String::from_utf8(line) {
            Ok(s) => self.lines.push(s),
            Err(e) => out.push(Err(DecodeError::InvalidUtf8(e.utf8_error()))),
        }
    }

    fn close_frame(&mut self) -> Option<Frame> {
        if self.lines.is_empty() {
            return None;
        }
        let lines = std::mem::take(&mut self.lines);
        Some(classify(&lines))
    }
}

fn classify(lines: &[String]) -> Frame {
    let Some(first) = lines.iter().map(|l| l.trim()).find(|l| !l.is_empty()) else {
        return Frame::Ignorable;
    };
    if !first.starts_with(DATA_FIELD) {
        return Frame::Ignorable;
    }

    // Multiple data fields in one frame are joined with newlines; other
    // fields (id:, event:, comments) inside a data frame are dropped.
    let payload = lines
        .iter()
        .filter_map(|l| l.trim_start().strip_prefix(DATA_FIELD))
        .map(|rest| rest.trim_start())
        .collect::<Vec<_>>()
        .join("\n");

    Frame::Data(payload.trim().to_string())
}
