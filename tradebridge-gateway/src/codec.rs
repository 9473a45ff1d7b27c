//! JSON object framing for byte-stream transports.
//!
//! The terminal writes JSON objects to the socket with or without a trailing
//! newline, and TCP reads split or merge them arbitrarily. This decoder yields
//! one complete top-level object per frame, independent of read boundaries:
//! - An object frame starts at `{` and ends when its braces balance (string
//!   contents and escapes are skipped), or at the first raw newline. JSON
//!   never carries a raw newline inside a value, so a truncated or garbled
//!   object costs one frame and the next line is framed afresh.
//! - Text that does not start with `{` is taken up to the next newline as one
//!   frame; the dispatcher rejects it as malformed.
//! - A frame growing past `max_frame_bytes` is dropped, then input is skipped
//!   up to the next newline.
//! - At end of stream any leftover text is flushed as a final frame.

use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FrameKind {
    #[default]
    Idle,
    Object,
    Line,
    Discard,
}

/// Scan state carried across `decode` calls so bytes are inspected once.
#[derive(Debug, Clone, Copy, Default)]
struct Scan {
    kind: FrameKind,
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

#[derive(Debug, Clone)]
pub struct JsonFrameCodec {
    max_frame_bytes: usize,
    scan: Scan,
}

impl JsonFrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes: max_frame_bytes.max(1),
            scan: Scan::default(),
        }
    }

    fn take_frame(&mut self, buf: &mut BytesMut, len: usize) -> String {
        let frame = buf.split_to(len);
        self.scan = Scan::default();
        String::from_utf8_lossy(&frame).trim().to_string()
    }

    /// Advance an object scan; returns the frame length once braces balance
    /// or a raw newline ends the line.
    fn scan_object(&mut self, buf: &BytesMut) -> Option<usize> {
        let s = &mut self.scan;
        while s.pos < buf.len() {
            let b = buf[s.pos];
            s.pos += 1;
            if b == b'\n' {
                return Some(s.pos);
            }
            if s.in_string {
                if s.escaped {
                    s.escaped = false;
                } else if b == b'\\' {
                    s.escaped = true;
                } else if b == b'"' {
                    s.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => s.in_string = true,
                b'{' | b'[' => s.depth += 1,
                b'}' | b']' => {
                    s.depth = s.depth.saturating_sub(1);
                    if s.depth == 0 {
                        return Some(s.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn find_newline(&mut self, buf: &BytesMut) -> Option<usize> {
        let start = self.scan.pos;
        match buf[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => Some(start + offset + 1),
            None => {
                self.scan.pos = buf.len();
                None
            }
        }
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl Decoder for JsonFrameCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            if self.scan.kind == FrameKind::Idle {
                let leading = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
                buf.advance(leading);
                if buf.is_empty() {
                    return Ok(None);
                }
                self.scan.kind = if buf[0] == b'{' {
                    FrameKind::Object
                } else {
                    FrameKind::Line
                };
            }

            let complete = match self.scan.kind {
                FrameKind::Object => self.scan_object(buf),
                FrameKind::Line | FrameKind::Discard => self.find_newline(buf),
                FrameKind::Idle => None,
            };

            match (complete, self.scan.kind) {
                (Some(len), FrameKind::Discard) => {
                    buf.advance(len);
                    self.scan = Scan::default();
                }
                (Some(len), _) if len > self.max_frame_bytes => {
                    warn!(
                        bytes = len,
                        limit = self.max_frame_bytes,
                        "frame exceeds size limit; discarded"
                    );
                    buf.advance(len);
                    self.scan = Scan::default();
                }
                (Some(len), _) => {
                    let frame = self.take_frame(buf, len);
                    if !frame.is_empty() {
                        return Ok(Some(frame));
                    }
                }
                (None, _) => {
                    if buf.len() > self.max_frame_bytes {
                        if self.scan.kind != FrameKind::Discard {
                            warn!(
                                bytes = buf.len(),
                                limit = self.max_frame_bytes,
                                "frame exceeds size limit; discarding to next newline"
                            );
                        }
                        buf.clear();
                        self.scan = Scan {
                            kind: FrameKind::Discard,
                            ..Scan::default()
                        };
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            self.scan = Scan::default();
            return Ok(None);
        }
        if self.scan.kind == FrameKind::Discard {
            buf.clear();
            self.scan = Scan::default();
            return Ok(None);
        }
        let len = buf.len();
        let frame = self.take_frame(buf, len);
        Ok((!frame.is_empty()).then_some(frame))
    }
}
