//! Server-sent events decoding.
//!
//! Bytes arrive in arbitrary chunks. Lines are split on `\n` (a trailing `\r`
//! is dropped), `data:` lines accumulate, and a blank line dispatches the
//! accumulated payload joined with `\n`. Comments (`:`) and the `event`, `id`
//! and `retry` fields carry nothing the transaction feed needs and are skipped,
//! as is the `[DONE]` end marker. Lines that are not UTF-8, or that grow past
//! the line limit without a newline, are dropped and logged.

use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::{stream, Stream, StreamExt};

use crate::logging::{log, log_dropped_event, obj, v_str, Domain, Level};

/// Longest unterminated line held while waiting for its `\n`.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const DONE_MARKER: &str = "[DONE]";
const PREVIEW_BYTES: usize = 120;

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    max_line: usize,
    // discarding the tail of an oversized line up to its newline
    skipping: bool,
    dropped: u64,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            data: Vec::new(),
            max_line: max_line.max(1),
            skipping: false,
            dropped: 0,
        }
    }

    /// Lines dropped so far for bad encoding or length.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Feed one chunk; returns every event payload it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.skipping {
                self.skipping = false;
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(payload) = self.process_line(text) {
                        out.push(payload);
                    }
                }
                Err(_) => self.record_drop("invalid_utf8", &line),
            }
        }
        if self.buffer.len() > self.max_line {
            if !self.skipping {
                let head = self.buffer[..PREVIEW_BYTES.min(self.buffer.len())].to_vec();
                self.record_drop("line_too_long", &head);
                // the event the line belonged to is incomplete
                self.data.clear();
                self.skipping = true;
            }
            self.buffer.clear();
        }
        out
    }

    /// Flush at end of stream: an unterminated last line still counts.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.skipping) {
            self.data.clear();
            return None;
        }
        if !rest.is_empty() {
            match std::str::from_utf8(&rest) {
                Ok(text) => {
                    let text = text.trim_end_matches('\r').to_string();
                    if let Some(payload) = self.process_line(&text) {
                        return Some(payload);
                    }
                }
                Err(_) => self.record_drop("invalid_utf8", &rest),
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        let trimmed = payload.trim();
        if trimmed.is_empty() || trimmed == DONE_MARKER {
            None
        } else {
            Some(payload)
        }
    }

    fn record_drop(&mut self, reason: &str, bytes: &[u8]) {
        self.dropped += 1;
        log_dropped_event("sse", reason, &String::from_utf8_lossy(bytes));
    }
}

/// Turn a chunked byte stream into a stream of event payloads.
///
/// The stream ends when the input ends or yields an error; the error is logged.
pub fn sse_events<S, B, E>(byte_stream: S) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    stream::unfold(
        (byte_stream, SseDecoder::new(), VecDeque::new(), false),
        |(mut input, mut decoder, mut ready, mut done)| async move {
            loop {
                if let Some(payload) = ready.pop_front() {
                    return Some((payload, (input, decoder, ready, done)));
                }
                if done {
                    return None;
                }
                match input.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        log(
                            Level::Warn,
                            Domain::Feed,
                            "sse_read_error",
                            obj(&[("error", v_str(&e.to_string()))]),
                        );
                        done = true;
                    }
                    None => {
                        ready.extend(decoder.finish());
                        done = true;
                    }
                }
            }
        },
    )
}
