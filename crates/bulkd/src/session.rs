//! Client sessions: reassembling raw byte chunks into command lines.
//!
//! Reads from a socket arrive in arbitrary fragments. [`LineAssembler`]
//! carries partial lines over between reads, and [`Session`] feeds each
//! completed line to the [`Multiplexer`] under one connection id.

use std::mem;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::warn;

use crate::batch::ConnectionId;
use crate::multiplexer::Multiplexer;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Splits a byte stream into newline-terminated lines.
///
/// A trailing `\r` is stripped, empty lines are skipped, and invalid UTF-8
/// is replaced lossily. A line longer than the limit is dropped up to its
/// terminating newline.
#[derive(Debug)]
pub struct LineAssembler {
    max_line_bytes: usize,
    partial: Vec<u8>,
    overflowed: bool,
}

impl LineAssembler {
    /// Creates an assembler accepting lines up to `max_line_bytes` long.
    #[must_use]
    pub const fn new(max_line_bytes: NonZeroUsize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.get(),
            partial: Vec::new(),
            overflowed: false,
        }
    }

    /// Consumes a chunk and returns every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut segments = chunk.split(|byte| *byte == b'\n');
        let mut current = segments.next();
        while let Some(segment) = current {
            let next = segments.next();
            self.append(segment);
            // Every segment but the last was followed by a newline.
            if next.is_some()
                && let Some(line) = self.complete_line()
            {
                lines.push(line);
            }
            current = next;
        }
        lines
    }

    /// Returns the unterminated remainder, if any, leaving the assembler empty.
    pub fn finish(&mut self) -> Option<String> {
        self.complete_line()
    }

    /// Bytes held for an incomplete line.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.partial.len()
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        self.partial.extend_from_slice(bytes);
        if self.partial.len() > self.max_line_bytes {
            warn!(
                target: SESSION_TARGET,
                limit = self.max_line_bytes,
                "discarding line exceeding maximum length"
            );
            self.partial = Vec::new();
            self.overflowed = true;
        }
    }

    fn complete_line(&mut self) -> Option<String> {
        if mem::take(&mut self.overflowed) {
            return None;
        }
        let mut raw = mem::take(&mut self.partial);
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        if raw.is_empty() {
            return None;
        }
        Some(match String::from_utf8(raw) {
            Ok(line) => line,
            Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
        })
    }
}

/// One client's view of the multiplexer.
///
/// The session disconnects exactly once: explicitly through
/// [`Session::disconnect`], or when dropped.
#[derive(Debug)]
pub struct Session {
    mux: Arc<Multiplexer>,
    id: ConnectionId,
    assembler: LineAssembler,
    finished: bool,
}

impl Session {
    /// Opens a session under a freshly allocated connection id.
    #[must_use]
    pub fn open(mux: Arc<Multiplexer>, max_line_bytes: NonZeroUsize) -> Self {
        let id = mux.allocate_connection_id();
        Self {
            mux,
            id,
            assembler: LineAssembler::new(max_line_bytes),
            finished: false,
        }
    }

    /// Connection id the multiplexer knows this session by.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Feeds a raw chunk, delivering each completed line. Returns the number
    /// of lines delivered.
    pub fn receive(&mut self, chunk: &[u8]) -> usize {
        let lines = self.assembler.push(chunk);
        for line in &lines {
            self.mux.on_line(self.id, line);
        }
        lines.len()
    }

    /// Delivers any unterminated trailing line, then disconnects.
    pub fn disconnect(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if mem::replace(&mut self.finished, true) {
            return;
        }
        if let Some(line) = self.assembler.finish() {
            self.mux.on_line(self.id, &line);
        }
        self.mux.on_disconnect(self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.finish();
    }
}
