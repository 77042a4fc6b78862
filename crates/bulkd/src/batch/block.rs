//! Per-connection nested block state machine.

use std::mem;

use tracing::{info, warn};

use super::{BATCH_TARGET, Batch, BatchCounter, BatchTag, Command, ConnectionId};

/// Control line opening a block.
pub const BLOCK_OPEN: &str = "{";
/// Control line closing a block.
pub const BLOCK_CLOSE: &str = "}";

/// Tracks brace depth and buffered block content for one connection.
///
/// At depth zero commands belong to the shared [`BatchCounter`]; inside a
/// block they are buffered locally and emitted as one flattened batch when
/// the outermost block closes. Nested blocks only move the depth counter.
#[derive(Debug)]
pub struct BlockTracker {
    id: ConnectionId,
    depth: usize,
    buffer: Vec<Command>,
}

impl BlockTracker {
    /// Creates flat-state tracking for a newly observed connection.
    #[must_use]
    pub const fn new(id: ConnectionId) -> Self {
        Self {
            id,
            depth: 0,
            buffer: Vec::new(),
        }
    }

    /// Connection this tracker belongs to.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current block nesting depth.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Commands buffered for the open block.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Routes one line, returning the batch it completes, if any.
    ///
    /// Opening a block from flat state is a barrier: the shared counter is
    /// flushed before any block content is buffered.
    pub fn on_line(&mut self, line: Command, shared: &mut BatchCounter) -> Option<Batch> {
        if line.is(BLOCK_OPEN) {
            self.depth += 1;
            if self.depth == 1 {
                return shared.force_flush();
            }
            return None;
        }

        if line.is(BLOCK_CLOSE) {
            return self.close_block();
        }

        if self.depth == 0 {
            shared.add(line)
        } else {
            self.buffer.push(line);
            None
        }
    }

    /// Finishes the connection.
    ///
    /// In flat state this is a barrier flush of the shared counter. Inside a
    /// block the buffered content is an incomplete transaction and is
    /// discarded.
    pub fn on_disconnect(self, shared: &mut BatchCounter) -> Option<Batch> {
        if self.depth == 0 {
            return shared.force_flush();
        }
        info!(
            target: BATCH_TARGET,
            connection = %self.id,
            depth = self.depth,
            discarded = self.buffer.len(),
            "discarding unterminated block on disconnect"
        );
        None
    }

    fn close_block(&mut self) -> Option<Batch> {
        if self.depth == 0 {
            warn!(
                target: BATCH_TARGET,
                connection = %self.id,
                "ignoring block close without matching open"
            );
            return None;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return None;
        }
        Batch::new(BatchTag::Connection(self.id), mem::take(&mut self.buffer))
    }
}
