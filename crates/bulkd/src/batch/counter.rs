//! Fixed-size batching shared by every connection outside a block.

use std::mem;
use std::num::NonZeroUsize;

use super::{Batch, BatchTag, Command};

/// Accumulates commands until `threshold` is reached, then emits them.
///
/// Between calls `pending_len() < threshold()` always holds. The counter is
/// not synchronised; the [`Multiplexer`](crate::Multiplexer) serialises all
/// access to it.
#[derive(Debug)]
pub struct BatchCounter {
    threshold: NonZeroUsize,
    pending: Vec<Command>,
}

impl BatchCounter {
    /// Creates an empty counter. The threshold is fixed for its lifetime.
    #[must_use]
    pub const fn new(threshold: NonZeroUsize) -> Self {
        Self {
            threshold,
            pending: Vec::new(),
        }
    }

    /// Appends `command`; returns the full batch when the threshold is hit.
    pub fn add(&mut self, command: Command) -> Option<Batch> {
        self.pending.push(command);
        if self.pending.len() < self.threshold.get() {
            return None;
        }
        self.take()
    }

    /// Emits whatever is pending, even below the threshold.
    pub fn force_flush(&mut self) -> Option<Batch> {
        self.take()
    }

    /// Commands waiting for the threshold.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Size at which the counter emits.
    #[must_use]
    pub const fn threshold(&self) -> NonZeroUsize {
        self.threshold
    }

    fn take(&mut self) -> Option<Batch> {
        Batch::new(BatchTag::Shared, mem::take(&mut self.pending))
    }
}
