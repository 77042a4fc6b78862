//! Serialising router between connections and the two batching policies.
//!
//! Every `on_line` and `on_disconnect` call runs inside one critical
//! section, so the shared counter observes commands in exactly the order the
//! transport delivered them across all connections. Completed batches are
//! handed to the [`BatchSink`] while the lock is still held, which keeps the
//! sink's view of emission order identical to the order of sealing.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchCounter, BlockTracker, Command, ConnectionId};
use crate::session::Session;

pub(crate) const MULTIPLEXER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::multiplexer");

/// Destination for completed batches.
///
/// Implementations must not block indefinitely: `enqueue` runs inside the
/// multiplexer's critical section.
pub trait BatchSink: Send + Sync {
    /// Accepts ownership of a completed batch.
    fn enqueue(&self, batch: Batch);
}

impl<T> BatchSink for Arc<T>
where
    T: BatchSink + ?Sized,
{
    fn enqueue(&self, batch: Batch) {
        (**self).enqueue(batch);
    }
}

/// Counts reported when the multiplexer stops accepting input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloseSummary {
    /// Commands flushed from the shared counter by the final barrier.
    pub flushed: usize,
    /// Connections that were still open.
    pub connections: usize,
    /// Connections whose unterminated block content was discarded.
    pub discarded_blocks: usize,
}

#[derive(Debug)]
struct State {
    accepting: bool,
    shared: BatchCounter,
    connections: HashMap<ConnectionId, BlockTracker>,
}

/// Owns the shared counter and one block tracker per live connection.
pub struct Multiplexer {
    state: Mutex<State>,
    sink: Arc<dyn BatchSink>,
    next_connection: AtomicU64,
}

impl Multiplexer {
    /// Creates a multiplexer whose shared counter emits every `threshold`
    /// commands.
    #[must_use]
    pub fn new(threshold: NonZeroUsize, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            state: Mutex::new(State {
                accepting: true,
                shared: BatchCounter::new(threshold),
                connections: HashMap::new(),
            }),
            sink,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Allocates an identifier no other connection on this multiplexer uses.
    pub fn allocate_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Opens a session feeding this multiplexer under a fresh connection id.
    #[must_use]
    pub fn connect(self: &Arc<Self>, max_line_bytes: NonZeroUsize) -> Session {
        Session::open(Arc::clone(self), max_line_bytes)
    }

    /// Routes one command line from `id`.
    ///
    /// The connection's state is created on its first line. Text that is not
    /// a valid command is logged and skipped.
    pub fn on_line(&self, id: ConnectionId, text: &str) {
        let command = match Command::new(text) {
            Ok(command) => command,
            Err(error) => {
                warn!(
                    target: MULTIPLEXER_TARGET,
                    connection = %id,
                    %error,
                    "skipping invalid command line"
                );
                return;
            }
        };

        let mut state = self.lock();
        if !state.accepting {
            debug!(
                target: MULTIPLEXER_TARGET,
                connection = %id,
                "ignoring line after close"
            );
            return;
        }
        let State {
            shared,
            connections,
            ..
        } = &mut *state;
        let tracker = connections
            .entry(id)
            .or_insert_with(|| BlockTracker::new(id));
        if let Some(batch) = tracker.on_line(command, shared) {
            self.emit(batch);
        }
    }

    /// Finishes `id`, applying the disconnect barrier or block discard.
    ///
    /// A connection that never sent a line is treated as flat.
    pub fn on_disconnect(&self, id: ConnectionId) {
        let mut state = self.lock();
        if !state.accepting {
            debug!(
                target: MULTIPLEXER_TARGET,
                connection = %id,
                "ignoring disconnect after close"
            );
            return;
        }
        let tracker = state
            .connections
            .remove(&id)
            .unwrap_or_else(|| BlockTracker::new(id));
        if let Some(batch) = tracker.on_disconnect(&mut state.shared) {
            self.emit(batch);
        }
        debug!(
            target: MULTIPLEXER_TARGET,
            connection = %id,
            remaining = state.connections.len(),
            "connection finished"
        );
    }

    /// Stops accepting input and flushes what the shared counter holds.
    ///
    /// Open blocks are discarded as on disconnect. Later calls return an
    /// empty summary.
    pub fn close(&self) -> CloseSummary {
        let mut state = self.lock();
        if !state.accepting {
            return CloseSummary::default();
        }
        state.accepting = false;

        let mut summary = CloseSummary {
            connections: state.connections.len(),
            ..CloseSummary::default()
        };
        summary.discarded_blocks = state
            .connections
            .drain()
            .filter(|(_, tracker)| tracker.depth() > 0)
            .count();
        if let Some(batch) = state.shared.force_flush() {
            summary.flushed = batch.len();
            self.emit(batch);
        }
        info!(
            target: MULTIPLEXER_TARGET,
            flushed = summary.flushed,
            connections = summary.connections,
            discarded_blocks = summary.discarded_blocks,
            "multiplexer closed"
        );
        summary
    }

    /// Whether lines are still being accepted.
    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    /// Connections with state, i.e. that have sent at least one line.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Commands waiting in the shared counter.
    pub fn pending_shared(&self) -> usize {
        self.lock().shared.pending_len()
    }

    /// Block depth of `id`, or `None` if it has no state.
    pub fn depth_of(&self, id: ConnectionId) -> Option<usize> {
        self.lock().connections.get(&id).map(BlockTracker::depth)
    }

    fn emit(&self, batch: Batch) {
        debug!(
            target: MULTIPLEXER_TARGET,
            tag = %batch.tag(),
            sequence = batch.sequence(),
            commands = batch.len(),
            "batch sealed"
        );
        self.sink.enqueue(batch);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state is plain data and consistent after every completed
        // operation, so a panic elsewhere leaves nothing to repair.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Multiplexer")
            .field("next_connection", &self.next_connection)
            .finish_non_exhaustive()
    }
}
