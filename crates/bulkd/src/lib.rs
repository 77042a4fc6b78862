//! A line-command batching service.
//!
//! Clients stream newline-terminated commands over a socket. Commands sent
//! outside a block feed one counter shared by every connection, which seals
//! a batch each time it reaches the configured threshold. A connection that
//! opens a block with `{` instead collects its commands privately until the
//! matching `}` and emits them as one batch, however many there are.
//!
//! Sealed batches are rendered as `bulk: c1, c2, ...`, mirrored to standard
//! output in emission order, and persisted as one artefact file each by a
//! pool of background workers so ingestion never waits on the disk.
//!
//! The pieces, bottom up:
//!
//! - [`batch`]: commands, batches, the shared [`BatchCounter`], and the
//!   per-connection [`BlockTracker`].
//! - [`Multiplexer`]: serialises every connection's input through one
//!   critical section.
//! - [`Sink`]: bounded queues drained by persistence workers and a console
//!   consumer.
//! - [`Session`]: reassembles raw socket reads into command lines.
//! - [`transport`]: the socket listener.
//! - [`run_service`]: startup, signal wait, and ordered shutdown.

pub mod batch;
mod health;
mod multiplexer;
mod service;
mod session;
mod sink;
mod telemetry;
pub mod transport;

pub use batch::{
    Batch, BatchCounter, BatchTag, BlockTracker, Command, CommandError, ConnectionId,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use multiplexer::{BatchSink, CloseSummary, Multiplexer};
pub use service::{
    ServiceError, ServiceSummary, ShutdownError, ShutdownSignal, SystemShutdownSignal,
    run_service,
};
pub use session::{LineAssembler, Session};
pub use sink::{
    ArtefactStore, DirectoryStore, Sink, SinkError, SinkReport, SinkSettings,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
