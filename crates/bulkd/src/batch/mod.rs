//! Commands, batches, and the two batching policies that produce them.
//!
//! A [`Batch`] is sealed either by the shared [`BatchCounter`] when it fills
//! (or is forced to flush at a barrier), or by a connection's
//! [`BlockTracker`] when its outermost `{ ... }` block closes. Batches are
//! immutable once sealed and carry a process-wide sequence number, so two
//! batches never render to the same artefact name.

mod block;
mod counter;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use time::OffsetDateTime;

pub use self::block::{BLOCK_CLOSE, BLOCK_OPEN, BlockTracker};
pub use self::counter::BatchCounter;

pub(crate) const BATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::batch");

const RENDER_PREFIX: &str = "bulk: ";
const RENDER_SEPARATOR: &str = ", ";
const ARTEFACT_PREFIX: &str = "bulk-";
const ARTEFACT_SUFFIX: &str = ".log";

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Errors raised when text cannot form a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Commands must carry at least one character.
    #[error("command text is empty")]
    Empty,
    /// Line terminators belong to the transport, not the command.
    #[error("command text contains a line terminator")]
    LineTerminator,
}

/// One logical input line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Validates and wraps command text.
    pub fn new(text: impl Into<String>) -> Result<Self, CommandError> {
        let text = text.into();
        if text.is_empty() {
            return Err(CommandError::Empty);
        }
        if text.contains(['\n', '\r']) {
            return Err(CommandError::LineTerminator);
        }
        Ok(Self(text))
    }

    /// Borrows the command text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is(&self, symbol: &str) -> bool {
        self.0 == symbol
    }
}

impl AsRef<str> for Command {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Self::new(text)
    }
}

/// Opaque identity of a client connection, used only as a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Which policy completed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchTag {
    /// The shared counter; its batches may span several connections.
    Shared,
    /// A block closed on the given connection.
    Connection(ConnectionId),
}

impl fmt::Display for BatchTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => formatter.write_str("shared"),
            Self::Connection(id) => write!(formatter, "{id}"),
        }
    }
}

/// An immutable, ordered, non-empty group of commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    tag: BatchTag,
    sequence: u64,
    created_at: OffsetDateTime,
    commands: Vec<Command>,
}

impl Batch {
    /// Seals `commands` into a batch, assigning the next sequence number.
    ///
    /// Returns `None` when `commands` is empty; empty batches are never
    /// emitted.
    #[must_use]
    pub fn new(tag: BatchTag, commands: Vec<Command>) -> Option<Self> {
        if commands.is_empty() {
            return None;
        }
        Some(Self {
            tag,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            created_at: OffsetDateTime::now_utc(),
            commands,
        })
    }

    /// Policy that completed the batch.
    #[must_use]
    pub const fn tag(&self) -> BatchTag {
        self.tag
    }

    /// Process-wide, strictly increasing sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the batch was sealed.
    #[must_use]
    pub const fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Commands in arrival order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands; always at least one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Renders the console and artefact text: `bulk: c1, c2, ..., cN\n`.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{self}\n")
    }

    /// Artefact file name, `bulk-<tag>-<unix seconds>-<sequence>.log`.
    #[must_use]
    pub fn artefact_name(&self) -> String {
        format!(
            "{ARTEFACT_PREFIX}{}-{}-{}{ARTEFACT_SUFFIX}",
            self.tag,
            self.created_at.unix_timestamp(),
            self.sequence
        )
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(RENDER_PREFIX)?;
        for (index, command) in self.commands.iter().enumerate() {
            if index > 0 {
                formatter.write_str(RENDER_SEPARATOR)?;
            }
            formatter.write_str(command.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn commands(texts: &[&str]) -> Vec<Command> {
    texts
        .iter()
        .map(|text| Command::new(*text).expect("valid command"))
        .collect()
}

#[cfg(test)]
pub(crate) fn texts(batch: &Batch) -> Vec<&str> {
    batch.commands().iter().map(Command::as_str).collect()
}
