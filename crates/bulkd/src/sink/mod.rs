//! Asynchronous persistence and console mirroring of completed batches.
//!
//! [`Sink::enqueue`] never performs I/O itself. Each batch is placed on two
//! bounded queues: one drained by a pool of persistence workers writing one
//! artefact per batch, and one drained by a single console consumer so
//! console output keeps emission order. When a queue stays full for longer
//! than the enqueue timeout the batch is logged and dropped from that queue
//! rather than stalling ingestion.

mod stages;
mod store;

use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use camino::Utf8PathBuf;
use crossbeam_channel::{SendTimeoutError, Sender};
use thiserror::Error;
use tracing::{error, info};

use bulk_config::Config;

use crate::batch::Batch;
use crate::multiplexer::BatchSink;

use self::stages::{StageHandle, spawn_console_stage, spawn_worker_stage};
pub use self::store::{ArtefactStore, DirectoryStore};

pub(crate) const SINK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::sink");

/// Errors raised while starting or stopping the sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The artefact directory could not be created.
    #[error("failed to prepare output directory '{path}': {source}")]
    OutputDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A consumer thread could not be spawned.
    #[error("failed to spawn sink stage {stage}: {source}")]
    Spawn {
        /// Name of the stage thread.
        stage: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A consumer thread panicked before draining its queue.
    #[error("sink stage {stage} panicked")]
    StagePanic {
        /// Name of the stage thread.
        stage: String,
    },
}

/// Sizing of the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    /// Persistence worker threads.
    pub workers: NonZeroUsize,
    /// Capacity of each queue.
    pub queue_capacity: NonZeroUsize,
    /// Longest an enqueue waits on a full queue.
    pub enqueue_timeout: Duration,
}

impl SinkSettings {
    /// Extracts sink sizing from the service configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            workers: config.workers(),
            queue_capacity: config.queue_capacity(),
            enqueue_timeout: config.enqueue_timeout(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SinkStats {
    enqueued: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
    displayed: AtomicU64,
    dropped: AtomicU64,
}

/// Counters describing what the sink has done so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    /// Batches accepted by `enqueue`.
    pub enqueued: u64,
    /// Artefacts written.
    pub persisted: u64,
    /// Artefact writes that failed.
    pub failed: u64,
    /// Batches written to the console.
    pub displayed: u64,
    /// Queue placements abandoned on timeout or after shutdown.
    pub dropped: u64,
}

impl SinkStats {
    fn report(&self) -> SinkReport {
        SinkReport {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            displayed: self.displayed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Queues {
    artefacts: Sender<Arc<Batch>>,
    console: Sender<Arc<Batch>>,
}

#[derive(Debug, Clone, Copy)]
enum Queue {
    Artefacts,
    Console,
}

impl Queue {
    const fn name(self) -> &'static str {
        match self {
            Self::Artefacts => "artefacts",
            Self::Console => "console",
        }
    }
}

/// The producer/consumer boundary between the multiplexer and blocking I/O.
pub struct Sink {
    queues: RwLock<Option<Queues>>,
    stages: Mutex<Vec<StageHandle>>,
    enqueue_timeout: Duration,
    stats: Arc<SinkStats>,
}

impl Sink {
    /// Starts the sink writing artefacts to `config.output_dir()` and
    /// mirroring batches to standard output.
    pub fn from_config(config: &Config) -> Result<Self, SinkError> {
        let store = DirectoryStore::create(config.output_dir().to_path_buf())?;
        Self::start(
            SinkSettings::from_config(config),
            Arc::new(store),
            Box::new(io::stdout()),
        )
    }

    /// Starts the worker pool and console consumer.
    pub fn start(
        settings: SinkSettings,
        store: Arc<dyn ArtefactStore>,
        console: Box<dyn Write + Send>,
    ) -> Result<Self, SinkError> {
        let capacity = settings.queue_capacity.get();
        let (artefact_tx, artefact_rx) = crossbeam_channel::bounded(capacity);
        let (console_tx, console_rx) = crossbeam_channel::bounded(capacity);
        let stats = Arc::new(SinkStats::default());

        let mut stages = Vec::with_capacity(settings.workers.get() + 1);
        let started = (0..settings.workers.get())
            .map(|index| {
                spawn_worker_stage(
                    index,
                    artefact_rx.clone(),
                    Arc::clone(&store),
                    Arc::clone(&stats),
                )
            })
            .chain(std::iter::once_with(|| {
                spawn_console_stage(console_rx, console, Arc::clone(&stats))
            }));
        for stage in started {
            match stage {
                Ok(handle) => stages.push(handle),
                Err(error) => {
                    // Closing the queues lets the stages already running exit.
                    drop(artefact_tx);
                    drop(console_tx);
                    for handle in stages {
                        if let Err(join_error) = handle.join() {
                            error!(target: SINK_TARGET, error = %join_error, "sink stage failed");
                        }
                    }
                    return Err(error);
                }
            }
        }

        info!(
            target: SINK_TARGET,
            workers = settings.workers.get(),
            queue_capacity = capacity,
            enqueue_timeout_ms = settings.enqueue_timeout.as_millis(),
            "sink started"
        );
        Ok(Self {
            queues: RwLock::new(Some(Queues {
                artefacts: artefact_tx,
                console: console_tx,
            })),
            stages: Mutex::new(stages),
            enqueue_timeout: settings.enqueue_timeout,
            stats,
        })
    }

    /// Counters so far.
    #[must_use]
    pub fn report(&self) -> SinkReport {
        self.stats.report()
    }

    /// Closes the queues, lets the consumers drain them, and joins every
    /// stage. Batches enqueued afterwards are logged and dropped.
    pub fn shutdown(&self) -> Result<SinkReport, SinkError> {
        drop(
            self.queues
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let stages = std::mem::take(
            &mut *self.stages.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut outcome = Ok(());
        for stage in stages {
            if let Err(error) = stage.join() {
                error!(target: SINK_TARGET, %error, "sink stage failed");
                outcome = Err(error);
            }
        }
        outcome?;
        let report = self.report();
        info!(
            target: SINK_TARGET,
            persisted = report.persisted,
            failed = report.failed,
            displayed = report.displayed,
            dropped = report.dropped,
            "sink drained"
        );
        Ok(report)
    }

    fn place(&self, queue: Queue, sender: &Sender<Arc<Batch>>, batch: &Arc<Batch>) {
        match sender.send_timeout(Arc::clone(batch), self.enqueue_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(batch)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: SINK_TARGET,
                    queue = queue.name(),
                    sequence = batch.sequence(),
                    batch = %batch,
                    "sink queue full; dropping batch"
                );
            }
            Err(SendTimeoutError::Disconnected(batch)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: SINK_TARGET,
                    queue = queue.name(),
                    sequence = batch.sequence(),
                    batch = %batch,
                    "sink consumer gone; dropping batch"
                );
            }
        }
    }
}

impl BatchSink for Sink {
    fn enqueue(&self, batch: Batch) {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let Some(queues) = queues.as_ref() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            error!(
                target: SINK_TARGET,
                sequence = batch.sequence(),
                batch = %batch,
                "sink shut down; dropping batch"
            );
            return;
        };
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        let batch = Arc::new(batch);
        self.place(Queue::Console, &queues.console, &batch);
        self.place(Queue::Artefacts, &queues.artefacts, &batch);
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Sink")
            .field("enqueue_timeout", &self.enqueue_timeout)
            .field("report", &self.report())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
