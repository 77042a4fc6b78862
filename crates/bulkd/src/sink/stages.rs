//! Consumer threads draining the sink queues.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, error};

use crate::batch::Batch;

use super::store::ArtefactStore;
use super::{SINK_TARGET, SinkError, SinkStats};

/// A named consumer thread.
pub(super) struct StageHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl StageHandle {
    pub(super) fn join(self) -> Result<(), SinkError> {
        self.handle
            .join()
            .map_err(|_| SinkError::StagePanic { stage: self.name })
    }
}

fn spawn_stage(
    name: String,
    body: impl FnOnce() + Send + 'static,
) -> Result<StageHandle, SinkError> {
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|source| SinkError::Spawn {
            stage: name.clone(),
            source,
        })?;
    Ok(StageHandle { name, handle })
}

/// Writes artefacts until the queue is closed and drained. Several workers
/// share one receiver, so artefacts complete in no particular order.
pub(super) fn spawn_worker_stage(
    index: usize,
    batches: Receiver<Arc<Batch>>,
    store: Arc<dyn ArtefactStore>,
    stats: Arc<SinkStats>,
) -> Result<StageHandle, SinkError> {
    let name = format!("bulkd-sink-worker-{index}");
    spawn_stage(name, move || {
        debug!(target: SINK_TARGET, worker = index, "persistence worker started");
        while let Ok(batch) = batches.recv() {
            let artefact = batch.artefact_name();
            let contents = batch.render();
            match store.persist(&artefact, &contents) {
                Ok(()) => {
                    stats.persisted.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: SINK_TARGET,
                        worker = index,
                        %artefact,
                        "artefact written"
                    );
                }
                Err(error) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        target: SINK_TARGET,
                        %artefact,
                        %error,
                        batch = %contents.trim_end(),
                        "failed to persist batch artefact"
                    );
                }
            }
        }
        debug!(target: SINK_TARGET, worker = index, "persistence worker exiting");
    })
}

/// Mirrors batches to the console in emission order.
pub(super) fn spawn_console_stage(
    batches: Receiver<Arc<Batch>>,
    mut console: Box<dyn Write + Send>,
    stats: Arc<SinkStats>,
) -> Result<StageHandle, SinkError> {
    spawn_stage("bulkd-sink-console".to_owned(), move || {
        while let Ok(batch) = batches.recv() {
            let contents = batch.render();
            let written = console
                .write_all(contents.as_bytes())
                .and_then(|()| console.flush());
            match written {
                Ok(()) => {
                    stats.displayed.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    error!(
                        target: SINK_TARGET,
                        %error,
                        batch = %contents.trim_end(),
                        "failed to write batch to console"
                    );
                }
            }
        }
        debug!(target: SINK_TARGET, "console consumer exiting");
    })
}
