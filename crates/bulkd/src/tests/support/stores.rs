//! Artefact stores that fail or block on demand.

use std::io;
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use crate::sink::ArtefactStore;

/// Rejects every write.
#[derive(Debug, Default)]
pub(crate) struct FailingStore;

impl ArtefactStore for FailingStore {
    fn persist(&self, _name: &str, _contents: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"))
    }
}

/// Blocks each write until the test releases it, announcing every write
/// that starts waiting.
#[derive(Debug)]
pub(crate) struct GatedStore {
    entered: Sender<String>,
    release: Receiver<()>,
    written: Mutex<Vec<String>>,
}

impl GatedStore {
    /// Returns the store, a receiver of started writes, and the release gate.
    pub(crate) fn new() -> (Self, Receiver<String>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let store = Self {
            entered: entered_tx,
            release: release_rx,
            written: Mutex::new(Vec::new()),
        };
        (store, entered_rx, release_tx)
    }

    pub(crate) fn written(&self) -> Vec<String> {
        self.written.lock().expect("store mutex poisoned").clone()
    }
}

impl ArtefactStore for GatedStore {
    fn persist(&self, _name: &str, contents: &str) -> io::Result<()> {
        self.entered.send(contents.to_owned()).ok();
        self.release
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "gate dropped"))?;
        self.written
            .lock()
            .expect("store mutex poisoned")
            .push(contents.to_owned());
        Ok(())
    }
}
