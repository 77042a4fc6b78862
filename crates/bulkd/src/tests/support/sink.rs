//! In-memory [`BatchSink`] capturing batches in emission order.

use std::sync::Mutex;

use crate::batch::Batch;
use crate::multiplexer::BatchSink;

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    batches: Mutex<Vec<Batch>>,
}

impl RecordingSink {
    pub(crate) fn batches(&self) -> Vec<Batch> {
        self.batches.lock().expect("recording sink mutex poisoned").clone()
    }

    pub(crate) fn rendered(&self) -> Vec<String> {
        self.batches().iter().map(Batch::render).collect()
    }
}

impl BatchSink for RecordingSink {
    fn enqueue(&self, batch: Batch) {
        self.batches
            .lock()
            .expect("recording sink mutex poisoned")
            .push(batch);
    }
}
