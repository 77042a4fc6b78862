//! Test doubles shared by the unit and behaviour suites.

mod console;
mod reporter;
mod sink;
mod stores;

pub(crate) use console::SharedConsole;
pub(crate) use reporter::{HealthEvent, RecordingHealthReporter};
pub(crate) use sink::RecordingSink;
pub(crate) use stores::{FailingStore, GatedStore};

use std::time::{Duration, Instant};

/// Polls `condition` until it holds or two seconds pass.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
