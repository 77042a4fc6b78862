//! Tests for the asynchronous sink.

use std::fs;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::batch::{BatchTag, ConnectionId, commands};
use crate::tests::support::{FailingStore, GatedStore, SharedConsole};

fn settings(workers: usize, capacity: usize, timeout: Duration) -> SinkSettings {
    SinkSettings {
        workers: NonZeroUsize::new(workers).expect("non-zero workers"),
        queue_capacity: NonZeroUsize::new(capacity).expect("non-zero capacity"),
        enqueue_timeout: timeout,
    }
}

fn batch(texts: &[&str]) -> Batch {
    Batch::new(BatchTag::Shared, commands(texts)).expect("non-empty batch")
}

struct OutputDir {
    _dir: TempDir,
    path: Utf8PathBuf,
}

impl OutputDir {
    fn artefacts(&self) -> Vec<(String, String)> {
        let mut found: Vec<(String, String)> = fs::read_dir(self.path.as_std_path())
            .expect("list output dir")
            .filter_map(Result::ok)
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let contents = fs::read_to_string(entry.path()).expect("read artefact");
                (name, contents)
            })
            .collect();
        found.sort();
        found
    }
}

#[fixture]
fn output_dir() -> OutputDir {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("bulk")).expect("utf8 path");
    OutputDir { _dir: dir, path }
}

#[rstest]
fn persists_and_displays_each_batch(output_dir: OutputDir) {
    let console = SharedConsole::default();
    let store = DirectoryStore::create(output_dir.path.clone()).expect("create store");
    let sink = Sink::start(
        settings(2, 8, Duration::from_millis(200)),
        Arc::new(store),
        Box::new(console.clone()),
    )
    .expect("start sink");

    let first = batch(&["cmd1", "cmd2", "cmd3"]);
    let second = Batch::new(
        BatchTag::Connection(ConnectionId::new(7)),
        commands(&["cmd4"]),
    )
    .expect("non-empty batch");
    let expected_names = [first.artefact_name(), second.artefact_name()];
    sink.enqueue(first);
    sink.enqueue(second);
    let report = sink.shutdown().expect("shutdown sink");

    assert_eq!(report.enqueued, 2);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.displayed, 2);
    assert_eq!(
        console.contents(),
        "bulk: cmd1, cmd2, cmd3\nbulk: cmd4\n"
    );
    let artefacts = output_dir.artefacts();
    assert_eq!(artefacts.len(), 2);
    for (name, contents) in &artefacts {
        assert!(expected_names.contains(name), "unexpected artefact {name}");
        assert!(name.starts_with("bulk-") && name.ends_with(".log"));
        assert!(contents == "bulk: cmd1, cmd2, cmd3\n" || contents == "bulk: cmd4\n");
    }
    assert!(artefacts.iter().any(|(name, _)| name.starts_with("bulk-7-")));
}

#[rstest]
fn console_preserves_emission_order(output_dir: OutputDir) {
    let console = SharedConsole::default();
    let store = DirectoryStore::create(output_dir.path.clone()).expect("create store");
    let sink = Sink::start(
        settings(4, 64, Duration::from_secs(1)),
        Arc::new(store),
        Box::new(console.clone()),
    )
    .expect("start sink");

    let expected: Vec<String> = (0..40).map(|n| format!("bulk: cmd{n}")).collect();
    for n in 0..40 {
        sink.enqueue(batch(&[format!("cmd{n}").as_str()]));
    }
    sink.shutdown().expect("shutdown sink");

    assert_eq!(console.lines(), expected);
    assert_eq!(output_dir.artefacts().len(), 40);
}

#[rstest]
fn persistence_failures_are_isolated() {
    let console = SharedConsole::default();
    let sink = Sink::start(
        settings(1, 4, Duration::from_millis(200)),
        Arc::new(FailingStore),
        Box::new(console.clone()),
    )
    .expect("start sink");

    sink.enqueue(batch(&["a"]));
    sink.enqueue(batch(&["b"]));
    let report = sink.shutdown().expect("failed writes do not fail shutdown");

    assert_eq!(report.failed, 2);
    assert_eq!(report.persisted, 0);
    assert_eq!(console.lines(), ["bulk: a", "bulk: b"]);
}

#[rstest]
fn full_queue_drops_batch_after_timeout() {
    let console = SharedConsole::default();
    let (store, entered, release) = GatedStore::new();
    let store = Arc::new(store);
    let sink = Sink::start(
        settings(1, 1, Duration::from_millis(200)),
        store.clone(),
        Box::new(console.clone()),
    )
    .expect("start sink");

    sink.enqueue(batch(&["first"]));
    let in_flight = entered
        .recv_timeout(Duration::from_secs(2))
        .expect("worker picks up the first batch");
    assert_eq!(in_flight, "bulk: first\n");

    sink.enqueue(batch(&["second"]));
    sink.enqueue(batch(&["third"]));
    assert_eq!(sink.report().dropped, 1);

    release.send(()).expect("release first write");
    release.send(()).expect("release second write");
    let report = sink.shutdown().expect("shutdown sink");

    assert_eq!(report.persisted, 2);
    assert_eq!(store.written(), ["bulk: first\n", "bulk: second\n"]);
    assert_eq!(console.lines(), ["bulk: first", "bulk: second", "bulk: third"]);
}

#[rstest]
fn enqueue_after_shutdown_is_dropped(output_dir: OutputDir) {
    let store = DirectoryStore::create(output_dir.path.clone()).expect("create store");
    let sink = Sink::start(
        settings(1, 4, Duration::from_millis(50)),
        Arc::new(store),
        Box::new(SharedConsole::default()),
    )
    .expect("start sink");
    sink.shutdown().expect("shutdown sink");

    sink.enqueue(batch(&["late"]));

    let report = sink.report();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.enqueued, 0);
    assert!(output_dir.artefacts().is_empty());
    sink.shutdown().expect("second shutdown is a no-op");
}
