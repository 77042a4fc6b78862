//! End-to-end batching scenarios across sessions, the multiplexer, and the
//! sink.

use std::fs;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::batch::{BatchTag, ConnectionId, texts};
use crate::multiplexer::{BatchSink, Multiplexer};
use crate::sink::{DirectoryStore, Sink, SinkSettings};
use crate::tests::support::{RecordingSink, SharedConsole};

const SCENARIO_A_FIRST: [&[u8]; 3] = [b"cmd1\ncm", b"d2\ncmd3\ncmd4", b"\ncmd5\n"];

const SCENARIO_A_SECOND: [&[u8]; 4] = [
    b"cmd1\ncmd2\n{\ncmd3\n",
    b"cmd4\n}\n{\ncmd5\ncmd6\n{\ncm",
    b"d7\ncmd8\n}\ncmd9\n}\n",
    b"{\ncmd10\ncmd11\n",
];

const SCENARIO_B: [(u64, &str); 12] = [
    (1, "If"),
    (2, "a"),
    (1, "search"),
    (1, "for"),
    (1, "{"),
    (1, "the"),
    (1, "name"),
    (2, "{"),
    (2, "text"),
    (2, "in"),
    (2, "}"),
    (1, "}"),
];

fn threshold() -> NonZeroUsize {
    NonZeroUsize::new(3).expect("non-zero threshold")
}

fn run_session(mux: &Arc<Multiplexer>, chunks: &[&[u8]]) {
    let mut session = mux.connect(NonZeroUsize::new(1024).expect("non-zero limit"));
    for chunk in chunks {
        session.receive(chunk);
    }
    session.disconnect();
}

fn run_scenario_b(mux: &Multiplexer) {
    for (id, line) in SCENARIO_B {
        mux.on_line(ConnectionId::new(id), line);
    }
}

struct DiskSink {
    _dir: TempDir,
    path: Utf8PathBuf,
    console: SharedConsole,
    sink: Arc<Sink>,
}

impl DiskSink {
    /// Artefact contents grouped by the tag in their file names, sorted.
    fn artefacts_tagged(&self, tag: &str) -> Vec<String> {
        let prefix = format!("bulk-{tag}-");
        let mut found: Vec<String> = fs::read_dir(self.path.as_std_path())
            .expect("list output dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| fs::read_to_string(entry.path()).expect("read artefact"))
            .collect();
        found.sort();
        found
    }

    fn artefact_count(&self) -> usize {
        fs::read_dir(self.path.as_std_path())
            .expect("list output dir")
            .count()
    }
}

#[fixture]
fn disk_sink() -> DiskSink {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("out")).expect("utf8 path");
    let console = SharedConsole::default();
    let store = DirectoryStore::create(path.clone()).expect("create store");
    let settings = SinkSettings {
        workers: NonZeroUsize::new(3).expect("non-zero workers"),
        queue_capacity: NonZeroUsize::new(16).expect("non-zero capacity"),
        enqueue_timeout: Duration::from_secs(1),
    };
    let sink = Sink::start(settings, Arc::new(store), Box::new(console.clone()))
        .expect("start sink");
    DiskSink {
        _dir: dir,
        path,
        console,
        sink: Arc::new(sink),
    }
}

#[rstest]
fn scenario_a_independent_connections() {
    let first_sink = Arc::new(RecordingSink::default());
    let first = Arc::new(Multiplexer::new(threshold(), first_sink.clone()));
    run_session(&first, &SCENARIO_A_FIRST);

    let first_batches = first_sink.batches();
    assert_eq!(first_batches.len(), 2);
    assert_eq!(texts(&first_batches[0]), ["cmd1", "cmd2", "cmd3"]);
    assert_eq!(texts(&first_batches[1]), ["cmd4", "cmd5"]);

    let second_sink = Arc::new(RecordingSink::default());
    let second = Arc::new(Multiplexer::new(threshold(), second_sink.clone()));
    run_session(&second, &SCENARIO_A_SECOND);

    let second_batches = second_sink.batches();
    assert_eq!(second_batches.len(), 3);
    assert_eq!(texts(&second_batches[0]), ["cmd1", "cmd2"]);
    assert_eq!(second_batches[0].tag(), BatchTag::Shared);
    assert_eq!(texts(&second_batches[1]), ["cmd3", "cmd4"]);
    assert_eq!(
        texts(&second_batches[2]),
        ["cmd5", "cmd6", "cmd7", "cmd8", "cmd9"]
    );
    assert!(matches!(second_batches[2].tag(), BatchTag::Connection(_)));
    assert_eq!(second.connection_count(), 0);
}

#[rstest]
fn scenario_a_lands_on_disk(disk_sink: DiskSink) {
    let sink: Arc<dyn BatchSink> = disk_sink.sink.clone();
    run_session(
        &Arc::new(Multiplexer::new(threshold(), Arc::clone(&sink))),
        &SCENARIO_A_FIRST,
    );
    run_session(
        &Arc::new(Multiplexer::new(threshold(), sink)),
        &SCENARIO_A_SECOND,
    );
    let report = disk_sink.sink.shutdown().expect("drain sink");

    assert_eq!(report.persisted, 5);
    assert_eq!(disk_sink.artefact_count(), 5);
    assert_eq!(
        disk_sink.artefacts_tagged("shared"),
        [
            "bulk: cmd1, cmd2\n",
            "bulk: cmd1, cmd2, cmd3\n",
            "bulk: cmd4, cmd5\n",
        ]
    );
    // Each multiplexer numbers its connections from 1.
    assert_eq!(
        disk_sink.artefacts_tagged("1"),
        ["bulk: cmd3, cmd4\n", "bulk: cmd5, cmd6, cmd7, cmd8, cmd9\n"]
    );
    assert_eq!(
        disk_sink.console.lines(),
        [
            "bulk: cmd1, cmd2, cmd3",
            "bulk: cmd4, cmd5",
            "bulk: cmd1, cmd2",
            "bulk: cmd3, cmd4",
            "bulk: cmd5, cmd6, cmd7, cmd8, cmd9",
        ]
    );
}

#[rstest]
fn scenario_b_interleaved_connections() {
    let sink = Arc::new(RecordingSink::default());
    let mux = Multiplexer::new(threshold(), sink.clone());
    run_scenario_b(&mux);

    let batches = sink.batches();
    let emitted: Vec<Vec<&str>> = batches.iter().map(texts).collect();
    assert_eq!(
        emitted,
        [
            vec!["If", "a", "search"],
            vec!["for"],
            vec!["text", "in"],
            vec!["the", "name"],
        ]
    );
    let tags: Vec<BatchTag> = batches.iter().map(|batch| batch.tag()).collect();
    assert_eq!(
        tags,
        [
            BatchTag::Shared,
            BatchTag::Shared,
            BatchTag::Connection(ConnectionId::new(2)),
            BatchTag::Connection(ConnectionId::new(1)),
        ]
    );
    assert_eq!(mux.pending_shared(), 0);
}

#[rstest]
fn scenario_b_lands_on_disk(disk_sink: DiskSink) {
    let mux = Multiplexer::new(threshold(), disk_sink.sink.clone());
    run_scenario_b(&mux);
    mux.close();
    let report = disk_sink.sink.shutdown().expect("drain sink");

    assert_eq!(report.persisted, 4);
    assert_eq!(report.dropped, 0);
    assert_eq!(
        disk_sink.console.lines(),
        [
            "bulk: If, a, search",
            "bulk: for",
            "bulk: text, in",
            "bulk: the, name",
        ]
    );
    assert_eq!(
        disk_sink.artefacts_tagged("shared"),
        ["bulk: If, a, search\n", "bulk: for\n"]
    );
    assert_eq!(disk_sink.artefacts_tagged("1"), ["bulk: the, name\n"]);
    assert_eq!(disk_sink.artefacts_tagged("2"), ["bulk: text, in\n"]);
}
