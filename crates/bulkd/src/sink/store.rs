//! Durable artefact storage for rendered batches.

use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use super::{SINK_TARGET, SinkError};

/// Persists one artefact per batch.
pub trait ArtefactStore: Send + Sync {
    /// Writes `contents` under `name`. Names are unique per batch.
    fn persist(&self, name: &str, contents: &str) -> io::Result<()>;
}

/// Stores artefacts as files in a single directory.
///
/// Each file is written under a hidden temporary name and renamed into
/// place, so a reader never sees a partially written artefact.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: Utf8PathBuf,
}

impl DirectoryStore {
    /// Creates the directory if needed and returns a store rooted there.
    pub fn create(directory: impl Into<Utf8PathBuf>) -> Result<Self, SinkError> {
        let root = directory.into();
        fs::create_dir_all(root.as_std_path()).map_err(|source| SinkError::OutputDirectory {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Directory artefacts are written to.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl ArtefactStore for DirectoryStore {
    fn persist(&self, name: &str, contents: &str) -> io::Result<()> {
        let destination = self.root.join(name);
        let staging = self.root.join(format!(".{name}.tmp"));
        let mut file = fs::File::create(&staging)?;
        let written = write_synced(&mut file, contents)
            .and_then(|()| {
                drop(file);
                fs::rename(&staging, &destination)
            });
        if written.is_err()
            && let Err(error) = fs::remove_file(&staging)
        {
            warn!(
                target: SINK_TARGET,
                %error,
                path = %staging,
                "failed to remove staging file"
            );
        }
        written
    }
}

fn write_synced(file: &mut fs::File, contents: &str) -> io::Result<()> {
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}
