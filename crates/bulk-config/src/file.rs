//! Optional TOML configuration file.
//!
//! Keys mirror the long flag names in snake case, for example
//! `batch_threshold = 5` or `listen = "unix:///run/bulkd/bulkd.sock"`. Every
//! key is optional and unknown keys are rejected.

use std::fs;
use std::num::NonZeroUsize;

use camino::Utf8Path;
use serde::Deserialize;

use crate::ConfigError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileLayer {
    pub(crate) listen: Option<String>,
    pub(crate) batch_threshold: Option<NonZeroUsize>,
    pub(crate) workers: Option<NonZeroUsize>,
    pub(crate) output_dir: Option<String>,
    pub(crate) queue_capacity: Option<NonZeroUsize>,
    pub(crate) enqueue_timeout_ms: Option<u64>,
    pub(crate) max_line_bytes: Option<NonZeroUsize>,
    pub(crate) echo: Option<bool>,
    pub(crate) log_filter: Option<String>,
    pub(crate) log_format: Option<String>,
}

impl FileLayer {
    pub(crate) fn read(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn empty_file_sets_nothing() {
        let layer: FileLayer = toml::from_str("").expect("empty document");
        assert!(layer.listen.is_none());
        assert!(layer.batch_threshold.is_none());
        assert!(layer.echo.is_none());
    }

    #[rstest]
    #[case::unknown_key("batch_size = 3")]
    #[case::zero_threshold("batch_threshold = 0")]
    #[case::wrong_type("workers = \"two\"")]
    fn rejects_malformed_documents(#[case] document: &str) {
        assert!(toml::from_str::<FileLayer>(document).is_err());
    }
}
