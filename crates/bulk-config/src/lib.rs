//! Configuration for the `bulkd` command batching service.
//!
//! Values are resolved from command-line flags first, then `BULKD_*`
//! environment variables, then the TOML file named by `--config-path`, then
//! the defaults in [`defaults`]. The batching threshold, worker count, and
//! output directory are fixed for the lifetime of the service once loaded.

pub mod defaults;
mod file;
mod logging;
mod socket;

use std::ffi::OsString;
use std::io;
use std::num::NonZeroUsize;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use thiserror::Error;

pub use defaults::{
    DEFAULT_BATCH_THRESHOLD, DEFAULT_ENQUEUE_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_LINE_BYTES, DEFAULT_QUEUE_CAPACITY, DEFAULT_TCP_PORT, DEFAULT_WORKERS,
    default_log_filter, default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

use defaults::{DEFAULT_LISTEN, DEFAULT_OUTPUT_DIR, non_zero};
use file::FileLayer;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Flags or environment variables were rejected, or help was requested.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    /// The configuration file could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    ReadFile {
        /// File named by `--config-path`.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid TOML or has unknown keys.
    #[error("failed to parse configuration file '{path}': {source}")]
    ParseFile {
        /// File named by `--config-path`.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// A key in the configuration file holds an unusable value.
    #[error("invalid `{key}` in configuration file '{path}': {message}")]
    InvalidValue {
        /// File named by `--config-path`.
        path: Utf8PathBuf,
        /// Offending key.
        key: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

/// Resolved service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "bulkd",
    version,
    about = "Groups line-oriented commands from many clients into logged batches"
)]
pub struct Config {
    /// TOML file supplying any setting not given as a flag or environment variable.
    #[arg(long, env = "BULKD_CONFIG_PATH")]
    pub config_path: Option<Utf8PathBuf>,

    /// Endpoint to accept client connections on (`tcp://host:port` or `unix:///path`).
    #[arg(long, env = "BULKD_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketEndpoint,

    /// Number of commands the shared counter collects before emitting a batch.
    #[arg(
        short = 'n',
        long,
        env = "BULKD_BATCH_THRESHOLD",
        default_value_t = non_zero(DEFAULT_BATCH_THRESHOLD)
    )]
    pub batch_threshold: NonZeroUsize,

    /// Number of worker threads persisting batch artefacts.
    #[arg(long, env = "BULKD_WORKERS", default_value_t = non_zero(DEFAULT_WORKERS))]
    pub workers: NonZeroUsize,

    /// Directory receiving one `bulk-*.log` artefact per batch.
    #[arg(long, env = "BULKD_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: Utf8PathBuf,

    /// Capacity of the sink queues feeding the workers and the console.
    #[arg(
        long,
        env = "BULKD_QUEUE_CAPACITY",
        default_value_t = non_zero(DEFAULT_QUEUE_CAPACITY)
    )]
    pub queue_capacity: NonZeroUsize,

    /// Milliseconds to wait on a full sink queue before dropping a batch.
    #[arg(long, env = "BULKD_ENQUEUE_TIMEOUT_MS", default_value_t = DEFAULT_ENQUEUE_TIMEOUT_MS)]
    pub enqueue_timeout_ms: u64,

    /// Longest accepted command line in bytes; longer lines are discarded.
    #[arg(
        long,
        env = "BULKD_MAX_LINE_BYTES",
        default_value_t = non_zero(DEFAULT_MAX_LINE_BYTES)
    )]
    pub max_line_bytes: NonZeroUsize,

    /// Echo every received chunk back to its client.
    #[arg(long, env = "BULKD_ECHO")]
    pub echo: bool,

    /// Tracing filter expression (for example `info,bulkd::sink=debug`).
    #[arg(long, env = "BULKD_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    /// Log output format: `json` or `compact`.
    #[arg(long, env = "BULKD_LOG_FORMAT", default_value_t = default_log_format())]
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from the process arguments, environment, and
    /// configuration file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads configuration from an explicit argument list. The first item is
    /// treated as the binary name.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut config = Self::from_arg_matches(&matches)?;
        if let Some(path) = config.config_path.clone() {
            let layer = FileLayer::read(&path)?;
            config.apply_file(layer, &matches, &path)?;
        }
        Ok(config)
    }

    /// Fills every setting that only has its built-in default from `layer`.
    ///
    /// A malformed value is an error even when a flag overrides it.
    fn apply_file(
        &mut self,
        layer: FileLayer,
        matches: &ArgMatches,
        path: &Utf8Path,
    ) -> Result<(), ConfigError> {
        let defaulted = |id: &str| {
            matches!(
                matches.value_source(id),
                None | Some(ValueSource::DefaultValue)
            )
        };
        let invalid = |key: &'static str, message: String| ConfigError::InvalidValue {
            path: path.to_path_buf(),
            key,
            message,
        };

        let listen = layer
            .listen
            .as_deref()
            .map(str::parse::<SocketEndpoint>)
            .transpose()
            .map_err(|error| invalid("listen", error.to_string()))?;
        let log_format = layer
            .log_format
            .as_deref()
            .map(str::parse::<LogFormat>)
            .transpose()
            .map_err(|error| invalid("log_format", error.to_string()))?;

        overlay(&mut self.listen, listen, defaulted("listen"));
        overlay(&mut self.batch_threshold, layer.batch_threshold, defaulted("batch_threshold"));
        overlay(&mut self.workers, layer.workers, defaulted("workers"));
        overlay(
            &mut self.output_dir,
            layer.output_dir.map(Utf8PathBuf::from),
            defaulted("output_dir"),
        );
        overlay(&mut self.queue_capacity, layer.queue_capacity, defaulted("queue_capacity"));
        overlay(
            &mut self.enqueue_timeout_ms,
            layer.enqueue_timeout_ms,
            defaulted("enqueue_timeout_ms"),
        );
        overlay(&mut self.max_line_bytes, layer.max_line_bytes, defaulted("max_line_bytes"));
        overlay(&mut self.echo, layer.echo, defaulted("echo"));
        overlay(&mut self.log_filter, layer.log_filter, defaulted("log_filter"));
        overlay(&mut self.log_format, log_format, defaulted("log_format"));
        Ok(())
    }

    /// Configuration file named by `--config-path`, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<&Utf8Path> {
        self.config_path.as_deref()
    }

    /// Endpoint the listener binds.
    #[must_use]
    pub const fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Shared counter threshold.
    #[must_use]
    pub const fn batch_threshold(&self) -> NonZeroUsize {
        self.batch_threshold
    }

    /// Persistence worker count.
    #[must_use]
    pub const fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Artefact directory.
    #[must_use]
    pub fn output_dir(&self) -> &Utf8Path {
        self.output_dir.as_path()
    }

    /// Sink queue capacity.
    #[must_use]
    pub const fn queue_capacity(&self) -> NonZeroUsize {
        self.queue_capacity
    }

    /// How long an enqueue may block on a full queue.
    #[must_use]
    pub const fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Longest accepted command line.
    #[must_use]
    pub const fn max_line_bytes(&self) -> NonZeroUsize {
        self.max_line_bytes
    }

    /// Whether received chunks are echoed back.
    #[must_use]
    pub const fn echo(&self) -> bool {
        self.echo
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

fn overlay<T>(slot: &mut T, from_file: Option<T>, defaulted: bool) {
    if let Some(found) = from_file
        && defaulted
    {
        *slot = found;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: None,
            listen: default_socket_endpoint(),
            batch_threshold: non_zero(DEFAULT_BATCH_THRESHOLD),
            workers: non_zero(DEFAULT_WORKERS),
            output_dir: Utf8PathBuf::from(DEFAULT_OUTPUT_DIR),
            queue_capacity: non_zero(DEFAULT_QUEUE_CAPACITY),
            enqueue_timeout_ms: DEFAULT_ENQUEUE_TIMEOUT_MS,
            max_line_bytes: non_zero(DEFAULT_MAX_LINE_BYTES),
            echo: false,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}
