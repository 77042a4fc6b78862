//! Default values shared by the configuration surface and its tests.

use std::num::NonZeroUsize;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP host the service listens on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port the service listens on.
pub const DEFAULT_TCP_PORT: u16 = 9779;

/// Default listening endpoint in URL form, as accepted by `--listen`.
pub const DEFAULT_LISTEN: &str = "tcp://127.0.0.1:9779";

/// Commands collected by the shared counter before it emits a batch.
pub const DEFAULT_BATCH_THRESHOLD: usize = 3;

/// Persistence worker threads started by the sink.
pub const DEFAULT_WORKERS: usize = 2;

/// Capacity of each sink queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Milliseconds an enqueue waits on a full sink queue before dropping.
pub const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 100;

/// Longest command line accepted from a client, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Directory artefacts are written to.
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default listening endpoint.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_HOST, DEFAULT_TCP_PORT)
}

pub(crate) const fn non_zero(value: usize) -> NonZeroUsize {
    match NonZeroUsize::new(value) {
        Some(value) => value,
        None => NonZeroUsize::MIN,
    }
}
