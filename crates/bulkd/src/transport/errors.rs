//! Errors raised while binding or running the listener.

use std::io;
use std::net::SocketAddr;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Why the listener could not bind, start, or stop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Looking up the configured TCP host failed.
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// The TCP host resolved to nothing.
    #[error("{host}:{port} resolved to no addresses")]
    NoAddresses {
        /// Configured host.
        host: String,
        /// Configured port.
        port: u16,
    },
    /// No resolved address could be bound; this is the last attempt.
    #[error("cannot listen on {addr}: {source}")]
    BindTcp {
        /// Last address tried.
        addr: SocketAddr,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// The bound socket rejected non-blocking mode.
    #[error("cannot configure listening socket: {source}")]
    Configure {
        /// Socket option error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be started.
    #[error("cannot start accept thread: {source}")]
    Spawn {
        /// Thread creation error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets do not exist on this platform.
    #[cfg(not(unix))]
    #[error("{endpoint} needs Unix domain sockets, which this platform lacks")]
    UnsupportedUnix {
        /// Configured endpoint.
        endpoint: String,
    },
    /// Creating the Unix socket failed.
    #[cfg(unix)]
    #[error("cannot listen on unix socket {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: Utf8PathBuf,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// A running process answers on the socket path.
    #[cfg(unix)]
    #[error("unix socket {path} is served by another process")]
    SocketInUse {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// The socket path holds a regular file, directory, or link.
    #[cfg(unix)]
    #[error("{path} exists and is not a socket; refusing to replace it")]
    NotASocket {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// The socket path could not be examined.
    #[cfg(unix)]
    #[error("cannot inspect {path}: {source}")]
    InspectPath {
        /// Socket path.
        path: Utf8PathBuf,
        /// Metadata error.
        #[source]
        source: io::Error,
    },
    /// Checking whether a leftover socket is live failed for an unexpected
    /// reason.
    #[cfg(unix)]
    #[error("cannot tell whether unix socket {path} is live: {source}")]
    ProbeSocket {
        /// Socket path.
        path: Utf8PathBuf,
        /// Connect error.
        #[source]
        source: io::Error,
    },
    /// A leftover socket nobody answers on could not be deleted.
    #[cfg(unix)]
    #[error("cannot remove stale unix socket {path}: {source}")]
    RemoveStale {
        /// Socket path.
        path: Utf8PathBuf,
        /// Unlink error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("accept thread panicked")]
    AcceptThreadPanicked,
}
