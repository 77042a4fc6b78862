//! Listening endpoints accepted by the ingestion service.
//!
//! Endpoints are written as URLs: `tcp://host[:port]` or `unix:///path`. A
//! bare port number such as `9779` is shorthand for that port on the default
//! host, and a TCP URL without a port listens on [`DEFAULT_TCP_PORT`].

use std::fmt;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use url::Url;

use crate::defaults::{DEFAULT_HOST, DEFAULT_TCP_PORT};

/// Socket the service listens on for command streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEndpoint {
    /// Unix domain socket endpoint.
    Unix {
        /// Filesystem location of the socket.
        path: Utf8PathBuf,
    },
    /// TCP socket endpoint.
    Tcp {
        /// Host name or address to bind.
        host: String,
        /// Port to bind; `0` asks the OS for an ephemeral port.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Builds a Unix domain socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Builds a TCP socket endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Returns the Unix socket path when the endpoint uses the Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// The endpoint clients should dial once the listener is bound.
    ///
    /// A TCP endpoint takes the address the OS actually assigned, which turns
    /// port `0` into a reachable port. Unix endpoints are returned unchanged.
    #[must_use]
    pub fn bound_at(&self, local: Option<SocketAddr>) -> Self {
        match (self, local) {
            (Self::Tcp { .. }, Some(addr)) => Self::tcp(addr.ip().to_string(), addr.port()),
            (endpoint, _) => endpoint.clone(),
        }
    }

    /// Makes sure the directory holding a Unix socket exists.
    ///
    /// Missing directories are created owner-only. An existing directory is
    /// left as it is; TCP endpoints and bare socket file names need nothing.
    pub fn ensure_socket_directory(&self) -> Result<(), SocketPreparationError> {
        let Some(directory) = self.socket_directory() else {
            return Ok(());
        };
        match fs::metadata(directory) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(SocketPreparationError::NotADirectory {
                path: directory.to_path_buf(),
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                create_private_directory(directory)
            }
            Err(source) => Err(SocketPreparationError::Inspect {
                path: directory.to_path_buf(),
                source,
            }),
        }
    }

    fn socket_directory(&self) -> Option<&Utf8Path> {
        self.unix_path()?
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
    }
}

fn create_private_directory(directory: &Utf8Path) -> Result<(), SocketPreparationError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
    builder
        .create(directory)
        .map_err(|source| SocketPreparationError::CreateDirectory {
            path: directory.to_path_buf(),
            source,
        })
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Ok(port) = input.parse::<u16>() {
            return Ok(Self::tcp(DEFAULT_HOST, port));
        }
        let url = Url::parse(input).map_err(|source| SocketParseError::Url {
            input: input.to_owned(),
            source,
        })?;
        match url.scheme() {
            "tcp" => parse_tcp(input, &url),
            "unix" => parse_unix(input, &url),
            scheme => Err(SocketParseError::UnsupportedScheme {
                input: input.to_owned(),
                scheme: scheme.to_owned(),
            }),
        }
    }
}

fn parse_tcp(input: &str, url: &Url) -> Result<SocketEndpoint, SocketParseError> {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SocketParseError::MissingHost {
            input: input.to_owned(),
        })?;
    // IPv6 literals keep their brackets in `host_str`; bind wants them bare.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    Ok(SocketEndpoint::tcp(bare, url.port().unwrap_or(DEFAULT_TCP_PORT)))
}

fn parse_unix(input: &str, url: &Url) -> Result<SocketEndpoint, SocketParseError> {
    let path = url.path();
    if path.is_empty() || path == "/" {
        return Err(SocketParseError::MissingUnixPath {
            input: input.to_owned(),
        });
    }
    if path.ends_with('/') {
        return Err(SocketParseError::DirectoryPath {
            input: input.to_owned(),
        });
    }
    Ok(SocketEndpoint::unix(path))
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// The text is neither a port number nor a URL.
    #[error("'{input}' is not a port or an endpoint URL: {source}")]
    Url {
        /// Text as supplied.
        input: String,
        /// Underlying URL parse error.
        #[source]
        source: url::ParseError,
    },
    /// Only `tcp` and `unix` are understood.
    #[error("unsupported scheme '{scheme}' in '{input}'")]
    UnsupportedScheme {
        /// Text as supplied.
        input: String,
        /// Scheme found in the URL.
        scheme: String,
    },
    /// A TCP URL named no host.
    #[error("missing TCP host in '{input}'")]
    MissingHost {
        /// Text as supplied.
        input: String,
    },
    /// A Unix URL named no socket file.
    #[error("missing Unix socket path in '{input}'")]
    MissingUnixPath {
        /// Text as supplied.
        input: String,
    },
    /// A Unix URL named a directory rather than a socket file.
    #[error("Unix socket path in '{input}' ends with a separator")]
    DirectoryPath {
        /// Text as supplied.
        input: String,
    },
}

/// Errors raised while preparing the directory of a Unix socket.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// Something other than a directory occupies the socket's parent path.
    #[error("socket directory '{path}' exists but is not a directory")]
    NotADirectory {
        /// Parent path of the socket.
        path: Utf8PathBuf,
    },
    /// The socket's parent path could not be inspected.
    #[error("failed to inspect socket directory '{path}': {source}")]
    Inspect {
        /// Parent path of the socket.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The socket's parent directory could not be created.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
