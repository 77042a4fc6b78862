//! Accept loop for the service's listening socket.
//!
//! Accepts are non-blocking so the loop notices a stop request between polls.
//! Every client runs on its own thread, and the loop counts those threads in
//! and out so shutdown can report how many were still open.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use bulk_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, ListenerError, TRANSPORT_TARGET};

#[cfg(unix)]
use camino::{Utf8Path, Utf8PathBuf};
#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::net::UnixListener;

const IDLE_POLL: Duration = Duration::from_millis(25);
const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// Listener bound to a socket endpoint but not yet accepting.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
}

impl SocketListener {
    /// Binds `endpoint`.
    ///
    /// A Unix socket file left behind by a previous run is replaced, but only
    /// when nothing answers on it. The file is removed again once the
    /// listener is dropped.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => BoundSocket::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => bind_unix(path)?,
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
        })
    }

    /// Endpoint as configured.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Bound TCP address; resolves port `0` to the port actually assigned.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr()
    }

    /// Starts accepting on a background thread. Each client is handed to
    /// `handler` on a thread of its own.
    pub fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.socket
            .set_nonblocking()
            .map_err(|source| ListenerError::Configure { source })?;
        let stop = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicUsize::new(0));
        let accept_loop = AcceptLoop {
            endpoint: self.endpoint,
            socket: self.socket,
            stop: Arc::clone(&stop),
            open: Arc::clone(&open),
            handler,
        };
        let thread = thread::Builder::new()
            .name("bulkd-accept".to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            stop,
            open,
            thread: Some(thread),
        })
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub struct ListenerHandle {
    stop: Arc<AtomicBool>,
    open: Arc<AtomicUsize>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop. Connections already accepted keep
    /// running until their clients leave or the multiplexer closes.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Connection threads that have not finished yet.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Waits for the accept loop to exit. The listening socket is closed,
    /// and a Unix socket file removed, by the time this returns.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ListenerError::AcceptThreadPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        // Declared before the file so the socket closes before it is unlinked.
        listener: UnixListener,
        _file: SocketFile,
    },
}

impl BoundSocket {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix { listener, .. } => listener.set_nonblocking(true),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }

    /// Takes the next waiting client, if any, as a blocking stream.
    fn poll(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix { listener, .. } => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => {
                stream.set_nonblocking(false)?;
                Ok(Some(stream))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

struct AcceptLoop {
    endpoint: SocketEndpoint,
    socket: BoundSocket,
    stop: Arc<AtomicBool>,
    open: Arc<AtomicUsize>,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: TRANSPORT_TARGET,
            endpoint = %self.endpoint,
            "accepting connections"
        );
        let mut accepted: u64 = 0;
        let mut failures: u32 = 0;
        while !self.stop.load(Ordering::Acquire) {
            match self.socket.poll() {
                Ok(Some(stream)) => {
                    failures = 0;
                    accepted += 1;
                    self.dispatch(stream, accepted);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    failures = failures.saturating_add(1);
                    if failures == 1 {
                        warn!(target: TRANSPORT_TARGET, %error, "accept failed");
                    } else {
                        debug!(target: TRANSPORT_TARGET, %error, failures, "accept still failing");
                    }
                    thread::sleep(failure_backoff(failures));
                }
            }
        }
        info!(
            target: TRANSPORT_TARGET,
            endpoint = %self.endpoint,
            accepted,
            open = self.open.load(Ordering::Acquire),
            "stopped accepting connections"
        );
    }

    fn dispatch(&self, stream: ConnectionStream, number: u64) {
        let handler = Arc::clone(&self.handler);
        let open = OpenConnection::enter(&self.open);
        debug!(target: TRANSPORT_TARGET, number, "accepted connection");
        let spawned = thread::Builder::new()
            .name(format!("bulkd-conn-{number}"))
            .spawn(move || {
                let _open = open;
                handler.handle(stream);
            });
        if let Err(error) = spawned {
            warn!(
                target: TRANSPORT_TARGET,
                %error,
                number,
                "failed to spawn connection thread; client dropped"
            );
        }
    }
}

/// Doubles the pause after each consecutive accept failure, up to a cap.
fn failure_backoff(failures: u32) -> Duration {
    IDLE_POLL
        .saturating_mul(1_u32 << failures.min(6))
        .min(MAX_FAILURE_BACKOFF)
}

/// Counts a connection thread as open until dropped.
struct OpenConnection(Arc<AtomicUsize>);

impl OpenConnection {
    fn enter(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(open))
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let mut last_failure = None;
    for addr in candidates {
        match TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(source) => last_failure = Some(ListenerError::BindTcp { addr, source }),
        }
    }
    Err(last_failure.unwrap_or_else(|| ListenerError::NoAddresses {
        host: host.to_owned(),
        port,
    }))
}

#[cfg(unix)]
fn bind_unix(path: &Utf8Path) -> Result<BoundSocket, ListenerError> {
    claim_socket_path(path)?;
    let listener = UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BoundSocket::Unix {
        listener,
        _file: SocketFile(path.to_path_buf()),
    })
}

/// Frees `path` for binding.
///
/// Only a socket nobody answers on is removed; a live socket or any other
/// kind of file is left in place and reported.
#[cfg(unix)]
fn claim_socket_path(path: &Utf8Path) -> Result<(), ListenerError> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;

    match fs::symlink_metadata(path) {
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ListenerError::InspectPath {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(metadata) if !metadata.file_type().is_socket() => {
            return Err(ListenerError::NotASocket {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
    }

    match UnixStream::connect(path) {
        Ok(_) => Err(ListenerError::SocketInUse {
            path: path.to_path_buf(),
        }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            fs::remove_file(path).map_err(|source| ListenerError::RemoveStale {
                path: path.to_path_buf(),
                source,
            })?;
            info!(target: TRANSPORT_TARGET, %path, "replaced stale socket file");
            Ok(())
        }
        Err(source) => Err(ListenerError::ProbeSocket {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Unlinks the socket file it names when dropped.
#[cfg(unix)]
#[derive(Debug)]
struct SocketFile(Utf8PathBuf);

#[cfg(unix)]
impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.0)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: TRANSPORT_TARGET,
                %error,
                path = %self.0,
                "failed to remove socket file"
            );
        }
    }
}
