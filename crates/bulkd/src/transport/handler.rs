//! Connection handling for the listener.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use bulk_config::Config;

use super::TRANSPORT_TARGET;
use crate::multiplexer::Multiplexer;
use crate::session::Session;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Stream types accepted by the listener.
#[derive(Debug)]
pub enum ConnectionStream {
    /// A TCP client.
    Tcp(TcpStream),
    /// A Unix domain socket client.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Bounds how long a single read may block.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Switches between blocking and non-blocking reads.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_nonblocking(nonblocking),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Handles accepted socket connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}

const READ_CHUNK_BYTES: usize = 4096;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Feeds every connection's bytes into its own [`Session`].
///
/// Reads block for at most the poll interval so a connection notices when
/// the multiplexer stops accepting and disconnects promptly.
#[derive(Debug)]
pub struct IngestHandler {
    mux: Arc<Multiplexer>,
    max_line_bytes: NonZeroUsize,
    echo: bool,
    poll_interval: Duration,
}

impl IngestHandler {
    /// Creates a handler feeding `mux`.
    #[must_use]
    pub const fn new(mux: Arc<Multiplexer>, max_line_bytes: NonZeroUsize) -> Self {
        Self {
            mux,
            max_line_bytes,
            echo: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Creates a handler using the configured line limit and echo setting.
    #[must_use]
    pub const fn from_config(mux: Arc<Multiplexer>, config: &Config) -> Self {
        Self::new(mux, config.max_line_bytes()).with_echo(config.echo())
    }

    /// Writes every received chunk back to the client, after its lines have
    /// been delivered, when enabled.
    #[must_use]
    pub const fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Overrides how often an idle connection checks for shutdown.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn pump(&self, stream: &mut ConnectionStream, session: &mut Session) -> io::Result<()> {
        let mut chunk = [0_u8; READ_CHUNK_BYTES];
        loop {
            let read = match stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if self.mux.is_accepting() {
                        continue;
                    }
                    debug!(
                        target: TRANSPORT_TARGET,
                        connection = %session.id(),
                        "service stopping; closing connection"
                    );
                    return Ok(());
                }
                Err(error) => return Err(error),
            };
            let received = chunk.get(..read).unwrap_or_default();
            session.receive(received);
            if self.echo {
                stream.write_all(received)?;
                stream.flush()?;
            }
            if !self.mux.is_accepting() {
                debug!(
                    target: TRANSPORT_TARGET,
                    connection = %session.id(),
                    "service stopping; dropping busy connection"
                );
                return Ok(());
            }
        }
    }
}

impl ConnectionHandler for IngestHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        let mut session = self.mux.connect(self.max_line_bytes);
        debug!(
            target: TRANSPORT_TARGET,
            connection = %session.id(),
            "connection opened"
        );
        if let Err(error) = stream.set_read_timeout(Some(self.poll_interval)) {
            warn!(
                target: TRANSPORT_TARGET,
                connection = %session.id(),
                %error,
                "failed to set read timeout"
            );
        }
        if let Err(error) = self.pump(&mut stream, &mut session) {
            warn!(
                target: TRANSPORT_TARGET,
                connection = %session.id(),
                %error,
                "connection error"
            );
        }
        let id = session.id();
        session.disconnect();
        debug!(target: TRANSPORT_TARGET, connection = %id, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;
    use std::net::{Shutdown, TcpListener};
    use std::thread;
    use std::time::Instant;

    use rstest::rstest;

    use super::*;
    use crate::tests::support::{RecordingSink, wait_until};

    fn limit(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("non-zero")
    }

    fn serve_one(handler: IngestHandler) -> (std::net::SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let addr = listener.local_addr().expect("listener address");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept connection");
            handler.handle(ConnectionStream::Tcp(stream));
        });
        (addr, server)
    }

    #[rstest]
    fn feeds_lines_and_disconnects_on_eof() {
        let sink = Arc::new(RecordingSink::default());
        let mux = Arc::new(Multiplexer::new(limit(3), sink.clone()));
        let (addr, server) = serve_one(IngestHandler::new(Arc::clone(&mux), limit(1024)));

        let mut client = TcpStream::connect(addr).expect("connect client");
        client.write_all(b"cmd1\ncmd2\ncm").expect("write first chunk");
        client.write_all(b"d3\ncmd4\ncmd5").expect("write second chunk");
        client.shutdown(Shutdown::Write).expect("half close");
        server.join().expect("join server");

        assert_eq!(
            sink.rendered(),
            ["bulk: cmd1, cmd2, cmd3\n", "bulk: cmd4, cmd5\n"]
        );
        assert_eq!(mux.connection_count(), 0);
    }

    #[rstest]
    fn echoes_received_bytes_when_enabled() {
        let sink = Arc::new(RecordingSink::default());
        let mux = Arc::new(Multiplexer::new(limit(3), sink));
        let handler = IngestHandler::new(mux, limit(1024)).with_echo(true);
        let (addr, server) = serve_one(handler);

        let mut client = TcpStream::connect(addr).expect("connect client");
        client.write_all(b"hello\n").expect("write line");
        let mut reader = io::BufReader::new(client.try_clone().expect("clone stream"));
        let mut echoed = String::new();
        reader.read_line(&mut echoed).expect("read echo");
        assert_eq!(echoed, "hello\n");

        client.shutdown(Shutdown::Write).expect("half close");
        server.join().expect("join server");
    }

    #[rstest]
    fn idle_connection_closes_when_multiplexer_stops() {
        let sink = Arc::new(RecordingSink::default());
        let mux = Arc::new(Multiplexer::new(limit(3), sink.clone()));
        let handler = IngestHandler::new(Arc::clone(&mux), limit(1024))
            .with_poll_interval(Duration::from_millis(20));
        let (addr, server) = serve_one(handler);

        let mut client = TcpStream::connect(addr).expect("connect client");
        client.write_all(b"pending\n").expect("write line");
        assert!(wait_until(|| mux.pending_shared() == 1));

        mux.close();
        server.join().expect("handler exits after close");
        assert_eq!(sink.rendered(), ["bulk: pending\n"]);
    }

    #[rstest]
    fn busy_connection_closes_when_multiplexer_stops() {
        let sink = Arc::new(RecordingSink::default());
        let mux = Arc::new(Multiplexer::new(limit(3), sink.clone()));
        // A poll interval this long means only the check after each chunk
        // can end the connection within the test's deadline.
        let handler = IngestHandler::new(Arc::clone(&mux), limit(1024))
            .with_poll_interval(Duration::from_secs(30));
        let (addr, server) = serve_one(handler);

        let mut client = TcpStream::connect(addr).expect("connect client");
        client.write_all(b"early\n").expect("write line");
        assert!(wait_until(|| mux.pending_shared() == 1));
        mux.close();

        let started = Instant::now();
        client.write_all(b"late\n").expect("write after close");
        server.join().expect("handler exits after close");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.rendered(), ["bulk: early\n"]);
    }
}
