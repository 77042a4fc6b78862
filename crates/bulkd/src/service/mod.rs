//! Service lifecycle: startup, signal wait, and ordered shutdown.
//!
//! Shutdown runs in dependency order. The listener stops accepting first.
//! The multiplexer then closes, flushing what the shared counter still
//! holds. The sink drains last, so every sealed batch is written before
//! [`run_service`] returns.

mod shutdown;

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use bulk_config::{Config, SocketEndpoint, SocketPreparationError};

use crate::health::HealthReporter;
use crate::multiplexer::{CloseSummary, Multiplexer};
use crate::sink::{Sink, SinkError, SinkReport};
use crate::telemetry::{self, TelemetryError};
use crate::transport::{IngestHandler, ListenerError, ListenerHandle, SocketListener};

pub use self::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// Errors surfaced while running the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[from]
        source: TelemetryError,
    },
    /// The Unix socket directory could not be prepared.
    #[error("failed to prepare listening socket: {source}")]
    Socket {
        /// Underlying filesystem error.
        #[from]
        source: SocketPreparationError,
    },
    /// The sink failed to start or drain.
    #[error("sink failure: {source}")]
    Sink {
        /// Underlying sink error.
        #[from]
        source: SinkError,
    },
    /// The listener failed to bind, start, or stop.
    #[error("listener failure: {source}")]
    Listener {
        /// Underlying listener error.
        #[from]
        source: ListenerError,
    },
    /// Waiting for the shutdown signal failed.
    #[error("shutdown signal failure: {source}")]
    Shutdown {
        /// Underlying signal error.
        #[from]
        source: ShutdownError,
    },
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    /// Endpoint the listener was bound to.
    pub endpoint: SocketEndpoint,
    /// Outcome of closing the multiplexer.
    pub close: CloseSummary,
    /// Final sink counters.
    pub sink: SinkReport,
}

/// Runs the service until `shutdown` fires, then drains every batch.
///
/// The reporter observes each lifecycle step; a failure is reported through
/// [`HealthReporter::service_failed`] before it is returned.
pub fn run_service(
    config: &Config,
    reporter: &dyn HealthReporter,
    shutdown: &dyn ShutdownSignal,
) -> Result<ServiceSummary, ServiceError> {
    reporter.service_starting(config);
    match serve(config, reporter, shutdown) {
        Ok(summary) => {
            reporter.service_stopped(&summary);
            Ok(summary)
        }
        Err(error) => {
            reporter.service_failed(&error);
            Err(error)
        }
    }
}

fn serve(
    config: &Config,
    reporter: &dyn HealthReporter,
    shutdown: &dyn ShutdownSignal,
) -> Result<ServiceSummary, ServiceError> {
    telemetry::initialise(config)?;
    config.listen().ensure_socket_directory()?;

    let sink = Arc::new(Sink::from_config(config)?);
    let mux = Arc::new(Multiplexer::new(config.batch_threshold(), sink.clone()));

    let (listener, endpoint) = match start_listener(config, &mux) {
        Ok(started) => started,
        Err(error) => {
            mux.close();
            if let Err(drain_error) = sink.shutdown() {
                error!(
                    target: SERVICE_TARGET,
                    error = %drain_error,
                    "sink failed to drain after startup failure"
                );
            }
            return Err(error);
        }
    };
    reporter.service_ready(&endpoint);

    let waited = shutdown.wait();
    reporter.service_stopping();
    listener.shutdown();
    let joined = listener.join();
    let close = mux.close();
    let drained = sink.shutdown();

    waited?;
    joined?;
    let sink = drained?;
    info!(target: SERVICE_TARGET, "shutdown sequence completed");
    Ok(ServiceSummary {
        endpoint,
        close,
        sink,
    })
}

fn start_listener(
    config: &Config,
    mux: &Arc<Multiplexer>,
) -> Result<(ListenerHandle, SocketEndpoint), ServiceError> {
    let listener = SocketListener::bind(config.listen())?;
    let endpoint = listener.endpoint().bound_at(listener.local_addr());
    let handler = Arc::new(IngestHandler::from_config(Arc::clone(mux), config));
    let handle = listener.start(handler)?;
    Ok((handle, endpoint))
}
