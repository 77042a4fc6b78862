//! Termination signal handling.

use std::io;
use std::sync::{Mutex, PoisonError};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::SERVICE_TARGET;

const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT, or SIGHUP.
///
/// Handlers are registered on construction, so a signal delivered while the
/// service is still starting is not lost.
pub struct SystemShutdownSignal {
    signals: Mutex<Signals>,
}

impl SystemShutdownSignal {
    /// Registers the termination signal handlers.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals =
            Signals::new(TERMINATION_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        Ok(Self {
            signals: Mutex::new(signals),
        })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(signal) = signals.forever().next() {
            info!(target: SERVICE_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SystemShutdownSignal")
            .field("signals", &TERMINATION_SIGNALS)
            .finish()
    }
}
