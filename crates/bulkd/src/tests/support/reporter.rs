//! Health reporter that records lifecycle events.

use std::sync::Mutex;

use bulk_config::{Config, SocketEndpoint};

use crate::health::HealthReporter;
use crate::service::{ServiceError, ServiceSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    Starting,
    Ready(SocketEndpoint),
    Stopping,
    Stopped(ServiceSummary),
    Failed(String),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub(crate) fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("reporter mutex poisoned").clone()
    }

    /// Endpoint reported as ready, once the listener is up.
    pub(crate) fn ready_endpoint(&self) -> Option<SocketEndpoint> {
        self.events().into_iter().find_map(|event| match event {
            HealthEvent::Ready(endpoint) => Some(endpoint),
            _ => None,
        })
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn service_starting(&self, _config: &Config) {
        self.record(HealthEvent::Starting);
    }

    fn service_ready(&self, endpoint: &SocketEndpoint) {
        self.record(HealthEvent::Ready(endpoint.clone()));
    }

    fn service_stopping(&self) {
        self.record(HealthEvent::Stopping);
    }

    fn service_stopped(&self, summary: &ServiceSummary) {
        self.record(HealthEvent::Stopped(summary.clone()));
    }

    fn service_failed(&self, error: &ServiceError) {
        self.record(HealthEvent::Failed(error.to_string()));
    }
}
