//! Structured health reporting for service lifecycle events.

use std::sync::Arc;

use bulk_config::{Config, SocketEndpoint};

use crate::service::{ServiceError, ServiceSummary};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before any resource is acquired.
    fn service_starting(&self, config: &Config);

    /// Invoked once the listener accepts connections on `endpoint`.
    fn service_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked when shutdown begins.
    fn service_stopping(&self);

    /// Invoked after every batch has been drained.
    fn service_stopped(&self, summary: &ServiceSummary);

    /// Invoked when the service cannot start or stop cleanly.
    fn service_failed(&self, error: &ServiceError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn service_starting(&self, config: &Config) {
        (**self).service_starting(config);
    }

    fn service_ready(&self, endpoint: &SocketEndpoint) {
        (**self).service_ready(endpoint);
    }

    fn service_stopping(&self) {
        (**self).service_stopping();
    }

    fn service_stopped(&self, summary: &ServiceSummary) {
        (**self).service_stopped(summary);
    }

    fn service_failed(&self, error: &ServiceError) {
        (**self).service_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn service_starting(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_starting",
            listen = %config.listen(),
            batch_threshold = config.batch_threshold().get(),
            workers = config.workers().get(),
            output_dir = %config.output_dir(),
            config_path = config.config_path().map(tracing::field::display),
            "starting batching service"
        );
    }

    fn service_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_ready",
            endpoint = %endpoint,
            "accepting connections"
        );
    }

    fn service_stopping(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopping",
            "stopping batching service"
        );
    }

    fn service_stopped(&self, summary: &ServiceSummary) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopped",
            flushed = summary.close.flushed,
            open_connections = summary.close.connections,
            discarded_blocks = summary.close.discarded_blocks,
            persisted = summary.sink.persisted,
            failed = summary.sink.failed,
            dropped = summary.sink.dropped,
            "batching service stopped"
        );
    }

    fn service_failed(&self, error: &ServiceError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "service_failed",
            error = %error,
            "batching service failed"
        );
    }
}
