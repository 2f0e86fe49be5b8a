// SPDX-License-Identifier: MIT
//! Error types for telemetry bootstrap, instrument setup and shutdown.

use opentelemetry_otlp::ExporterBuildError;
use tracing_subscriber::util::TryInitError;

/// Result alias used throughout the crate.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Failures surfaced by the telemetry layer.
///
/// Everything except [`TelemetryError::Shutdown`] is a startup failure: the
/// caller is expected to abort instead of serving traffic without telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("telemetry must be initialized inside a Tokio runtime")]
    NoRuntime,

    #[error("telemetry has already been initialized for this process")]
    AlreadyInitialized,

    #[error("failed to build OTLP trace exporter: {0}")]
    TraceExporter(#[source] ExporterBuildError),

    #[error("failed to build OTLP metric exporter: {0}")]
    MetricExporter(#[source] ExporterBuildError),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),

    #[error("instrument `{0}` was already created")]
    DuplicateInstrument(&'static str),

    /// One or more providers failed to flush or close in time. Every
    /// provider was still attempted.
    #[error("telemetry shutdown incomplete: {}", .0.join(", "))]
    Shutdown(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_error_lists_every_failure() {
        let err = TelemetryError::Shutdown(vec![
            "tracer: timed out after 5s".into(),
            "meter: connection refused".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "telemetry shutdown incomplete: tracer: timed out after 5s, meter: connection refused"
        );
    }

    #[test]
    fn duplicate_instrument_names_the_instrument() {
        let err = TelemetryError::DuplicateInstrument("checkout.active");
        assert!(err.to_string().contains("checkout.active"));
    }
}
