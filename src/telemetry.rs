// SPDX-License-Identifier: MIT
//! Telemetry bootstrap: exporters, providers, propagator and log subscriber.
//!
//! [`init_telemetry`] wires the whole pipeline exactly once per process:
//!
//! * OTLP/gRPC span exporter behind a batch processor (512 spans, 5s delay).
//! * OTLP/gRPC metric exporter behind a periodic reader (10s interval).
//! * Composite W3C trace-context + baggage propagator.
//! * A `tracing` subscriber whose spans are bridged into the same tracer.
//!
//! The returned [`TelemetryHandle`] owns the providers and is the only way to
//! shut them down.
//!
//! # Example
//! ```no_run
//! use checkout_telemetry::telemetry::init_telemetry;
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let telemetry = init_telemetry("checkoutservice")?;
//!     let metrics = telemetry.new_metrics()?;
//!     // ... serve traffic ...
//!     telemetry.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! # Failure policy
//! Every construction failure is returned as a [`TelemetryError`] and the
//! caller is expected to abort startup. A failed attempt leaves no global
//! state behind, so the process may retry.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider,
};
use tracing_opentelemetry::OpenTelemetryLayer;
#[cfg(feature = "console-log")]
use tracing_subscriber::fmt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::error::{Result, TelemetryError};
use crate::lifecycle::TelemetryHandle;
use crate::resource::{ResourceDescriptor, DEFAULT_ENVIRONMENT, DEFAULT_NAMESPACE};

/// Collector address used when `OTEL_EXPORTER_OTLP_ENDPOINT` is unset.
pub const DEFAULT_ENDPOINT: &str = "signoz-otel-collector.signoz.svc.cluster.local:4317";
pub const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_METRIC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration used when initializing telemetry.
///
/// [`TelemetryConfig::from_env`] reads:
/// * `OTEL_EXPORTER_OTLP_ENDPOINT` – collector address; a missing scheme
///   means plaintext gRPC (`http://`).
/// * `RUST_ENV` – deployment environment (`deployment.environment`).
///
/// Everything else starts from the `DEFAULT_*` constants and can be
/// overridden field by field before calling [`init_telemetry_with`].
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// OTLP/gRPC collector endpoint, e.g. `http://collector:4317`.
    pub endpoint: String,
    /// Reported as `service.name`.
    pub service_name: String,
    /// Reported as `service.namespace`.
    pub service_namespace: String,
    /// Reported as `service.version`.
    pub service_version: String,
    /// Reported as `deployment.environment`.
    pub environment: String,
    /// Upper bound on spans per export request.
    pub max_export_batch_size: usize,
    /// How long the batch processor waits before exporting a partial batch.
    pub batch_delay: Duration,
    /// Period of the metric reader.
    pub metric_interval: Duration,
    /// Per-request export timeout.
    pub export_timeout: Duration,
    /// Bound applied to each provider's shutdown.
    pub shutdown_timeout: Duration,
}

impl TelemetryConfig {
    pub fn from_env(service_name: impl Into<String>) -> Self {
        Self {
            endpoint: resolve_endpoint(std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()),
            service_name: service_name.into(),
            service_namespace: DEFAULT_NAMESPACE.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("RUST_ENV")
                .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string()),
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            metric_interval: DEFAULT_METRIC_INTERVAL,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn resource_descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor::new(
            self.service_name.clone(),
            self.service_namespace.clone(),
            self.environment.clone(),
            self.service_version.clone(),
        )
    }
}

/// Normalize a configured endpoint, falling back to [`DEFAULT_ENDPOINT`].
fn resolve_endpoint(raw: Option<String>) -> String {
    let endpoint = raw
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    if endpoint.contains("://") {
        endpoint
    } else {
        format!("http://{endpoint}")
    }
}

/// Initialize telemetry for `service_name` using [`TelemetryConfig::from_env`].
pub fn init_telemetry(service_name: &str) -> Result<TelemetryHandle> {
    init_telemetry_with(TelemetryConfig::from_env(service_name))
}

/// Initialize telemetry from an explicit configuration.
///
/// Installs the global tracer provider, meter provider, text-map propagator
/// and `tracing` subscriber. Must run inside a Tokio runtime (the gRPC
/// channel is created there).
///
/// # Errors
/// * [`TelemetryError::EmptyServiceName`] for a blank service name.
/// * [`TelemetryError::NoRuntime`] when called outside a Tokio runtime.
/// * [`TelemetryError::AlreadyInitialized`] if a previous call succeeded.
/// * Exporter or subscriber failures; nothing global is installed then.
pub fn init_telemetry_with(cfg: TelemetryConfig) -> Result<TelemetryHandle> {
    if cfg.service_name.trim().is_empty() {
        return Err(TelemetryError::EmptyServiceName);
    }
    // The tonic channel panics without a reactor; check before taking the guard.
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(TelemetryError::NoRuntime);
    }
    if INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(TelemetryError::AlreadyInitialized);
    }

    let result = install(&cfg);
    if result.is_err() {
        INITIALIZED.store(false, Ordering::Release);
    }
    result
}

fn install(cfg: &TelemetryConfig) -> Result<TelemetryHandle> {
    let resource = cfg.resource_descriptor().to_resource();

    // Plaintext gRPC: no TLS config is attached to the channel.
    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(cfg.endpoint.clone())
        .with_timeout(cfg.export_timeout)
        .build()
        .map_err(TelemetryError::TraceExporter)?;
    let metric_exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(cfg.endpoint.clone())
        .with_timeout(cfg.export_timeout)
        .build()
        .map_err(TelemetryError::MetricExporter)?;

    let batch_config = BatchConfigBuilder::default()
        .with_max_export_batch_size(cfg.max_export_batch_size)
        .with_scheduled_delay(cfg.batch_delay)
        .build();
    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            BatchSpanProcessor::builder(span_exporter)
                .with_batch_config(batch_config)
                .build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource.clone())
        .build();

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(
            PeriodicReader::builder(metric_exporter)
                .with_interval(cfg.metric_interval)
                .build(),
        )
        .with_resource(resource)
        .build();

    let handle = TelemetryHandle::from_providers(
        tracer_provider.clone(),
        meter_provider.clone(),
        cfg.shutdown_timeout,
    );

    // Last fallible step; on failure `handle` drops and shuts the providers down.
    install_subscriber(handle.tracer().sdk_tracer().clone())?;

    global::set_tracer_provider(tracer_provider);
    global::set_meter_provider(meter_provider);
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    tracing::info!(
        service_name = %cfg.service_name,
        endpoint = %cfg.endpoint,
        "OpenTelemetry initialized"
    );
    Ok(handle)
}

fn install_subscriber(tracer: SdkTracer) -> Result<()> {
    let otel_trace_layer = OpenTelemetryLayer::new(tracer);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "console-log")]
    Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .with(otel_trace_layer)
        .try_init()?;

    #[cfg(not(feature = "console-log"))]
    Registry::default()
        .with(filter)
        .with(otel_trace_layer)
        .try_init()?;

    Ok(())
}
