// SPDX-License-Identifier: MIT
//! Ownership and shutdown of the trace and metric providers.
//!
//! [`TelemetryHandle`] is the only thing allowed to shut the providers down.
//! Shutdown is idempotent: the first call flushes and closes both providers,
//! later calls (a signal handler racing normal exit, or the final drop) do
//! nothing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::error::{Result, TelemetryError};
use crate::metrics::{CheckoutMetrics, InstrumentRegistry};
use crate::spans::CheckoutTracer;

/// Instrumentation scope for every tracer and meter this crate creates.
pub const INSTRUMENTATION_SCOPE: &str = "checkoutservice";

/// Handle to the installed providers.
///
/// Cheap to clone; clones share the same providers and the same shutdown
/// state, so one clone can live in a signal handler while another is used on
/// the normal exit path. If no clone ever calls [`TelemetryHandle::shutdown`],
/// the providers are shut down when the last clone is dropped.
#[derive(Clone)]
pub struct TelemetryHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("shutdown_timeout", &self.inner.shutdown_timeout)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

struct Inner {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    tracer: CheckoutTracer,
    instruments: InstrumentRegistry,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
}

impl TelemetryHandle {
    /// Wrap already-built providers without touching any process-wide state.
    ///
    /// [`crate::telemetry::init_telemetry`] uses this after installing the
    /// globals; tests use it directly with in-memory exporters.
    pub fn from_providers(
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
        shutdown_timeout: Duration,
    ) -> Self {
        let tracer = CheckoutTracer::new(tracer_provider.tracer(INSTRUMENTATION_SCOPE));
        let instruments = InstrumentRegistry::new(meter_provider.meter(INSTRUMENTATION_SCOPE));
        Self {
            inner: Arc::new(Inner {
                tracer_provider,
                meter_provider,
                tracer,
                instruments,
                shutdown_timeout,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Tracer used by the span helpers.
    pub fn tracer(&self) -> &CheckoutTracer {
        &self.inner.tracer
    }

    /// Create the checkout instruments. Only the first call succeeds; a
    /// second call reports [`TelemetryError::DuplicateInstrument`].
    pub fn new_metrics(&self) -> Result<CheckoutMetrics> {
        CheckoutMetrics::new(&self.inner.instruments)
    }

    /// Whether shutdown has already started.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Flush and close both providers, each bounded by the shutdown timeout.
    ///
    /// Both providers are always attempted. Failures are logged and returned
    /// together as [`TelemetryError::Shutdown`]; the caller can ignore them
    /// and carry on with its own exit. Calls after the first return `Ok(())`
    /// immediately.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}

impl Inner {
    fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("telemetry shutdown already performed");
            return Ok(());
        }

        let timeout = self.shutdown_timeout;
        let deadline = Instant::now() + timeout;

        let tracer_provider = self.tracer_provider.clone();
        let tracer =
            spawn_shutdown("tracer", move || tracer_provider.shutdown_with_timeout(timeout));
        let meter_provider = self.meter_provider.clone();
        let meter = spawn_shutdown("meter", move || meter_provider.shutdown());

        let errs: Vec<String> = [("tracer", tracer), ("meter", meter)]
            .into_iter()
            .filter_map(|(label, rx)| await_shutdown(label, &rx, deadline, timeout).err())
            .collect();

        if errs.is_empty() {
            tracing::info!("telemetry shut down");
            Ok(())
        } else {
            for err in &errs {
                tracing::warn!(error = %err, "telemetry provider did not shut down cleanly");
            }
            Err(TelemetryError::Shutdown(errs))
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Failures were already logged.
        let _ = self.shutdown();
    }
}

/// Run a provider shutdown on its own thread so a stuck flush cannot hold
/// the caller past its deadline.
fn spawn_shutdown<F, E>(label: &'static str, shutdown: F) -> mpsc::Receiver<Result<(), String>>
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: fmt::Display,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("{label}-shutdown"))
        .spawn(move || {
            let _ = tx.send(shutdown().map_err(|e| e.to_string()));
        });
    if let Err(e) = spawned {
        tracing::warn!(provider = label, error = %e, "could not spawn shutdown thread");
    }
    rx
}

fn await_shutdown(
    label: &str,
    rx: &mpsc::Receiver<Result<(), String>>,
    deadline: Instant,
    timeout: Duration,
) -> Result<(), String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{label}: {e}")),
        Err(RecvTimeoutError::Timeout) => Err(format!("{label}: timed out after {timeout:?}")),
        Err(RecvTimeoutError::Disconnected) => {
            Err(format!("{label}: shutdown did not report a result"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn in_memory_handle(timeout: Duration) -> TelemetryHandle {
        let tracer_provider = SdkTracerProvider::builder()
            .with_simple_exporter(InMemorySpanExporter::default())
            .build();
        let meter_provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(InMemoryMetricExporter::default()).build())
            .build();
        TelemetryHandle::from_providers(tracer_provider, meter_provider, timeout)
    }

    #[test]
    fn shutdown_is_idempotent() {
        let handle = in_memory_handle(Duration::from_secs(5));
        assert!(!handle.is_shut_down());

        handle.shutdown().expect("first shutdown");
        assert!(handle.is_shut_down());
        handle.shutdown().expect("second shutdown is a no-op");
    }

    #[test]
    fn clones_share_shutdown_state() {
        let handle = in_memory_handle(Duration::from_secs(5));
        let from_signal = handle.clone();

        from_signal.shutdown().expect("signal-path shutdown");
        assert!(handle.is_shut_down());
        handle.shutdown().expect("exit-path shutdown is a no-op");
    }

    #[test]
    fn debug_output_reports_shutdown_state() {
        let handle = in_memory_handle(Duration::from_millis(250));
        assert!(format!("{handle:?}").contains("shut_down: false"));
        handle.shutdown().expect("shutdown");
        assert!(format!("{handle:?}").contains("shut_down: true"));
    }

    #[test]
    fn tracer_shutdown_honors_a_short_timeout() {
        let handle = in_memory_handle(Duration::from_millis(50));
        let started = Instant::now();
        handle.shutdown().expect("shutdown");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn dropping_after_shutdown_does_not_panic() {
        let handle = in_memory_handle(Duration::from_secs(5));
        handle.shutdown().expect("shutdown");
        drop(handle);
    }

    #[test]
    fn stuck_shutdown_is_abandoned_at_the_deadline() {
        let timeout = Duration::from_millis(50);
        let started = Instant::now();

        let rx = spawn_shutdown("tracer", || {
            thread::sleep(Duration::from_secs(2));
            Ok::<(), String>(())
        });
        let err = await_shutdown("tracer", &rx, started + timeout, timeout).unwrap_err();

        assert!(err.starts_with("tracer: timed out"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn one_failure_does_not_hide_the_other_result() {
        let timeout = Duration::from_secs(1);
        let deadline = Instant::now() + timeout;

        let tracer = spawn_shutdown("tracer", || Err::<(), _>("export failed"));
        let meter = spawn_shutdown("meter", || Ok::<(), String>(()));

        assert_eq!(
            await_shutdown("tracer", &tracer, deadline, timeout),
            Err("tracer: export failed".to_string())
        );
        assert_eq!(await_shutdown("meter", &meter, deadline, timeout), Ok(()));
    }
}
