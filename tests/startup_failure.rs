// SPDX-License-Identifier: MIT
//! A failed bootstrap reports a distinct error and leaves nothing installed,
//! so a later attempt in the same process can still succeed.

use std::time::Duration;

use checkout_telemetry::telemetry::{init_telemetry_with, TelemetryConfig};
use checkout_telemetry::TelemetryError;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exporter_failure_is_reported_and_init_can_be_retried() {
    let mut cfg = TelemetryConfig::from_env("checkoutservice");
    cfg.shutdown_timeout = Duration::from_secs(1);

    cfg.endpoint = "http://[::bad".to_string();
    let err = init_telemetry_with(cfg.clone())
        .err()
        .expect("invalid endpoint rejected");
    assert!(matches!(err, TelemetryError::TraceExporter(_)), "{err}");
    assert!(err.to_string().starts_with("failed to build OTLP trace exporter"));

    cfg.endpoint = "http://127.0.0.1:4317".to_string();
    let handle = init_telemetry_with(cfg).expect("retry after failed init");
    assert!(!handle.is_shut_down());

    let _ = tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .expect("shutdown task");
}
