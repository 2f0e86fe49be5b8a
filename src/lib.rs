// SPDX-License-Identifier: MIT
//! Telemetry bootstrap and instrumentation helpers for the checkout service.
//!
//! The crate wires OpenTelemetry traces and metrics to an OTLP/gRPC
//! collector and gives business code a small, fixed vocabulary to record
//! checkouts with:
//! * [`telemetry`] – one-time bootstrap ([`telemetry::init_telemetry`]).
//! * [`lifecycle`] – [`TelemetryHandle`], owner of the providers and their
//!   bounded, idempotent shutdown.
//! * [`metrics`] – [`CheckoutMetrics`], the checkout counters and histograms.
//! * [`spans`] – [`CheckoutTracer`] span helpers and the [`CheckoutSpan`] guard.
//! * [`money`] – exact order totals from unit + nano prices.
//!
//! # Feature Flags
//! * `console-log` (default) – compact console formatter for operational logs.
//!
//! # Quick Start
//! ```no_run
//! use checkout_telemetry::telemetry::init_telemetry;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let telemetry = init_telemetry("checkoutservice")?;
//! let metrics = telemetry.new_metrics()?;
//!
//! let cx = opentelemetry::Context::new();
//! let (_cx, mut span) = telemetry.tracer().start_order_validation(&cx, "user-1", 3);
//! span.record_success("Order validated");
//! span.end();
//! metrics.record_order(49.99, "credit_card", 3, 120.5);
//!
//! telemetry.shutdown()?;
//! # Ok(())
//! # }
//! ```
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod money;
pub mod resource;
pub mod spans;
pub mod telemetry;

pub use error::{Result, TelemetryError};
pub use lifecycle::TelemetryHandle;
pub use metrics::{ActiveCheckout, CheckoutMetrics};
pub use spans::{CheckoutSpan, CheckoutTracer, SpanOutcome};
