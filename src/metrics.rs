// SPDX-License-Identifier: MIT
//! Checkout instruments and the methods business code records through.
//!
//! | Instrument | Kind | Unit |
//! |---|---|---|
//! | `checkout.orders.total` | counter | `{orders}` |
//! | `checkout.order.value` | histogram | `USD` |
//! | `checkout.payment_method.total` | counter | `{orders}` |
//! | `checkout.processing.duration` | histogram | `ms` |
//! | `checkout.cart.items` | histogram | `{items}` |
//! | `checkout.active` | up-down counter | `{sessions}` |
//!
//! Recording never fails the caller: the SDK instruments have no error path,
//! and problems inside the pipeline surface through the SDK's own logging.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;

use crate::error::{Result, TelemetryError};

pub const ORDERS_TOTAL: &str = "checkout.orders.total";
pub const ORDER_VALUE: &str = "checkout.order.value";
pub const PAYMENT_METHOD_TOTAL: &str = "checkout.payment_method.total";
pub const PROCESSING_DURATION: &str = "checkout.processing.duration";
pub const CART_ITEMS: &str = "checkout.cart.items";
pub const ACTIVE_CHECKOUTS: &str = "checkout.active";

/// Creates instruments on one meter, refusing to create a name twice.
///
/// The SDK silently hands back the existing instrument for a repeated name;
/// a repeat here means the facade was set up twice, which is a startup bug.
pub struct InstrumentRegistry {
    meter: Meter,
    claimed: Mutex<HashSet<&'static str>>,
}

impl InstrumentRegistry {
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, name: &'static str) -> Result<()> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(name) {
            return Err(TelemetryError::DuplicateInstrument(name));
        }
        tracing::debug!(instrument = name, "instrument created");
        Ok(())
    }

    pub fn u64_counter(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Result<Counter<u64>> {
        self.claim(name)?;
        Ok(self
            .meter
            .u64_counter(name)
            .with_description(description)
            .with_unit(unit)
            .build())
    }

    pub fn f64_histogram(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Result<Histogram<f64>> {
        self.claim(name)?;
        Ok(self
            .meter
            .f64_histogram(name)
            .with_description(description)
            .with_unit(unit)
            .build())
    }

    pub fn u64_histogram(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Result<Histogram<u64>> {
        self.claim(name)?;
        Ok(self
            .meter
            .u64_histogram(name)
            .with_description(description)
            .with_unit(unit)
            .build())
    }

    pub fn i64_up_down_counter(
        &self,
        name: &'static str,
        description: &'static str,
        unit: &'static str,
    ) -> Result<UpDownCounter<i64>> {
        self.claim(name)?;
        Ok(self
            .meter
            .i64_up_down_counter(name)
            .with_description(description)
            .with_unit(unit)
            .build())
    }
}

/// The checkout instruments. Clones share the underlying instruments.
#[derive(Clone)]
pub struct CheckoutMetrics {
    orders_total: Counter<u64>,
    order_value: Histogram<f64>,
    payment_method_total: Counter<u64>,
    processing_duration: Histogram<f64>,
    cart_items: Histogram<u64>,
    active_checkouts: UpDownCounter<i64>,
}

impl CheckoutMetrics {
    /// Create every checkout instrument on `registry`.
    ///
    /// # Errors
    /// [`TelemetryError::DuplicateInstrument`] if any of them already exists.
    pub fn new(registry: &InstrumentRegistry) -> Result<Self> {
        let metrics = Self {
            orders_total: registry.u64_counter(
                ORDERS_TOTAL,
                "Total number of orders processed",
                "{orders}",
            )?,
            order_value: registry.f64_histogram(
                ORDER_VALUE,
                "Distribution of order values",
                "USD",
            )?,
            payment_method_total: registry.u64_counter(
                PAYMENT_METHOD_TOTAL,
                "Count of orders by payment method",
                "{orders}",
            )?,
            processing_duration: registry.f64_histogram(
                PROCESSING_DURATION,
                "Duration of order processing",
                "ms",
            )?,
            cart_items: registry.u64_histogram(
                CART_ITEMS,
                "Number of items in cart per order",
                "{items}",
            )?,
            active_checkouts: registry.i64_up_down_counter(
                ACTIVE_CHECKOUTS,
                "Number of active checkout sessions",
                "{sessions}",
            )?,
        };
        tracing::info!("checkout metrics initialized");
        Ok(metrics)
    }

    /// Record a completed order.
    pub fn record_order(
        &self,
        order_value: f64,
        payment_method: &str,
        item_count: u64,
        duration_ms: f64,
    ) {
        self.orders_total
            .add(1, &[KeyValue::new("status", "success")]);
        self.order_value
            .record(order_value, &[KeyValue::new("currency", "USD")]);
        self.payment_method_total
            .add(1, &[KeyValue::new("method", payment_method.to_string())]);
        self.processing_duration
            .record(duration_ms, &[KeyValue::new("status", "success")]);
        self.cart_items.record(item_count, &[]);

        tracing::debug!(
            order_value,
            payment_method,
            item_count,
            duration_ms,
            "recorded order metrics"
        );
    }

    /// Record an order that did not complete.
    pub fn record_order_failure(&self, reason: &str, duration_ms: f64) {
        self.orders_total.add(
            1,
            &[
                KeyValue::new("status", "failed"),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
        self.processing_duration
            .record(duration_ms, &[KeyValue::new("status", "failed")]);
    }

    pub fn increment_active_checkouts(&self) {
        self.active_checkouts.add(1, &[]);
    }

    pub fn decrement_active_checkouts(&self) {
        self.active_checkouts.add(-1, &[]);
    }

    /// Count one in-flight checkout until the returned guard is dropped.
    pub fn track_active_checkout(&self) -> ActiveCheckout {
        self.increment_active_checkouts();
        ActiveCheckout {
            metrics: self.clone(),
        }
    }
}

/// Decrements `checkout.active` when dropped, on every exit path.
#[must_use = "dropping the guard immediately ends the active checkout"]
pub struct ActiveCheckout {
    metrics: CheckoutMetrics,
}

impl Drop for ActiveCheckout {
    fn drop(&mut self) {
        self.metrics.decrement_active_checkouts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
    use std::thread;

    /// One exported data point, flattened for assertions.
    #[derive(Debug, Clone, PartialEq)]
    enum Point {
        Sum(f64),
        Histogram { count: u64, sum: f64 },
    }

    struct Harness {
        provider: SdkMeterProvider,
        exporter: InMemoryMetricExporter,
        metrics: CheckoutMetrics,
    }

    impl Harness {
        fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let provider = SdkMeterProvider::builder()
                .with_reader(PeriodicReader::builder(exporter.clone()).build())
                .build();
            let registry = InstrumentRegistry::new(provider.meter("checkout-test"));
            let metrics = CheckoutMetrics::new(&registry).expect("instruments");
            Self {
                provider,
                exporter,
                metrics,
            }
        }

        /// Data points of `name` as (sorted attributes, point).
        fn points(&self, name: &str) -> Vec<(Vec<(String, String)>, Point)> {
            self.provider.force_flush().expect("flush");
            let exported = self.exporter.get_finished_metrics().expect("metrics");
            let Some(resource_metrics) = exported.last() else {
                return Vec::new();
            };

            let mut out = Vec::new();
            for scope in resource_metrics.scope_metrics() {
                for metric in scope.metrics().filter(|m| m.name() == name) {
                    match metric.data() {
                        AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                            for dp in sum.data_points() {
                                out.push((attrs(dp.attributes()), Point::Sum(dp.value() as f64)));
                            }
                        }
                        AggregatedMetrics::I64(MetricData::Sum(sum)) => {
                            for dp in sum.data_points() {
                                out.push((attrs(dp.attributes()), Point::Sum(dp.value() as f64)));
                            }
                        }
                        AggregatedMetrics::F64(MetricData::Histogram(hist)) => {
                            for dp in hist.data_points() {
                                out.push((
                                    attrs(dp.attributes()),
                                    Point::Histogram {
                                        count: dp.count(),
                                        sum: dp.sum(),
                                    },
                                ));
                            }
                        }
                        AggregatedMetrics::U64(MetricData::Histogram(hist)) => {
                            for dp in hist.data_points() {
                                out.push((
                                    attrs(dp.attributes()),
                                    Point::Histogram {
                                        count: dp.count(),
                                        sum: dp.sum() as f64,
                                    },
                                ));
                            }
                        }
                        _ => panic!("unexpected aggregation for {name}"),
                    }
                }
            }
            out.sort_by(|a, b| a.0.cmp(&b.0));
            out
        }
    }

    fn attrs<'a>(kvs: impl Iterator<Item = &'a KeyValue>) -> Vec<(String, String)> {
        let mut v: Vec<_> = kvs
            .map(|kv| (kv.key.as_str().to_string(), kv.value.to_string()))
            .collect();
        v.sort();
        v
    }

    fn tags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn record_order_emits_all_five_observations() {
        let h = Harness::new();
        h.metrics.record_order(49.99, "credit_card", 3, 120.5);

        assert_eq!(
            h.points(ORDERS_TOTAL),
            vec![(tags(&[("status", "success")]), Point::Sum(1.0))]
        );
        assert_eq!(
            h.points(ORDER_VALUE),
            vec![(
                tags(&[("currency", "USD")]),
                Point::Histogram { count: 1, sum: 49.99 }
            )]
        );
        assert_eq!(
            h.points(PAYMENT_METHOD_TOTAL),
            vec![(tags(&[("method", "credit_card")]), Point::Sum(1.0))]
        );
        assert_eq!(
            h.points(PROCESSING_DURATION),
            vec![(
                tags(&[("status", "success")]),
                Point::Histogram { count: 1, sum: 120.5 }
            )]
        );
        assert_eq!(
            h.points(CART_ITEMS),
            vec![(Vec::new(), Point::Histogram { count: 1, sum: 3.0 })]
        );
    }

    #[test]
    fn failure_is_tagged_and_records_no_success() {
        let h = Harness::new();
        h.metrics.record_order_failure("payment_failed", 80.0);

        assert_eq!(
            h.points(ORDERS_TOTAL),
            vec![(
                tags(&[("reason", "payment_failed"), ("status", "failed")]),
                Point::Sum(1.0)
            )]
        );
        assert_eq!(
            h.points(PROCESSING_DURATION),
            vec![(
                tags(&[("status", "failed")]),
                Point::Histogram { count: 1, sum: 80.0 }
            )]
        );
        assert!(h.points(ORDER_VALUE).is_empty());
        assert!(h.points(PAYMENT_METHOD_TOTAL).is_empty());
    }

    #[test]
    fn success_and_failure_are_counted_separately() {
        let h = Harness::new();
        h.metrics.record_order(10.0, "credit_card", 1, 5.0);
        h.metrics.record_order(20.0, "paypal", 2, 6.0);
        h.metrics.record_order_failure("payment_failed", 7.0);

        let totals = h.points(ORDERS_TOTAL);
        assert!(totals.contains(&(tags(&[("status", "success")]), Point::Sum(2.0))));
        assert!(totals.contains(&(
            tags(&[("reason", "payment_failed"), ("status", "failed")]),
            Point::Sum(1.0)
        )));
    }

    #[test]
    fn concurrent_matched_pairs_leave_no_active_checkouts() {
        let h = Harness::new();

        thread::scope(|s| {
            for i in 0..16 {
                let metrics = h.metrics.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            metrics.increment_active_checkouts();
                            metrics.decrement_active_checkouts();
                        } else {
                            let _active = metrics.track_active_checkout();
                        }
                    }
                });
            }
        });

        assert_eq!(h.points(ACTIVE_CHECKOUTS), vec![(Vec::new(), Point::Sum(0.0))]);
    }

    #[test]
    fn active_guard_decrements_on_early_return() {
        let h = Harness::new();

        let checkout = |fail: bool| -> std::result::Result<(), &'static str> {
            let _active = h.metrics.track_active_checkout();
            if fail {
                return Err("card declined");
            }
            Ok(())
        };
        assert!(checkout(true).is_err());
        assert!(checkout(false).is_ok());

        let held = h.metrics.track_active_checkout();
        assert_eq!(h.points(ACTIVE_CHECKOUTS), vec![(Vec::new(), Point::Sum(1.0))]);
        drop(held);
        assert_eq!(h.points(ACTIVE_CHECKOUTS), vec![(Vec::new(), Point::Sum(0.0))]);
    }

    #[test]
    fn creating_instruments_twice_is_an_error() {
        let provider = SdkMeterProvider::builder().build();
        let registry = InstrumentRegistry::new(provider.meter("checkout-test"));

        CheckoutMetrics::new(&registry).expect("first creation");
        let err = CheckoutMetrics::new(&registry).err().expect("second creation fails");
        assert!(matches!(err, TelemetryError::DuplicateInstrument(ORDERS_TOTAL)));
    }
}
