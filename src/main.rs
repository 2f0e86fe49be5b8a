// SPDX-License-Identifier: MIT
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use checkout_telemetry::metrics::CheckoutMetrics;
use checkout_telemetry::money::{Money, MoneyError};
use checkout_telemetry::spans::CheckoutTracer;
use checkout_telemetry::telemetry::init_telemetry;
use tracing::{info, instrument, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

const SERVICE_NAME: &str = "checkoutservice";
const SIMULATED_ORDERS: u32 = 20;

#[derive(Debug, thiserror::Error)]
enum CheckoutError {
    #[error("product {0} is out of stock")]
    OutOfStock(String),
    #[error("card declined")]
    PaymentDeclined,
    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl CheckoutError {
    fn reason(&self) -> &'static str {
        match self {
            CheckoutError::OutOfStock(_) => "out_of_stock",
            CheckoutError::PaymentDeclined => "payment_failed",
            CheckoutError::Money(_) => "invalid_amount",
        }
    }
}

struct LineItem {
    product_id: &'static str,
    price: Money,
    quantity: u32,
}

struct PlaceOrderRequest {
    user_id: String,
    email: String,
    card_number: &'static str,
    items: Vec<LineItem>,
}

fn simulated_request(n: u32) -> Result<PlaceOrderRequest, MoneyError> {
    let card_number = if n % 5 == 4 {
        "4000000000000002"
    } else {
        "4111111111111111"
    };
    let mut items = vec![LineItem {
        product_id: "OLJCESPC7Z",
        price: Money::new(19, 990_000_000)?,
        quantity: 1 + n % 3,
    }];
    if n % 7 == 6 {
        items.push(LineItem {
            product_id: "9SIQT8TOJO",
            price: Money::new(789, 500_000_000)?,
            quantity: 1,
        });
    }
    Ok(PlaceOrderRequest {
        user_id: format!("user-{n}"),
        email: format!("shopper{n}@example.com"),
        card_number,
        items,
    })
}

/// Stand-in for the payment service.
async fn charge_card(card_number: &str) -> Result<(), CheckoutError> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    if card_number.ends_with("0002") {
        return Err(CheckoutError::PaymentDeclined);
    }
    Ok(())
}

/// Stand-in for the product catalog.
async fn in_stock(product_id: &str) -> bool {
    tokio::time::sleep(Duration::from_millis(5)).await;
    product_id != "9SIQT8TOJO"
}

#[instrument(skip_all, fields(user.id = %req.user_id))]
async fn place_order(
    tracer: &CheckoutTracer,
    metrics: &CheckoutMetrics,
    req: &PlaceOrderRequest,
) -> Result<String, CheckoutError> {
    let _active = metrics.track_active_checkout();
    let started = Instant::now();
    let elapsed_ms = || started.elapsed().as_secs_f64() * 1000.0;

    let result = checkout(tracer, req).await;
    match &result {
        Ok((_, total)) => metrics.record_order(
            total.to_f64(),
            "credit_card",
            req.items.len() as u64,
            elapsed_ms(),
        ),
        Err(e) => metrics.record_order_failure(e.reason(), elapsed_ms()),
    }
    result.map(|(order_id, _)| order_id)
}

async fn checkout(
    tracer: &CheckoutTracer,
    req: &PlaceOrderRequest,
) -> Result<(String, Money), CheckoutError> {
    let cx = tracing::Span::current().context();

    let (_, mut validate) = tracer.start_order_validation(&cx, &req.user_id, req.items.len());
    for item in &req.items {
        let (_, mut check) =
            tracer.start_inventory_check(validate.context(), item.product_id, item.quantity);
        if !in_stock(item.product_id).await {
            let err = CheckoutError::OutOfStock(item.product_id.to_string());
            check.record_error(&err, "Product unavailable");
            validate.record_error(&err, "Order validation failed");
            return Err(err);
        }
        check.record_success("Product available");
    }
    validate.record_success("Order validated");
    validate.end();

    let lines = req
        .items
        .iter()
        .map(|item| item.price.checked_mul(item.quantity))
        .collect::<Result<Vec<_>, _>>()?;
    let total = Money::sum(lines)?;

    let (payment_cx, mut payment) =
        tracer.start_payment_processing(&cx, total.to_f64(), "credit_card");
    let (_, mut charge) = tracer.start_charge(&payment_cx, total.to_f64(), req.card_number);
    if let Err(err) = charge_card(req.card_number).await {
        charge.record_error(&err, "Charge rejected");
        payment.record_error(&err, "Payment failed");
        return Err(err);
    }
    charge.record_success("Charge accepted");
    charge.end();
    payment.record_success("Payment successful");
    payment.end();

    let order_id = format!("order-{}", req.user_id);
    let (_, mut email) = tracer.start_email_notification(&cx, &req.email, &order_id);
    email.record_success("Confirmation queued");

    Ok((order_id, total))
}

async fn run_orders(tracer: &CheckoutTracer, metrics: &CheckoutMetrics) -> Result<()> {
    for n in 0..SIMULATED_ORDERS {
        let req = simulated_request(n)?;
        match place_order(tracer, metrics, &req).await {
            Ok(order_id) => info!(order.id = %order_id, "order placed"),
            Err(e) => warn!(error = %e, "order failed"),
        }
    }
    Ok(())
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry =
        init_telemetry(SERVICE_NAME).context("Failed to initialize OpenTelemetry")?;
    let metrics = telemetry
        .new_metrics()
        .context("Failed to initialize checkout metrics")?;
    info!("application started");

    tokio::select! {
        res = run_orders(telemetry.tracer(), &metrics) => res?,
        _ = wait_for_termination() => info!("termination signal received"),
    }

    info!("shutting down");
    // Blocks up to the shutdown timeout; keep it off the async workers.
    let handle = telemetry.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || handle.shutdown()).await? {
        warn!(error = %e, "telemetry shutdown incomplete");
    }
    Ok(())
}
