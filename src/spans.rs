// SPDX-License-Identifier: MIT
//! Span helpers for the checkout sub-operations.
//!
//! Each `start_*` method opens a child span under the caller's
//! [`Context`], tags it with a fixed attribute set, records a "started" event
//! and returns the new context together with a [`CheckoutSpan`] guard. The
//! guard ends the span when it goes out of scope, so every exit path,
//! including `?` returns and panics, closes it exactly once.
//!
//! ```no_run
//! # use checkout_telemetry::spans::CheckoutTracer;
//! # fn charge() -> Result<(), std::io::Error> { Ok(()) }
//! # fn run(tracer: &CheckoutTracer) -> Result<(), std::io::Error> {
//! let cx = opentelemetry::Context::current();
//! let (_cx, mut span) = tracer.start_payment_processing(&cx, 49.99, "credit_card");
//! match charge() {
//!     Ok(()) => span.record_success("Payment successful"),
//!     Err(e) => {
//!         span.record_error(&e, "Payment failed");
//!         return Err(e);
//!     }
//! }
//! # Ok(()) }
//! ```
//!
//! Payment and contact details never reach an attribute in full: card
//! numbers are cut to their last four characters and email addresses to
//! their domain.

use std::borrow::Cow;
use std::error::Error;

use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;

/// Tracer for checkout spans.
#[derive(Clone)]
pub struct CheckoutTracer {
    tracer: SdkTracer,
}

impl CheckoutTracer {
    pub fn new(tracer: SdkTracer) -> Self {
        Self { tracer }
    }

    pub fn sdk_tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn start_order_validation(
        &self,
        parent: &Context,
        user_id: &str,
        item_count: usize,
    ) -> (Context, CheckoutSpan) {
        self.start(
            parent,
            "ValidateOrder",
            SpanKind::Internal,
            vec![
                KeyValue::new("user.id", user_id.to_string()),
                KeyValue::new("cart.items", item_count as i64),
            ],
            "Order validation started",
            Vec::new(),
        )
    }

    pub fn start_payment_processing(
        &self,
        parent: &Context,
        amount: f64,
        method: &str,
    ) -> (Context, CheckoutSpan) {
        self.start(
            parent,
            "ProcessPayment",
            SpanKind::Internal,
            vec![
                KeyValue::new("order.value", amount),
                KeyValue::new("payment.method", method.to_string()),
                KeyValue::new("currency", "USD"),
            ],
            "Payment processing initiated",
            vec![KeyValue::new("amount", amount)],
        )
    }

    /// Outbound charge against the payment provider.
    pub fn start_charge(
        &self,
        parent: &Context,
        amount: f64,
        card_number: &str,
    ) -> (Context, CheckoutSpan) {
        self.start(
            parent,
            "ChargeCard",
            SpanKind::Client,
            vec![
                KeyValue::new("charge.amount", amount),
                KeyValue::new("card.last4", card_last4(card_number)),
            ],
            "Charge started",
            Vec::new(),
        )
    }

    pub fn start_email_notification(
        &self,
        parent: &Context,
        user_email: &str,
        order_id: &str,
    ) -> (Context, CheckoutSpan) {
        self.start(
            parent,
            "SendConfirmationEmail",
            SpanKind::Internal,
            vec![
                KeyValue::new("order.id", order_id.to_string()),
                KeyValue::new("notification.type", "email"),
                KeyValue::new("notification.recipient_domain", email_domain(user_email)),
            ],
            "Email notification queued",
            Vec::new(),
        )
    }

    /// Outbound stock lookup for one product.
    pub fn start_inventory_check(
        &self,
        parent: &Context,
        product_id: &str,
        quantity: u32,
    ) -> (Context, CheckoutSpan) {
        self.start(
            parent,
            "CheckInventory",
            SpanKind::Client,
            vec![
                KeyValue::new("product.id", product_id.to_string()),
                KeyValue::new("requested.quantity", i64::from(quantity)),
            ],
            "Inventory check started",
            Vec::new(),
        )
    }

    fn start(
        &self,
        parent: &Context,
        name: &'static str,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        event: &'static str,
        event_attributes: Vec<KeyValue>,
    ) -> (Context, CheckoutSpan) {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);
        let cx = parent.with_span(span);
        cx.span().add_event(event, event_attributes);

        let guard = CheckoutSpan {
            cx: cx.clone(),
            name,
            outcome: SpanOutcome::Unset,
        };
        (cx, guard)
    }
}

/// Terminal status recorded on a [`CheckoutSpan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanOutcome {
    Unset,
    Ok,
    Error,
}

/// Owns one checkout span and ends it on drop.
///
/// Exactly one of [`record_success`](Self::record_success) or
/// [`record_error`](Self::record_error) should be called before the guard
/// goes away. Later status calls are ignored. A guard dropped during a panic
/// without a status marks the span as failed; one dropped normally without a
/// status logs a warning.
#[must_use = "the span ends as soon as the guard is dropped"]
pub struct CheckoutSpan {
    cx: Context,
    name: &'static str,
    outcome: SpanOutcome,
}

impl CheckoutSpan {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Context carrying this span, for starting children.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn outcome(&self) -> SpanOutcome {
        self.outcome
    }

    /// Mark the operation as completed.
    pub fn record_success(&mut self, message: impl Into<Cow<'static, str>>) {
        if !self.claim_outcome(SpanOutcome::Ok) {
            return;
        }
        let message: Cow<'static, str> = message.into();
        let span = self.cx.span();
        span.set_status(Status::Ok);
        span.add_event(
            "Operation completed successfully",
            vec![KeyValue::new("message", message.into_owned())],
        );
    }

    /// Mark the operation as failed with `err`.
    pub fn record_error(&mut self, err: &dyn Error, message: impl Into<Cow<'static, str>>) {
        if !self.claim_outcome(SpanOutcome::Error) {
            return;
        }
        let span = self.cx.span();
        span.record_error(err);
        span.set_status(Status::error(message));
        span.add_event(
            "Error occurred",
            vec![KeyValue::new("error.message", err.to_string())],
        );
    }

    /// End the span now instead of at the end of the scope.
    pub fn end(self) {}

    fn claim_outcome(&mut self, outcome: SpanOutcome) -> bool {
        if self.outcome != SpanOutcome::Unset {
            tracing::warn!(
                span_name = self.name,
                recorded = ?self.outcome,
                ignored = ?outcome,
                "span status already recorded"
            );
            return false;
        }
        self.outcome = outcome;
        true
    }
}

impl Drop for CheckoutSpan {
    fn drop(&mut self) {
        let span = self.cx.span();
        if self.outcome == SpanOutcome::Unset {
            if std::thread::panicking() {
                span.set_status(Status::error("operation panicked"));
                self.outcome = SpanOutcome::Error;
            } else {
                tracing::warn!(span_name = self.name, "span ended without a recorded status");
            }
        }
        span.end();
    }
}

/// Reduce a payment card number to at most its last four characters.
///
/// Numbers of four characters or fewer would be revealed whole, so they are
/// masked entirely.
pub fn card_last4(card_number: &str) -> String {
    let trimmed = card_number.trim_end();
    let len = trimmed.chars().count();
    if len <= 4 {
        return "****".to_string();
    }
    trimmed.chars().skip(len - 4).collect()
}

/// Domain part of an email address, or `unknown` if there is none.
pub fn email_domain(email: &str) -> String {
    email
        .trim()
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .unwrap_or("unknown")
        .to_ascii_lowercase()
}
