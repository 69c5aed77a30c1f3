//! Prometheus metrics for the raffle service.
//!
//! This module provides metric collection for:
//! - Purchases and their rejections
//! - Charges and payment provider latency
//! - Payment reconciliation transitions
//! - The expiry sweeper and draws
//!
//! # Example
//!
//! ```rust,no_run
//! use rifa_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Render for a /metrics handler
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rifa_core::reconcile::Trigger;
use rifa_core::types::{AllocationPolicy, PaymentStatus};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder and renderer.
///
/// The server crate exposes [`MetricsServer::render`] on its metrics listener.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the metrics listener binds to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the metrics listener should bind to
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning
    /// and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this instance.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!("rifa_purchases_total", "Purchases accepted, by policy");
    describe_counter!(
        "rifa_purchase_rejections_total",
        "Purchases rejected, by error code"
    );
    describe_counter!("rifa_charges_total", "Charge requests, by outcome");
    describe_histogram!(
        "rifa_gateway_duration_seconds",
        "Latency of payment provider calls"
    );
    describe_counter!(
        "rifa_payments_transitions_total",
        "Payment status transitions, by trigger and status"
    );
    describe_counter!(
        "rifa_payments_finalized_total",
        "Payments settled, by trigger and policy"
    );
    describe_counter!("rifa_tickets_sold_total", "Tickets marked paid");
    describe_counter!(
        "rifa_notifications_rejected_total",
        "Provider notifications that failed verification"
    );
    describe_counter!(
        "rifa_allocation_race_fatal_total",
        "Paid pooled payments that could not be allocated"
    );
    describe_counter!(
        "rifa_sweeper_reclaimed_tickets_total",
        "Pending tickets deleted after their hold lapsed"
    );
    describe_counter!(
        "rifa_sweeper_purged_reservations_total",
        "Expired pooled reservations removed"
    );
    describe_counter!("rifa_draws_total", "Winners drawn");
}

/// Purchase metrics recorder.
pub struct PurchaseMetrics;

impl PurchaseMetrics {
    /// Record an accepted purchase.
    pub fn record_accepted(policy: AllocationPolicy) {
        counter!("rifa_purchases_total", "policy" => policy.as_str()).increment(1);
    }

    /// Record a rejected purchase.
    pub fn record_rejected(code: &'static str) {
        counter!("rifa_purchase_rejections_total", "code" => code).increment(1);
    }
}

/// Payment metrics recorder.
pub struct PaymentMetrics;

impl PaymentMetrics {
    /// Record the outcome of a charge request.
    pub fn record_charge(outcome: &'static str) {
        counter!("rifa_charges_total", "outcome" => outcome).increment(1);
    }

    /// Record a payment provider call.
    pub fn record_gateway_call(operation: &'static str, outcome: &'static str, duration: Duration) {
        histogram!(
            "rifa_gateway_duration_seconds",
            "operation" => operation,
            "outcome" => outcome
        )
        .record(duration.as_secs_f64());
    }

    /// Record a status transition.
    pub fn record_transition(trigger: Trigger, status: PaymentStatus) {
        counter!(
            "rifa_payments_transitions_total",
            "trigger" => trigger.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
    }

    /// Record a settlement and the tickets it produced.
    pub fn record_finalized(trigger: Trigger, policy: AllocationPolicy, tickets: usize) {
        counter!(
            "rifa_payments_finalized_total",
            "trigger" => trigger.as_str(),
            "policy" => policy.as_str()
        )
        .increment(1);
        counter!("rifa_tickets_sold_total").increment(tickets as u64);
    }

    /// Record a notification that failed verification.
    pub fn record_notification_rejected() {
        counter!("rifa_notifications_rejected_total").increment(1);
    }

    /// Record a pooled payment that could not be allocated.
    pub fn record_allocation_race_fatal() {
        counter!("rifa_allocation_race_fatal_total").increment(1);
    }
}

/// Sweeper and draw metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record one sweep.
    pub fn record_sweep(tickets: usize, reservations: u64) {
        counter!("rifa_sweeper_reclaimed_tickets_total").increment(tickets as u64);
        counter!("rifa_sweeper_purged_reservations_total").increment(reservations);
    }

    /// Record a draw.
    pub fn record_draw() {
        counter!("rifa_draws_total").increment(1);
    }
}
