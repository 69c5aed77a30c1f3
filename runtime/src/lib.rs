//! # Rifa Runtime
//!
//! The imperative shell around `rifa-core`.
//!
//! [`RaffleService`] owns the injected capabilities (store, payment gateway,
//! clock) and runs every caller-facing operation:
//!
//! - `purchase` and `request_charge` (allocation, pricing, charge creation)
//! - `finalize`, `poll_status`, `handle_notification`, `reconcile_pending`
//!   (reconciliation, all converging on one idempotent `finalize`)
//! - `sweep_expired` and the background [`sweeper::ExpirySweeper`]
//! - `draw` and `winner`
//! - raffle administration and read models
//!
//! Locks are only held inside store transactions, and no transaction is ever
//! open while the payment provider is being called.

use chrono::{Duration, FixedOffset, Offset, Utc};
use rifa_core::environment::Clock;
use rifa_core::gateway::{GatewayError, PaymentGateway};
use rifa_core::store::{RaffleStore, StoreTx};
use rifa_core::RaffleError;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub mod catalog;
pub mod draw;
pub mod metrics;
pub mod purchase;
pub mod reconcile;
pub mod sweeper;
pub mod views;

pub use purchase::{ChargeInfo, ChargeTarget, PurchaseRequest};
pub use reconcile::{FinalizeOutcome, NotificationAck, ReconcileReport};
pub use sweeper::{ExpirySweeper, SweepReport};

/// Timing knobs for the service
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// How long a pending manual ticket holds its number
    pub ticket_hold: Duration,
    /// How long a pooled reservation token stays usable
    pub reservation_ttl: Duration,
    /// Expiry the provider enforces on a charge
    pub charge_expiry: Duration,
    /// Upper bound on any single payment provider call
    pub gateway_timeout: std::time::Duration,
    /// How far back the reconciliation sweep looks for pending payments
    pub reconcile_lookback: Duration,
    /// Offset used to read naive promotion end times
    pub promo_offset: FixedOffset,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ticket_hold: Duration::hours(1),
            reservation_ttl: Duration::minutes(15),
            charge_expiry: Duration::minutes(15),
            gateway_timeout: std::time::Duration::from_secs(15),
            reconcile_lookback: Duration::hours(1),
            promo_offset: FixedOffset::west_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Raffle ticketing service
pub struct RaffleService {
    store: Arc<dyn RaffleStore>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
}

impl RaffleService {
    /// Wires the service to its capabilities
    #[must_use]
    pub fn new(
        store: Arc<dyn RaffleStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The injected store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RaffleStore> {
        &self.store
    }

    /// The injected payment gateway
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, RaffleError> {
        Ok(self.store.begin().await?)
    }

    /// Runs a provider call under the configured timeout and records its latency.
    async fn call_gateway<T, F>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(GatewayError::Timeout) => "timeout",
            Err(_) => "error",
        };
        metrics::PaymentMetrics::record_gateway_call(operation, outcome, started.elapsed());
        if let Err(e) = &result {
            tracing::warn!(operation, error = %e, "Payment provider call failed");
        }
        result
    }
}
