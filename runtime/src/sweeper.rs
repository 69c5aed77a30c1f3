//! Expiry sweeper.
//!
//! Pending manual tickets hold their number for `ticket_hold`. A sweep at or
//! after `created_at + ticket_hold` deletes them, which frees the number for
//! the next buyer immediately. Lapsed pooled reservation tokens are purged in
//! the same pass. The sweep is one transaction and safe to run from any
//! number of places at once: a dashboard view, the periodic task, an
//! operator request.

use crate::RaffleService;
use crate::metrics::LifecycleMetrics;
use rifa_core::RaffleError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Summary of one sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending tickets deleted
    pub reclaimed_tickets: usize,
    /// Reservation tokens purged
    pub purged_reservations: u64,
}

impl RaffleService {
    /// Deletes pending tickets whose hold lapsed and purges expired reservations.
    ///
    /// # Errors
    ///
    /// Returns a store error if the sweep transaction fails; nothing is
    /// deleted in that case.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepReport, RaffleError> {
        let now = self.clock.now();
        let cutoff = now - self.config.ticket_hold;

        let mut tx = self.begin().await?;
        let reclaimed = tx.delete_pending_created_before(cutoff).await?;
        let purged_reservations = tx.delete_expired_reservations(now).await?;
        tx.commit().await?;

        for ticket in &reclaimed {
            debug!(
                raffle_id = %ticket.raffle_id,
                number = %ticket.number,
                "Released expired hold"
            );
        }
        let report = SweepReport {
            reclaimed_tickets: reclaimed.len(),
            purged_reservations,
        };
        LifecycleMetrics::record_sweep(report.reclaimed_tickets, report.purged_reservations);
        if report.reclaimed_tickets > 0 || report.purged_reservations > 0 {
            info!(?report, "Expired holds released");
        }
        Ok(report)
    }
}

/// Periodic background job running the expiry sweep and payment reconciliation.
pub struct ExpirySweeper {
    service: Arc<RaffleService>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper ticking every `interval`
    #[must_use]
    pub const fn new(service: Arc<RaffleService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Runs one cycle: expiry sweep, then reconciliation of pending payments.
    ///
    /// Errors are logged; the next tick tries again.
    pub async fn run_once(&self) {
        if let Err(e) = self.service.sweep_expired().await {
            warn!(error = %e, "Expiry sweep failed");
        }
        if let Err(e) = self.service.reconcile_pending().await {
            warn!(error = %e, "Payment reconciliation failed");
        }
    }

    /// Spawns the loop on the current runtime. It exits when `shutdown` fires.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = shutdown.recv() => {
                        info!("Expiry sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}
