//! Reconciliation: one `finalize` for every confirmation path.
//!
//! Polls, provider notifications, the reconciliation sweep and operators all
//! end up in [`RaffleService::finalize`] (or [`RaffleService::close_payment`]
//! for cancel/expire). Both take the payment lock first, so concurrent
//! deliveries for the same charge serialize and only the first one writes.

use crate::RaffleService;
use crate::metrics::PaymentMetrics;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rifa_core::RaffleError;
use rifa_core::allocation;
use rifa_core::reconcile::{PaymentAction, PaymentEffect, PaymentReducer, Trigger};
use rifa_core::reducer::Reducer;
use rifa_core::store::StoreTx;
use rifa_core::types::{
    ExternalId, Money, Payment, PaymentId, PaymentStatus, RaffleId, Ticket, TicketId,
    TicketStatus, UserId,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Result of a finalize attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This call settled the payment
    Finalized {
        /// The payment, now paid
        payment: Payment,
        /// Tickets that became paid
        tickets: Vec<Ticket>,
    },
    /// The payment was already paid; nothing changed
    AlreadyFinalized(Payment),
}

impl FinalizeOutcome {
    /// The payment after the call
    #[must_use]
    pub const fn payment(&self) -> &Payment {
        match self {
            Self::Finalized { payment, .. } | Self::AlreadyFinalized(payment) => payment,
        }
    }
}

/// Acknowledgement returned to the provider for a notification
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NotificationAck {
    /// Payments settled by this delivery
    pub finalized: u32,
    /// Payments that were already settled
    pub duplicates: u32,
    /// Charges we have no record of
    pub unknown: u32,
    /// Charges that could not be settled (refused, reclaimed, closed raffle)
    pub failed: u32,
}

/// Summary of one reconciliation sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pending payments examined
    pub checked: u32,
    /// Settled during the sweep
    pub finalized: u32,
    /// Moved to cancelled or expired
    pub closed: u32,
    /// Could not be reconciled this time
    pub failed: u32,
}

impl RaffleService {
    /// Settles a payment. Idempotent per external id.
    ///
    /// Marks the payment paid and then, in the same transaction, either flips
    /// its manual tickets to paid or draws fresh numbers for a pooled
    /// quantity. A second call returns [`FinalizeOutcome::AlreadyFinalized`]
    /// without touching anything.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound` for an unknown external id
    /// - `PaymentNotPending` if the payment was cancelled or expired
    /// - `RaffleClosed` if the raffle was drawn before the payment settled
    /// - `ReservationExpired` if the manual tickets were reclaimed
    /// - `AllocationRaceFatal` if a pooled raffle has too few free numbers
    #[instrument(skip(self, paid_at), fields(external_id = %external_id, trigger = %trigger))]
    pub async fn finalize(
        &self,
        external_id: &ExternalId,
        trigger: Trigger,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<FinalizeOutcome, RaffleError> {
        let paid_at = paid_at.unwrap_or_else(|| self.clock.now());
        let mut tx = self.begin().await?;
        let mut payment = tx
            .lock_payment(external_id)
            .await?
            .ok_or_else(|| RaffleError::PaymentNotFound(external_id.clone()))?;

        let effects = PaymentReducer.reduce(&mut payment, PaymentAction::Confirm { paid_at }, &());
        let mut tickets = Vec::new();
        for effect in effects {
            match effect {
                PaymentEffect::AlreadyFinalized => {
                    info!("Payment already finalized");
                    return Ok(FinalizeOutcome::AlreadyFinalized(payment));
                }
                PaymentEffect::Refused { current, .. } => {
                    error!(status = %current, "Settlement reported for a payment that is no longer pending; refund required");
                    return Err(RaffleError::PaymentNotPending {
                        external_id: external_id.clone(),
                        status: current,
                    });
                }
                PaymentEffect::RecordStatus {
                    payment_id,
                    status,
                    at,
                } => {
                    tx.update_payment_status(payment_id, status, at).await?;
                }
                PaymentEffect::SettleTickets {
                    payment_id,
                    tickets: ids,
                    paid_at,
                } => {
                    tickets = settle(tx.as_mut(), &payment, payment_id, &ids, paid_at).await?;
                }
                PaymentEffect::MaterializeTickets {
                    payment_id,
                    raffle_id,
                    owner,
                    prices,
                    paid_at,
                } => {
                    let plan = Materialize {
                        external_id,
                        payment_id,
                        raffle_id,
                        owner,
                        prices,
                        paid_at,
                    };
                    tickets = match materialize(tx.as_mut(), plan).await {
                        Err(e @ RaffleError::AllocationRaceFatal { .. }) => {
                            PaymentMetrics::record_allocation_race_fatal();
                            error!(error = %e, "Paid pooled payment could not be allocated; operator action required");
                            return Err(e);
                        }
                        other => other?,
                    };
                }
            }
        }
        tx.commit().await?;

        PaymentMetrics::record_transition(trigger, PaymentStatus::Paid);
        PaymentMetrics::record_finalized(trigger, payment.scope.policy(), tickets.len());
        info!(tickets = tickets.len(), amount = %payment.amount, "Payment finalized");
        Ok(FinalizeOutcome::Finalized { payment, tickets })
    }

    /// Moves a pending payment to cancelled or expired.
    ///
    /// Paid payments are left alone and their status is returned.
    ///
    /// # Errors
    ///
    /// Returns `PaymentNotFound` for an unknown external id, or a store error.
    #[instrument(skip(self), fields(external_id = %external_id, trigger = %trigger))]
    pub async fn close_payment(
        &self,
        external_id: &ExternalId,
        status: PaymentStatus,
        trigger: Trigger,
    ) -> Result<PaymentStatus, RaffleError> {
        let at = self.clock.now();
        let action = match status {
            PaymentStatus::Cancelled => PaymentAction::Cancel { at },
            PaymentStatus::Expired => PaymentAction::Expire { at },
            other => {
                return Err(RaffleError::invalid(format!(
                    "cannot close a payment as {other}"
                )));
            }
        };

        let mut tx = self.begin().await?;
        let mut payment = tx
            .lock_payment(external_id)
            .await?
            .ok_or_else(|| RaffleError::PaymentNotFound(external_id.clone()))?;
        for effect in PaymentReducer.reduce(&mut payment, action, &()) {
            match effect {
                PaymentEffect::RecordStatus {
                    payment_id,
                    status,
                    at,
                } => tx.update_payment_status(payment_id, status, at).await?,
                PaymentEffect::Refused { current, requested } => {
                    info!(%current, %requested, "Transition ignored for terminal payment");
                    return Ok(current);
                }
                other => {
                    warn!(effect = ?other, "Unexpected effect while closing payment");
                }
            }
        }
        tx.commit().await?;
        PaymentMetrics::record_transition(trigger, payment.status);
        info!(status = %payment.status, "Payment closed");
        Ok(payment.status)
    }

    /// Reports a payment's status, asking the provider while it is pending.
    ///
    /// A provider answer of paid, cancelled or expired is applied before
    /// returning, so polling alone is enough to settle a payment.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound`, `NotOwner` when `requester` is not the payer
    /// - `PaymentProviderError` if the provider cannot be reached
    /// - anything [`RaffleService::finalize`] returns
    #[instrument(skip(self, requester), fields(external_id = %external_id))]
    pub async fn poll_status(
        &self,
        external_id: &ExternalId,
        requester: Option<UserId>,
    ) -> Result<PaymentStatus, RaffleError> {
        let payment = self.load_payment(external_id).await?;
        if requester.is_some_and(|user| user != payment.owner) {
            return Err(RaffleError::NotOwner);
        }
        if payment.status.is_terminal() {
            return Ok(payment.status);
        }
        self.apply_provider_status(external_id, Trigger::Poll).await
    }

    async fn load_payment(&self, external_id: &ExternalId) -> Result<Payment, RaffleError> {
        let mut tx = self.begin().await?;
        tx.get_payment(external_id)
            .await?
            .ok_or_else(|| RaffleError::PaymentNotFound(external_id.clone()))
    }

    async fn apply_provider_status(
        &self,
        external_id: &ExternalId,
        trigger: Trigger,
    ) -> Result<PaymentStatus, RaffleError> {
        let reported = self
            .call_gateway("query_status", self.gateway.query_status(external_id))
            .await?;
        match reported.status {
            PaymentStatus::Pending => Ok(PaymentStatus::Pending),
            PaymentStatus::Paid => {
                let outcome = self.finalize(external_id, trigger, reported.paid_at).await?;
                Ok(outcome.payment().status)
            }
            closed @ (PaymentStatus::Cancelled | PaymentStatus::Expired) => {
                self.close_payment(external_id, closed, trigger).await
            }
        }
    }

    /// Handles a provider notification.
    ///
    /// The signature is checked against the raw body before anything is
    /// parsed. Every listed charge goes through `finalize`; charges we do not
    /// know are logged and acknowledged so the provider stops redelivering.
    /// One charge failing to settle never stops the others in the batch.
    ///
    /// # Errors
    ///
    /// - `InvalidNotification` if the signature does not verify
    /// - `InvalidRequest` for a body that cannot be read
    /// - the first store failure, once every entry has been tried
    #[instrument(skip_all)]
    pub async fn handle_notification(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<NotificationAck, RaffleError> {
        if !self.gateway.verify_notification(raw_body, signature) {
            PaymentMetrics::record_notification_rejected();
            warn!(body_len = raw_body.len(), "Dropping notification with bad signature");
            return Err(RaffleError::InvalidNotification);
        }
        let settled = self
            .gateway
            .parse_notification(raw_body)
            .map_err(|e| RaffleError::invalid(format!("unreadable notification: {e}")))?;

        let mut ack = NotificationAck::default();
        let mut store_error = None;
        for entry in settled {
            match self
                .finalize(&entry.external_id, Trigger::Notification, entry.paid_at)
                .await
            {
                Ok(FinalizeOutcome::Finalized { .. }) => ack.finalized += 1,
                Ok(FinalizeOutcome::AlreadyFinalized(_)) => ack.duplicates += 1,
                Err(RaffleError::PaymentNotFound(id)) => {
                    warn!(external_id = %id, "Notification for unknown charge");
                    ack.unknown += 1;
                }
                Err(e @ RaffleError::Store(_)) => {
                    error!(external_id = %entry.external_id, error = %e, "Store failure while settling notified charge");
                    store_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!(external_id = %entry.external_id, error = %e, "Notified charge could not be settled");
                    ack.failed += 1;
                }
            }
        }
        if let Some(e) = store_error {
            return Err(e);
        }
        info!(?ack, "Notification processed");
        Ok(ack)
    }

    /// Re-checks every pending payment inside the lookback window.
    ///
    /// Covers lost notifications: a charge paid while nobody polls is still
    /// settled on the next sweep. Failures are logged and counted, never
    /// propagated, so one bad charge cannot stall the rest.
    ///
    /// # Errors
    ///
    /// Only a failure to list pending payments is returned.
    #[instrument(skip(self))]
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, RaffleError> {
        let since = self.clock.now() - self.config.reconcile_lookback;
        let pending = {
            let mut tx = self.begin().await?;
            tx.pending_payments(since).await?
        };

        let mut report = ReconcileReport::default();
        for payment in pending {
            report.checked += 1;
            match self
                .apply_provider_status(&payment.external_id, Trigger::Sweep)
                .await
            {
                Ok(PaymentStatus::Paid) => report.finalized += 1,
                Ok(PaymentStatus::Cancelled | PaymentStatus::Expired) => report.closed += 1,
                Ok(PaymentStatus::Pending) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(external_id = %payment.external_id, error = %e, "Reconciliation failed");
                }
            }
        }
        if report.checked > 0 {
            info!(?report, "Reconciliation sweep complete");
        }
        Ok(report)
    }
}

async fn settle(
    tx: &mut dyn StoreTx,
    payment: &Payment,
    payment_id: PaymentId,
    ids: &[TicketId],
    paid_at: DateTime<Utc>,
) -> Result<Vec<Ticket>, RaffleError> {
    let raffle = tx
        .lock_raffle(payment.raffle_id)
        .await?
        .ok_or(RaffleError::RaffleNotFound(payment.raffle_id))?;
    raffle.ensure_open()?;

    let mut tickets = tx.lock_tickets(ids).await?;
    if tickets.len() != ids.len() {
        error!(
            expected = ids.len(),
            found = tickets.len(),
            "Paid tickets were reclaimed before settlement; refund required"
        );
        return Err(RaffleError::expired(
            "tickets were reclaimed before the payment settled",
        ));
    }

    let pending: Vec<TicketId> = tickets
        .iter()
        .filter(|t| t.is_pending())
        .map(|t| t.id)
        .collect();
    if pending.len() < tickets.len() {
        warn!(
            duplicates = tickets.len() - pending.len(),
            "Tickets already settled by another charge; duplicate payment needs a refund"
        );
    }
    tx.settle_tickets(&pending, payment_id, paid_at).await?;

    tickets.retain(|t| pending.contains(&t.id));
    for ticket in &mut tickets {
        ticket.status = TicketStatus::Paid { paid_at };
        ticket.payment_id = Some(payment_id);
    }
    Ok(tickets)
}

struct Materialize<'a> {
    external_id: &'a ExternalId,
    payment_id: PaymentId,
    raffle_id: RaffleId,
    owner: UserId,
    prices: Vec<Money>,
    paid_at: DateTime<Utc>,
}

async fn materialize(
    tx: &mut dyn StoreTx,
    plan: Materialize<'_>,
) -> Result<Vec<Ticket>, RaffleError> {
    let raffle = tx
        .lock_raffle(plan.raffle_id)
        .await?
        .ok_or(RaffleError::RaffleNotFound(plan.raffle_id))?;
    raffle.ensure_open()?;

    let occupied = tx.occupied_numbers(plan.raffle_id).await?;
    let needed = u32::try_from(plan.prices.len()).unwrap_or(u32::MAX);
    let numbers = {
        let mut rng = StdRng::from_entropy();
        allocation::pick_numbers(raffle.total_numbers, &occupied, needed, &mut rng)
    };
    let Some(numbers) = numbers else {
        return Err(RaffleError::AllocationRaceFatal {
            raffle_id: plan.raffle_id,
            external_id: plan.external_id.clone(),
            needed,
            available: allocation::remaining(raffle.total_numbers, occupied.len()),
        });
    };

    let tickets: Vec<Ticket> = numbers
        .into_iter()
        .zip(plan.prices)
        .map(|(number, price)| Ticket {
            id: TicketId::new(),
            raffle_id: plan.raffle_id,
            owner: plan.owner,
            number,
            price,
            payment_id: Some(plan.payment_id),
            created_at: plan.paid_at,
            status: TicketStatus::Paid {
                paid_at: plan.paid_at,
            },
        })
        .collect();
    tx.insert_tickets(&tickets).await?;
    Ok(tickets)
}
