//! Purchase and charge creation.
//!
//! `request_charge` runs in three steps. It quotes inside a short
//! transaction, calls the provider with no transaction open, and then
//! persists the payment in a second transaction that re-checks everything
//! the quote relied on. If the re-check fails, the charge is left to lapse
//! at the provider.

use crate::RaffleService;
use crate::metrics::{PaymentMetrics, PurchaseMetrics};
use chrono::{DateTime, Duration, Utc};
use rifa_core::RaffleError;
use rifa_core::allocation;
use rifa_core::gateway::{ChargeRequest, Payer};
use rifa_core::store::StoreError;
use rifa_core::types::{
    Allocation, AllocationPolicy, ExternalId, Money, Payment, PaymentId, PaymentScope,
    PaymentStatus, RaffleId, Reservation, ReservationToken, Ticket, TicketId, TicketNumber, UserId,
};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// Policy-specific purchase arguments
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseRequest {
    /// Manual policy: the numbers wanted
    Numbers(Vec<TicketNumber>),
    /// Pooled policy: how many tickets
    Quantity(u32),
}

impl PurchaseRequest {
    const fn policy(&self) -> AllocationPolicy {
        match self {
            Self::Numbers(_) => AllocationPolicy::Manual,
            Self::Quantity(_) => AllocationPolicy::Pooled,
        }
    }
}

/// What a charge pays for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChargeTarget {
    /// Pending manual tickets
    Tickets(Vec<TicketId>),
    /// A pooled reservation
    Reservation(ReservationToken),
}

/// An open charge as handed back to the buyer
#[derive(Clone, Debug, Serialize)]
pub struct ChargeInfo {
    /// Internal payment id
    pub payment_id: PaymentId,
    /// Provider id, used to poll
    pub external_id: ExternalId,
    /// Total charged
    pub amount: Money,
    /// Unit price charged
    pub unit_price: Money,
    /// Tickets covered
    pub quantity: u32,
    /// PIX copy-and-paste payload
    pub copy_paste: String,
    /// QR code image
    pub qr_code_image: Option<String>,
    /// When the charge stops being payable
    pub expires_at: DateTime<Utc>,
}

/// Everything the quote step settled on
struct Quote {
    raffle_id: RaffleId,
    title: String,
    unit_price: Money,
    amount: Money,
    quantity: u32,
    expires_in: Duration,
}

fn total(unit: Money, quantity: u32) -> Result<Money, RaffleError> {
    unit.checked_multiply(quantity)
        .ok_or_else(|| RaffleError::invalid("order total overflows"))
}

fn dedup(ids: &[TicketId]) -> Vec<TicketId> {
    let unique: BTreeSet<TicketId> = ids.iter().copied().collect();
    unique.into_iter().collect()
}

impl RaffleService {
    /// Reserves numbers (manual) or a quantity (pooled) for `owner`.
    ///
    /// Manual purchases are all-or-nothing: the availability check and the
    /// insert run under the raffle lock, and one taken number fails the
    /// whole request.
    ///
    /// # Errors
    ///
    /// - `RaffleNotFound`, `RaffleClosed`
    /// - `InvalidRequest` when the arguments do not match the raffle's policy
    /// - `NumberUnavailable` (manual) or `InsufficientSupply` (pooled)
    #[instrument(skip(self, request), fields(raffle_id = %raffle_id, owner = %owner))]
    pub async fn purchase(
        &self,
        raffle_id: RaffleId,
        owner: UserId,
        request: PurchaseRequest,
    ) -> Result<Allocation, RaffleError> {
        let policy = request.policy();
        let result = match request {
            PurchaseRequest::Numbers(numbers) => {
                self.purchase_numbers(raffle_id, owner, &numbers).await
            }
            PurchaseRequest::Quantity(quantity) => {
                self.reserve_quantity(raffle_id, owner, quantity).await
            }
        };
        match &result {
            Ok(_) => PurchaseMetrics::record_accepted(policy),
            Err(e) => {
                PurchaseMetrics::record_rejected(e.code());
                info!(error = %e, "Purchase rejected");
            }
        }
        result
    }

    async fn purchase_numbers(
        &self,
        raffle_id: RaffleId,
        owner: UserId,
        numbers: &[TicketNumber],
    ) -> Result<Allocation, RaffleError> {
        let now = self.clock.now();
        let mut tx = self.begin().await?;
        let raffle = tx
            .lock_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        if raffle.policy != AllocationPolicy::Manual {
            return Err(RaffleError::invalid("this raffle assigns numbers at random"));
        }
        let occupied = tx.occupied_numbers(raffle_id).await?;
        let numbers = allocation::check_manual(&raffle, numbers, &occupied)?;

        let price = raffle.price_at(now);
        let tickets: Vec<Ticket> = numbers
            .iter()
            .map(|&number| Ticket::pending(raffle_id, owner, number, price, now))
            .collect();
        tx.insert_tickets(&tickets).await.map_err(|e| match e {
            StoreError::Conflict(_) => RaffleError::NumberUnavailable {
                raffle_id,
                numbers: numbers.clone(),
            },
            other => other.into(),
        })?;
        tx.commit().await?;

        info!(count = tickets.len(), price = %price, "Numbers held");
        Ok(Allocation::Numbered(tickets))
    }

    async fn reserve_quantity(
        &self,
        raffle_id: RaffleId,
        owner: UserId,
        quantity: u32,
    ) -> Result<Allocation, RaffleError> {
        let now = self.clock.now();
        let mut tx = self.begin().await?;
        let raffle = tx
            .get_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        if raffle.policy != AllocationPolicy::Pooled {
            return Err(RaffleError::invalid("this raffle requires choosing numbers"));
        }
        let occupied = tx.occupied_numbers(raffle_id).await?;
        allocation::check_pooled(&raffle, quantity, occupied.len())?;

        let reservation = Reservation {
            token: ReservationToken::new(),
            raffle_id,
            owner,
            quantity,
            unit_price: raffle.price_at(now),
            created_at: now,
            expires_at: now + self.config.reservation_ttl,
        };
        tx.insert_reservation(&reservation).await?;
        tx.commit().await?;

        info!(quantity, token = %reservation.token, "Pooled reservation created");
        Ok(Allocation::Reserved(reservation))
    }

    /// Opens a PIX charge for held tickets or a pooled reservation.
    ///
    /// The amount is re-priced now, not taken from the purchase quote. The
    /// charge expiry is the tighter of the provider window and what is left
    /// of the ticket hold.
    ///
    /// # Errors
    ///
    /// - `ReservationExpired` if the hold lapsed or the tickets were reclaimed
    /// - `NotOwner` when the tickets or reservation belong to someone else
    /// - `InsufficientSupply` if a pooled raffle sold out meanwhile
    /// - `PaymentProviderError` when the provider fails or times out
    #[instrument(skip(self, target, payer), fields(owner = %owner))]
    pub async fn request_charge(
        &self,
        owner: UserId,
        target: ChargeTarget,
        payer: Payer,
    ) -> Result<ChargeInfo, RaffleError> {
        let result = self.request_charge_inner(owner, target, payer).await;
        let outcome = match &result {
            Ok(_) => "issued",
            Err(RaffleError::PaymentProviderError(_)) => "provider_error",
            Err(_) => "rejected",
        };
        PaymentMetrics::record_charge(outcome);
        result
    }

    async fn request_charge_inner(
        &self,
        owner: UserId,
        target: ChargeTarget,
        payer: Payer,
    ) -> Result<ChargeInfo, RaffleError> {
        if payer.name.trim().is_empty() {
            return Err(RaffleError::invalid("payer name is required"));
        }
        if !payer.has_valid_tax_id() {
            return Err(RaffleError::invalid("payer CPF must have 11 digits"));
        }

        let now = self.clock.now();
        let target = match target {
            ChargeTarget::Tickets(ids) => ChargeTarget::Tickets(dedup(&ids)),
            reservation @ ChargeTarget::Reservation(_) => reservation,
        };
        let quote = match &target {
            ChargeTarget::Tickets(ids) => self.quote_tickets(owner, ids, now).await?,
            ChargeTarget::Reservation(token) => self.quote_reservation(owner, *token, now).await?,
        };

        let expires_in_secs = u32::try_from(quote.expires_in.num_seconds().max(1)).unwrap_or(u32::MAX);
        let request = ChargeRequest {
            raffle_id: quote.raffle_id,
            owner,
            amount: quote.amount,
            payer,
            description: format!("Rifa: {}", quote.title),
            info: vec![
                ("Rifa ID".to_string(), quote.raffle_id.to_string()),
                ("User ID".to_string(), owner.to_string()),
                ("Quantidade".to_string(), quote.quantity.to_string()),
            ],
            expires_in_secs,
        };
        let charge = self
            .call_gateway("create_charge", self.gateway.create_charge(request))
            .await?;
        let expires_at = charge
            .expires_at
            .unwrap_or(now + Duration::seconds(i64::from(expires_in_secs)));

        let scope = match &target {
            ChargeTarget::Tickets(ids) => PaymentScope::Manual {
                tickets: ids.clone(),
            },
            ChargeTarget::Reservation(_) => PaymentScope::Pooled {
                quantity: quote.quantity,
            },
        };
        let payment = Payment {
            id: PaymentId::new(),
            external_id: charge.external_id.clone(),
            owner,
            raffle_id: quote.raffle_id,
            amount: quote.amount,
            status: PaymentStatus::Pending,
            scope,
            created_at: now,
            updated_at: now,
            charge_expires_at: expires_at,
        };

        // Raffle before tickets, the same order settlement locks them in
        let mut tx = self.begin().await?;
        tx.lock_raffle(quote.raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(quote.raffle_id))?
            .ensure_open()?;
        match &target {
            ChargeTarget::Tickets(ids) => {
                let tickets = tx.lock_tickets(ids).await?;
                if tickets.len() != ids.len() || tickets.iter().any(|t| !t.is_pending()) {
                    warn!(external_id = %charge.external_id, "Tickets changed while the charge was opened");
                    return Err(RaffleError::expired(
                        "tickets were released before the charge was recorded",
                    ));
                }
                tx.insert_payment(&payment).await?;
                let repriced: Vec<Ticket> = tickets
                    .into_iter()
                    .map(|mut t| {
                        t.price = quote.unit_price;
                        t
                    })
                    .collect();
                tx.attach_tickets(payment.id, &repriced).await?;
            }
            ChargeTarget::Reservation(token) => {
                if tx.take_reservation(*token).await?.is_none() {
                    warn!(external_id = %charge.external_id, "Reservation consumed while the charge was opened");
                    return Err(RaffleError::expired("reservation already used or expired"));
                }
                tx.insert_payment(&payment).await?;
            }
        }
        tx.commit().await?;

        info!(
            external_id = %payment.external_id,
            amount = %payment.amount,
            quantity = quote.quantity,
            "Charge issued"
        );
        Ok(ChargeInfo {
            payment_id: payment.id,
            external_id: charge.external_id,
            amount: quote.amount,
            unit_price: quote.unit_price,
            quantity: quote.quantity,
            copy_paste: charge.copy_paste,
            qr_code_image: charge.qr_code_image,
            expires_at,
        })
    }

    async fn quote_tickets(
        &self,
        owner: UserId,
        ids: &[TicketId],
        now: DateTime<Utc>,
    ) -> Result<Quote, RaffleError> {
        if ids.is_empty() {
            return Err(RaffleError::invalid("no tickets selected"));
        }
        let mut tx = self.begin().await?;
        let tickets = tx.lock_tickets(ids).await?;
        if tickets.len() != ids.len() {
            return Err(RaffleError::expired("one or more tickets were released"));
        }
        if tickets.iter().any(|t| t.owner != owner) {
            return Err(RaffleError::NotOwner);
        }
        if tickets.iter().any(|t| !t.is_pending()) {
            return Err(RaffleError::invalid("ticket is already paid"));
        }
        let raffle_id = tickets[0].raffle_id;
        if tickets.iter().any(|t| t.raffle_id != raffle_id) {
            return Err(RaffleError::invalid("tickets span more than one raffle"));
        }
        let raffle = tx
            .get_raffle(raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(raffle_id))?;
        raffle.ensure_open()?;

        let hold = self.config.ticket_hold;
        let hold_left = tickets
            .iter()
            .filter_map(|t| t.hold_remaining(now, hold))
            .min()
            .unwrap_or_else(Duration::zero);
        if hold_left <= Duration::zero() {
            let released = tx.delete_pending_tickets(ids).await?;
            tx.commit().await?;
            info!(released, "Expired tickets released on charge attempt");
            return Err(RaffleError::expired("the hold on these numbers lapsed"));
        }

        let quantity = u32::try_from(tickets.len()).unwrap_or(u32::MAX);
        let unit_price = raffle.price_at(now);
        Ok(Quote {
            raffle_id,
            title: raffle.title,
            unit_price,
            amount: total(unit_price, quantity)?,
            quantity,
            expires_in: self.config.charge_expiry.min(hold_left),
        })
    }

    async fn quote_reservation(
        &self,
        owner: UserId,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<Quote, RaffleError> {
        let mut tx = self.begin().await?;
        let reservation = tx
            .get_reservation(token)
            .await?
            .filter(|r| !r.is_expired(now))
            .ok_or_else(|| RaffleError::expired("reservation not found or expired"))?;
        if reservation.owner != owner {
            return Err(RaffleError::NotOwner);
        }
        let raffle = tx
            .get_raffle(reservation.raffle_id)
            .await?
            .ok_or(RaffleError::RaffleNotFound(reservation.raffle_id))?;
        let occupied = tx.occupied_numbers(raffle.id).await?;
        allocation::check_pooled(&raffle, reservation.quantity, occupied.len())?;

        let unit_price = raffle.price_at(now);
        Ok(Quote {
            raffle_id: raffle.id,
            title: raffle.title,
            unit_price,
            amount: total(unit_price, reservation.quantity)?,
            quantity: reservation.quantity,
            expires_in: self.config.charge_expiry,
        })
    }

    /// Issues a fresh charge for one of the buyer's pending tickets.
    ///
    /// A ticket whose hold lapsed is deleted and `ReservationExpired` is
    /// returned. The previous charge, if any, stays pending; whichever
    /// settles first pays for the ticket.
    ///
    /// # Errors
    ///
    /// Same as [`RaffleService::request_charge`].
    pub async fn retry_payment(
        &self,
        owner: UserId,
        ticket_id: TicketId,
        payer: Payer,
    ) -> Result<ChargeInfo, RaffleError> {
        self.request_charge(owner, ChargeTarget::Tickets(vec![ticket_id]), payer)
            .await
    }
}
