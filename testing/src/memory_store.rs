//! In-memory implementation of the storage contract.
//!
//! A transaction takes the store-wide lock and works on a staged copy of the
//! tables. `commit` writes the copy back; dropping the transaction discards
//! it. One lock for everything is coarser than row locks, but it gives the
//! same guarantees `lock_raffle` and `lock_payment` promise.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rifa_core::pricing::Promotion;
use rifa_core::store::{RaffleStore, StoreError, StoreResult, StoreTx};
use rifa_core::types::{
    ExternalId, Payment, PaymentId, PaymentStatus, Raffle, RaffleId, RaffleStatus, Reservation,
    ReservationToken, Ticket, TicketId, TicketNumber, TicketStatus, UserId,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    raffles: HashMap<RaffleId, Raffle>,
    tickets: HashMap<TicketId, Ticket>,
    payments: HashMap<PaymentId, Payment>,
    reservations: HashMap<ReservationToken, Reservation>,
}

impl Tables {
    fn payment_by_external(&self, external_id: &ExternalId) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| &p.external_id == external_id)
    }
}

/// Store backed by process memory
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a raffle outside any transaction
    pub async fn seed_raffle(&self, raffle: Raffle) {
        self.tables.lock().await.raffles.insert(raffle.id, raffle);
    }

    /// Inserts tickets outside any transaction, skipping uniqueness checks
    pub async fn seed_tickets(&self, tickets: impl IntoIterator<Item = Ticket>) {
        let mut tables = self.tables.lock().await;
        for ticket in tickets {
            tables.tickets.insert(ticket.id, ticket);
        }
    }

    /// Current state of a raffle
    pub async fn raffle(&self, id: RaffleId) -> Option<Raffle> {
        self.tables.lock().await.raffles.get(&id).cloned()
    }

    /// All tickets of a raffle, ordered by number
    pub async fn tickets(&self, raffle_id: RaffleId) -> Vec<Ticket> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.raffle_id == raffle_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.number);
        tickets
    }

    /// A payment by provider id
    pub async fn payment(&self, external_id: &ExternalId) -> Option<Payment> {
        self.tables
            .lock()
            .await
            .payment_by_external(external_id)
            .cloned()
    }

    /// Every stored payment
    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.lock().await.payments.values().cloned().collect()
    }

    /// Every stored reservation
    pub async fn reservations(&self) -> Vec<Reservation> {
        self.tables
            .lock()
            .await
            .reservations
            .values()
            .cloned()
            .collect()
    }
}

impl RaffleStore for InMemoryStore {
    fn begin(&self) -> BoxFuture<'_, StoreResult<Box<dyn StoreTx>>> {
        Box::pin(async move {
            let guard = Arc::clone(&self.tables).lock_owned().await;
            let staged = guard.clone();
            Ok(Box::new(MemoryTx { guard, staged }) as Box<dyn StoreTx>)
        })
    }

    fn ping(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

impl MemoryTx {
    fn occupied(&self, raffle_id: RaffleId) -> BTreeSet<TicketNumber> {
        self.staged
            .tickets
            .values()
            .filter(|t| t.raffle_id == raffle_id)
            .map(|t| t.number)
            .collect()
    }

    fn missing_raffle(id: RaffleId) -> StoreError {
        StoreError::Conflict(format!("raffle {id} does not exist"))
    }
}

fn ready<T: Send + 'static>(value: StoreResult<T>) -> BoxFuture<'static, StoreResult<T>> {
    Box::pin(futures::future::ready(value))
}

impl StoreTx for MemoryTx {
    fn insert_raffle<'a>(&'a mut self, raffle: &'a Raffle) -> BoxFuture<'a, StoreResult<()>> {
        if self.staged.raffles.contains_key(&raffle.id) {
            return ready(Err(StoreError::Conflict(format!(
                "raffle {} already exists",
                raffle.id
            ))));
        }
        self.staged.raffles.insert(raffle.id, raffle.clone());
        ready(Ok(()))
    }

    fn get_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<Option<Raffle>>> {
        ready(Ok(self.staged.raffles.get(&id).cloned()))
    }

    fn lock_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<Option<Raffle>>> {
        self.get_raffle(id)
    }

    fn list_raffles(
        &mut self,
        status: Option<RaffleStatus>,
    ) -> BoxFuture<'_, StoreResult<Vec<Raffle>>> {
        let mut raffles: Vec<Raffle> = self
            .staged
            .raffles
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        raffles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ready(Ok(raffles))
    }

    fn set_promotion(
        &mut self,
        id: RaffleId,
        promotion: Option<Promotion>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let result = match self.staged.raffles.get_mut(&id) {
            Some(raffle) => {
                raffle.promotion = promotion;
                Ok(())
            }
            None => Err(Self::missing_raffle(id)),
        };
        ready(result)
    }

    fn close_raffle(&mut self, id: RaffleId, winner: TicketId) -> BoxFuture<'_, StoreResult<()>> {
        let result = match self.staged.raffles.get_mut(&id) {
            Some(raffle) => {
                raffle.status = RaffleStatus::Closed;
                raffle.winner = Some(winner);
                Ok(())
            }
            None => Err(Self::missing_raffle(id)),
        };
        ready(result)
    }

    fn delete_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<()>> {
        let referenced = self.staged.payments.values().any(|p| p.raffle_id == id)
            || self.staged.tickets.values().any(|t| t.raffle_id == id);
        if referenced {
            return ready(Err(StoreError::Conflict(format!(
                "raffle {id} is still referenced"
            ))));
        }
        self.staged.reservations.retain(|_, r| r.raffle_id != id);
        self.staged.raffles.remove(&id);
        ready(Ok(()))
    }

    fn occupied_numbers(
        &mut self,
        raffle_id: RaffleId,
    ) -> BoxFuture<'_, StoreResult<BTreeSet<TicketNumber>>> {
        ready(Ok(self.occupied(raffle_id)))
    }

    fn insert_tickets<'a>(&'a mut self, tickets: &'a [Ticket]) -> BoxFuture<'a, StoreResult<()>> {
        let mut taken: HashMap<RaffleId, BTreeSet<TicketNumber>> = HashMap::new();
        for ticket in tickets {
            if !self.staged.raffles.contains_key(&ticket.raffle_id) {
                return ready(Err(Self::missing_raffle(ticket.raffle_id)));
            }
            let occupied = taken
                .entry(ticket.raffle_id)
                .or_insert_with(|| self.occupied(ticket.raffle_id));
            if !occupied.insert(ticket.number) {
                return ready(Err(StoreError::Conflict(format!(
                    "number {} already taken in raffle {}",
                    ticket.number, ticket.raffle_id
                ))));
            }
        }
        for ticket in tickets {
            self.staged.tickets.insert(ticket.id, ticket.clone());
        }
        ready(Ok(()))
    }

    fn lock_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
    ) -> BoxFuture<'a, StoreResult<Vec<Ticket>>> {
        let tickets = ids
            .iter()
            .filter_map(|id| self.staged.tickets.get(id).cloned())
            .collect();
        ready(Ok(tickets))
    }

    fn raffle_tickets(&mut self, raffle_id: RaffleId) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        let mut tickets: Vec<Ticket> = self
            .staged
            .tickets
            .values()
            .filter(|t| t.raffle_id == raffle_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.number);
        ready(Ok(tickets))
    }

    fn owner_tickets(&mut self, owner: UserId) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        let mut tickets: Vec<Ticket> = self
            .staged
            .tickets
            .values()
            .filter(|t| t.owner == owner)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        ready(Ok(tickets))
    }

    fn attach_tickets<'a>(
        &'a mut self,
        payment_id: PaymentId,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, StoreResult<()>> {
        for ticket in tickets {
            if let Some(row) = self.staged.tickets.get_mut(&ticket.id) {
                row.payment_id = Some(payment_id);
                row.price = ticket.price;
            }
        }
        ready(Ok(()))
    }

    fn settle_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
        payment_id: PaymentId,
        paid_at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        let mut changed = 0;
        for id in ids {
            if let Some(row) = self.staged.tickets.get_mut(id) {
                if row.is_pending() {
                    row.status = TicketStatus::Paid { paid_at };
                    row.payment_id = Some(payment_id);
                    changed += 1;
                }
            }
        }
        ready(Ok(changed))
    }

    fn delete_pending_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
    ) -> BoxFuture<'a, StoreResult<u64>> {
        let mut deleted = 0;
        for id in ids {
            if self.staged.tickets.get(id).is_some_and(Ticket::is_pending) {
                self.staged.tickets.remove(id);
                deleted += 1;
            }
        }
        ready(Ok(deleted))
    }

    fn delete_pending_created_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        let expired: Vec<TicketId> = self
            .staged
            .tickets
            .values()
            .filter(|t| t.is_pending() && t.created_at <= cutoff)
            .map(|t| t.id)
            .collect();
        let removed = expired
            .iter()
            .filter_map(|id| self.staged.tickets.remove(id))
            .collect();
        ready(Ok(removed))
    }

    fn delete_pending_for_raffle(
        &mut self,
        raffle_id: RaffleId,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        let before = self.staged.tickets.len();
        self.staged
            .tickets
            .retain(|_, t| !(t.raffle_id == raffle_id && t.is_pending()));
        ready(Ok((before - self.staged.tickets.len()) as u64))
    }

    fn insert_payment<'a>(&'a mut self, payment: &'a Payment) -> BoxFuture<'a, StoreResult<()>> {
        if self
            .staged
            .payment_by_external(&payment.external_id)
            .is_some()
        {
            return ready(Err(StoreError::Conflict(format!(
                "payment {} already exists",
                payment.external_id
            ))));
        }
        if !self.staged.raffles.contains_key(&payment.raffle_id) {
            return ready(Err(Self::missing_raffle(payment.raffle_id)));
        }
        self.staged.payments.insert(payment.id, payment.clone());
        ready(Ok(()))
    }

    fn get_payment<'a>(
        &'a mut self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, StoreResult<Option<Payment>>> {
        ready(Ok(self.staged.payment_by_external(external_id).cloned()))
    }

    fn lock_payment<'a>(
        &'a mut self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, StoreResult<Option<Payment>>> {
        self.get_payment(external_id)
    }

    fn update_payment_status(
        &mut self,
        id: PaymentId,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let result = match self.staged.payments.get_mut(&id) {
            Some(payment) => {
                payment.status = status;
                payment.updated_at = at;
                Ok(())
            }
            None => Err(StoreError::Conflict(format!("payment {id} does not exist"))),
        };
        ready(result)
    }

    fn pending_payments(
        &mut self,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Payment>>> {
        let mut payments: Vec<Payment> = self
            .staged
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at >= since)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        ready(Ok(payments))
    }

    fn insert_reservation<'a>(
        &'a mut self,
        reservation: &'a Reservation,
    ) -> BoxFuture<'a, StoreResult<()>> {
        self.staged
            .reservations
            .insert(reservation.token, reservation.clone());
        ready(Ok(()))
    }

    fn get_reservation(
        &mut self,
        token: ReservationToken,
    ) -> BoxFuture<'_, StoreResult<Option<Reservation>>> {
        ready(Ok(self.staged.reservations.get(&token).cloned()))
    }

    fn take_reservation(
        &mut self,
        token: ReservationToken,
    ) -> BoxFuture<'_, StoreResult<Option<Reservation>>> {
        ready(Ok(self.staged.reservations.remove(&token)))
    }

    fn delete_expired_reservations(
        &mut self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        let before = self.staged.reservations.len();
        self.staged.reservations.retain(|_, r| !r.is_expired(now));
        ready(Ok((before - self.staged.reservations.len()) as u64))
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        ready(Ok(()))
    }
}
