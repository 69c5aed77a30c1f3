//! Storage contract.
//!
//! All multi-row effects run inside a [`StoreTx`]. A transaction that is
//! dropped without [`StoreTx::commit`] rolls back. Implementations must make
//! `lock_raffle` and `lock_payment` exclusive for the lifetime of the
//! transaction, which is what serializes allocation per raffle and
//! finalization per payment.
//!
//! Uniqueness of `(raffle_id, number)` on tickets and of `external_id` on
//! payments is enforced by the store and reported as [`StoreError::Conflict`].

use crate::pricing::Promotion;
use crate::types::{
    ExternalId, Payment, PaymentId, PaymentStatus, Raffle, RaffleId, RaffleStatus, Reservation,
    ReservationToken, Ticket, TicketId, TicketNumber, UserId,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use thiserror::Error;

/// Storage failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness or reference constraint was violated
    #[error("constraint violated: {0}")]
    Conflict(String),
    /// The database failed
    #[error("database error: {0}")]
    Database(String),
    /// A stored row could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result alias for storage calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Opens transactions
pub trait RaffleStore: Send + Sync {
    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available.
    fn begin(&self) -> BoxFuture<'_, StoreResult<Box<dyn StoreTx>>>;

    /// Cheap liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the store is unreachable.
    fn ping(&self) -> BoxFuture<'_, StoreResult<()>>;
}

/// A unit of work against the store
#[allow(clippy::module_name_repetitions)]
pub trait StoreTx: Send {
    // ---------------------------------------------------------------- raffles

    /// Inserts a raffle.
    fn insert_raffle<'a>(&'a mut self, raffle: &'a Raffle) -> BoxFuture<'a, StoreResult<()>>;

    /// Reads a raffle without locking it.
    fn get_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<Option<Raffle>>>;

    /// Reads a raffle and holds an exclusive lock on it until commit.
    fn lock_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<Option<Raffle>>>;

    /// Lists raffles, newest first, optionally filtered by status.
    fn list_raffles(
        &mut self,
        status: Option<RaffleStatus>,
    ) -> BoxFuture<'_, StoreResult<Vec<Raffle>>>;

    /// Replaces the raffle's promotion.
    fn set_promotion(
        &mut self,
        id: RaffleId,
        promotion: Option<Promotion>,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Marks the raffle closed with the given winner.
    fn close_raffle(&mut self, id: RaffleId, winner: TicketId) -> BoxFuture<'_, StoreResult<()>>;

    /// Deletes the raffle. Fails with `Conflict` while payments reference it.
    fn delete_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<()>>;

    // ---------------------------------------------------------------- tickets

    /// Numbers currently held or sold in the raffle.
    fn occupied_numbers(
        &mut self,
        raffle_id: RaffleId,
    ) -> BoxFuture<'_, StoreResult<BTreeSet<TicketNumber>>>;

    /// Inserts tickets. Fails with `Conflict` if any number is taken.
    fn insert_tickets<'a>(&'a mut self, tickets: &'a [Ticket]) -> BoxFuture<'a, StoreResult<()>>;

    /// Loads tickets by id, locking them until commit. Missing ids are skipped.
    fn lock_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
    ) -> BoxFuture<'a, StoreResult<Vec<Ticket>>>;

    /// All tickets of a raffle.
    fn raffle_tickets(&mut self, raffle_id: RaffleId) -> BoxFuture<'_, StoreResult<Vec<Ticket>>>;

    /// All tickets of a user, newest first.
    fn owner_tickets(&mut self, owner: UserId) -> BoxFuture<'_, StoreResult<Vec<Ticket>>>;

    /// Points tickets at a payment and rewrites their price snapshot.
    fn attach_tickets<'a>(
        &'a mut self,
        payment_id: PaymentId,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Marks pending tickets paid and points them at the payment.
    /// Returns how many rows changed.
    fn settle_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
        payment_id: PaymentId,
        paid_at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<u64>>;

    /// Deletes the given tickets if still pending. Returns how many went.
    fn delete_pending_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
    ) -> BoxFuture<'a, StoreResult<u64>>;

    /// Deletes pending tickets created at or before `cutoff` and returns them.
    fn delete_pending_created_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Ticket>>>;

    /// Deletes every pending ticket of a raffle.
    fn delete_pending_for_raffle(&mut self, raffle_id: RaffleId)
    -> BoxFuture<'_, StoreResult<u64>>;

    // --------------------------------------------------------------- payments

    /// Inserts a payment. Fails with `Conflict` on a duplicate external id.
    fn insert_payment<'a>(&'a mut self, payment: &'a Payment) -> BoxFuture<'a, StoreResult<()>>;

    /// Reads a payment without locking it.
    fn get_payment<'a>(
        &'a mut self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, StoreResult<Option<Payment>>>;

    /// Reads a payment and holds an exclusive lock on it until commit.
    fn lock_payment<'a>(
        &'a mut self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, StoreResult<Option<Payment>>>;

    /// Records a status change.
    fn update_payment_status(
        &mut self,
        id: PaymentId,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Pending payments created at or after `since`, oldest first.
    fn pending_payments(
        &mut self,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Payment>>>;

    // ----------------------------------------------------------- reservations

    /// Stores a pooled reservation.
    fn insert_reservation<'a>(
        &'a mut self,
        reservation: &'a Reservation,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Reads a reservation.
    fn get_reservation(
        &mut self,
        token: ReservationToken,
    ) -> BoxFuture<'_, StoreResult<Option<Reservation>>>;

    /// Removes and returns a reservation. At most one caller gets it.
    fn take_reservation(
        &mut self,
        token: ReservationToken,
    ) -> BoxFuture<'_, StoreResult<Option<Reservation>>>;

    /// Purges reservations expired at `now`. Returns how many went.
    fn delete_expired_reservations(&mut self, now: DateTime<Utc>)
    -> BoxFuture<'_, StoreResult<u64>>;

    // ------------------------------------------------------------------------

    /// Makes every change in this transaction durable.
    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>>;
}
