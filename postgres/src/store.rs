//! `PostgreSQL` implementation of the storage contract.
//!
//! Every [`StoreTx`] wraps one database transaction. Exclusive locks are row
//! locks taken with `SELECT ... FOR UPDATE`; uniqueness comes from the
//! `UNIQUE (raffle_id, number)` and `UNIQUE (external_id)` constraints, whose
//! violations surface as [`StoreError::Conflict`].

use crate::rows::{
    self, PAYMENT_COLUMNS, PaymentRow, RAFFLE_COLUMNS, RESERVATION_COLUMNS, RaffleRow,
    ReservationRow, TICKET_COLUMNS, TicketRow,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rifa_core::pricing::Promotion;
use rifa_core::store::{RaffleStore, StoreError, StoreResult, StoreTx};
use rifa_core::types::{
    ExternalId, Payment, PaymentId, PaymentScope, PaymentStatus, Raffle, RaffleId, RaffleStatus,
    Reservation, ReservationToken, Ticket, TicketId, TicketNumber, TicketStatus, UserId,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Maps a sqlx error, turning constraint violations into `Conflict`.
fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                metrics::counter!("rifa_store_conflicts_total", "operation" => context)
                    .increment(1);
                return StoreError::Conflict(format!("{context}: {db_err}"));
            }
        }
        StoreError::Database(format!("{context}: {e}"))
    }
}

fn uuids<T: Copy>(ids: &[T], as_uuid: impl Fn(T) -> Uuid) -> Vec<Uuid> {
    ids.iter().copied().map(as_uuid).collect()
}

/// `PostgreSQL` raffle store.
///
/// # Example
///
/// ```no_run
/// use rifa_postgres::PostgresStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresStore::connect("postgres://localhost/rifa", 10).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    /// Applies the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RaffleStore for PostgresStore {
    fn begin(&self) -> BoxFuture<'_, StoreResult<Box<dyn StoreTx>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(db_error("begin"))?;
            Ok(Box::new(PgTx { tx }) as Box<dyn StoreTx>)
        })
    }

    fn ping(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error("ping"))?;
            Ok(())
        })
    }
}

/// One open database transaction. Dropping it rolls back.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    async fn fetch_raffle(&mut self, id: RaffleId, lock: bool) -> StoreResult<Option<Raffle>> {
        let sql = format!(
            "SELECT {RAFFLE_COLUMNS} FROM raffles WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, RaffleRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(self.conn())
            .await
            .map_err(db_error("fetch raffle"))?
            .map(rows::raffle)
            .transpose()
    }

    async fn fetch_payment(
        &mut self,
        external_id: &ExternalId,
        lock: bool,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(external_id.as_str())
            .fetch_optional(self.conn())
            .await
            .map_err(db_error("fetch payment"))?;
        match row {
            Some(row) => self.hydrate_payment(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn hydrate_payment(&mut self, row: PaymentRow) -> StoreResult<Payment> {
        let tickets: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT ticket_id FROM payment_tickets WHERE payment_id = $1 ORDER BY position",
        )
        .bind(row.0)
        .fetch_all(self.conn())
        .await
        .map_err(db_error("fetch payment tickets"))?;
        rows::payment(row, tickets.into_iter().map(|(id,)| id).collect())
    }

    async fn fetch_tickets(&mut self, filter: &str, bind: Uuid) -> StoreResult<Vec<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE {filter}");
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(bind)
            .fetch_all(self.conn())
            .await
            .map_err(db_error("fetch tickets"))?
            .into_iter()
            .map(rows::ticket)
            .collect()
    }
}

impl StoreTx for PgTx {
    fn insert_raffle<'a>(&'a mut self, raffle: &'a Raffle) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let (promo_price, promo_ends_at) = match raffle.promotion {
                Some(promo) => (Some(rows::cents(promo.price)?), Some(promo.ends_at)),
                None => (None, None),
            };
            sqlx::query(
                r"
                INSERT INTO raffles (
                    id, title, description, image_url, price_cents, promo_price_cents,
                    promo_ends_at, total_numbers, policy, status, winner_ticket_id, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ",
            )
            .bind(*raffle.id.as_uuid())
            .bind(&raffle.title)
            .bind(&raffle.description)
            .bind(&raffle.image_url)
            .bind(rows::cents(raffle.price)?)
            .bind(promo_price)
            .bind(promo_ends_at)
            .bind(rows::int(raffle.total_numbers, "total_numbers")?)
            .bind(raffle.policy.as_str())
            .bind(raffle.status.as_str())
            .bind(raffle.winner.map(|id| *id.as_uuid()))
            .bind(raffle.created_at)
            .execute(self.conn())
            .await
            .map_err(db_error("insert raffle"))?;
            Ok(())
        })
    }

    fn get_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<Option<Raffle>>> {
        Box::pin(self.fetch_raffle(id, false))
    }

    fn lock_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<Option<Raffle>>> {
        Box::pin(self.fetch_raffle(id, true))
    }

    fn list_raffles(
        &mut self,
        status: Option<RaffleStatus>,
    ) -> BoxFuture<'_, StoreResult<Vec<Raffle>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {RAFFLE_COLUMNS} FROM raffles \
                 WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC"
            );
            sqlx::query_as::<_, RaffleRow>(&sql)
                .bind(status.map(RaffleStatus::as_str))
                .fetch_all(self.conn())
                .await
                .map_err(db_error("list raffles"))?
                .into_iter()
                .map(rows::raffle)
                .collect()
        })
    }

    fn set_promotion(
        &mut self,
        id: RaffleId,
        promotion: Option<Promotion>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let (price, ends_at) = match promotion {
                Some(promo) => (Some(rows::cents(promo.price)?), Some(promo.ends_at)),
                None => (None, None),
            };
            sqlx::query(
                "UPDATE raffles SET promo_price_cents = $2, promo_ends_at = $3 WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .bind(price)
            .bind(ends_at)
            .execute(self.conn())
            .await
            .map_err(db_error("set promotion"))?;
            Ok(())
        })
    }

    fn close_raffle(&mut self, id: RaffleId, winner: TicketId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("UPDATE raffles SET status = 'closed', winner_ticket_id = $2 WHERE id = $1")
                .bind(*id.as_uuid())
                .bind(*winner.as_uuid())
                .execute(self.conn())
                .await
                .map_err(db_error("close raffle"))?;
            Ok(())
        })
    }

    fn delete_raffle(&mut self, id: RaffleId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM raffles WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(self.conn())
                .await
                .map_err(db_error("delete raffle"))?;
            Ok(())
        })
    }

    fn occupied_numbers(
        &mut self,
        raffle_id: RaffleId,
    ) -> BoxFuture<'_, StoreResult<BTreeSet<TicketNumber>>> {
        Box::pin(async move {
            let numbers: Vec<(i32,)> = sqlx::query_as("SELECT number FROM tickets WHERE raffle_id = $1")
                .bind(*raffle_id.as_uuid())
                .fetch_all(self.conn())
                .await
                .map_err(db_error("occupied numbers"))?;
            numbers
                .into_iter()
                .map(|(n,)| rows::count(n, "number").map(TicketNumber::new))
                .collect()
        })
    }

    fn insert_tickets<'a>(&'a mut self, tickets: &'a [Ticket]) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            for ticket in tickets {
                let (status, paid_at) = match ticket.status {
                    TicketStatus::Pending => ("pending", None),
                    TicketStatus::Paid { paid_at } => ("paid", Some(paid_at)),
                };
                sqlx::query(
                    r"
                    INSERT INTO tickets (
                        id, raffle_id, owner_id, number, price_cents, payment_id, status,
                        paid_at, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ",
                )
                .bind(*ticket.id.as_uuid())
                .bind(*ticket.raffle_id.as_uuid())
                .bind(*ticket.owner.as_uuid())
                .bind(rows::int(ticket.number.get(), "number")?)
                .bind(rows::cents(ticket.price)?)
                .bind(ticket.payment_id.map(|id| *id.as_uuid()))
                .bind(status)
                .bind(paid_at)
                .bind(ticket.created_at)
                .execute(self.conn())
                .await
                .map_err(db_error("insert ticket"))?;
            }
            Ok(())
        })
    }

    fn lock_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
    ) -> BoxFuture<'a, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ANY($1) ORDER BY number FOR UPDATE"
            );
            sqlx::query_as::<_, TicketRow>(&sql)
                .bind(uuids(ids, |id| *id.as_uuid()))
                .fetch_all(self.conn())
                .await
                .map_err(db_error("lock tickets"))?
                .into_iter()
                .map(rows::ticket)
                .collect()
        })
    }

    fn raffle_tickets(&mut self, raffle_id: RaffleId) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            self.fetch_tickets("raffle_id = $1 ORDER BY number", *raffle_id.as_uuid())
                .await
        })
    }

    fn owner_tickets(&mut self, owner: UserId) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            self.fetch_tickets(
                "owner_id = $1 ORDER BY created_at DESC, number",
                *owner.as_uuid(),
            )
            .await
        })
    }

    fn attach_tickets<'a>(
        &'a mut self,
        payment_id: PaymentId,
        tickets: &'a [Ticket],
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            for ticket in tickets {
                sqlx::query("UPDATE tickets SET payment_id = $2, price_cents = $3 WHERE id = $1")
                    .bind(*ticket.id.as_uuid())
                    .bind(*payment_id.as_uuid())
                    .bind(rows::cents(ticket.price)?)
                    .execute(self.conn())
                    .await
                    .map_err(db_error("attach ticket"))?;
            }
            Ok(())
        })
    }

    fn settle_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
        payment_id: PaymentId,
        paid_at: DateTime<Utc>,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE tickets SET status = 'paid', paid_at = $3, payment_id = $2
                WHERE id = ANY($1) AND status = 'pending'
                ",
            )
            .bind(uuids(ids, |id| *id.as_uuid()))
            .bind(*payment_id.as_uuid())
            .bind(paid_at)
            .execute(self.conn())
            .await
            .map_err(db_error("settle tickets"))?;
            Ok(result.rows_affected())
        })
    }

    fn delete_pending_tickets<'a>(
        &'a mut self,
        ids: &'a [TicketId],
    ) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            let result =
                sqlx::query("DELETE FROM tickets WHERE id = ANY($1) AND status = 'pending'")
                    .bind(uuids(ids, |id| *id.as_uuid()))
                    .execute(self.conn())
                    .await
                    .map_err(db_error("delete pending tickets"))?;
            Ok(result.rows_affected())
        })
    }

    fn delete_pending_created_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            let sql = format!(
                "DELETE FROM tickets WHERE status = 'pending' AND created_at <= $1 \
                 RETURNING {TICKET_COLUMNS}"
            );
            sqlx::query_as::<_, TicketRow>(&sql)
                .bind(cutoff)
                .fetch_all(self.conn())
                .await
                .map_err(db_error("sweep pending tickets"))?
                .into_iter()
                .map(rows::ticket)
                .collect()
        })
    }

    fn delete_pending_for_raffle(
        &mut self,
        raffle_id: RaffleId,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let result =
                sqlx::query("DELETE FROM tickets WHERE raffle_id = $1 AND status = 'pending'")
                    .bind(*raffle_id.as_uuid())
                    .execute(self.conn())
                    .await
                    .map_err(db_error("release raffle holds"))?;
            Ok(result.rows_affected())
        })
    }

    fn insert_payment<'a>(&'a mut self, payment: &'a Payment) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO payments (
                    id, external_id, owner_id, raffle_id, amount_cents, status, policy,
                    quantity, created_at, updated_at, charge_expires_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(*payment.id.as_uuid())
            .bind(payment.external_id.as_str())
            .bind(*payment.owner.as_uuid())
            .bind(*payment.raffle_id.as_uuid())
            .bind(rows::cents(payment.amount)?)
            .bind(payment.status.as_str())
            .bind(payment.scope.policy().as_str())
            .bind(rows::int(payment.scope.ticket_count(), "quantity")?)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .bind(payment.charge_expires_at)
            .execute(self.conn())
            .await
            .map_err(db_error("insert payment"))?;

            if let PaymentScope::Manual { tickets } = &payment.scope {
                for (position, ticket_id) in tickets.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO payment_tickets (payment_id, ticket_id, position) \
                         VALUES ($1, $2, $3)",
                    )
                    .bind(*payment.id.as_uuid())
                    .bind(*ticket_id.as_uuid())
                    .bind(i32::try_from(position).unwrap_or(i32::MAX))
                    .execute(self.conn())
                    .await
                    .map_err(db_error("insert payment ticket"))?;
                }
            }
            Ok(())
        })
    }

    fn get_payment<'a>(
        &'a mut self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, StoreResult<Option<Payment>>> {
        Box::pin(self.fetch_payment(external_id, false))
    }

    fn lock_payment<'a>(
        &'a mut self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, StoreResult<Option<Payment>>> {
        Box::pin(self.fetch_payment(external_id, true))
    }

    fn update_payment_status(
        &mut self,
        id: PaymentId,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query("UPDATE payments SET status = $2, updated_at = $3 WHERE id = $1")
                .bind(*id.as_uuid())
                .bind(status.as_str())
                .bind(at)
                .execute(self.conn())
                .await
                .map_err(db_error("update payment status"))?;
            Ok(())
        })
    }

    fn pending_payments(
        &mut self,
        since: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<Vec<Payment>>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments \
                 WHERE status = 'pending' AND created_at >= $1 ORDER BY created_at"
            );
            let found = sqlx::query_as::<_, PaymentRow>(&sql)
                .bind(since)
                .fetch_all(self.conn())
                .await
                .map_err(db_error("pending payments"))?;
            let mut payments = Vec::with_capacity(found.len());
            for row in found {
                payments.push(self.hydrate_payment(row).await?);
            }
            Ok(payments)
        })
    }

    fn insert_reservation<'a>(
        &'a mut self,
        reservation: &'a Reservation,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO reservations (
                    token, raffle_id, owner_id, quantity, unit_price_cents, created_at, expires_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(*reservation.token.as_uuid())
            .bind(*reservation.raffle_id.as_uuid())
            .bind(*reservation.owner.as_uuid())
            .bind(rows::int(reservation.quantity, "quantity")?)
            .bind(rows::cents(reservation.unit_price)?)
            .bind(reservation.created_at)
            .bind(reservation.expires_at)
            .execute(self.conn())
            .await
            .map_err(db_error("insert reservation"))?;
            Ok(())
        })
    }

    fn get_reservation(
        &mut self,
        token: ReservationToken,
    ) -> BoxFuture<'_, StoreResult<Option<Reservation>>> {
        Box::pin(async move {
            let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE token = $1");
            sqlx::query_as::<_, ReservationRow>(&sql)
                .bind(*token.as_uuid())
                .fetch_optional(self.conn())
                .await
                .map_err(db_error("fetch reservation"))?
                .map(rows::reservation)
                .transpose()
        })
    }

    fn take_reservation(
        &mut self,
        token: ReservationToken,
    ) -> BoxFuture<'_, StoreResult<Option<Reservation>>> {
        Box::pin(async move {
            let sql =
                format!("DELETE FROM reservations WHERE token = $1 RETURNING {RESERVATION_COLUMNS}");
            sqlx::query_as::<_, ReservationRow>(&sql)
                .bind(*token.as_uuid())
                .fetch_optional(self.conn())
                .await
                .map_err(db_error("take reservation"))?
                .map(rows::reservation)
                .transpose()
        })
    }

    fn delete_expired_reservations(
        &mut self,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<u64>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM reservations WHERE expires_at <= $1")
                .bind(now)
                .execute(self.conn())
                .await
                .map_err(db_error("purge reservations"))?;
            Ok(result.rows_affected())
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        Box::pin(async move { self.tx.commit().await.map_err(db_error("commit")) })
    }
}
