//! `PostgreSQL` storage for the raffle core.
//!
//! [`PostgresStore`] implements [`rifa_core::store::RaffleStore`] on a sqlx
//! connection pool:
//!
//! - one database transaction per [`rifa_core::store::StoreTx`]
//! - `SELECT ... FOR UPDATE` row locks for the raffle and payment locks
//! - unique constraints on `(raffle_id, number)` and `external_id`
//! - bundled migrations, applied with [`PostgresStore::migrate`]
//!
//! # Example
//!
//! ```ignore
//! use rifa_postgres::PostgresStore;
//!
//! let store = PostgresStore::connect("postgres://localhost/rifa", 10).await?;
//! store.migrate().await?;
//! let service = RaffleService::new(Arc::new(store), gateway, clock, config);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;

pub use store::PostgresStore;
