//! # Rifa Server
//!
//! HTTP surface for the raffle service: the public catalogue, purchases and
//! PIX charges, the Efí webhook, and operator endpoints.
//!
//! Identity is established upstream and forwarded in `X-User-Id`. Operator
//! endpoints require `X-Admin-Key`.

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
