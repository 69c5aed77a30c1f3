//! Application state for the raffle HTTP server.

use rifa_core::store::RaffleStore;
use rifa_runtime::RaffleService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via `Arc`) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Raffle operations
    pub service: Arc<RaffleService>,

    /// Expected `X-Admin-Key`. `None` disables the admin routes.
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(service: Arc<RaffleService>, admin_key: Option<String>) -> Self {
        Self {
            service,
            admin_key: admin_key.map(Arc::from),
        }
    }

    /// The store behind the service, for readiness checks
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RaffleStore> {
        self.service.store()
    }
}
