//! Router configuration for the raffle server.

use crate::handlers::{admin, health, payments, raffles, webhook};
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - Health checks
/// - Public raffle catalogue and purchases under `/api`
/// - Provider webhooks under `/webhook`
/// - Operator endpoints under `/admin`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/raffles", get(raffles::list_raffles))
        .route("/raffles/:id", get(raffles::get_raffle))
        .route("/raffles/:id/purchase", post(raffles::purchase))
        .route("/charges", post(payments::create_charge))
        .route(
            "/payments/:external_id/status",
            get(payments::payment_status),
        )
        .route("/tickets/:id/retry", post(payments::retry_payment))
        .route("/dashboard", get(payments::dashboard));

    let webhook_routes = Router::new()
        .route("/efi", post(webhook::efi_webhook))
        .route("/efi/pix", post(webhook::efi_webhook));

    let admin_routes = Router::new()
        .route("/raffles", post(admin::create_raffle))
        .route("/raffles/:id", delete(admin::delete_raffle))
        .route(
            "/raffles/:id/promotion",
            put(admin::set_promotion).delete(admin::remove_promotion),
        )
        .route("/raffles/:id/draw", post(admin::draw))
        .route("/raffles/:id/winner", get(admin::winner))
        .route("/sweep", post(admin::sweep))
        .route(
            "/payments/:external_id/finalize",
            post(admin::finalize),
        )
        .route("/payments/:external_id/close", post(admin::close_payment));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api", api_routes)
        .nest("/webhook", webhook_routes)
        .nest("/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
