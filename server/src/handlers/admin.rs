//! Operator endpoints, all behind `X-Admin-Key`.
//!
//! - POST /admin/raffles - Create a raffle
//! - PUT/DELETE /admin/raffles/:id/promotion - Set or remove a promotion
//! - DELETE /admin/raffles/:id - Delete an untouched raffle
//! - POST /admin/raffles/:id/draw - Draw the winner
//! - GET /admin/raffles/:id/winner - Winner details
//! - POST /admin/sweep - Expiry sweep and payment reconciliation
//! - POST /admin/payments/:external_id/finalize - Force settlement
//! - POST /admin/payments/:external_id/close - Cancel or expire a pending payment

use crate::error::AppError;
use crate::extractors::AdminKey;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rifa_core::reconcile::Trigger;
use rifa_core::types::{
    AllocationPolicy, ExternalId, Money, PaymentStatus, Raffle, RaffleId, Ticket,
};
use rifa_runtime::views::{NewRaffle, WinnerDetails};
use rifa_runtime::{FinalizeOutcome, ReconcileReport, SweepReport};
use serde::{Deserialize, Serialize};

fn money(raw: &str, field: &str) -> Result<Money, AppError> {
    Money::parse_decimal(raw)
        .ok_or_else(|| AppError::validation(format!("{field} must be a decimal amount like 10.00")))
}

/// New raffle
#[derive(Debug, Deserialize)]
pub struct CreateRaffleBody {
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Cover image
    #[serde(default)]
    pub image_url: Option<String>,
    /// Ticket price as a decimal string
    pub price: String,
    /// Size of the number space
    pub total_numbers: u32,
    /// `manual` or `pooled`
    pub policy: AllocationPolicy,
}

/// Create a raffle.
///
/// # Errors
///
/// 422 for an empty title, a zero or malformed price, or zero numbers.
pub async fn create_raffle(
    _admin: AdminKey,
    State(state): State<AppState>,
    Json(body): Json<CreateRaffleBody>,
) -> Result<(StatusCode, Json<Raffle>), AppError> {
    let raffle = state
        .service
        .create_raffle(NewRaffle {
            price: money(&body.price, "price")?,
            title: body.title,
            description: body.description,
            image_url: body.image_url,
            total_numbers: body.total_numbers,
            policy: body.policy,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(raffle)))
}

/// Promotion
#[derive(Debug, Deserialize)]
pub struct PromotionBody {
    /// Promotional price as a decimal string
    pub price: String,
    /// End instant, RFC 3339 or `YYYY-MM-DD HH:MM`
    pub ends_at: String,
}

/// Set a promotion.
///
/// # Errors
///
/// 422 for a price not below the base price or an unreadable end time.
pub async fn set_promotion(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(raffle_id): Path<RaffleId>,
    Json(body): Json<PromotionBody>,
) -> Result<Json<Raffle>, AppError> {
    let price = money(&body.price, "price")?;
    Ok(Json(
        state
            .service
            .set_promotion(raffle_id, price, &body.ends_at)
            .await?,
    ))
}

/// Remove the promotion.
///
/// # Errors
///
/// 404 for an unknown raffle.
pub async fn remove_promotion(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<Raffle>, AppError> {
    Ok(Json(state.service.remove_promotion(raffle_id).await?))
}

/// Delete a raffle nobody bought into.
///
/// # Errors
///
/// 422 when tickets or payments exist, 409 when closed.
pub async fn delete_raffle(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<StatusCode, AppError> {
    state.service.delete_raffle(raffle_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Draw the winner and close the raffle.
///
/// # Errors
///
/// 404 when no ticket is paid, 409 when already drawn.
pub async fn draw(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.service.draw(raffle_id).await?))
}

/// Winner details.
///
/// # Errors
///
/// 404 when the raffle has not been drawn.
pub async fn winner(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<WinnerDetails>, AppError> {
    Ok(Json(state.service.winner(raffle_id).await?))
}

/// Sweep result
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// Released holds and reservations
    pub sweep: SweepReport,
    /// Pending payments checked with the provider
    pub reconcile: ReconcileReport,
}

/// Run the expiry sweep and then reconcile pending payments.
///
/// # Errors
///
/// Store failures.
pub async fn sweep(
    _admin: AdminKey,
    State(state): State<AppState>,
) -> Result<Json<SweepResponse>, AppError> {
    let sweep = state.service.sweep_expired().await?;
    let reconcile = state.service.reconcile_pending().await?;
    Ok(Json(SweepResponse { sweep, reconcile }))
}

/// Settlement result
#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    /// Charge
    pub external_id: ExternalId,
    /// Whether this call settled it
    pub finalized: bool,
    /// Tickets that became paid in this call
    pub tickets: Vec<Ticket>,
}

/// Force settlement of a payment confirmed out of band.
///
/// # Errors
///
/// 409 for a cancelled or expired payment, 410 when its tickets were reclaimed.
pub async fn finalize(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<FinalizeResponse>, AppError> {
    let external_id = ExternalId::new(external_id);
    let outcome = state
        .service
        .finalize(&external_id, Trigger::Operator, None)
        .await?;
    let (finalized, tickets) = match outcome {
        FinalizeOutcome::Finalized { tickets, .. } => (true, tickets),
        FinalizeOutcome::AlreadyFinalized(_) => (false, Vec::new()),
    };
    Ok(Json(FinalizeResponse {
        external_id,
        finalized,
        tickets,
    }))
}

/// Close body
#[derive(Debug, Deserialize)]
pub struct CloseBody {
    /// `cancelled` or `expired`
    pub status: PaymentStatus,
}

/// Close response
#[derive(Debug, Serialize)]
pub struct CloseResponse {
    /// Charge
    pub external_id: ExternalId,
    /// Status after the call
    pub status: PaymentStatus,
}

/// Cancel or expire a pending payment.
///
/// # Errors
///
/// 422 for a target status other than cancelled or expired.
pub async fn close_payment(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Json(body): Json<CloseBody>,
) -> Result<Json<CloseResponse>, AppError> {
    let external_id = ExternalId::new(external_id);
    let status = state
        .service
        .close_payment(&external_id, body.status, Trigger::Operator)
        .await?;
    Ok(Json(CloseResponse {
        external_id,
        status,
    }))
}
