//! Buyer payment endpoints.
//!
//! - POST /api/charges - Open a PIX charge for held tickets or a reservation
//! - GET /api/payments/:external_id/status - Poll a charge, settling it if paid
//! - POST /api/tickets/:id/retry - New charge for a pending ticket
//! - GET /api/dashboard - The buyer's tickets

use crate::error::AppError;
use crate::extractors::CurrentUser;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rifa_core::gateway::Payer;
use rifa_core::types::{ExternalId, PaymentStatus, ReservationToken, TicketId};
use rifa_runtime::views::DashboardEntry;
use rifa_runtime::{ChargeInfo, ChargeTarget};
use serde::{Deserialize, Serialize};

/// Payer details as submitted at checkout
#[derive(Debug, Deserialize)]
pub struct PayerBody {
    /// Full name
    pub name: String,
    /// CPF, punctuation allowed
    pub tax_id: String,
}

impl From<PayerBody> for Payer {
    fn from(body: PayerBody) -> Self {
        Self::new(body.name, &body.tax_id)
    }
}

/// Charge request. Exactly one of `tickets` and `reservation` must be given.
#[derive(Debug, Deserialize)]
pub struct ChargeBody {
    /// Held manual tickets
    #[serde(default)]
    pub tickets: Vec<TicketId>,
    /// Pooled reservation token
    #[serde(default)]
    pub reservation: Option<ReservationToken>,
    /// Who pays
    pub payer: PayerBody,
}

/// Open a charge.
///
/// # Errors
///
/// 422 when neither or both targets are given, 410 when the hold lapsed,
/// 502/504 when the provider fails.
pub async fn create_charge(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Json(body): Json<ChargeBody>,
) -> Result<(StatusCode, Json<ChargeInfo>), AppError> {
    let target = match (body.tickets.is_empty(), body.reservation) {
        (false, None) => ChargeTarget::Tickets(body.tickets),
        (true, Some(token)) => ChargeTarget::Reservation(token),
        _ => {
            return Err(AppError::validation(
                "give either tickets or a reservation",
            ));
        }
    };
    let charge = state
        .service
        .request_charge(owner, target, body.payer.into())
        .await?;
    Ok((StatusCode::CREATED, Json(charge)))
}

/// Poll response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Charge
    pub external_id: ExternalId,
    /// Current status
    pub status: PaymentStatus,
}

/// Poll a charge.
///
/// # Errors
///
/// 404 for an unknown charge, 403 for someone else's.
pub async fn payment_status(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Path(external_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let external_id = ExternalId::new(external_id);
    let status = state
        .service
        .poll_status(&external_id, Some(owner))
        .await?;
    Ok(Json(StatusResponse {
        external_id,
        status,
    }))
}

/// Retry body
#[derive(Debug, Deserialize)]
pub struct RetryBody {
    /// Who pays
    pub payer: PayerBody,
}

/// Charge a pending ticket again.
///
/// # Errors
///
/// 410 when the hold lapsed (the ticket is released), 403 for someone else's ticket.
pub async fn retry_payment(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Path(ticket_id): Path<TicketId>,
    Json(body): Json<RetryBody>,
) -> Result<(StatusCode, Json<ChargeInfo>), AppError> {
    let charge = state
        .service
        .retry_payment(owner, ticket_id, body.payer.into())
        .await?;
    Ok((StatusCode::CREATED, Json(charge)))
}

/// The buyer's tickets grouped by raffle.
///
/// # Errors
///
/// Store failures only.
pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
) -> Result<Json<Vec<DashboardEntry>>, AppError> {
    Ok(Json(state.service.dashboard(owner).await?))
}
