//! Public raffle endpoints.
//!
//! - GET /api/raffles - List raffles with live price and stock
//! - GET /api/raffles/:id - One raffle with its occupied numbers
//! - POST /api/raffles/:id/purchase - Hold numbers or reserve a quantity

use crate::error::AppError;
use crate::extractors::CurrentUser;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rifa_core::types::{Allocation, RaffleId, RaffleStatus, Reservation, Ticket, TicketNumber};
use rifa_runtime::PurchaseRequest;
use rifa_runtime::views::{RaffleDetail, RaffleSummary};
use serde::{Deserialize, Serialize};

/// Listing filter
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// `active` (default), `closed` or `all`
    pub status: Option<String>,
}

/// List raffles.
///
/// # Errors
///
/// 422 for an unknown status filter.
pub async fn list_raffles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RaffleSummary>>, AppError> {
    let status = match query.status.as_deref() {
        None => Some(RaffleStatus::Active),
        Some("all") => None,
        Some(raw) => Some(
            RaffleStatus::parse(raw)
                .ok_or_else(|| AppError::validation(format!("unknown status '{raw}'")))?,
        ),
    };
    Ok(Json(state.service.list_raffles(status).await?))
}

/// Raffle page.
///
/// # Errors
///
/// 404 for an unknown raffle.
pub async fn get_raffle(
    State(state): State<AppState>,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<RaffleDetail>, AppError> {
    Ok(Json(state.service.raffle_detail(raffle_id).await?))
}

/// Purchase body: chosen numbers for manual raffles, a quantity for pooled ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PurchaseBody {
    /// Manual
    Numbers {
        /// Numbers wanted
        numbers: Vec<TicketNumber>,
    },
    /// Pooled
    Quantity {
        /// How many tickets
        quantity: u32,
    },
}

impl From<PurchaseBody> for PurchaseRequest {
    fn from(body: PurchaseBody) -> Self {
        match body {
            PurchaseBody::Numbers { numbers } => Self::Numbers(numbers),
            PurchaseBody::Quantity { quantity } => Self::Quantity(quantity),
        }
    }
}

/// Purchase result.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseResponse {
    /// Numbers held for the buyer, pending payment
    Tickets {
        /// Held tickets
        tickets: Vec<Ticket>,
    },
    /// Quantity reserved; numbers are drawn once the payment settles
    Reservation {
        /// Reservation to charge
        reservation: Reservation,
    },
}

impl From<Allocation> for PurchaseResponse {
    fn from(allocation: Allocation) -> Self {
        match allocation {
            Allocation::Numbered(tickets) => Self::Tickets { tickets },
            Allocation::Reserved(reservation) => Self::Reservation { reservation },
        }
    }
}

/// Hold numbers or reserve a quantity.
///
/// # Errors
///
/// 409 when numbers are taken or supply is short, 404 for an unknown raffle.
pub async fn purchase(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Path(raffle_id): Path<RaffleId>,
    Json(body): Json<PurchaseBody>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    let allocation = state
        .service
        .purchase(raffle_id, owner, body.into())
        .await?;
    Ok((StatusCode::CREATED, Json(allocation.into())))
}
