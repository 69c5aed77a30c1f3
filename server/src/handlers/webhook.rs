//! Provider notifications.
//!
//! The body is taken as raw bytes so the signature is checked against
//! exactly what was sent.

use crate::error::AppError;
use crate::extractors::Signature;
use crate::state::AppState;
use axum::{Json, body::Bytes, extract::State};
use rifa_runtime::NotificationAck;

/// POST /webhook/efi
///
/// # Errors
///
/// 401 for a bad signature. Unknown charges are acknowledged, not rejected,
/// so the provider stops retrying them.
pub async fn efi_webhook(
    State(state): State<AppState>,
    Signature(signature): Signature,
    body: Bytes,
) -> Result<Json<NotificationAck>, AppError> {
    let ack = state
        .service
        .handle_notification(&body, &signature)
        .await?;
    tracing::info!(
        finalized = ack.finalized,
        duplicates = ack.duplicates,
        unknown = ack.unknown,
        "Notification processed"
    );
    Ok(Json(ack))
}
