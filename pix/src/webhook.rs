//! Webhook signature checks and body parsing.
//!
//! Efí signs the raw body with HMAC-SHA256 and sends the hex digest as
//! `sha256=<hex>`. Verification runs on the bytes as received, before any
//! JSON parsing.

use crate::error::PixError;
use crate::messages::WebhookBody;
use hmac::{Hmac, Mac};
use rifa_core::gateway::NotifiedPayment;
use rifa_core::types::ExternalId;
use sha2::Sha256;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "x-efi-signature";

const PREFIX: &str = "sha256=";

/// Hex HMAC-SHA256 of `body` under `secret`
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Whether `signature` is the `sha256=<hex>` HMAC of `body` under `secret`
#[must_use]
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(received) = signature.trim().strip_prefix(PREFIX) else {
        return false;
    };
    let Some(expected) = sign(secret, body) else {
        return false;
    };
    constant_time_eq::constant_time_eq(
        expected[PREFIX.len()..].as_bytes(),
        received.to_ascii_lowercase().as_bytes(),
    )
}

/// Settled charges listed in a webhook body. Entries without a txid are skipped.
///
/// # Errors
///
/// Returns [`PixError::InvalidNotification`] if the body is not the expected JSON.
pub fn parse(body: &[u8]) -> Result<Vec<NotifiedPayment>, PixError> {
    let body: WebhookBody =
        serde_json::from_slice(body).map_err(|e| PixError::InvalidNotification(e.to_string()))?;
    Ok(body
        .pix
        .into_iter()
        .filter_map(|pix| {
            pix.txid.map(|txid| NotifiedPayment {
                external_id: ExternalId::new(txid),
                paid_at: pix.horario,
            })
        })
        .collect())
}
