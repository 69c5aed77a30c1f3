//! Payment gateway contract.
//!
//! The provider is an injected capability. Charge creation and status queries
//! are async and fallible. Notification checks are pure functions over the raw
//! request body, so they can run before any JSON parsing.

use crate::types::{ExternalId, Money, PaymentStatus, RaffleId, UserId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The person paying, as required on a PIX charge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    /// Full name
    pub name: String,
    /// CPF, digits only
    pub tax_id: String,
}

impl Payer {
    /// Builds a payer, stripping punctuation from the tax id.
    #[must_use]
    pub fn new(name: impl Into<String>, tax_id: &str) -> Self {
        Self {
            name: name.into(),
            tax_id: tax_id.chars().filter(char::is_ascii_digit).collect(),
        }
    }

    /// A CPF has exactly eleven digits
    #[must_use]
    pub fn has_valid_tax_id(&self) -> bool {
        self.tax_id.len() == 11
    }
}

/// Request to open an immediate charge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Raffle being paid for
    pub raffle_id: RaffleId,
    /// Buyer
    pub owner: UserId,
    /// Amount to charge
    pub amount: Money,
    /// Payer details
    pub payer: Payer,
    /// Short text shown in the payer's bank app
    pub description: String,
    /// Extra name/value pairs attached to the charge
    pub info: Vec<(String, String)>,
    /// Seconds the charge stays payable
    pub expires_in_secs: u32,
}

/// An open charge and how to present it to the payer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Provider identifier
    pub external_id: ExternalId,
    /// PIX copy-and-paste payload
    pub copy_paste: String,
    /// QR code image, usually a `data:image/png;base64,...` URI
    pub qr_code_image: Option<String>,
    /// Expiry reported by the provider, when it reports one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Status reported by the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderStatus {
    /// Mapped status
    pub status: PaymentStatus,
    /// Settlement time, when paid
    pub paid_at: Option<DateTime<Utc>>,
}

/// One settled charge listed in a provider notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifiedPayment {
    /// Provider identifier
    pub external_id: ExternalId,
    /// Settlement time, when present
    pub paid_at: Option<DateTime<Utc>>,
}

/// Gateway failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The call did not complete in time
    #[error("payment provider timed out")]
    Timeout,
    /// The provider refused the request
    #[error("payment provider rejected the request: {0}")]
    Rejected(String),
    /// Network or TLS failure
    #[error("payment provider unreachable: {0}")]
    Transport(String),
    /// Credentials were refused
    #[error("payment provider authentication failed: {0}")]
    Authentication(String),
    /// The provider answered with something we could not read
    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

/// Payment provider capability
///
/// Methods return boxed futures so the gateway can live behind
/// `Arc<dyn PaymentGateway>`.
pub trait PaymentGateway: Send + Sync {
    /// Opens a charge. The gateway picks the external id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider fails or refuses the charge.
    fn create_charge(&self, request: ChargeRequest) -> BoxFuture<'_, Result<Charge, GatewayError>>;

    /// Fetches the current status of a charge.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider cannot be queried.
    fn query_status<'a>(
        &'a self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, Result<ProviderStatus, GatewayError>>;

    /// Checks a notification's signature against the raw body.
    fn verify_notification(&self, raw_body: &[u8], signature: &str) -> bool;

    /// Extracts the settled charges from a verified notification body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidResponse`] for bodies it cannot read.
    fn parse_notification(&self, raw_body: &[u8]) -> Result<Vec<NotifiedPayment>, GatewayError>;
}
