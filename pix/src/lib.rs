//! # Efí PIX client
//!
//! Payment gateway for the raffle core, backed by the Efí (Gerencianet)
//! PIX API: immediate charges, status queries and signed webhooks.
//!
//! ## Example
//!
//! ```no_run
//! use rifa_pix::EfiClient;
//! use rifa_core::types::ExternalId;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials from EFI_ENVIRONMENT and EFI_SANDBOX_* / EFI_PRODUCTION_*
//!     let client = EfiClient::from_env()?;
//!
//!     let status = client.status(&ExternalId::new("7978C0C97EA847E78E8849634473C1F1")).await?;
//!     println!("Status: {:?}", status.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - OAuth2 client credentials with a shared, self-renewing token
//! - Mutual TLS with a PEM client certificate
//! - Charge creation with QR code retrieval
//! - HMAC-SHA256 webhook verification

pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod webhook;

// Re-export main types for convenience
pub use client::{EfiClient, txid};
pub use config::{EfiConfig, EfiEnvironment};
pub use error::PixError;
pub use messages::CobStatus;
