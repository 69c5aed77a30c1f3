//! Efí client configuration

use crate::error::PixError;
use std::path::PathBuf;
use std::time::Duration;

const SANDBOX_URL: &str = "https://pix-h.api.efipay.com.br";
const PRODUCTION_URL: &str = "https://pix.api.efipay.com.br";

/// Which Efí environment to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfiEnvironment {
    /// Homologation
    Sandbox,
    /// Live payments
    Production,
}

impl EfiEnvironment {
    /// Parses `sandbox` or `production`, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Some(Self::Sandbox),
            "production" => Some(Self::Production),
            _ => None,
        }
    }

    /// Default API base URL
    #[must_use]
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_URL,
            Self::Production => PRODUCTION_URL,
        }
    }

    const fn env_prefix(self) -> &'static str {
        match self {
            Self::Sandbox => "EFI_SANDBOX",
            Self::Production => "EFI_PRODUCTION",
        }
    }
}

/// Credentials and endpoints for the Efí PIX API
#[derive(Debug, Clone)]
pub struct EfiConfig {
    /// Environment the credentials belong to
    pub environment: EfiEnvironment,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// PEM file holding the client certificate chain and key, for mutual TLS
    pub certificate_path: Option<PathBuf>,
    /// PIX key receiving the payments
    pub pix_key: String,
    /// Secret webhook signatures are computed with
    pub webhook_secret: String,
    /// API base URL
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl EfiConfig {
    /// Sandbox configuration without a client certificate, for tests and local runs
    #[must_use]
    pub fn sandbox(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        pix_key: impl Into<String>,
    ) -> Self {
        let client_secret = client_secret.into();
        Self {
            environment: EfiEnvironment::Sandbox,
            client_id: client_id.into(),
            webhook_secret: client_secret.clone(),
            client_secret,
            certificate_path: None,
            pix_key: pix_key.into(),
            base_url: SANDBOX_URL.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Points the client at another base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Reads the configuration from the environment.
    ///
    /// `EFI_ENVIRONMENT` picks between the `EFI_SANDBOX_*` and
    /// `EFI_PRODUCTION_*` credential sets. `EFI_WEBHOOK_SECRET` falls back
    /// to the client secret.
    ///
    /// # Errors
    ///
    /// Returns [`PixError::MissingConfig`] when a credential is unset or the
    /// environment name is unknown.
    pub fn from_env() -> Result<Self, PixError> {
        let raw = std::env::var("EFI_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());
        let environment = EfiEnvironment::parse(&raw)
            .ok_or_else(|| PixError::MissingConfig(format!("EFI_ENVIRONMENT={raw}")))?;
        let prefix = environment.env_prefix();

        let required = |name: &str| {
            let key = format!("{prefix}_{name}");
            std::env::var(&key)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or(PixError::MissingConfig(key))
        };

        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;
        let pix_key = required("PIX_KEY")?;
        let certificate_path = std::env::var(format!("{prefix}_CERTIFICATE_PATH"))
            .ok()
            .map(PathBuf::from);

        Ok(Self {
            environment,
            webhook_secret: std::env::var("EFI_WEBHOOK_SECRET")
                .unwrap_or_else(|_| client_secret.clone()),
            client_id,
            client_secret,
            certificate_path,
            pix_key,
            base_url: std::env::var("EFI_BASE_URL")
                .unwrap_or_else(|_| environment.base_url().to_string()),
            request_timeout: Duration::from_secs(
                std::env::var("EFI_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        })
    }
}
