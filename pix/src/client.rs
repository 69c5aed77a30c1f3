//! Efí PIX API client

use crate::{
    config::EfiConfig,
    error::PixError,
    messages::{
        Calendario, CobRequest, CobResponse, Devedor, InfoAdicional, QrCodeResponse, TokenRequest,
        TokenResponse, Valor,
    },
    webhook,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::{Client, Identity, RequestBuilder, StatusCode};
use rifa_core::gateway::{
    Charge, ChargeRequest, GatewayError, NotifiedPayment, PaymentGateway, ProviderStatus,
};
use rifa_core::types::{ExternalId, PaymentStatus, RaffleId, UserId};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Tokens are renewed this long before the provider says they expire
const TOKEN_RENEWAL_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    renew_at: Instant,
}

/// Efí PIX API client
///
/// Cheap to clone; clones share the HTTP connection pool and the OAuth token.
#[derive(Clone)]
pub struct EfiClient {
    client: Client,
    config: Arc<EfiConfig>,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl EfiClient {
    /// Create a new client with configuration from environment
    ///
    /// # Errors
    ///
    /// Returns `PixError::MissingConfig` if a credential is not set, or
    /// `PixError::Certificate` if the client certificate cannot be loaded.
    pub fn from_env() -> Result<Self, PixError> {
        Self::new(EfiConfig::from_env()?)
    }

    /// Create a new client with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns `PixError::Certificate` if the certificate file cannot be read
    /// or parsed, or `PixError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(config: EfiConfig) -> Result<Self, PixError> {
        let mut builder = Client::builder().timeout(config.request_timeout);
        if let Some(path) = &config.certificate_path {
            let pem = std::fs::read(path)
                .map_err(|e| PixError::Certificate(format!("{}: {e}", path.display())))?;
            let identity =
                Identity::from_pem(&pem).map_err(|e| PixError::Certificate(e.to_string()))?;
            builder = builder.identity(identity);
        }
        let client = builder
            .build()
            .map_err(|e| PixError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            config: Arc::new(config),
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &EfiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Returns a cached OAuth token, fetching a new one when it is close to expiry
    async fn access_token(&self) -> Result<String, PixError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.renew_at {
                return Ok(token.access_token.clone());
            }
        }

        let request = self
            .client
            .post(self.url("/oauth/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .json(&TokenRequest::default());
        let response: TokenResponse = send(request).await?;

        let lifetime = Duration::from_secs(response.expires_in);
        tracing::debug!(expires_in = response.expires_in, "Efí access token issued");
        *cached = Some(CachedToken {
            access_token: response.access_token.clone(),
            renew_at: Instant::now() + lifetime.saturating_sub(TOKEN_RENEWAL_MARGIN),
        });
        Ok(response.access_token)
    }

    /// Sends an authorized request, dropping the cached token if it is refused
    async fn authorized<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PixError> {
        let token = self.access_token().await?;
        let result = send(request.bearer_auth(token)).await;
        if matches!(result, Err(PixError::Unauthorized(_))) {
            *self.token.lock().await = None;
        }
        result
    }

    /// Create an immediate charge with the given txid
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn create_cob(&self, txid: &str, body: &CobRequest) -> Result<CobResponse, PixError> {
        let request = self.client.put(self.url(&format!("/v2/cob/{txid}"))).json(body);
        self.authorized(request).await
    }

    /// Fetch a charge
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn cob(&self, txid: &str) -> Result<CobResponse, PixError> {
        let request = self.client.get(self.url(&format!("/v2/cob/{txid}")));
        self.authorized(request).await
    }

    /// Fetch the QR code of a charge location
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn qrcode(&self, loc_id: u64) -> Result<QrCodeResponse, PixError> {
        let request = self.client.get(self.url(&format!("/v2/loc/{loc_id}/qrcode")));
        self.authorized(request).await
    }

    /// Opens a charge and fetches its payment code
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn charge(&self, request: ChargeRequest) -> Result<Charge, PixError> {
        let txid = txid(request.raffle_id, request.owner, Utc::now());
        let body = cob_request(&self.config.pix_key, request);

        let cob = self.create_cob(&txid, &body).await?;
        let loc = cob
            .loc
            .as_ref()
            .ok_or_else(|| PixError::ResponseParseFailed(format!("charge {txid} has no location")))?;
        let qr = self.qrcode(loc.id).await?;
        tracing::info!(txid = %cob.txid, amount = %body.valor.original, "PIX charge created");

        Ok(Charge {
            expires_at: cob.expires_at(),
            external_id: ExternalId::new(cob.txid),
            copy_paste: qr.qrcode,
            qr_code_image: qr.imagem_qrcode,
        })
    }

    /// Current status of a charge
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, API errors, or parsing failures
    pub async fn status(&self, external_id: &ExternalId) -> Result<ProviderStatus, PixError> {
        let cob = self.cob(external_id.as_str()).await?;
        let status = cob.status.payment_status();
        Ok(ProviderStatus {
            status,
            paid_at: match status {
                PaymentStatus::Paid => cob.paid_at(),
                _ => None,
            },
        })
    }
}

impl PaymentGateway for EfiClient {
    fn create_charge(&self, request: ChargeRequest) -> BoxFuture<'_, Result<Charge, GatewayError>> {
        Box::pin(async move {
            self.charge(request).await.map_err(|e| {
                tracing::warn!(error = %e, "PIX charge failed");
                GatewayError::from(e)
            })
        })
    }

    fn query_status<'a>(
        &'a self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, Result<ProviderStatus, GatewayError>> {
        Box::pin(async move { self.status(external_id).await.map_err(GatewayError::from) })
    }

    fn verify_notification(&self, raw_body: &[u8], signature: &str) -> bool {
        webhook::verify(&self.config.webhook_secret, raw_body, signature)
    }

    fn parse_notification(&self, raw_body: &[u8]) -> Result<Vec<NotifiedPayment>, GatewayError> {
        webhook::parse(raw_body).map_err(GatewayError::from)
    }
}

/// Sends a request and decodes a successful JSON body
async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, PixError> {
    let response = request.send().await.map_err(request_error)?;

    match response.status() {
        StatusCode::OK | StatusCode::CREATED => response
            .json::<T>()
            .await
            .map_err(|e| PixError::ResponseParseFailed(e.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default();
            Err(PixError::Unauthorized(body))
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(PixError::ApiError {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

fn request_error(error: reqwest::Error) -> PixError {
    if error.is_timeout() {
        PixError::Timeout
    } else {
        PixError::RequestFailed(error.to_string())
    }
}

/// Charge identifier: 32 uppercase hex characters derived from the raffle,
/// the buyer and the creation instant. Efí accepts 26 to 35 characters.
#[must_use]
pub fn txid(raffle_id: RaffleId, owner: UserId, at: DateTime<Utc>) -> String {
    let seed = format!("{raffle_id}{owner}{}", at.format("%Y%m%d%H%M%S%f"));
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    digest[..32].to_ascii_uppercase()
}

fn cob_request(pix_key: &str, request: ChargeRequest) -> CobRequest {
    let devedor = request.payer.has_valid_tax_id().then(|| Devedor {
        cpf: request.payer.tax_id.clone(),
        nome: request.payer.name.clone(),
    });
    CobRequest {
        calendario: Calendario {
            criacao: None,
            expiracao: request.expires_in_secs,
        },
        devedor,
        valor: Valor {
            original: request.amount.to_decimal_string(),
        },
        chave: pix_key.to_string(),
        solicitacao_pagador: request.description,
        info_adicionais: request
            .info
            .into_iter()
            .map(|(nome, valor)| InfoAdicional { nome, valor })
            .collect(),
    }
}
