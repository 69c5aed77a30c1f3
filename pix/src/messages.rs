//! Request and response bodies of the Efí PIX API

use chrono::{DateTime, Utc};
use rifa_core::types::PaymentStatus;
use serde::{Deserialize, Serialize};

/// `POST /oauth/token` body
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    /// Always `client_credentials`
    pub grant_type: &'static str,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            grant_type: "client_credentials",
        }
    }
}

/// `POST /oauth/token` response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Bearer token
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default = "default_token_lifetime")]
    pub expires_in: u64,
}

const fn default_token_lifetime() -> u64 {
    3600
}

/// Charge window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendario {
    /// Creation time, set by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criacao: Option<DateTime<Utc>>,
    /// Seconds the charge stays payable
    pub expiracao: u32,
}

/// Debtor identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Devedor {
    /// CPF, digits only
    pub cpf: String,
    /// Full name
    pub nome: String,
}

/// Charge amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valor {
    /// Decimal string with two places, e.g. `"20.00"`
    pub original: String,
}

/// Free-form name/value pair shown with the charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoAdicional {
    /// Label
    pub nome: String,
    /// Value
    pub valor: String,
}

/// `PUT /v2/cob/{txid}` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CobRequest {
    /// Charge window
    pub calendario: Calendario,
    /// Payer, when a tax id was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devedor: Option<Devedor>,
    /// Amount
    pub valor: Valor,
    /// Receiving PIX key
    pub chave: String,
    /// Text shown in the payer's bank app
    pub solicitacao_pagador: String,
    /// Extra fields
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub info_adicionais: Vec<InfoAdicional>,
}

/// Charge status as the provider names it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CobStatus {
    /// Open and payable
    Ativa,
    /// Paid
    Concluida,
    /// Removed by the receiver
    RemovidaPeloUsuarioRecebedor,
    /// Removed by the provider, usually on expiry
    RemovidaPeloPsp,
    /// Anything newer than this client
    #[serde(other)]
    Desconhecido,
}

impl CobStatus {
    /// Maps onto the payment lifecycle. Unknown statuses read as pending.
    #[must_use]
    pub const fn payment_status(self) -> PaymentStatus {
        match self {
            Self::Ativa | Self::Desconhecido => PaymentStatus::Pending,
            Self::Concluida => PaymentStatus::Paid,
            Self::RemovidaPeloUsuarioRecebedor => PaymentStatus::Cancelled,
            Self::RemovidaPeloPsp => PaymentStatus::Expired,
        }
    }
}

/// Location the QR code is generated from
#[derive(Debug, Clone, Deserialize)]
pub struct Loc {
    /// Location id
    pub id: u64,
}

/// One received PIX, as listed on a charge or in a webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixRecebido {
    /// Charge the PIX paid
    #[serde(default)]
    pub txid: Option<String>,
    /// End-to-end id of the transfer
    #[serde(default)]
    pub end_to_end_id: Option<String>,
    /// Settlement time
    #[serde(default)]
    pub horario: Option<DateTime<Utc>>,
}

/// `PUT`/`GET /v2/cob/{txid}` response
#[derive(Debug, Clone, Deserialize)]
pub struct CobResponse {
    /// Charge id
    pub txid: String,
    /// Current status
    pub status: CobStatus,
    /// Charge window
    #[serde(default)]
    pub calendario: Option<Calendario>,
    /// QR code location
    #[serde(default)]
    pub loc: Option<Loc>,
    /// Copy-and-paste payload, when returned inline
    #[serde(default, rename = "pixCopiaECola")]
    pub pix_copia_e_cola: Option<String>,
    /// Received transfers
    #[serde(default)]
    pub pix: Vec<PixRecebido>,
}

impl CobResponse {
    /// Expiry derived from the creation time and window
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let calendario = self.calendario.as_ref()?;
        calendario
            .criacao
            .map(|at| at + chrono::Duration::seconds(i64::from(calendario.expiracao)))
    }

    /// Settlement time of the first received transfer
    #[must_use]
    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.pix.first().and_then(|pix| pix.horario)
    }
}

/// `GET /v2/loc/{id}/qrcode` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    /// Copy-and-paste payload
    pub qrcode: String,
    /// `data:image/png;base64,...` image
    #[serde(default)]
    pub imagem_qrcode: Option<String>,
}

/// Webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookBody {
    /// Settled transfers
    #[serde(default)]
    pub pix: Vec<PixRecebido>,
}
