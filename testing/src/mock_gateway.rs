//! Scriptable payment gateway for development and testing.
//!
//! Charges are recorded and start out pending. Tests then script what the
//! "provider" reports with [`MockPaymentGateway::set_status`] and friends, or
//! build signed notification bodies with [`MockPaymentGateway::notification`].

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use rifa_core::gateway::{
    Charge, ChargeRequest, GatewayError, NotifiedPayment, PaymentGateway, ProviderStatus,
};
use rifa_core::types::{ExternalId, PaymentStatus};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    issued: u64,
    charges: Vec<(ExternalId, ChargeRequest)>,
    statuses: HashMap<ExternalId, ProviderStatus>,
    next_charge_error: Option<GatewayError>,
    query_error: Option<GatewayError>,
    charge_delay: Option<Duration>,
}

/// Mock payment gateway
#[derive(Debug)]
pub struct MockPaymentGateway {
    secret: String,
    state: Mutex<MockState>,
}

impl MockPaymentGateway {
    /// Creates a gateway that signs notifications with `secret`
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next `create_charge` fail with `error`
    pub fn fail_next_charge(&self, error: GatewayError) {
        self.state().next_charge_error = Some(error);
    }

    /// Makes every `query_status` fail with `error` until cleared with `None`
    pub fn fail_queries(&self, error: Option<GatewayError>) {
        self.state().query_error = error;
    }

    /// Delays every `create_charge` by `delay`
    pub fn delay_charges(&self, delay: Duration) {
        self.state().charge_delay = Some(delay);
    }

    /// Scripts the status the provider reports for a charge
    pub fn set_status(&self, external_id: &ExternalId, status: ProviderStatus) {
        self.state().statuses.insert(external_id.clone(), status);
    }

    /// Reports the charge as settled at `paid_at`
    pub fn mark_paid(&self, external_id: &ExternalId, paid_at: DateTime<Utc>) {
        self.set_status(
            external_id,
            ProviderStatus {
                status: PaymentStatus::Paid,
                paid_at: Some(paid_at),
            },
        );
    }

    /// Reports the charge with a non-paid status
    pub fn mark(&self, external_id: &ExternalId, status: PaymentStatus) {
        self.set_status(
            external_id,
            ProviderStatus {
                status,
                paid_at: None,
            },
        );
    }

    /// Every charge request received, in order
    #[must_use]
    pub fn charges(&self) -> Vec<(ExternalId, ChargeRequest)> {
        self.state().charges.clone()
    }

    /// Signature for `body` in the `sha256=<hex>` form the gateway verifies
    ///
    /// # Panics
    ///
    /// Never: HMAC accepts keys of any length.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Notification body listing settled charges
    #[must_use]
    pub fn notification(&self, settled: &[(ExternalId, DateTime<Utc>)]) -> Vec<u8> {
        let pix: Vec<serde_json::Value> = settled
            .iter()
            .map(|(id, at)| {
                serde_json::json!({
                    "txid": id.as_str(),
                    "horario": at.to_rfc3339_opts(SecondsFormat::Secs, true),
                })
            })
            .collect();
        serde_json::json!({ "pix": pix }).to_string().into_bytes()
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new("mock-webhook-secret")
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_charge(&self, request: ChargeRequest) -> BoxFuture<'_, Result<Charge, GatewayError>> {
        Box::pin(async move {
            let delay = self.state().charge_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.state();
            if let Some(error) = state.next_charge_error.take() {
                return Err(error);
            }
            state.issued += 1;
            let external_id = ExternalId::new(format!("MOCKTX{:026}", state.issued));
            state.statuses.insert(
                external_id.clone(),
                ProviderStatus {
                    status: PaymentStatus::Pending,
                    paid_at: None,
                },
            );
            state.charges.push((external_id.clone(), request));
            Ok(Charge {
                copy_paste: format!("00020126580014br.gov.bcb.pix{external_id}"),
                qr_code_image: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
                expires_at: None,
                external_id,
            })
        })
    }

    fn query_status<'a>(
        &'a self,
        external_id: &'a ExternalId,
    ) -> BoxFuture<'a, Result<ProviderStatus, GatewayError>> {
        Box::pin(async move {
            let state = self.state();
            if let Some(error) = &state.query_error {
                return Err(error.clone());
            }
            state
                .statuses
                .get(external_id)
                .copied()
                .ok_or_else(|| GatewayError::Rejected(format!("unknown charge {external_id}")))
        })
    }

    fn verify_notification(&self, raw_body: &[u8], signature: &str) -> bool {
        constant_time_eq::constant_time_eq(self.sign(raw_body).as_bytes(), signature.as_bytes())
    }

    fn parse_notification(&self, raw_body: &[u8]) -> Result<Vec<NotifiedPayment>, GatewayError> {
        let value: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let entries = value
            .get("pix")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| GatewayError::InvalidResponse("missing pix array".to_string()))?;
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let txid = entry.get("txid")?.as_str()?;
                let paid_at = entry
                    .get("horario")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|at| at.with_timezone(&Utc));
                Some(NotifiedPayment {
                    external_id: ExternalId::new(txid),
                    paid_at,
                })
            })
            .collect())
    }
}
