//! `EfiClient` against a stub Efí API.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use rifa_core::gateway::{ChargeRequest, GatewayError, Payer, PaymentGateway};
use rifa_core::types::{ExternalId, Money, PaymentStatus, RaffleId, UserId};
use rifa_pix::{EfiClient, EfiConfig, webhook};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TXID: &str = "7978C0C97EA847E78E8849634473C1F1";

fn client(server: &MockServer) -> EfiClient {
    let mut config = EfiConfig::sandbox("client-id", "client-secret", "chave@rifa.com.br")
        .with_base_url(server.uri());
    config.request_timeout = Duration::from_millis(500);
    EfiClient::new(config).expect("client")
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_partial_json(json!({ "grant_type": "client_credentials" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-123",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "cob.write cob.read"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn charge_request() -> ChargeRequest {
    ChargeRequest {
        raffle_id: RaffleId::new(),
        owner: UserId::new(),
        amount: Money::from_cents(3_000),
        payer: Payer::new("Maria da Silva", "123.456.789-09"),
        description: "Rifa: Moto Honda CG 160".to_string(),
        info: vec![("Rifa ID".to_string(), "1".to_string())],
        expires_in_secs: 900,
    }
}

#[tokio::test]
async fn test_create_charge_fetches_qr_code() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("PUT"))
        .and(path_regex("^/v2/cob/[0-9A-F]{32}$"))
        .and(header("authorization", "Bearer tok-123"))
        .and(body_partial_json(json!({
            "calendario": { "expiracao": 900 },
            "devedor": { "cpf": "12345678909", "nome": "Maria da Silva" },
            "valor": { "original": "30.00" },
            "chave": "chave@rifa.com.br",
            "solicitacaoPagador": "Rifa: Moto Honda CG 160"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "txid": TXID,
            "status": "ATIVA",
            "calendario": { "criacao": "2025-01-01T12:00:00Z", "expiracao": 900 },
            "loc": { "id": 42, "tipoCob": "cob" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/loc/42/qrcode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "qrcode": "00020101021226830014BR.GOV.BCB.PIX",
            "imagemQrcode": "data:image/png;base64,iVBORw0KGgo="
        })))
        .expect(1)
        .mount(&server)
        .await;

    let charge = client(&server)
        .create_charge(charge_request())
        .await
        .expect("charge");

    assert_eq!(charge.external_id.as_str(), TXID);
    assert_eq!(charge.copy_paste, "00020101021226830014BR.GOV.BCB.PIX");
    assert!(charge.qr_code_image.is_some());
    assert_eq!(
        charge.expires_at.map(|at| at.to_rfc3339()),
        Some("2025-01-01T12:15:00+00:00".to_string())
    );
}

#[tokio::test]
async fn test_token_is_reused_across_calls() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/cob/{TXID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "txid": TXID,
            "status": "ATIVA"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    let id = ExternalId::new(TXID);
    for _ in 0..2 {
        let status = client.query_status(&id).await.expect("status");
        assert_eq!(status.status, PaymentStatus::Pending);
        assert_eq!(status.paid_at, None);
    }
}

#[tokio::test]
async fn test_paid_charge_reports_settlement() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/cob/{TXID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "txid": TXID,
            "status": "CONCLUIDA",
            "pix": [{ "endToEndId": "E0000000020250101120500", "txid": TXID, "horario": "2025-01-01T12:05:00Z" }]
        })))
        .mount(&server)
        .await;

    let status = client(&server)
        .query_status(&ExternalId::new(TXID))
        .await
        .expect("status");
    assert_eq!(status.status, PaymentStatus::Paid);
    assert_eq!(
        status.paid_at.map(|at| at.to_rfc3339()),
        Some("2025-01-01T12:05:00+00:00".to_string())
    );
}

#[tokio::test]
async fn test_refused_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
        .mount(&server)
        .await;

    let err = client(&server)
        .query_status(&ExternalId::new(TXID))
        .await
        .expect_err("refused");
    assert!(matches!(err, GatewayError::Authentication(msg) if msg.contains("invalid_client")));
}

#[tokio::test]
async fn test_api_error_is_a_rejection() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("PUT"))
        .and(path_regex("^/v2/cob/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "nome": "valor_invalido",
            "mensagem": "valor.original invalido"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_charge(charge_request())
        .await
        .expect_err("rejected");
    assert!(matches!(err, GatewayError::Rejected(msg) if msg.contains("400")));
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/cob/{TXID}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "txid": TXID, "status": "ATIVA" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .query_status(&ExternalId::new(TXID))
        .await
        .expect_err("timeout");
    assert_eq!(err, GatewayError::Timeout);
}

#[tokio::test]
async fn test_webhook_round_trip() {
    let server = MockServer::start().await;
    let client = client(&server);
    let body = json!({ "pix": [{ "txid": TXID, "horario": "2025-01-01T12:05:00Z" }] })
        .to_string()
        .into_bytes();
    let signature = webhook::sign("client-secret", &body).unwrap();

    assert!(client.verify_notification(&body, &signature));
    assert!(!client.verify_notification(&body, "sha256=00"));
    let settled = client.parse_notification(&body).expect("parse");
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].external_id.as_str(), TXID);
}
