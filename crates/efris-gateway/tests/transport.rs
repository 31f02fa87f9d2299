//! Transport behavior: integrity failures, retry budget, status mapping,
//! timeouts and the integration log.

mod common;

use std::time::Duration;

use common::*;
use efris_gateway::{ErrorKind, GatewayError, IntegrationStatus, OutcomeStatus};
use serde_json::json;
use wiremock::{MockServer, ResponseTemplate};

#[tokio::test]
async fn test_integrity_failure_is_not_retried() {
    let server = MockServer::start().await;

    interface("T104")
        .respond_with(key_reply(&KEY_A, Some(3600)))
        .expect(1)
        .mount(&server)
        .await;
    // sealed under a key the gateway does not hold
    interface("T127")
        .respond_with(sealed(&KEY_B, json!({ "records": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(3)).await;
    let failure = h.gateway.query_stock("ITEM-001").await.unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Integrity);
    assert!(matches!(failure.error, GatewayError::Integrity { .. }));
}

#[tokio::test]
async fn test_unsealed_reply_to_signed_call_is_integrity_error() {
    let server = MockServer::start().await;

    interface("T104")
        .respond_with(key_reply(&KEY_A, Some(3600)))
        .mount(&server)
        .await;
    interface("T127")
        .respond_with(plain(json!({ "records": [{ "stock": "999999" }] })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(2)).await;
    let failure = h.gateway.query_stock("ITEM-001").await.unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Integrity);
    assert!(failure.message.contains("unsealed"), "{}", failure.message);
}

#[tokio::test]
async fn test_garbage_body_is_integrity_error() {
    let server = MockServer::start().await;

    interface("T101")
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(2)).await;
    let outcome = h.gateway.test_connection().await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Integrity));
}

#[tokio::test]
async fn test_server_error_is_retried_within_budget() {
    let server = MockServer::start().await;

    interface("T101")
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    interface("T101")
        .respond_with(plain(json!({ "serverTime": "02/01/2026 12:00:00" })))
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(1)).await;
    let outcome = h.gateway.test_connection().await;

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.server_time.as_deref(), Some("02/01/2026 12:00:00"));

    // the retry resends the same envelope
    let sent = requests_for(&server, "T101").await;
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0]["globalInfo"]["dataExchangeId"],
        sent[1]["globalInfo"]["dataExchangeId"]
    );
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let server = MockServer::start().await;

    interface("T101")
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(2)).await;
    let outcome = h.gateway.test_connection().await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Transport));
}

#[tokio::test]
async fn test_retriable_return_code_uses_transport_budget() {
    let server = MockServer::start().await;

    interface("T104")
        .respond_with(key_reply(&KEY_A, Some(3600)))
        .mount(&server)
        .await;
    interface("T127")
        .respond_with(rejection("99", "system busy"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    interface("T127")
        .respond_with(sealed(&KEY_A, json!({ "records": [] })))
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(1)).await;
    let outcome = h.gateway.query_stock("ITEM-001").await.unwrap();

    assert!(outcome.success);
    assert_eq!(calls(&server, "T127").await, 2);
}

#[tokio::test]
async fn test_terminal_code_is_never_retried() {
    let server = MockServer::start().await;

    interface("T104")
        .respond_with(key_reply(&KEY_A, Some(3600)))
        .mount(&server)
        .await;
    interface("T119")
        .respond_with(rejection("2110", "TIN does not exist"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(3)).await;
    let failure = h
        .gateway
        .resolve_taxpayer("1000023516", Some("ACME"))
        .await
        .unwrap_err();

    assert_eq!(failure.kind, ErrorKind::AuthorityRejected);
    assert_eq!(failure.code.as_deref(), Some("2110"));
    assert_eq!(failure.message, "TIN does not exist");
}

#[tokio::test]
async fn test_client_error_status_is_authority_rejected() {
    let server = MockServer::start().await;

    interface("T101")
        .respond_with(ResponseTemplate::new(404).set_body_string("no such endpoint"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_transport_retries(2)).await;
    let outcome = h.gateway.test_connection().await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.error_kind, Some(ErrorKind::AuthorityRejected));
}

#[tokio::test]
async fn test_timeout_reports_unreachable() {
    let server = MockServer::start().await;

    interface("T101")
        .respond_with(
            plain(json!({ "serverTime": "late" })).set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let h = harness(test_config(&server).with_timeout_secs(1)).await;
    let outcome = h.gateway.test_connection().await;

    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Transport));
    assert!(outcome.message.contains("timeout"), "{}", outcome.message);
}

#[tokio::test]
async fn test_integration_log_records_every_exchange() {
    let server = MockServer::start().await;

    interface("T104")
        .respond_with(key_reply(&KEY_A, Some(3600)))
        .mount(&server)
        .await;
    interface("T127")
        .respond_with(rejection("E001", "not registered"))
        .mount(&server)
        .await;

    let h = harness(test_config(&server)).await;
    h.gateway.query_stock("ITEM-001").await.unwrap();

    let records = h.log.records();
    assert_eq!(records.len(), 2);

    let key = &h.log.for_interface("T104")[0];
    assert_eq!(key.status, IntegrationStatus::Completed);
    let response = key.response.as_ref().expect("response logged");
    assert!(response["data"]["content"]
        .as_str()
        .unwrap()
        .starts_with("<redacted"));

    let stock = &h.log.for_interface("T127")[0];
    assert_eq!(stock.status, IntegrationStatus::Failed);
    assert_eq!(stock.return_code.as_deref(), Some("E001"));
    assert_eq!(stock.reference.as_deref(), Some("ITEM-001"));
    assert_eq!(stock.http_status, Some(200));
    let request = stock.request.as_ref().expect("request logged");
    assert!(request["data"]["content"]
        .as_str()
        .unwrap()
        .starts_with("<redacted"));
    assert!(request["data"]["signature"]
        .as_str()
        .unwrap()
        .starts_with("<redacted"));
}
