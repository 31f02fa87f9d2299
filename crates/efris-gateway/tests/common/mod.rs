//! Shared helpers: a gateway wired to a wiremock Authority.

#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{TimeZone, Utc};
use efris_gateway::crypto::{plain_json, seal_json};
use efris_gateway::envelope::DataBlock;
use efris_gateway::{
    AesGcmCipher, Gateway, GatewayConfig, KeyMaterial, ManualClock, MemoryCatalogStore,
    MemoryCredentialStore, MemoryIntegrationLog, MemoryTaxpayerStore,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

pub const KEY_A: [u8; 16] = *b"0123456789abcdef";
pub const KEY_B: [u8; 16] = *b"fedcba9876543210";

pub struct Harness {
    pub gateway: Gateway,
    pub clock: ManualClock,
    pub log: MemoryIntegrationLog,
    pub credentials: MemoryCredentialStore,
    pub catalog: MemoryCatalogStore,
    pub taxpayers: MemoryTaxpayerStore,
}

pub fn test_config(server: &MockServer) -> GatewayConfig {
    GatewayConfig::default()
        .with_server_url(server.uri())
        .with_device("TCS0001", "1000000000")
        .with_timeout_secs(5)
        .with_transport_retries(0)
}

pub async fn harness(config: GatewayConfig) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap());
    let log = MemoryIntegrationLog::new();
    let credentials = MemoryCredentialStore::new();
    let catalog = MemoryCatalogStore::new();
    let taxpayers = MemoryTaxpayerStore::new();

    let gateway = Gateway::builder(config)
        .clock(Arc::new(clock.clone()))
        .integration_log(Arc::new(log.clone()))
        .credential_store(Arc::new(credentials.clone()))
        .catalog_store(Arc::new(catalog.clone()))
        .taxpayer_store(Arc::new(taxpayers.clone()))
        .build()
        .await
        .expect("failed to build gateway");

    Harness {
        gateway,
        clock,
        log,
        credentials,
        catalog,
        taxpayers,
    }
}

/// POST for one interface code.
pub fn interface(code: &str) -> MockBuilder {
    Mock::given(method("POST")).and(body_partial_json(
        json!({ "globalInfo": { "interfaceCode": code } }),
    ))
}

/// Reply envelope with `data` and the given return state.
pub fn reply(code: &str, message: &str, data: DataBlock) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "data": data,
        "globalInfo": {},
        "returnStateInfo": { "returnCode": code, "returnMessage": message }
    }))
}

/// Non-success reply without content.
pub fn rejection(code: &str, message: &str) -> ResponseTemplate {
    reply(code, message, DataBlock::default())
}

/// Success reply with `payload` sealed under `key`.
pub fn sealed(key: &[u8], payload: Value) -> ResponseTemplate {
    let block = seal_json(&AesGcmCipher, &KeyMaterial::new(key.to_vec()), &payload)
        .expect("failed to seal payload");
    reply("00", "SUCCESS", block)
}

/// Success reply with plain base64 JSON content.
pub fn plain(payload: Value) -> ResponseTemplate {
    reply("00", "SUCCESS", plain_json(&payload).expect("failed to encode payload"))
}

/// T104 reply delivering `key`.
pub fn key_reply(key: &[u8], expires_in: Option<i64>) -> ResponseTemplate {
    let mut content = json!({ "passowrdDes": BASE64.encode(key) });
    if let Some(secs) = expires_in {
        content["expiresIn"] = json!(secs);
    }
    plain(content)
}

/// Number of recorded requests for `code`.
pub async fn calls(server: &MockServer, code: &str) -> usize {
    requests_for(server, code).await.len()
}

/// Recorded request bodies for `code`, in arrival order.
pub async fn requests_for(server: &MockServer, code: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter(|body| body["globalInfo"]["interfaceCode"] == code)
        .collect()
}
