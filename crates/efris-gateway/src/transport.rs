//! Transport client: seals payloads with the current key and decodes replies.
//!
//! Public API: no status code knowledge. HTTP handling lives in `http.rs`.

use std::sync::Arc;

use tracing::{error, warn};

use crate::crypto::{open_json, plain_json, seal_json, PayloadCipher};
use crate::envelope::{DataBlock, Envelope, Interface};
use crate::error::{GatewayError, GatewayResult};
use crate::http::{AuthorityHttp, Reply};
use crate::key_manager::KeyManager;
use crate::types::{AuthorityResponse, KeyMaterial, ReturnClass};

/// Sends interface calls to the Authority.
#[derive(Debug, Clone)]
pub struct Transport {
    http: AuthorityHttp,
    keys: KeyManager,
    cipher: Arc<dyn PayloadCipher>,
}

impl Transport {
    pub(crate) fn new(http: AuthorityHttp, keys: KeyManager, cipher: Arc<dyn PayloadCipher>) -> Self {
        Self { http, keys, cipher }
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Call `interface` with `payload`.
    ///
    /// Signed interfaces get a fresh key first. A key-stale reply triggers one
    /// refresh and one resend under a new request id; a second key-stale reply
    /// is returned as [`GatewayError::KeyStale`]. Other non-success replies
    /// come back as `Ok` with their class set. A success reply that cannot be
    /// verified or decoded is an `Integrity` error and is not retried.
    ///
    /// `reference` names the host record the call is for and is only logged.
    pub async fn send(
        &self,
        interface: Interface,
        payload: &serde_json::Value,
        reference: Option<&str>,
    ) -> GatewayResult<AuthorityResponse> {
        if !interface.is_signed() {
            return self.send_plain(interface, payload, reference).await;
        }

        let key = self.keys.ensure_fresh_key().await?;
        let response = self.send_sealed(interface, payload, &key, reference).await?;
        if response.class != ReturnClass::KeyStale {
            return Ok(response);
        }

        warn!(
            interface = interface.code(),
            return_code = %response.return_code,
            request_id = %response.request_id,
            "key rejected by authority, refreshing once"
        );
        let key = self.keys.replace_rejected(&key).await?;
        let retried = self.send_sealed(interface, payload, &key, reference).await?;

        if retried.class == ReturnClass::KeyStale {
            return Err(GatewayError::KeyStale {
                code: retried.return_code,
                message: retried.message,
            });
        }
        Ok(retried)
    }

    async fn send_plain(
        &self,
        interface: Interface,
        payload: &serde_json::Value,
        reference: Option<&str>,
    ) -> GatewayResult<AuthorityResponse> {
        let data = if payload.is_null() {
            DataBlock::default()
        } else {
            plain_json(payload)?
        };
        let envelope = self.envelope(interface, data);
        let reply = self.http.exchange(interface, &envelope, reference).await?;
        self.decode(interface, &envelope, reply, None)
    }

    async fn send_sealed(
        &self,
        interface: Interface,
        payload: &serde_json::Value,
        key: &KeyMaterial,
        reference: Option<&str>,
    ) -> GatewayResult<AuthorityResponse> {
        let data = seal_json(self.cipher.as_ref(), key, payload)?;
        let envelope = self.envelope(interface, data);
        let reply = self.http.exchange(interface, &envelope, reference).await?;
        self.decode(interface, &envelope, reply, Some(key))
    }

    fn envelope(&self, interface: Interface, data: DataBlock) -> Envelope {
        Envelope::request(self.http.config(), interface, data, self.http.clock().now())
    }

    fn decode(
        &self,
        interface: Interface,
        request: &Envelope,
        reply: Reply,
        key: Option<&KeyMaterial>,
    ) -> GatewayResult<AuthorityResponse> {
        let payload = if reply.class == ReturnClass::Success {
            open_json(self.cipher.as_ref(), key, &reply.envelope.data).map_err(|e| {
                error!(
                    interface = interface.code(),
                    request_id = request.request_id(),
                    error = %e,
                    "response failed integrity check"
                );
                e
            })?
        } else {
            None
        };

        let info = reply.envelope.return_state_info;
        Ok(AuthorityResponse {
            request_id: request.request_id().to_string(),
            return_code: info.return_code,
            message: info.return_message,
            class: reply.class,
            payload,
            detail: reply.detail,
        })
    }
}
