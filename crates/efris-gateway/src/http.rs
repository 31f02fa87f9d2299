//! HTTP layer: envelope POST, status mapping, retry.
//!
//! This is the ONLY place for HTTP status handling. Callers above it see
//! Authority envelopes or a [`GatewayError`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::audit::{IntegrationLog, IntegrationRecord, IntegrationStatus};
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::envelope::{redact, Envelope, Interface};
use crate::error::{GatewayError, GatewayResult};
use crate::types::ReturnClass;

const USER_AGENT_VALUE: &str = concat!("efris-gateway/", env!("CARGO_PKG_VERSION"));

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Reply envelope together with the classification of its return code.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub envelope: Envelope,
    pub class: ReturnClass,
    /// Raw `returnStateInfo` as received.
    pub detail: Option<serde_json::Value>,
}

/// Envelope exchange with the Authority endpoint.
#[derive(Debug, Clone)]
pub(crate) struct AuthorityHttp {
    client: reqwest::Client,
    config: Arc<GatewayConfig>,
    log: Arc<dyn IntegrationLog>,
    clock: Arc<dyn Clock>,
}

impl AuthorityHttp {
    pub(crate) fn new(
        config: Arc<GatewayConfig>,
        log: Arc<dyn IntegrationLog>,
        clock: Arc<dyn Clock>,
    ) -> GatewayResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| GatewayError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            log,
            clock,
        })
    }

    pub(crate) fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// POST `envelope`, retrying transport failures and retriable return
    /// codes within the configured budget. Retries resend the same envelope
    /// (same request id).
    pub(crate) async fn exchange(
        &self,
        interface: Interface,
        envelope: &Envelope,
        reference: Option<&str>,
    ) -> GatewayResult<Reply> {
        use rand::Rng;

        let mut retries = 0;
        let max_retries = self.config.transport_retries;

        loop {
            let result = self.exchange_once(interface, envelope, reference).await;

            let retry_reason = match &result {
                Err(e @ GatewayError::Transport { .. }) => Some(e.to_string()),
                Ok(reply) if reply.class == ReturnClass::Retriable => Some(format!(
                    "return code {}: {}",
                    reply.envelope.return_state_info.return_code,
                    reply.envelope.return_state_info.return_message
                )),
                _ => None,
            };
            let Some(retry_reason) = retry_reason else {
                return result;
            };
            if retries >= max_retries {
                return result;
            }
            retries += 1;

            let base = BACKOFF_BASE
                .saturating_mul(1 << (retries - 1).min(16))
                .min(BACKOFF_CAP);
            let jittered_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
            let backoff = Duration::from_millis(jittered_ms.max(10));

            warn!(
                interface = interface.code(),
                reason = %retry_reason,
                retry = retries,
                max_retries = max_retries,
                backoff_ms = backoff.as_millis() as u64,
                "retrying request"
            );

            tokio::time::sleep(backoff).await;
        }
    }

    async fn exchange_once(
        &self,
        interface: Interface,
        envelope: &Envelope,
        reference: Option<&str>,
    ) -> GatewayResult<Reply> {
        debug!(
            interface = interface.code(),
            request_id = envelope.request_id(),
            "sending envelope"
        );

        let outcome = self.post(envelope).await;

        let mut record = IntegrationRecord {
            service: interface.service_name().to_string(),
            interface_code: interface.code().to_string(),
            request_id: envelope.request_id().to_string(),
            url: self.config.server_url.clone(),
            status: IntegrationStatus::Failed,
            reference: reference.map(String::from),
            http_status: None,
            return_code: None,
            error: None,
            request: serde_json::to_value(envelope).ok().map(|v| redact(&v)),
            response: None,
            executed_at: self.clock.now(),
        };

        let result = match outcome {
            Ok((status, body)) => {
                record.http_status = Some(status);
                record.response = Some(redact(&body));
                self.parse_reply(body)
            }
            Err((status, e)) => {
                record.http_status = status;
                Err(e)
            }
        };

        match &result {
            Ok(reply) => {
                record.return_code = Some(reply.envelope.return_state_info.return_code.clone());
                if reply.class == ReturnClass::Success {
                    record.status = IntegrationStatus::Completed;
                } else {
                    record.error = Some(reply.envelope.return_state_info.return_message.clone());
                }
            }
            Err(e) => record.error = Some(e.to_string()),
        }
        self.log.record(record).await;

        result
    }

    /// One POST. Returns the HTTP status and JSON body on 2xx.
    async fn post(
        &self,
        envelope: &Envelope,
    ) -> Result<(u16, serde_json::Value), (Option<u16>, GatewayError)> {
        let response = self
            .client
            .post(&self.config.server_url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| (None, GatewayError::from(e)))?;
        let status = response.status().as_u16();

        match status {
            200..=299 => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| (Some(status), GatewayError::from(e)))?;
                let body = serde_json::from_str(&text).map_err(|e| {
                    (
                        Some(status),
                        GatewayError::integrity(format!("response is not JSON: {}", e)),
                    )
                })?;
                Ok((status, body))
            }

            408 | 429 | 500..=599 => Err((
                Some(status),
                GatewayError::transport(format!("HTTP {}", status)),
            )),

            _ => {
                let message = response
                    .text()
                    .await
                    .ok()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| format!("HTTP {}", status));
                Err((
                    Some(status),
                    GatewayError::AuthorityRejected {
                        code: format!("HTTP {}", status),
                        message,
                    },
                ))
            }
        }
    }

    fn parse_reply(&self, body: serde_json::Value) -> GatewayResult<Reply> {
        let detail = body.get("returnStateInfo").cloned();
        let envelope: Envelope = serde_json::from_value(body)
            .map_err(|e| GatewayError::integrity(format!("malformed response envelope: {}", e)))?;

        let info = &envelope.return_state_info;
        let class = self
            .config
            .return_codes
            .classify(&info.return_code, &info.return_message);

        if class != ReturnClass::Success {
            warn!(
                return_code = %info.return_code,
                message = %info.return_message,
                class = ?class,
                "authority returned non-success code"
            );
        }

        Ok(Reply {
            envelope,
            class,
            detail,
        })
    }
}
