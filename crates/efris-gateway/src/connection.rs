//! Connectivity check (T101 server time).

use tracing::{info, warn};

use crate::envelope::Interface;
use crate::error::{ErrorKind, GatewayError};
use crate::transport::Transport;
use crate::types::{ConnectionReport, ReturnClass};

#[derive(Debug, Clone)]
pub struct ConnectionTester {
    transport: Transport,
}

impl ConnectionTester {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Check the Authority. Every failure is reported in the result.
    pub async fn test_connection(&self) -> ConnectionReport {
        let response = match self
            .transport
            .send(Interface::ServerTime, &serde_json::Value::Null, None)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "authority not reachable");
                let detail = match &e {
                    GatewayError::Transport { timed_out: true, .. } => {
                        "Connection timeout. Please check your network connection.".to_string()
                    }
                    other => other.to_string(),
                };
                return ConnectionReport {
                    reachable: false,
                    detail,
                    server_time: None,
                    error_kind: Some(e.kind()),
                    return_code: e.code().map(String::from),
                };
            }
        };

        if !response.is_success() {
            warn!(
                return_code = %response.return_code,
                class = ?response.class,
                "connection test rejected"
            );
            return ConnectionReport {
                reachable: false,
                detail: format!(
                    "Authority returned {} ({:?}): {}",
                    response.return_code, response.class, response.message
                ),
                server_time: None,
                error_kind: Some(match response.class {
                    ReturnClass::KeyStale => ErrorKind::KeyStale,
                    ReturnClass::Retriable => ErrorKind::Transport,
                    _ => ErrorKind::AuthorityRejected,
                }),
                return_code: Some(response.return_code),
            };
        }

        let server_time = response
            .payload
            .as_ref()
            .and_then(|p| p.get("serverTime"))
            .and_then(|v| v.as_str())
            .map(String::from);
        info!(server_time = server_time.as_deref().unwrap_or("N/A"), "connection test passed");

        ConnectionReport {
            reachable: true,
            detail: "Connection successful".to_string(),
            server_time,
            error_kind: None,
            return_code: Some(response.return_code),
        }
    }
}
