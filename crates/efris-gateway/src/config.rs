//! Gateway configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::types::ReturnClass;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Authority endpoint (all interfaces are POSTed to this URL).
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Device number issued by the Authority (client identifier).
    #[serde(default)]
    pub device_no: String,

    /// Taxpayer identification number of this business.
    #[serde(default)]
    pub tin: String,

    /// Business registration number.
    #[serde(default)]
    pub brn: Option<String>,

    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Protocol version sent in every envelope.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_device_mac")]
    pub device_mac: String,

    #[serde(default = "default_taxpayer_id")]
    pub taxpayer_id: String,

    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Operator recorded in `extendField.operatorName`.
    #[serde(default = "default_operator_name")]
    pub operator_name: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries for transport failures and retriable return codes.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,

    /// Key lifetime assumed when the Authority does not state one.
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: u64,

    /// Treat a key as expired this many seconds before its expiry.
    #[serde(default)]
    pub key_refresh_margin_secs: u64,

    /// Page size requested from the dictionary interface.
    #[serde(default = "default_uom_page_size")]
    pub uom_page_size: u32,

    /// Upper bound on dictionary pages fetched in one sync pass.
    #[serde(default = "default_uom_max_pages")]
    pub uom_max_pages: u32,

    #[serde(default)]
    pub return_codes: ReturnCodes,
}

fn default_server_url() -> String {
    "https://efristest.ura.go.ug/efrisws/ws/taapp/getInformation".to_string()
}

fn default_app_id() -> String {
    "AP04".to_string()
}

fn default_protocol_version() -> String {
    "1.1.20191201".to_string()
}

fn default_device_mac() -> String {
    "FFFFFFFFFFFF".to_string()
}

fn default_taxpayer_id() -> String {
    "1".to_string()
}

fn default_user_name() -> String {
    "admin".to_string()
}

fn default_operator_name() -> String {
    "administrator".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_transport_retries() -> u32 {
    1
}

fn default_key_ttl() -> u64 {
    24 * 60 * 60
}

fn default_uom_page_size() -> u32 {
    100
}

fn default_uom_max_pages() -> u32 {
    50
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            device_no: String::new(),
            tin: String::new(),
            brn: None,
            app_id: default_app_id(),
            protocol_version: default_protocol_version(),
            device_mac: default_device_mac(),
            taxpayer_id: default_taxpayer_id(),
            user_name: default_user_name(),
            operator_name: default_operator_name(),
            timeout_secs: default_timeout(),
            transport_retries: default_transport_retries(),
            key_ttl_secs: default_key_ttl(),
            key_refresh_margin_secs: 0,
            uom_page_size: default_uom_page_size(),
            uom_max_pages: default_uom_max_pages(),
            return_codes: ReturnCodes::default(),
        }
    }
}

impl GatewayConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `EFRIS_SERVER_URL` | Authority endpoint |
    /// | `EFRIS_DEVICE_NO` | Device number |
    /// | `EFRIS_TIN` | Business TIN |
    /// | `EFRIS_BRN` | Business registration number |
    /// | `EFRIS_DEVICE_MAC` | Device MAC sent in envelopes |
    /// | `EFRIS_OPERATOR` | Operator name |
    /// | `EFRIS_TIMEOUT` | Request timeout in seconds (default: 30) |
    /// | `EFRIS_TRANSPORT_RETRIES` | Retries for transient failures (default: 1) |
    /// | `EFRIS_KEY_TTL` | Key lifetime in seconds if the Authority omits it (default: 86400) |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_url: std::env::var("EFRIS_SERVER_URL").unwrap_or(defaults.server_url),
            device_no: std::env::var("EFRIS_DEVICE_NO").unwrap_or_default(),
            tin: std::env::var("EFRIS_TIN").unwrap_or_default(),
            brn: std::env::var("EFRIS_BRN").ok().filter(|v| !v.is_empty()),
            device_mac: std::env::var("EFRIS_DEVICE_MAC").unwrap_or(defaults.device_mac),
            operator_name: std::env::var("EFRIS_OPERATOR").unwrap_or(defaults.operator_name),
            timeout_secs: env_parse("EFRIS_TIMEOUT").unwrap_or(defaults.timeout_secs),
            transport_retries: env_parse("EFRIS_TRANSPORT_RETRIES")
                .unwrap_or(defaults.transport_retries),
            key_ttl_secs: env_parse("EFRIS_KEY_TTL").unwrap_or(defaults.key_ttl_secs),
            ..defaults
        }
    }

    /// Load config from a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> GatewayResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            GatewayError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Check the settings every Authority call depends on.
    pub fn validate(&self) -> GatewayResult<()> {
        let url = url::Url::parse(&self.server_url).map_err(|e| {
            GatewayError::config(format!("invalid server URL '{}': {}", self.server_url, e))
        })?;
        if url.scheme() != "https" {
            warn!(url = %self.server_url, "server URL is not HTTPS");
        }

        let mut missing = Vec::new();
        if self.device_no.trim().is_empty() {
            missing.push("device number");
        }
        if self.tin.trim().is_empty() {
            missing.push("TIN");
        }
        if !missing.is_empty() {
            return Err(GatewayError::config(format!(
                "settings incomplete: {}",
                missing.join(", ")
            )));
        }
        if self.timeout_secs == 0 {
            return Err(GatewayError::config("timeout must be at least one second"));
        }
        Ok(())
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_device(mut self, device_no: impl Into<String>, tin: impl Into<String>) -> Self {
        self.device_no = device_no.into();
        self.tin = tin.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_transport_retries(mut self, retries: u32) -> Self {
        self.transport_retries = retries;
        self
    }

    pub fn with_key_ttl_secs(mut self, secs: u64) -> Self {
        self.key_ttl_secs = secs;
        self
    }

    pub fn with_uom_page_size(mut self, size: u32) -> Self {
        self.uom_page_size = size;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Partition of the Authority's return-code space.
///
/// Codes not listed anywhere are terminal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnCodes {
    #[serde(default = "default_success_codes")]
    pub success: Vec<String>,

    /// Codes meaning the symmetric key is no longer accepted.
    #[serde(default = "default_key_stale_codes")]
    pub key_stale: Vec<String>,

    /// Transient codes (rate limiting, busy).
    #[serde(default = "default_retriable_codes")]
    pub retriable: Vec<String>,
}

fn default_success_codes() -> Vec<String> {
    vec!["00".to_string()]
}

fn default_key_stale_codes() -> Vec<String> {
    vec!["401".to_string(), "402".to_string()]
}

fn default_retriable_codes() -> Vec<String> {
    vec!["429".to_string(), "503".to_string(), "99".to_string()]
}

impl Default for ReturnCodes {
    fn default() -> Self {
        Self {
            success: default_success_codes(),
            key_stale: default_key_stale_codes(),
            retriable: default_retriable_codes(),
        }
    }
}

impl ReturnCodes {
    /// Classify a return code. `message` is consulted only for the
    /// Authority's habit of leaving the code empty on success.
    pub fn classify(&self, code: &str, message: &str) -> ReturnClass {
        let code = code.trim();
        let listed = |codes: &[String]| codes.iter().any(|c| c == code);

        if listed(&self.success) || (code.is_empty() && message.eq_ignore_ascii_case("SUCCESS")) {
            ReturnClass::Success
        } else if listed(&self.key_stale) {
            ReturnClass::KeyStale
        } else if listed(&self.retriable) {
            ReturnClass::Retriable
        } else {
            ReturnClass::Terminal
        }
    }
}
