//! Data model shared by the gateway components.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{ErrorKind, GatewayError};

/// Symmetric key bytes. Wiped on drop; never printed.
#[derive(Clone)]
pub struct KeyMaterial(Zeroizing<Vec<u8>>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.as_bytes()));
        digest[..16].to_string()
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial({})", self.fingerprint())
    }
}

impl Serialize for KeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(hex::encode(self.as_bytes()));
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        hex::decode(encoded.trim())
            .map(KeyMaterial::new)
            .map_err(serde::de::Error::custom)
    }
}

/// Key status as seen at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Missing,
    Valid,
    Expired,
}

/// Key manager state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyPhase {
    Missing,
    Acquiring,
    Valid,
    Expired,
    Refreshing,
}

/// Persisted settings record: endpoint, client identity and the current key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub server_url: String,

    /// Device number (client identifier).
    pub device_no: String,

    #[serde(default)]
    pub key: Option<KeyMaterial>,

    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn empty(server_url: impl Into<String>, device_no: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            device_no: device_no.into(),
            key: None,
            issued_at: None,
            expires_at: None,
        }
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> KeyStatus {
        match (&self.key, self.expires_at) {
            (None, _) => KeyStatus::Missing,
            (Some(_), Some(expires_at)) if now < expires_at => KeyStatus::Valid,
            (Some(_), _) => KeyStatus::Expired,
        }
    }

    /// Whether the key is usable at `now` with `margin` to spare.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.key.is_some() && self.expires_at.is_some_and(|exp| now + margin < exp)
    }
}

/// Key state report; never carries key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatusReport {
    pub status: KeyStatus,
    pub phase: KeyPhase,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
}

/// Classification of an Authority return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnClass {
    Success,
    /// Transient (rate limited, busy).
    Retriable,
    /// The key in use is no longer accepted.
    KeyStale,
    Terminal,
}

/// Normalized Authority reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorityResponse {
    /// `dataExchangeId` of the request that produced this reply.
    pub request_id: String,
    pub return_code: String,
    pub message: String,
    pub class: ReturnClass,

    /// Decoded content (success replies only).
    pub payload: Option<serde_json::Value>,

    /// Raw `returnStateInfo` as received.
    pub detail: Option<serde_json::Value>,
}

impl AuthorityResponse {
    pub fn is_success(&self) -> bool {
        self.class == ReturnClass::Success
    }

    /// Error for a non-success reply. A busy Authority stays retriable;
    /// only terminal codes become `AuthorityRejected`.
    pub fn into_error(self) -> GatewayError {
        match self.class {
            ReturnClass::Retriable => GatewayError::busy(self.return_code, self.message),
            ReturnClass::KeyStale => GatewayError::KeyStale {
                code: self.return_code,
                message: self.message,
            },
            ReturnClass::Success | ReturnClass::Terminal => GatewayError::AuthorityRejected {
                code: self.return_code,
                message: self.message,
            },
        }
    }
}

/// Unit of measure as mirrored from the Authority dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UomRecord {
    /// Authority-side identifier; the catalog key.
    pub authority_id: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
}

/// Taxpayer identity as returned by the Authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxpayerRecord {
    pub tin: String,
    pub legal_name: String,
    pub business_name: String,
    pub nin_brn: String,
    pub taxpayer_type: String,
    pub contact_email: String,
    pub contact_number: String,
    pub address: String,
    pub government_tin: String,
}

/// Goods/stock inquiry result for one item. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockInquiryResult {
    pub item_code: String,
    pub success: bool,
    pub return_code: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Counts from one catalog reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.unchanged
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} UOMs synced ({} created, {} updated, {} unchanged)",
            self.total(),
            self.added,
            self.updated,
            self.unchanged
        )
    }
}

/// Result of a connection test. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub reachable: bool,
    pub detail: String,
    pub server_time: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub return_code: Option<String>,
}

/// Text of `value[name]`, accepting strings and numbers.
pub(crate) fn field_text(value: &serde_json::Value, name: &str) -> Option<String> {
    match value.get(name)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
