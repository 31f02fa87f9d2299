//! Authority wire envelope.
//!
//! Every interface is a POST of the same JSON envelope to one endpoint; the
//! interface is selected by `globalInfo.interfaceCode`.
//!
//! ```text
//! {
//!   "data": { "content", "signature", "dataDescription": { codeType, encryptCode, zipCode } },
//!   "globalInfo": { appId, version, dataExchangeId, interfaceCode, ..., extendField },
//!   "returnStateInfo": { returnCode, returnMessage }
//! }
//! ```

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;

/// Authority interfaces used by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// T101: server time, used as the connectivity check.
    ServerTime,
    /// T104: symmetric key exchange.
    KeyExchange,
    /// T115: system dictionary (units of measure).
    SystemDictionary,
    /// T119: taxpayer lookup by TIN.
    TaxpayerQuery,
    /// T127: goods/services and stock inquiry.
    GoodsInquiry,
}

impl Interface {
    pub fn code(self) -> &'static str {
        match self {
            Self::ServerTime => "T101",
            Self::KeyExchange => "T104",
            Self::SystemDictionary => "T115",
            Self::TaxpayerQuery => "T119",
            Self::GoodsInquiry => "T127",
        }
    }

    /// Service name recorded in the integration log.
    pub fn service_name(self) -> &'static str {
        match self {
            Self::ServerTime => "Server Time (T101)",
            Self::KeyExchange => "Key Exchange (T104)",
            Self::SystemDictionary => "System Dictionary (T115)",
            Self::TaxpayerQuery => "Taxpayer TIN Query (T119)",
            Self::GoodsInquiry => "Goods/Services Inquiry (T127)",
        }
    }

    /// Whether calls must carry content sealed with the current key.
    pub fn is_signed(self) -> bool {
        !matches!(self, Self::ServerTime | Self::KeyExchange)
    }
}

/// Request/response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub data: DataBlock,
    #[serde(default)]
    pub global_info: GlobalInfo,
    #[serde(default)]
    pub return_state_info: ReturnStateInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBlock {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub data_description: DataDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDescription {
    #[serde(default = "zero")]
    pub code_type: String,
    /// "0" plain, "1"/"2" sealed with the symmetric key.
    #[serde(default = "zero")]
    pub encrypt_code: String,
    /// "1" when content is gzip-compressed.
    #[serde(default = "zero")]
    pub zip_code: String,
}

fn zero() -> String {
    "0".to_string()
}

impl Default for DataDescription {
    fn default() -> Self {
        Self {
            code_type: zero(),
            encrypt_code: zero(),
            zip_code: zero(),
        }
    }
}

impl DataDescription {
    pub fn is_encrypted(&self) -> bool {
        matches!(self.encrypt_code.as_str(), "1" | "2")
    }

    pub fn is_zipped(&self) -> bool {
        self.zip_code == "1"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalInfo {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub version: String,
    /// Unique per call; the Authority uses it to detect replays.
    #[serde(default)]
    pub data_exchange_id: String,
    #[serde(default)]
    pub interface_code: String,
    #[serde(default)]
    pub request_code: String,
    #[serde(default)]
    pub request_time: String,
    #[serde(default)]
    pub response_code: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(rename = "deviceMAC", default)]
    pub device_mac: String,
    #[serde(default)]
    pub device_no: String,
    #[serde(default)]
    pub tin: String,
    #[serde(default)]
    pub brn: String,
    #[serde(rename = "taxpayerID", default)]
    pub taxpayer_id: String,
    #[serde(default)]
    pub longitude: String,
    #[serde(default)]
    pub latitude: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub extend_field: ExtendField,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendField {
    #[serde(default)]
    pub response_date_format: String,
    #[serde(default)]
    pub response_time_format: String,
    #[serde(default)]
    pub reference_no: String,
    #[serde(default)]
    pub operator_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnStateInfo {
    #[serde(default)]
    pub return_code: String,
    #[serde(default)]
    pub return_message: String,
}

/// Request times are stamped in East Africa Time.
fn eat_offset() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Fresh 32-hex-char identifier for `dataExchangeId`.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn new_reference_no() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..14].to_uppercase()
}

impl Envelope {
    /// Build a request envelope for `interface` carrying `data`.
    pub fn request(
        config: &GatewayConfig,
        interface: Interface,
        data: DataBlock,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            data,
            global_info: GlobalInfo {
                app_id: config.app_id.clone(),
                version: config.protocol_version.clone(),
                data_exchange_id: new_request_id(),
                interface_code: interface.code().to_string(),
                request_code: "TP".to_string(),
                request_time: now
                    .with_timezone(&eat_offset())
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                response_code: "TA".to_string(),
                user_name: config.user_name.clone(),
                device_mac: config.device_mac.clone(),
                device_no: config.device_no.clone(),
                tin: config.tin.clone(),
                brn: config.brn.clone().unwrap_or_default(),
                taxpayer_id: config.taxpayer_id.clone(),
                longitude: "32.61665".to_string(),
                latitude: "0.36601".to_string(),
                agent_type: "0".to_string(),
                extend_field: ExtendField {
                    response_date_format: "dd/MM/yyyy".to_string(),
                    response_time_format: "dd/MM/yyyy HH:mm:ss".to_string(),
                    reference_no: new_reference_no(),
                    operator_name: config.operator_name.clone(),
                },
            },
            return_state_info: ReturnStateInfo::default(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.global_info.data_exchange_id
    }
}

impl DataBlock {
    pub fn plain(content: String) -> Self {
        Self {
            content,
            signature: String::new(),
            data_description: DataDescription::default(),
        }
    }

    pub fn sealed(content: String, signature: String) -> Self {
        Self {
            content,
            signature,
            data_description: DataDescription {
                encrypt_code: "1".to_string(),
                ..DataDescription::default()
            },
        }
    }
}

/// Fields whose values are replaced before an envelope is logged.
pub const REDACTED_FIELDS: &[&str] = &["content", "signature", "passowrdDes"];

/// Copy of `value` with [`REDACTED_FIELDS`] masked, at any depth.
pub fn redact(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if REDACTED_FIELDS.contains(&k.as_str()) && !v.is_null() {
                        let len = v.as_str().map(str::len).unwrap_or(0);
                        (k.clone(), serde_json::Value::String(format!("<redacted {len} chars>")))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> GatewayConfig {
        GatewayConfig::default().with_device("TCS0001", "1000000000")
    }

    #[test]
    fn test_request_envelope_fields() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 11, 56, 31).unwrap();
        let env = Envelope::request(&config(), Interface::TaxpayerQuery, DataBlock::default(), now);

        let json = serde_json::to_value(&env).unwrap();
        let info = &json["globalInfo"];
        assert_eq!(info["interfaceCode"], "T119");
        assert_eq!(info["deviceNo"], "TCS0001");
        assert_eq!(info["tin"], "1000000000");
        assert_eq!(info["requestTime"], "2026-01-02 14:56:31");
        assert_eq!(info["extendField"]["operatorName"], "administrator");
        assert!(info.get("deviceMAC").is_some());
        assert!(info.get("taxpayerID").is_some());
        assert_eq!(json["data"]["dataDescription"]["encryptCode"], "0");
        assert_eq!(env.request_id().len(), 32);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let now = Utc::now();
        let a = Envelope::request(&config(), Interface::GoodsInquiry, DataBlock::default(), now);
        let b = Envelope::request(&config(), Interface::GoodsInquiry, DataBlock::default(), now);
        assert_ne!(a.request_id(), b.request_id());
        assert_ne!(
            a.global_info.extend_field.reference_no,
            b.global_info.extend_field.reference_no
        );
    }

    #[test]
    fn test_response_with_missing_blocks_parses() {
        let env: Envelope =
            serde_json::from_str(r#"{"returnStateInfo":{"returnCode":"00","returnMessage":"SUCCESS"}}"#)
                .unwrap();
        assert_eq!(env.return_state_info.return_code, "00");
        assert!(env.data.content.is_empty());
        assert!(!env.data.data_description.is_encrypted());
    }

    #[test]
    fn test_redact_masks_secret_fields() {
        let value = serde_json::json!({
            "data": {"content": "c2VjcmV0", "signature": "abc", "dataDescription": {"zipCode": "0"}},
            "globalInfo": {"interfaceCode": "T104"}
        });
        let redacted = redact(&value);
        assert_eq!(redacted["data"]["content"], "<redacted 8 chars>");
        assert_eq!(redacted["data"]["signature"], "<redacted 3 chars>");
        assert_eq!(redacted["globalInfo"]["interfaceCode"], "T104");
    }
}
