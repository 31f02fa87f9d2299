//! Taxpayer lookup by TIN (T119).

use serde_json::json;
use tracing::{debug, warn};

use crate::envelope::Interface;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::Transport;
use crate::types::{field_text, TaxpayerRecord};

/// Shortest TIN the Authority accepts.
pub const MIN_TIN_LEN: usize = 10;

/// Resolves taxpayer records. Does not write anywhere.
#[derive(Debug, Clone)]
pub struct TaxpayerResolver {
    transport: Transport,
}

impl TaxpayerResolver {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Look up `tax_number`. `reference` is the host record asking (logged).
    pub async fn resolve_taxpayer(
        &self,
        tax_number: &str,
        reference: Option<&str>,
    ) -> GatewayResult<TaxpayerRecord> {
        let tin = validate_tin(tax_number)?;
        debug!(tin, "resolving taxpayer");

        let request = json!({ "ninBrn": "", "tin": tin });
        let response = self
            .transport
            .send(
                Interface::TaxpayerQuery,
                &request,
                Some(reference.unwrap_or(tin)),
            )
            .await?;

        if !response.is_success() {
            warn!(tin, return_code = %response.return_code, "taxpayer lookup rejected");
            return Err(response.into_error());
        }

        response
            .payload
            .as_ref()
            .and_then(|payload| payload.get("taxpayer"))
            .filter(|taxpayer| taxpayer.is_object())
            .map(|taxpayer| map_taxpayer(tin, taxpayer))
            .ok_or_else(|| GatewayError::AuthorityRejected {
                code: response.return_code.clone(),
                message: "no taxpayer record in response".to_string(),
            })
    }
}

/// Trimmed TIN, or `Validation` when empty or too short.
pub fn validate_tin(tax_number: &str) -> GatewayResult<&str> {
    let tin = tax_number.trim();
    if tin.is_empty() {
        return Err(GatewayError::validation("tax number must not be empty"));
    }
    if tin.chars().count() < MIN_TIN_LEN {
        return Err(GatewayError::validation(format!(
            "Please enter a valid TIN (minimum {} characters)",
            MIN_TIN_LEN
        )));
    }
    Ok(tin)
}

fn map_taxpayer(tin: &str, taxpayer: &serde_json::Value) -> TaxpayerRecord {
    let text = |name: &str| field_text(taxpayer, name).unwrap_or_default();
    let legal_name = text("legalName");
    let business_name = field_text(taxpayer, "businessName")
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| legal_name.clone());
    let government_tin = field_text(taxpayer, "governmentTIN")
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| text("tin"));

    TaxpayerRecord {
        tin: tin.to_string(),
        legal_name,
        business_name,
        nin_brn: text("ninBrn"),
        taxpayer_type: text("taxpayerType"),
        contact_email: text("contactEmail"),
        contact_number: text("contactNumber"),
        address: text("address"),
        government_tin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tin() {
        assert!(matches!(validate_tin(""), Err(GatewayError::Validation { .. })));
        assert!(matches!(validate_tin("   "), Err(GatewayError::Validation { .. })));
        assert!(matches!(validate_tin("100002"), Err(GatewayError::Validation { .. })));
        assert_eq!(validate_tin(" 1000023516 ").unwrap(), "1000023516");
    }

    #[test]
    fn test_map_taxpayer_fields() {
        let taxpayer = serde_json::json!({
            "legalName": "ACME UGANDA LIMITED",
            "ninBrn": "80020001234567",
            "taxpayerType": "201",
            "contactEmail": "accounts@acme.ug",
            "contactNumber": "0700000000",
            "address": "Plot 1, Kampala Road",
            "tin": "1000023516"
        });

        let record = map_taxpayer("1000023516", &taxpayer);
        assert_eq!(record.legal_name, "ACME UGANDA LIMITED");
        assert_eq!(record.business_name, "ACME UGANDA LIMITED");
        assert_eq!(record.nin_brn, "80020001234567");
        assert_eq!(record.taxpayer_type, "201");
        assert_eq!(record.government_tin, "1000023516");
    }

    #[test]
    fn test_map_taxpayer_prefers_business_name_and_government_tin() {
        let taxpayer = serde_json::json!({
            "legalName": "ACME UGANDA LIMITED",
            "businessName": "Acme Hardware",
            "governmentTIN": "1000099999",
            "tin": "1000023516"
        });

        let record = map_taxpayer("1000023516", &taxpayer);
        assert_eq!(record.business_name, "Acme Hardware");
        assert_eq!(record.government_tin, "1000099999");
        assert_eq!(record.contact_email, "");
    }
}
