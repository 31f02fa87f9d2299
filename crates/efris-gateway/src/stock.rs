//! Goods/stock inquiry for a single item (T127).

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::envelope::Interface;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::Transport;
use crate::types::StockInquiryResult;

/// Inquiry for one item. Only `item_code` is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuery {
    pub item_code: String,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl StockQuery {
    pub fn new(item_code: impl Into<String>) -> Self {
        Self {
            item_code: item_code.into(),
            ..Self::default()
        }
    }

    fn payload(&self) -> serde_json::Value {
        json!({
            "goodsCode": self.item_code.trim(),
            "goodsName": self.item_name.as_deref().unwrap_or(""),
            "commodityCategoryName": self.category.as_deref().unwrap_or(""),
            "pageNo": "1",
            "pageSize": "10",
        })
    }
}

#[derive(Debug, Clone)]
pub struct StockInquiryClient {
    transport: Transport,
}

impl StockInquiryClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub async fn query_stock(&self, item_code: &str) -> GatewayResult<StockInquiryResult> {
        self.query(&StockQuery::new(item_code)).await
    }

    /// Authority rejections come back in the result with their original
    /// code and message; only transport, key and integrity failures are errors.
    pub async fn query(&self, query: &StockQuery) -> GatewayResult<StockInquiryResult> {
        let item_code = query.item_code.trim();
        if item_code.is_empty() {
            return Err(GatewayError::validation("item code must not be empty"));
        }
        debug!(item_code, "querying goods");

        let response = self
            .transport
            .send(Interface::GoodsInquiry, &query.payload(), Some(item_code))
            .await?;

        Ok(StockInquiryResult {
            item_code: item_code.to_string(),
            success: response.is_success(),
            return_code: response.return_code,
            message: response.message,
            data: response.payload,
        })
    }
}
