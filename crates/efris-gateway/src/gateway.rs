//! Gateway facade: the single entry point for callers.
//!
//! Every operation returns a serializable outcome. Errors cross this boundary
//! only as [`GatewayFailure`] (`{kind, code, message}`).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::audit::{IntegrationLog, TracingIntegrationLog};
use crate::catalog::CatalogSynchronizer;
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::connection::ConnectionTester;
use crate::crypto::{AesGcmCipher, Base64KeyUnwrap, KeyUnwrap, PayloadCipher};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::http::AuthorityHttp;
use crate::key_manager::{AuthorityKeyExchange, KeyExchange, KeyManager};
use crate::stock::{StockInquiryClient, StockQuery};
use crate::store::{
    CatalogStore, CredentialStore, MemoryCatalogStore, MemoryCredentialStore,
    MemoryTaxpayerStore, TaxpayerStore,
};
use crate::taxpayer::TaxpayerResolver;
use crate::transport::Transport;
use crate::types::{ConnectionReport, KeyStatusReport, SyncReport, TaxpayerRecord};

/// Error shape returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayFailure {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip)]
    pub error: GatewayError,
}

impl GatewayFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl From<GatewayError> for GatewayFailure {
    fn from(error: GatewayError) -> Self {
        let message = match &error {
            GatewayError::AuthorityRejected { message, .. }
            | GatewayError::KeyStale { message, .. } => message.clone(),
            GatewayError::Transport { code, message, .. } if !code.is_empty() => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: error.kind(),
            code: error.code().map(String::from),
            message,
            error,
        }
    }
}

impl fmt::Display for GatewayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{:?} ({}): {}", self.kind, code, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for GatewayFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// `test_connection` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl From<ConnectionReport> for ConnectionOutcome {
    fn from(report: ConnectionReport) -> Self {
        Self {
            status: if report.reachable {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Error
            },
            message: report.detail,
            server_time: report.server_time,
            error_kind: report.error_kind,
        }
    }
}

/// `refresh_key` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayFailure>,
    pub key: KeyStatusReport,
}

/// `sync_uoms` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayFailure>,
}

/// `resolve_taxpayer` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxpayerOutcome {
    pub success: bool,
    pub tax_id: String,
    pub business_name: String,
    pub nin_brn: String,
    pub taxpayer_type: String,
    pub contact_email: String,
    pub contact_number: String,
    pub address: String,
    pub government_tin: String,
    pub legal_name: String,
}

impl From<TaxpayerRecord> for TaxpayerOutcome {
    fn from(record: TaxpayerRecord) -> Self {
        Self {
            success: true,
            tax_id: record.tin,
            business_name: record.business_name,
            nin_brn: record.nin_brn,
            taxpayer_type: record.taxpayer_type,
            contact_email: record.contact_email,
            contact_number: record.contact_number,
            address: record.address,
            government_tin: record.government_tin,
            legal_name: record.legal_name,
        }
    }
}

/// `query_stock` result. Authority rejections arrive with `success: false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockOutcome {
    pub success: bool,
    pub return_code: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Builds a [`Gateway`]. Unset collaborators default to in-memory stores,
/// [`AesGcmCipher`], [`Base64KeyUnwrap`], [`SystemClock`] and
/// [`TracingIntegrationLog`].
#[derive(Debug)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    credential_store: Option<Arc<dyn CredentialStore>>,
    catalog_store: Option<Arc<dyn CatalogStore>>,
    taxpayer_store: Option<Arc<dyn TaxpayerStore>>,
    cipher: Arc<dyn PayloadCipher>,
    key_unwrap: Arc<dyn KeyUnwrap>,
    key_exchange: Option<Arc<dyn KeyExchange>>,
    clock: Arc<dyn Clock>,
    log: Arc<dyn IntegrationLog>,
}

impl GatewayBuilder {
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    pub fn catalog_store(mut self, store: Arc<dyn CatalogStore>) -> Self {
        self.catalog_store = Some(store);
        self
    }

    pub fn taxpayer_store(mut self, store: Arc<dyn TaxpayerStore>) -> Self {
        self.taxpayer_store = Some(store);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn PayloadCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn key_unwrap(mut self, unwrap: Arc<dyn KeyUnwrap>) -> Self {
        self.key_unwrap = unwrap;
        self
    }

    /// Replace the T104 exchange (e.g. a host-side key service).
    pub fn key_exchange(mut self, exchange: Arc<dyn KeyExchange>) -> Self {
        self.key_exchange = Some(exchange);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn integration_log(mut self, log: Arc<dyn IntegrationLog>) -> Self {
        self.log = log;
        self
    }

    /// Validate the config and load the stored key.
    pub async fn build(self) -> GatewayResult<Gateway> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let http = AuthorityHttp::new(config.clone(), self.log, self.clock.clone())?;
        let exchange = self.key_exchange.unwrap_or_else(|| {
            Arc::new(AuthorityKeyExchange::new(
                http.clone(),
                self.cipher.clone(),
                self.key_unwrap,
            ))
        });
        let credential_store = self
            .credential_store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let keys = KeyManager::load(&config, exchange, credential_store, self.clock).await?;

        let transport = Transport::new(http, keys, self.cipher);
        let catalog_store = self
            .catalog_store
            .unwrap_or_else(|| Arc::new(MemoryCatalogStore::new()));
        let taxpayer_store = self
            .taxpayer_store
            .unwrap_or_else(|| Arc::new(MemoryTaxpayerStore::new()));

        info!(
            server_url = %config.server_url,
            device_no = %config.device_no,
            "gateway ready"
        );

        Ok(Gateway {
            connection: ConnectionTester::new(transport.clone()),
            catalog: CatalogSynchronizer::new(transport.clone(), catalog_store)
                .with_paging(config.uom_page_size, config.uom_max_pages),
            taxpayers: TaxpayerResolver::new(transport.clone()),
            stock: StockInquiryClient::new(transport.clone()),
            transport,
            taxpayer_store,
            taxpayer_writes: Arc::new(Mutex::new(())),
            config,
        })
    }
}

/// Entry point for all Authority operations. Clones share state.
#[derive(Debug, Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    transport: Transport,
    connection: ConnectionTester,
    catalog: CatalogSynchronizer,
    taxpayers: TaxpayerResolver,
    stock: StockInquiryClient,
    taxpayer_store: Arc<dyn TaxpayerStore>,
    taxpayer_writes: Arc<Mutex<()>>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            credential_store: None,
            catalog_store: None,
            taxpayer_store: None,
            cipher: Arc::new(AesGcmCipher),
            key_unwrap: Arc::new(Base64KeyUnwrap),
            key_exchange: None,
            clock: Arc::new(SystemClock),
            log: Arc::new(TracingIntegrationLog),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn keys(&self) -> &KeyManager {
        self.transport.keys()
    }

    pub async fn test_connection(&self) -> ConnectionOutcome {
        self.connection.test_connection().await.into()
    }

    /// Rotate the key now, regardless of expiry.
    pub async fn refresh_key(&self) -> RefreshOutcome {
        let result = self.keys().force_refresh().await;
        let key = self.keys().status();
        match result {
            Ok(_) => RefreshOutcome {
                success: true,
                error: None,
                key,
            },
            Err(e) => {
                warn!(error = %e, "key refresh failed");
                RefreshOutcome {
                    success: false,
                    error: Some(e.into()),
                    key,
                }
            }
        }
    }

    /// Make sure a usable key is in place without forcing a rotation.
    pub async fn ensure_fresh_key(&self) -> Result<KeyStatusReport, GatewayFailure> {
        self.keys().ensure_fresh_key().await?;
        Ok(self.keys().status())
    }

    pub fn key_status(&self) -> KeyStatusReport {
        self.keys().status()
    }

    pub async fn sync_uoms(&self) -> SyncOutcome {
        match self.catalog.sync_uoms().await {
            Ok(report) => SyncOutcome {
                status: OutcomeStatus::Success,
                message: report.to_string(),
                report: Some(report),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "UOM sync failed");
                let failure = GatewayFailure::from(e);
                SyncOutcome {
                    status: OutcomeStatus::Error,
                    message: failure.message.clone(),
                    report: None,
                    error: Some(failure),
                }
            }
        }
    }

    pub async fn remove_uom(&self, authority_id: &str) -> Result<bool, GatewayFailure> {
        Ok(self.catalog.remove_uom(authority_id).await?)
    }

    /// Resolve a TIN. `customer_name` only labels the integration record.
    pub async fn resolve_taxpayer(
        &self,
        tax_id: &str,
        customer_name: Option<&str>,
    ) -> Result<TaxpayerOutcome, GatewayFailure> {
        let record = self
            .taxpayers
            .resolve_taxpayer(tax_id, customer_name.filter(|n| !n.trim().is_empty()))
            .await?;
        Ok(record.into())
    }

    /// Resolve a TIN and upsert the record into the taxpayer store.
    pub async fn resolve_and_store_taxpayer(
        &self,
        tax_id: &str,
        customer_name: Option<&str>,
    ) -> Result<TaxpayerOutcome, GatewayFailure> {
        let record = self
            .taxpayers
            .resolve_taxpayer(tax_id, customer_name.filter(|n| !n.trim().is_empty()))
            .await?;

        let _write = self.taxpayer_writes.lock().await;
        self.taxpayer_store.upsert(record.clone()).await?;
        info!(tin = %record.tin, "taxpayer record stored");
        Ok(record.into())
    }

    pub async fn query_stock(&self, item_code: &str) -> Result<StockOutcome, GatewayFailure> {
        self.query_item(&StockQuery::new(item_code)).await
    }

    pub async fn query_item(&self, query: &StockQuery) -> Result<StockOutcome, GatewayFailure> {
        let result = self.stock.query(query).await?;
        Ok(StockOutcome {
            success: result.success,
            return_code: result.return_code,
            message: result.message,
            data: result.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_authority_code_and_message() {
        let failure = GatewayFailure::from(GatewayError::AuthorityRejected {
            code: "2110".into(),
            message: "TIN does not exist".into(),
        });
        assert_eq!(failure.kind, ErrorKind::AuthorityRejected);
        assert_eq!(failure.code.as_deref(), Some("2110"));
        assert_eq!(failure.message, "TIN does not exist");
        assert_eq!(failure.exit_code(), 2);

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "AUTHORITY_REJECTED",
                "code": "2110",
                "message": "TIN does not exist"
            })
        );
    }

    #[test]
    fn test_connection_outcome_shape() {
        let outcome = ConnectionOutcome::from(ConnectionReport {
            reachable: true,
            detail: "Connection successful".into(),
            server_time: Some("02/01/2026 14:56:31".into()),
            error_kind: None,
            return_code: Some("00".into()),
        });
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["server_time"], "02/01/2026 14:56:31");
        assert!(json.get("error_kind").is_none());
    }

    #[tokio::test]
    async fn test_build_rejects_incomplete_config() {
        let err = Gateway::builder(GatewayConfig::default())
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
