//! Integration gateway for the EFRIS e-invoicing authority.
//!
//! This crate sits between a business-records application and the Authority,
//! providing:
//!
//! - Symmetric key acquisition and rotation (single-flight, cancellation safe)
//! - Sealed and signed envelope transport with bounded retries
//! - Connection test, taxpayer lookup, UOM catalog sync and stock inquiry
//! - Pluggable stores for credentials, catalog and taxpayer records
//! - An integration log of every Authority exchange
//!
//! # Quick Start
//!
//! ```no_run
//! use efris_gateway::{Gateway, GatewayConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GatewayConfig::from_env();
//! let gateway = Gateway::builder(config).build().await?;
//!
//! let outcome = gateway.query_stock("ITEM-001").await?;
//! println!("{} {}", outcome.return_code, outcome.message);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `EFRIS_SERVER_URL` | Authority endpoint (default: the EFRIS test server) |
//! | `EFRIS_DEVICE_NO` | Device number issued by the Authority |
//! | `EFRIS_TIN` | Business TIN |
//! | `EFRIS_BRN` | Business registration number |
//! | `EFRIS_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `EFRIS_TRANSPORT_RETRIES` | Retries for transient failures (default: 1) |
//! | `EFRIS_KEY_TTL` | Key lifetime in seconds when the Authority omits it (default: 86400) |

pub mod audit;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod gateway;
mod http;
pub mod key_manager;
pub mod stock;
pub mod store;
pub mod taxpayer;
pub mod transport;
pub mod types;

// Re-export main types
pub use audit::{
    IntegrationLog, IntegrationRecord, IntegrationStatus, JsonlIntegrationLog,
    MemoryIntegrationLog, TracingIntegrationLog,
};
pub use catalog::CatalogSynchronizer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GatewayConfig, ReturnCodes};
pub use connection::ConnectionTester;
pub use crypto::{AesGcmCipher, Base64KeyUnwrap, KeyUnwrap, PayloadCipher};
pub use envelope::{Envelope, Interface};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::{
    ConnectionOutcome, Gateway, GatewayBuilder, GatewayFailure, OutcomeStatus, RefreshOutcome,
    StockOutcome, SyncOutcome, TaxpayerOutcome,
};
pub use key_manager::{IssuedKey, KeyExchange, KeyManager};
pub use stock::{StockInquiryClient, StockQuery};
pub use store::{
    CatalogStore, CredentialStore, JsonFileStore, MemoryCatalogStore, MemoryCredentialStore,
    MemoryTaxpayerStore, TaxpayerStore,
};
pub use taxpayer::TaxpayerResolver;
pub use transport::Transport;
pub use types::{
    AuthorityResponse, ConnectionReport, Credentials, KeyMaterial, KeyPhase, KeyStatus,
    KeyStatusReport, ReturnClass, StockInquiryResult, SyncReport, TaxpayerRecord, UomRecord,
};
