//! Record stores the gateway reads and writes through.
//!
//! The host application owns persistence; these traits are the narrow
//! interface it implements. Two implementations ship with the crate:
//! [`memory`] for tests and embedding, [`file`] for JSON files on disk.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{Credentials, TaxpayerRecord, UomRecord};

pub mod file;
pub mod memory;

pub use file::{default_state_dir, JsonFileStore};
pub use memory::{MemoryCatalogStore, MemoryCredentialStore, MemoryTaxpayerStore};

/// Persisted endpoint, client identity and key. Written only by the key manager.
#[async_trait]
pub trait CredentialStore: Debug + Send + Sync {
    async fn load(&self) -> GatewayResult<Option<Credentials>>;

    async fn save(&self, credentials: &Credentials) -> GatewayResult<()>;
}

/// Local units-of-measure catalog keyed by Authority identifier.
#[async_trait]
pub trait CatalogStore: Debug + Send + Sync {
    async fn get(&self, authority_id: &str) -> GatewayResult<Option<UomRecord>>;

    /// Insert or replace the record with the same `authority_id`.
    async fn upsert(&self, record: UomRecord) -> GatewayResult<()>;

    /// Upsert a batch. Stores backed by a single file should override this
    /// to write once.
    async fn upsert_many(&self, records: Vec<UomRecord>) -> GatewayResult<()> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(())
    }

    /// Returns whether a record was removed.
    async fn remove(&self, authority_id: &str) -> GatewayResult<bool>;

    async fn list(&self) -> GatewayResult<Vec<UomRecord>>;
}

/// Local taxpayer records keyed by TIN.
#[async_trait]
pub trait TaxpayerStore: Debug + Send + Sync {
    async fn get(&self, tin: &str) -> GatewayResult<Option<TaxpayerRecord>>;

    async fn upsert(&self, record: TaxpayerRecord) -> GatewayResult<()>;
}
