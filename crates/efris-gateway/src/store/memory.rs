//! In-memory stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CatalogStore, CredentialStore, TaxpayerStore};
use crate::error::GatewayResult;
use crate::types::{Credentials, TaxpayerRecord, UomRecord};

#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<Option<Credentials>>>,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(credentials))),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> GatewayResult<Option<Credentials>> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, credentials: &Credentials) -> GatewayResult<()> {
        *self.inner.write().await = Some(credentials.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    records: Arc<RwLock<BTreeMap<String, UomRecord>>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get(&self, authority_id: &str) -> GatewayResult<Option<UomRecord>> {
        Ok(self.records.read().await.get(authority_id).cloned())
    }

    async fn upsert(&self, record: UomRecord) -> GatewayResult<()> {
        self.records
            .write()
            .await
            .insert(record.authority_id.clone(), record);
        Ok(())
    }

    async fn upsert_many(&self, records: Vec<UomRecord>) -> GatewayResult<()> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.authority_id.clone(), record);
        }
        Ok(())
    }

    async fn remove(&self, authority_id: &str) -> GatewayResult<bool> {
        Ok(self.records.write().await.remove(authority_id).is_some())
    }

    async fn list(&self) -> GatewayResult<Vec<UomRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTaxpayerStore {
    records: Arc<RwLock<BTreeMap<String, TaxpayerRecord>>>,
}

impl MemoryTaxpayerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaxpayerStore for MemoryTaxpayerStore {
    async fn get(&self, tin: &str) -> GatewayResult<Option<TaxpayerRecord>> {
        Ok(self.records.read().await.get(tin).cloned())
    }

    async fn upsert(&self, record: TaxpayerRecord) -> GatewayResult<()> {
        self.records.write().await.insert(record.tin.clone(), record);
        Ok(())
    }
}
