//! JSON-file stores.
//!
//! # Layout
//!
//! ```text
//! ~/.efris/
//!   credentials.json   # endpoint, device number, key (hex), issue/expiry times
//!   uoms.json          # { authority_id: UomRecord }
//!   taxpayers.json     # { tin: TaxpayerRecord }
//! ```
//!
//! Writes go to a temp file and are renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{CatalogStore, CredentialStore, TaxpayerStore};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{Credentials, TaxpayerRecord, UomRecord};

const CREDENTIALS_FILE: &str = "credentials.json";
const UOMS_FILE: &str = "uoms.json";
const TAXPAYERS_FILE: &str = "taxpayers.json";

/// All three stores backed by JSON files in one directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on the map files.
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Store in the default location (`~/.efris`).
    pub fn new() -> GatewayResult<Self> {
        Ok(Self::with_dir(default_state_dir()?))
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> GatewayResult<Option<T>> {
        let path = self.dir.join(file);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "store file not present");
                return Ok(None);
            }
            Err(e) => {
                return Err(GatewayError::store(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&text).map(Some).map_err(|e| {
            GatewayError::store(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> GatewayResult<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            GatewayError::store(format!("failed to create store directory: {}", e))
        })?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| GatewayError::store(format!("failed to serialize {}: {}", file, e)))?;
        write_atomic(&self.dir.join(file), &json).await
    }

    async fn read_map<T: DeserializeOwned>(&self, file: &str) -> GatewayResult<BTreeMap<String, T>> {
        Ok(self.read_json(file).await?.unwrap_or_default())
    }
}

pub fn default_state_dir() -> GatewayResult<PathBuf> {
    let base = dirs::home_dir()
        .or_else(dirs::data_local_dir)
        .ok_or_else(|| GatewayError::store("could not determine home directory"))?;
    Ok(base.join(".efris"))
}

async fn write_atomic(path: &Path, content: &str) -> GatewayResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| GatewayError::store(format!("failed to write temp file: {}", e)))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| GatewayError::store(format!("failed to rename temp file: {}", e)))?;

    Ok(())
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn load(&self) -> GatewayResult<Option<Credentials>> {
        self.read_json(CREDENTIALS_FILE).await
    }

    async fn save(&self, credentials: &Credentials) -> GatewayResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(CREDENTIALS_FILE, credentials).await
    }
}

#[async_trait]
impl CatalogStore for JsonFileStore {
    async fn get(&self, authority_id: &str) -> GatewayResult<Option<UomRecord>> {
        let mut map: BTreeMap<String, UomRecord> = self.read_map(UOMS_FILE).await?;
        Ok(map.remove(authority_id))
    }

    async fn upsert(&self, record: UomRecord) -> GatewayResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: BTreeMap<String, UomRecord> = self.read_map(UOMS_FILE).await?;
        map.insert(record.authority_id.clone(), record);
        self.write_json(UOMS_FILE, &map).await
    }

    async fn upsert_many(&self, records: Vec<UomRecord>) -> GatewayResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut map: BTreeMap<String, UomRecord> = self.read_map(UOMS_FILE).await?;
        for record in records {
            map.insert(record.authority_id.clone(), record);
        }
        self.write_json(UOMS_FILE, &map).await
    }

    async fn remove(&self, authority_id: &str) -> GatewayResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut map: BTreeMap<String, UomRecord> = self.read_map(UOMS_FILE).await?;
        if map.remove(authority_id).is_none() {
            return Ok(false);
        }
        self.write_json(UOMS_FILE, &map).await?;
        Ok(true)
    }

    async fn list(&self) -> GatewayResult<Vec<UomRecord>> {
        let map: BTreeMap<String, UomRecord> = self.read_map(UOMS_FILE).await?;
        Ok(map.into_values().collect())
    }
}

#[async_trait]
impl TaxpayerStore for JsonFileStore {
    async fn get(&self, tin: &str) -> GatewayResult<Option<TaxpayerRecord>> {
        let mut map: BTreeMap<String, TaxpayerRecord> = self.read_map(TAXPAYERS_FILE).await?;
        Ok(map.remove(tin))
    }

    async fn upsert(&self, record: TaxpayerRecord) -> GatewayResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: BTreeMap<String, TaxpayerRecord> = self.read_map(TAXPAYERS_FILE).await?;
        map.insert(record.tin.clone(), record);
        self.write_json(TAXPAYERS_FILE, &map).await
    }
}
