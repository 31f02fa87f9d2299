//! Integration log: one record per Authority exchange.
//!
//! Records carry the request and response envelopes with sealed content and
//! signatures redacted (see [`crate::envelope::redact`]).

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub service: String,
    pub interface_code: String,
    pub request_id: String,
    pub url: String,
    pub status: IntegrationStatus,
    /// Host-side record the call was made for (customer, item).
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub return_code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub request: Option<serde_json::Value>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
    pub executed_at: DateTime<Utc>,
}

/// Sink for integration records. Must not fail the call being logged.
#[async_trait]
pub trait IntegrationLog: Debug + Send + Sync {
    async fn record(&self, record: IntegrationRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingIntegrationLog;

impl TracingIntegrationLog {
    fn emit(record: &IntegrationRecord) {
        info!(
            target: "efris::integration",
            service = %record.service,
            interface = %record.interface_code,
            request_id = %record.request_id,
            status = ?record.status,
            reference = record.reference.as_deref().unwrap_or(""),
            http_status = record.http_status.unwrap_or(0),
            return_code = record.return_code.as_deref().unwrap_or(""),
            error = record.error.as_deref().unwrap_or(""),
            "integration request"
        );
    }
}

#[async_trait]
impl IntegrationLog for TracingIntegrationLog {
    async fn record(&self, record: IntegrationRecord) {
        Self::emit(&record);
    }
}

/// Keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryIntegrationLog {
    records: Arc<Mutex<Vec<IntegrationRecord>>>,
}

impl MemoryIntegrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<IntegrationRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Records for one interface code, in call order.
    pub fn for_interface(&self, code: &str) -> Vec<IntegrationRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.interface_code == code)
            .collect()
    }
}

#[async_trait]
impl IntegrationLog for MemoryIntegrationLog {
    async fn record(&self, record: IntegrationRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

/// Appends records as JSON lines to a file.
#[derive(Debug)]
pub struct JsonlIntegrationLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlIntegrationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn append(&self, record: &IntegrationRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[async_trait]
impl IntegrationLog for JsonlIntegrationLog {
    async fn record(&self, record: IntegrationRecord) {
        TracingIntegrationLog::emit(&record);
        if let Err(e) = self.append(&record).await {
            warn!(path = %self.path.display(), error = %e, "failed to append integration record");
        }
    }
}
