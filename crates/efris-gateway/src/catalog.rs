//! Units-of-measure catalog synchronization (T115 `rateUnit` dictionary).
//!
//! The local catalog mirrors the Authority dictionary keyed by Authority id.
//! A sync pass fetches every page before touching the store, then creates
//! unknown records and updates changed ones. It never deletes: removal is the
//! separate [`CatalogSynchronizer::remove_uom`] operation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::envelope::Interface;
use crate::error::{GatewayError, GatewayResult};
use crate::store::CatalogStore;
use crate::transport::Transport;
use crate::types::{field_text, SyncReport, UomRecord};

#[derive(Debug, Clone)]
pub struct CatalogSynchronizer {
    transport: Transport,
    store: Arc<dyn CatalogStore>,
    page_size: u32,
    max_pages: u32,
    /// Serializes sync passes and removals.
    writes: Arc<Mutex<()>>,
}

/// One decoded dictionary page.
#[derive(Debug, Default)]
struct Page {
    records: Vec<UomRecord>,
    page_count: Option<u32>,
}

impl CatalogSynchronizer {
    pub fn new(transport: Transport, store: Arc<dyn CatalogStore>) -> Self {
        Self {
            transport,
            store,
            page_size: 100,
            max_pages: 50,
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_paging(mut self, page_size: u32, max_pages: u32) -> Self {
        self.page_size = page_size.max(1);
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetch the full dictionary and reconcile it into the local catalog.
    ///
    /// If any page fails, nothing is written.
    pub async fn sync_uoms(&self) -> GatewayResult<SyncReport> {
        let _pass = self.writes.lock().await;

        let fetched = self.fetch_all().await?;
        let report = reconcile(self.store.as_ref(), fetched).await?;

        info!(
            added = report.added,
            updated = report.updated,
            unchanged = report.unchanged,
            "UOM sync complete"
        );
        Ok(report)
    }

    /// Delete one record by Authority id. Returns whether it existed.
    pub async fn remove_uom(&self, authority_id: &str) -> GatewayResult<bool> {
        let authority_id = authority_id.trim();
        if authority_id.is_empty() {
            return Err(GatewayError::validation("UOM id must not be empty"));
        }

        let _pass = self.writes.lock().await;
        let removed = self.store.remove(authority_id).await?;
        info!(authority_id, removed, "UOM removal");
        Ok(removed)
    }

    async fn fetch_all(&self) -> GatewayResult<Vec<UomRecord>> {
        let mut records: Vec<UomRecord> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut page_no: u32 = 1;

        loop {
            let page = self.fetch_page(page_no).await?;
            debug!(
                page_no,
                page_count = ?page.page_count,
                records = page.records.len(),
                "fetched dictionary page"
            );

            for record in page.records {
                match index.get(&record.authority_id) {
                    Some(&at) => records[at] = record,
                    None => {
                        index.insert(record.authority_id.clone(), records.len());
                        records.push(record);
                    }
                }
            }

            match page.page_count {
                Some(count) if page_no < count => {
                    if page_no >= self.max_pages {
                        warn!(
                            page_count = count,
                            max_pages = self.max_pages,
                            "dictionary has more pages than allowed, stopping"
                        );
                        break;
                    }
                    page_no += 1;
                }
                _ => break,
            }
        }

        Ok(records)
    }

    async fn fetch_page(&self, page_no: u32) -> GatewayResult<Page> {
        let request = json!({
            "pageNo": page_no.to_string(),
            "pageSize": self.page_size.to_string(),
        });
        let response = self
            .transport
            .send(Interface::SystemDictionary, &request, None)
            .await?;

        if !response.is_success() {
            return Err(response.into_error());
        }

        let payload = response
            .payload
            .ok_or_else(|| GatewayError::integrity("dictionary reply has no content"))?;
        Ok(parse_page(&payload))
    }
}

/// Decode `rateUnit` entries and the optional `page.pageCount`.
///
/// Entries without a name are skipped; an entry without `value` is keyed by
/// its name.
fn parse_page(payload: &serde_json::Value) -> Page {
    let records = payload
        .get("rateUnit")
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let code = field_text(item, "name").filter(|n| !n.is_empty())?;
                    let authority_id = field_text(item, "value")
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| code.clone());
                    let description = field_text(item, "description")
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| code.clone());
                    Some(UomRecord {
                        authority_id,
                        code,
                        description,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let page_count = payload
        .get("page")
        .and_then(|page| field_text(page, "pageCount"))
        .and_then(|count| count.parse().ok());

    Page {
        records,
        page_count,
    }
}

/// Apply fetched records to `store`: create unknown ids, update changed
/// records, leave the rest. Never deletes.
pub async fn reconcile(
    store: &dyn CatalogStore,
    fetched: Vec<UomRecord>,
) -> GatewayResult<SyncReport> {
    let local: HashMap<String, UomRecord> = store
        .list()
        .await?
        .into_iter()
        .map(|record| (record.authority_id.clone(), record))
        .collect();

    let mut report = SyncReport::default();
    let mut changed = Vec::new();

    for record in fetched {
        match local.get(&record.authority_id) {
            None => {
                report.added += 1;
                changed.push(record);
            }
            Some(existing) if *existing != record => {
                report.updated += 1;
                changed.push(record);
            }
            Some(_) => report.unchanged += 1,
        }
    }

    if !changed.is_empty() {
        store.upsert_many(changed).await?;
    }
    Ok(report)
}
