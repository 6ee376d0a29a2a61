//! Bulk warrant scraping.
//!
//! Executes the query descriptors the mapper produced, walking each one's
//! page range ascending and, for depths past the single-query cap, the
//! mirrored descending range. Rows are split against the store's known-id
//! snapshot into a freshness-bump set and a set of new warrants that need
//! detail scraping.

use chrono::Local;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use log::info;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::types::{ApiMap, Page, SeenRef, SortOrder, WarrantRef};
use crate::api::BnmpApi;
use crate::config::ScraperConfig;
use crate::error::{BnmpError, Result};
use crate::sanitize::clean_value;

/// Output of one jurisdiction's bulk scrape. Both sets are keyed by
/// warrant id, so resubmitting pages never duplicates an entry.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub new: HashSet<WarrantRef>,
    pub seen: HashSet<SeenRef>,
}

pub struct BulkScraper {
    api: Arc<dyn BnmpApi>,
    cfg: ScraperConfig,
}

impl BulkScraper {
    pub fn new(api: Arc<dyn BnmpApi>, cfg: ScraperConfig) -> Self {
        Self { api, cfg }
    }

    /// Pages needed to cover a depth, capped at the per-order maximum.
    pub fn calc_pages(&self, depth: u64) -> u32 {
        let pages = depth / self.cfg.page_size as u64 + 1;
        pages.min(self.cfg.max_pages as u64) as u32
    }

    /// Fetch every page of one descriptor, descending pages interleaved
    /// when the depth requires the mirrored window.
    async fn fetch_descriptor(&self, map: ApiMap) -> Result<Vec<Page>> {
        let depth = map.depth().unwrap_or(0);
        let mut pages = Vec::new();
        for page in 0..self.calc_pages(depth) {
            pages.push(
                self.api
                    .fetch_page(&map, page, self.cfg.page_size, SortOrder::Asc)
                    .await?,
            );
            if map.include_desc {
                pages.push(
                    self.api
                        .fetch_page(&map, page, self.cfg.page_size, SortOrder::Desc)
                        .await?,
                );
            }
        }
        Ok(pages)
    }

    /// Scrape all descriptors of one jurisdiction and partition the rows
    /// against the known-id snapshot.
    ///
    /// Any failed page aborts the jurisdiction: an error-shaped response
    /// means the session or the query itself is broken, not one page.
    /// Descriptors run with bounded concurrency; no further work is
    /// launched once an error is observed.
    pub async fn scrape(
        &self,
        maps: &[ApiMap],
        known_ids: &HashSet<String>,
        progress: Option<&ProgressBar>,
    ) -> Result<BulkOutcome> {
        info!("Bulk data extraction initiated: {} descriptors", maps.len());
        let today = Local::now().date_naive();
        let mut outcome = BulkOutcome::default();

        let mut fetches = stream::iter(
            maps.iter()
                .map(|map| self.fetch_descriptor(map.clone())),
        )
        .buffer_unordered(self.cfg.max_workers);

        while let Some(pages) = fetches.next().await {
            for page in pages? {
                for row in &page.content {
                    self.split_row(row, known_ids, today, &mut outcome)?;
                }
            }
            if let Some(bar) = progress {
                bar.inc(1);
            }
        }

        info!(
            "Bulk data extraction complete: {} new, {} seen",
            outcome.new.len(),
            outcome.seen.len()
        );
        Ok(outcome)
    }

    fn split_row(
        &self,
        row: &Value,
        known_ids: &HashSet<String>,
        today: chrono::NaiveDate,
        outcome: &mut BulkOutcome,
    ) -> Result<()> {
        let id = field_string(row, "id")
            .ok_or_else(|| BnmpError::Parse("Bulk row is missing 'id'".to_string()))?;
        let process_number = field_string(row, "numeroProcesso").unwrap_or_default();

        if known_ids.contains(&id) {
            outcome.seen.insert((id, process_number));
        } else {
            let doc_type = field_string(row, "idTipoPeca")
                .ok_or_else(|| BnmpError::Parse("Bulk row is missing 'idTipoPeca'".to_string()))?;
            outcome.new.insert(WarrantRef {
                id,
                doc_type,
                process_number,
                first_seen: today,
                last_seen: today,
                raw: clean_value(row).to_string(),
            });
        }
        Ok(())
    }
}

/// Stringify a scalar field of a bulk row, whatever its JSON type.
fn field_string(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
