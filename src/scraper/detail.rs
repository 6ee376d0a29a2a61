//! Detail scraping of new warrants.
//!
//! Fetches the full nested document behind each new warrant reference and
//! attaches a sanitized copy. Documents that still carry a backslash after
//! cleaning are encoding artifacts the flattener cannot handle; they are
//! dropped individually and counted, never raised.

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use crate::api::types::{DetailedWarrant, WarrantRef};
use crate::api::BnmpApi;
use crate::config::ScraperConfig;
use crate::error::Result;
use crate::sanitize::clean_value;

pub struct DetailScraper {
    api: Arc<dyn BnmpApi>,
    cfg: ScraperConfig,
}

impl DetailScraper {
    pub fn new(api: Arc<dyn BnmpApi>, cfg: ScraperConfig) -> Self {
        Self { api, cfg }
    }

    async fn load(&self, warrant: WarrantRef) -> Result<Option<DetailedWarrant>> {
        let detail = self
            .api
            .fetch_detail(&warrant.id, &warrant.doc_type)
            .await?;

        let cleaned = clean_value(&detail).to_string();
        if cleaned.contains('\\') {
            return Ok(None);
        }
        Ok(Some(DetailedWarrant {
            bulk: warrant,
            detail: cleaned,
        }))
    }

    /// Resolve details for every new warrant with bounded concurrency.
    ///
    /// Per-warrant failures (timeouts, undecodable bodies) drop only that
    /// warrant; session failures stop the batch.
    pub async fn scrape(
        &self,
        warrants: HashSet<WarrantRef>,
        progress: Option<&ProgressBar>,
    ) -> Result<Vec<DetailedWarrant>> {
        info!("Detailed data extraction initiated: {} warrants", warrants.len());
        let mut detailed = Vec::new();
        let mut rejected = 0usize;
        let mut failed = 0usize;

        let mut fetches = stream::iter(warrants.into_iter().map(|w| self.load(w)))
            .buffer_unordered(self.cfg.max_workers);

        while let Some(result) = fetches.next().await {
            if let Some(bar) = progress {
                bar.inc(1);
            }
            match result {
                Ok(Some(warrant)) => detailed.push(warrant),
                Ok(None) => rejected += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Detail fetch failed, dropping warrant: {}", e);
                    failed += 1;
                }
            }
        }

        if rejected > 0 {
            warn!("{} detail documents rejected for residual escapes", rejected);
        }
        if failed > 0 {
            warn!("{} detail fetches failed", failed);
        }
        info!("Detailed data extraction completed: {} warrants", detailed.len());
        Ok(detailed)
    }
}
