//! End-to-end pipeline orchestration for one jurisdiction.
//!
//! Stage order is load-bearing: the last-seen bump is staged before the
//! detail scrape so a detail failure cannot lose the freshness
//! bookkeeping, and new warrants reach the permanent raw table before
//! the parse stage selects its input from it.

use chrono::Local;
use log::{info, warn};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::client::BnmpApi;
use crate::api::types::{ApiMap, DetailedWarrant, SeenRef};
use crate::config::Config;
use crate::error::{BnmpError, Result};
use crate::mapper::Mapper;
use crate::parser::ParsedWarrant;
use crate::progress::{ProgressManager, StageProgress};
use crate::record;
use crate::scraper::{BulkScraper, DetailScraper};
use crate::store::WarrantStore;

/// Brazil has 27 state-level jurisdictions.
const STATE_RANGE: std::ops::RangeInclusive<u32> = 1..=27;

/// Stage counters reported after a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub state_id: u32,
    pub descriptors: usize,
    pub new_warrants: usize,
    pub seen_warrants: usize,
    pub detailed: usize,
    pub parsed: usize,
}

pub struct Workflow {
    api: Arc<dyn BnmpApi>,
    store: Arc<dyn WarrantStore>,
    cfg: Config,
    progress: Arc<ProgressManager>,
}

impl Workflow {
    pub fn new(
        api: Arc<dyn BnmpApi>,
        store: Arc<dyn WarrantStore>,
        cfg: Config,
        progress: Arc<ProgressManager>,
    ) -> Self {
        Self {
            api,
            store,
            cfg,
            progress,
        }
    }

    fn validate_state(state_id: u32) -> Result<()> {
        if !STATE_RANGE.contains(&state_id) {
            return Err(BnmpError::InvalidInput(format!(
                "state id {} outside {}..={}",
                state_id,
                STATE_RANGE.start(),
                STATE_RANGE.end()
            )));
        }
        Ok(())
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.cfg.store.output_dir.join(name)
    }

    /// Map one jurisdiction into its final query descriptors.
    pub async fn map(&self, state_id: u32) -> Result<Vec<ApiMap>> {
        Self::validate_state(state_id)?;
        let mapper = Mapper::new(Arc::clone(&self.api), self.cfg.scraper.clone());
        mapper.map_state(state_id).await
    }

    /// Bulk-scrape the descriptors, stage the freshness bump, resolve
    /// details and stage the new warrants. Returns the detailed batch
    /// and the seen count.
    pub async fn scrape(
        &self,
        state_id: u32,
        maps: &[ApiMap],
    ) -> Result<(Vec<DetailedWarrant>, usize)> {
        Self::validate_state(state_id)?;
        let known = self.store.known_ids()?;
        info!("{} warrants already known for this run", known.len());

        let bulk = BulkScraper::new(Arc::clone(&self.api), self.cfg.scraper.clone());
        let bulk_bar = self
            .progress
            .create_counted_progress(maps.len() as u64, "Scraping descriptors");
        let outcome = bulk.scrape(maps, &known, bulk_bar.as_ref()).await?;
        if let Some(bar) = &bulk_bar {
            bar.finish_and_clear();
        }
        let seen_count = outcome.seen.len();

        self.write_seen(state_id, &outcome.seen)?;
        self.store.bump_last_seen(&outcome.seen)?;

        let detail = DetailScraper::new(Arc::clone(&self.api), self.cfg.scraper.clone());
        let detail_bar = self
            .progress
            .create_counted_progress(outcome.new.len() as u64, "Fetching warrant details");
        let detailed = detail.scrape(outcome.new, detail_bar.as_ref()).await?;
        if let Some(bar) = &detail_bar {
            bar.finish_and_clear();
        }

        self.write_new(state_id, &detailed)?;
        self.store.upsert_new(&detailed)?;
        self.store.merge_new()?;

        Ok((detailed, seen_count))
    }

    /// Flatten every staged-but-unparsed warrant and stage the records.
    pub fn parse(&self) -> Result<usize> {
        parse_staged(self.store.as_ref(), &self.cfg.store.output_dir)
    }

    /// Run the full pipeline for one jurisdiction.
    pub async fn run(&self, state_id: u32) -> Result<RunSummary> {
        Self::validate_state(state_id)?;
        info!("Pipeline run initiated for state {}", state_id);
        let stage = StageProgress::new(Arc::clone(&self.progress), &format!("state {}", state_id));

        self.store.setup()?;

        stage.set_message(&format!("Mapping state {}", state_id));
        let maps = self.map(state_id).await?;

        stage.set_message(&format!("Scraping {} descriptors", maps.len()));
        let (detailed, seen_count) = self.scrape(state_id, &maps).await?;

        stage.set_message("Flattening staged warrants");
        let parsed = self.parse()?;

        stage.set_message("Merging batches");
        let today = Local::now().date_naive();
        self.store.merge(today)?;
        self.store.cleanup()?;

        let summary = RunSummary {
            state_id,
            descriptors: maps.len(),
            new_warrants: detailed.len(),
            seen_warrants: seen_count,
            detailed: detailed.len(),
            parsed,
        };
        stage.finish_with_message(&format!(
            "State {}: {} new, {} seen, {} parsed",
            state_id, summary.new_warrants, summary.seen_warrants, summary.parsed
        ));
        info!(
            "Pipeline run completed for state {}: {} new, {} seen, {} parsed",
            state_id, summary.new_warrants, summary.seen_warrants, summary.parsed
        );
        Ok(summary)
    }

    fn write_seen(&self, state_id: u32, seen: &HashSet<SeenRef>) -> Result<()> {
        record::write_rows(
            &self.artifact(&format!("old_warrants_{}.csv", state_id)),
            seen.iter()
                .map(|(id, process)| vec![id.clone(), process.clone()]),
        )
    }

    fn write_new(&self, state_id: u32, detailed: &[DetailedWarrant]) -> Result<()> {
        record::write_json_rows(
            &self.artifact(&format!("new_warrants_{}.csv", state_id)),
            detailed.iter().map(|w| {
                vec![
                    w.bulk.id.clone(),
                    w.bulk.doc_type.clone(),
                    w.bulk.process_number.clone(),
                    w.bulk.first_seen.format("%Y-%m-%d").to_string(),
                    w.bulk.last_seen.format("%Y-%m-%d").to_string(),
                    w.bulk.raw.clone(),
                    w.detail.clone(),
                ]
            }),
        )
    }
}

/// Flatten every staged-but-unparsed warrant into the fixed record
/// layout, write the artifact, and stage the rows for the final merge.
/// Needs only the store, so the parse stage can run without a session.
pub fn parse_staged(store: &dyn WarrantStore, output_dir: &Path) -> Result<usize> {
    let pending = store.unparsed()?;
    info!("Parsing {} staged warrants", pending.len());

    let mut parsed = Vec::with_capacity(pending.len());
    for warrant in &pending {
        let detail: Value = match serde_json::from_str(&warrant.detail) {
            Ok(detail) => detail,
            Err(err) => {
                warn!("Skipping undecodable stored detail: {}", err);
                continue;
            }
        };
        parsed.push(ParsedWarrant::from_detail(
            warrant.scrape_date,
            warrant.last_seen,
            &detail,
        ));
    }

    record::write_json_rows(
        &output_dir.join("parsed_warrants.csv"),
        parsed.iter().map(ParsedWarrant::to_row),
    )?;
    store.insert_parsed(&parsed)?;
    Ok(parsed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{Page, SortOrder};
    use crate::config::{ScraperConfig, StoreConfig};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    /// One shallow state: the probe reports two rows, the single bulk
    /// page returns both, and each has a detail document.
    struct TinyApi;

    #[async_trait]
    impl BnmpApi for TinyApi {
        async fn fetch_page(
            &self,
            _map: &ApiMap,
            _page: u32,
            size: u32,
            _order: SortOrder,
        ) -> Result<Page> {
            if size == 1 {
                return Ok(Page {
                    total_pages: 2,
                    content: vec![],
                });
            }
            Ok(Page {
                total_pages: 1,
                content: vec![
                    json!({"id": 10, "idTipoPeca": 1, "numeroProcesso": "p-10"}),
                    json!({"id": 11, "idTipoPeca": 1, "numeroProcesso": "p-11"}),
                ],
            })
        }

        async fn fetch_detail(&self, id: &str, _doc_type: &str) -> Result<Value> {
            Ok(json!({
                "id": id.parse::<u64>().unwrap_or_default(),
                "numeroPeca": format!("peca-{}", id),
                "numeroProcesso": format!("p-{}", id),
            }))
        }

        async fn cities(&self, _state_id: u32) -> Result<Vec<u64>> {
            Ok(vec![])
        }

        async fn agencies(&self, _city_id: u64) -> Result<Vec<u64>> {
            Ok(vec![])
        }
    }

    /// A session gone stale mid-run: the bulk listing still answers but
    /// every detail request comes back unauthorized.
    struct StaleSessionApi;

    #[async_trait]
    impl BnmpApi for StaleSessionApi {
        async fn fetch_page(
            &self,
            _map: &ApiMap,
            _page: u32,
            size: u32,
            _order: SortOrder,
        ) -> Result<Page> {
            if size == 1 {
                return Ok(Page {
                    total_pages: 3,
                    content: vec![],
                });
            }
            Ok(Page {
                total_pages: 1,
                content: vec![
                    json!({"id": 10, "idTipoPeca": 1, "numeroProcesso": "p-10"}),
                    json!({"id": 11, "idTipoPeca": 1, "numeroProcesso": "p-11"}),
                    json!({"id": 12, "idTipoPeca": 1, "numeroProcesso": "p-12"}),
                ],
            })
        }

        async fn fetch_detail(&self, _id: &str, _doc_type: &str) -> Result<Value> {
            Err(BnmpError::InvalidCookie)
        }

        async fn cities(&self, _state_id: u32) -> Result<Vec<u64>> {
            Ok(vec![])
        }

        async fn agencies(&self, _city_id: u64) -> Result<Vec<u64>> {
            Ok(vec![])
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            scraper: ScraperConfig {
                max_workers: 2,
                ..ScraperConfig::default()
            },
            store: StoreConfig {
                path: dir.join("bnmp.db"),
                output_dir: dir.to_path_buf(),
            },
            ..Config::default()
        }
    }

    fn quiet_progress() -> Arc<ProgressManager> {
        Arc::new(ProgressManager::new(true, false))
    }

    #[tokio::test]
    async fn full_run_lands_warrants_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let workflow = Workflow::new(
            Arc::new(TinyApi),
            Arc::clone(&store) as Arc<dyn WarrantStore>,
            test_config(dir.path()),
            quiet_progress(),
        );

        let summary = workflow.run(5).await.unwrap();
        assert_eq!(summary.state_id, 5);
        assert_eq!(summary.descriptors, 1);
        assert_eq!(summary.new_warrants, 2);
        assert_eq!(summary.seen_warrants, 0);
        assert_eq!(summary.parsed, 2);

        let known = store.known_ids().unwrap();
        assert!(known.contains("10") && known.contains("11"));

        // Both parsed records merged: nothing left to parse.
        assert!(store.unparsed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_run_reports_everything_as_seen() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let workflow = Workflow::new(
            Arc::new(TinyApi),
            Arc::clone(&store) as Arc<dyn WarrantStore>,
            test_config(dir.path()),
            quiet_progress(),
        );

        workflow.run(5).await.unwrap();
        let second = workflow.run(5).await.unwrap();

        assert_eq!(second.new_warrants, 0);
        assert_eq!(second.seen_warrants, 2);
        assert_eq!(second.parsed, 0);
    }

    #[tokio::test]
    async fn run_writes_pipeline_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let workflow = Workflow::new(
            Arc::new(TinyApi),
            Arc::clone(&store) as Arc<dyn WarrantStore>,
            test_config(dir.path()),
            quiet_progress(),
        );
        workflow.run(5).await.unwrap();

        let new_file = std::fs::read_to_string(dir.path().join("new_warrants_5.csv")).unwrap();
        assert_eq!(new_file.lines().count(), 2);
        assert!(new_file.contains('|'));

        let parsed_file =
            std::fs::read_to_string(dir.path().join("parsed_warrants.csv")).unwrap();
        assert_eq!(parsed_file.lines().count(), 2);
    }

    #[tokio::test]
    async fn detail_failure_keeps_the_staged_freshness_bump() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());

        // First pass stages two warrants into the permanent raw table
        // but never parses them, so they stay visible as unparsed.
        let first = Workflow::new(
            Arc::new(TinyApi),
            Arc::clone(&store) as Arc<dyn WarrantStore>,
            test_config(dir.path()),
            quiet_progress(),
        );
        store.setup().unwrap();
        let maps = first.map(5).await.unwrap();
        first.scrape(5, &maps).await.unwrap();

        // Second pass sees both ids again, then dies on the detail
        // stage with a fatal session error.
        let second = Workflow::new(
            Arc::new(StaleSessionApi),
            Arc::clone(&store) as Arc<dyn WarrantStore>,
            test_config(dir.path()),
            quiet_progress(),
        );
        store.setup().unwrap();
        let maps = second.map(5).await.unwrap();
        let err = second.scrape(5, &maps).await.unwrap_err();
        assert!(matches!(err, BnmpError::InvalidCookie));

        // The last-seen bump was staged before the failure, so the
        // merge still moves both dates forward.
        let later = NaiveDate::from_ymd_opt(2024, 8, 20).unwrap();
        store.merge(later).unwrap();

        let pending = store.unparsed().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|w| w.last_seen == later));
    }

    #[tokio::test]
    async fn out_of_range_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let workflow = Workflow::new(
            Arc::new(TinyApi),
            store as Arc<dyn WarrantStore>,
            test_config(dir.path()),
            quiet_progress(),
        );

        let err = workflow.run(0).await.unwrap_err();
        assert!(matches!(err, BnmpError::InvalidInput(_)));
        let err = workflow.run(28).await.unwrap_err();
        assert!(matches!(err, BnmpError::InvalidInput(_)));
    }
}
