//! BNMP API mapping.
//!
//! The query endpoint never returns more than 10,000 rows per ordered
//! query (5 pages of 2,000), and ordering the same filter descending
//! only doubles that window. Mapping probes the row count behind each
//! filter combination and subdivides any filter that is still too deep,
//! producing a flat list of descriptors that are each retrievable.

use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::sync::Arc;

use crate::api::types::{ApiMap, Dimension, SortOrder};
use crate::api::BnmpApi;
use crate::config::ScraperConfig;
use crate::error::{BnmpError, Result};

/// Probe classification. Every outcome of a probe is an explicit variant;
/// only auth failures and unsplittable overflows surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No data reachable under these filters; the branch is dead.
    Empty,
    /// Retrievable as-is; `include_desc` has been decided.
    Final(ApiMap),
    /// Too deep for one filter; expand one dimension finer.
    NeedsSplit(ApiMap),
}

pub struct Mapper {
    api: Arc<dyn BnmpApi>,
    cfg: ScraperConfig,
}

impl Mapper {
    pub fn new(api: Arc<dyn BnmpApi>, cfg: ScraperConfig) -> Self {
        Self { api, cfg }
    }

    /// Probe the row depth behind one descriptor.
    ///
    /// A minimal single-row query makes the reported page count equal the
    /// row count, so the depth lands directly in the descriptor's probe
    /// slot for its current level.
    async fn probe(&self, mut map: ApiMap) -> Result<ApiMap> {
        let page = self.api.fetch_page(&map, 0, 1, SortOrder::Asc).await?;
        map.set_depth(page.total_pages);
        Ok(map)
    }

    /// Classify a probed descriptor against the retrieval caps.
    pub fn classify(&self, mut map: ApiMap) -> Result<ProbeOutcome> {
        let depth = map.depth().unwrap_or(0);
        if depth == 0 {
            return Ok(ProbeOutcome::Empty);
        }
        if depth <= self.cfg.dual_order_cap {
            map.include_desc = depth > self.cfg.single_order_cap;
            return Ok(ProbeOutcome::Final(map));
        }
        if map.level() == Dimension::Doctype {
            // The API offers nothing finer than the document type, so this
            // data volume cannot be retrieved without losing rows.
            return Err(BnmpError::MapOverflow {
                descriptor: map.describe(),
                depth,
            });
        }
        Ok(ProbeOutcome::NeedsSplit(map))
    }

    /// Probe every descriptor of one level with bounded, unordered
    /// concurrency and split the outcomes into finals and candidates for
    /// the next level.
    ///
    /// Fatal errors (auth, doctype overflow) stop the level immediately;
    /// any other failure aborts only the descriptor that produced it.
    async fn probe_level(&self, maps: Vec<ApiMap>) -> Result<(Vec<ApiMap>, Vec<ApiMap>)> {
        let mut finals = Vec::new();
        let mut splits = Vec::new();

        let mut probes = stream::iter(maps.into_iter().map(|map| self.probe(map)))
            .buffer_unordered(self.cfg.max_workers);

        while let Some(result) = probes.next().await {
            let map = match result {
                Ok(map) => map,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Probe failed, dropping descriptor: {}", e);
                    continue;
                }
            };
            match self.classify(map)? {
                ProbeOutcome::Empty => {}
                ProbeOutcome::Final(map) => finals.push(map),
                ProbeOutcome::NeedsSplit(map) => splits.push(map),
            }
        }

        Ok((finals, splits))
    }

    /// Map one jurisdiction into a list of retrievable query descriptors.
    ///
    /// Levels run strictly in sequence because each level's inputs are the
    /// splits of the previous one: state, the state's cities, each deep
    /// city's agencies, and finally document types 1..=13.
    pub async fn map_state(&self, state_id: u32) -> Result<Vec<ApiMap>> {
        info!("API mapping initiated for state {}", state_id);
        let mut finals = Vec::new();

        info!("Probing state {}", state_id);
        let (done, splits) = self.probe_level(vec![ApiMap::new(state_id)]).await?;
        finals.extend(done);

        let mut city_maps = Vec::new();
        for map in splits {
            for city in self.api.cities(map.state).await? {
                city_maps.push(map.with_city(city));
            }
        }

        info!("Probing {} city descriptors of state {}", city_maps.len(), state_id);
        let (done, splits) = self.probe_level(city_maps).await?;
        finals.extend(done);

        let mut agency_maps = Vec::new();
        for map in splits {
            let city = map.city.unwrap_or_default();
            for agency in self.api.agencies(city).await? {
                agency_maps.push(map.with_agency(agency));
            }
        }

        info!("Probing {} agency descriptors of state {}", agency_maps.len(), state_id);
        let (done, splits) = self.probe_level(agency_maps).await?;
        finals.extend(done);

        let mut doctype_maps = Vec::new();
        for map in splits {
            for doctype in 1..=self.cfg.doctype_max {
                doctype_maps.push(map.with_doctype(doctype));
            }
        }

        info!("Probing {} doctype descriptors of state {}", doctype_maps.len(), state_id);
        let (done, splits) = self.probe_level(doctype_maps).await?;
        finals.extend(done);
        debug_assert!(splits.is_empty(), "classify errors on doctype overflow");

        info!(
            "API mapping completed for state {}: {} descriptors",
            state_id,
            finals.len()
        );
        Ok(finals)
    }
}
