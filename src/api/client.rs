use async_trait::async_trait;
use serde_json::Value;

use super::types::{ApiMap, Page, SortOrder};
use crate::error::Result;

/// HTTP boundary of the pipeline.
///
/// Every network interaction the mapper and scrapers make goes through
/// this trait, so tests can drive the whole pipeline from canned data.
#[async_trait]
pub trait BnmpApi: Send + Sync {
    /// Fetch one page of the warrant query for the given filter.
    ///
    /// A 401-equivalent response surfaces as `BnmpError::InvalidCookie`;
    /// any other error-shaped body as `BnmpError::Api`. Zero results is a
    /// normal page with an empty `content`.
    async fn fetch_page(
        &self,
        map: &ApiMap,
        page: u32,
        size: u32,
        order: SortOrder,
    ) -> Result<Page>;

    /// Fetch the full nested document of one warrant.
    async fn fetch_detail(&self, id: &str, doc_type: &str) -> Result<Value>;

    /// City ids within a state.
    async fn cities(&self, state_id: u32) -> Result<Vec<u64>>;

    /// Issuing agency ids within a city.
    async fn agencies(&self, city_id: u64) -> Result<Vec<u64>>;
}
