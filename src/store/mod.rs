pub mod sqlite;

use chrono::NaiveDate;
use std::collections::HashSet;

use crate::api::types::{DetailedWarrant, SeenRef, UnparsedWarrant};
use crate::error::Result;
use crate::parser::ParsedWarrant;

pub use sqlite::SqliteStore;

/// Persistence boundary of the pipeline.
///
/// Staging methods land batches in temporary tables; `merge` makes a
/// whole run's batch visible atomically. The pipeline only guarantees
/// idempotent, re-submittable batches; retrying a failed call is the
/// caller's concern.
pub trait WarrantStore: Send + Sync {
    /// Create and truncate the temporary batch tables.
    fn setup(&self) -> Result<()>;

    /// Snapshot of every warrant id already known. Read once per
    /// jurisdiction at bulk-scrape start, never refreshed mid-run.
    fn known_ids(&self) -> Result<HashSet<String>>;

    /// Stage the freshness bump for warrants sighted again. Persisted
    /// right after the bulk scrape so a detail-stage failure cannot lose
    /// the bookkeeping.
    fn bump_last_seen(&self, seen: &HashSet<SeenRef>) -> Result<()>;

    /// Stage newly scraped warrants with their detail payloads.
    fn upsert_new(&self, warrants: &[DetailedWarrant]) -> Result<()>;

    /// Merge staged new warrants into the permanent raw table.
    fn merge_new(&self) -> Result<()>;

    /// Raw warrants not yet flattened into the parsed table.
    fn unparsed(&self) -> Result<Vec<UnparsedWarrant>>;

    /// Stage flattened records.
    fn insert_parsed(&self, rows: &[ParsedWarrant]) -> Result<()>;

    /// Merge staged parsed records into the permanent table and copy
    /// last-seen dates forward. Atomic relative to concurrent readers.
    fn merge(&self, today: NaiveDate) -> Result<()>;

    /// Drop the temporary batch tables.
    fn cleanup(&self) -> Result<()>;
}
