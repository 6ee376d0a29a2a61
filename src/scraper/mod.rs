pub mod bulk;
pub mod detail;

pub use bulk::{BulkOutcome, BulkScraper};
pub use detail::DetailScraper;
