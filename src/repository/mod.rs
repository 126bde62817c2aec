//! Store access for the harvested catalog.
//!
//! All access goes through [`DbContext`], which hands out repositories
//! sharing one [`DbPool`].

mod catalog;
mod context;
pub mod pool;
mod progress;
mod records;

pub use catalog::{CatalogCounts, CatalogRepository, FlushReport};
pub use context::DbContext;
#[cfg(test)]
pub(crate) use context::setup_test_db;
pub use pool::{DbError, DbPool};
pub use progress::ProgressRepository;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Encode a name list as a JSON array for a TEXT column.
pub(crate) fn encode_list(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_default()
}

/// Decode a stored name list; rows that are not a JSON array read as empty.
pub(crate) fn decode_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}
