//! Error types for the harvesting pipeline.

use crate::http_client::HttpError;

/// Errors raised by pipeline components.
///
/// Task-level variants (`Http`, `MissingIdentifier`) stay inside the task
/// that produced them; `Database` and `Enumeration` end the run.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("no numeric work identifier in URL: {0}")]
    MissingIdentifier(String),

    #[error("could not enumerate category {category}: {reason}")]
    Enumeration { category: u32, reason: String },

    #[error("batch writer is not running")]
    WriterClosed,
}

impl HarvestError {
    /// Faults that must end the current run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::Database(_) | HarvestError::Enumeration { .. } | HarvestError::WriterClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
