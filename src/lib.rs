//! catalog-harvest - incremental, resumable harvester for paginated media catalogs.
//!
//! Walks the listing pages of each catalog category, skips works and
//! episodes that are already complete in the local store, resolves the
//! missing media addresses with bounded concurrency, and persists results in
//! idempotent batches while checkpointing progress per category.

pub mod cli;
pub mod config;
pub mod error;
pub mod harvest;
pub mod http_client;
pub mod models;
pub mod parser;
pub mod repository;
pub mod schema;

pub use error::{HarvestError, Result};
pub use harvest::{HarvestEvent, Harvester, RunOutcome};
