//! Detail extraction for one work.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::oracle::DedupOracle;
use crate::error::{HarvestError, Result};
use crate::http_client::PageSource;
use crate::models::Work;
use crate::parser::{work_id_from_url, PageParser};

/// Result of visiting a detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailOutcome {
    /// First sighting: full metadata was parsed.
    New { work: Work, episode_count: u32 },
    /// Already stored; only the episode count was read.
    Known {
        id: i64,
        title: String,
        episode_count: u32,
    },
}

impl DetailOutcome {
    pub fn id(&self) -> i64 {
        match self {
            DetailOutcome::New { work, .. } => work.id,
            DetailOutcome::Known { id, .. } => *id,
        }
    }

    /// Display name given to the work's episodes.
    pub fn title(&self) -> &str {
        match self {
            DetailOutcome::New { work, .. } => &work.title,
            DetailOutcome::Known { title, .. } => title,
        }
    }

    pub fn episode_count(&self) -> u32 {
        match self {
            DetailOutcome::New { episode_count, .. } | DetailOutcome::Known { episode_count, .. } => {
                *episode_count
            }
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, DetailOutcome::New { .. })
    }
}

/// Fetches detail pages and turns them into work candidates.
#[derive(Clone)]
pub struct DetailExtractor {
    source: Arc<dyn PageSource>,
    parser: Arc<dyn PageParser>,
    oracle: DedupOracle,
}

impl DetailExtractor {
    pub fn new(source: Arc<dyn PageSource>, parser: Arc<dyn PageParser>, oracle: DedupOracle) -> Self {
        Self {
            source,
            parser,
            oracle,
        }
    }

    /// Visit one detail page.
    ///
    /// Fails without any request when the URL carries no numeric id.
    pub async fn extract(&self, url: &str) -> Result<DetailOutcome> {
        let id = work_id_from_url(url).ok_or_else(|| HarvestError::MissingIdentifier(url.to_string()))?;

        let html = self.source.fetch_page(url).await?;
        let episode_count = self.parser.episode_count(&html);

        if let Some(title) = self.oracle.work_title(id).await? {
            debug!("Known work {} ({}), {} episodes", id, title, episode_count);
            return Ok(DetailOutcome::Known {
                id,
                title,
                episode_count,
            });
        }

        let fields = self.parser.work_fields(&html);
        debug!("New work {} ({}), {} episodes", id, fields.title, episode_count);

        Ok(DetailOutcome::New {
            work: Work {
                id,
                title: fields.title,
                genre: fields.genre,
                region: fields.region,
                year: fields.year,
                actors: fields.actors,
                directors: fields.directors,
                synopsis: fields.synopsis,
                url: url.to_string(),
                last_seen: Utc::now(),
            },
            episode_count,
        })
    }
}
