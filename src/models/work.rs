//! Catalog works and their episodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store key of an episode: (work identifier, 1-based episode number).
pub type EpisodeKey = (i64, u32);

/// One titled catalog entry.
///
/// A work is replaced wholesale whenever it is crawled again; no field is
/// ever merged with a previously stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    /// Numeric identifier taken from the canonical detail URL.
    pub id: i64,
    pub title: String,
    /// Genre label as shown on the detail page.
    pub genre: String,
    pub region: String,
    /// Release year label (kept as text, the source is not consistent).
    pub year: String,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub synopsis: String,
    /// Canonical detail page URL.
    pub url: String,
    pub last_seen: DateTime<Utc>,
}

/// One numbered installment of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub work_id: i64,
    /// 1-based episode number.
    pub episode: u32,
    /// Display name, inherited from the work title at write time.
    pub name: String,
    /// Play page the address was (or will be) resolved from.
    pub play_url: String,
    /// Resolved media address. `None` means the episode is known to exist
    /// but no address was found yet.
    pub media_url: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl Episode {
    pub fn new(work_id: i64, episode: u32, name: &str, play_url: &str) -> Self {
        Self {
            work_id,
            episode,
            name: name.to_string(),
            play_url: play_url.to_string(),
            media_url: None,
            last_seen: Utc::now(),
        }
    }

    /// Attach a resolved media address.
    pub fn with_media_url(mut self, media_url: Option<String>) -> Self {
        self.media_url = media_url;
        self
    }

    pub fn key(&self) -> EpisodeKey {
        (self.work_id, self.episode)
    }

    pub fn is_resolved(&self) -> bool {
        self.media_url.is_some()
    }
}
