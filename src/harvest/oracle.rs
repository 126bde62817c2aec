//! Dedup state oracle: what is still missing for a work.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::repository::CatalogRepository;

/// `{1..=total}` minus the episode numbers already resolved.
pub fn missing_from(total: u32, resolved: &BTreeSet<u32>) -> BTreeSet<u32> {
    (1..=total).filter(|n| !resolved.contains(n)).collect()
}

/// Answers existence questions against persisted state before any
/// per-episode request is issued.
#[derive(Clone, Debug)]
pub struct DedupOracle {
    catalog: CatalogRepository,
}

impl DedupOracle {
    pub fn new(catalog: CatalogRepository) -> Self {
        Self { catalog }
    }

    pub async fn work_exists(&self, id: i64) -> Result<bool> {
        Ok(self.catalog.work_exists(id).await?)
    }

    /// Stored title of a known work.
    pub async fn work_title(&self, id: i64) -> Result<Option<String>> {
        Ok(self.catalog.work_title(id).await?)
    }

    /// Episode numbers in `1..=total` without a resolved address, whether
    /// never attempted or stored unresolved.
    pub async fn missing_episodes(&self, id: i64, total: u32) -> Result<BTreeSet<u32>> {
        if total == 0 {
            return Ok(BTreeSet::new());
        }
        let resolved = self.catalog.resolved_episode_numbers(id).await?;
        Ok(missing_from(total, &resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Episode, Work};
    use crate::repository::setup_test_db;

    fn work(id: i64) -> Work {
        Work {
            id,
            title: "Work".to_string(),
            genre: String::new(),
            region: String::new(),
            year: String::new(),
            actors: vec![],
            directors: vec![],
            synopsis: String::new(),
            url: format!("https://example.test/mp4/{id}.html"),
            last_seen: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_missing_from() {
        let resolved: BTreeSet<u32> = [2, 5, 7].into_iter().collect();
        let missing: Vec<u32> = missing_from(10, &resolved).into_iter().collect();
        assert_eq!(missing, vec![1, 3, 4, 6, 8, 9, 10]);
        assert!(missing_from(0, &resolved).is_empty());
    }

    #[tokio::test]
    async fn test_missing_episodes_against_store() {
        let (ctx, _dir) = setup_test_db().await;
        let catalog = ctx.catalog();
        let oracle = DedupOracle::new(catalog.clone());

        let mut episodes: Vec<Episode> = [2u32, 5, 7]
            .iter()
            .map(|n| {
                Episode::new(1, *n, "Work", "p")
                    .with_media_url(Some(format!("https://cdn.test/{n}.m3u8")))
            })
            .collect();
        // Stored but unresolved still counts as missing.
        episodes.push(Episode::new(1, 3, "Work", "p"));
        catalog.save_batch(&[work(1)], &episodes).await.unwrap();

        let missing: Vec<u32> = oracle
            .missing_episodes(1, 10)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(missing, vec![1, 3, 4, 6, 8, 9, 10]);

        assert!(oracle.work_exists(1).await.unwrap());
        assert_eq!(oracle.missing_episodes(99, 2).await.unwrap().len(), 2);
        assert_eq!(oracle.work_title(99).await.unwrap(), None);
    }
}
