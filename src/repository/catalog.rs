//! Works and episodes: existence queries and batched persistence.

use std::collections::BTreeSet;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::pool::{DbError, DbPool, SqliteConn};
use super::records::{EpisodeRecord, NewEpisode, NewWork, WorkRecord};
use super::{decode_list, encode_list, parse_datetime};
use crate::models::{Episode, Work};
use crate::schema::{episodes, works};

/// What one batch write did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub works: usize,
    pub episodes_inserted: usize,
    /// Existing unresolved episodes that received an address.
    pub episodes_filled: usize,
    pub episodes_unchanged: usize,
    /// Known works whose `last_seen` was refreshed.
    pub works_touched: usize,
}

impl FlushReport {
    /// Episode rows actually inserted or modified.
    pub fn episode_writes(&self) -> usize {
        self.episodes_inserted + self.episodes_filled
    }

    pub fn merge(&mut self, other: FlushReport) {
        self.works += other.works;
        self.episodes_inserted += other.episodes_inserted;
        self.episodes_filled += other.episodes_filled;
        self.episodes_unchanged += other.episodes_unchanged;
        self.works_touched += other.works_touched;
    }
}

/// Row counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub works: i64,
    pub episodes: i64,
    pub resolved_episodes: i64,
}

enum EpisodeWrite {
    Inserted,
    Filled,
    Unchanged,
}

impl From<WorkRecord> for Work {
    fn from(record: WorkRecord) -> Self {
        Work {
            id: record.id,
            title: record.title,
            genre: record.genre,
            region: record.region,
            year: record.year,
            actors: decode_list(&record.actors),
            directors: decode_list(&record.directors),
            synopsis: record.synopsis,
            url: record.url,
            last_seen: parse_datetime(&record.last_seen),
        }
    }
}

impl From<EpisodeRecord> for Episode {
    fn from(record: EpisodeRecord) -> Self {
        Episode {
            work_id: record.work_id,
            episode: record.episode as u32,
            name: record.name,
            play_url: record.play_url,
            media_url: record.media_url,
            last_seen: parse_datetime(&record.last_seen),
        }
    }
}

/// Repository for works and episodes.
#[derive(Clone, Debug)]
pub struct CatalogRepository {
    pool: DbPool,
}

impl CatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn work_exists(&self, id: i64) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;
        diesel::select(diesel::dsl::exists(works::table.filter(works::id.eq(id))))
            .get_result(&mut conn)
            .await
    }

    pub async fn get_work(&self, id: i64) -> Result<Option<Work>, DbError> {
        let mut conn = self.pool.get().await?;
        let record: Option<WorkRecord> = works::table
            .find(id)
            .select(WorkRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(Work::from))
    }

    /// Stored title of a work, if the work is known.
    pub async fn work_title(&self, id: i64) -> Result<Option<String>, DbError> {
        let mut conn = self.pool.get().await?;
        works::table
            .find(id)
            .select(works::title)
            .first(&mut conn)
            .await
            .optional()
    }

    /// Episode numbers of a work that already carry a media address.
    pub async fn resolved_episode_numbers(&self, work_id: i64) -> Result<BTreeSet<u32>, DbError> {
        let mut conn = self.pool.get().await?;
        let numbers: Vec<i32> = episodes::table
            .filter(episodes::work_id.eq(work_id))
            .filter(episodes::media_url.is_not_null())
            .select(episodes::episode)
            .load(&mut conn)
            .await?;
        Ok(numbers
            .into_iter()
            .filter(|n| *n > 0)
            .map(|n| n as u32)
            .collect())
    }

    /// All stored episodes of a work in episode order.
    pub async fn get_episodes(&self, work_id: i64) -> Result<Vec<Episode>, DbError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<EpisodeRecord> = episodes::table
            .filter(episodes::work_id.eq(work_id))
            .order(episodes::episode.asc())
            .select(EpisodeRecord::as_select())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(Episode::from).collect())
    }

    /// Persist a batch in a single transaction.
    ///
    /// Works are replaced wholesale (update, else insert) with a refreshed
    /// `last_seen`. Episodes are inserted when absent and otherwise only
    /// touched to fill a NULL address with a non-null one. Any failure rolls
    /// the whole batch back.
    pub async fn save_batch(
        &self,
        works: &[Work],
        episodes: &[Episode],
    ) -> Result<FlushReport, DbError> {
        self.save_batch_touching(works, episodes, &[]).await
    }

    /// [`save_batch`](Self::save_batch), also refreshing `last_seen` of the
    /// already stored works in `seen` within the same transaction.
    pub async fn save_batch_touching(
        &self,
        works: &[Work],
        episodes: &[Episode],
        seen: &[i64],
    ) -> Result<FlushReport, DbError> {
        let works = works.to_vec();
        let episodes = episodes.to_vec();
        let seen = seen.to_vec();
        let now = Utc::now().to_rfc3339();

        let mut conn = self.pool.get().await?;
        conn.transaction(|conn| {
            Box::pin(async move {
                let mut report = FlushReport::default();

                for work in &works {
                    upsert_work(conn, work, &now).await?;
                    report.works += 1;
                }

                for episode in &episodes {
                    match write_episode(conn, episode, &now).await? {
                        EpisodeWrite::Inserted => report.episodes_inserted += 1,
                        EpisodeWrite::Filled => report.episodes_filled += 1,
                        EpisodeWrite::Unchanged => report.episodes_unchanged += 1,
                    }
                }

                if !seen.is_empty() {
                    report.works_touched = diesel::update(works::table.filter(works::id.eq_any(&seen)))
                        .set(works::last_seen.eq(&now))
                        .execute(conn)
                        .await?;
                }

                Ok::<_, DbError>(report)
            })
        })
        .await
    }

    pub async fn counts(&self) -> Result<CatalogCounts, DbError> {
        let mut conn = self.pool.get().await?;
        let works: i64 = works::table.count().get_result(&mut conn).await?;
        let episodes: i64 = episodes::table.count().get_result(&mut conn).await?;
        let resolved_episodes: i64 = episodes::table
            .filter(episodes::media_url.is_not_null())
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(CatalogCounts {
            works,
            episodes,
            resolved_episodes,
        })
    }
}

async fn upsert_work(conn: &mut SqliteConn, work: &Work, now: &str) -> Result<(), DbError> {
    let actors = encode_list(&work.actors);
    let directors = encode_list(&work.directors);
    let row = NewWork {
        id: work.id,
        title: &work.title,
        genre: &work.genre,
        region: &work.region,
        year: &work.year,
        actors: &actors,
        directors: &directors,
        synopsis: &work.synopsis,
        url: &work.url,
        last_seen: now,
    };

    let updated = diesel::update(works::table.find(work.id))
        .set(&row)
        .execute(conn)
        .await?;

    if updated == 0 {
        diesel::insert_into(works::table)
            .values(&row)
            .execute(conn)
            .await?;
    }

    Ok(())
}

async fn write_episode(
    conn: &mut SqliteConn,
    episode: &Episode,
    now: &str,
) -> Result<EpisodeWrite, DbError> {
    let number = episode.episode as i32;
    let stored: Option<Option<String>> = episodes::table
        .find((episode.work_id, number))
        .select(episodes::media_url)
        .first(conn)
        .await
        .optional()?;

    match (stored, episode.media_url.as_deref()) {
        (None, media_url) => {
            diesel::insert_into(episodes::table)
                .values(NewEpisode {
                    work_id: episode.work_id,
                    episode: number,
                    name: &episode.name,
                    play_url: &episode.play_url,
                    media_url,
                    last_seen: now,
                })
                .execute(conn)
                .await?;
            Ok(EpisodeWrite::Inserted)
        }
        (Some(None), Some(media_url)) => {
            diesel::update(
                episodes::table
                    .find((episode.work_id, number))
                    .filter(episodes::media_url.is_null()),
            )
            .set((
                episodes::media_url.eq(media_url),
                episodes::name.eq(&episode.name),
                episodes::play_url.eq(&episode.play_url),
                episodes::last_seen.eq(now),
            ))
            .execute(conn)
            .await?;
            Ok(EpisodeWrite::Filled)
        }
        _ => Ok(EpisodeWrite::Unchanged),
    }
}
