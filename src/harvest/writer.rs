//! Batched writer.
//!
//! The batch buffer is owned by a single writer task; every other component
//! talks to it through a [`WriterHandle`] over a channel, so no lock guards
//! the buffer and the buffer is never held across a store call by anyone
//! but its owner.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{HarvestError, Result};
use crate::models::{Episode, EpisodeKey, Work};
use crate::repository::{CatalogRepository, FlushReport};

const MAILBOX_CAPACITY: usize = 64;

/// Buffer sizes that trigger an automatic flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchThresholds {
    pub works: usize,
    pub episodes: usize,
}

impl BatchThresholds {
    /// Thresholds derived from a batch size: `n` works or `5n` episodes.
    pub fn from_batch_size(batch_size: usize) -> Self {
        let works = batch_size.max(1);
        Self {
            works,
            episodes: works.saturating_mul(5),
        }
    }
}

enum WriterCommand {
    Add {
        work: Option<Work>,
        episodes: Vec<Episode>,
        reply: oneshot::Sender<Result<Option<FlushReport>>>,
    },
    Touch {
        work_id: i64,
        reply: oneshot::Sender<Result<()>>,
    },
    Flush {
        reply: oneshot::Sender<Result<FlushReport>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<FlushReport>>,
    },
}

/// Not-yet-persisted works and episodes.
#[derive(Default)]
struct BatchBuffer {
    works: BTreeMap<i64, Work>,
    episodes: BTreeMap<EpisodeKey, Episode>,
    /// Stored works sighted again; only their `last_seen` is written.
    seen: BTreeSet<i64>,
}

impl BatchBuffer {
    fn add(&mut self, work: Option<Work>, episodes: Vec<Episode>) {
        if let Some(work) = work {
            // Later sighting of the same work replaces the earlier one.
            self.works.insert(work.id, work);
        }
        for episode in episodes {
            match self.episodes.entry(episode.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(episode);
                }
                Entry::Occupied(mut slot) => {
                    // Never trade a resolved address for an unresolved one.
                    if episode.is_resolved() || !slot.get().is_resolved() {
                        slot.insert(episode);
                    }
                }
            }
        }
    }

    fn is_full(&self, thresholds: BatchThresholds) -> bool {
        self.works.len() >= thresholds.works || self.episodes.len() >= thresholds.episodes
    }

    fn is_empty(&self) -> bool {
        self.works.is_empty() && self.episodes.is_empty() && self.seen.is_empty()
    }

    fn len(&self) -> (usize, usize) {
        (self.works.len(), self.episodes.len())
    }
}

struct BatchWriter {
    catalog: CatalogRepository,
    thresholds: BatchThresholds,
    buffer: BatchBuffer,
}

impl BatchWriter {
    /// Persist the buffer in one transaction; it is cleared only on success.
    async fn flush(&mut self) -> Result<FlushReport> {
        if self.buffer.is_empty() {
            return Ok(FlushReport::default());
        }

        // Keyed maps iterate in (work id, episode) order.
        let works: Vec<Work> = self.buffer.works.values().cloned().collect();
        let episodes: Vec<Episode> = self.buffer.episodes.values().cloned().collect();
        let seen: Vec<i64> = self.buffer.seen.iter().copied().collect();

        match self.catalog.save_batch_touching(&works, &episodes, &seen).await {
            Ok(report) => {
                self.buffer = BatchBuffer::default();
                info!(
                    "Flushed {} works ({} revisited), {} new episodes, {} filled, {} unchanged",
                    report.works,
                    report.works_touched,
                    report.episodes_inserted,
                    report.episodes_filled,
                    report.episodes_unchanged
                );
                Ok(report)
            }
            Err(e) => {
                let (w, ep) = self.buffer.len();
                error!("Flush failed, keeping {} works and {} episodes buffered: {}", w, ep, e);
                Err(HarvestError::Database(e))
            }
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<WriterCommand>) {
        while let Some(command) = mailbox.recv().await {
            match command {
                WriterCommand::Add {
                    work,
                    episodes,
                    reply,
                } => {
                    self.buffer.add(work, episodes);
                    let result = if self.buffer.is_full(self.thresholds) {
                        debug!("Batch threshold reached");
                        self.flush().await.map(Some)
                    } else {
                        Ok(None)
                    };
                    let _ = reply.send(result);
                }
                WriterCommand::Touch { work_id, reply } => {
                    self.buffer.seen.insert(work_id);
                    let _ = reply.send(Ok(()));
                }
                WriterCommand::Flush { reply } => {
                    let _ = reply.send(self.flush().await);
                }
                WriterCommand::Shutdown { reply } => {
                    let result = self.flush().await;
                    let stop = result.is_ok();
                    let _ = reply.send(result);
                    if stop {
                        return;
                    }
                }
            }
        }

        // Every handle is gone; persist whatever is left.
        if let Err(e) = self.flush().await {
            error!("Final flush after writer handles closed failed: {}", e);
        }
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    mailbox: mpsc::Sender<WriterCommand>,
}

impl std::fmt::Debug for WriterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterCommand::Add { episodes, .. } => {
                write!(f, "Add({} episodes)", episodes.len())
            }
            WriterCommand::Touch { work_id, .. } => write!(f, "Touch({})", work_id),
            WriterCommand::Flush { .. } => f.write_str("Flush"),
            WriterCommand::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl WriterHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> WriterCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(command(reply))
            .await
            .map_err(|_| HarvestError::WriterClosed)?;
        response.await.map_err(|_| HarvestError::WriterClosed)?
    }

    /// Buffer a work and/or episodes. Returns the flush report when the add
    /// crossed a threshold and triggered a flush.
    pub async fn add(&self, work: Option<Work>, episodes: Vec<Episode>) -> Result<Option<FlushReport>> {
        self.request(|reply| WriterCommand::Add {
            work,
            episodes,
            reply,
        })
        .await
    }

    /// Mark a stored work as seen again; written with the next flush.
    pub async fn touch(&self, work_id: i64) -> Result<()> {
        self.request(|reply| WriterCommand::Touch { work_id, reply }).await
    }

    pub async fn flush(&self) -> Result<FlushReport> {
        self.request(|reply| WriterCommand::Flush { reply }).await
    }

    /// Flush and stop the writer task. On a failed flush the task keeps
    /// running so the caller can retry.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        self.request(|reply| WriterCommand::Shutdown { reply }).await
    }
}

/// Start the writer task.
pub fn spawn_writer(
    catalog: CatalogRepository,
    thresholds: BatchThresholds,
) -> (WriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let writer = BatchWriter {
        catalog,
        thresholds,
        buffer: BatchBuffer::default(),
    };
    let task = tokio::spawn(writer.run(rx));
    (WriterHandle { mailbox: tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::setup_test_db;
    use chrono::Utc;
    use diesel_async::SimpleAsyncConnection;

    fn work(id: i64, title: &str) -> Work {
        Work {
            id,
            title: title.to_string(),
            genre: "g".to_string(),
            region: "r".to_string(),
            year: "2020".to_string(),
            actors: vec![],
            directors: vec![],
            synopsis: "s".to_string(),
            url: format!("https://example.test/mp4/{id}.html"),
            last_seen: Utc::now(),
        }
    }

    fn episode(work_id: i64, n: u32, media_url: Option<&str>) -> Episode {
        Episode::new(work_id, n, "name", "play").with_media_url(media_url.map(String::from))
    }

    #[tokio::test]
    async fn test_duplicate_work_in_batch_keeps_later_fields() {
        let (ctx, _dir) = setup_test_db().await;
        let (writer, task) = spawn_writer(ctx.catalog(), BatchThresholds::from_batch_size(50));

        writer.add(Some(work(1, "first")), vec![]).await.unwrap();
        writer.add(Some(work(1, "second")), vec![]).await.unwrap();
        let report = writer.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(report.works, 1);
        let counts = ctx.catalog().counts().await.unwrap();
        assert_eq!(counts.works, 1);
        let stored = ctx.catalog().get_work(1).await.unwrap().unwrap();
        assert_eq!(stored.title, "second");
    }

    #[tokio::test]
    async fn test_threshold_triggers_flush() {
        let (ctx, _dir) = setup_test_db().await;
        let (writer, _task) = spawn_writer(ctx.catalog(), BatchThresholds::from_batch_size(2));

        assert_eq!(writer.add(Some(work(1, "a")), vec![]).await.unwrap(), None);
        let report = writer.add(Some(work(2, "b")), vec![]).await.unwrap();
        assert_eq!(report.map(|r| r.works), Some(2));

        // Ten episodes reach the episode threshold (5 * 2).
        let episodes: Vec<Episode> = (1..=10).map(|n| episode(1, n, None)).collect();
        let report = writer.add(None, episodes).await.unwrap().unwrap();
        assert_eq!(report.episodes_inserted, 10);
    }

    #[tokio::test]
    async fn test_out_of_order_episodes_and_resolved_wins() {
        let (ctx, _dir) = setup_test_db().await;
        let (writer, _task) = spawn_writer(ctx.catalog(), BatchThresholds::from_batch_size(50));

        writer.add(Some(work(3, "w")), vec![]).await.unwrap();
        writer
            .add(
                None,
                vec![
                    episode(3, 3, None),
                    episode(3, 1, Some("https://cdn.test/1.m3u8")),
                    episode(3, 2, None),
                ],
            )
            .await
            .unwrap();
        // A later unresolved attempt for episode 1 must not erase its address.
        writer.add(None, vec![episode(3, 1, None)]).await.unwrap();
        writer.flush().await.unwrap();

        let stored = ctx.catalog().get_episodes(3).await.unwrap();
        let numbers: Vec<u32> = stored.iter().map(|e| e.episode).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(stored[0].media_url.as_deref(), Some("https://cdn.test/1.m3u8"));
    }

    #[tokio::test]
    async fn test_touched_works_flush_with_batch() {
        let (ctx, _dir) = setup_test_db().await;
        let (writer, _task) = spawn_writer(ctx.catalog(), BatchThresholds::from_batch_size(50));

        writer.add(Some(work(4, "four")), vec![]).await.unwrap();
        writer.flush().await.unwrap();
        let first_seen = ctx.catalog().get_work(4).await.unwrap().unwrap().last_seen;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        writer.touch(4).await.unwrap();
        writer.touch(4).await.unwrap();
        let report = writer.flush().await.unwrap();
        assert_eq!(report.works_touched, 1);
        assert_eq!(report.works, 0);
        assert!(ctx.catalog().get_work(4).await.unwrap().unwrap().last_seen > first_seen);

        // Nothing left to write.
        assert_eq!(writer.flush().await.unwrap(), FlushReport::default());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer() {
        let (ctx, _dir) = setup_test_db().await;
        let (writer, _task) = spawn_writer(ctx.catalog(), BatchThresholds::from_batch_size(50));

        let mut conn = ctx.pool().get().await.unwrap();
        conn.batch_execute("ALTER TABLE works RENAME TO works_moved")
            .await
            .unwrap();

        writer.add(Some(work(5, "kept")), vec![]).await.unwrap();
        assert!(writer.flush().await.is_err());

        conn.batch_execute("ALTER TABLE works_moved RENAME TO works")
            .await
            .unwrap();
        let report = writer.flush().await.unwrap();
        assert_eq!(report.works, 1);
        assert!(ctx.catalog().work_exists(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_writer_reports_error() {
        let (ctx, _dir) = setup_test_db().await;
        let (writer, task) = spawn_writer(ctx.catalog(), BatchThresholds::from_batch_size(50));

        writer.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            writer.flush().await,
            Err(HarvestError::WriterClosed)
        ));
    }
}
