//! The run loop tying the pipeline components together.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::checkpoint::Checkpoint;
use super::detail::{DetailExtractor, DetailOutcome};
use super::executor::{Executor, TaskFailure};
use super::frontier::Frontier;
use super::oracle::DedupOracle;
use super::resolver::{EpisodeResolution, EpisodeResolver};
use super::writer::{spawn_writer, BatchThresholds, WriterHandle};
use crate::config::HarvestOptions;
use crate::error::{HarvestError, Result};
use crate::http_client::PageSource;
use crate::models::{Category, Episode, RunStatus, Work};
use crate::parser::PageParser;
use crate::repository::{DbContext, FlushReport};

/// Progress notifications for a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestEvent {
    CategoryStarted {
        category: u32,
        start_page: u32,
        total_pages: u32,
    },
    WaveFlushed {
        category: u32,
        next_page: u32,
        works_seen: usize,
        episodes_resolved: usize,
    },
    CategoryFinished {
        category: u32,
        status: RunStatus,
    },
}

/// Summary of one category run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub category: u32,
    pub status: RunStatus,
    pub start_page: u32,
    pub total_pages: u32,
    pub pages_processed: u32,
    pub works_seen: usize,
    pub works_new: usize,
    pub episodes_resolved: usize,
    pub episodes_unresolved: usize,
    pub tasks_failed: usize,
    pub flushed: FlushReport,
    pub last_work_id: Option<i64>,
    /// Message of the fault that ended an `Error` run.
    pub error: Option<String>,
}

impl RunOutcome {
    fn new(category: u32) -> Self {
        Self {
            category,
            status: RunStatus::Running,
            start_page: 1,
            total_pages: 0,
            pages_processed: 0,
            works_seen: 0,
            works_new: 0,
            episodes_resolved: 0,
            episodes_unresolved: 0,
            tasks_failed: 0,
            flushed: FlushReport::default(),
            last_work_id: None,
            error: None,
        }
    }

    pub fn works_written(&self) -> usize {
        self.flushed.works
    }

    fn fail(&mut self, err: &HarvestError) {
        self.status = RunStatus::Error;
        self.error = Some(err.to_string());
    }
}

/// How a wave ended.
enum WaveEnd {
    /// Every task was started and finished.
    Complete,
    /// Cancellation stopped submission partway.
    Cancelled,
}

/// One episode to resolve: work id, episode number and display name.
type EpisodeJob = (i64, u32, String);

/// Pipeline context for harvesting runs.
///
/// Must be created inside a Tokio runtime: construction starts the batched
/// writer task, which lives until [`Harvester::shutdown`].
pub struct Harvester {
    frontier: Frontier,
    oracle: DedupOracle,
    details: DetailExtractor,
    resolver: EpisodeResolver,
    checkpoint: Checkpoint,
    writer: WriterHandle,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    executor: Executor,
    options: HarvestOptions,
    categories: Vec<Category>,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<HarvestEvent>>,
}

impl Harvester {
    pub fn new(
        db: &DbContext,
        source: Arc<dyn PageSource>,
        parser: Arc<dyn PageParser>,
        site_root: &Url,
        options: HarvestOptions,
    ) -> Self {
        let cancel = CancellationToken::new();
        let oracle = DedupOracle::new(db.catalog());
        let (writer, writer_task) = spawn_writer(
            db.catalog(),
            BatchThresholds::from_batch_size(options.batch_size),
        );
        let executor = Executor::new(options.workers, cancel.clone()).with_pacing(options.delay);

        Self {
            frontier: Frontier::new(
                source.clone(),
                parser.clone(),
                site_root,
                options.listing_concurrency,
            ),
            details: DetailExtractor::new(source.clone(), parser.clone(), oracle.clone()),
            resolver: EpisodeResolver::new(source, parser, site_root),
            oracle,
            checkpoint: Checkpoint::new(db.progress()),
            writer,
            writer_task: Mutex::new(Some(writer_task)),
            executor,
            options,
            categories: Category::defaults(),
            cancel,
            events: None,
        }
    }

    /// Replace the category table used by [`Harvester::run_all`].
    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<HarvestEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Token that stops the current run at the next safe point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    async fn emit(&self, event: HarvestEvent) {
        if let Some(ref events) = self.events {
            let _ = events.send(event).await;
        }
    }

    /// Harvest one category from `start_page` (or its checkpoint).
    ///
    /// Faults that end the run are reported through the outcome's `Error`
    /// status; `Err` is returned only when the final status itself cannot
    /// be recorded.
    pub async fn run_category(&self, category: u32, start_page: Option<u32>) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::new(category);

        if let Err(e) = self.walk_category(category, start_page, &mut outcome).await {
            error!("Category {} stopped: {}", category, e);
            outcome.fail(&e);
        }

        // Whatever is buffered belongs to finished tasks; keep it.
        match self.writer.flush().await {
            Ok(report) => outcome.flushed.merge(report),
            Err(e) => {
                error!("Final flush for category {} failed: {}", category, e);
                outcome.fail(&e);
            }
        }

        if outcome.status == RunStatus::Running {
            outcome.status = RunStatus::Completed;
        }
        self.checkpoint.finish(category, outcome.status).await?;
        self.emit(HarvestEvent::CategoryFinished {
            category,
            status: outcome.status,
        })
        .await;

        info!(
            "Category {} {}: {} pages, {} works seen ({} new), {} episodes resolved, {} unresolved, {} failed tasks",
            category,
            outcome.status,
            outcome.pages_processed,
            outcome.works_seen,
            outcome.works_new,
            outcome.episodes_resolved,
            outcome.episodes_unresolved,
            outcome.tasks_failed
        );
        Ok(outcome)
    }

    async fn walk_category(
        &self,
        category: u32,
        forced_start: Option<u32>,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        let mut total_pages = self.frontier.total_pages(category).await?;
        if self.options.test_mode {
            total_pages = total_pages.min(self.options.test_page_limit);
        }
        outcome.total_pages = total_pages;

        let start = self.checkpoint.begin(category, forced_start, total_pages).await?;
        outcome.start_page = start;
        self.emit(HarvestEvent::CategoryStarted {
            category,
            start_page: start,
            total_pages,
        })
        .await;

        if start > total_pages {
            info!(
                "Category {}: start page {} is past the last page {}",
                category, start, total_pages
            );
            return Ok(());
        }
        info!("Category {}: pages {}..={}", category, start, total_pages);

        let per_wave = self.options.pages_per_wave.max(1);
        let mut page = start;
        while page <= total_pages {
            if self.cancel.is_cancelled() {
                outcome.status = RunStatus::Interrupted;
                break;
            }

            let last = page.saturating_add(per_wave - 1).min(total_pages);
            let pages: Vec<u32> = (page..=last).collect();

            match self.run_wave(category, &pages, outcome).await? {
                WaveEnd::Complete => {
                    outcome.flushed.merge(self.writer.flush().await?);
                    page = last + 1;
                    outcome.pages_processed += pages.len() as u32;
                    self.checkpoint
                        .advance(category, page, total_pages, outcome.last_work_id)
                        .await?;
                    self.emit(HarvestEvent::WaveFlushed {
                        category,
                        next_page: page,
                        works_seen: outcome.works_seen,
                        episodes_resolved: outcome.episodes_resolved,
                    })
                    .await;
                }
                WaveEnd::Cancelled => {
                    // Partial wave: its results are flushed by the caller but
                    // the cursor stays at the wave start.
                    outcome.status = RunStatus::Interrupted;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Enumerate, extract and resolve one wave of listing pages.
    async fn run_wave(&self, category: u32, pages: &[u32], outcome: &mut RunOutcome) -> Result<WaveEnd> {
        let urls = self.frontier.list_pages(category, pages).await;
        if self.cancel.is_cancelled() {
            return Ok(WaveEnd::Cancelled);
        }

        let details = self
            .executor
            .run(urls, |url: String| async move { self.details.extract(&url).await })
            .await;
        self.record_failures(details.failed, outcome)?;

        let mut jobs: Vec<EpisodeJob> = Vec::new();
        for detail in details.succeeded {
            outcome.works_seen += 1;
            outcome.last_work_id = Some(detail.id());

            let missing = self
                .oracle
                .missing_episodes(detail.id(), detail.episode_count())
                .await?;
            debug!(
                "Work {}: {} of {} episodes missing",
                detail.id(),
                missing.len(),
                detail.episode_count()
            );
            let title = detail.title().to_string();
            jobs.extend(missing.into_iter().map(|n| (detail.id(), n, title.clone())));

            match detail {
                DetailOutcome::New { work, .. } => {
                    outcome.works_new += 1;
                    self.add_to_writer(Some(work), Vec::new(), outcome).await?;
                }
                DetailOutcome::Known { id, .. } => self.writer.touch(id).await?,
            }
        }

        if !details.skipped.is_empty() {
            return Ok(WaveEnd::Cancelled);
        }

        let resolved = self
            .executor
            .run(jobs, |(work_id, episode, name): EpisodeJob| async move {
                self.resolver.resolve(work_id, episode, &name).await
            })
            .await;
        let complete = resolved.is_complete();
        let unreachable = self.record_failures(resolved.failed, outcome)?;

        let mut episodes: Vec<Episode> = Vec::with_capacity(resolved.succeeded.len() + unreachable.len());
        for EpisodeResolution { episode, .. } in resolved.succeeded {
            if episode.is_resolved() {
                outcome.episodes_resolved += 1;
            } else {
                outcome.episodes_unresolved += 1;
            }
            episodes.push(episode);
        }
        // The play page itself could not be fetched: stored unresolved so a
        // later run retries it.
        for (work_id, episode, name) in unreachable {
            outcome.episodes_unresolved += 1;
            let play_url = self.resolver.play_url(work_id, episode)?;
            episodes.push(Episode::new(work_id, episode, &name, &play_url));
        }
        self.add_to_writer(None, episodes, outcome).await?;

        if complete {
            Ok(WaveEnd::Complete)
        } else {
            Ok(WaveEnd::Cancelled)
        }
    }

    async fn add_to_writer(
        &self,
        work: Option<Work>,
        episodes: Vec<Episode>,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        if work.is_none() && episodes.is_empty() {
            return Ok(());
        }
        if let Some(report) = self.writer.add(work, episodes).await? {
            outcome.flushed.merge(report);
        }
        Ok(())
    }

    /// Count failed tasks and hand back their inputs; a fatal failure ends
    /// the run.
    fn record_failures<I: std::fmt::Debug>(
        &self,
        failures: Vec<TaskFailure<I>>,
        outcome: &mut RunOutcome,
    ) -> Result<Vec<I>> {
        let mut inputs = Vec::with_capacity(failures.len());
        for TaskFailure { input, error } in failures {
            outcome.tasks_failed += 1;
            if error.is_fatal() {
                return Err(error);
            }
            warn!("Task {:?} failed: {}", input, error);
            inputs.push(input);
        }
        Ok(inputs)
    }

    /// Run every configured category in order.
    ///
    /// Stops after the first category that does not complete; the
    /// remaining ones are left for a later run.
    pub async fn run_all(&self) -> Result<Vec<(Category, RunOutcome)>> {
        let mut outcomes = Vec::new();
        let categories = self.categories.clone();

        for (index, category) in categories.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            if index > 0 {
                let pause = self.options.category_pause();
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.cancel.cancelled() => break,
                }
            }

            info!("Harvesting category {} ({})", category.id, category.label);
            let outcome = self.run_category(category.id, None).await?;
            let completed = outcome.status == RunStatus::Completed;
            outcomes.push((category.clone(), outcome));
            if !completed {
                break;
            }
        }

        Ok(outcomes)
    }

    /// Flush whatever is buffered and stop the writer task.
    pub async fn shutdown(&self) -> Result<FlushReport> {
        let report = self.writer.shutdown().await?;
        if let Some(task) = self.writer_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Writer task ended abnormally: {}", e);
            }
        }
        Ok(report)
    }
}
