//! Per-category progress checkpoint.

use tracing::{debug, info};

use crate::error::Result;
use crate::models::{CategoryProgress, RunStatus};
use crate::repository::ProgressRepository;

/// Reads and moves the page cursor of each category.
///
/// The stored cursor is the next listing page to process; it only moves
/// after a wave has been flushed.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    progress: ProgressRepository,
}

impl Checkpoint {
    pub fn new(progress: ProgressRepository) -> Self {
        Self { progress }
    }

    /// Decide the first page of a run and mark the category running.
    ///
    /// A forced start page always wins. Otherwise the stored cursor is used
    /// unless the last run completed, in which case the run starts over.
    pub async fn begin(&self, category: u32, forced_start: Option<u32>, total_pages: u32) -> Result<u32> {
        let stored = self.progress.get(category).await?;

        let resumed = stored.filter(|p| forced_start.is_none() && p.status.is_resumable());
        let start = match (&resumed, forced_start) {
            (_, Some(page)) => page.max(1),
            (Some(previous), None) => {
                info!(
                    "Resuming category {} at page {} (previous run {})",
                    category, previous.current_page, previous.status
                );
                previous.current_page.max(1)
            }
            (None, None) => 1,
        };

        let mut progress = CategoryProgress::started(category, start, total_pages);
        progress.last_work_id = resumed.and_then(|p| p.last_work_id);
        self.progress.save(&progress).await?;

        debug!("Category {} begins at page {} of {}", category, start, total_pages);
        Ok(start)
    }

    /// Record that every page before `next_page` is flushed.
    pub async fn advance(
        &self,
        category: u32,
        next_page: u32,
        total_pages: u32,
        last_work_id: Option<i64>,
    ) -> Result<()> {
        let mut progress = CategoryProgress::started(category, next_page, total_pages);
        progress.last_work_id = last_work_id;
        self.progress.save(&progress).await?;
        Ok(())
    }

    /// Move the category to a terminal status, keeping its cursor.
    ///
    /// A row still marked completed was never begun by this run (it failed
    /// before the first page was decided); its past-the-end cursor is reset
    /// so the next run walks the category from the top.
    pub async fn finish(&self, category: u32, status: RunStatus) -> Result<()> {
        match self.progress.get(category).await? {
            Some(mut stored) if stored.status == RunStatus::Completed && status != RunStatus::Completed => {
                debug!(
                    "Category {} failed before starting; resetting cursor from page {}",
                    category, stored.current_page
                );
                stored.current_page = 1;
                stored.last_work_id = None;
                stored.status = status;
                self.progress.save(&stored).await?;
            }
            Some(_) => {
                self.progress.set_status(category, status).await?;
            }
            None => {
                let mut progress = CategoryProgress::started(category, 1, 0);
                progress.status = status;
                self.progress.save(&progress).await?;
            }
        }
        Ok(())
    }

    pub async fn load(&self, category: u32) -> Result<Option<CategoryProgress>> {
        Ok(self.progress.get(category).await?)
    }
}
