//! Per-category checkpoint rows.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{DbError, DbPool};
use super::records::{NewProgress, ProgressRecord};
use crate::models::{CategoryProgress, RunStatus};
use crate::schema::category_progress;

impl From<ProgressRecord> for CategoryProgress {
    fn from(record: ProgressRecord) -> Self {
        CategoryProgress {
            category: record.category as u32,
            current_page: record.current_page.max(1) as u32,
            total_pages: record.total_pages.max(0) as u32,
            last_work_id: record.last_work_id,
            // Unknown status strings are treated as an interrupted run.
            status: RunStatus::from_str(&record.status).unwrap_or(RunStatus::Interrupted),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Repository for `category_progress`.
#[derive(Clone, Debug)]
pub struct ProgressRepository {
    pool: DbPool,
}

impl ProgressRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, category: u32) -> Result<Option<CategoryProgress>, DbError> {
        let mut conn = self.pool.get().await?;
        let record: Option<ProgressRecord> = category_progress::table
            .find(category as i32)
            .select(ProgressRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(record.map(CategoryProgress::from))
    }

    pub async fn get_all(&self) -> Result<Vec<CategoryProgress>, DbError> {
        let mut conn = self.pool.get().await?;
        let records: Vec<ProgressRecord> = category_progress::table
            .order(category_progress::category.asc())
            .select(ProgressRecord::as_select())
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(CategoryProgress::from).collect())
    }

    /// Store a checkpoint, replacing any previous row for the category.
    pub async fn save(&self, progress: &CategoryProgress) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let row = NewProgress {
            category: progress.category as i32,
            current_page: progress.current_page as i32,
            total_pages: progress.total_pages as i32,
            last_work_id: progress.last_work_id,
            status: progress.status.as_str(),
            updated_at: &now,
        };

        let mut conn = self.pool.get().await?;

        // Try to update first
        let updated = diesel::update(category_progress::table.find(row.category))
            .set(&row)
            .execute(&mut conn)
            .await?;

        // If no row was updated, insert
        if updated == 0 {
            diesel::insert_into(category_progress::table)
                .values(&row)
                .execute(&mut conn)
                .await?;
        }

        Ok(())
    }

    /// Change only the status of an existing row. Returns false when the
    /// category has no checkpoint yet.
    pub async fn set_status(&self, category: u32, status: RunStatus) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(category_progress::table.find(category as i32))
            .set((
                category_progress::status.eq(status.as_str()),
                category_progress::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }
}
