//! Per-category progress checkpoint model.

#![allow(clippy::should_implement_trait)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a category run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether a new run may pick up the stored page cursor.
    ///
    /// A stored `Running` row means the previous process died without
    /// reaching a terminal state, so it resumes like an interruption.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted checkpoint for one catalog category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryProgress {
    pub category: u32,
    /// Next listing page to process.
    pub current_page: u32,
    /// Total page count as last measured.
    pub total_pages: u32,
    pub last_work_id: Option<i64>,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

impl CategoryProgress {
    /// A fresh running checkpoint starting at `current_page`.
    pub fn started(category: u32, current_page: u32, total_pages: u32) -> Self {
        Self {
            category,
            current_page,
            total_pages,
            last_work_id: None,
            status: RunStatus::Running,
            updated_at: Utc::now(),
        }
    }
}
