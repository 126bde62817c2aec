//! Database context: schema setup and repository access.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::catalog::CatalogRepository;
use super::pool::{DbError, DbPool};
use super::progress::ProgressRepository;

const SCHEMA_SQL: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;

    CREATE TABLE IF NOT EXISTS works (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        genre TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        year TEXT NOT NULL DEFAULT '',
        actors TEXT NOT NULL DEFAULT '[]',
        directors TEXT NOT NULL DEFAULT '[]',
        synopsis TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL,
        last_seen TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS episodes (
        work_id INTEGER NOT NULL REFERENCES works(id),
        episode INTEGER NOT NULL,
        name TEXT NOT NULL,
        play_url TEXT NOT NULL,
        media_url TEXT,
        last_seen TEXT NOT NULL,
        PRIMARY KEY (work_id, episode)
    );

    CREATE INDEX IF NOT EXISTS idx_episodes_unresolved
        ON episodes(work_id) WHERE media_url IS NULL;

    CREATE TABLE IF NOT EXISTS category_progress (
        category INTEGER PRIMARY KEY,
        current_page INTEGER NOT NULL DEFAULT 1,
        total_pages INTEGER NOT NULL DEFAULT 0,
        last_work_id INTEGER,
        status TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
"#;

/// Entry point for store access.
///
/// Create one context per command and pass repositories (cheap clones of
/// the same pool) to the components that need them.
#[derive(Clone, Debug)]
pub struct DbContext {
    pool: DbPool,
}

impl DbContext {
    /// Context for a SQLite file.
    pub fn new(db_path: &Path) -> Self {
        Self {
            pool: DbPool::from_path(db_path),
        }
    }

    /// Context for a `sqlite:` URL or plain path.
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: DbPool::new(database_url),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn progress(&self) -> ProgressRepository {
        ProgressRepository::new(self.pool.clone())
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await
    }
}

/// Fresh database in a temporary directory with the schema applied.
#[cfg(test)]
pub(crate) async fn setup_test_db() -> (DbContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DbContext::new(&dir.path().join("test.db"));
    ctx.init_schema().await.unwrap();
    (ctx, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let (ctx, _dir) = setup_test_db().await;
        ctx.init_schema().await.unwrap();

        let counts = ctx.catalog().counts().await.unwrap();
        assert_eq!(counts.works, 0);
        assert_eq!(counts.episodes, 0);
        assert!(ctx.progress().get_all().await.unwrap().is_empty());
    }
}
