//! Local store: the on-device SQLite replica plus queue, conflict, and
//! cache tables.
//!
//! Everything the process must not lose across a crash lives here. Rows
//! are mapped into engine types through `Stored*` structs; payloads and
//! records are JSON text, timestamps are RFC3339 text via chrono.

mod cache;
mod changes;
mod conflicts;
mod entities;

pub use changes::{EvictionOutcome, FailedChange};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Handle to the local database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (creating if missing) the database at `path` and run
    /// pending migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path, "local store opened");
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection, otherwise each
    /// pooled connection would see its own empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
