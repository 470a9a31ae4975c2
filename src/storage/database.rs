//! Database connection and schema setup for the job store.

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Database connection pool type.
pub type DatabasePool = Pool<Sqlite>;

/// Owns the SQLite connection pool backing the job store and runs schema setup.
pub struct DatabaseManager {
    pool: DatabasePool,
    database_path: String,
}

impl DatabaseManager {
    /// Open (creating if absent) the database at `database_path`, run schema
    /// setup and the `interviewer_count`/`participant_count` migration (§4.2).
    pub async fn new(database_path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let database_path_str = database_path.to_string_lossy().to_string();
        info!("initializing job store database at {}", database_path_str);

        let connect_options = SqliteConnectOptions::from_str(&format!(
            "sqlite:{}",
            database_path_str
        ))
        .map_err(|e| Error::store(e.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::store(format!("failed to connect to database: {}", e)))?;

        let manager = Self {
            pool,
            database_path: database_path_str,
        };

        manager.init_schema().await?;
        manager.ensure_jobs_columns().await?;

        info!("job store database ready");
        Ok(manager)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                source_path TEXT NOT NULL,
                source_name TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                duration_sec REAL NOT NULL DEFAULT 0,
                chunks_total INTEGER NOT NULL DEFAULT 0,
                chunks_done INTEGER NOT NULL DEFAULT 0,
                transcript_json TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                job_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                start_sec REAL NOT NULL,
                end_sec REAL NOT NULL,
                chunk_path TEXT NOT NULL,
                chunk_hash TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                engine TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                transcript_json TEXT,
                confidence REAL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (job_id, idx),
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `_ensure_jobs_column` equivalent: add `interviewer_count`/`participant_count`
    /// with default 1 if missing. Idempotent via `PRAGMA table_info`.
    async fn ensure_jobs_columns(&self) -> Result<()> {
        let columns = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await?;
        let have: Vec<String> = columns
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        if !have.iter().any(|c| c == "interviewer_count") {
            debug!("applying migration: jobs.interviewer_count");
            sqlx::query("ALTER TABLE jobs ADD COLUMN interviewer_count INTEGER NOT NULL DEFAULT 1")
                .execute(&self.pool)
                .await?;
        }
        if !have.iter().any(|c| c == "participant_count") {
            debug!("applying migration: jobs.participant_count");
            sqlx::query("ALTER TABLE jobs ADD COLUMN participant_count INTEGER NOT NULL DEFAULT 1")
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn opens_and_migrates_fresh_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");

        let manager = DatabaseManager::new(&db_path, 5).await.unwrap();

        let columns = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(manager.pool())
            .await
            .unwrap();
        let names: Vec<String> = columns.iter().map(|r| r.get::<String, _>("name")).collect();
        assert!(names.contains(&"interviewer_count".to_string()));
        assert!(names.contains(&"participant_count".to_string()));
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");

        let _ = DatabaseManager::new(&db_path, 5).await.unwrap();
        let manager = DatabaseManager::new(&db_path, 5).await.unwrap();
        assert!(manager.table_count("jobs").await >= 0);
    }

    impl DatabaseManager {
        async fn table_count(&self, table: &str) -> i64 {
            sqlx::query(&format!("SELECT COUNT(*) as count FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .unwrap()
                .get::<i64, _>("count")
        }
    }
}
