//! The job store (C2): durable job + chunk state, plus atomic JSON checkpoints.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::storage::database::{DatabaseManager, DatabasePool};
use crate::storage::models::{Chunk, ChunkStatus, Job, JobStatus, Utterance};
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// A freshly rendered chunk, ready to be upserted in status `queued`.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub chunk_path: String,
    pub chunk_hash: String,
}

/// A completed (or paused) chunk attempt, ready to be upserted.
#[derive(Debug, Clone)]
pub struct ChunkUpdate {
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub chunk_path: String,
    pub chunk_hash: String,
    pub status: ChunkStatus,
    pub engine: Option<String>,
    pub attempt_count: i64,
    pub transcript: Option<Vec<Utterance>>,
    pub confidence: Option<f64>,
}

/// Fields to change on a job row. `None` leaves a field untouched;
/// `error_message: Some(None)` explicitly clears it.
#[derive(Debug, Clone, Default)]
pub struct JobStatusUpdate {
    pub status: Option<JobStatus>,
    pub chunks_done: Option<i64>,
    pub chunks_total: Option<i64>,
    pub error_message: Option<Option<String>>,
}

pub struct JobStore {
    database: DatabaseManager,
    app_data_dir: PathBuf,
}

impl JobStore {
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let db_path = crate::paths::db_path(config);
        let database = DatabaseManager::new(&db_path, config.database.max_connections).await?;
        Ok(Self {
            database,
            app_data_dir: config.paths.app_data_dir.clone(),
        })
    }

    fn pool(&self) -> &DatabasePool {
        self.database.pool()
    }

    pub async fn create_job(
        &self,
        job_id: Option<String>,
        source_path: &str,
        source_name: &str,
        source_hash: &str,
        interviewer_count: i64,
        participant_count: i64,
    ) -> Result<Job> {
        let id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO jobs
            (id, source_path, source_name, source_hash, status, created_at, updated_at,
             duration_sec, chunks_total, chunks_done, transcript_json, error_message,
             interviewer_count, participant_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 0, NULL, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(source_path)
        .bind(source_name)
        .bind(source_hash)
        .bind(JobStatus::Queued)
        .bind(now)
        .bind(now)
        .bind(interviewer_count)
        .bind(participant_count)
        .execute(self.pool())
        .await?;

        info!("created job {}", id);
        self.get_job(&id)
            .await?
            .ok_or_else(|| Error::store("job vanished immediately after insert"))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(job)
    }

    /// The most recently updated job whose status is resumable.
    pub async fn latest_incomplete_job(&self) -> Result<Option<Job>> {
        let statuses = JobStatus::incomplete_statuses();
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT * FROM jobs WHERE status IN ({}) ORDER BY datetime(updated_at) DESC LIMIT 1",
            placeholders
        );

        let mut query = sqlx::query_as::<_, Job>(&sql);
        for status in statuses {
            query = query.bind(*status);
        }

        Ok(query.fetch_optional(self.pool()).await?)
    }

    pub async fn list_ready_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let clamped = limit.clamp(1, 500);
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = ? ORDER BY datetime(updated_at) DESC LIMIT ?",
        )
        .bind(JobStatus::Ready)
        .bind(clamped)
        .fetch_all(self.pool())
        .await?;
        Ok(jobs)
    }

    pub async fn update_job_status(&self, job_id: &str, update: JobStatusUpdate) -> Result<()> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET ");
        let mut first = true;

        let mut push_comma = |b: &mut QueryBuilder<Sqlite>, first: &mut bool| {
            if !*first {
                b.push(", ");
            }
            *first = false;
        };

        if let Some(status) = update.status {
            push_comma(&mut builder, &mut first);
            builder.push("status = ").push_bind(status);
        }
        if let Some(chunks_done) = update.chunks_done {
            push_comma(&mut builder, &mut first);
            builder.push("chunks_done = ").push_bind(chunks_done);
        }
        if let Some(chunks_total) = update.chunks_total {
            push_comma(&mut builder, &mut first);
            builder.push("chunks_total = ").push_bind(chunks_total);
        }
        if let Some(error_message) = &update.error_message {
            push_comma(&mut builder, &mut first);
            builder.push("error_message = ").push_bind(error_message.clone());
        }

        if first {
            return Ok(());
        }

        push_comma(&mut builder, &mut first);
        builder.push("updated_at = ").push_bind(Utc::now());
        builder.push(" WHERE id = ").push_bind(job_id.to_string());

        builder.build().execute(self.pool()).await?;
        Ok(())
    }

    pub async fn update_job_metadata(
        &self,
        job_id: &str,
        duration_sec: f64,
        chunks_total: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET duration_sec = ?, chunks_total = ?, updated_at = ? WHERE id = ?",
        )
        .bind(duration_sec)
        .bind(chunks_total)
        .bind(Utc::now())
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn upsert_chunk(&self, job_id: &str, update: ChunkUpdate) -> Result<()> {
        let transcript_json = match &update.transcript {
            Some(t) => Some(serde_json::to_string(t)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO chunks
            (job_id, idx, start_sec, end_sec, chunk_path, chunk_hash, status, engine,
             attempt_count, transcript_json, confidence, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id, idx) DO UPDATE SET
                start_sec = excluded.start_sec,
                end_sec = excluded.end_sec,
                chunk_path = excluded.chunk_path,
                chunk_hash = excluded.chunk_hash,
                status = excluded.status,
                engine = excluded.engine,
                attempt_count = excluded.attempt_count,
                transcript_json = excluded.transcript_json,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(job_id)
        .bind(update.idx)
        .bind(update.start_sec)
        .bind(update.end_sec)
        .bind(&update.chunk_path)
        .bind(&update.chunk_hash)
        .bind(update.status)
        .bind(&update.engine)
        .bind(update.attempt_count)
        .bind(transcript_json)
        .bind(update.confidence)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn insert_new_chunks(&self, job_id: &str, chunks: &[NewChunk]) -> Result<()> {
        for chunk in chunks {
            self.upsert_chunk(
                job_id,
                ChunkUpdate {
                    idx: chunk.idx,
                    start_sec: chunk.start_sec,
                    end_sec: chunk.end_sec,
                    chunk_path: chunk.chunk_path.clone(),
                    chunk_hash: chunk.chunk_hash.clone(),
                    status: ChunkStatus::Queued,
                    engine: None,
                    attempt_count: 0,
                    transcript: None,
                    confidence: None,
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn list_chunks(&self, job_id: &str) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE job_id = ? ORDER BY idx ASC",
        )
        .bind(job_id)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    pub async fn set_final_transcript(
        &self,
        job_id: &str,
        transcript: &[Utterance],
    ) -> Result<()> {
        let transcript_json = serde_json::to_string(transcript)?;
        sqlx::query(
            "UPDATE jobs SET transcript_json = ?, status = ?, error_message = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(transcript_json)
        .bind(JobStatus::Ready)
        .bind(Utc::now())
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_transcript(&self, job_id: &str) -> Result<Option<Vec<Utterance>>> {
        let job = self.get_job(job_id).await?;
        match job {
            Some(job) => job.transcript(),
            None => Ok(None),
        }
    }

    /// Flip every `"I"` to `"D"` and vice versa, in place. Idempotent to apply twice.
    pub async fn swap_roles(&self, job_id: &str) -> Result<Job> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::store(format!("job not found: {}", job_id)))?;

        let mut transcript = job.transcript()?.unwrap_or_default();
        for utterance in &mut transcript {
            utterance.speaker = match utterance.speaker.as_str() {
                "I" => "D".to_string(),
                "D" => "I".to_string(),
                other => other.to_string(),
            };
        }

        let transcript_json = serde_json::to_string(&transcript)?;
        sqlx::query(
            "UPDATE jobs SET transcript_json = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(transcript_json)
        .bind(JobStatus::Ready)
        .bind(Utc::now())
        .bind(job_id)
        .execute(self.pool())
        .await?;

        self.get_job(job_id)
            .await?
            .ok_or_else(|| Error::store(format!("job not found: {}", job_id)))
    }

    /// Delete on-disk job directories for every job in status `ready`.
    pub async fn delete_ready_job_dirs(&self) -> Result<()> {
        let ready = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE status = ?")
            .bind(JobStatus::Ready)
            .fetch_all(self.pool())
            .await?;

        for job in ready {
            let dir = self.app_data_dir.join("jobs").join(&job.id);
            if dir.exists() {
                debug!("housekeeping: removing ready job dir {}", dir.display());
                tokio::fs::remove_dir_all(&dir).await?;
            }
        }
        Ok(())
    }

    /// Read `checkpoints/result.json` off disk for an already-`ready` job.
    pub async fn read_job_result(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        let path = self
            .app_data_dir
            .join("jobs")
            .join(job_id)
            .join("checkpoints")
            .join("result.json");
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

/// Write `path.tmp` then rename onto `path` (§4.2, §9 "Atomic file writes").
/// Callers must ensure the parent directory exists.
pub async fn atomic_write_json<T: serde::Serialize>(path: &Path, payload: &T) -> Result<()> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    let body = serde_json::to_vec_pretty(payload)?;
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, DatabaseConfig, EnginesConfig, PathsConfig};
    use tempfile::TempDir;

    async fn test_store(root: &Path) -> JobStore {
        let config = AppConfig {
            paths: PathsConfig {
                app_data_dir: root.to_path_buf(),
            },
            engines: EnginesConfig {
                ffmpeg_bin: "ffmpeg".into(),
                ffprobe_bin: "ffprobe".into(),
                openai_api_key: None,
                request_timeout_secs: 600,
                max_retries: 5,
                huggingface_token: None,
            },
            chunking: ChunkingConfig::default(),
            database: DatabaseConfig { max_connections: 5 },
        };
        JobStore::open(&config).await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_job_roundtrips() {
        let temp = TempDir::new().unwrap();
        let store = test_store(temp.path()).await;

        let job = store
            .create_job(None, "/tmp/a.mp4", "a.mp4", "deadbeef", 1, 1)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.chunks_total, 0);

        let fetched = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn latest_incomplete_job_excludes_ready_and_failed() {
        let temp = TempDir::new().unwrap();
        let store = test_store(temp.path()).await;

        let job = store
            .create_job(None, "/tmp/a.mp4", "a.mp4", "h1", 1, 1)
            .await
            .unwrap();

        let found = store.latest_incomplete_job().await.unwrap().unwrap();
        assert_eq!(found.id, job.id);

        store
            .update_job_status(
                &job.id,
                JobStatusUpdate {
                    status: Some(JobStatus::Ready),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(store.latest_incomplete_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn swap_roles_is_involutive() {
        let temp = TempDir::new().unwrap();
        let store = test_store(temp.path()).await;
        let job = store
            .create_job(None, "/tmp/a.mp4", "a.mp4", "h1", 1, 1)
            .await
            .unwrap();

        let transcript = vec![
            Utterance {
                start_sec: 0.0,
                end_sec: 1.0,
                speaker: "I".to_string(),
                text: "hej".to_string(),
                confidence: None,
            },
            Utterance {
                start_sec: 1.0,
                end_sec: 2.0,
                speaker: "D".to_string(),
                text: "hej tilbage".to_string(),
                confidence: None,
            },
        ];
        store.set_final_transcript(&job.id, &transcript).await.unwrap();

        store.swap_roles(&job.id).await.unwrap();
        store.swap_roles(&job.id).await.unwrap();

        let roundtripped = store.get_transcript(&job.id).await.unwrap().unwrap();
        assert_eq!(roundtripped, transcript);
    }

    #[tokio::test]
    async fn list_ready_jobs_clamps_limit() {
        let temp = TempDir::new().unwrap();
        let store = test_store(temp.path()).await;
        let job = store
            .create_job(None, "/tmp/a.mp4", "a.mp4", "h1", 1, 1)
            .await
            .unwrap();
        store.set_final_transcript(&job.id, &[]).await.unwrap();

        let jobs = store.list_ready_jobs(0).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn atomic_write_json_replaces_target() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("result.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1})).await.unwrap();
        atomic_write_json(&path, &serde_json::json!({"a": 2})).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["a"], 2);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
