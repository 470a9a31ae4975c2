//! Database models and entities for the job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A job's lifecycle status (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum JobStatus {
    #[sqlx(rename = "queued")]
    Queued,
    #[sqlx(rename = "preprocessing")]
    Preprocessing,
    #[sqlx(rename = "transcribing_openai")]
    TranscribingOpenai,
    #[sqlx(rename = "transcribing_fallback")]
    TranscribingFallback,
    #[sqlx(rename = "merging")]
    Merging,
    #[sqlx(rename = "ready")]
    Ready,
    #[sqlx(rename = "paused_retry_openai")]
    PausedRetryOpenai,
    #[sqlx(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Preprocessing => "preprocessing",
            JobStatus::TranscribingOpenai => "transcribing_openai",
            JobStatus::TranscribingFallback => "transcribing_fallback",
            JobStatus::Merging => "merging",
            JobStatus::Ready => "ready",
            JobStatus::PausedRetryOpenai => "paused_retry_openai",
            JobStatus::Failed => "failed",
        }
    }

    /// Statuses that mark a job as incomplete / resumable (§4.2 `latest_incomplete_job`).
    pub fn incomplete_statuses() -> &'static [JobStatus] {
        &[
            JobStatus::Queued,
            JobStatus::Preprocessing,
            JobStatus::TranscribingOpenai,
            JobStatus::TranscribingFallback,
            JobStatus::Merging,
            JobStatus::PausedRetryOpenai,
        ]
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A chunk's lifecycle status (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum ChunkStatus {
    #[sqlx(rename = "queued")]
    Queued,
    #[sqlx(rename = "transcribing_openai")]
    TranscribingOpenai,
    #[sqlx(rename = "done")]
    Done,
    #[sqlx(rename = "paused_retry_openai")]
    PausedRetryOpenai,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Queued => "queued",
            ChunkStatus::TranscribingOpenai => "transcribing_openai",
            ChunkStatus::Done => "done",
            ChunkStatus::PausedRetryOpenai => "paused_retry_openai",
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job row (§3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: String,
    pub source_path: String,
    pub source_name: String,
    pub source_hash: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_sec: f64,
    pub chunks_total: i64,
    pub chunks_done: i64,
    pub transcript_json: Option<String>,
    pub error_message: Option<String>,
    pub interviewer_count: i64,
    pub participant_count: i64,
}

impl Job {
    pub fn transcript(&self) -> crate::error::Result<Option<Vec<Utterance>>> {
        match &self.transcript_json {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}

/// A chunk row (§3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub job_id: String,
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub chunk_path: String,
    pub chunk_hash: String,
    pub status: ChunkStatus,
    pub engine: Option<String>,
    pub attempt_count: i64,
    pub transcript_json: Option<String>,
    pub confidence: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    pub fn transcript(&self) -> crate::error::Result<Vec<Utterance>> {
        match &self.transcript_json {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Vec::new()),
        }
    }
}

/// An engine's raw per-chunk output, chunk-local time (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub speaker: String,
    pub text: String,
    pub confidence: Option<f64>,
}

/// A stored, job-global-time utterance (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Utterance {
    #[serde(rename = "startSec")]
    pub start_sec: f64,
    #[serde(rename = "endSec")]
    pub end_sec: f64,
    pub speaker: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A transient, in-memory description of one rendered chunk (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPlan {
    pub idx: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub path: String,
    pub sha256: String,
}

impl ChunkPlan {
    pub fn duration_sec(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}
