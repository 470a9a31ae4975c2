//! TranscriptionDriver (C5): the central per-job state machine.

mod outcome;

pub use outcome::ChunkOutcome;

use crate::chunker::ChunkPlanner;
use crate::config::AppConfig;
use crate::engines::{FallbackEngine, RemoteTranscriber};
use crate::error::{Error, Result};
use crate::events::{self, Event, ErrorEvent, PausedEvent, ProgressEvent, ResultEvent};
use crate::paths;
use crate::postprocess::merge_and_label;
use crate::storage::{ChunkStatus, ChunkUpdate, JobStatus, JobStatusUpdate, JobStore, NewChunk, Segment, Utterance};
use std::path::Path;
use std::time::Instant;
use tracing::{info, info_span};

pub struct TranscriptionDriver {
    store: JobStore,
    chunker: ChunkPlanner,
    remote: Box<dyn RemoteTranscriber>,
    fallback: FallbackEngine,
    config: AppConfig,
}

const LANGUAGE: &str = "da";

impl TranscriptionDriver {
    pub fn new(
        store: JobStore,
        chunker: ChunkPlanner,
        remote: Box<dyn RemoteTranscriber>,
        fallback: FallbackEngine,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            chunker,
            remote,
            fallback,
            config,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run a job end-to-end (or resume it). Returns the process exit code
    /// from §4.5: `0` success, `1` fatal, `2` paused-resumable.
    pub async fn run(
        &self,
        job_id: &str,
        source_path: &Path,
        resume: bool,
        interviewer_count: i64,
        participant_count: i64,
    ) -> Result<i32> {
        let _span = info_span!("transcribe_job", job_id = %job_id).entered();

        if !source_path.exists() {
            let message = format!("Kildedata findes ikke: {}", source_path.display());
            events::emit(&Event::Error(ErrorEvent {
                job_id: Some(job_id.to_string()),
                message: message.clone(),
            }));
            self.store
                .update_job_status(
                    job_id,
                    JobStatusUpdate {
                        status: Some(JobStatus::Failed),
                        error_message: Some(Some(message)),
                        ..Default::default()
                    },
                )
                .await?;
            return Ok(1);
        }

        if !resume {
            self.store.delete_ready_job_dirs().await?;
        }
        paths::ensure_job_dirs(&self.config, job_id).await?;

        self.store
            .update_job_status(
                job_id,
                JobStatusUpdate {
                    status: Some(JobStatus::Preprocessing),
                    ..Default::default()
                },
            )
            .await?;
        events::emit(&Event::Progress(ProgressEvent {
            job_id: job_id.to_string(),
            status: JobStatus::Preprocessing.as_str().to_string(),
            stage: "preprocess".to_string(),
            percent: 3.0,
            eta_seconds: None,
            chunks_done: 0,
            chunks_total: 0,
            message: "Forbereder lyd og opretter chunks...".to_string(),
        }));

        let (duration, chunks) = self.preprocess_or_resume(job_id, source_path).await?;
        let total_chunks = chunks.len() as i64;
        let mut done_chunks = chunks.iter().filter(|c| c.status == ChunkStatus::Done).count() as i64;

        self.store
            .update_job_status(
                job_id,
                JobStatusUpdate {
                    status: Some(JobStatus::TranscribingOpenai),
                    chunks_done: Some(done_chunks),
                    chunks_total: Some(total_chunks),
                    ..Default::default()
                },
            )
            .await?;

        let start = Instant::now();
        let mut processed_this_run = 0i64;

        for chunk in &chunks {
            if chunk.status == ChunkStatus::Done {
                continue;
            }

            let chunk_path = Path::new(&chunk.chunk_path);
            if !chunk_path.exists() {
                self.chunker
                    .render_one(
                        source_path,
                        chunk_path,
                        chunk.start_sec,
                        (chunk.end_sec - chunk.start_sec).max(0.05),
                    )
                    .await?;
            }
            let chunk_hash = if chunk.chunk_hash.is_empty() {
                crate::chunker::sha256_file(chunk_path).await?
            } else {
                chunk.chunk_hash.clone()
            };

            let attempts = chunk.attempt_count + 1;
            self.store
                .upsert_chunk(
                    job_id,
                    ChunkUpdate {
                        idx: chunk.idx,
                        start_sec: chunk.start_sec,
                        end_sec: chunk.end_sec,
                        chunk_path: chunk.chunk_path.clone(),
                        chunk_hash: chunk_hash.clone(),
                        status: ChunkStatus::TranscribingOpenai,
                        engine: Some("openai".to_string()),
                        attempt_count: attempts,
                        transcript: None,
                        confidence: None,
                    },
                )
                .await?;

            let outcome = self.attempt_chunk(chunk_path, job_id, chunk.idx, total_chunks, done_chunks).await;

            match outcome {
                ChunkOutcome::Done {
                    engine,
                    segments,
                    avg_confidence,
                } => {
                    let transcript: Vec<Utterance> = segments
                        .into_iter()
                        .map(|s| Utterance {
                            start_sec: round3(chunk.start_sec + s.start_sec),
                            end_sec: round3(chunk.start_sec + s.end_sec),
                            speaker: s.speaker,
                            text: s.text,
                            confidence: s.confidence,
                        })
                        .collect();

                    self.store
                        .upsert_chunk(
                            job_id,
                            ChunkUpdate {
                                idx: chunk.idx,
                                start_sec: chunk.start_sec,
                                end_sec: chunk.end_sec,
                                chunk_path: chunk.chunk_path.clone(),
                                chunk_hash: chunk_hash.clone(),
                                status: ChunkStatus::Done,
                                engine: Some(engine.to_string()),
                                attempt_count: attempts,
                                transcript: Some(transcript.clone()),
                                confidence: avg_confidence,
                            },
                        )
                        .await?;

                    let checkpoint_path = paths::checkpoints_dir(&self.config, job_id)
                        .join(format!("chunk_{:04}.json", chunk.idx));
                    crate::storage::atomic_write_json(
                        &checkpoint_path,
                        &serde_json::json!({
                            "jobId": job_id,
                            "chunkIndex": chunk.idx,
                            "engine": engine,
                            "segments": transcript,
                        }),
                    )
                    .await?;

                    done_chunks += 1;
                    processed_this_run += 1;

                    self.store
                        .update_job_status(
                            job_id,
                            JobStatusUpdate {
                                status: Some(JobStatus::TranscribingOpenai),
                                chunks_done: Some(done_chunks),
                                chunks_total: Some(total_chunks),
                                ..Default::default()
                            },
                        )
                        .await?;

                    let elapsed = start.elapsed().as_secs_f64();
                    let avg_runtime = elapsed / processed_this_run.max(1) as f64;
                    let eta = avg_runtime * (total_chunks - done_chunks).max(0) as f64;

                    events::emit(&Event::Progress(ProgressEvent {
                        job_id: job_id.to_string(),
                        status: JobStatus::TranscribingOpenai.as_str().to_string(),
                        stage: "transcribe".to_string(),
                        percent: events::round2((10.0 + (done_chunks as f64 / total_chunks.max(1) as f64) * 80.0).clamp(0.0, 100.0)),
                        eta_seconds: Some(eta),
                        chunks_done: done_chunks,
                        chunks_total: total_chunks,
                        message: format!("Chunk {}/{} færdig via {}", chunk.idx + 1, total_chunks, engine),
                    }));
                }
                ChunkOutcome::Paused { reason } => {
                    self.store
                        .upsert_chunk(
                            job_id,
                            ChunkUpdate {
                                idx: chunk.idx,
                                start_sec: chunk.start_sec,
                                end_sec: chunk.end_sec,
                                chunk_path: chunk.chunk_path.clone(),
                                chunk_hash,
                                status: ChunkStatus::PausedRetryOpenai,
                                engine: Some("fallback".to_string()),
                                attempt_count: attempts,
                                transcript: None,
                                confidence: None,
                            },
                        )
                        .await?;

                    self.store
                        .update_job_status(
                            job_id,
                            JobStatusUpdate {
                                status: Some(JobStatus::PausedRetryOpenai),
                                chunks_done: Some(done_chunks),
                                chunks_total: Some(total_chunks),
                                error_message: Some(Some(reason.clone())),
                            },
                        )
                        .await?;

                    events::emit(&Event::Paused(PausedEvent {
                        job_id: job_id.to_string(),
                        status: JobStatus::PausedRetryOpenai.as_str().to_string(),
                        stage: "transcribe".to_string(),
                        percent: events::round2((10.0 + (done_chunks as f64 / total_chunks.max(1) as f64) * 80.0).clamp(0.0, 100.0)),
                        eta_seconds: None,
                        chunks_done: done_chunks,
                        chunks_total: total_chunks,
                        message: "Lokal fallback kunne ikke skelne talere sikkert nok. Genoptag når OpenAI API er tilgængelig igen.".to_string(),
                    }));

                    return Ok(2);
                }
                ChunkOutcome::Failed {
                    remote_error,
                    fallback_error,
                } => {
                    let message = format!(
                        "Chunk {} fejlede i både OpenAI og fallback. OpenAI: {}; Fallback: {}",
                        chunk.idx + 1,
                        remote_error,
                        fallback_error.unwrap_or_default()
                    );
                    self.store
                        .update_job_status(
                            job_id,
                            JobStatusUpdate {
                                status: Some(JobStatus::Failed),
                                chunks_done: Some(done_chunks),
                                chunks_total: Some(total_chunks),
                                error_message: Some(Some(message.clone())),
                            },
                        )
                        .await?;

                    events::emit(&Event::Error(ErrorEvent {
                        job_id: Some(job_id.to_string()),
                        message,
                    }));
                    return Ok(1);
                }
            }
        }

        self.store
            .update_job_status(
                job_id,
                JobStatusUpdate {
                    status: Some(JobStatus::Merging),
                    chunks_done: Some(done_chunks),
                    chunks_total: Some(total_chunks),
                    ..Default::default()
                },
            )
            .await?;
        events::emit(&Event::Progress(ProgressEvent {
            job_id: job_id.to_string(),
            status: JobStatus::Merging.as_str().to_string(),
            stage: "merge".to_string(),
            percent: 94.0,
            eta_seconds: Some(5.0),
            chunks_done: done_chunks,
            chunks_total: total_chunks,
            message: "Sammenfletter segmenter og fjerner overlap...".to_string(),
        }));

        let stored_chunks = self.store.list_chunks(job_id).await?;
        let mut collected: Vec<Segment> = Vec::new();
        for chunk in stored_chunks {
            for utterance in chunk.transcript()? {
                if utterance.text.trim().is_empty() {
                    continue;
                }
                collected.push(Segment {
                    start_sec: utterance.start_sec,
                    end_sec: utterance.end_sec.max(utterance.start_sec),
                    speaker: utterance.speaker,
                    text: utterance.text,
                    confidence: utterance.confidence,
                });
            }
        }

        let labeled = merge_and_label(collected, interviewer_count, participant_count);
        self.store.set_final_transcript(job_id, &labeled).await?;
        self.store
            .update_job_status(
                job_id,
                JobStatusUpdate {
                    status: Some(JobStatus::Ready),
                    chunks_done: Some(total_chunks),
                    chunks_total: Some(total_chunks),
                    ..Default::default()
                },
            )
            .await?;

        let result_path = paths::checkpoints_dir(&self.config, job_id).join("result.json");
        crate::storage::atomic_write_json(
            &result_path,
            &serde_json::json!({
                "jobId": job_id,
                "sourcePath": source_path.to_string_lossy(),
                "durationSec": duration,
                "transcript": labeled,
            }),
        )
        .await?;

        info!("job {} ready", job_id);
        events::emit(&Event::Result(ResultEvent {
            job_id: job_id.to_string(),
            source_path: source_path.to_string_lossy().to_string(),
            duration_sec: duration,
            transcript: labeled,
        }));

        Ok(0)
    }

    async fn preprocess_or_resume(
        &self,
        job_id: &str,
        source_path: &Path,
    ) -> Result<(f64, Vec<crate::storage::Chunk>)> {
        let existing = self.store.list_chunks(job_id).await?;
        if !existing.is_empty() {
            let job = self
                .store
                .get_job(job_id)
                .await?
                .ok_or_else(|| Error::store(format!("job not found: {}", job_id)))?;
            let duration = if job.duration_sec <= 0.0 {
                let probed = self.chunker.probe_duration(source_path).await?;
                self.store
                    .update_job_metadata(job_id, probed, existing.len() as i64)
                    .await?;
                probed
            } else {
                job.duration_sec
            };
            return Ok((duration, existing));
        }

        let chunks_dir = paths::chunks_dir(&self.config, job_id);
        let (duration, plans) = self
            .chunker
            .plan_and_render(
                source_path,
                &chunks_dir,
                self.config.chunking.chunk_duration_secs,
                self.config.chunking.overlap_secs,
            )
            .await?;

        self.store
            .update_job_metadata(job_id, duration, plans.len() as i64)
            .await?;

        let new_chunks: Vec<NewChunk> = plans
            .iter()
            .map(|p| NewChunk {
                idx: p.idx,
                start_sec: p.start_sec,
                end_sec: p.end_sec,
                chunk_path: p.path.clone(),
                chunk_hash: p.sha256.clone(),
            })
            .collect();
        self.store.insert_new_chunks(job_id, &new_chunks).await?;

        let chunks = self.store.list_chunks(job_id).await?;
        Ok((duration, chunks))
    }

    async fn attempt_chunk(
        &self,
        chunk_path: &Path,
        job_id: &str,
        chunk_idx: i64,
        total_chunks: i64,
        done_chunks: i64,
    ) -> ChunkOutcome {
        match crate::engines::transcribe_chunk_remote(
            self.remote.as_ref(),
            chunk_path,
            LANGUAGE,
            self.config.engines.max_retries,
        )
        .await
        {
            Ok((segments, avg_confidence)) => ChunkOutcome::Done {
                engine: "openai",
                segments,
                avg_confidence,
            },
            Err(remote_err) => {
                events::emit(&Event::Progress(ProgressEvent {
                    job_id: job_id.to_string(),
                    status: JobStatus::TranscribingFallback.as_str().to_string(),
                    stage: "transcribe".to_string(),
                    percent: events::round2((10.0 + (done_chunks as f64 / total_chunks.max(1) as f64) * 70.0).clamp(0.0, 100.0)),
                    eta_seconds: None,
                    chunks_done: done_chunks,
                    chunks_total: total_chunks,
                    message: format!("OpenAI-fejl på chunk {}, prøver lokal fallback...", chunk_idx + 1),
                }));

                match self.fallback.transcribe_chunk_fallback(chunk_path, LANGUAGE).await {
                    Ok((segments, metrics)) => ChunkOutcome::Done {
                        engine: "fallback",
                        segments,
                        avg_confidence: Some(metrics.coverage),
                    },
                    Err(Error::LowSpeakerConfidence { message }) => ChunkOutcome::Paused { reason: message },
                    Err(fallback_err) => ChunkOutcome::Failed {
                        remote_error: remote_err.to_string(),
                        fallback_error: Some(fallback_err.to_string()),
                    },
                }
            }
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
