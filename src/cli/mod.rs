//! Command surface (C9, §6.4): one subcommand per store/driver operation.

use crate::chunker::ChunkPlanner;
use crate::config::AppConfig;
use crate::driver::TranscriptionDriver;
use crate::engines::{FallbackEngine, HttpRemoteClient, LocalDiarizer, RemoteTranscriber};
use crate::error::{Error, Result};
use crate::events::{self, Event, ErrorEvent, ResultEvent};
use crate::storage::{JobStore, Segment};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "transkriptor")]
#[command(version)]
#[command(about = "Resumable, crash-safe interview transcription worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe (or resume transcribing) one source file end to end
    RunJob {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        job_id: Option<String>,
        #[arg(long)]
        resume: bool,
        #[arg(long, default_value_t = 1)]
        interviewers: u32,
        #[arg(long, default_value_t = 1)]
        participants: u32,
    },

    /// Print the most recently updated resumable job, if any
    FindResumable,

    /// Flip every "I"/"D" label in a job's final transcript
    SwapRoles {
        #[arg(long)]
        job_id: String,
    },

    /// Replace a job's final transcript with hand-edited "I: ..."/"D: ..." text
    UpdateTranscript {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        input: PathBuf,
    },

    /// Render a job's final transcript as plain text
    ExportTxt {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        output: PathBuf,
    },

    /// Render a job's final transcript as a .docx
    ExportDocx {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        output: PathBuf,
    },

    /// List jobs in status `ready`
    ListReady {
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Print a ready job's stored result.json
    JobResult {
        #[arg(long)]
        job_id: String,
    },
}

/// A local ASR/diarization backend is out of scope (§1, §4.4); this models
/// the prerequisite as present but the model itself as not bundled.
struct UnbundledDiarizer;

#[async_trait]
impl LocalDiarizer for UnbundledDiarizer {
    async fn transcribe(&self, _path: &std::path::Path, _language: &str) -> Result<Vec<Segment>> {
        Err(Error::fallback_unavailable(
            "lokal ASR-model er ikke bundlet i denne build",
        ))
    }
}

async fn build_driver(config: &AppConfig) -> Result<TranscriptionDriver> {
    let store = JobStore::open(config).await?;
    let chunker = ChunkPlanner::new(config.engines.ffmpeg_bin.clone(), config.engines.ffprobe_bin.clone());

    let remote: Box<dyn RemoteTranscriber> = match &config.engines.openai_api_key {
        Some(api_key) => Box::new(HttpRemoteClient::new(
            api_key.clone(),
            config.engines.request_timeout_secs,
        )?),
        None => {
            return Err(Error::config("OPENAI_API_KEY er ikke sat"));
        }
    };

    let fallback = FallbackEngine::new(config.engines.huggingface_token.clone(), || {
        Arc::new(UnbundledDiarizer) as Arc<dyn LocalDiarizer>
    });

    Ok(TranscriptionDriver::new(store, chunker, remote, fallback, config.clone()))
}

/// Dispatch one subcommand; returns the process exit code.
pub async fn run(cli: Cli, config: AppConfig) -> i32 {
    match cli.command {
        Commands::RunJob {
            source,
            job_id,
            resume,
            interviewers,
            participants,
        } => run_job(config, source, job_id, resume, interviewers, participants).await,
        Commands::FindResumable => find_resumable(config).await,
        Commands::SwapRoles { job_id } => swap_roles(config, job_id).await,
        Commands::UpdateTranscript { job_id, input } => update_transcript(config, job_id, input).await,
        Commands::ExportTxt { job_id, output } => export_txt(config, job_id, output).await,
        Commands::ExportDocx { job_id, output } => export_docx(config, job_id, output).await,
        Commands::ListReady { limit } => list_ready(config, limit).await,
        Commands::JobResult { job_id } => job_result(config, job_id).await,
    }
}

async fn run_job(
    config: AppConfig,
    source: PathBuf,
    job_id: Option<String>,
    resume: bool,
    interviewers: u32,
    participants: u32,
) -> i32 {
    let driver = match build_driver(&config).await {
        Ok(d) => d,
        Err(err) => return emit_fatal(job_id, err),
    };

    let (source_path, job_id, interviewer_count, participant_count) = if resume {
        let Some(id) = job_id else {
            return emit_fatal(None, Error::internal("--resume kræver --job-id"));
        };
        match driver.store().get_job(&id).await {
            Ok(Some(job)) => (
                PathBuf::from(job.source_path),
                job.id,
                job.interviewer_count,
                job.participant_count,
            ),
            Ok(None) => return emit_fatal(Some(id), Error::store("job findes ikke til resume")),
            Err(err) => return emit_fatal(Some(id), err),
        }
    } else {
        if !source.exists() {
            return emit_fatal(job_id, Error::source_missing(source.display().to_string()));
        }
        let id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let interviewer_count = interviewers.max(1) as i64;
        let participant_count = participants.max(1) as i64;
        let hash = match crate::chunker::sha256_file(&source).await {
            Ok(h) => h,
            Err(err) => return emit_fatal(Some(id), err),
        };
        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Err(err) = driver
            .store()
            .create_job(
                Some(id.clone()),
                &source.to_string_lossy(),
                &source_name,
                &hash,
                interviewer_count,
                participant_count,
            )
            .await
        {
            return emit_fatal(Some(id), err);
        }
        (source, id, interviewer_count, participant_count)
    };

    match driver
        .run(&job_id, &source_path, resume, interviewer_count, participant_count)
        .await
    {
        Ok(code) => code,
        Err(err) => emit_fatal(Some(job_id), err),
    }
}

async fn find_resumable(config: AppConfig) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(None, err),
    };
    match store.latest_incomplete_job().await {
        Ok(Some(job)) => {
            println!(
                "{}",
                serde_json::json!({
                    "type": "result",
                    "payload": {
                        "jobId": job.id,
                        "sourcePath": job.source_path,
                        "durationSec": job.duration_sec,
                        "interviewerCount": job.interviewer_count,
                        "participantCount": job.participant_count,
                        "status": job.status.as_str(),
                    },
                })
            );
            0
        }
        Ok(None) => {
            println!("{}", serde_json::json!({"type": "result", "payload": null}));
            0
        }
        Err(err) => emit_fatal(None, err),
    }
}

async fn swap_roles(config: AppConfig, job_id: String) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(Some(job_id), err),
    };
    match store.swap_roles(&job_id).await {
        Ok(job) => {
            events::emit(&Event::Result(ResultEvent {
                job_id: job.id,
                source_path: job.source_path,
                duration_sec: job.duration_sec,
                transcript: job.transcript().unwrap_or_default().unwrap_or_default(),
            }));
            0
        }
        Err(err) => emit_fatal(Some(job_id), err),
    }
}

async fn update_transcript(config: AppConfig, job_id: String, input: PathBuf) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(Some(job_id), err),
    };

    let text = match tokio::fs::read_to_string(&input).await {
        Ok(t) => t,
        Err(err) => return emit_fatal(Some(job_id), Error::from(err)),
    };

    let fallback_transcript = match store.get_transcript(&job_id).await {
        Ok(t) => t.unwrap_or_default(),
        Err(err) => return emit_fatal(Some(job_id), err),
    };

    let updated = match crate::editor::parse_editor_text(&text, &fallback_transcript) {
        Ok(u) => u,
        Err(err) => return emit_fatal(Some(job_id), err),
    };

    if let Err(err) = store.set_final_transcript(&job_id, &updated).await {
        return emit_fatal(Some(job_id), err);
    }

    match store.get_job(&job_id).await {
        Ok(Some(job)) => {
            events::emit(&Event::Result(ResultEvent {
                job_id: job.id,
                source_path: job.source_path,
                duration_sec: job.duration_sec,
                transcript: updated,
            }));
            0
        }
        Ok(None) => emit_fatal(Some(job_id), Error::store("job ikke fundet efter opdatering")),
        Err(err) => emit_fatal(Some(job_id), err),
    }
}

async fn export_txt(config: AppConfig, job_id: String, output: PathBuf) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(Some(job_id), err),
    };
    let job = match store.get_job(&job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return emit_fatal(Some(job_id), Error::store("job findes ikke")),
        Err(err) => return emit_fatal(Some(job_id), err),
    };
    let transcript = job.transcript().unwrap_or_default().unwrap_or_default();
    match crate::export::write_txt(&job, &transcript, &output).await {
        Ok(()) => {
            events::emit(&Event::Result(ResultEvent {
                job_id: job.id,
                source_path: output.to_string_lossy().to_string(),
                duration_sec: job.duration_sec,
                transcript,
            }));
            0
        }
        Err(err) => emit_fatal(Some(job_id), err),
    }
}

async fn export_docx(config: AppConfig, job_id: String, output: PathBuf) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(Some(job_id), err),
    };
    let job = match store.get_job(&job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return emit_fatal(Some(job_id), Error::store("job findes ikke")),
        Err(err) => return emit_fatal(Some(job_id), err),
    };
    let transcript = job.transcript().unwrap_or_default().unwrap_or_default();
    match crate::export::write_docx(&job, &transcript, &output).await {
        Ok(()) => {
            events::emit(&Event::Result(ResultEvent {
                job_id: job.id,
                source_path: output.to_string_lossy().to_string(),
                duration_sec: job.duration_sec,
                transcript,
            }));
            0
        }
        Err(err) => emit_fatal(Some(job_id), err),
    }
}

async fn list_ready(config: AppConfig, limit: Option<u32>) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(None, err),
    };
    match store.list_ready_jobs(limit.unwrap_or(200) as i64).await {
        Ok(jobs) => {
            let payload: Vec<serde_json::Value> = jobs
                .into_iter()
                .map(|job| {
                    serde_json::json!({
                        "jobId": job.id,
                        "sourcePath": job.source_path,
                        "sourceName": job.source_name,
                        "updatedAt": job.updated_at,
                        "durationSec": job.duration_sec,
                        "interviewerCount": job.interviewer_count,
                        "participantCount": job.participant_count,
                    })
                })
                .collect();
            println!("{}", serde_json::json!({"type": "result", "payload": payload}));
            0
        }
        Err(err) => emit_fatal(None, err),
    }
}

async fn job_result(config: AppConfig, job_id: String) -> i32 {
    let store = match JobStore::open(&config).await {
        Ok(s) => s,
        Err(err) => return emit_fatal(Some(job_id), err),
    };
    match store.read_job_result(&job_id).await {
        Ok(result) => {
            println!("{}", serde_json::json!({"type": "result", "payload": result}));
            0
        }
        Err(err) => emit_fatal(Some(job_id), err),
    }
}

fn emit_fatal(job_id: Option<String>, err: Error) -> i32 {
    events::emit(&Event::Error(ErrorEvent {
        job_id,
        message: err.to_string(),
    }));
    1
}
