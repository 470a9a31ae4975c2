//! On-disk layout rooted at `AppConfig.paths.app_data_dir` (§6.1).

use crate::config::AppConfig;
use std::path::PathBuf;

pub fn db_path(config: &AppConfig) -> PathBuf {
    config.paths.app_data_dir.join("jobs.db")
}

pub fn jobs_dir(config: &AppConfig) -> PathBuf {
    config.paths.app_data_dir.join("jobs")
}

pub fn job_dir(config: &AppConfig, job_id: &str) -> PathBuf {
    jobs_dir(config).join(job_id)
}

pub fn chunks_dir(config: &AppConfig, job_id: &str) -> PathBuf {
    job_dir(config, job_id).join("chunks")
}

pub fn checkpoints_dir(config: &AppConfig, job_id: &str) -> PathBuf {
    job_dir(config, job_id).join("checkpoints")
}

/// Ensure the app data directory and every per-job subdirectory this job needs
/// exist before any write is attempted.
pub async fn ensure_job_dirs(config: &AppConfig, job_id: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(chunks_dir(config, job_id)).await?;
    tokio::fs::create_dir_all(checkpoints_dir(config, job_id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, DatabaseConfig, EnginesConfig, PathsConfig};

    fn test_config(root: &std::path::Path) -> AppConfig {
        AppConfig {
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
            database: DatabaseConfig::default(),
        }
    }

    #[test]
    fn layout_matches_contract() {
        let config = test_config(std::path::Path::new("/tmp/transkriptor-root"));
        assert_eq!(
            db_path(&config),
            std::path::PathBuf::from("/tmp/transkriptor-root/jobs.db")
        );
        assert_eq!(
            chunks_dir(&config, "abc"),
            std::path::PathBuf::from("/tmp/transkriptor-root/jobs/abc/chunks")
        );
        assert_eq!(
            checkpoints_dir(&config, "abc"),
            std::path::PathBuf::from("/tmp/transkriptor-root/jobs/abc/checkpoints")
        );
    }
}
