//! Application configuration management

use crate::error::{AppResult, Error};
use std::path::PathBuf;

/// Root configuration, assembled entirely from environment variables (there is
/// no config file in scope for this worker — see SPEC_FULL.md §4.8).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub engines: EnginesConfig,
    pub chunking: ChunkingConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub app_data_dir: PathBuf,
}

#[derive(Clone)]
pub struct EnginesConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub openai_api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub huggingface_token: Option<String>,
}

impl std::fmt::Debug for EnginesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnginesConfig")
            .field("ffmpeg_bin", &self.ffmpeg_bin)
            .field("ffprobe_bin", &self.ffprobe_bin)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("huggingface_token", &self.huggingface_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_duration_secs: f64,
    pub overlap_secs: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

const APP_NAME: &str = "Transkriptor";

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 240.0,
            overlap_secs: 1.5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

impl AppConfig {
    /// Load configuration from the environment. Never panics on a missing
    /// optional variable; only `validate()` rejects out-of-range values.
    pub fn load() -> AppResult<Self> {
        let app_data_dir = std::env::var("APP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_app_data_dir());

        let ffmpeg_bin = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string());
        let ffprobe_bin = std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string());
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty());
        let huggingface_token = std::env::var("HUGGINGFACE_TOKEN")
            .ok()
            .filter(|s| !s.is_empty());

        let request_timeout_secs = std::env::var("OPENAI_REQUEST_TIMEOUT_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(600);

        let config = Self {
            paths: PathsConfig { app_data_dir },
            engines: EnginesConfig {
                ffmpeg_bin,
                ffprobe_bin,
                openai_api_key,
                request_timeout_secs,
                max_retries: 5,
                huggingface_token,
            },
            chunking: ChunkingConfig::default(),
            database: DatabaseConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.chunking.chunk_duration_secs <= 0.0 {
            return Err(Error::config("chunk_duration_secs must be greater than 0").into());
        }
        if self.chunking.overlap_secs < 0.0 {
            return Err(Error::config("overlap_secs must not be negative").into());
        }
        if self.engines.request_timeout_secs == 0 {
            return Err(Error::config("request_timeout_secs must be greater than 0").into());
        }
        if self.engines.max_retries == 0 {
            return Err(Error::config("max_retries must be greater than 0").into());
        }
        if self.database.max_connections == 0 {
            return Err(Error::config("max_connections must be greater than 0").into());
        }
        Ok(())
    }
}

fn default_app_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join("Library")
        .join("Application Support")
        .join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chunking_matches_contract() {
        let chunking = ChunkingConfig::default();
        assert_eq!(chunking.chunk_duration_secs, 240.0);
        assert_eq!(chunking.overlap_secs, 1.5);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = AppConfig {
            paths: PathsConfig {
                app_data_dir: PathBuf::from("/tmp/transkriptor-test"),
            },
            engines: EnginesConfig {
                ffmpeg_bin: "ffmpeg".into(),
                ffprobe_bin: "ffprobe".into(),
                openai_api_key: None,
                request_timeout_secs: 0,
                max_retries: 5,
                huggingface_token: None,
            },
            chunking: ChunkingConfig::default(),
            database: DatabaseConfig::default(),
        };
        assert!(config.validate().is_err());
        config.engines.request_timeout_secs = 600;
        assert!(config.validate().is_ok());
    }
}
