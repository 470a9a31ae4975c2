//! Global error types and error handling utilities

use serde::{Deserialize, Serialize};

/// Boundary-facing error type: one variant per error kind in the job lifecycle,
/// serializable into an `error` event payload or a process exit diagnostic.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    #[error("Probe failed: {message}")]
    ProbeFailed { message: String },

    #[error("Render failed: {message}")]
    RenderFailed { message: String },

    #[error("{message}")]
    RemoteFailed { message: String },

    #[error("{message}")]
    FallbackUnavailable { message: String },

    #[error("{message}")]
    LowSpeakerConfidence { message: String },

    #[error("Source missing: {message}")]
    SourceMissing { message: String },

    #[error("{message}")]
    EditorParseError { message: String },

    #[error("Store error: {message}")]
    StoreError { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Internal, richer error type used throughout the crate; carries a `#[source]`
/// chain where one is available. Converted into `AppError` only at the CLI/event
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("probe failed for {source_path}: {message}")]
    ProbeFailed { source_path: String, message: String },

    #[error("render failed for chunk {idx}: {message}")]
    RenderFailed { idx: i64, message: String },

    #[error("{message}")]
    RemoteFailed { message: String },

    #[error("{message}")]
    FallbackUnavailable { message: String },

    #[error("{message}")]
    LowSpeakerConfidence { message: String },

    #[error("source missing: {path}")]
    SourceMissing { path: String },

    #[error("{message}")]
    EditorParseError { message: String },

    #[error("store error: {message}")]
    StoreError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("io error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn probe_failed(source_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProbeFailed {
            source_path: source_path.into(),
            message: message.into(),
        }
    }

    pub fn render_failed(idx: i64, message: impl Into<String>) -> Self {
        Self::RenderFailed {
            idx,
            message: message.into(),
        }
    }

    pub fn remote_failed(message: impl Into<String>) -> Self {
        Self::RemoteFailed {
            message: message.into(),
        }
    }

    pub fn fallback_unavailable(message: impl Into<String>) -> Self {
        Self::FallbackUnavailable {
            message: message.into(),
        }
    }

    pub fn low_speaker_confidence(message: impl Into<String>) -> Self {
        Self::LowSpeakerConfidence {
            message: message.into(),
        }
    }

    pub fn source_missing(path: impl Into<String>) -> Self {
        Self::SourceMissing { path: path.into() }
    }

    pub fn editor_parse(message: impl Into<String>) -> Self {
        Self::EditorParseError {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreError {
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::RemoteFailed {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::ProbeFailed { message, .. } => Self::ProbeFailed { message },
            Error::RenderFailed { message, .. } => Self::RenderFailed { message },
            Error::RemoteFailed { message } => Self::RemoteFailed { message },
            Error::FallbackUnavailable { message } => Self::FallbackUnavailable { message },
            Error::LowSpeakerConfidence { message } => Self::LowSpeakerConfidence { message },
            Error::SourceMissing { path } => Self::SourceMissing { message: path },
            Error::EditorParseError { message } => Self::EditorParseError { message },
            Error::StoreError { message, .. } => Self::StoreError { message },
            Error::Config { message } => Self::Config { message },
            Error::Io { message, .. } => Self::Internal { message },
            Error::Internal { message } => Self::Internal { message },
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Result alias at the process/event boundary.
pub type AppResult<T> = std::result::Result<T, AppError>;
