//! RemoteEngine (C3): transcribe one chunk through the remote diarization+ASR
//! API, with format negotiation and jittered exponential backoff.

use crate::engines::types::{
    average_confidence, is_response_format_error, merge_text_with_speakers,
    parse_diarized_segments, parse_verbose_segments,
};
use crate::error::{Error, Result};
use crate::storage::models::Segment;
use async_trait::async_trait;
use rand::Rng;
use std::path::Path;
use std::time::Duration;

pub const DIARIZE_MODEL: &str = "gpt-4o-transcribe-diarize";
pub const TEXT_MODEL: &str = "whisper-1";

const INITIAL_BACKOFF_SECS: f64 = 1.0;
const MAX_BACKOFF_SECS: f64 = 12.0;
const JITTER_MIN: f64 = 0.05;
const JITTER_MAX: f64 = 0.4;

/// Abstraction over the remote diarize+ASR HTTP surface, so the retry/format
/// negotiation state machine is testable without real HTTP (S3, S4, S5).
#[async_trait]
pub trait RemoteTranscriber: Send + Sync {
    async fn diarize(
        &self,
        path: &Path,
        language: &str,
        response_format: &str,
    ) -> std::result::Result<serde_json::Value, String>;

    async fn verbose_transcribe(
        &self,
        path: &Path,
        language: &str,
    ) -> std::result::Result<serde_json::Value, String>;
}

/// Try `diarized_json`, falling back to `json` on a format-rejection error.
/// Returns `Ok(None)` when diarization is abandoned for this attempt (both
/// formats rejected for the same reason) rather than propagating an error.
async fn request_diarized_payload(
    client: &dyn RemoteTranscriber,
    path: &Path,
    language: &str,
) -> std::result::Result<Option<serde_json::Value>, String> {
    match client.diarize(path, language, "diarized_json").await {
        Ok(payload) => Ok(Some(payload)),
        Err(err) if is_response_format_error(&err) => {
            match client.diarize(path, language, "json").await {
                Ok(payload) => Ok(Some(payload)),
                Err(err2) if is_response_format_error(&err2) => Ok(None),
                Err(err2) => Err(err2),
            }
        }
        Err(err) => Err(err),
    }
}

async fn attempt_once(
    client: &dyn RemoteTranscriber,
    path: &Path,
    language: &str,
) -> std::result::Result<(Vec<Segment>, Option<f64>), String> {
    let diarized_payload = request_diarized_payload(client, path, language).await?;
    let diarized_segments = diarized_payload
        .as_ref()
        .map(parse_diarized_segments)
        .unwrap_or_default();

    let verbose_payload = client.verbose_transcribe(path, language).await?;
    let text_segments = parse_verbose_segments(&verbose_payload);

    let avg_confidence = average_confidence(&text_segments);
    let merged = merge_text_with_speakers(text_segments, &diarized_segments);

    Ok((merged, avg_confidence))
}

/// `transcribe_chunk_remote` (§4.3): jittered exponential backoff across
/// `max_retries` attempts; on exhaustion, fails with the exact Danish message
/// format the original worker used (tested by S5).
pub async fn transcribe_chunk_remote(
    client: &dyn RemoteTranscriber,
    path: &Path,
    language: &str,
    max_retries: u32,
) -> Result<(Vec<Segment>, Option<f64>)> {
    let mut backoff = INITIAL_BACKOFF_SECS;
    let mut last_error = String::new();

    for attempt in 1..=max_retries {
        match attempt_once(client, path, language).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                last_error = err;
                if attempt >= max_retries {
                    break;
                }
                let jitter = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
                tokio::time::sleep(Duration::from_secs_f64(backoff + jitter)).await;
                backoff = (backoff * 2.0).min(MAX_BACKOFF_SECS);
            }
        }
    }

    Err(Error::remote_failed(format!(
        "OpenAI transskription fejlede efter {} forsøg: {}",
        max_retries, last_error
    )))
}

/// Real HTTP implementation: multipart file upload against an OpenAI-shaped
/// transcription API.
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteClient {
    pub fn new(api_key: String, request_timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| Error::remote_failed(e.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://api.openai.com/v1/audio".to_string(),
            api_key,
        })
    }

    async fn transcribe(
        &self,
        path: &Path,
        model: &str,
        language: &str,
        response_format: &str,
        diarize: bool,
    ) -> std::result::Result<serde_json::Value, String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "chunk.wav".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| e.to_string())?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model.to_string())
            .text("language", language.to_string())
            .text("response_format", response_format.to_string());

        if diarize {
            form = form.text("chunking_strategy", "auto");
        }

        let endpoint = format!("{}/transcriptions", self.base_url);

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("http {}: {}", status, body));
        }

        response.json::<serde_json::Value>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl RemoteTranscriber for HttpRemoteClient {
    async fn diarize(
        &self,
        path: &Path,
        language: &str,
        response_format: &str,
    ) -> std::result::Result<serde_json::Value, String> {
        self.transcribe(path, DIARIZE_MODEL, language, response_format, true)
            .await
    }

    async fn verbose_transcribe(
        &self,
        path: &Path,
        language: &str,
    ) -> std::result::Result<serde_json::Value, String> {
        self.transcribe(path, TEXT_MODEL, language, "verbose_json", false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeClient {
        diarize_calls: Mutex<Vec<String>>,
        diarize_script: Vec<std::result::Result<serde_json::Value, String>>,
        verbose_script: Vec<std::result::Result<serde_json::Value, String>>,
        diarize_idx: AtomicUsize,
        verbose_idx: AtomicUsize,
    }

    #[async_trait]
    impl RemoteTranscriber for FakeClient {
        async fn diarize(
            &self,
            _path: &Path,
            _language: &str,
            response_format: &str,
        ) -> std::result::Result<serde_json::Value, String> {
            self.diarize_calls.lock().unwrap().push(response_format.to_string());
            let idx = self.diarize_idx.fetch_add(1, Ordering::SeqCst);
            self.diarize_script[idx].clone()
        }

        async fn verbose_transcribe(
            &self,
            _path: &Path,
            _language: &str,
        ) -> std::result::Result<serde_json::Value, String> {
            let idx = self.verbose_idx.fetch_add(1, Ordering::SeqCst);
            self.verbose_script[idx].clone()
        }
    }

    #[tokio::test]
    async fn s3_format_negotiation_falls_back_to_json() {
        let client = FakeClient {
            diarize_calls: Mutex::new(Vec::new()),
            diarize_script: vec![
                Err("unsupported_value for response_format".to_string()),
                Ok(json!({"segments": [{"text": "hej", "start": 0.0, "end": 1.0, "speaker": "speaker_0"}]})),
            ],
            verbose_script: vec![Ok(
                json!({"segments": [{"text": "hej", "start": 0.0, "end": 1.0}]}),
            )],
            diarize_idx: AtomicUsize::new(0),
            verbose_idx: AtomicUsize::new(0),
        };

        let (segments, _) = transcribe_chunk_remote(&client, Path::new("chunk.wav"), "da", 5)
            .await
            .unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, "speaker_0");
        assert_eq!(
            *client.diarize_calls.lock().unwrap(),
            vec!["diarized_json".to_string(), "json".to_string()]
        );
    }

    #[tokio::test]
    async fn s4_retry_until_success() {
        let client = FakeClient {
            diarize_calls: Mutex::new(Vec::new()),
            diarize_script: vec![
                Err("timed out".to_string()),
                Ok(json!({"segments": [{"text": "hej", "start": 0.0, "end": 1.0, "speaker": "speaker_0"}]})),
            ],
            verbose_script: vec![Ok(
                json!({"segments": [{"text": "hej", "start": 0.0, "end": 1.0}]}),
            )],
            diarize_idx: AtomicUsize::new(0),
            verbose_idx: AtomicUsize::new(0),
        };

        let (segments, _) = transcribe_chunk_remote(&client, Path::new("chunk.wav"), "da", 2)
            .await
            .unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[tokio::test]
    async fn s5_retry_exhaustion_has_exact_danish_message() {
        let client = FakeClient {
            diarize_calls: Mutex::new(Vec::new()),
            diarize_script: vec![
                Err("timed out".to_string()),
                Err("timed out".to_string()),
            ],
            verbose_script: vec![],
            diarize_idx: AtomicUsize::new(0),
            verbose_idx: AtomicUsize::new(0),
        };

        let err = transcribe_chunk_remote(&client, Path::new("chunk.wav"), "da", 2)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("efter 2 forsøg"));
        assert!(message.to_lowercase().contains("timed out"));
    }
}
