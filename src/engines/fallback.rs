//! FallbackEngine (C4): local ASR+diarization, used only when the remote
//! engine fails for a chunk.
//!
//! The real local-model libraries are out of scope; `LocalDiarizer` is the
//! trait seam a real backend would be wired into. This engine instead models
//! presence/absence of the prerequisite environment.

use crate::error::{Error, Result};
use crate::storage::models::Segment;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

const COVERAGE_THRESHOLD: f64 = 0.85;
const MIN_SPEAKER_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackMetrics {
    pub coverage: f64,
    pub speaker_count: usize,
    pub passed: bool,
}

/// A pluggable local diarization+ASR backend.
#[async_trait]
pub trait LocalDiarizer: Send + Sync {
    async fn transcribe(&self, path: &Path, language: &str) -> Result<Vec<Segment>>;
}

struct Handle {
    diarizer: Arc<dyn LocalDiarizer>,
}

/// Lazily-initialized local engine. No module-level globals: the handle lives
/// behind an explicit `OnceCell` on this struct, populated by
/// `ensure_initialized` rather than at first use inside a free function.
pub struct FallbackEngine {
    huggingface_token: Option<String>,
    diarizer_factory: Box<dyn Fn() -> Arc<dyn LocalDiarizer> + Send + Sync>,
    handle: OnceCell<Option<Handle>>,
}

impl FallbackEngine {
    pub fn new(
        huggingface_token: Option<String>,
        diarizer_factory: impl Fn() -> Arc<dyn LocalDiarizer> + Send + Sync + 'static,
    ) -> Self {
        Self {
            huggingface_token,
            diarizer_factory: Box::new(diarizer_factory),
            handle: OnceCell::new(),
        }
    }

    async fn ensure_initialized(&self) -> Result<&Handle> {
        let handle = self
            .handle
            .get_or_init(|| async {
                if self.huggingface_token.as_deref().unwrap_or("").is_empty() {
                    None
                } else {
                    Some(Handle {
                        diarizer: (self.diarizer_factory)(),
                    })
                }
            })
            .await;

        handle.as_ref().ok_or_else(|| {
            Error::fallback_unavailable(
                "lokal diarisering er ikke tilgængelig: HUGGINGFACE_TOKEN mangler",
            )
        })
    }

    /// `transcribe_chunk_fallback` (§4.4).
    pub async fn transcribe_chunk_fallback(
        &self,
        path: &Path,
        language: &str,
    ) -> Result<(Vec<Segment>, FallbackMetrics)> {
        let handle = self.ensure_initialized().await?;

        let segments: Vec<Segment> = handle
            .diarizer
            .transcribe(path, language)
            .await?
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect();

        let metrics = compute_metrics(&segments);

        if !metrics.passed {
            return Err(Error::low_speaker_confidence(format!(
                "lav talerkonfidens: coverage={:.2}, speaker_count={}",
                metrics.coverage, metrics.speaker_count
            )));
        }

        Ok((segments, metrics))
    }
}

fn is_unknown_speaker(speaker: &str) -> bool {
    matches!(speaker, "" | "unknown" | "None")
}

fn compute_metrics(segments: &[Segment]) -> FallbackMetrics {
    if segments.is_empty() {
        return FallbackMetrics {
            coverage: 0.0,
            speaker_count: 0,
            passed: false,
        };
    }

    let known: Vec<&str> = segments
        .iter()
        .map(|s| s.speaker.as_str())
        .filter(|s| !is_unknown_speaker(s))
        .collect();

    let coverage = known.len() as f64 / segments.len() as f64;

    let mut distinct: Vec<&str> = known.clone();
    distinct.sort_unstable();
    distinct.dedup();
    let speaker_count = distinct.len();

    let passed = coverage >= COVERAGE_THRESHOLD && speaker_count >= MIN_SPEAKER_COUNT;

    FallbackMetrics {
        coverage,
        speaker_count,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(speaker: &str, text: &str) -> Segment {
        Segment {
            start_sec: 0.0,
            end_sec: 1.0,
            speaker: speaker.to_string(),
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn metrics_pass_with_two_speakers_and_high_coverage() {
        let segments = vec![
            seg("speaker_0", "hej"),
            seg("speaker_1", "goddag"),
            seg("speaker_0", "farvel"),
        ];
        let metrics = compute_metrics(&segments);
        assert_eq!(metrics.speaker_count, 2);
        assert!((metrics.coverage - 1.0).abs() < 1e-9);
        assert!(metrics.passed);
    }

    #[test]
    fn metrics_fail_with_single_speaker() {
        let segments = vec![seg("speaker_0", "hej"), seg("speaker_0", "goddag")];
        let metrics = compute_metrics(&segments);
        assert_eq!(metrics.speaker_count, 1);
        assert!(!metrics.passed);
    }

    #[test]
    fn unknown_speakers_do_not_count_toward_coverage() {
        let segments = vec![
            seg("speaker_0", "hej"),
            seg("unknown", "mumble"),
            seg("speaker_1", "goddag"),
        ];
        let metrics = compute_metrics(&segments);
        assert!((metrics.coverage - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(metrics.speaker_count, 2);
        assert!(!metrics.passed);
    }

    struct FakeDiarizer {
        segments: Vec<Segment>,
    }

    #[async_trait]
    impl LocalDiarizer for FakeDiarizer {
        async fn transcribe(&self, _path: &Path, _language: &str) -> Result<Vec<Segment>> {
            Ok(self.segments.clone())
        }
    }

    #[tokio::test]
    async fn missing_token_is_fallback_unavailable() {
        let engine = FallbackEngine::new(None, || {
            Arc::new(FakeDiarizer { segments: vec![] }) as Arc<dyn LocalDiarizer>
        });
        let err = engine
            .transcribe_chunk_fallback(Path::new("chunk.wav"), "da")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FallbackUnavailable { .. }));
    }

    #[tokio::test]
    async fn low_speaker_confidence_when_gate_fails() {
        let engine = FallbackEngine::new(Some("token".to_string()), || {
            Arc::new(FakeDiarizer {
                segments: vec![seg("speaker_0", "hej"), seg("speaker_0", "goddag")],
            }) as Arc<dyn LocalDiarizer>
        });
        let err = engine
            .transcribe_chunk_fallback(Path::new("chunk.wav"), "da")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LowSpeakerConfidence { .. }));
    }

    #[tokio::test]
    async fn passes_and_discards_empty_text_segments() {
        let engine = FallbackEngine::new(Some("token".to_string()), || {
            Arc::new(FakeDiarizer {
                segments: vec![
                    seg("speaker_0", "hej"),
                    seg("speaker_1", "goddag"),
                    seg("speaker_0", "   "),
                ],
            }) as Arc<dyn LocalDiarizer>
        });
        let (segments, metrics) = engine
            .transcribe_chunk_fallback(Path::new("chunk.wav"), "da")
            .await
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert!(metrics.passed);
    }
}
