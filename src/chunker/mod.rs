//! ChunkPlanner (C1): deterministic windowing over a media file.

mod ffmpeg;

pub use ffmpeg::sha256_file;

use crate::error::Result;
use crate::storage::models::ChunkPlan;
use std::path::Path;

/// Probes and renders chunk plans against one pair of decoder binaries.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl ChunkPlanner {
    pub fn new(ffmpeg_bin: impl Into<String>, ffprobe_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    pub async fn probe_duration(&self, source: &Path) -> Result<f64> {
        ffmpeg::probe_duration_seconds(&self.ffprobe_bin, source).await
    }

    /// Render `[start, start+duration)` to `out_path`; used both for the initial
    /// plan and for lazy re-materialization during resume.
    pub async fn render_one(
        &self,
        source: &Path,
        out_path: &Path,
        start: f64,
        duration: f64,
    ) -> Result<()> {
        ffmpeg::render_chunk(&self.ffmpeg_bin, source, out_path, start, duration).await
    }

    /// Probe the source, then render and hash every overlapping window.
    pub async fn plan_and_render(
        &self,
        source: &Path,
        out_dir: &Path,
        chunk_duration: f64,
        overlap: f64,
    ) -> Result<(f64, Vec<ChunkPlan>)> {
        let duration = self.probe_duration(source).await?;
        let step = (chunk_duration - overlap).max(1.0);

        let mut plans = Vec::new();
        let mut start = 0.0_f64;
        let mut idx = 0_i64;

        while start < duration {
            let end = (start + chunk_duration).min(duration);
            let out_path = out_dir.join(format!("chunk_{:04}.wav", idx));

            self.render_one(source, &out_path, start, end - start).await?;
            let hash = ffmpeg::sha256_file(&out_path).await?;

            plans.push(ChunkPlan {
                idx,
                start_sec: round3(start),
                end_sec: round3(end),
                path: out_path.to_string_lossy().to_string(),
                sha256: hash,
            });

            idx += 1;
            start += step;
        }

        Ok((duration, plans))
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_is_clamped_to_at_least_one_second() {
        let planner = ChunkPlanner::new("ffmpeg", "ffprobe");
        let _ = &planner;
        let step = (1.0_f64 - 5.0).max(1.0);
        assert_eq!(step, 1.0);
    }

    #[test]
    fn round3_matches_python_round() {
        assert_eq!(round3(1.23456), 1.235);
        assert_eq!(round3(0.0), 0.0);
    }
}
