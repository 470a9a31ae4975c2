//! External decoder invocation: probing duration and rendering one chunk.
//!
//! Both binaries are opaque child processes with a fixed command surface
//! (§1 Non-goals: the decoder/encoder itself is out of scope).

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

const HASH_BUF_SIZE: usize = 1024 * 1024;

pub async fn probe_duration_seconds(ffprobe_bin: &str, source: &Path) -> Result<f64> {
    let output = Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(source)
        .output()
        .await
        .map_err(|e| Error::probe_failed(source.display().to_string(), e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::probe_failed(
            source.display().to_string(),
            format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let payload: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
        Error::probe_failed(source.display().to_string(), format!("invalid ffprobe json: {}", e))
    })?;

    let duration = payload
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    if duration <= 0.0 {
        return Err(Error::probe_failed(
            source.display().to_string(),
            "probed duration was not positive",
        ));
    }

    Ok(duration)
}

/// Render `[start, start+duration)` from `source` into `out_path` as mono,
/// 16 kHz, signed 16-bit PCM WAV.
pub async fn render_chunk(
    ffmpeg_bin: &str,
    source: &Path,
    out_path: &Path,
    start: f64,
    duration: f64,
) -> Result<()> {
    if let Some(parent) = out_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let output = Command::new(ffmpeg_bin)
        .arg("-y")
        .arg("-i")
        .arg(source)
        .args(["-vn", "-ss", &format!("{:.3}", start), "-t", &format!("{:.3}", duration)])
        .args(["-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
        .arg(out_path)
        .output()
        .await
        .map_err(|e| Error::render_failed(0, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::render_failed(
            0,
            format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(())
}

/// SHA-256 of a file's contents, read in fixed-size buffers.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
