//! Line-JSON progress protocol emitted on stdout (§6.3). Operational
//! diagnostics go to stderr via `tracing` instead.

use crate::storage::models::Utterance;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub status: String,
    pub stage: String,
    pub percent: f64,
    pub eta_seconds: Option<f64>,
    pub chunks_done: i64,
    pub chunks_total: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    pub job_id: String,
    pub status: String,
    pub stage: String,
    pub percent: f64,
    pub eta_seconds: Option<f64>,
    pub chunks_done: i64,
    pub chunks_total: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub job_id: String,
    pub source_path: String,
    pub duration_sec: f64,
    pub transcript: Vec<Utterance>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub job_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "progress")]
    Progress(ProgressEvent),
    #[serde(rename = "paused")]
    Paused(PausedEvent),
    #[serde(rename = "result")]
    Result(ResultEvent),
    #[serde(rename = "error")]
    Error(ErrorEvent),
}

/// Serialize one event as a single compact JSON line on stdout.
pub fn emit(event: &Event) {
    emit_to(&mut std::io::stdout(), event);
}

fn emit_to<W: Write>(writer: &mut W, event: &Event) {
    if let Ok(line) = serde_json::to_vec(event) {
        let _ = writer.write_all(&line);
        let _ = writer.write_all(b"\n");
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_writes_one_compact_json_line() {
        let mut buf = Vec::new();
        emit_to(
            &mut buf,
            &Event::Error(ErrorEvent {
                job_id: Some("abc".to_string()),
                message: "oops".to_string(),
            }),
        );
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        assert!(text.starts_with("{\"type\":\"error\""));
    }

    #[test]
    fn round2_rounds_to_two_decimals() {
        assert_eq!(round2(12.345), 12.35);
        assert_eq!(round2(0.0), 0.0);
    }
}
