//! Duck-typed engine payload coercion (§6.2, §9 "duck-typed payloads").
//!
//! Engine responses arrive as heterogenous, optional-field JSON. Rather than a
//! brittle one-shot `serde` struct, every field is pulled defensively out of a
//! `serde_json::Value` with the same fallbacks the original engine used.

use crate::storage::models::Segment;
use serde_json::Value;

fn parse_speaker(entry: &Value) -> String {
    for key in ["speaker", "speaker_id", "speaker_label"] {
        if let Some(s) = entry.get(key).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                return s.to_string();
            }
        }
    }
    "speaker_0".to_string()
}

fn parse_f64_field(entry: &Value, keys: &[&str], default: f64) -> f64 {
    for key in keys {
        if let Some(v) = entry.get(*key) {
            if let Some(n) = v.as_f64() {
                return n;
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.parse::<f64>() {
                    return n;
                }
            }
        }
    }
    default
}

fn word_confidences(entry: &Value) -> Vec<f64> {
    entry
        .get("words")
        .and_then(|w| w.as_array())
        .map(|words| {
            words
                .iter()
                .filter_map(|w| w.get("confidence").and_then(|c| c.as_f64()))
                .collect()
        })
        .unwrap_or_default()
}

fn diarize_confidence(entry: &Value) -> Option<f64> {
    if let Some(c) = entry.get("confidence").and_then(|v| v.as_f64()) {
        return Some(c);
    }
    if let Some(p) = entry.get("probability").and_then(|v| v.as_f64()) {
        return Some(p);
    }
    let words = word_confidences(entry);
    if words.is_empty() {
        None
    } else {
        Some(words.iter().sum::<f64>() / words.len() as f64)
    }
}

fn verbose_confidence(entry: &Value) -> Option<f64> {
    if let Some(c) = entry.get("confidence").and_then(|v| v.as_f64()) {
        return Some(c);
    }
    entry
        .get("avg_logprob")
        .and_then(|v| v.as_f64())
        .map(|logprob| logprob.exp().clamp(0.0, 1.0))
}

/// Parse a diarization payload: `segments[]`/`utterances[]`, or a bare `text`
/// string yielding a single `[0,0)` segment.
pub fn parse_diarized_segments(payload: &Value) -> Vec<Segment> {
    let entries: Vec<&Value> = payload
        .get("segments")
        .or_else(|| payload.get("utterances"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().collect())
        .unwrap_or_default();

    if entries.is_empty() {
        if let Some(text) = payload.get("text").and_then(|v| v.as_str()) {
            return vec![Segment {
                start_sec: 0.0,
                end_sec: 0.0,
                speaker: parse_speaker(payload),
                text: text.to_string(),
                confidence: diarize_confidence(payload),
            }];
        }
        return Vec::new();
    }

    entries
        .into_iter()
        .filter_map(|entry| {
            let text = entry.get("text").and_then(|v| v.as_str()).unwrap_or("").trim();
            if text.is_empty() {
                return None;
            }
            let start = parse_f64_field(entry, &["start", "start_sec"], 0.0).max(0.0);
            let end = parse_f64_field(entry, &["end", "end_sec"], start).max(start);
            Some(Segment {
                start_sec: start,
                end_sec: end,
                speaker: parse_speaker(entry),
                text: text.to_string(),
                confidence: diarize_confidence(entry),
            })
        })
        .collect()
}

/// Parse a `verbose_json` ASR payload: `segments[]`, always `speaker = "unknown"`.
pub fn parse_verbose_segments(payload: &Value) -> Vec<Segment> {
    payload
        .get("segments")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let text = entry.get("text").and_then(|v| v.as_str()).unwrap_or("").trim();
                    if text.is_empty() {
                        return None;
                    }
                    let start = parse_f64_field(entry, &["start"], 0.0).max(0.0);
                    let end = parse_f64_field(entry, &["end"], start).max(start);
                    Some(Segment {
                        start_sec: start,
                        end_sec: end,
                        speaker: "unknown".to_string(),
                        text: text.to_string(),
                        confidence: verbose_confidence(entry),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

fn assign_speaker(text_seg: &Segment, diarized: &[Segment]) -> String {
    if diarized.is_empty() {
        return "speaker_0".to_string();
    }

    let mut best: Option<(&Segment, f64)> = None;
    for seg in diarized {
        let ov = overlap(text_seg.start_sec, text_seg.end_sec, seg.start_sec, seg.end_sec);
        if best.is_none() || ov > best.unwrap().1 {
            best = Some((seg, ov));
        }
    }
    if let Some((seg, ov)) = best {
        if ov > 0.0 {
            return seg.speaker.clone();
        }
    }

    let text_mid = (text_seg.start_sec + text_seg.end_sec) / 2.0;
    diarized
        .iter()
        .min_by(|a, b| {
            let da = ((a.start_sec + a.end_sec) / 2.0 - text_mid).abs();
            let db = ((b.start_sec + b.end_sec) / 2.0 - text_mid).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|seg| seg.speaker.clone())
        .unwrap_or_else(|| "speaker_0".to_string())
}

/// Merge word-timed text segments with diarized speaker ids by overlap
/// (§4.3 step 3).
pub fn merge_text_with_speakers(text_segments: Vec<Segment>, diarized: &[Segment]) -> Vec<Segment> {
    if text_segments.is_empty() && !diarized.is_empty() {
        return diarized.to_vec();
    }

    text_segments
        .into_iter()
        .map(|mut seg| {
            seg.speaker = assign_speaker(&seg, diarized);
            seg
        })
        .collect()
}

pub fn average_confidence(segments: &[Segment]) -> Option<f64> {
    let values: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// `response_format`/`unsupported_value` marker check (§4.3 step 1).
pub fn is_response_format_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("response_format") || lower.contains("unsupported_value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_text_payload_yields_single_zero_length_segment() {
        let payload = json!({"text": "hej verden"});
        let segments = parse_diarized_segments(&payload);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_sec, 0.0);
        assert_eq!(segments[0].end_sec, 0.0);
        assert_eq!(segments[0].speaker, "speaker_0");
    }

    #[test]
    fn verbose_segment_falls_back_to_exp_logprob() {
        let payload = json!({"segments": [{"text": "hej", "start": 0.0, "end": 1.0, "avg_logprob": -0.1}]});
        let segments = parse_verbose_segments(&payload);
        assert_eq!(segments.len(), 1);
        let conf = segments[0].confidence.unwrap();
        assert!((conf - (-0.1_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn assign_speaker_prefers_largest_overlap() {
        let diarized = vec![
            Segment {
                start_sec: 0.0,
                end_sec: 1.0,
                speaker: "speaker_0".into(),
                text: String::new(),
                confidence: None,
            },
            Segment {
                start_sec: 1.0,
                end_sec: 5.0,
                speaker: "speaker_1".into(),
                text: String::new(),
                confidence: None,
            },
        ];
        let text_seg = Segment {
            start_sec: 0.8,
            end_sec: 3.0,
            speaker: "unknown".into(),
            text: "hej".into(),
            confidence: None,
        };
        assert_eq!(assign_speaker(&text_seg, &diarized), "speaker_1");
    }

    #[test]
    fn response_format_error_detection_is_case_insensitive() {
        assert!(is_response_format_error("Unsupported_Value: response_format"));
        assert!(is_response_format_error("param response_format invalid"));
        assert!(!is_response_format_error("connection timed out"));
    }
}
