//! EditorParser (C7): turn user-edited `"I: ..."`/`"D: ..."` lines back into
//! utterances, stealing confidence values from the fallback transcript.

use crate::error::{Error, Result};
use crate::storage::models::Utterance;
use regex::Regex;
use std::sync::OnceLock;

const SEGMENT_START_STEP: f64 = 3.0;
const SEGMENT_DURATION: f64 = 1.0;

fn speaker_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([IiDd])\s*:\s*(.*)$").unwrap())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// `parse_editor_text` (§4.7).
pub fn parse_editor_text(text: &str, fallback_transcript: &[Utterance]) -> Result<Vec<Utterance>> {
    let mut utterances: Vec<(char, String)> = Vec::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.replace('\r', "");
        let stripped = line.trim();
        if stripped.is_empty() {
            return Err(Error::editor_parse(format!(
                "Linje {} er tom. Tomme linjer er ikke tilladt; brug formatet 'I: ...' eller 'D: ...' på hver linje.",
                line_number
            )));
        }

        let Some(captures) = speaker_prefix().captures(&line) else {
            return Err(Error::editor_parse(format!(
                "Linje {} mangler taler-prefix. Hver ikke-tom linje skal starte med 'I:' eller 'D:'.",
                line_number
            )));
        };

        let speaker = captures[1].chars().next().unwrap().to_ascii_uppercase();
        let body = captures[2].trim().to_string();
        if body.is_empty() {
            return Err(Error::editor_parse(format!(
                "Linje {} er tom efter taler-prefix. Brug formatet 'I: ...' eller 'D: ...'.",
                line_number
            )));
        }

        utterances.push((speaker, body));
    }

    if utterances.is_empty() {
        return Err(Error::editor_parse(
            "Ingen gyldige ytringer fundet. Brug formatet 'I: ...' eller 'D: ...'.",
        ));
    }

    Ok(utterances
        .into_iter()
        .enumerate()
        .map(|(idx, (speaker, text))| {
            let start_sec = round3(idx as f64 * SEGMENT_START_STEP);
            let end_sec = round3(start_sec + SEGMENT_DURATION);
            let confidence = fallback_transcript.get(idx).and_then(|u| u.confidence);
            Utterance {
                start_sec,
                end_sec,
                speaker: speaker.to_string(),
                text,
                confidence,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_fails_with_danish_message() {
        let err = parse_editor_text("I: hej\n\nD: svar", &[]).unwrap_err();
        assert!(err.to_string().contains("Linje 2 er tom"));
    }

    #[test]
    fn missing_prefix_fails() {
        let err = parse_editor_text("hej uden prefix", &[]).unwrap_err();
        assert!(err.to_string().contains("mangler taler-prefix"));
    }

    #[test]
    fn empty_body_after_prefix_fails() {
        let err = parse_editor_text("I:   ", &[]).unwrap_err();
        assert!(err.to_string().contains("er tom efter taler-prefix"));
    }

    #[test]
    fn no_lines_at_all_fails() {
        let err = parse_editor_text("", &[]).unwrap_err();
        assert!(err.to_string().contains("Ingen gyldige ytringer fundet"));
    }

    #[test]
    fn s6_well_formed_round_trip_has_exact_timing() {
        let text = "I: Hej, hvordan går det?\nD: Det går fint.\ni: Godt at høre.";
        let utterances = parse_editor_text(text, &[]).unwrap();
        assert_eq!(utterances.len(), 3);
        assert_eq!(utterances[0].speaker, "I");
        assert_eq!(utterances[0].start_sec, 0.0);
        assert_eq!(utterances[0].end_sec, 1.0);
        assert_eq!(utterances[1].start_sec, 3.0);
        assert_eq!(utterances[1].end_sec, 4.0);
        assert_eq!(utterances[2].speaker, "I");
        assert_eq!(utterances[2].start_sec, 6.0);
    }

    #[test]
    fn confidence_is_pulled_from_fallback_transcript_by_index() {
        let fallback = vec![Utterance {
            start_sec: 0.0,
            end_sec: 1.0,
            speaker: "I".to_string(),
            text: "whatever".to_string(),
            confidence: Some(0.77),
        }];
        let utterances = parse_editor_text("I: hej", &fallback).unwrap();
        assert_eq!(utterances[0].confidence, Some(0.77));
    }
}
