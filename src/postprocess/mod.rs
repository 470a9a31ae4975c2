//! PostProcessor (C6): dedupe, style-noise filtering, interruption removal,
//! same-speaker run merging, and interviewer/participant labeling.

use crate::storage::models::{Segment, Utterance};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

const BACKCHANNELS: &[&str] = &[
    "ja", "jo", "nej", "ok", "okay", "nå", "nåh", "mhm", "mm", "mmm", "klart", "fedt", "præcis",
    "super", "tak", "det gør jeg", "det vil jeg gøre", "ja okay", "ja ja", "nej nej",
];

const FILLER_TOKENS: &[&str] = &["øh", "øhm", "øhh", "eh", "hmm"];

const TECHNICAL_META_KEYWORDS: &[&str] = &[
    "kan du høre",
    "hører mig",
    "høre mig",
    "lyden",
    "mikrofon",
    "kamera",
    "dele skærm",
    "del skærm",
    "skærm",
    "link",
    "chat",
    "chatten",
    "nettet",
    "internet",
    "forbindelse",
    "hakker",
    "langsom",
    "opkald",
    "teams",
    "zoom",
    "kan ikke åbne",
    "kan ikke se",
    "driller",
];

const TECHNICAL_META_STRONG_KEYWORDS: &[&str] = &[
    "kan du prøve at gentage",
    "kan du gentage",
    "kan du se min skærm",
    "kan du se den nu",
    "er det mig igen",
    "løber tør for strøm",
    "deler skærm",
];

const SHORT_BACKCHANNEL_MAX_WORDS: usize = 2;
const TECHNICAL_META_MAX_WORDS: usize = 10;
const TECHNICAL_META_STRONG_MAX_WORDS: usize = 20;
const INTERRUPTION_MAX_WORDS: usize = 3;
const INTERRUPTION_MAX_GAP_SEC: f64 = 8.0;
const SPEAKER_RUN_MERGE_MAX_GAP_SEC: f64 = 10.0;

fn non_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").unwrap())
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn token_non_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w]").unwrap())
}

fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let no_punct = non_word_regex().replace_all(&lowered, " ");
    whitespace_regex().replace_all(&no_punct, " ").trim().to_string()
}

fn word_count(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.split_whitespace().count()
    }
}

fn strip_fillers(text: &str) -> String {
    let cleaned: Vec<String> = text
        .split_whitespace()
        .filter_map(|token| {
            let word = token_non_word_regex().replace_all(&token.to_lowercase(), "").to_string();
            if FILLER_TOKENS.contains(&word.as_str()) {
                None
            } else {
                Some(token.to_string())
            }
        })
        .collect();
    let joined = cleaned.join(" ");
    whitespace_regex()
        .replace_all(&joined, " ")
        .trim_matches(|c: char| c == ' ' || c == ',' || c == '.' || c == '-')
        .to_string()
}

fn is_backchannel(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return true;
    }
    word_count(&normalized) <= SHORT_BACKCHANNEL_MAX_WORDS && BACKCHANNELS.contains(&normalized.as_str())
}

fn is_technical_meta(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return true;
    }

    let count = word_count(&normalized);
    let has_keyword = TECHNICAL_META_KEYWORDS.iter().any(|k| normalized.contains(k));
    if has_keyword && count <= TECHNICAL_META_MAX_WORDS {
        return true;
    }

    let has_strong = TECHNICAL_META_STRONG_KEYWORDS.iter().any(|k| normalized.contains(k));
    if has_strong && count <= TECHNICAL_META_STRONG_MAX_WORDS {
        return true;
    }

    false
}

/// Step 1 — dedupe overlapping/repeated segments (idempotent: see
/// `dedupe_is_idempotent` test).
pub fn dedupe_segments(segments: Vec<Segment>) -> Vec<Segment> {
    let mut ordered = segments;
    ordered.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.end_sec.partial_cmp(&b.end_sec).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut merged: Vec<Segment> = Vec::new();

    for segment in ordered {
        if segment.text.trim().is_empty() {
            continue;
        }

        let Some(previous) = merged.last_mut() else {
            merged.push(segment);
            continue;
        };

        let same_text = normalize(&previous.text) == normalize(&segment.text);
        let overlapping = segment.start_sec <= previous.end_sec + 0.25;
        let same_speaker = segment.speaker == previous.speaker;

        if same_text && overlapping {
            previous.end_sec = previous.end_sec.max(segment.end_sec);
            if let Some(conf) = segment.confidence {
                previous.confidence = Some(previous.confidence.unwrap_or(0.0).max(conf));
            }
            continue;
        }

        let prev_norm = normalize(&previous.text);
        let curr_norm = normalize(&segment.text);
        if overlapping && same_speaker && !prev_norm.is_empty() && !curr_norm.is_empty() {
            if curr_norm.starts_with(&prev_norm) {
                previous.text = segment.text;
                previous.end_sec = previous.end_sec.max(segment.end_sec);
                previous.confidence = segment.confidence.or(previous.confidence);
                continue;
            }
            if prev_norm.starts_with(&curr_norm) {
                continue;
            }
        }

        merged.push(segment);
    }

    merged
}

/// Steps 2–4 — strip filler words, drop backchannel/technical-meta noise,
/// remove interruption backchannels, merge same-speaker runs.
pub fn filter_style_noise(segments: Vec<Segment>) -> Vec<Segment> {
    let mut ordered = segments;
    ordered.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.end_sec.partial_cmp(&b.end_sec).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut filtered: Vec<Segment> = Vec::new();
    for segment in ordered {
        let cleaned_text = strip_fillers(segment.text.trim());
        if cleaned_text.is_empty() {
            continue;
        }
        if is_backchannel(&cleaned_text) {
            continue;
        }
        if is_technical_meta(&cleaned_text) {
            continue;
        }
        filtered.push(Segment {
            start_sec: segment.start_sec,
            end_sec: segment.end_sec,
            speaker: segment.speaker,
            text: cleaned_text,
            confidence: segment.confidence,
        });
    }

    if filtered.len() < 3 {
        return filtered;
    }

    let mut compacted = filtered;
    let mut i = 1usize;
    while i + 1 < compacted.len() {
        let current_words = word_count(&normalize(&compacted[i].text));
        let is_interruption = current_words <= INTERRUPTION_MAX_WORDS
            && is_backchannel(&compacted[i].text)
            && compacted[i - 1].speaker == compacted[i + 1].speaker
            && compacted[i - 1].speaker != compacted[i].speaker
            && (compacted[i].start_sec - compacted[i - 1].end_sec) <= INTERRUPTION_MAX_GAP_SEC
            && (compacted[i + 1].start_sec - compacted[i].end_sec) <= INTERRUPTION_MAX_GAP_SEC;

        if is_interruption {
            compacted.remove(i);
            continue;
        }
        i += 1;
    }

    let mut merged_runs: Vec<Segment> = Vec::new();
    for segment in compacted {
        let Some(previous) = merged_runs.last_mut() else {
            merged_runs.push(segment);
            continue;
        };

        if previous.speaker == segment.speaker
            && (segment.start_sec - previous.end_sec) <= SPEAKER_RUN_MERGE_MAX_GAP_SEC
        {
            previous.text = format!("{} {}", previous.text, segment.text).trim().to_string();
            previous.end_sec = previous.end_sec.max(segment.end_sec);
            if let Some(conf) = segment.confidence {
                previous.confidence = Some(previous.confidence.unwrap_or(0.0).max(conf));
            }
            continue;
        }

        merged_runs.push(segment);
    }

    merged_runs
}

struct SpeakerStats {
    first_start: f64,
    utterance_count: u32,
    question_count: u32,
    total_words: u32,
}

fn expected_interviewer_slots(unique_speakers: usize, interviewer_count: i64, participant_count: i64) -> usize {
    if unique_speakers <= 1 {
        return 1;
    }

    let interviewer_count = interviewer_count.max(1) as f64;
    let participant_count = participant_count.max(1) as f64;
    let total_expected = (interviewer_count + participant_count).max(1.0);
    let scaled = ((unique_speakers as f64) * interviewer_count / total_expected).round();
    let slots = (scaled as i64).max(1) as usize;
    slots.min((unique_speakers - 1).max(1)).max(1)
}

/// Step 5 — score each raw speaker and pick the top `slots` as interviewers.
fn infer_interviewer_speakers(
    ordered: &[Segment],
    interviewer_count: i64,
    participant_count: i64,
) -> HashSet<String> {
    if ordered.is_empty() {
        return HashSet::from(["speaker_0".to_string()]);
    }

    let mut stats: HashMap<String, SpeakerStats> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for segment in ordered {
        let speaker_id = if segment.speaker.is_empty() {
            "speaker_0".to_string()
        } else {
            segment.speaker.clone()
        };
        let words = word_count(&normalize(&segment.text)) as u32;

        let entry = stats.entry(speaker_id.clone()).or_insert_with(|| {
            order.push(speaker_id.clone());
            SpeakerStats {
                first_start: segment.start_sec,
                utterance_count: 0,
                question_count: 0,
                total_words: 0,
            }
        });
        entry.utterance_count += 1;
        entry.total_words += words;
        if segment.text.contains('?') {
            entry.question_count += 1;
        }
    }

    if stats.len() <= 1 {
        return HashSet::from([order[0].clone()]);
    }

    let slots = expected_interviewer_slots(stats.len(), interviewer_count, participant_count);

    let mut scored: Vec<(String, f64, f64)> = order
        .iter()
        .map(|speaker_id| {
            let s = &stats[speaker_id];
            let utterances = s.utterance_count.max(1) as f64;
            let avg_words = s.total_words as f64 / utterances;
            let question_density = s.question_count as f64 / utterances;
            let start_bonus = (1.0 - (s.first_start.min(120.0) / 120.0)).max(0.0);
            let brevity_bonus = 1.0 / avg_words.max(1.0);
            let score = question_density * 3.0 + start_bonus + brevity_bonus * 2.0;
            (speaker_id.clone(), score, s.first_start)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
    });

    let picked: HashSet<String> = scored.into_iter().take(slots).map(|(id, _, _)| id).collect();
    if picked.is_empty() {
        HashSet::from([order[0].clone()])
    } else {
        picked
    }
}

/// Step 6 — label survivors `"I"`/`"D"` and round numeric fields.
pub fn map_to_interviewer_participant(
    segments: Vec<Segment>,
    interviewer_count: i64,
    participant_count: i64,
) -> Vec<Utterance> {
    let mut ordered = segments;
    ordered.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.end_sec.partial_cmp(&b.end_sec).unwrap_or(std::cmp::Ordering::Equal))
    });

    let interviewer_speakers = infer_interviewer_speakers(&ordered, interviewer_count, participant_count);

    ordered
        .into_iter()
        .map(|segment| {
            let raw_speaker = if segment.speaker.is_empty() {
                "speaker_0".to_string()
            } else {
                segment.speaker
            };
            let speaker = if interviewer_speakers.contains(&raw_speaker) { "I" } else { "D" };
            Utterance {
                start_sec: round3(segment.start_sec),
                end_sec: round3(segment.end_sec),
                speaker: speaker.to_string(),
                text: segment.text.trim().to_string(),
                confidence: segment.confidence.map(round4),
            }
        })
        .collect()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

/// The full pipeline (§4.6): dedupe → filter → label.
pub fn merge_and_label(segments: Vec<Segment>, interviewer_count: i64, participant_count: i64) -> Vec<Utterance> {
    let deduped = dedupe_segments(segments);
    let filtered = filter_style_noise(deduped);
    map_to_interviewer_participant(filtered, interviewer_count, participant_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(speaker: &str, text: &str, start: f64, end: f64) -> Segment {
        Segment {
            start_sec: start,
            end_sec: end,
            speaker: speaker.to_string(),
            text: text.to_string(),
            confidence: None,
        }
    }

    #[test]
    fn dedupe_merges_overlapping_same_text() {
        let segments = vec![
            seg("speaker_0", "hej verden", 0.0, 1.0),
            seg("speaker_0", "Hej, verden!", 0.9, 1.5),
        ];
        let deduped = dedupe_segments(segments);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].end_sec, 1.5);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let segments = vec![
            seg("speaker_0", "hej verden", 0.0, 1.0),
            seg("speaker_1", "farvel", 2.0, 3.0),
        ];
        let once = dedupe_segments(segments.clone());
        let twice = dedupe_segments(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn style_noise_drops_short_backchannel() {
        let segments = vec![seg("speaker_0", "ja", 0.0, 0.5)];
        let filtered = filter_style_noise(segments);
        assert!(filtered.is_empty());
    }

    #[test]
    fn style_noise_strips_fillers_and_keeps_content() {
        let segments = vec![seg("speaker_0", "øh jeg tror det virker", 0.0, 2.0)];
        let filtered = filter_style_noise(segments);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].text, "jeg tror det virker");
    }

    #[test]
    fn s1_interviewer_preference_by_question_density() {
        let segments = vec![
            seg("A", "Kan du starte med at fortælle om din baggrund?", 0.0, 4.0),
            seg("B", "Ja, jeg arbejder som fysioterapeut i Aarhus.", 4.5, 8.0),
            seg("A", "Hvornår fik du første symptomer?", 8.5, 11.0),
        ];
        let labeled = merge_and_label(segments, 1, 1);
        let speakers: Vec<&str> = labeled.iter().map(|u| u.speaker.as_str()).collect();
        assert_eq!(speakers, vec!["I", "D", "I"]);
    }

    #[test]
    fn s2_ratio_with_two_interviewers_one_participant() {
        let segments = vec![
            seg("A", "Kan du kort præsentere dig selv?", 0.0, 3.0),
            seg("B", "Jeg hedder Mette og arbejder i en børnehave.", 3.5, 7.0),
            seg("C", "Hvordan oplevede du onboarding-forløbet?", 7.5, 10.0),
            seg("B", "Det var tydeligt, men lidt for komprimeret.", 10.5, 13.0),
        ];
        let labeled = merge_and_label(segments, 2, 1);
        let interviewer_count = labeled.iter().filter(|u| u.speaker == "I").count();
        let participant_count = labeled.iter().filter(|u| u.speaker == "D").count();
        assert!(interviewer_count >= 2);
        assert!(participant_count >= 1);
    }

    #[test]
    fn label_closure_every_speaker_is_i_or_d() {
        let segments = vec![
            seg("A", "Hej, hvordan går det med projektet?", 0.0, 3.0),
            seg("B", "Det går fint, vi er snart færdige.", 3.5, 6.0),
        ];
        let labeled = merge_and_label(segments, 1, 1);
        assert!(labeled.iter().all(|u| u.speaker == "I" || u.speaker == "D"));
    }
}
