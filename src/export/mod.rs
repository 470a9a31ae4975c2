//! Exporters (C10, ambient/surface): plain-text and Word renderings of an
//! already-finalized transcript.

use crate::error::Result;
use crate::storage::models::{Job, Utterance};
use chrono::Utc;
use docx_rs::{
    AlignmentType, Docx, PageMargin, Paragraph, Run, Table, TableCell, TableLayoutType, TableRow,
    WidthType,
};
use std::path::Path;

const NUMBER_COL_TWIPS: i32 = 601;
const GAP_COL_TWIPS: i32 = 329;
const PAGE_WIDTH_TWIPS: i32 = 11906;
const PAGE_HEIGHT_TWIPS: i32 = 16838;
const SIDE_MARGIN_TWIPS: i32 = 1134;
const TOP_MARGIN_TWIPS: i32 = 1701;
const TEXT_COL_TWIPS: i32 = PAGE_WIDTH_TWIPS - (SIDE_MARGIN_TWIPS * 2) - NUMBER_COL_TWIPS - GAP_COL_TWIPS;

fn source_label(job: &Job) -> String {
    let name = job.source_name.trim();
    let stem = if !name.is_empty() {
        Path::new(name).file_stem().map(|s| s.to_string_lossy().to_string())
    } else {
        Path::new(&job.source_path).file_stem().map(|s| s.to_string_lossy().to_string())
    };
    stem.unwrap_or_default()
}

fn header_date(job: &Job) -> String {
    job.created_at.with_timezone(&Utc).format("%d.%m.%Y").to_string()
}

fn header_lines(job: &Job) -> Vec<String> {
    let duration_min = ((job.duration_sec / 60.0).round() as i64).max(1);
    vec![
        format!("Navn på fil: \"{}\"", source_label(job)),
        format!("Dato: {}", header_date(job)),
        format!("Varighed: {} minutter", duration_min),
        String::new(),
        "Deltagere:".to_string(),
        "Interviewer (I)".to_string(),
        "Deltager (D)".to_string(),
        String::new(),
    ]
}

fn line_entries(transcript: &[Utterance]) -> Vec<(usize, &str, &str)> {
    let mut entries = Vec::new();
    let mut line_no = 1usize;
    for utterance in transcript {
        let text = utterance.text.trim();
        if text.is_empty() {
            continue;
        }
        entries.push((line_no, utterance.speaker.as_str(), text));
        line_no += 1;
    }
    entries
}

/// `export_txt` (§4.10): header block + one `"{n}\t{speaker}: {text}"` line
/// per non-empty utterance.
pub fn export_txt(job: &Job, transcript: &[Utterance]) -> String {
    let mut lines = header_lines(job);
    for (line_no, speaker, text) in line_entries(transcript) {
        lines.push(format!("{}\t{}: {}", line_no, speaker, text));
    }
    format!("{}\n", lines.join("\n").trim())
}

pub async fn write_txt(job: &Job, transcript: &[Utterance], output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output_path, export_txt(job, transcript)).await?;
    Ok(())
}

/// `export_docx` (§4.10): A4 page, fixed margins, bold speaker labels in a
/// borderless three-column table.
pub fn build_docx(job: &Job, transcript: &[Utterance]) -> Docx {
    let mut docx = Docx::new()
        .page_size(PAGE_WIDTH_TWIPS as u32, PAGE_HEIGHT_TWIPS as u32)
        .page_margin(
            PageMargin::new()
                .top(TOP_MARGIN_TWIPS)
                .bottom(TOP_MARGIN_TWIPS)
                .left(SIDE_MARGIN_TWIPS)
                .right(SIDE_MARGIN_TWIPS),
        );

    for (idx, line) in header_lines(job).into_iter().enumerate() {
        let mut run = Run::new().add_text(line.clone());
        if idx == 4 {
            run = run.bold();
        }
        docx = docx.add_paragraph(Paragraph::new().add_run(run));
    }

    let entries = line_entries(transcript);
    if !entries.is_empty() {
        let rows: Vec<TableRow> = entries
            .into_iter()
            .map(|(line_no, speaker, text)| {
                let number_cell = TableCell::new()
                    .width(NUMBER_COL_TWIPS as usize, WidthType::Dxa)
                    .add_paragraph(
                        Paragraph::new()
                            .align(AlignmentType::Right)
                            .add_run(Run::new().add_text(line_no.to_string())),
                    );

                let gap_cell = TableCell::new()
                    .width(GAP_COL_TWIPS as usize, WidthType::Dxa)
                    .add_paragraph(Paragraph::new());

                let text_cell = TableCell::new()
                    .width(TEXT_COL_TWIPS as usize, WidthType::Dxa)
                    .add_paragraph(
                        Paragraph::new()
                            .add_run(Run::new().add_text(format!("{}:", speaker)).bold())
                            .add_run(Run::new().add_text(format!(" {}", text))),
                    );

                TableRow::new(vec![number_cell, gap_cell, text_cell])
            })
            .collect();

        let table = Table::new(rows)
            .layout(TableLayoutType::Fixed)
            .set_grid(vec![
                NUMBER_COL_TWIPS as usize,
                GAP_COL_TWIPS as usize,
                TEXT_COL_TWIPS as usize,
            ]);
        docx = docx.add_table(table);
    }

    docx
}

pub async fn write_docx(job: &Job, transcript: &[Utterance], output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let docx = build_docx(job, transcript);
    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        docx.build()
            .pack(&mut buf)
            .map_err(|e| crate::error::Error::internal(e.to_string()))?;
        Ok(buf)
    })
    .await
    .map_err(|e| crate::error::Error::internal(e.to_string()))??;

    tokio::fs::write(output_path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_job() -> Job {
        Job {
            id: "job-1".to_string(),
            source_path: "/tmp/interview.mp4".to_string(),
            source_name: "interview.mp4".to_string(),
            source_hash: "deadbeef".to_string(),
            status: crate::storage::models::JobStatus::Ready,
            created_at: Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap(),
            duration_sec: 125.0,
            chunks_total: 1,
            chunks_done: 1,
            transcript_json: None,
            error_message: None,
            interviewer_count: 1,
            participant_count: 1,
        }
    }

    #[test]
    fn txt_header_includes_rounded_duration_and_stem() {
        let job = sample_job();
        let transcript = vec![Utterance {
            start_sec: 0.0,
            end_sec: 1.0,
            speaker: "I".to_string(),
            text: "Hej, hvordan går det?".to_string(),
            confidence: None,
        }];
        let rendered = export_txt(&job, &transcript);
        assert!(rendered.contains("Navn på fil: \"interview\""));
        assert!(rendered.contains("Varighed: 2 minutter"));
        assert!(rendered.contains("1\tI: Hej, hvordan går det?"));
    }

    #[test]
    fn txt_skips_empty_utterances_and_keeps_line_numbers_dense() {
        let job = sample_job();
        let transcript = vec![
            Utterance {
                start_sec: 0.0,
                end_sec: 1.0,
                speaker: "I".to_string(),
                text: "   ".to_string(),
                confidence: None,
            },
            Utterance {
                start_sec: 1.0,
                end_sec: 2.0,
                speaker: "D".to_string(),
                text: "Svar her".to_string(),
                confidence: None,
            },
        ];
        let rendered = export_txt(&job, &transcript);
        assert!(rendered.contains("1\tD: Svar her"));
        assert!(!rendered.contains("2\t"));
    }

    #[test]
    fn text_column_width_is_computed_from_page_and_side_margins() {
        assert_eq!(TEXT_COL_TWIPS, PAGE_WIDTH_TWIPS - SIDE_MARGIN_TWIPS * 2 - NUMBER_COL_TWIPS - GAP_COL_TWIPS);
    }
}
