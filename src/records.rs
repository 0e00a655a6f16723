//! Seed loading and record writing, dispatched on file extension.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use calamine::{Reader, open_workbook_auto};
use rust_xlsxwriter::{Workbook, XlsxError};
use serde::Deserialize;
use tracing::info;

use crate::pipeline::Record;
use crate::pipeline::context::truncate_chars;

const QUESTION_COLUMN: &str = "question";
const RECORD_SEPARATOR: &str = "----------------------------------------";
/// Longest string a spreadsheet cell accepts.
const XLSX_CELL_CHARS: usize = 32_767;

#[derive(Debug, thiserror::Error)]
pub enum RecordsError {
    #[error("unsupported file extension: {0} (expected txt, json, jsonl, csv or xlsx)")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("no 'question' column in {0}")]
    MissingColumn(String),
}

impl From<calamine::Error> for RecordsError {
    fn from(e: calamine::Error) -> Self {
        RecordsError::Spreadsheet(e.to_string())
    }
}

impl From<XlsxError> for RecordsError {
    fn from(e: XlsxError) -> Self {
        RecordsError::Spreadsheet(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Txt,
    Json,
    Jsonl,
    Csv,
    Xlsx,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, RecordsError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => Ok(Format::Txt),
            "json" => Ok(Format::Json),
            "jsonl" => Ok(Format::Jsonl),
            "csv" => Ok(Format::Csv),
            "xlsx" => Ok(Format::Xlsx),
            _ => Err(RecordsError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedEntry {
    Text(String),
    Row { question: String },
}

impl SeedEntry {
    fn into_question(self) -> String {
        match self {
            SeedEntry::Text(q) | SeedEntry::Row { question: q } => q,
        }
    }
}

/// Reads seed questions, trimmed and with blanks dropped, in file order.
pub fn load_seeds(path: &Path) -> Result<Vec<String>, RecordsError> {
    let raw: Vec<String> = match Format::from_path(path)? {
        Format::Txt => fs::read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect(),
        Format::Json => {
            let entries: Vec<SeedEntry> = serde_json::from_str(&fs::read_to_string(path)?)?;
            entries.into_iter().map(SeedEntry::into_question).collect()
        }
        Format::Jsonl => fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<SeedEntry>(l).map(SeedEntry::into_question))
            .collect::<Result<Vec<_>, _>>()?,
        Format::Csv => load_csv_seeds(path)?,
        Format::Xlsx => load_xlsx_seeds(path)?,
    };

    let seeds: Vec<String> = raw
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    info!(path = %path.display(), seeds = seeds.len(), "loaded seed questions");
    Ok(seeds)
}

fn question_index<'a>(
    headers: impl IntoIterator<Item = &'a str>,
    path: &Path,
) -> Result<usize, RecordsError> {
    headers
        .into_iter()
        .position(|h| h.trim().eq_ignore_ascii_case(QUESTION_COLUMN))
        .ok_or_else(|| RecordsError::MissingColumn(path.display().to_string()))
}

fn load_csv_seeds(path: &Path) -> Result<Vec<String>, RecordsError> {
    let mut reader = csv::Reader::from_path(path)?;
    let idx = question_index(reader.headers()?.iter(), path)?;
    let mut seeds = Vec::new();
    for row in reader.records() {
        if let Some(q) = row?.get(idx) {
            seeds.push(q.to_string());
        }
    }
    Ok(seeds)
}

fn load_xlsx_seeds(path: &Path) -> Result<Vec<String>, RecordsError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| RecordsError::Spreadsheet(format!("{} has no sheets", path.display())))??;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|r| r.iter().map(|c| c.to_string()).collect())
        .unwrap_or_default();
    let idx = question_index(header.iter().map(String::as_str), path)?;
    Ok(rows
        .filter_map(|r| r.get(idx).map(|c| c.to_string()))
        .collect())
}

/// Writes all records to `path`, replacing any existing file.
pub fn write_records(path: &Path, records: &[Record]) -> Result<(), RecordsError> {
    match Format::from_path(path)? {
        Format::Json => {
            let mut out = BufWriter::new(fs::File::create(path)?);
            serde_json::to_writer_pretty(&mut out, records)?;
            out.flush()?;
        }
        Format::Jsonl => {
            let mut out = BufWriter::new(fs::File::create(path)?);
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        Format::Csv => {
            let with_context = has_context(records);
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(columns(records))?;
            for record in records {
                writer.write_record(row(record, with_context))?;
            }
            writer.flush()?;
        }
        Format::Xlsx => write_xlsx(path, records)?,
        Format::Txt => fs::write(path, render_text(records))?,
    }
    info!(path = %path.display(), records = records.len(), "wrote records");
    Ok(())
}

fn has_context(records: &[Record]) -> bool {
    records.iter().any(|r| r.context.is_some())
}

fn columns(records: &[Record]) -> Vec<&'static str> {
    let mut cols = vec!["instruction", "output", "links"];
    if has_context(records) {
        cols.push("context");
    }
    cols
}

fn row(record: &Record, with_context: bool) -> Vec<String> {
    let mut cells = vec![
        record.instruction.clone(),
        record.output.clone(),
        record.links.join("\n"),
    ];
    if with_context {
        cells.push(record.context.clone().unwrap_or_default());
    }
    cells
}

fn write_xlsx(path: &Path, records: &[Record]) -> Result<(), RecordsError> {
    let with_context = has_context(records);
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in (0u16..).zip(columns(records)) {
        sheet.write_string(0, col, name)?;
    }
    for (r, record) in (1u32..).zip(records) {
        for (col, mut cell) in (0u16..).zip(row(record, with_context)) {
            truncate_chars(&mut cell, XLSX_CELL_CHARS);
            sheet.write_string(r, col, cell)?;
        }
    }
    workbook.save(path)?;
    Ok(())
}

fn render_text(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!("Instruction: {}\n", record.instruction));
        out.push_str(&format!("Answer: {}\n", record.output));
        out.push_str("Sources:\n");
        for link in &record.links {
            out.push_str(&format!("- {link}\n"));
        }
        if let Some(context) = &record.context {
            out.push_str(&format!("Context:\n{context}\n"));
        }
        out.push_str(RECORD_SEPARATOR);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(q: &str, context: Option<&str>) -> Record {
        Record {
            instruction: q.to_string(),
            output: format!("answer to {q}"),
            links: vec!["https://a.example".into(), "https://b.example".into()],
            context: context.map(str::to_string),
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn format_is_case_insensitive_and_rejects_unknown() {
        assert_eq!(Format::from_path(Path::new("a.JSONL")).unwrap(), Format::Jsonl);
        assert!(matches!(
            Format::from_path(Path::new("a.parquet")),
            Err(RecordsError::UnsupportedFormat(_))
        ));
        assert!(Format::from_path(Path::new("no_extension")).is_err());
    }

    #[test]
    fn txt_seeds_skip_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "seeds.txt", "first?\n\n  second?  \n");
        assert_eq!(load_seeds(&path).unwrap(), vec!["first?", "second?"]);
    }

    #[test]
    fn json_seeds_accept_strings_and_objects() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "seeds.json",
            r#"["plain?", {"question": "object?", "extra": 1}]"#,
        );
        assert_eq!(load_seeds(&path).unwrap(), vec!["plain?", "object?"]);
    }

    #[test]
    fn jsonl_seeds_read_question_field() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "seeds.jsonl",
            "{\"question\": \"one?\"}\n\n{\"question\": \"two?\"}\n",
        );
        assert_eq!(load_seeds(&path).unwrap(), vec!["one?", "two?"]);
    }

    #[test]
    fn csv_seeds_use_question_column() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "seeds.csv", "id,Question\n1,alpha?\n2,\"beta, gamma?\"\n");
        assert_eq!(load_seeds(&path).unwrap(), vec!["alpha?", "beta, gamma?"]);
    }

    #[test]
    fn csv_without_question_column_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "seeds.csv", "id,text\n1,alpha?\n");
        assert!(matches!(
            load_seeds(&path),
            Err(RecordsError::MissingColumn(_))
        ));
    }

    #[test]
    fn xlsx_seeds_read_first_sheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seeds.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "question").unwrap();
        sheet.write_string(1, 0, "from sheet?").unwrap();
        workbook.save(&path).unwrap();

        assert_eq!(load_seeds(&path).unwrap(), vec!["from sheet?"]);
    }

    #[test]
    fn json_output_omits_missing_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        write_records(&path, &[record("q1", None)]).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed[0]["instruction"], "q1");
        assert!(parsed[0].get("context").is_none());
    }

    #[test]
    fn jsonl_output_is_one_record_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        let records = vec![record("q1", None), record("q2", Some("ctx"))];
        write_records(&path, &records).unwrap();

        let lines: Vec<Record> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, records);
    }

    #[test]
    fn csv_output_joins_links_and_adds_context_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write_records(&path, &[record("q1", Some("ctx"))]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["instruction", "output", "links", "context"]);
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[2], "https://a.example\nhttps://b.example");
        assert_eq!(&first[3], "ctx");
    }

    #[test]
    fn xlsx_output_can_be_read_back_as_seeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.xlsx");
        write_records(&path, &[record("q1", None)]).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        assert_eq!(rows[0], vec!["instruction", "output", "links"]);
        assert_eq!(rows[1][0], "q1");
    }

    #[test]
    fn xlsx_output_clips_oversized_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("long.xlsx");
        let context = "x".repeat(40_000);
        let mut long = record("q1", Some(context.as_str()));
        long.output = "y".repeat(33_000);
        write_records(&path, &[long]).unwrap();

        let mut workbook = open_workbook_auto(&path).unwrap();
        let range = workbook.worksheet_range_at(0).unwrap().unwrap();
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        assert_eq!(rows[0], vec!["instruction", "output", "links", "context"]);
        assert_eq!(rows[1][0], "q1");
        assert_eq!(rows[1][1].chars().count(), XLSX_CELL_CHARS);
        assert_eq!(rows[1][3].chars().count(), XLSX_CELL_CHARS);
    }

    #[test]
    fn text_output_lists_sources() {
        let text = render_text(&[record("q1", None)]);
        assert!(text.starts_with("Instruction: q1\nAnswer: answer to q1\nSources:\n"));
        assert!(text.contains("- https://b.example\n"));
        assert!(text.ends_with(&format!("{RECORD_SEPARATOR}\n")));
        assert!(!text.contains("Context:"));
    }
}
