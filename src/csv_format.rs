use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{ExportError, ImportError};

lazy_static! {
    static ref NUMERIC_REGEX: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

/// Header row plus data rows of an uploaded sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Position of the first candidate header present, compared case-insensitively.
    pub fn column(&self, candidates: &[&str]) -> Option<usize> {
        let lower: Vec<String> = self.headers.iter().map(|h| h.trim().to_lowercase()).collect();
        find_any_index(&lower, candidates)
    }
}

/// Read CSV text into a table. Lines with nothing but whitespace are ignored,
/// the first remaining line is the header, rows may have any length.
pub fn read_table(text: &str) -> Result<CsvTable, ImportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut table = CsvTable::default();
    let mut header_seen = false;

    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|source| ImportError::Csv {
            row: index + 1,
            source,
        })?;
        // A blank line reads as a single empty field; `,,,` is still a row
        if record.len() <= 1 && record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if header_seen {
            table.rows.push(fields);
        } else {
            table.headers = fields;
            header_seen = true;
        }
    }

    Ok(table)
}

pub fn find_any_index(headers_lower: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        let candidate = candidate.to_lowercase();
        headers_lower.iter().position(|h| *h == candidate)
    })
}

/// Parse a stock quantity cell.
///
/// Blank cells give `fallback` (or 0), `"not stocked"` gives 0, numbers are
/// floored and may be negative, anything else gives `fallback` (or 0).
pub fn parse_quantity(value: Option<&str>, fallback: Option<i64>) -> i64 {
    let value = match value {
        Some(v) if !v.is_empty() => v,
        _ => return fallback.unwrap_or(0),
    };

    let s = value.trim().to_lowercase();
    if s == "not stocked" {
        return 0;
    }
    if s.is_empty() {
        return 0;
    }

    match s.parse::<f64>() {
        Ok(n) if n.is_finite() => n.floor() as i64,
        _ => fallback.unwrap_or(0),
    }
}

/// A value headed for an exported cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportCell {
    Empty,
    Number(i64),
    Text(String),
}

impl From<i64> for ExportCell {
    fn from(n: i64) -> Self {
        ExportCell::Number(n)
    }
}

impl From<&str> for ExportCell {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            ExportCell::Empty
        } else {
            ExportCell::Text(s.to_string())
        }
    }
}

impl From<String> for ExportCell {
    fn from(s: String) -> Self {
        ExportCell::from(s.as_str())
    }
}

impl From<Option<String>> for ExportCell {
    fn from(s: Option<String>) -> Self {
        s.map(ExportCell::from).unwrap_or(ExportCell::Empty)
    }
}

impl ExportCell {
    /// Unquoted text of the cell. Numeric strings are trimmed so spreadsheet
    /// tools read them as numbers.
    pub fn render(&self) -> String {
        match self {
            ExportCell::Empty => String::new(),
            ExportCell::Number(n) => n.to_string(),
            ExportCell::Text(s) => {
                if !needs_quotes(s) && NUMERIC_REGEX.is_match(s.trim()) {
                    s.trim().to_string()
                } else {
                    s.clone()
                }
            }
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ExportCell::Number(n) => Some(*n as f64),
            ExportCell::Text(s) if NUMERIC_REGEX.is_match(s.trim()) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn needs_quotes(s: &str) -> bool {
    s.contains(['"', ',', '\n'])
}

/// Quote one cell the way exported files do: only when it holds a quote,
/// comma or newline.
pub fn escape_csv(cell: &ExportCell) -> String {
    let s = cell.render();
    if needs_quotes(&s) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s
    }
}

/// Write a header line and rows, joined by `\n` with no trailing newline.
pub fn write_table(headers: &[String], rows: &[Vec<ExportCell>]) -> Result<String, ExportError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row.iter().map(ExportCell::render))?;
    }

    let bytes = writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
    let mut text = String::from_utf8(bytes).map_err(|_| ExportError::Encoding)?;
    if text.ends_with('\n') {
        text.pop();
    }

    Ok(text)
}
