//! Text extraction for uploaded Office documents (xlsx, docx).
//!
//! Both formats are ZIP archives of XML parts. Spreadsheets are rendered as
//! comma-separated values (first worksheet, one line per row); word
//! documents as one line per paragraph.

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Zero-based index of `XFD`, the last column a worksheet can have.
const XLSX_MAX_COLUMN: usize = 16_383;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("invalid archive: {0}")]
    Archive(String),
    #[error("malformed XML in {part}: {message}")]
    Xml { part: String, message: String },
    #[error("missing document part: {0}")]
    MissingPart(String),
    #[error("ZIP entry {name} exceeds size limit ({limit} bytes)")]
    TooLarge { name: String, limit: u64 },
}

/// Declared type of an upload, derived from its file-name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Spreadsheet,
    WordDocument,
}

impl DocumentKind {
    /// Classifies an object path by its (case-insensitive) suffix.
    pub fn from_path(path: &str) -> Result<Self, ExtractError> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let suffix = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match suffix.as_str() {
            "xlsx" => Ok(DocumentKind::Spreadsheet),
            "docx" => Ok(DocumentKind::WordDocument),
            _ => Err(ExtractError::Unsupported(file_name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Spreadsheet => "spreadsheet",
            DocumentKind::WordDocument => "word-document",
        }
    }
}

/// Extracts plain text from an Office document.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Spreadsheet => extract_xlsx(bytes),
        DocumentKind::WordDocument => extract_docx(bytes),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Archive(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => ExtractError::MissingPart(name.to_string()),
        other => ExtractError::Archive(other.to_string()),
    })?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::TooLarge {
            name: name.to_string(),
            limit: max_bytes,
        });
    }
    Ok(out)
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

// ============ docx ============

const DOCX_BODY: &str = "word/document.xml";

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, DOCX_BODY, MAX_XML_ENTRY_BYTES)?;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| xml_error(DOCX_BODY, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(DOCX_BODY, e)),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n").trim_end().to_string())
}

// ============ xlsx ============

const XLSX_SHARED_STRINGS: &str = "xl/sharedStrings.xml";

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet = first_worksheet_name(&archive)
        .ok_or_else(|| ExtractError::MissingPart("xl/worksheets/sheet*.xml".to_string()))?;
    let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    let rows = read_sheet_rows(&sheet, &sheet_xml, &shared_strings)?;
    Ok(render_csv(&rows))
}

/// Shared string table; a workbook with only numbers may omit it.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = match read_zip_entry_bounded(archive, XLSX_SHARED_STRINGS, MAX_XML_ENTRY_BYTES) {
        Ok(xml) => xml,
        Err(ExtractError::MissingPart(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(te)) if in_t => {
                let text = te.unescape().map_err(|e| xml_error(XLSX_SHARED_STRINGS, e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(XLSX_SHARED_STRINGS, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn first_worksheet_name(archive: &Archive<'_>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(str::to_string)
}

/// Zero-based column index from a cell reference such as `"AB12"`.
///
/// `None` when the reference has no column letters or the letters do not
/// fit in a `usize`.
fn column_index(reference: &str) -> Option<usize> {
    let mut col = 0usize;
    let mut seen = false;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col.checked_mul(26)?.checked_add(digit)?;
        seen = true;
    }
    seen.then(|| col - 1)
}

/// Column of a `<c>` element: its `r` attribute, or `fallback` when the
/// attribute is absent. Columns past `XFD` are rejected.
fn cell_column(part: &str, e: &BytesStart<'_>, fallback: usize) -> Result<usize, ExtractError> {
    let column = match attr(e, b"r") {
        Some(reference) => column_index(&reference)
            .ok_or_else(|| xml_error(part, format!("invalid cell reference {:?}", reference)))?,
        None => fallback,
    };
    if column > XLSX_MAX_COLUMN {
        return Err(xml_error(
            part,
            format!("column {} is past the last sheet column (XFD)", column + 1),
        ));
    }
    Ok(column)
}

struct Cell {
    column: usize,
    kind: Option<String>,
    raw: String,
}

fn cell_value(cell: &Cell, shared_strings: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.raw.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        _ => cell.raw.clone(),
    }
}

type Row = Vec<(usize, String)>;

fn read_sheet_rows(part: &str, xml: &[u8], shared_strings: &[String]) -> Result<Vec<Row>, ExtractError> {
    let mut rows: Vec<Row> = Vec::new();
    let mut row: Row = Vec::new();
    let mut cell: Option<Cell> = None;
    let mut next_column = 0usize;
    let mut in_value = false;
    let mut cell_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            tracing::warn!(part, limit = XLSX_MAX_CELLS_PER_SHEET, "cell limit reached, truncating sheet");
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = Vec::new();
                    next_column = 0;
                }
                b"c" => {
                    let column = cell_column(part, &e, next_column)?;
                    cell = Some(Cell {
                        column,
                        kind: attr(&e, b"t"),
                        raw: String::new(),
                    });
                }
                // <v> holds the value; <t> holds inline string runs inside <is>.
                b"v" | b"t" if cell.is_some() => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"c" => {
                    next_column = cell_column(part, &e, next_column)? + 1;
                }
                b"row" => rows.push(Vec::new()),
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let text = te.unescape().map_err(|e| xml_error(part, e))?;
                if let Some(c) = cell.as_mut() {
                    c.raw.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        next_column = c.column + 1;
                        row.push((c.column, cell_value(&c, shared_strings)));
                        cell_count += 1;
                    }
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// Renders rows as CSV, padding every row to the widest one.
fn render_csv(rows: &[Row]) -> String {
    let width = rows
        .iter()
        .flat_map(|r| r.iter().map(|(col, _)| col + 1))
        .max()
        .unwrap_or(0);

    rows.iter()
        .map(|row| {
            let mut fields = vec![String::new(); width];
            for (col, value) in row {
                fields[*col] = csv_field(value);
            }
            fields.join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
