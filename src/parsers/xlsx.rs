//! Excel workbooks: one table per worksheet, rows of cell values with
//! shared and inline strings resolved. Workbooks beyond the sheet or cell
//! caps are kept as `partial` with a `too_large` note.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::ooxml;
use super::{FormatParser, ParseContext, ParsedContent, Probe};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const SHEET_PREFIX: &str = "xl/worksheets/sheet";

/// Maximum sheets to process in a workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

pub struct XlsxParser;

impl FormatParser for XlsxParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Xlsx
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xlsx"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, probe: &Probe<'_>) -> bool {
        probe.has_zip_entry(WORKBOOK_PART)
    }

    fn parse(&self, bytes: &[u8], _ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        parse_workbook(bytes, XLSX_MAX_SHEETS, XLSX_MAX_CELLS_PER_SHEET)
    }
}

fn parse_workbook(
    bytes: &[u8],
    max_sheets: usize,
    max_cells: usize,
) -> Result<ParsedContent, ParseError> {
    let mut package = ooxml::open(bytes)?;
    if !ooxml::has_part(&package, WORKBOOK_PART) {
        return Err(ParseError::corrupt("xl/workbook.xml not found"));
    }

    let sheet_names = match ooxml::read_optional_part(&mut package, WORKBOOK_PART)? {
        Some(xml) => workbook_sheet_names(&xml)?,
        None => Vec::new(),
    };
    let shared = match ooxml::read_optional_part(&mut package, SHARED_STRINGS_PART)? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };

    let parts = ooxml::numbered_parts(&package, SHEET_PREFIX);
    let mut truncation = None;
    if parts.len() > max_sheets {
        truncation = Some(ParseError::too_large(format!(
            "workbook has {} sheets; only the first {} were read",
            parts.len(),
            max_sheets
        )));
    }

    let mut blocks = Vec::new();
    for (idx, part) in parts.into_iter().take(max_sheets).enumerate() {
        let xml = ooxml::read_part(&mut package, &part)?;
        let (rows, truncated) = sheet_rows(&xml, &shared, max_cells)?;
        if truncated && truncation.is_none() {
            truncation = Some(ParseError::too_large(format!(
                "{} has more than {} cells; the rest were dropped",
                part, max_cells
            )));
        }
        if rows.is_empty() {
            continue;
        }
        let name = sheet_names
            .get(idx)
            .cloned()
            .or_else(|| ooxml::part_number(&part, SHEET_PREFIX).map(|n| format!("Sheet{}", n)));
        blocks.push(ContentBlock::Table { name, rows });
    }

    if blocks.is_empty() {
        return Err(ParseError::empty("workbook has no populated cells"));
    }
    Ok(match truncation {
        Some(note) => ParsedContent::partial(blocks, note),
        None => ParsedContent::ok(blocks),
    })
}

fn workbook_sheet_names(xml: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut names = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if let Some(name) = ooxml::attr(&e, b"name") {
                    names.push(name);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

/// Shared string table. Rich-text items (`<si><r><t>..</t></r>..</si>`)
/// are concatenated.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_t && !in_phonetic => current.push_str(&te.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = false;
                    strings.push(current.trim().to_string());
                }
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(PartialEq)]
enum CellType {
    Shared,
    Inline,
    Value,
}

/// Rows of one sheet, and whether `max_cells` cut it short.
fn sheet_rows(
    xml: &[u8],
    shared: &[String],
    max_cells: usize,
) -> Result<(Vec<Vec<String>>, bool), ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut cell_type = CellType::Value;
    let mut in_value = false;
    let mut cell_count = 0usize;
    let mut truncated = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    if cell_count >= max_cells {
                        truncated = true;
                        break;
                    }
                    cell.clear();
                    cell_type = match ooxml::attr(&e, b"t").as_deref() {
                        Some("s") => CellType::Shared,
                        Some("inlineStr") => CellType::Inline,
                        _ => CellType::Value,
                    };
                }
                b"v" => in_value = true,
                b"t" if cell_type == CellType::Inline => in_value = true,
                _ => {}
            },
            Event::Text(te) if in_value => {
                let raw = te.unescape()?;
                let raw = raw.trim();
                match cell_type {
                    CellType::Shared => {
                        if let Some(s) = raw.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                            cell.push_str(s);
                        }
                    }
                    CellType::Inline | CellType::Value => cell.push_str(raw),
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    row.push(std::mem::take(&mut cell));
                    cell_count += 1;
                }
                b"row" => {
                    let done = std::mem::take(&mut row);
                    if done.iter().any(|c| !c.is_empty()) {
                        rows.push(trim_trailing_empty(done));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if truncated && row.iter().any(|c| !c.is_empty()) {
        rows.push(trim_trailing_empty(row));
    }
    Ok((rows, truncated))
}

fn trim_trailing_empty(mut row: Vec<String>) -> Vec<String> {
    while row.last().map(|c| c.is_empty()).unwrap_or(false) {
        row.pop();
    }
    row
}
