//! Word documents: paragraphs, heading styles, and tables from
//! `word/document.xml`.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::ooxml;
use super::{normalize_ws, FormatParser, ParseContext, ParsedContent, Probe};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

const DOCUMENT_PART: &str = "word/document.xml";

pub struct DocxParser;

impl FormatParser for DocxParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Docx
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, probe: &Probe<'_>) -> bool {
        probe.has_zip_entry(DOCUMENT_PART)
    }

    fn parse(&self, bytes: &[u8], _ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        let mut package = ooxml::open(bytes)?;
        if !ooxml::has_part(&package, DOCUMENT_PART) {
            return Err(ParseError::corrupt("word/document.xml not found"));
        }
        let xml = ooxml::read_part(&mut package, DOCUMENT_PART)?;
        let blocks = document_blocks(&xml)?;
        if blocks.is_empty() {
            return Err(ParseError::empty("document has no text"));
        }
        Ok(ParsedContent::ok(blocks))
    }
}

#[derive(Default)]
struct TableState {
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

fn document_blocks(xml: &[u8]) -> Result<Vec<ContentBlock>, ParseError> {
    let mut reader = Reader::from_reader(xml);
    // Runs carry significant leading/trailing spaces.
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut blocks = Vec::new();
    let mut para = String::new();
    let mut style: Option<String> = None;
    let mut in_t = false;
    let mut tables: Vec<TableState> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => {
                    para.clear();
                    style = None;
                }
                b"t" => in_t = true,
                b"tbl" => tables.push(TableState::default()),
                b"tr" => {
                    if let Some(t) = tables.last_mut() {
                        t.row.clear();
                    }
                }
                b"tc" => {
                    if let Some(t) = tables.last_mut() {
                        t.cell.clear();
                    }
                }
                b"pStyle" => style = ooxml::attr(&e, b"val"),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"pStyle" => style = ooxml::attr(&e, b"val"),
                b"tab" | b"br" => para.push(' '),
                _ => {}
            },
            Event::Text(te) if in_t => {
                para.push_str(&te.unescape()?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let text = normalize_ws(&para);
                    if let Some(t) = tables.last_mut() {
                        if !text.is_empty() {
                            if !t.cell.is_empty() {
                                t.cell.push(' ');
                            }
                            t.cell.push_str(&text);
                        }
                    } else if !text.is_empty() {
                        match style.as_deref().and_then(heading_level) {
                            Some(level) => blocks.push(ContentBlock::Heading { level, text }),
                            None => blocks.push(ContentBlock::Paragraph { text }),
                        }
                    }
                    para.clear();
                }
                b"tc" => {
                    if let Some(t) = tables.last_mut() {
                        let cell = std::mem::take(&mut t.cell);
                        t.row.push(cell);
                    }
                }
                b"tr" => {
                    if let Some(t) = tables.last_mut() {
                        let row = std::mem::take(&mut t.row);
                        if row.iter().any(|c| !c.is_empty()) {
                            t.rows.push(row);
                        }
                    }
                }
                b"tbl" => {
                    if let Some(done) = tables.pop() {
                        match tables.last_mut() {
                            // Nested table text folds into the enclosing cell.
                            Some(outer) => {
                                let flat = done
                                    .rows
                                    .iter()
                                    .flatten()
                                    .filter(|c| !c.is_empty())
                                    .cloned()
                                    .collect::<Vec<_>>()
                                    .join(" ");
                                if !flat.is_empty() {
                                    if !outer.cell.is_empty() {
                                        outer.cell.push(' ');
                                    }
                                    outer.cell.push_str(&flat);
                                }
                            }
                            None if !done.rows.is_empty() => blocks.push(ContentBlock::Table {
                                name: None,
                                rows: done.rows,
                            }),
                            None => {}
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(blocks)
}

/// `Heading1`..`Heading9` and `Title` map to heading levels (capped at 6).
fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let n: u8 = lower.strip_prefix("heading")?.trim().parse().ok()?;
    if n == 0 {
        return None;
    }
    Some(n.min(6))
}
