//! Visio diagrams: per-page shape and connector counts plus shape text.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::ooxml;
use super::{normalize_ws, FormatParser, ParseContext, ParsedContent, Probe};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

const DOCUMENT_PART: &str = "visio/document.xml";
const PAGES_PART: &str = "visio/pages/pages.xml";
const PAGE_PREFIX: &str = "visio/pages/page";

pub struct VsdxParser;

impl FormatParser for VsdxParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Vsdx
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["vsdx"]
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
            return Err(ParseError::corrupt("visio/document.xml not found"));
        }

        let page_names = match ooxml::read_optional_part(&mut package, PAGES_PART)? {
            Some(xml) => page_names(&xml)?,
            None => Vec::new(),
        };

        let mut blocks = Vec::new();
        for (idx, part) in ooxml::numbered_parts(&package, PAGE_PREFIX)
            .into_iter()
            .enumerate()
        {
            let page = ooxml::part_number(&part, PAGE_PREFIX).unwrap_or(0);
            let xml = ooxml::read_part(&mut package, &part)?;
            let (shapes, connections, texts) = page_contents(&xml)?;
            if shapes == 0 && texts.is_empty() {
                continue;
            }
            blocks.push(ContentBlock::Diagram {
                page,
                name: page_names.get(idx).cloned(),
                shapes,
                connections,
                texts,
            });
        }

        if blocks.is_empty() {
            return Err(ParseError::empty("diagram has no shapes"));
        }
        Ok(ParsedContent::ok(blocks))
    }
}

fn page_names(xml: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut names = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Page" => {
                names.push(
                    ooxml::attr(&e, b"NameU")
                        .or_else(|| ooxml::attr(&e, b"Name"))
                        .unwrap_or_default(),
                );
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn page_contents(xml: &[u8]) -> Result<(usize, usize, Vec<String>), ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut shapes = 0usize;
    let mut connections = 0usize;
    let mut texts = Vec::new();
    let mut text_depth = 0usize;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Shape" => shapes += 1,
                b"Connect" => connections += 1,
                b"Text" => {
                    text_depth += 1;
                    if text_depth == 1 {
                        current.clear();
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"Shape" => shapes += 1,
                b"Connect" => connections += 1,
                _ => {}
            },
            Event::Text(te) if text_depth > 0 => {
                current.push_str(&te.unescape()?);
                current.push(' ');
            }
            Event::End(e) if e.local_name().as_ref() == b"Text" => {
                text_depth = text_depth.saturating_sub(1);
                if text_depth == 0 {
                    let text = normalize_ws(&current);
                    if !text.is_empty() {
                        texts.push(text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok((shapes, connections, texts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseFailureKind;
    use crate::parsers::test_support::zip_of;
    use crate::parsers::{ParseLimits, ParserRegistry};
    use std::cell::Cell;

    fn parse(bytes: &[u8]) -> Result<ParsedContent, ParseError> {
        let reg = ParserRegistry::with_defaults();
        let entries = Cell::new(0);
        let limits = ParseLimits {
            max_bytes: 1 << 20,
            max_depth: 2,
            max_entries: 10,
        };
        VsdxParser.parse(bytes, &ParseContext::new(&reg, limits, &entries))
    }

    #[test]
    fn counts_shapes_connections_and_text() {
        let page = br#"<PageContents><Shapes>
            <Shape ID="1"><Text>Sensor<cp IX="0"/> input</Text></Shape>
            <Shape ID="2"><Text>Controller</Text></Shape>
            <Shape ID="3"/>
          </Shapes><Connects><Connect FromSheet="3" ToSheet="1"/><Connect FromSheet="3" ToSheet="2"/></Connects></PageContents>"#;
        let bytes = zip_of(&[
            ("visio/document.xml", b"<VisioDocument/>"),
            ("visio/pages/pages.xml", br#"<Pages><Page ID="0" NameU="Context"/></Pages>"#),
            ("visio/pages/page1.xml", page),
        ]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(
            parsed.blocks,
            vec![ContentBlock::Diagram {
                page: 1,
                name: Some("Context".into()),
                shapes: 3,
                connections: 2,
                texts: vec!["Sensor input".into(), "Controller".into()],
            }]
        );
    }

    #[test]
    fn diagram_without_shapes_is_empty() {
        let bytes = zip_of(&[
            ("visio/document.xml", b"<VisioDocument/>"),
            ("visio/pages/page1.xml", b"<PageContents/>"),
        ]);
        assert_eq!(parse(&bytes).unwrap_err().kind, ParseFailureKind::Empty);
    }
}
