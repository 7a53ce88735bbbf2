//! PowerPoint decks: one slide block per slide with its title placeholder
//! separated from body text.

use quick_xml::events::Event;
use quick_xml::Reader;

use super::ooxml;
use super::{normalize_ws, FormatParser, ParseContext, ParsedContent, Probe};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

const PRESENTATION_PART: &str = "ppt/presentation.xml";
const SLIDE_PREFIX: &str = "ppt/slides/slide";

pub struct PptxParser;

impl FormatParser for PptxParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Pptx
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pptx"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, probe: &Probe<'_>) -> bool {
        probe.has_zip_entry(PRESENTATION_PART)
    }

    fn parse(&self, bytes: &[u8], _ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        let mut package = ooxml::open(bytes)?;
        let parts = ooxml::numbered_parts(&package, SLIDE_PREFIX);
        if parts.is_empty() && !ooxml::has_part(&package, PRESENTATION_PART) {
            return Err(ParseError::corrupt("ppt/presentation.xml not found"));
        }

        let mut blocks = Vec::new();
        for part in parts {
            let number = ooxml::part_number(&part, SLIDE_PREFIX).unwrap_or(0);
            let xml = ooxml::read_part(&mut package, &part)?;
            let (title, texts) = slide_text(&xml)?;
            if title.is_none() && texts.is_empty() {
                continue;
            }
            blocks.push(ContentBlock::Slide {
                number,
                title,
                texts,
            });
        }

        if blocks.is_empty() {
            return Err(ParseError::empty("presentation has no slide text"));
        }
        Ok(ParsedContent::ok(blocks))
    }
}

/// Title text (from a `title`/`ctrTitle` placeholder) and remaining paragraphs.
fn slide_text(xml: &[u8]) -> Result<(Option<String>, Vec<String>), ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut title: Option<String> = None;
    let mut texts = Vec::new();

    let mut shape_depth = 0usize;
    let mut shape_is_title = false;
    let mut shape_paras: Vec<String> = Vec::new();
    let mut para = String::new();
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"sp" => {
                    shape_depth += 1;
                    if shape_depth == 1 {
                        shape_is_title = false;
                        shape_paras.clear();
                    }
                }
                b"ph" => shape_is_title |= is_title_placeholder(&e),
                b"p" => para.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"ph" => shape_is_title |= is_title_placeholder(&e),
                b"br" => para.push(' '),
                _ => {}
            },
            Event::Text(te) if in_t => para.push_str(&te.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let text = normalize_ws(&para);
                    if !text.is_empty() {
                        if shape_depth > 0 {
                            shape_paras.push(text);
                        } else {
                            texts.push(text);
                        }
                    }
                    para.clear();
                }
                b"sp" => {
                    shape_depth = shape_depth.saturating_sub(1);
                    if shape_depth == 0 {
                        let paras = std::mem::take(&mut shape_paras);
                        if shape_is_title && title.is_none() && !paras.is_empty() {
                            title = Some(paras.join(" "));
                        } else {
                            texts.extend(paras);
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
    Ok((title, texts))
}

fn is_title_placeholder(e: &quick_xml::events::BytesStart<'_>) -> bool {
    matches!(
        ooxml::attr(e, b"type").as_deref(),
        Some("title") | Some("ctrTitle")
    )
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
        PptxParser.parse(bytes, &ParseContext::new(&reg, limits, &entries))
    }

    fn slide(title: &str, body: &str) -> String {
        format!(
            r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
              <p:sp><p:nvSpPr><p:nvPr><p:ph type="title"/></p:nvPr></p:nvSpPr>
                <p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp>
              <p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp>
            </p:spTree></p:cSld></p:sld>"#,
            title, body
        )
    }

    #[test]
    fn slides_in_numeric_order_with_titles() {
        let s1 = slide("Overview", "Goals");
        let s2 = slide("Design", "Interfaces");
        let bytes = zip_of(&[
            ("ppt/presentation.xml", b"<p:presentation/>"),
            ("ppt/slides/slide10.xml", s2.as_bytes()),
            ("ppt/slides/slide2.xml", s1.as_bytes()),
        ]);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(
            parsed.blocks,
            vec![
                ContentBlock::Slide {
                    number: 2,
                    title: Some("Overview".into()),
                    texts: vec!["Goals".into()]
                },
                ContentBlock::Slide {
                    number: 10,
                    title: Some("Design".into()),
                    texts: vec!["Interfaces".into()]
                },
            ]
        );
    }

    #[test]
    fn deck_without_text_is_empty() {
        let bytes = zip_of(&[
            ("ppt/presentation.xml", b"<p:presentation/>"),
            ("ppt/slides/slide1.xml", b"<p:sld/>"),
        ]);
        assert_eq!(parse(&bytes).unwrap_err().kind, ParseFailureKind::Empty);
    }
}
