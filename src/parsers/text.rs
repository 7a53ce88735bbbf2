//! Plain text: blank-line separated paragraphs.

use super::{normalize_ws, FormatParser, ParseContext, ParsedContent};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

pub struct TextParser;

impl FormatParser for TextParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Text
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "text", "log", "csv"]
    }

    fn parse(&self, bytes: &[u8], _ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        if bytes.contains(&0) {
            return Err(ParseError::corrupt("binary content in text file"));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ParseError::corrupt(format!("text is not valid UTF-8: {}", e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut blocks = Vec::new();
        let mut para = String::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                push_paragraph(&mut blocks, &mut para);
            } else {
                para.push_str(line);
                para.push(' ');
            }
        }
        push_paragraph(&mut blocks, &mut para);

        if blocks.is_empty() {
            return Err(ParseError::empty("text file is blank"));
        }
        Ok(ParsedContent::ok(blocks))
    }
}

fn push_paragraph(blocks: &mut Vec<ContentBlock>, para: &mut String) {
    let text = normalize_ws(para);
    if !text.is_empty() {
        blocks.push(ContentBlock::Paragraph { text });
    }
    para.clear();
}
