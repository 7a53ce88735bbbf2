//! PDF documents via `pdf-extract`, split into page blocks on form feeds.

use super::{FormatParser, ParseContext, ParsedContent, Probe};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

const PDF_MAGIC: &[u8] = b"%PDF-";

pub struct PdfParser;

impl FormatParser for PdfParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Pdf
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, probe: &Probe<'_>) -> bool {
        probe.starts_with(PDF_MAGIC)
    }

    fn parse(&self, bytes: &[u8], _ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(ParseError::corrupt("missing %PDF- header"));
        }
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ParseError::corrupt(format!("PDF extraction failed: {}", e)))?;

        let blocks = pages(&text);
        if blocks.is_empty() {
            return Err(ParseError::empty("PDF has no extractable text"));
        }
        Ok(ParsedContent::ok(blocks))
    }
}

fn pages(text: &str) -> Vec<ContentBlock> {
    text.split('\x0c')
        .enumerate()
        .filter_map(|(i, page)| {
            let page = page.trim();
            if page.is_empty() {
                None
            } else {
                Some(ContentBlock::Page {
                    number: i as u32 + 1,
                    text: page.to_string(),
                })
            }
        })
        .collect()
}
