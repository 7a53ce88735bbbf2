//! Markdown via `pulldown-cmark`. Front matter is dropped; headings, paragraphs,
//! list items, code blocks, tables, and links become content blocks.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

use super::{normalize_ws, FormatParser, ParseContext, ParsedContent};
use crate::error::ParseError;
use crate::models::{ContentBlock, FormatKind};

pub struct MarkdownParser;

impl FormatParser for MarkdownParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Markdown
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown", "mdown"]
    }

    fn parse(&self, bytes: &[u8], _ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ParseError::corrupt(format!("markdown is not valid UTF-8: {}", e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let blocks = markdown_blocks(strip_front_matter(text));
        if blocks.is_empty() {
            return Err(ParseError::empty("markdown has no content"));
        }
        Ok(ParsedContent::ok(blocks))
    }
}

/// Drop a leading `---` ... `---` YAML block.
fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" || line.trim_end() == "..." {
            return &rest[offset..];
        }
    }
    text
}

fn markdown_blocks(text: &str) -> Vec<ContentBlock> {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;

    let mut blocks = Vec::new();
    let mut pending_links: Vec<ContentBlock> = Vec::new();
    let mut current = String::new();
    let mut link: Option<(String, usize)> = None;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();

    for event in Parser::new_ext(text, options) {
        match event {
            Event::Start(Tag::Heading { .. })
            | Event::Start(Tag::Paragraph)
            | Event::Start(Tag::Item)
            | Event::Start(Tag::CodeBlock(_)) => {
                // A tight list item's text precedes any nested list.
                let text = normalize_ws(&current);
                if !text.is_empty() {
                    flush(&mut blocks, Some(ContentBlock::Paragraph { text }), &mut pending_links);
                }
                current.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                let text = normalize_ws(&current);
                let block = (!text.is_empty()).then(|| ContentBlock::Heading {
                    level: level as u8,
                    text,
                });
                flush(&mut blocks, block, &mut pending_links);
                current.clear();
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) | Event::End(TagEnd::CodeBlock) => {
                let text = normalize_ws(&current);
                let block = (!text.is_empty()).then(|| ContentBlock::Paragraph { text });
                flush(&mut blocks, block, &mut pending_links);
                current.clear();
            }
            Event::Start(Tag::Table(_)) => rows.clear(),
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => row.clear(),
            Event::Start(Tag::TableCell) => current.clear(),
            Event::End(TagEnd::TableCell) => {
                row.push(normalize_ws(&current));
                current.clear();
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                rows.push(std::mem::take(&mut row));
            }
            Event::End(TagEnd::Table) => {
                let block = (!rows.is_empty()).then(|| ContentBlock::Table {
                    name: None,
                    rows: std::mem::take(&mut rows),
                });
                flush(&mut blocks, block, &mut pending_links);
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                link = Some((dest_url.to_string(), current.len()));
            }
            Event::End(TagEnd::Link) => {
                if let Some((target, start)) = link.take() {
                    let text = normalize_ws(current.get(start..).unwrap_or_default());
                    pending_links.push(ContentBlock::Link { target, text });
                }
            }
            Event::Text(t) | Event::Code(t) => current.push_str(&t),
            Event::Html(t) | Event::InlineHtml(t) => {
                if !t.trim_start().starts_with("<!--") {
                    current.push_str(&strip_tags(&t));
                }
            }
            Event::SoftBreak | Event::HardBreak => current.push(' '),
            _ => {}
        }
    }

    let text = normalize_ws(&current);
    let block = (!text.is_empty()).then(|| ContentBlock::Paragraph { text });
    flush(&mut blocks, block, &mut pending_links);
    blocks
}

/// Push a finished block followed by the links found inside it.
fn flush(blocks: &mut Vec<ContentBlock>, block: Option<ContentBlock>, links: &mut Vec<ContentBlock>) {
    if let Some(b) = block {
        blocks.push(b);
    }
    blocks.append(links);
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_matter_is_stripped() {
        let text = "---\ntitle: x\n---\n# Heading\n";
        assert_eq!(strip_front_matter(text), "# Heading\n");
        assert_eq!(strip_front_matter("no front matter"), "no front matter");
        assert_eq!(strip_front_matter("---\nunterminated"), "---\nunterminated");
    }

    #[test]
    fn headings_paragraphs_links_and_tables() {
        let md = "# Title\n\nSee [the guide](guide.md) now.\n\n## Table\n\n| ID | Text |\n|----|------|\n| R-1 | Boot |\n";
        let blocks = markdown_blocks(md);
        assert_eq!(
            blocks,
            vec![
                ContentBlock::Heading {
                    level: 1,
                    text: "Title".into()
                },
                ContentBlock::Paragraph {
                    text: "See the guide now.".into()
                },
                ContentBlock::Link {
                    target: "guide.md".into(),
                    text: "the guide".into()
                },
                ContentBlock::Heading {
                    level: 2,
                    text: "Table".into()
                },
                ContentBlock::Table {
                    name: None,
                    rows: vec![
                        vec!["ID".into(), "Text".into()],
                        vec!["R-1".into(), "Boot".into()]
                    ]
                },
            ]
        );
    }

    #[test]
    fn tight_list_items_become_paragraphs() {
        let blocks = markdown_blocks("- one\n- two\n  - nested\n");
        let texts: Vec<String> = blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Paragraph { text } => text.clone(),
                other => panic!("unexpected block {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two", "nested"]);
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert!(markdown_blocks("  \n\n<!-- comment -->\n").is_empty());
    }
}
