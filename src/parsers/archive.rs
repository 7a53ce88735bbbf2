//! Zip archives. Every member is handed back to the registry and becomes a
//! [`ContentBlock::Member`]; nested archives recurse up to the configured
//! depth, and the member count is capped across all nesting levels.
//! Empty members follow `parsing.empty_policy` just like top-level files.

use std::io::{Cursor, Read};

use super::{FormatParser, ParseContext, ParsedContent, Probe};
use crate::config::EmptyPolicy;
use crate::error::{ParseError, ParseFailureKind};
use crate::models::{ContentBlock, FormatKind, ParseStatus};

pub struct ArchiveParser;

impl FormatParser for ArchiveParser {
    fn kind(&self) -> FormatKind {
        FormatKind::Archive
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    /// Any zip container not claimed by an earlier OOXML parser.
    fn sniff(&self, probe: &Probe<'_>) -> bool {
        probe.is_zip()
    }

    fn parse(&self, bytes: &[u8], ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError> {
        let level = ctx.depth + 1;
        if level > ctx.limits.max_depth {
            return Err(ParseError::too_large(format!(
                "archive nesting level {} exceeds limit of {}",
                level, ctx.limits.max_depth
            )));
        }

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let member_ctx = ctx.nested();
        let max_bytes = ctx.limits.max_bytes;

        let mut blocks = Vec::new();
        let mut files = 0usize;
        let mut parsed = 0usize;
        let mut first_failure: Option<ParseError> = None;
        let mut truncated = false;

        for i in 0..archive.len() {
            let (name, data) = {
                let entry = match archive.by_index(i) {
                    Ok(e) => e,
                    Err(e) => {
                        let err = ParseError::corrupt(format!("member #{}: {}", i, e));
                        first_failure.get_or_insert(err);
                        continue;
                    }
                };
                if entry.is_dir() || entry.name().starts_with("__MACOSX/") {
                    continue;
                }
                files += 1;
                if ctx.entries_seen() >= ctx.limits.max_entries {
                    truncated = true;
                    break;
                }
                ctx.count_entry();

                let name = entry.name().to_string();
                let declared = entry.size();
                let mut data = Vec::new();
                let read = if declared > max_bytes {
                    Err(ParseError::too_large(format!(
                        "{} bytes exceeds ceiling of {} bytes",
                        declared, max_bytes
                    )))
                } else {
                    match entry.take(max_bytes + 1).read_to_end(&mut data) {
                        Err(e) => Err(ParseError::corrupt(format!("cannot decompress: {}", e))),
                        Ok(n) if n as u64 > max_bytes => Err(ParseError::too_large(format!(
                            "decompressed size exceeds ceiling of {} bytes",
                            max_bytes
                        ))),
                        Ok(_) => Ok(data),
                    }
                };
                (name, read)
            };

            let member = match data {
                Ok(data) => {
                    let (format, outcome) = ctx.registry.parse_bytes(&name, &data, &member_ctx);
                    match outcome {
                        Ok(content) => ContentBlock::Member {
                            name,
                            format,
                            status: content.status,
                            error: content.note,
                            blocks: content.blocks,
                        },
                        Err(e)
                            if e.kind == ParseFailureKind::Empty
                                && ctx.empty_policy == EmptyPolicy::Partial =>
                        {
                            ContentBlock::Member {
                                name,
                                format,
                                status: ParseStatus::Partial,
                                error: Some(e),
                                blocks: Vec::new(),
                            }
                        }
                        Err(e) => failed_member(name, format, e),
                    }
                }
                Err(e) => {
                    let format = ctx.registry.kind_for_name(&name);
                    failed_member(name, format, e)
                }
            };

            match &member {
                ContentBlock::Member {
                    status: ParseStatus::Failed,
                    name,
                    error: Some(e),
                    ..
                } => {
                    first_failure.get_or_insert_with(|| ParseError::new(e.kind, format!("{}: {}", name, e.cause)));
                }
                _ => parsed += 1,
            }
            blocks.push(member);
        }

        if files == 0 {
            return Err(ParseError::empty("archive has no entries"));
        }

        let cap_note = || {
            ParseError::too_large(format!(
                "archive entry cap of {} reached",
                ctx.limits.max_entries
            ))
        };

        if parsed == 0 {
            return Err(first_failure.unwrap_or_else(cap_note));
        }
        if truncated {
            return Ok(ParsedContent::partial(blocks, cap_note()));
        }
        match first_failure {
            Some(e) => Ok(ParsedContent::partial(blocks, e)),
            None => Ok(ParsedContent::ok(blocks)),
        }
    }
}

fn failed_member(name: String, format: FormatKind, error: ParseError) -> ContentBlock {
    ContentBlock::Member {
        name,
        format,
        status: ParseStatus::Failed,
        error: Some(error),
        blocks: Vec::new(),
    }
}
