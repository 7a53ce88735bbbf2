//! Core data models shared by the parsers, cache, classifier, and ranking.
//!
//! An [`ArtifactRecord`] is the normalized result of parsing one input file.
//! It is treated as an immutable value once produced: the cache hands out
//! `Arc<ArtifactRecord>` and nothing downstream mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::ParseError;

/// Input format of an artifact. Exactly one per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Markdown,
    Text,
    Pdf,
    Docx,
    Xlsx,
    Pptx,
    Vsdx,
    Archive,
    /// No parser claimed the file.
    Unknown,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Markdown => "markdown",
            FormatKind::Text => "text",
            FormatKind::Pdf => "pdf",
            FormatKind::Docx => "docx",
            FormatKind::Xlsx => "xlsx",
            FormatKind::Pptx => "pptx",
            FormatKind::Vsdx => "vsdx",
            FormatKind::Archive => "archive",
            FormatKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(FormatKind::Markdown),
            "text" => Ok(FormatKind::Text),
            "pdf" => Ok(FormatKind::Pdf),
            "docx" => Ok(FormatKind::Docx),
            "xlsx" => Ok(FormatKind::Xlsx),
            "pptx" => Ok(FormatKind::Pptx),
            "vsdx" => Ok(FormatKind::Vsdx),
            "archive" => Ok(FormatKind::Archive),
            other => Err(format!("unknown format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Ok,
    Partial,
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Ok => "ok",
            ParseStatus::Partial => "partial",
            ParseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Cache key for a source file: `(path, size, mtime)` plus an optional
/// SHA-256 of the content for stricter staleness checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    pub fn new(path: impl Into<String>, size: u64, mtime_ns: i64) -> Self {
        Self {
            path: path.into(),
            size,
            mtime_ns,
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, hash: String) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// True when the cheap part of the key (path, size, mtime) matches.
    pub fn same_stat(&self, other: &Fingerprint) -> bool {
        self.path == other.path && self.size == other.size && self.mtime_ns == other.mtime_ns
    }

    /// The key without the content hash, used for in-flight deduplication.
    pub fn stat_key(&self) -> (String, u64, i64) {
        (self.path.clone(), self.size, self.mtime_ns)
    }
}

/// One unit of ordered structural content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Heading {
        level: u8,
        text: String,
    },
    Paragraph {
        text: String,
    },
    Table {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        rows: Vec<Vec<String>>,
    },
    Slide {
        number: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        texts: Vec<String>,
    },
    Page {
        number: u32,
        text: String,
    },
    Diagram {
        page: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        shapes: usize,
        connections: usize,
        texts: Vec<String>,
    },
    Link {
        target: String,
        text: String,
    },
    /// A file inside a compressed container, parsed by its own parser.
    Member {
        name: String,
        format: FormatKind,
        status: ParseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ParseError>,
        blocks: Vec<ContentBlock>,
    },
}

impl ContentBlock {
    /// Visit every text fragment in this block, recursing into members.
    pub fn for_each_text<'a>(&'a self, f: &mut dyn FnMut(&'a str)) {
        match self {
            ContentBlock::Heading { text, .. }
            | ContentBlock::Paragraph { text }
            | ContentBlock::Page { text, .. } => f(text),
            ContentBlock::Table { rows, .. } => {
                for cell in rows.iter().flatten() {
                    f(cell);
                }
            }
            ContentBlock::Slide { title, texts, .. } => {
                if let Some(t) = title {
                    f(t);
                }
                for t in texts {
                    f(t);
                }
            }
            ContentBlock::Diagram { texts, .. } => {
                for t in texts {
                    f(t);
                }
            }
            ContentBlock::Link { text, .. } => f(text),
            ContentBlock::Member { blocks, .. } => {
                for b in blocks {
                    b.for_each_text(f);
                }
            }
        }
    }
}

/// Structural counts derived from a record's content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentStats {
    pub blocks: usize,
    pub words: usize,
    pub headings: usize,
    pub max_heading_level: u8,
    pub distinct_heading_levels: usize,
    pub tables: usize,
    pub table_rows: usize,
    pub links: usize,
    pub members: usize,
}

/// Normalized record for one parsed input document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Root-relative path with `/` separators.
    pub path: String,
    pub fingerprint: Fingerprint,
    pub format: FormatKind,
    pub blocks: Vec<ContentBlock>,
    pub size: u64,
    pub modified_ns: i64,
    pub status: ParseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ParseError>,
}

impl ArtifactRecord {
    /// Build a failed record carrying `error`.
    pub fn failed(fingerprint: Fingerprint, format: FormatKind, error: ParseError) -> Self {
        Self {
            path: fingerprint.path.clone(),
            size: fingerprint.size,
            modified_ns: fingerprint.mtime_ns,
            fingerprint,
            format,
            blocks: Vec::new(),
            status: ParseStatus::Failed,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ParseStatus::Failed
    }

    /// File name component of the path, lowercased.
    pub fn file_name_lower(&self) -> String {
        self.path
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
            .to_lowercase()
    }

    /// Concatenate all text fragments separated by newlines.
    pub fn full_text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            block.for_each_text(&mut |t| {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(t);
            });
        }
        out
    }

    pub fn stats(&self) -> ContentStats {
        let mut stats = ContentStats::default();
        let mut levels = [false; 7];
        collect_stats(&self.blocks, &mut stats, &mut levels);
        stats.distinct_heading_levels = levels.iter().filter(|l| **l).count();
        stats
    }
}

fn collect_stats(blocks: &[ContentBlock], stats: &mut ContentStats, levels: &mut [bool; 7]) {
    for block in blocks {
        stats.blocks += 1;
        if !matches!(block, ContentBlock::Member { .. }) {
            block.for_each_text(&mut |t| stats.words += t.split_whitespace().count());
        }
        match block {
            ContentBlock::Heading { level, .. } => {
                stats.headings += 1;
                let l = (*level).clamp(1, 6);
                levels[l as usize] = true;
                stats.max_heading_level = stats.max_heading_level.max(l);
            }
            ContentBlock::Slide { title: Some(_), .. } => {
                stats.headings += 1;
                levels[1] = true;
                stats.max_heading_level = stats.max_heading_level.max(1);
            }
            ContentBlock::Table { rows, .. } => {
                stats.tables += 1;
                stats.table_rows += rows.len();
            }
            ContentBlock::Link { .. } => stats.links += 1,
            ContentBlock::Member { blocks, .. } => {
                stats.members += 1;
                collect_stats(blocks, stats, levels);
            }
            _ => {}
        }
    }
}

/// A cached parse result, valid while its fingerprint matches the live file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub record: Arc<ArtifactRecord>,
    pub cached_at: DateTime<Utc>,
}

/// Potential bucket assigned by the ranking engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Medium, Tier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Tier::High),
            "medium" => Ok(Tier::Medium),
            "low" => Ok(Tier::Low),
            other => Err(format!("unknown tier '{}': use high, medium, or low", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(blocks: Vec<ContentBlock>) -> ArtifactRecord {
        ArtifactRecord {
            path: "docs/a.md".to_string(),
            fingerprint: Fingerprint::new("docs/a.md", 10, 1),
            format: FormatKind::Markdown,
            blocks,
            size: 10,
            modified_ns: 1,
            status: ParseStatus::Ok,
            error: None,
        }
    }

    #[test]
    fn stats_recurse_into_members() {
        let r = record(vec![
            ContentBlock::Heading {
                level: 1,
                text: "Intro".into(),
            },
            ContentBlock::Member {
                name: "inner.md".into(),
                format: FormatKind::Markdown,
                status: ParseStatus::Ok,
                error: None,
                blocks: vec![
                    ContentBlock::Heading {
                        level: 3,
                        text: "Deep heading".into(),
                    },
                    ContentBlock::Table {
                        name: None,
                        rows: vec![vec!["a".into(), "b".into()]],
                    },
                ],
            },
        ]);
        let stats = r.stats();
        assert_eq!(stats.headings, 2);
        assert_eq!(stats.max_heading_level, 3);
        assert_eq!(stats.distinct_heading_levels, 2);
        assert_eq!(stats.tables, 1);
        assert_eq!(stats.members, 1);
        assert_eq!(stats.words, 5);
    }

    #[test]
    fn full_text_joins_fragments_in_order() {
        let r = record(vec![
            ContentBlock::Paragraph {
                text: "first".into(),
            },
            ContentBlock::Slide {
                number: 1,
                title: Some("second".into()),
                texts: vec!["third".into()],
            },
        ]);
        assert_eq!(r.full_text(), "first\nsecond\nthird");
    }

    #[test]
    fn same_stat_ignores_content_hash() {
        let a = Fingerprint::new("a", 1, 2).with_content_hash("x".into());
        let b = Fingerprint::new("a", 1, 2);
        assert!(a.same_stat(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn file_name_lower_takes_last_component() {
        let mut r = record(Vec::new());
        r.path = "Docs/Sub/README.md".into();
        assert_eq!(r.file_name_lower(), "readme.md");
    }
}
