//! Format parsers and the registry that selects between them.
//!
//! Each parser declares the extensions it owns and, for binary containers,
//! a signature it can recognize from the file's leading bytes or zip entry
//! list. Selection is by extension first; when the extension's parser
//! declares a signature that the bytes do not carry, the registry looks for
//! another parser whose signature matches (a renamed file). Files with no
//! known extension are identified by signature alone.
//!
//! Registration order is also sniffing order:
//!
//! | # | Parser | Extensions | Signature |
//! |---|--------|------------|-----------|
//! | 1 | [`pdf`] | `.pdf` | `%PDF-` |
//! | 2 | [`docx`] | `.docx` | zip with `word/document.xml` |
//! | 3 | [`xlsx`] | `.xlsx` | zip with `xl/workbook.xml` |
//! | 4 | [`pptx`] | `.pptx` | zip with `ppt/presentation.xml` |
//! | 5 | [`vsdx`] | `.vsdx` | zip with `visio/document.xml` |
//! | 6 | [`archive`] | `.zip` | any other zip |
//! | 7 | [`markdown`] | `.md`, `.markdown`, `.mdown` | none |
//! | 8 | [`text`] | `.txt`, `.text`, `.log`, `.csv` | none |
//!
//! The registry never lets a parser fault escape: every outcome, including
//! a panic inside a decoding library, becomes an [`ArtifactRecord`].

pub mod archive;
pub mod docx;
pub mod markdown;
mod ooxml;
pub mod pdf;
pub mod pptx;
pub mod text;
pub mod vsdx;
pub mod xlsx;

use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::{Config, EmptyPolicy};
use crate::discovery::Candidate;
use crate::error::{ParseError, ParseFailureKind};
use crate::models::{ArtifactRecord, ContentBlock, FormatKind, ParseStatus};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

/// Resource bounds applied while parsing one top-level file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Size ceiling for a file or a decompressed archive member.
    pub max_bytes: u64,
    /// Maximum archive nesting that is expanded.
    pub max_depth: u32,
    /// Aggregate archive member cap across all nesting levels.
    pub max_entries: usize,
}

/// Everything the registry needs to turn a candidate into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub limits: ParseLimits,
    pub empty_policy: EmptyPolicy,
    /// Record a SHA-256 of the content in the fingerprint.
    pub hash_content: bool,
}

impl ParseOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limits: ParseLimits {
                max_bytes: config.discovery.max_file_bytes,
                max_depth: config.archive.max_depth,
                max_entries: config.archive.max_entries,
            },
            empty_policy: config.parsing.empty_policy,
            hash_content: config.cache.verify_content_hash,
        }
    }
}

/// Per-parse state handed to parsers; archives use it to recurse.
pub struct ParseContext<'a> {
    pub registry: &'a ParserRegistry,
    pub limits: ParseLimits,
    /// Archive nesting level of the bytes being parsed (0 = top-level file).
    pub depth: u32,
    /// How archives treat empty members; top-level files are handled by
    /// [`ParserRegistry::parse_candidate`].
    pub empty_policy: EmptyPolicy,
    entries: &'a Cell<usize>,
}

impl<'a> ParseContext<'a> {
    pub fn new(registry: &'a ParserRegistry, limits: ParseLimits, entries: &'a Cell<usize>) -> Self {
        Self {
            registry,
            limits,
            depth: 0,
            empty_policy: EmptyPolicy::default(),
            entries,
        }
    }

    pub fn with_empty_policy(mut self, policy: EmptyPolicy) -> Self {
        self.empty_policy = policy;
        self
    }

    /// Context for the members of an archive opened at this level.
    pub fn nested(&self) -> ParseContext<'a> {
        ParseContext {
            registry: self.registry,
            limits: self.limits,
            depth: self.depth + 1,
            empty_policy: self.empty_policy,
            entries: self.entries,
        }
    }

    /// Archive members expanded so far under the current top-level file.
    pub fn entries_seen(&self) -> usize {
        self.entries.get()
    }

    pub fn count_entry(&self) {
        self.entries.set(self.entries.get() + 1);
    }
}

/// Successful parser output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedContent {
    pub blocks: Vec<ContentBlock>,
    pub status: ParseStatus,
    /// Why the content is only partial.
    pub note: Option<ParseError>,
}

impl ParsedContent {
    pub fn ok(blocks: Vec<ContentBlock>) -> Self {
        Self {
            blocks,
            status: ParseStatus::Ok,
            note: None,
        }
    }

    pub fn partial(blocks: Vec<ContentBlock>, note: ParseError) -> Self {
        Self {
            blocks,
            status: ParseStatus::Partial,
            note: Some(note),
        }
    }
}

/// What the registry learned from a file's bytes before choosing a parser.
pub struct Probe<'a> {
    pub bytes: &'a [u8],
    zip_entries: Option<Vec<String>>,
}

impl<'a> Probe<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        let zip_entries = if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
            zip::ZipArchive::new(std::io::Cursor::new(bytes))
                .ok()
                .map(|a| a.file_names().map(|n| n.to_string()).collect())
        } else {
            None
        };
        Self { bytes, zip_entries }
    }

    pub fn starts_with(&self, magic: &[u8]) -> bool {
        self.bytes.starts_with(magic)
    }

    pub fn is_zip(&self) -> bool {
        self.zip_entries.is_some()
    }

    pub fn has_zip_entry(&self, name: &str) -> bool {
        self.zip_entries
            .as_ref()
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }
}

/// A parser for one input format.
pub trait FormatParser: Send + Sync {
    fn kind(&self) -> FormatKind;

    /// Lowercase extensions without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether the format carries a recognizable binary signature.
    fn has_signature(&self) -> bool {
        false
    }

    /// True when the probed bytes carry this parser's signature.
    fn sniff(&self, _probe: &Probe<'_>) -> bool {
        false
    }

    fn parse(&self, bytes: &[u8], ctx: &ParseContext<'_>) -> Result<ParsedContent, ParseError>;
}

/// Ordered collection of parsers.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn FormatParser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// All built-in parsers in their documented order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(pdf::PdfParser));
        registry.register(Box::new(docx::DocxParser));
        registry.register(Box::new(xlsx::XlsxParser));
        registry.register(Box::new(pptx::PptxParser));
        registry.register(Box::new(vsdx::VsdxParser));
        registry.register(Box::new(archive::ArchiveParser));
        registry.register(Box::new(markdown::MarkdownParser));
        registry.register(Box::new(text::TextParser));
        registry
    }

    pub fn register(&mut self, parser: Box<dyn FormatParser>) {
        self.parsers.push(parser);
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    fn by_extension(&self, name: &str) -> Option<&dyn FormatParser> {
        let ext = extension_of(name)?;
        self.parsers
            .iter()
            .find(|p| p.extensions().contains(&ext.as_str()))
            .map(|p| p.as_ref())
    }

    fn by_signature(&self, probe: &Probe<'_>) -> Option<&dyn FormatParser> {
        self.parsers
            .iter()
            .find(|p| p.has_signature() && p.sniff(probe))
            .map(|p| p.as_ref())
    }

    /// Pick the parser for a file name and its probed bytes.
    pub fn select(&self, name: &str, probe: &Probe<'_>) -> Option<&dyn FormatParser> {
        match self.by_extension(name) {
            Some(p) if !p.has_signature() || p.sniff(probe) => Some(p),
            Some(p) => self.by_signature(probe).or(Some(p)),
            None => self.by_signature(probe),
        }
    }

    /// Format implied by the name alone, for files that are never read.
    pub fn kind_for_name(&self, name: &str) -> FormatKind {
        self.by_extension(name)
            .map(|p| p.kind())
            .unwrap_or(FormatKind::Unknown)
    }

    /// Parse in-memory bytes. Used for top-level files and archive members.
    pub fn parse_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        ctx: &ParseContext<'_>,
    ) -> (FormatKind, Result<ParsedContent, ParseError>) {
        let probe = Probe::new(bytes);
        let parser = match self.select(name, &probe) {
            Some(p) => p,
            None => {
                return (
                    FormatKind::Unknown,
                    Err(ParseError::unsupported(format!(
                        "no parser for '{}'",
                        name.rsplit('/').next().unwrap_or(name)
                    ))),
                )
            }
        };

        let kind = parser.kind();
        let outcome = catch_unwind(AssertUnwindSafe(|| parser.parse(bytes, ctx)))
            .unwrap_or_else(|_| Err(ParseError::corrupt(format!("{} decoder panicked", kind))));
        (kind, outcome)
    }

    /// Read, parse, and normalize one discovered file. Never fails: every
    /// problem is carried in the returned record.
    pub fn parse_candidate(&self, candidate: &Candidate, options: &ParseOptions) -> ArtifactRecord {
        let fingerprint = candidate.fingerprint();
        let limits = options.limits;

        if candidate.oversized || candidate.size > limits.max_bytes {
            return ArtifactRecord::failed(
                fingerprint,
                self.kind_for_name(&candidate.rel_path),
                ParseError::too_large(format!(
                    "{} bytes exceeds ceiling of {} bytes",
                    candidate.size, limits.max_bytes
                )),
            );
        }

        let bytes = match std::fs::read(&candidate.path) {
            Ok(b) => b,
            Err(e) => {
                return ArtifactRecord::failed(
                    fingerprint,
                    self.kind_for_name(&candidate.rel_path),
                    ParseError::corrupt(format!("read failed: {}", e)),
                )
            }
        };

        let fingerprint = if options.hash_content {
            fingerprint.with_content_hash(content_hash(&bytes))
        } else {
            fingerprint
        };

        if bytes.len() as u64 > limits.max_bytes {
            return ArtifactRecord::failed(
                fingerprint,
                self.kind_for_name(&candidate.rel_path),
                ParseError::too_large(format!(
                    "{} bytes exceeds ceiling of {} bytes",
                    bytes.len(),
                    limits.max_bytes
                )),
            );
        }

        let entries = Cell::new(0);
        let ctx = ParseContext::new(self, limits, &entries).with_empty_policy(options.empty_policy);
        let (format, outcome) = self.parse_bytes(&candidate.rel_path, &bytes, &ctx);

        match outcome {
            Ok(content) => ArtifactRecord {
                path: fingerprint.path.clone(),
                size: fingerprint.size,
                modified_ns: fingerprint.mtime_ns,
                fingerprint,
                format,
                blocks: content.blocks,
                status: content.status,
                error: content.note,
            },
            Err(e)
                if e.kind == ParseFailureKind::Empty
                    && options.empty_policy == EmptyPolicy::Partial =>
            {
                ArtifactRecord {
                    path: fingerprint.path.clone(),
                    size: fingerprint.size,
                    modified_ns: fingerprint.mtime_ns,
                    fingerprint,
                    format,
                    blocks: Vec::new(),
                    status: ParseStatus::Partial,
                    error: Some(e),
                }
            }
            Err(e) => ArtifactRecord::failed(fingerprint, format, e),
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Hex SHA-256 of file content.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn extension_of(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Collapse runs of whitespace and trim.
pub(crate) fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::path::Path;

    fn limits() -> ParseLimits {
        ParseLimits {
            max_bytes: 1024 * 1024,
            max_depth: 2,
            max_entries: 100,
        }
    }

    fn options() -> ParseOptions {
        ParseOptions {
            limits: limits(),
            empty_policy: EmptyPolicy::Partial,
            hash_content: false,
        }
    }

    fn candidate(dir: &Path, name: &str, bytes: &[u8]) -> Candidate {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        let (size, mtime_ns) = crate::discovery::stat(&path).unwrap();
        Candidate {
            path,
            rel_path: name.to_string(),
            size,
            mtime_ns,
            oversized: false,
        }
    }

    #[test]
    fn selects_by_extension() {
        let reg = ParserRegistry::with_defaults();
        let probe = Probe::new(b"# Title");
        assert_eq!(reg.select("a/b.MD", &probe).unwrap().kind(), FormatKind::Markdown);
        assert_eq!(reg.select("notes.txt", &probe).unwrap().kind(), FormatKind::Text);
    }

    #[test]
    fn renamed_docx_is_sniffed() {
        let reg = ParserRegistry::with_defaults();
        let bytes = docx_with_body("<w:p><w:r><w:t>hi</w:t></w:r></w:p>");
        let probe = Probe::new(&bytes);
        assert_eq!(reg.select("report.xlsx", &probe).unwrap().kind(), FormatKind::Docx);
        assert_eq!(reg.select("report.bin", &probe).unwrap().kind(), FormatKind::Docx);
    }

    #[test]
    fn unknown_extension_without_signature_is_unsupported() {
        let reg = ParserRegistry::with_defaults();
        let entries = Cell::new(0);
        let ctx = ParseContext::new(&reg, limits(), &entries);
        let (kind, outcome) = reg.parse_bytes("blob.xyz", b"plain words", &ctx);
        assert_eq!(kind, FormatKind::Unknown);
        assert_eq!(outcome.unwrap_err().kind, ParseFailureKind::Unsupported);
    }

    #[test]
    fn corrupt_spreadsheet_keeps_extension_parser() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ParserRegistry::with_defaults();
        let c = candidate(dir.path(), "budget.xlsx", b"this is not a zip file");
        let record = reg.parse_candidate(&c, &options());
        assert_eq!(record.format, FormatKind::Xlsx);
        assert_eq!(record.status, ParseStatus::Failed);
        assert_eq!(record.error.unwrap().kind, ParseFailureKind::Corrupt);
    }

    #[test]
    fn oversized_candidate_is_not_read() {
        let reg = ParserRegistry::with_defaults();
        let c = Candidate {
            path: "/does/not/exist.md".into(),
            rel_path: "exist.md".into(),
            size: 10_000_000,
            mtime_ns: 0,
            oversized: true,
        };
        let record = reg.parse_candidate(&c, &options());
        assert_eq!(record.error.unwrap().kind, ParseFailureKind::TooLarge);
        assert_eq!(record.format, FormatKind::Markdown);
    }

    #[test]
    fn empty_policy_controls_status() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ParserRegistry::with_defaults();
        let c = candidate(dir.path(), "empty.md", b"   \n");

        let partial = reg.parse_candidate(&c, &options());
        assert_eq!(partial.status, ParseStatus::Partial);
        assert_eq!(partial.error.as_ref().unwrap().kind, ParseFailureKind::Empty);

        let mut strict = options();
        strict.empty_policy = EmptyPolicy::Fail;
        let failed = reg.parse_candidate(&c, &strict);
        assert_eq!(failed.status, ParseStatus::Failed);
    }

    #[test]
    fn content_hash_recorded_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ParserRegistry::with_defaults();
        let c = candidate(dir.path(), "a.md", b"# A\n\nbody");
        let mut opts = options();
        opts.hash_content = true;
        let record = reg.parse_candidate(&c, &opts);
        assert_eq!(
            record.fingerprint.content_hash.as_deref(),
            Some(content_hash(b"# A\n\nbody").as_str())
        );
    }

    #[test]
    fn extension_of_handles_dotfiles() {
        assert_eq!(extension_of("dir/.hidden"), None);
        assert_eq!(extension_of("dir/file.Tar.GZ").as_deref(), Some("gz"));
        assert_eq!(extension_of("noext"), None);
    }
}
