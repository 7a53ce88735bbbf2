//! Content classification.
//!
//! A [`Classifier`] runs an ordered list of independent [`Detector`]s over a
//! record and merges their [`CategoryTag`]s. Detector order is significant:
//! when two categories end with the same aggregate weight, the one first
//! emitted wins the primary slot.
//!
//! | # | Detector | Category |
//! |---|----------|----------|
//! | 1 | [`RequirementIds`] | `requirements` |
//! | 2 | [`TableDensity`] | `tabular` |
//! | 3 | [`HeadingDepth`] | `structured` |
//! | 4 | [`KeywordVocabulary`] | one per configured category |
//! | 5 | [`DocumentKind`] | `documentation` |
//!
//! The classifier also extracts [`ContentFeatures`], the counts the ranking
//! engine scores content richness from, so the text is scanned once.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::ClassifierConfig;
use crate::error::ConfigError;
use crate::models::{ArtifactRecord, ContentBlock};

/// Primary category of a record that no detector tagged.
pub const UNCLASSIFIED: &str = "unclassified";

/// Requirement identifiers such as `REQ-12` or `SRS-4.2.1`.
static REQUIREMENT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2,8}-\d+(?:\.\d+)*\b").expect("valid regex literal")
});
/// Normative `shall` statements.
static SHALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bshall\b").expect("valid regex literal"));
/// Numbered clauses such as `3.2.1` at the start of a fragment.
static NUMBERED_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+(?:\.\d+){2,}\b").expect("valid regex literal"));
/// Section and document cross references: `see section 4.2`, `refer to REQ-3`.
static CROSS_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:see|refer to|as defined in|per)\s+(?:section|clause|table|figure|appendix|annex|document|[A-Z]{2,8}-\d)")
        .expect("valid regex literal")
});

/// One detector's vote for a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTag {
    pub category: String,
    pub weight: f64,
    pub detector: &'static str,
}

/// Merged tags, one per category in first-seen order, plus the primary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationTags {
    pub tags: Vec<CategoryTag>,
    pub primary: String,
    pub primary_weight: f64,
}

impl ClassificationTags {
    /// Sum weights per category, keeping first-seen order; the highest
    /// aggregate wins and ties go to the earliest category.
    pub fn merge(raw: Vec<CategoryTag>) -> Self {
        let mut merged: Vec<CategoryTag> = Vec::new();
        for tag in raw {
            match merged.iter_mut().find(|t| t.category == tag.category) {
                Some(existing) => existing.weight += tag.weight,
                None => merged.push(tag),
            }
        }

        let mut primary: Option<&CategoryTag> = None;
        for tag in &merged {
            if primary.map(|p| tag.weight > p.weight).unwrap_or(true) {
                primary = Some(tag);
            }
        }
        let (primary, primary_weight) = match primary {
            Some(t) => (t.category.clone(), t.weight),
            None => (UNCLASSIFIED.to_string(), 0.0),
        };

        Self {
            tags: merged,
            primary,
            primary_weight,
        }
    }

    pub fn categories(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.category.clone()).collect()
    }
}

/// Counts derived from a record's text and structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentFeatures {
    pub words: usize,
    pub blocks: usize,
    pub headings: usize,
    pub max_heading_level: u8,
    pub distinct_heading_levels: usize,
    pub tables: usize,
    pub table_rows: usize,
    pub links: usize,
    pub requirement_ids: usize,
    pub shall_statements: usize,
    pub numbered_clauses: usize,
    pub cross_references: usize,
    /// First heading (or slide title) text, lowercased.
    pub first_heading: Option<String>,
}

impl ContentFeatures {
    pub fn extract(record: &ArtifactRecord) -> Self {
        let stats = record.stats();
        let mut features = ContentFeatures {
            words: stats.words,
            blocks: stats.blocks,
            headings: stats.headings,
            max_heading_level: stats.max_heading_level,
            distinct_heading_levels: stats.distinct_heading_levels,
            tables: stats.tables,
            table_rows: stats.table_rows,
            links: stats.links,
            first_heading: first_heading(&record.blocks),
            ..Default::default()
        };
        for block in &record.blocks {
            block.for_each_text(&mut |text| {
                features.requirement_ids += REQUIREMENT_ID.find_iter(text).count();
                features.shall_statements += SHALL.find_iter(text).count();
                if NUMBERED_CLAUSE.is_match(text) {
                    features.numbered_clauses += 1;
                }
                features.cross_references += CROSS_REFERENCE.find_iter(text).count();
            });
        }
        features
    }

    /// Requirement-like entries: IDs, `shall` statements, numbered clauses.
    pub fn requirement_entries(&self) -> usize {
        self.requirement_ids + self.shall_statements + self.numbered_clauses
    }

    /// Explicit links plus textual cross references.
    pub fn cross_refs(&self) -> usize {
        self.links + self.cross_references
    }
}

fn first_heading(blocks: &[ContentBlock]) -> Option<String> {
    for block in blocks {
        match block {
            ContentBlock::Heading { text, .. } => return Some(text.to_lowercase()),
            ContentBlock::Slide {
                title: Some(title), ..
            } => return Some(title.to_lowercase()),
            ContentBlock::Member { blocks, .. } => {
                if let Some(h) = first_heading(blocks) {
                    return Some(h);
                }
            }
            _ => {}
        }
    }
    None
}

/// An independent classification rule.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, record: &ArtifactRecord, features: &ContentFeatures) -> Vec<CategoryTag>;
}

fn tag(detector: &'static str, category: &str, weight: f64) -> CategoryTag {
    CategoryTag {
        category: category.to_string(),
        weight,
        detector,
    }
}

/// Requirement numbering → `requirements`. Weight is `entries / 10`,
/// saturating at 1.0.
pub struct RequirementIds;

impl Detector for RequirementIds {
    fn name(&self) -> &'static str {
        "requirement_ids"
    }

    fn detect(&self, _record: &ArtifactRecord, f: &ContentFeatures) -> Vec<CategoryTag> {
        let entries = f.requirement_entries();
        if entries == 0 {
            return Vec::new();
        }
        vec![tag(self.name(), "requirements", (entries as f64 / 10.0).min(1.0))]
    }
}

/// Share of blocks that are tables, and how many rows they hold → `tabular`.
pub struct TableDensity;

impl Detector for TableDensity {
    fn name(&self) -> &'static str {
        "table_density"
    }

    fn detect(&self, _record: &ArtifactRecord, f: &ContentFeatures) -> Vec<CategoryTag> {
        if f.tables == 0 || f.blocks == 0 {
            return Vec::new();
        }
        let share = f.tables as f64 / f.blocks as f64;
        let rows = f.table_rows as f64;
        let weight = 0.6 * (2.0 * share).min(1.0) + 0.4 * rows / (rows + 20.0);
        vec![tag(self.name(), "tabular", weight)]
    }
}

/// Heading hierarchy → `structured`.
pub struct HeadingDepth;

impl Detector for HeadingDepth {
    fn name(&self) -> &'static str {
        "heading_depth"
    }

    fn detect(&self, _record: &ArtifactRecord, f: &ContentFeatures) -> Vec<CategoryTag> {
        if f.headings == 0 {
            return Vec::new();
        }
        let depth = (f.distinct_heading_levels as f64 / 3.0).min(1.0);
        let count = (f.headings as f64 / 10.0).min(1.0);
        vec![tag(self.name(), "structured", 0.5 * depth + 0.5 * count)]
    }
}

/// Configured `category → keywords` vocabulary. Matching is whole-word and
/// case-insensitive; each matching category gets one tag weighted
/// `hits / 10`, saturating at 1.0.
pub struct KeywordVocabulary {
    categories: Vec<(String, Regex)>,
}

impl KeywordVocabulary {
    pub fn new(keywords: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut categories = Vec::new();
        for (category, words) in keywords {
            let alternatives: Vec<String> = words
                .iter()
                .map(|w| w.trim())
                .filter(|w| !w.is_empty())
                .map(regex::escape)
                .collect();
            if alternatives.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            let re = Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
                field: "classifier.keywords",
                reason: format!("category '{}': {}", category, e),
            })?;
            categories.push((category.clone(), re));
        }
        Ok(Self { categories })
    }
}

impl Detector for KeywordVocabulary {
    fn name(&self) -> &'static str {
        "keyword_vocabulary"
    }

    fn detect(&self, record: &ArtifactRecord, _f: &ContentFeatures) -> Vec<CategoryTag> {
        let mut hits = vec![0usize; self.categories.len()];
        for block in &record.blocks {
            block.for_each_text(&mut |text| {
                for (i, (_, re)) in self.categories.iter().enumerate() {
                    hits[i] += re.find_iter(text).count();
                }
            });
        }
        self.categories
            .iter()
            .zip(hits)
            .filter(|(_, n)| *n > 0)
            .map(|((category, _), n)| tag(self.name(), category, (n as f64 / 10.0).min(1.0)))
            .collect()
    }
}

/// README / changelog / API reference / guide documents → `documentation`.
/// A file-name match weighs 0.8, a first-heading match 0.5.
pub struct DocumentKind;

const KIND_NAMES: &[&str] = &[
    "readme",
    "changelog",
    "changes",
    "history",
    "api",
    "guide",
    "tutorial",
    "howto",
    "manual",
];
const KIND_HEADINGS: &[&str] = &[
    "readme",
    "changelog",
    "release notes",
    "api reference",
    "api documentation",
    "getting started",
    "tutorial",
    "user guide",
    "installation",
];

impl DocumentKind {
    pub fn kind_of(record: &ArtifactRecord, f: &ContentFeatures) -> Option<(&'static str, f64)> {
        let name = record.file_name_lower();
        let stem = name.split('.').next().unwrap_or(&name);
        let by_name = KIND_NAMES
            .iter()
            .find(|k| stem == **k || stem.starts_with(&format!("{}_", k)) || stem.starts_with(&format!("{}-", k)));
        if let Some(kind) = by_name {
            return Some((*kind, 0.8));
        }
        let heading = f.first_heading.as_deref()?;
        KIND_HEADINGS
            .iter()
            .find(|k| heading.contains(**k))
            .map(|k| (*k, 0.5))
    }
}

impl Detector for DocumentKind {
    fn name(&self) -> &'static str {
        "document_kind"
    }

    fn detect(&self, record: &ArtifactRecord, f: &ContentFeatures) -> Vec<CategoryTag> {
        match Self::kind_of(record, f) {
            Some((_, weight)) => vec![tag(self.name(), "documentation", weight)],
            None => Vec::new(),
        }
    }
}

/// Output of [`Classifier::classify`].
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tags: ClassificationTags,
    pub features: ContentFeatures,
}

pub struct Classifier {
    detectors: Vec<Box<dyn Detector>>,
}

impl Classifier {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    /// The built-in detectors in their documented order.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(vec![
            Box::new(RequirementIds),
            Box::new(TableDensity),
            Box::new(HeadingDepth),
            Box::new(KeywordVocabulary::new(&config.keywords)?),
            Box::new(DocumentKind),
        ]))
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Classify a parsed record. Failed records carry no content and are
    /// never classified.
    pub fn classify(&self, record: &ArtifactRecord) -> Option<Classification> {
        if record.is_failed() {
            return None;
        }
        let features = ContentFeatures::extract(record);
        let raw: Vec<CategoryTag> = self
            .detectors
            .iter()
            .flat_map(|d| d.detect(record, &features))
            .collect();
        Some(Classification {
            tags: ClassificationTags::merge(raw),
            features,
        })
    }
}
