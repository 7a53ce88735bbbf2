//! The persisted artifact index.
//!
//! Produces `index.json`: every ranked artifact in rank order, the tier
//! histogram, and every failed file with its failure kind. The index holds
//! no timestamps, so an unchanged corpus yields a byte-identical file.
//!
//! All writes go through [`write_atomic`]: the previous file is only ever
//! replaced by a complete new one.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ParseFailureKind, PersistenceError};
use crate::models::{ArtifactRecord, FormatKind, ParseStatus, Tier};
use crate::ranking::{RankedArtifact, ScoreBreakdown};

/// Bumped when the index layout changes incompatibly.
pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub format: FormatKind,
    pub primary_category: String,
    pub score: f64,
    pub tier: Tier,
    pub status: ParseStatus,
    pub tags: Vec<String>,
    pub breakdown: ScoreBreakdown,
    /// Rank among artifacts of the same format, out of `group_size`.
    pub group_position: usize,
    pub group_size: usize,
}

impl From<&RankedArtifact> for IndexEntry {
    fn from(r: &RankedArtifact) -> Self {
        Self {
            path: r.path.clone(),
            format: r.format,
            primary_category: r.primary_category.clone(),
            score: r.score,
            tier: r.tier,
            status: r.status,
            tags: r.tags.clone(),
            breakdown: r.breakdown,
            group_position: r.group_position,
            group_size: r.group_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub path: String,
    pub format: FormatKind,
    pub kind: ParseFailureKind,
    pub cause: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl TierCounts {
    pub fn add(&mut self, tier: Tier) {
        match tier {
            Tier::High => self.high += 1,
            Tier::Medium => self.medium += 1,
            Tier::Low => self.low += 1,
        }
    }

    pub fn get(&self, tier: Tier) -> u64 {
        match tier {
            Tier::High => self.high,
            Tier::Medium => self.medium,
            Tier::Low => self.low,
        }
    }

    pub fn total(&self) -> u64 {
        self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub version: u32,
    /// Rank order: score descending, then path.
    pub artifacts: Vec<IndexEntry>,
    pub tier_counts: TierCounts,
    /// Sorted by path.
    pub failures: Vec<FailureEntry>,
}

impl ArtifactIndex {
    /// Assemble the index from ranked artifacts (already in rank order)
    /// and the records that failed to parse.
    pub fn build<'a>(
        ranked: &[RankedArtifact],
        failed: impl IntoIterator<Item = &'a ArtifactRecord>,
    ) -> Self {
        let mut tier_counts = TierCounts::default();
        for r in ranked {
            tier_counts.add(r.tier);
        }

        let mut failures: Vec<FailureEntry> = failed
            .into_iter()
            .map(|record| {
                let (kind, cause) = match &record.error {
                    Some(e) => (e.kind, e.cause.clone()),
                    None => (ParseFailureKind::Corrupt, "unknown failure".to_string()),
                };
                FailureEntry {
                    path: record.path.clone(),
                    format: record.format,
                    kind,
                    cause,
                }
            })
            .collect();
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        Self {
            version: INDEX_VERSION,
            artifacts: ranked.iter().map(IndexEntry::from).collect(),
            tier_counts,
            failures,
        }
    }

    /// The first `n` artifacts in rank order, optionally restricted to one tier.
    pub fn top(&self, n: usize, tier: Option<Tier>) -> Vec<&IndexEntry> {
        self.artifacts
            .iter()
            .filter(|e| tier.map_or(true, |t| e.tier == t))
            .take(n)
            .collect()
    }

    /// The `n` best artifacts of one format, in group order.
    pub fn top_in_group(&self, n: usize, format: FormatKind) -> Vec<&IndexEntry> {
        self.artifacts
            .iter()
            .filter(|e| e.format == format)
            .take(n)
            .collect()
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(|source| PersistenceError::Serialize {
            what: "artifact index",
            source,
        })
    }

    /// Atomically replace the index file at `path`.
    pub fn write(&self, path: &Path) -> Result<(), PersistenceError> {
        let mut json = self.to_json()?;
        json.push('\n');
        write_atomic(path, json.as_bytes())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `<path>.tmp` in the same directory, flush, and rename
/// over `path`. On failure the temporary file is removed and any existing
/// file at `path` is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }

    let tmp = tmp_path_for(path);
    let result = (|| {
        let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, path).map_err(|e| io_error(path, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Append one line to a JSON-lines file, creating it if needed.
pub fn append_line(path: &Path, line: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_error(path, e))?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| io_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::models::Fingerprint;

    fn ranked(path: &str, score: f64, tier: Tier) -> RankedArtifact {
        RankedArtifact {
            path: path.into(),
            format: FormatKind::Markdown,
            status: ParseStatus::Ok,
            primary_category: "requirements".into(),
            tags: vec!["requirements".into()],
            score,
            tier,
            breakdown: ScoreBreakdown {
                confidence: 1.0,
                richness: 0.5,
                recency: 1.0,
                status_factor: 1.0,
            },
            group_position: 1,
            group_size: 1,
        }
    }

    fn sample() -> ArtifactIndex {
        let failed = vec![
            ArtifactRecord::failed(
                Fingerprint::new("z.xlsx", 3, 1),
                FormatKind::Xlsx,
                ParseError::corrupt("zip container: invalid"),
            ),
            ArtifactRecord::failed(
                Fingerprint::new("big.md", 99, 1),
                FormatKind::Markdown,
                ParseError::too_large("99 bytes exceeds ceiling of 10 bytes"),
            ),
        ];
        ArtifactIndex::build(
            &[
                ranked("a.md", 80.0, Tier::High),
                ranked("b.md", 50.0, Tier::Medium),
                ranked("c.md", 45.0, Tier::Medium),
            ],
            &failed,
        )
    }

    #[test]
    fn build_counts_tiers_and_sorts_failures() {
        let index = sample();
        assert_eq!(index.version, INDEX_VERSION);
        assert_eq!(index.tier_counts.high, 1);
        assert_eq!(index.tier_counts.medium, 2);
        assert_eq!(index.tier_counts.total(), 3);
        let failed: Vec<&str> = index.failures.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(failed, vec!["big.md", "z.xlsx"]);
        assert_eq!(index.failures[0].kind, ParseFailureKind::TooLarge);
    }

    #[test]
    fn top_filters_by_tier() {
        let index = sample();
        assert_eq!(index.top(2, None).len(), 2);
        let medium = index.top(10, Some(Tier::Medium));
        assert_eq!(medium.len(), 2);
        assert_eq!(medium[0].path, "b.md");
        assert!(index.top(10, Some(Tier::Low)).is_empty());
    }

    #[test]
    fn top_in_group_keeps_group_order() {
        let mut first = ranked("plan.xlsx", 50.0, Tier::Medium);
        first.format = FormatKind::Xlsx;
        first.group_size = 2;
        let mut second = ranked("budget.xlsx", 20.0, Tier::Low);
        second.format = FormatKind::Xlsx;
        second.group_position = 2;
        second.group_size = 2;
        let rows = vec![ranked("a.md", 80.0, Tier::High), first, second];
        let index = ArtifactIndex::build(&rows, std::iter::empty::<&ArtifactRecord>());

        let sheets = index.top_in_group(5, FormatKind::Xlsx);
        let paths: Vec<&str> = sheets.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["plan.xlsx", "budget.xlsx"]);
        assert_eq!(sheets[1].group_position, 2);
        assert_eq!(sheets[1].group_size, 2);
        assert!(index.top_in_group(5, FormatKind::Pdf).is_empty());
    }

    #[test]
    fn write_is_atomic_and_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/index.json");
        let index = sample();

        index.write(&path).unwrap();
        let first = fs::read(&path).unwrap();
        index.write(&path).unwrap();
        assert_eq!(first, fs::read(&path).unwrap());
        assert!(!dir.path().join("out/index.json.tmp").exists());

        let parsed: ArtifactIndex = serde_json::from_slice(&first).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn failed_rename_keeps_previous_file_and_removes_tmp() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the target path makes the rename fail.
        let target = dir.path().join("index.json");
        fs::create_dir_all(target.join("keep")).unwrap();

        let err = write_atomic(&target, b"{}").unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
        assert!(target.join("keep").is_dir());
        assert!(!dir.path().join("index.json.tmp").exists());
    }

    #[test]
    fn append_line_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trend.jsonl");
        append_line(&path, "{\"a\":1}").unwrap();
        append_line(&path, "{\"a\":2}").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
