//! TOML configuration parsing and validation.
//!
//! Configuration is supplied by the caller and echoed verbatim into every
//! metrics snapshot, so a run can be reproduced from its own output.
//! [`load_config`] validates everything up front: a run never starts with
//! an invalid pattern or threshold.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DiscoveryConfig {
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

/// What to do with a file that decodes but has no content.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPolicy {
    /// Keep the record with status `partial` so it is analyzed and ranked.
    #[default]
    Partial,
    /// Count the file as a failure.
    Fail,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ParsingConfig {
    #[serde(default)]
    pub empty_policy: EmptyPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    /// Maximum archive nesting that is expanded (1 = only top-level archives).
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Aggregate inner-entry cap across all nesting levels of one archive.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_depth() -> u32 {
    2
}
fn default_max_entries() -> usize {
    500
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CacheConfig {
    /// SQLite file for cross-run reuse. `None` keeps the cache in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub verify_content_hash: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    /// Category → keywords, matched case-insensitively on whole words.
    #[serde(default = "default_keywords")]
    pub keywords: BTreeMap<String, Vec<String>>,
}

fn default_keywords() -> BTreeMap<String, Vec<String>> {
    let mut m = BTreeMap::new();
    let mut add = |category: &str, words: &[&str]| {
        m.insert(
            category.to_string(),
            words.iter().map(|w| w.to_string()).collect(),
        );
    };
    add(
        "compliance",
        &["compliance", "audit", "certification", "regulation", "standard"],
    );
    add(
        "design",
        &["architecture", "design", "interface", "component", "diagram"],
    );
    add(
        "planning",
        &["schedule", "milestone", "baseline", "roadmap", "plan"],
    );
    add("safety", &["hazard", "safety", "risk", "mitigation", "fmea"]);
    add(
        "verification",
        &["test", "verification", "validation", "inspection", "acceptance"],
    );
    m
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RankingWeights {
    #[serde(default = "default_w_confidence")]
    pub confidence: f64,
    #[serde(default = "default_w_richness")]
    pub richness: f64,
    #[serde(default = "default_w_recency")]
    pub recency: f64,
}

fn default_w_confidence() -> f64 {
    0.4
}
fn default_w_richness() -> f64 {
    0.4
}
fn default_w_recency() -> f64 {
    0.2
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            confidence: default_w_confidence(),
            richness: default_w_richness(),
            recency: default_w_recency(),
        }
    }
}

/// Closed lower bounds: `high` if score >= high, `medium` if score >= medium.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TierThresholds {
    #[serde(default = "default_tier_high")]
    pub high: f64,
    #[serde(default = "default_tier_medium")]
    pub medium: f64,
}

fn default_tier_high() -> f64 {
    70.0
}
fn default_tier_medium() -> f64 {
    40.0
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high: default_tier_high(),
            medium: default_tier_medium(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RankingConfig {
    #[serde(default)]
    pub weights: RankingWeights,
    #[serde(default)]
    pub tiers: TierThresholds,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    /// Recency is measured against this instant. When unset, the newest
    /// modification time in the ranked set is used.
    #[serde(default)]
    pub reference_time: Option<DateTime<Utc>>,
    /// Multiplier applied to the score of partially parsed artifacts.
    #[serde(default = "default_partial_factor")]
    pub partial_factor: f64,
}

fn default_half_life_days() -> f64 {
    180.0
}
fn default_partial_factor() -> f64 {
    0.5
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            tiers: TierThresholds::default(),
            half_life_days: default_half_life_days(),
            reference_time: None,
            partial_factor: default_partial_factor(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
    #[serde(default = "default_trend_path")]
    pub trend_path: PathBuf,
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./out/index.json")
}
fn default_metrics_path() -> PathBuf {
    PathBuf::from("./out/metrics.json")
}
fn default_trend_path() -> PathBuf {
    PathBuf::from("./out/trend.jsonl")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            metrics_path: default_metrics_path(),
            trend_path: default_trend_path(),
        }
    }
}

impl Config {
    /// A configuration with defaults everywhere except the discovery roots.
    pub fn for_roots(roots: Vec<PathBuf>) -> Self {
        Self {
            discovery: DiscoveryConfig {
                roots,
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                max_file_bytes: default_max_file_bytes(),
                follow_symlinks: false,
            },
            parsing: ParsingConfig::default(),
            archive: ArchiveConfig::default(),
            cache: CacheConfig::default(),
            classifier: ClassifierConfig::default(),
            ranking: RankingConfig::default(),
            pipeline: PipelineConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Check every field that could make a run misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.roots.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "discovery.roots",
                reason: "at least one root is required".to_string(),
            });
        }
        for root in &self.discovery.roots {
            if !root.exists() {
                return Err(ConfigError::MissingRoot(root.clone()));
            }
        }

        build_globset(&self.discovery.include_globs)?;
        build_globset(&self.discovery.exclude_globs)?;

        if self.discovery.max_file_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "discovery.max_file_bytes",
                reason: "must be > 0".to_string(),
            });
        }

        if self.archive.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "archive.max_depth",
                reason: "must be >= 1".to_string(),
            });
        }

        let tiers = &self.ranking.tiers;
        if !tiers.high.is_finite() || !tiers.medium.is_finite() {
            return Err(ConfigError::InvalidThreshold(
                "tier thresholds must be finite numbers".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&tiers.medium) || !(0.0..=100.0).contains(&tiers.high) {
            return Err(ConfigError::InvalidThreshold(format!(
                "tier thresholds must be in [0, 100] (high = {}, medium = {})",
                tiers.high, tiers.medium
            )));
        }
        if tiers.medium > tiers.high {
            return Err(ConfigError::InvalidThreshold(format!(
                "ranking.tiers.medium ({}) must not exceed ranking.tiers.high ({})",
                tiers.medium, tiers.high
            )));
        }

        let w = &self.ranking.weights;
        if [w.confidence, w.richness, w.recency]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "ranking.weights",
                reason: "weights must be finite and >= 0".to_string(),
            });
        }
        if w.confidence + w.richness + w.recency <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "ranking.weights",
                reason: "at least one weight must be > 0".to_string(),
            });
        }

        if !(self.ranking.half_life_days.is_finite() && self.ranking.half_life_days > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "ranking.half_life_days",
                reason: "must be > 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.ranking.partial_factor) {
            return Err(ConfigError::InvalidValue {
                field: "ranking.partial_factor",
                reason: "must be in [0.0, 1.0]".to_string(),
            });
        }

        if self.pipeline.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.workers",
                reason: "must be >= 1".to_string(),
            });
        }

        for (category, words) in &self.classifier.keywords {
            if category.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "classifier.keywords",
                    reason: "category names must not be empty".to_string(),
                });
            }
            if words.iter().any(|w| w.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "classifier.keywords",
                    reason: format!("category '{}' contains an empty keyword", category),
                });
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Compile glob patterns, reporting the first invalid one.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}
