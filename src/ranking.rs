//! Deterministic, explainable scoring of classified artifacts.
//!
//! Every artifact gets three components in `[0, 1]`:
//!
//! ```text
//! confidence = clamp(primary category weight, 0, 1)
//! richness   = 0.5 · sat(requirement entries per 1000 words, 10)
//!            + 0.3 · sat(cross references per 1000 words, 10)
//!            + 0.2 · sat(tables + headings, 10)
//! recency    = 0.5 ^ (age_days / half_life_days)
//!
//! sat(x, k) = x / (x + k)
//! score     = 100 · Σ wᵢ·componentᵢ / Σ wᵢ      (× partial_factor if partial)
//! ```
//!
//! Scores are rounded to two decimals. Age is measured from
//! `ranking.reference_time`, or from the newest modification time in the
//! ranked set when unset, so identical input always ranks identically.
//!
//! Ordering is score descending (total order) with ties broken by path.
//! Each artifact also carries its position within its format group under
//! the same order, so "third-best spreadsheet" needs no second sort.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::classifier::Classification;
use crate::config::{RankingConfig, TierThresholds};
use crate::models::{ArtifactRecord, FormatKind, ParseStatus, Tier};

const NANOS_PER_DAY: f64 = 86_400.0 * 1_000_000_000.0;

/// A parsed, classified artifact ready for ranking.
#[derive(Debug, Clone)]
pub struct ClassifiedArtifact {
    pub record: Arc<ArtifactRecord>,
    pub classification: Classification,
}

/// Per-component values behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub confidence: f64,
    pub richness: f64,
    pub recency: f64,
    /// Factor applied for partial parses (1.0 when complete).
    pub status_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedArtifact {
    pub path: String,
    pub format: FormatKind,
    pub status: ParseStatus,
    pub primary_category: String,
    pub tags: Vec<String>,
    pub score: f64,
    pub tier: Tier,
    pub breakdown: ScoreBreakdown,
    /// 1-based position among artifacts of the same format.
    pub group_position: usize,
    pub group_size: usize,
}

/// `x / (x + k)`: 0 at 0, 0.5 at `k`, approaching 1.
pub fn saturate(x: f64, k: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        x / (x + k)
    }
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (x * p).round() / p
}

/// Closed lower bounds: a score equal to a threshold takes the higher tier.
pub fn tier_for(score: f64, tiers: &TierThresholds) -> Tier {
    if score >= tiers.high {
        Tier::High
    } else if score >= tiers.medium {
        Tier::Medium
    } else {
        Tier::Low
    }
}

/// Reference instant (ns since epoch) recency is measured from.
pub fn reference_time_ns(items: &[ClassifiedArtifact], config: &RankingConfig) -> i64 {
    if let Some(t) = config.reference_time {
        return t.timestamp_nanos_opt().unwrap_or(i64::MAX);
    }
    items
        .iter()
        .map(|a| a.record.modified_ns)
        .max()
        .unwrap_or(0)
}

pub fn richness(classification: &Classification) -> f64 {
    let f = &classification.features;
    let per_thousand = |n: usize| {
        if f.words == 0 {
            0.0
        } else {
            n as f64 * 1000.0 / f.words as f64
        }
    };
    0.5 * saturate(per_thousand(f.requirement_entries()), 10.0)
        + 0.3 * saturate(per_thousand(f.cross_refs()), 10.0)
        + 0.2 * saturate((f.tables + f.headings) as f64, 10.0)
}

pub fn recency(modified_ns: i64, reference_ns: i64, half_life_days: f64) -> f64 {
    let age_days = (reference_ns.saturating_sub(modified_ns)).max(0) as f64 / NANOS_PER_DAY;
    0.5f64.powf(age_days / half_life_days)
}

/// Score one artifact against a fixed reference time.
pub fn score_one(item: &ClassifiedArtifact, reference_ns: i64, config: &RankingConfig) -> RankedArtifact {
    let w = &config.weights;
    let confidence = item.classification.tags.primary_weight.clamp(0.0, 1.0);
    let richness = richness(&item.classification);
    let recency = recency(item.record.modified_ns, reference_ns, config.half_life_days);

    let weight_sum = w.confidence + w.richness + w.recency;
    let combined = if weight_sum > 0.0 {
        (w.confidence * confidence + w.richness * richness + w.recency * recency) / weight_sum
    } else {
        0.0
    };

    let status_factor = match item.record.status {
        ParseStatus::Partial => config.partial_factor,
        _ => 1.0,
    };
    let score = round_to((100.0 * combined * status_factor).clamp(0.0, 100.0), 2);

    RankedArtifact {
        path: item.record.path.clone(),
        format: item.record.format,
        status: item.record.status,
        primary_category: item.classification.tags.primary.clone(),
        tags: item.classification.tags.categories(),
        score,
        tier: tier_for(score, &config.tiers),
        breakdown: ScoreBreakdown {
            confidence: round_to(confidence, 4),
            richness: round_to(richness, 4),
            recency: round_to(recency, 4),
            status_factor,
        },
        group_position: 1,
        group_size: 1,
    }
}

/// Score and order a set of artifacts. Pure: depends only on its inputs.
pub fn rank(items: &[ClassifiedArtifact], config: &RankingConfig) -> Vec<RankedArtifact> {
    let reference_ns = reference_time_ns(items, config);
    let mut ranked: Vec<RankedArtifact> = items
        .iter()
        .map(|item| score_one(item, reference_ns, config))
        .collect();
    ranked.sort_by(compare);
    assign_group_positions(&mut ranked);
    ranked
}

/// Fill `group_position`/`group_size` per format. `ranked` must already be
/// in [`compare`] order.
fn assign_group_positions(ranked: &mut [RankedArtifact]) {
    let mut sizes: HashMap<FormatKind, usize> = HashMap::new();
    for r in ranked.iter() {
        *sizes.entry(r.format).or_default() += 1;
    }
    let mut seen: HashMap<FormatKind, usize> = HashMap::new();
    for r in ranked.iter_mut() {
        let position = seen.entry(r.format).or_default();
        *position += 1;
        r.group_position = *position;
        r.group_size = sizes.get(&r.format).copied().unwrap_or(0);
    }
}

/// Score descending, then path ascending.
pub fn compare(a: &RankedArtifact, b: &RankedArtifact) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.path.cmp(&b.path))
}
