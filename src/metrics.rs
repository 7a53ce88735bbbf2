//! Run metrics and the trend log.
//!
//! A [`MetricsRecorder`] is created when a run starts and shared by
//! reference while candidates are analyzed. [`MetricsRecorder::finish`]
//! consumes it, so a run's [`RunMetrics`] is finalized exactly once.
//!
//! Each finished run is written as a pretty-printed snapshot and appended
//! as one line to a JSON-lines trend log. [`TrendSummary`] rolls the log up
//! into the KPIs printed by `arx trend`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::PersistenceError;
use crate::index::{append_line, write_atomic, TierCounts};
use crate::models::ArtifactRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

pub struct MetricsRecorder {
    started_at: DateTime<Utc>,
    started: Instant,
    discovered: AtomicU64,
    analyzed: AtomicU64,
    parsed: AtomicU64,
    cache_hits: AtomicU64,
    failed: AtomicU64,
    races: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<String, u64>>,
    formats: Mutex<BTreeMap<String, u64>>,
    stages: Mutex<Vec<StageTiming>>,
}

impl MetricsRecorder {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            discovered: AtomicU64::new(0),
            analyzed: AtomicU64::new(0),
            parsed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            races: AtomicU64::new(0),
            failures_by_kind: Mutex::new(BTreeMap::new()),
            formats: Mutex::new(BTreeMap::new()),
            stages: Mutex::new(Vec::new()),
        }
    }

    pub fn set_discovered(&self, n: u64) {
        self.discovered.store(n, Ordering::Relaxed);
    }

    pub fn add_races(&self, n: u64) {
        self.races.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one resolved candidate.
    pub fn record_outcome(&self, record: &ArtifactRecord, cache_hit: bool) {
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.parsed.fetch_add(1, Ordering::Relaxed);
        }

        bump(&self.formats, record.format.as_str());

        if record.is_failed() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            let kind = record
                .error
                .as_ref()
                .map(|e| e.kind.as_str())
                .unwrap_or("corrupt");
            bump(&self.failures_by_kind, kind);
        } else {
            self.analyzed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stage(&self, stage: &str, elapsed: Duration) {
        self.stages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StageTiming {
                stage: stage.to_string(),
                duration_ms: elapsed.as_millis() as u64,
            });
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Finalize the run.
    pub fn finish(self, tier_counts: TierCounts, config: &Config) -> RunMetrics {
        let config_echo = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        RunMetrics {
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            discovered: self.discovered.into_inner(),
            analyzed: self.analyzed.into_inner(),
            parsed: self.parsed.into_inner(),
            cache_hits: self.cache_hits.into_inner(),
            cache_races: self.races.into_inner(),
            failed: self.failed.into_inner(),
            failures_by_kind: self.failures_by_kind.into_inner().unwrap_or_else(|e| e.into_inner()),
            formats: self.formats.into_inner().unwrap_or_else(|e| e.into_inner()),
            tier_counts,
            stages: self.stages.into_inner().unwrap_or_else(|e| e.into_inner()),
            config: config_echo,
        }
    }
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, key: &str) {
    let mut map = map.lock().unwrap_or_else(|e| e.into_inner());
    *map.entry(key.to_string()).or_insert(0) += 1;
}

/// Everything measured about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub discovered: u64,
    /// Records that reached classification and ranking.
    pub analyzed: u64,
    /// Candidates parsed in this run (cache misses).
    pub parsed: u64,
    pub cache_hits: u64,
    pub cache_races: u64,
    pub failed: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub formats: BTreeMap<String, u64>,
    pub tier_counts: TierCounts,
    pub stages: Vec<StageTiming>,
    /// The configuration the run was executed with.
    pub config: serde_json::Value,
}

impl RunMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_hits + self.parsed)
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(self.failed, self.discovered)
    }

    pub fn stage_ms(&self, stage: &str) -> Option<u64> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.duration_ms)
    }

    /// Atomically write the snapshot to `path`.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), PersistenceError> {
        let mut json = serde_json::to_string_pretty(self).map_err(|source| {
            PersistenceError::Serialize {
                what: "run metrics",
                source,
            }
        })?;
        json.push('\n');
        write_atomic(path, json.as_bytes())
    }

    /// Append the snapshot as one line to the trend log.
    pub fn append_trend(&self, path: &Path) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(self).map_err(|source| PersistenceError::Serialize {
            what: "trend line",
            source,
        })?;
        append_line(path, &line)
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

/// Roll-up KPIs across every run in a trend log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendSummary {
    pub runs: usize,
    /// Lines that could not be decoded.
    pub skipped_lines: usize,
    pub mean_cache_hit_rate: f64,
    pub mean_failure_rate: f64,
    pub latest_finished_at: Option<DateTime<Utc>>,
    pub latest_tier_counts: Option<TierCounts>,
    pub latest_discovered: Option<u64>,
}

impl TrendSummary {
    pub fn from_runs(runs: &[RunMetrics]) -> Self {
        if runs.is_empty() {
            return Self::default();
        }
        let n = runs.len() as f64;
        let latest = runs.iter().max_by_key(|r| r.finished_at);
        Self {
            runs: runs.len(),
            skipped_lines: 0,
            mean_cache_hit_rate: runs.iter().map(|r| r.cache_hit_rate()).sum::<f64>() / n,
            mean_failure_rate: runs.iter().map(|r| r.failure_rate()).sum::<f64>() / n,
            latest_finished_at: latest.map(|r| r.finished_at),
            latest_tier_counts: latest.map(|r| r.tier_counts),
            latest_discovered: latest.map(|r| r.discovered),
        }
    }

    /// Read a trend log. A missing file is an empty history; undecodable
    /// lines are skipped and counted.
    pub fn from_log(path: &Path) -> Result<Self, PersistenceError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut runs = Vec::new();
        let mut skipped = 0;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunMetrics>(line) {
                Ok(m) => runs.push(m),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed trend line");
                }
            }
        }

        let mut summary = Self::from_runs(&runs);
        summary.skipped_lines = skipped;
        Ok(summary)
    }
}
