//! The run pipeline: discover → resolve → classify → rank → persist.
//!
//! ```text
//! discover ──► for each candidate ──► cache.resolve ──► classify ─┐
//!              (1 worker: in order;     (parse on a               │
//!               N workers: JoinSet +     blocking thread           │
//!               Semaphore)               on miss)                  ▼
//!                                                    barrier: join all, sort by path
//!                                                                  │
//!                                              rank ◄──────────────┘
//!                                                │
//!                                    ArtifactIndex + RunMetrics ──► persist
//! ```
//!
//! A file that fails to parse is counted, logged, and listed in the index
//! failures; it never aborts the run. Ranking and persistence are
//! single-threaded and start only after every candidate is resolved.
//!
//! [`Pipeline::analyze`] stops before persistence (dry run);
//! [`Pipeline::run`] persists, and on a persistence failure hands back the
//! complete [`RunReport`] inside [`RunFailure`] so the write can be retried.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::ContentCache;
use crate::classifier::{Classification, Classifier};
use crate::config::{Config, OutputConfig};
use crate::discovery::{self, Candidate};
use crate::error::{ConfigError, ParseError, PersistenceError};
use crate::index::ArtifactIndex;
use crate::metrics::{MetricsRecorder, RunMetrics};
use crate::models::ArtifactRecord;
use crate::parsers::{ParseOptions, ParserRegistry};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::ranking::{self, ClassifiedArtifact};

/// Everything a completed run produced, held in memory until persisted.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub index: ArtifactIndex,
    pub metrics: RunMetrics,
}

impl RunReport {
    /// Write the index and metrics snapshot atomically, then append the
    /// trend line. Safe to call again after a failure.
    pub fn persist(&self, output: &OutputConfig) -> Result<(), PersistenceError> {
        self.index.write(&output.index_path)?;
        self.metrics.write_snapshot(&output.metrics_path)?;
        self.metrics.append_trend(&output.trend_path)?;
        tracing::info!(
            index = %output.index_path.display(),
            metrics = %output.metrics_path.display(),
            "run persisted"
        );
        Ok(())
    }
}

/// Persistence failed after the run completed. The results are retained.
#[derive(Debug, Error)]
#[error("run completed but its results could not be persisted: {error}")]
pub struct RunFailure {
    pub report: Box<RunReport>,
    #[source]
    pub error: PersistenceError,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persist(#[from] RunFailure),
}

/// One resolved candidate.
struct Outcome {
    record: Arc<ArtifactRecord>,
    cache_hit: bool,
    classification: Option<Classification>,
}

/// Shared, cheaply clonable state each analysis task needs.
#[derive(Clone)]
struct Analyzer {
    registry: Arc<ParserRegistry>,
    cache: Arc<ContentCache>,
    classifier: Arc<Classifier>,
    options: ParseOptions,
}

impl Analyzer {
    async fn analyze(&self, candidate: Candidate) -> Outcome {
        let registry = &self.registry;
        let options = self.options;
        let resolved = self
            .cache
            .resolve(&candidate, |c: Candidate| {
                let registry = Arc::clone(registry);
                async move { parse_blocking(registry, c, options).await }
            })
            .await;
        let classification = self.classifier.classify(&resolved.record);
        Outcome {
            record: resolved.record,
            cache_hit: resolved.hit,
            classification,
        }
    }
}

async fn parse_blocking(
    registry: Arc<ParserRegistry>,
    candidate: Candidate,
    options: ParseOptions,
) -> ArtifactRecord {
    let fingerprint = candidate.fingerprint();
    let format = registry.kind_for_name(&candidate.rel_path);
    let handle = tokio::task::spawn_blocking(move || registry.parse_candidate(&candidate, &options));
    match handle.await {
        Ok(record) => record,
        Err(e) => ArtifactRecord::failed(
            fingerprint,
            format,
            ParseError::corrupt(format!("parser task failed: {}", e)),
        ),
    }
}

pub struct Pipeline {
    config: Config,
    analyzer: Analyzer,
    progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    /// Validate `config` and build the parser registry, classifier, and
    /// cache it describes.
    pub async fn new(config: Config) -> Result<Self, ConfigError> {
        // Nothing touches disk until the config is known to be valid.
        config.validate()?;
        let cache = ContentCache::from_config(&config.cache)
            .await
            .with_size_ceiling(config.discovery.max_file_bytes);
        Self::with_cache(config, Arc::new(cache))
    }

    /// Like [`Pipeline::new`] but reusing an existing cache, so consecutive
    /// runs in one process share it.
    pub fn with_cache(config: Config, cache: Arc<ContentCache>) -> Result<Self, ConfigError> {
        config.validate()?;
        let classifier = Classifier::from_config(&config.classifier)?;
        let analyzer = Analyzer {
            registry: Arc::new(ParserRegistry::with_defaults()),
            cache,
            classifier: Arc::new(classifier),
            options: ParseOptions::from_config(&config),
        };
        Ok(Self {
            config,
            analyzer,
            progress: Arc::new(NoProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.analyzer.cache
    }

    /// Run every stage except persistence.
    pub async fn analyze(&self) -> Result<RunReport, ConfigError> {
        let recorder = MetricsRecorder::start();
        let races_before = self.analyzer.cache.stats().races;

        self.progress.report(ProgressEvent::Discovering {
            roots: self.config.discovery.roots.len(),
        });
        let t = Instant::now();
        let generated = discovery::generated_paths(&self.config);
        let candidates = discovery::discover_excluding(&self.config.discovery, &generated)?;
        recorder.set_discovered(candidates.len() as u64);
        recorder.record_stage("discovery", t.elapsed());
        tracing::info!(candidates = candidates.len(), "discovery complete");

        let t = Instant::now();
        let mut outcomes = if self.config.pipeline.workers <= 1 {
            self.analyze_sequential(candidates, &recorder).await
        } else {
            self.analyze_parallel(candidates, &recorder).await
        };
        // Barrier: everything below sees a complete, path-ordered result set.
        outcomes.sort_by(|a, b| a.record.path.cmp(&b.record.path));
        recorder.record_stage("analysis", t.elapsed());
        recorder.add_races(
            self.analyzer
                .cache
                .stats()
                .races
                .saturating_sub(races_before),
        );

        let mut classified = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome.classification {
                Some(classification) => classified.push(ClassifiedArtifact {
                    record: outcome.record,
                    classification,
                }),
                None => failed.push(outcome.record),
            }
        }

        self.progress.report(ProgressEvent::Ranking {
            artifacts: classified.len() as u64,
        });
        let t = Instant::now();
        let ranked = ranking::rank(&classified, &self.config.ranking);
        let index = ArtifactIndex::build(&ranked, failed.iter().map(|r| r.as_ref()));
        recorder.record_stage("ranking", t.elapsed());

        if recorder.failed() > 0 {
            tracing::warn!(failed = recorder.failed(), "some artifacts could not be parsed");
        }

        let metrics = recorder.finish(index.tier_counts, &self.config);
        tracing::info!(
            discovered = metrics.discovered,
            analyzed = metrics.analyzed,
            failed = metrics.failed,
            cache_hits = metrics.cache_hits,
            "analysis complete"
        );
        Ok(RunReport { index, metrics })
    }

    /// Analyze, then persist to the configured outputs.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let report = self.analyze().await?;
        self.progress.report(ProgressEvent::Persisting);
        match report.persist(&self.config.output) {
            Ok(()) => Ok(report),
            Err(error) => {
                tracing::error!(error = %error, "failed to persist run results");
                Err(RunFailure {
                    report: Box::new(report),
                    error,
                }
                .into())
            }
        }
    }

    async fn analyze_sequential(
        &self,
        candidates: Vec<Candidate>,
        recorder: &MetricsRecorder,
    ) -> Vec<Outcome> {
        let total = candidates.len() as u64;
        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut cached = 0;
        for candidate in candidates {
            let outcome = self.analyzer.analyze(candidate).await;
            self.collect(&outcome, recorder, total, &mut cached, outcomes.len() as u64 + 1);
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn analyze_parallel(
        &self,
        candidates: Vec<Candidate>,
        recorder: &MetricsRecorder,
    ) -> Vec<Outcome> {
        let total = candidates.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.workers));
        let mut set = JoinSet::new();

        for candidate in candidates.iter().cloned() {
            let analyzer = self.analyzer.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                analyzer.analyze(candidate).await
            });
        }

        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut cached = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.collect(&outcome, recorder, total, &mut cached, outcomes.len() as u64 + 1);
                    outcomes.push(outcome);
                }
                Err(e) => tracing::error!(error = %e, "analysis task failed"),
            }
        }

        // A task that died takes its candidate with it; account for it as a failure.
        if outcomes.len() < candidates.len() {
            let done: HashSet<String> = outcomes.iter().map(|o| o.record.path.clone()).collect();
            for candidate in candidates.iter().filter(|c| !done.contains(&c.rel_path)) {
                let record = Arc::new(ArtifactRecord::failed(
                    candidate.fingerprint(),
                    self.analyzer.registry.kind_for_name(&candidate.rel_path),
                    ParseError::corrupt("analysis task aborted"),
                ));
                let outcome = Outcome {
                    record,
                    cache_hit: false,
                    classification: None,
                };
                self.collect(&outcome, recorder, total, &mut cached, outcomes.len() as u64 + 1);
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn collect(
        &self,
        outcome: &Outcome,
        recorder: &MetricsRecorder,
        total: u64,
        cached: &mut u64,
        n: u64,
    ) {
        recorder.record_outcome(&outcome.record, outcome.cache_hit);
        if outcome.cache_hit {
            *cached += 1;
        }
        if let Some(e) = &outcome.record.error {
            if outcome.record.is_failed() {
                tracing::warn!(path = %outcome.record.path, kind = %e.kind, cause = %e.cause, "artifact failed");
            } else {
                tracing::debug!(path = %outcome.record.path, kind = %e.kind, cause = %e.cause, "artifact partially parsed");
            }
        }
        self.progress.report(ProgressEvent::Analyzing {
            n,
            total,
            cached: *cached,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParseStatus;
    use std::fs;
    use std::path::Path;

    fn config_for(root: &Path, out: &Path) -> Config {
        let mut cfg = Config::for_roots(vec![root.to_path_buf()]);
        cfg.output.index_path = out.join("index.json");
        cfg.output.metrics_path = out.join("metrics.json");
        cfg.output.trend_path = out.join("trend.jsonl");
        cfg
    }

    #[tokio::test]
    async fn empty_corpus_yields_empty_index() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_for(corpus.path(), out.path()))
            .await
            .unwrap();
        let report = pipeline.run().await.unwrap();
        assert!(report.index.artifacts.is_empty());
        assert!(report.index.failures.is_empty());
        assert_eq!(report.metrics.discovered, 0);
        assert!(out.path().join("index.json").exists());
    }

    #[tokio::test]
    async fn failures_are_isolated_and_listed() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(
            corpus.path().join("reqs.md"),
            "# Requirements\n\nREQ-1 The system shall log.\n\nREQ-2 The system shall retry.\n",
        )
        .unwrap();
        fs::write(corpus.path().join("broken.docx"), b"PK\x03\x04garbage").unwrap();

        let pipeline = Pipeline::new(config_for(corpus.path(), out.path()))
            .await
            .unwrap();
        let report = pipeline.analyze().await.unwrap();
        assert_eq!(report.metrics.discovered, 2);
        assert_eq!(report.metrics.analyzed, 1);
        assert_eq!(report.metrics.failed, 1);
        assert_eq!(report.index.artifacts[0].path, "reqs.md");
        assert_eq!(report.index.artifacts[0].status, ParseStatus::Ok);
        assert_eq!(report.index.failures[0].path, "broken.docx");
        // Dry run: nothing written.
        assert!(!out.path().join("index.json").exists());
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(corpus.path().join("a.md"), "# A\n\nalpha\n").unwrap();
        fs::write(corpus.path().join("b.txt"), "beta\n").unwrap();

        let pipeline = Pipeline::new(config_for(corpus.path(), out.path()))
            .await
            .unwrap();
        let first = pipeline.analyze().await.unwrap();
        let second = pipeline.analyze().await.unwrap();
        assert_eq!(first.metrics.parsed, 2);
        assert_eq!(second.metrics.parsed, 0);
        assert_eq!(second.metrics.cache_hits, 2);
        assert_eq!(first.index, second.index);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_report() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(corpus.path().join("a.md"), "# A\n\nalpha\n").unwrap();
        let mut cfg = config_for(corpus.path(), out.path());
        // A non-empty directory where the index file should go.
        fs::create_dir_all(cfg.output.index_path.join("blocker")).unwrap();

        let pipeline = Pipeline::new(cfg.clone()).await.unwrap();
        let failure = match pipeline.run().await {
            Err(RunError::Persist(f)) => f,
            other => panic!("expected persistence failure, got {:?}", other.map(|_| ())),
        };
        assert_eq!(failure.report.index.artifacts.len(), 1);

        cfg.output.index_path = out.path().join("retry/index.json");
        failure.report.persist(&cfg.output).unwrap();
        assert!(cfg.output.index_path.exists());
    }

    #[tokio::test]
    async fn invalid_config_creates_no_cache_file() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut cfg = config_for(corpus.path(), out.path());
        let db = out.path().join("data/cache.sqlite");
        cfg.cache.path = Some(db.clone());
        cfg.ranking.tiers.high = 10.0;
        cfg.ranking.tiers.medium = 50.0;

        let result = Pipeline::new(cfg).await;
        assert!(matches!(result, Err(ConfigError::InvalidThreshold(_))));
        assert!(!db.exists());
        assert!(!out.path().join("data").exists());
    }

    #[tokio::test]
    async fn parallel_workers_match_sequential() {
        let corpus = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        for i in 0..12 {
            fs::write(
                corpus.path().join(format!("doc{:02}.md", i)),
                format!("# Doc {}\n\nSYS-{} shall hold.\n", i, i),
            )
            .unwrap();
        }
        let mut cfg = config_for(corpus.path(), out.path());
        let sequential = Pipeline::new(cfg.clone()).await.unwrap().analyze().await.unwrap();
        cfg.pipeline.workers = 4;
        let parallel = Pipeline::new(cfg).await.unwrap().analyze().await.unwrap();
        assert_eq!(sequential.index, parallel.index);
        assert_eq!(parallel.metrics.analyzed, 12);
    }
}
