//! End-to-end pipeline behavior over real files on disk.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use artifact_harness::cache::ContentCache;
use artifact_harness::classifier::Classifier;
use artifact_harness::config::Config;
use artifact_harness::discovery;
use artifact_harness::error::ParseFailureKind;
use artifact_harness::models::{ContentBlock, ParseStatus, Tier};
use artifact_harness::parsers::{ParseOptions, ParserRegistry};
use artifact_harness::pipeline::Pipeline;
use artifact_harness::ranking::{self, ClassifiedArtifact};

const REQUIREMENTS_MD: &str = "# Flight Software Requirements\n\n\
## Interfaces\n\n\
FSW-101 The controller shall publish telemetry at 10 Hz.\n\n\
FSW-102 The controller shall reject malformed commands.\n\n\
See section 3.2.1 for verification and test coverage.\n\n\
| ID | Verification |\n|----|----|\n| FSW-101 | test |\n| FSW-102 | inspection |\n";

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

struct Fixture {
    _tmp: TempDir,
    corpus: PathBuf,
    out: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        let out = tmp.path().join("out");
        fs::create_dir_all(&corpus).unwrap();
        Self {
            _tmp: tmp,
            corpus,
            out,
        }
    }

    fn write(&self, rel: &str, bytes: impl AsRef<[u8]>) {
        let path = self.corpus.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    fn config(&self) -> Config {
        let mut cfg = Config::for_roots(vec![self.corpus.clone()]);
        cfg.cache.path = Some(self.out.join("cache.sqlite"));
        cfg.output.index_path = self.out.join("index.json");
        cfg.output.metrics_path = self.out.join("metrics.json");
        cfg.output.trend_path = self.out.join("trend.jsonl");
        cfg
    }
}

fn standard_corpus(fx: &Fixture) {
    fx.write("specs/requirements.md", REQUIREMENTS_MD);
    fx.write("notes/meeting.txt", "Weekly sync.\n\nDiscussed the schedule and milestone plan.\n");
    fx.write(
        "design/overview.md",
        "# Architecture\n\n## Components\n\nThe design has three interface layers.\n",
    );
}

#[tokio::test]
async fn unchanged_corpus_reruns_from_cache_with_identical_index() {
    let fx = Fixture::new();
    standard_corpus(&fx);

    let first = Pipeline::new(fx.config()).await.unwrap().run().await.unwrap();
    let first_bytes = fs::read(fx.out.join("index.json")).unwrap();
    assert_eq!(first.metrics.parsed, 3);

    // A fresh pipeline: hits must come from the durable store.
    let second = Pipeline::new(fx.config()).await.unwrap().run().await.unwrap();
    let second_bytes = fs::read(fx.out.join("index.json")).unwrap();

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(second.metrics.parsed, 0);
    assert_eq!(second.metrics.cache_hits, 3);
    assert_eq!(second.metrics.cache_hit_rate(), 1.0);

    let trend = fs::read_to_string(fx.out.join("trend.jsonl")).unwrap();
    assert_eq!(trend.lines().count(), 2);
}

#[tokio::test]
async fn ranking_does_not_depend_on_enumeration_or_workers() {
    let a = Fixture::new();
    let b = Fixture::new();
    let names: Vec<String> = (0..10).map(|i| format!("doc{}.md", i)).collect();
    let body = |i: usize| {
        format!(
            "# Document {}\n\n{}\n",
            i,
            (0..i).map(|n| format!("SYS-{} shall hold.", n)).collect::<Vec<_>>().join("\n\n")
        )
    };
    for (i, name) in names.iter().enumerate() {
        a.write(name, body(i));
    }
    for (i, name) in names.iter().enumerate().rev() {
        b.write(name, body(i));
    }

    let reference = chrono::DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let mut cfg_a = a.config();
    cfg_a.ranking.reference_time = Some(reference);
    let mut cfg_b = b.config();
    cfg_b.ranking.reference_time = Some(reference);
    cfg_b.pipeline.workers = 4;

    let ra = Pipeline::new(cfg_a).await.unwrap().analyze().await.unwrap();
    let rb = Pipeline::new(cfg_b).await.unwrap().analyze().await.unwrap();

    let order = |r: &artifact_harness::pipeline::RunReport| {
        r.index
            .artifacts
            .iter()
            .map(|e| (e.path.clone(), e.score, e.tier))
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&ra), order(&rb));
    assert_eq!(ra.index.artifacts.len(), 10);
}

#[test]
fn rank_is_order_independent() {
    let fx = Fixture::new();
    standard_corpus(&fx);
    let cfg = fx.config();

    let registry = ParserRegistry::with_defaults();
    let options = ParseOptions::from_config(&cfg);
    let classifier = Classifier::from_config(&cfg.classifier).unwrap();
    let mut items: Vec<ClassifiedArtifact> = discovery::discover(&cfg.discovery)
        .unwrap()
        .iter()
        .map(|c| {
            let record = Arc::new(registry.parse_candidate(c, &options));
            let classification = classifier.classify(&record).unwrap();
            ClassifiedArtifact {
                record,
                classification,
            }
        })
        .collect();

    let forward = ranking::rank(&items, &cfg.ranking);
    items.reverse();
    let backward = ranking::rank(&items, &cfg.ranking);
    assert_eq!(forward, backward);
}

#[tokio::test]
async fn changed_file_is_the_only_miss() {
    let fx = Fixture::new();
    standard_corpus(&fx);
    Pipeline::new(fx.config()).await.unwrap().run().await.unwrap();

    fx.write(
        "notes/meeting.txt",
        "Weekly sync.\n\nThe baseline moved; verification starts next month.\n\nMore notes.\n",
    );

    let report = Pipeline::new(fx.config()).await.unwrap().run().await.unwrap();
    assert_eq!(report.metrics.parsed, 1);
    assert_eq!(report.metrics.cache_hits, 2);
}

#[tokio::test]
async fn content_hash_mode_caches_oversized_files() {
    let fx = Fixture::new();
    fx.write("good.md", "# Good\n\nThe plan holds.\n");
    fx.write("huge.md", "x".repeat(4096));
    let mut cfg = fx.config();
    cfg.cache.verify_content_hash = true;
    cfg.discovery.max_file_bytes = 1024;

    let first = Pipeline::new(cfg.clone()).await.unwrap().run().await.unwrap();
    assert_eq!(first.metrics.parsed, 2);
    assert_eq!(first.index.failures[0].path, "huge.md");
    assert_eq!(first.index.failures[0].kind, ParseFailureKind::TooLarge);

    let second = Pipeline::new(cfg).await.unwrap().run().await.unwrap();
    assert_eq!(second.metrics.parsed, 0);
    assert_eq!(second.metrics.cache_hits, 2);
    assert_eq!(second.metrics.cache_hit_rate(), 1.0);
}

#[tokio::test]
async fn outputs_inside_a_root_are_not_analyzed() {
    let fx = Fixture::new();
    standard_corpus(&fx);
    let mut cfg = fx.config();
    let generated = fx.corpus.join("_arx");
    cfg.cache.path = Some(generated.join("cache.sqlite"));
    cfg.output.index_path = generated.join("index.json");
    cfg.output.metrics_path = generated.join("metrics.json");
    cfg.output.trend_path = generated.join("trend.jsonl");

    Pipeline::new(cfg.clone()).await.unwrap().run().await.unwrap();
    assert!(cfg.output.trend_path.exists());

    let second = Pipeline::new(cfg).await.unwrap().run().await.unwrap();
    assert_eq!(second.metrics.discovered, 3);
    assert_eq!(second.metrics.failed, 0);
    assert_eq!(second.metrics.parsed, 0);
    assert!(second.index.failures.is_empty());
}

#[tokio::test]
async fn shared_cache_sees_changes_within_one_process() {
    let fx = Fixture::new();
    standard_corpus(&fx);
    let mut cfg = fx.config();
    cfg.cache.path = None;
    let cache = Arc::new(ContentCache::in_memory(false));

    let pipeline = Pipeline::with_cache(cfg, Arc::clone(&cache)).unwrap();
    pipeline.analyze().await.unwrap();
    fx.write("design/overview.md", "# Architecture\n\nRewritten.\n");
    let report = pipeline.analyze().await.unwrap();

    assert_eq!(report.metrics.parsed, 1);
    assert_eq!(report.metrics.cache_hits, 2);
}

#[tokio::test]
async fn corrupt_file_is_isolated() {
    let fx = Fixture::new();
    standard_corpus(&fx);
    fx.write("data/budget.xlsx", b"PK\x03\x04this is not a workbook");

    let report = Pipeline::new(fx.config()).await.unwrap().run().await.unwrap();
    assert_eq!(report.metrics.discovered, 4);
    assert_eq!(report.index.artifacts.len(), 3);
    assert_eq!(report.index.failures.len(), 1);
    assert_eq!(report.index.failures[0].path, "data/budget.xlsx");
    assert_eq!(report.index.failures[0].kind, ParseFailureKind::Corrupt);
    assert_eq!(report.metrics.failures_by_kind.get("corrupt"), Some(&1));
}

#[tokio::test]
async fn tier_threshold_is_a_closed_lower_bound() {
    let fx = Fixture::new();
    fx.write("specs/requirements.md", REQUIREMENTS_MD);
    let mut cfg = fx.config();
    cfg.cache.path = None;

    let baseline = Pipeline::new(cfg.clone()).await.unwrap().analyze().await.unwrap();
    let score = baseline.index.artifacts[0].score;
    assert!(score > 1.0);

    let tier_with = |high: f64, medium: f64| {
        let mut c = cfg.clone();
        c.ranking.tiers.high = high;
        c.ranking.tiers.medium = medium;
        c
    };

    let at_high = Pipeline::new(tier_with(score, 0.0)).await.unwrap().analyze().await.unwrap();
    assert_eq!(at_high.index.artifacts[0].tier, Tier::High);

    let above_high = Pipeline::new(tier_with(score + 0.01, score))
        .await
        .unwrap()
        .analyze()
        .await
        .unwrap();
    assert_eq!(above_high.index.artifacts[0].tier, Tier::Medium);

    let above_medium = Pipeline::new(tier_with(score + 0.02, score + 0.01))
        .await
        .unwrap()
        .analyze()
        .await
        .unwrap();
    assert_eq!(above_medium.index.artifacts[0].tier, Tier::Low);
}

fn find_member<'a>(blocks: &'a [ContentBlock], name: &str) -> Option<&'a ContentBlock> {
    blocks.iter().find(|b| matches!(b, ContentBlock::Member { name: n, .. } if n == name))
}

fn member_blocks(block: &ContentBlock) -> &[ContentBlock] {
    match block {
        ContentBlock::Member { blocks, .. } => blocks,
        _ => panic!("not a member"),
    }
}

#[tokio::test]
async fn nested_archives_stop_at_depth_limit() {
    let fx = Fixture::new();
    let innermost = zip_of(&[("secret.md", b"# Hidden\n\nnever expanded\n")]);
    let middle = zip_of(&[
        ("middle.md", b"# Middle\n\nsecond level\n"),
        ("innermost.zip", &innermost),
    ]);
    let outer = zip_of(&[
        ("top.md", b"# Top\n\nfirst level\n"),
        ("middle.zip", &middle),
    ]);
    fx.write("bundle.zip", &outer);

    let mut cfg = fx.config();
    cfg.cache.path = None;
    cfg.archive.max_depth = 2;

    let registry = ParserRegistry::with_defaults();
    let candidates = discovery::discover(&cfg.discovery).unwrap();
    let record = registry.parse_candidate(&candidates[0], &ParseOptions::from_config(&cfg));
    assert!(!record.is_failed());

    let middle_member = find_member(&record.blocks, "middle.zip").unwrap();
    let inner_member = find_member(member_blocks(middle_member), "innermost.zip").unwrap();
    match inner_member {
        ContentBlock::Member {
            status,
            error,
            blocks,
            ..
        } => {
            assert_eq!(*status, ParseStatus::Failed);
            assert_eq!(error.as_ref().unwrap().kind, ParseFailureKind::TooLarge);
            assert!(blocks.is_empty());
        }
        _ => unreachable!(),
    }
    assert!(!record.full_text().contains("never expanded"));
    assert!(record.full_text().contains("second level"));

    // The archive still ranks.
    let report = Pipeline::new(cfg).await.unwrap().analyze().await.unwrap();
    assert_eq!(report.index.artifacts.len(), 1);
    assert_eq!(report.index.artifacts[0].path, "bundle.zip");
}

#[tokio::test]
async fn mixed_corpus_scenario() {
    let fx = Fixture::new();
    fx.write("good.md", REQUIREMENTS_MD);
    fx.write("empty.md", "");
    fx.write("huge.md", format!("# Huge\n\n{}", "word ".repeat(400)));
    fx.write("broken.xlsx", b"PK\x03\x04corrupted spreadsheet");

    let mut cfg = fx.config();
    cfg.discovery.max_file_bytes = 1024;

    let report = Pipeline::new(cfg).await.unwrap().run().await.unwrap();

    assert_eq!(report.metrics.discovered, 4);
    assert_eq!(report.metrics.analyzed, 2);
    assert_eq!(report.metrics.failed, 2);
    assert_eq!(report.index.artifacts[0].path, "good.md");
    assert_eq!(report.index.artifacts[0].status, ParseStatus::Ok);
    assert_eq!(report.index.artifacts[1].path, "empty.md");
    assert_eq!(report.index.artifacts[1].status, ParseStatus::Partial);

    let failures: Vec<(&str, ParseFailureKind)> = report
        .index
        .failures
        .iter()
        .map(|f| (f.path.as_str(), f.kind))
        .collect();
    assert_eq!(
        failures,
        vec![
            ("broken.xlsx", ParseFailureKind::Corrupt),
            ("huge.md", ParseFailureKind::TooLarge),
        ]
    );

    let on_disk: serde_json::Value =
        serde_json::from_slice(&fs::read(fx.out.join("index.json")).unwrap()).unwrap();
    assert_eq!(on_disk["artifacts"][0]["path"], "good.md");
    assert!(fx.out.join("metrics.json").exists());
}

#[tokio::test]
async fn empty_file_fails_under_fail_policy() {
    let fx = Fixture::new();
    fx.write("good.md", REQUIREMENTS_MD);
    fx.write("empty.md", "");
    let mut cfg = fx.config();
    cfg.cache.path = None;
    cfg.parsing.empty_policy = artifact_harness::config::EmptyPolicy::Fail;

    let report = Pipeline::new(cfg).await.unwrap().analyze().await.unwrap();
    assert_eq!(report.metrics.analyzed, 1);
    assert_eq!(report.index.failures[0].kind, ParseFailureKind::Empty);
}
