//! # Artifact Harness CLI (`arx`)
//!
//! The `arx` binary wires a TOML configuration to the library: it runs the
//! analysis pipeline, inspects and clears the durable cache, and summarizes
//! the trend log.
//!
//! ## Usage
//!
//! ```bash
//! arx --config ./config/arx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arx run` | Discover, parse, classify, rank, and persist the index |
//! | `arx cache stats` | Show what the durable cache holds |
//! | `arx cache clear` | Remove every durable cache entry |
//! | `arx trend` | Roll up KPIs across all recorded runs |
//! | `arx completions <shell>` | Print shell completions |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `artifact_harness=info`).

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use artifact_harness::config;
use artifact_harness::metrics::TrendSummary;
use artifact_harness::index::IndexEntry;
use artifact_harness::models::{FormatKind, Tier};
use artifact_harness::pipeline::{Pipeline, RunError, RunReport};
use artifact_harness::progress::ProgressMode;
use artifact_harness::stats;

/// Artifact Harness: incremental parsing, classification, and ranking of
/// engineering document corpora.
#[derive(Parser)]
#[command(
    name = "arx",
    about = "Artifact Harness: rank and index engineering document corpora",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/arx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the corpus and write the index, metrics snapshot, and trend line.
    Run {
        /// Analyze and rank but write nothing.
        #[arg(long)]
        dry_run: bool,

        /// Print the N highest-ranked artifacts.
        #[arg(long, value_name = "N")]
        top: Option<usize>,

        /// Restrict `--top` to one tier (high, medium, low).
        #[arg(long)]
        tier: Option<Tier>,

        /// Restrict `--top` to one format (markdown, docx, xlsx, ...).
        #[arg(long)]
        format: Option<FormatKind>,

        /// Progress output on stderr: off, human, or json.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Inspect or clear the durable cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Summarize the trend log across runs.
    Trend,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts by format and status.
    Stats,
    /// Remove every entry.
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum Shell {
    Bash,
    Elvish,
    Fish,
    Powershell,
    Zsh,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artifact_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        print_completions(shell);
        return Ok(());
    }

    init_tracing();

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            dry_run,
            top,
            tier,
            format,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let pipeline = Pipeline::new(cfg)
                .await?
                .with_progress(Arc::from(progress.reporter()));

            let report = if dry_run {
                pipeline.analyze().await?
            } else {
                match pipeline.run().await {
                    Ok(report) => report,
                    Err(RunError::Persist(failure)) => {
                        print_summary(&failure.report, true);
                        return Err(failure.into());
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            print_summary(&report, dry_run);
            if let Some(n) = top {
                print_top(&report, n, tier, format);
            }
            if !dry_run {
                println!();
                println!("Index written to {}", pipeline.config().output.index_path.display());
            }
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => stats::run_cache_stats(&cfg).await?,
            CacheAction::Clear => stats::run_cache_clear(&cfg).await?,
        },
        Commands::Trend => {
            let summary = TrendSummary::from_log(&cfg.output.trend_path)
                .with_context(|| format!("reading {}", cfg.output.trend_path.display()))?;
            print_trend(&summary);
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}

fn print_completions(shell: Shell) {
    use clap_complete::generate;
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Elvish => clap_complete::Shell::Elvish,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::Powershell => clap_complete::Shell::PowerShell,
        Shell::Zsh => clap_complete::Shell::Zsh,
    };
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

fn print_summary(report: &RunReport, dry_run: bool) {
    let m = &report.metrics;
    let t = &report.index.tier_counts;
    println!("{}", if dry_run { "Run complete (dry run)" } else { "Run complete" });
    println!("  discovered:  {}", m.discovered);
    println!("  analyzed:    {}", m.analyzed);
    println!("  failed:      {}", m.failed);
    println!(
        "  cache:       {} hits, {} parsed ({:.1}% hit rate)",
        m.cache_hits,
        m.parsed,
        m.cache_hit_rate() * 100.0
    );
    println!("  tiers:       {} high, {} medium, {} low", t.high, t.medium, t.low);
    if !m.failures_by_kind.is_empty() {
        let kinds: Vec<String> = m
            .failures_by_kind
            .iter()
            .map(|(k, n)| format!("{} {}", n, k))
            .collect();
        println!("  failures:    {}", kinds.join(", "));
    }
}

fn print_top(report: &RunReport, n: usize, tier: Option<Tier>, format: Option<FormatKind>) {
    let entries: Vec<&IndexEntry> = match format {
        Some(format) => report
            .index
            .top_in_group(usize::MAX, format)
            .into_iter()
            .filter(|e| tier.map_or(true, |t| e.tier == t))
            .take(n)
            .collect(),
        None => report.index.top(n, tier),
    };
    println!();
    if entries.is_empty() {
        println!("No artifacts to show.");
        return;
    }
    println!(
        "  {:>6}  {:<6}  {:<14}  {:>7}  PATH",
        "SCORE", "TIER", "CATEGORY", "GROUP"
    );
    println!("  {}", "-".repeat(70));
    for e in entries {
        let group = format!("{}/{}", e.group_position, e.group_size);
        println!(
            "  {:>6.2}  {:<6}  {:<14}  {:>7}  {}",
            e.score, e.tier, e.primary_category, group, e.path
        );
    }
}

fn print_trend(summary: &TrendSummary) {
    println!("Trend ({} runs)", summary.runs);
    if summary.runs == 0 {
        println!("  no runs recorded yet");
        return;
    }
    println!("  mean cache hit rate:  {:.1}%", summary.mean_cache_hit_rate * 100.0);
    println!("  mean failure rate:    {:.1}%", summary.mean_failure_rate * 100.0);
    if let Some(at) = summary.latest_finished_at {
        println!("  latest run:           {}", at.to_rfc3339());
    }
    if let Some(t) = summary.latest_tier_counts {
        println!(
            "  latest tiers:         {} high, {} medium, {} low",
            t.high, t.medium, t.low
        );
    }
    if summary.skipped_lines > 0 {
        println!("  skipped lines:        {}", summary.skipped_lines);
    }
}
