//! Durable cache statistics.
//!
//! Used by `arx cache stats` to show what the cross-run cache holds: entry
//! counts by format and parse status and the size of the database file.

use anyhow::{Context, Result};

use crate::cache::{CacheStore, SqliteCacheStore, StoreSummary};
use crate::config::Config;
use crate::progress::format_number;

/// Open the configured cache, summarize it, and print the report.
pub async fn run_cache_stats(config: &Config) -> Result<()> {
    let Some(path) = &config.cache.path else {
        println!("No durable cache configured (set [cache].path); runs use an in-memory cache.");
        return Ok(());
    };

    let store = SqliteCacheStore::open(path)
        .await
        .with_context(|| format!("opening cache at {}", path.display()))?;
    let summary = store.summary().await.context("reading cache summary")?;
    store.close().await;

    print!("{}", render_summary(&path.display().to_string(), &summary));
    Ok(())
}

/// Remove every durable cache entry and print how many were dropped.
pub async fn run_cache_clear(config: &Config) -> Result<()> {
    let Some(path) = &config.cache.path else {
        println!("No durable cache configured; nothing to clear.");
        return Ok(());
    };

    let store = SqliteCacheStore::open(path)
        .await
        .with_context(|| format!("opening cache at {}", path.display()))?;
    let removed = store.clear().await.context("clearing cache")?;
    store.close().await;

    println!("Cleared {} cached artifacts from {}", format_number(removed), path.display());
    Ok(())
}

fn render_summary(location: &str, summary: &StoreSummary) -> String {
    let mut out = String::new();
    out.push_str("Artifact Cache\n");
    out.push_str("==============\n\n");
    out.push_str(&format!("  Database:  {}\n", location));
    if let Some(bytes) = summary.bytes_on_disk {
        out.push_str(&format!("  Size:      {}\n", format_bytes(bytes)));
    }
    out.push_str(&format!("  Entries:   {}\n", format_number(summary.entries)));

    if !summary.by_format.is_empty() {
        out.push_str("\n  By format:\n");
        out.push_str(&format!("  {:<12} {:>8}\n", "FORMAT", "ENTRIES"));
        out.push_str(&format!("  {}\n", "-".repeat(21)));
        for (format, n) in &summary.by_format {
            out.push_str(&format!("  {:<12} {:>8}\n", format, format_number(*n)));
        }
    }

    if !summary.by_status.is_empty() {
        out.push_str("\n  By status:\n");
        for (status, n) in &summary.by_status {
            out.push_str(&format!("  {:<12} {:>8}\n", status, format_number(*n)));
        }
    }
    out.push('\n');
    out
}

/// Format a byte count as a human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
