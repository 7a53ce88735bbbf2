//! Corpus discovery.
//!
//! Walks every configured root, applies the default and configured exclude
//! patterns plus the include patterns to root-relative paths, and returns an
//! immutable, path-sorted work queue. Files above the size ceiling are kept
//! (flagged `oversized`) so they are reported as `too_large` failures rather
//! than silently skipped.
//!
//! Files the run writes itself (index, metrics, trend log, cache database)
//! are never discovered, even when they live under a root.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::{build_globset, Config, DiscoveryConfig};
use crate::error::ConfigError;
use crate::models::Fingerprint;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// One file selected for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Location on disk.
    pub path: PathBuf,
    /// Root-relative path with `/` separators; the artifact identity.
    pub rel_path: String,
    pub size: u64,
    pub mtime_ns: i64,
    /// Size exceeds `discovery.max_file_bytes`.
    pub oversized: bool,
}

impl Candidate {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.rel_path.clone(), self.size, self.mtime_ns)
    }
}

pub fn discover(config: &DiscoveryConfig) -> Result<Vec<Candidate>, ConfigError> {
    discover_excluding(config, &[])
}

/// Every file a run with `config` writes, including temp and journal
/// siblings.
pub fn generated_paths(config: &Config) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for output in [
        &config.output.index_path,
        &config.output.metrics_path,
        &config.output.trend_path,
    ] {
        paths.push(output.clone());
        paths.push(with_suffix(output, ".tmp"));
    }
    if let Some(db) = &config.cache.path {
        paths.push(db.clone());
        for suffix in ["-wal", "-shm", "-journal"] {
            paths.push(with_suffix(db, suffix));
        }
    }
    paths
}

/// [`discover`], skipping the given files wherever they appear under a root.
pub fn discover_excluding(
    config: &DiscoveryConfig,
    skip: &[PathBuf],
) -> Result<Vec<Candidate>, ConfigError> {
    let skip: HashSet<PathBuf> = skip.iter().filter_map(|p| normalize(p)).collect();
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let prefix_roots = config.roots.len() > 1;
    let mut items = Vec::new();

    for root in &config.roots {
        if !root.exists() {
            return Err(ConfigError::MissingRoot(root.clone()));
        }
        let canonical_root = root.canonicalize().ok();
        let label = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());

        let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = to_slash_path(relative);

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }
            if let Some(r) = &canonical_root {
                if skip.contains(&r.join(relative)) {
                    tracing::debug!(path = %rel_str, "skipping generated file");
                    continue;
                }
            }

            let (size, mtime_ns) = match stat(path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat file");
                    continue;
                }
            };

            let rel_path = if prefix_roots {
                format!("{}/{}", label, rel_str)
            } else {
                rel_str
            };

            items.push(Candidate {
                path: path.to_path_buf(),
                rel_path,
                size,
                mtime_ns,
                oversized: size > config.max_file_bytes,
            });
        }
    }

    // Sort for deterministic ordering
    items.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    items.dedup_by(|later, earlier| {
        let dup = later.rel_path == earlier.rel_path;
        if dup {
            tracing::warn!(path = %later.rel_path, "duplicate relative path across roots; keeping first");
        }
        dup
    });

    Ok(items)
}

/// Size and modification time (ns since epoch) of a file.
pub fn stat(path: &Path) -> std::io::Result<(u64, i64)> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let mtime_ns = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    Ok((metadata.len(), mtime_ns))
}

/// Current fingerprint of a candidate's file, for staleness re-checks.
pub fn live_fingerprint(candidate: &Candidate) -> std::io::Result<Fingerprint> {
    let (size, mtime_ns) = stat(&candidate.path)?;
    Ok(Fingerprint::new(candidate.rel_path.clone(), size, mtime_ns))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Absolute form of a file path whose parent directory exists.
fn normalize(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some(parent.canonicalize().ok()?.join(name))
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(root: &Path) -> DiscoveryConfig {
        DiscoveryConfig {
            roots: vec![root.to_path_buf()],
            include_globs: vec!["**/*.md".to_string(), "**/*.xlsx".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
            max_file_bytes: 16,
            follow_symlinks: false,
        }
    }

    #[test]
    fn applies_globs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("b/z.md"), "z").unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("notes.txt"), "skip").unwrap();
        fs::write(root.join("drafts/d.md"), "skip").unwrap();
        fs::write(root.join(".git/HEAD.md"), "skip").unwrap();

        let items = discover(&config_for(root)).unwrap();
        let paths: Vec<&str> = items.iter().map(|c| c.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b/z.md"]);
    }

    #[test]
    fn flags_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.md"), "x".repeat(64)).unwrap();
        fs::write(dir.path().join("small.md"), "x").unwrap();
        let items = discover(&config_for(dir.path())).unwrap();
        assert!(items[0].oversized);
        assert_eq!(items[0].size, 64);
        assert!(!items[1].oversized);
    }

    #[test]
    fn empty_root_yields_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&config_for(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_config_error() {
        let cfg = config_for(Path::new("/no/such/arx/root"));
        assert!(matches!(discover(&cfg), Err(ConfigError::MissingRoot(_))));
    }

    #[test]
    fn generated_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("out")).unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("out/index.md"), "generated").unwrap();
        fs::write(root.join("out/index.md.tmp"), "generated").unwrap();

        let mut cfg = config_for(root);
        cfg.include_globs.push("**/*.tmp".to_string());
        let skip = vec![root.join("out/index.md"), root.join("out/index.md.tmp")];
        let items = discover_excluding(&cfg, &skip).unwrap();
        let paths: Vec<&str> = items.iter().map(|c| c.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md"]);
        assert_eq!(discover(&cfg).unwrap().len(), 3);
    }

    #[test]
    fn generated_paths_cover_temp_and_journal_files() {
        let mut cfg = Config::for_roots(vec![PathBuf::from("corpus")]);
        cfg.cache.path = Some(PathBuf::from("data/cache.sqlite"));
        let paths = generated_paths(&cfg);
        assert!(paths.contains(&cfg.output.index_path));
        assert!(paths.contains(&with_suffix(&cfg.output.trend_path, ".tmp")));
        assert!(paths.contains(&PathBuf::from("data/cache.sqlite-wal")));
    }

    #[test]
    fn multiple_roots_are_prefixed() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("x.md"), "x").unwrap();
        fs::write(b.path().join("x.md"), "x").unwrap();
        let mut cfg = config_for(a.path());
        cfg.roots.push(b.path().to_path_buf());
        let items = discover(&cfg).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|c| c.rel_path.ends_with("/x.md")));
    }
}
