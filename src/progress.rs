//! Run progress reporting.
//!
//! Reports observable progress during `arx run` so users see what is being
//! discovered, how many files are left, and when ranking and persistence
//! start. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// Stage of the pipeline an event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunPhase {
    Discovering,
    Analyzing,
    Ranking,
    Persisting,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Discovering => "discovering",
            RunPhase::Analyzing => "analyzing",
            RunPhase::Ranking => "ranking",
            RunPhase::Persisting => "persisting",
        }
    }
}

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Walking roots; total unknown.
    Discovering { roots: usize },
    /// `n` of `total` candidates analyzed; `cached` of them were cache hits.
    Analyzing { n: u64, total: u64, cached: u64 },
    /// Scoring `artifacts` analyzed artifacts.
    Ranking { artifacts: u64 },
    /// Writing index and metrics.
    Persisting,
}

impl ProgressEvent {
    pub fn phase(&self) -> RunPhase {
        match self {
            ProgressEvent::Discovering { .. } => RunPhase::Discovering,
            ProgressEvent::Analyzing { .. } => RunPhase::Analyzing,
            ProgressEvent::Ranking { .. } => RunPhase::Ranking,
            ProgressEvent::Persisting => RunPhase::Persisting,
        }
    }
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. May be called from worker tasks.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "arx  analyzing  1,234 / 5,000 files (1,000 cached)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { roots } => {
                format!("arx  discovering  {} root(s)...\n", roots)
            }
            ProgressEvent::Analyzing { n, total, cached } => format!(
                "arx  analyzing  {} / {} files ({} cached)\n",
                format_number(*n),
                format_number(*total),
                format_number(*cached)
            ),
            ProgressEvent::Ranking { artifacts } => {
                format!("arx  ranking  {} artifacts\n", format_number(*artifacts))
            }
            ProgressEvent::Persisting => "arx  persisting index and metrics\n".to_string(),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let phase = event.phase().as_str();
        let obj = match &event {
            ProgressEvent::Discovering { roots } => serde_json::json!({
                "event": "progress",
                "phase": phase,
                "roots": roots
            }),
            ProgressEvent::Analyzing { n, total, cached } => serde_json::json!({
                "event": "progress",
                "phase": phase,
                "n": n,
                "total": total,
                "cached": cached
            }),
            ProgressEvent::Ranking { artifacts } => serde_json::json!({
                "event": "progress",
                "phase": phase,
                "artifacts": artifacts
            }),
            ProgressEvent::Persisting => serde_json::json!({
                "event": "progress",
                "phase": phase
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode '{}': use off, human, or json", other)),
        }
    }
}
