//! Error types for the artifact pipeline.
//!
//! Parse failures are per-file and recovered locally; configuration errors
//! are fatal before a run starts; persistence errors are surfaced to the
//! caller while the computed results stay in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Category of a per-file parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureKind {
    /// Content does not decode as the format it claims to be.
    Corrupt,
    /// No parser accepts the file (or the entry inside an archive).
    Unsupported,
    /// The file decodes but carries no usable content.
    Empty,
    /// A size, depth, or entry-count bound was exceeded.
    TooLarge,
}

impl ParseFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseFailureKind::Corrupt => "corrupt",
            ParseFailureKind::Unsupported => "unsupported",
            ParseFailureKind::Empty => "empty",
            ParseFailureKind::TooLarge => "too_large",
        }
    }
}

impl fmt::Display for ParseFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A typed parse failure with a human-readable cause.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {cause}")]
pub struct ParseError {
    pub kind: ParseFailureKind,
    pub cause: String,
}

impl ParseError {
    pub fn new(kind: ParseFailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn corrupt(cause: impl Into<String>) -> Self {
        Self::new(ParseFailureKind::Corrupt, cause)
    }

    pub fn unsupported(cause: impl Into<String>) -> Self {
        Self::new(ParseFailureKind::Unsupported, cause)
    }

    pub fn empty(cause: impl Into<String>) -> Self {
        Self::new(ParseFailureKind::Empty, cause)
    }

    pub fn too_large(cause: impl Into<String>) -> Self {
        Self::new(ParseFailureKind::TooLarge, cause)
    }
}

impl From<zip::result::ZipError> for ParseError {
    fn from(e: zip::result::ZipError) -> Self {
        ParseError::corrupt(format!("zip container: {}", e))
    }
}

impl From<quick_xml::Error> for ParseError {
    fn from(e: quick_xml::Error) -> Self {
        ParseError::corrupt(format!("xml: {}", e))
    }
}

/// Startup configuration errors. A run never begins when one is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("discovery root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
}

/// Failure to make the index, metrics snapshot, or trend log durable.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the durable cache backing store.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("cache store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
