//! # Artifact Harness
//!
//! Incremental parsing, classification, and ranking of engineering document
//! corpora into a deterministic traceability index.
//!
//! Artifact Harness walks a corpus of project documents (word-processor
//! files, spreadsheets, slide decks, diagrams, PDFs, markdown, plain text,
//! and zip archives of any of these), normalizes each file into structural
//! content, tags it with heuristic categories, and scores it. Parse results
//! are cached by file fingerprint so repeated runs over a slowly changing
//! corpus only re-parse what changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ Discovery │──▶│ Cache/Parse │──▶│ Classifier │──▶│ Ranking  │
//! │ walk+glob │   │ SQLite+mem  │   │ detectors  │   │ score    │
//! └───────────┘   └─────────────┘   └────────────┘   └────┬─────┘
//!                                                         │
//!                                   ┌─────────────────────┤
//!                                   ▼                     ▼
//!                             ┌──────────┐         ┌────────────┐
//!                             │  Index   │         │  Metrics   │
//!                             │  JSON    │         │ + trend log│
//!                             └──────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! arx run                         # analyze, rank, write index + metrics
//! arx run --dry-run --top 10      # print the ten best artifacts, write nothing
//! arx cache stats                 # what the durable cache holds
//! arx trend                       # KPIs across all recorded runs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors |
//! | [`discovery`] | Corpus walking and glob filtering |
//! | [`parsers`] | Format parsers and the parser registry |
//! | [`cache`] | Fingerprint-keyed content cache and durable store |
//! | [`classifier`] | Category detectors |
//! | [`ranking`] | Scores, tiers, and ordering |
//! | [`index`] | Index document and atomic writes |
//! | [`metrics`] | Run metrics and trend log |
//! | [`pipeline`] | Run orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`stats`] | Cache statistics command |

pub mod cache;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod error;
pub mod index;
pub mod metrics;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod progress;
pub mod ranking;
pub mod stats;
