//! Runtime settings shared by the composition root and the workers.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which samples the estimation stage scores each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoredSamples {
    /// Labeled and embedded samples only (label review).
    #[default]
    Labeled,
    /// Unlabeled embedded samples only (label suggestion).
    Unlabeled,
    /// Every embedded sample.
    All,
}

impl ScoredSamples {
    /// `has_label` filter for the scoring query.
    pub fn has_label(self) -> Option<bool> {
        match self {
            Self::Labeled => Some(true),
            Self::Unlabeled => Some(false),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    #[default]
    Random,
    LeastConfident,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// DuckDB database file. `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub embedding_model_dir: PathBuf,
    /// Poll interval of an idle background worker.
    pub idle_interval_secs: u64,
    /// Fail fast when a background cycle errors.
    pub stop_on_error: bool,
    pub scored_samples: ScoredSamples,
    pub sampling: SamplingStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: Some(PathBuf::from("labelwise.duckdb")),
            embedding_model_dir: PathBuf::from("models/all-MiniLM-L6-v2"),
            idle_interval_secs: 10,
            stop_on_error: true,
            scored_samples: ScoredSamples::default(),
            sampling: SamplingStrategy::default(),
        }
    }
}

impl Settings {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}
