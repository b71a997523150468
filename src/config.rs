//! Engine configuration loading.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::FeatureScores;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Seed for the run. Missing means "draw one from the OS".
    #[serde(default)]
    pub seed: Option<u64>,

    /// Upper bound on instrumented edges. Guard ids past the bound fold
    /// back modulo the bound, with a once-only warning.
    #[serde(default = "default_max_num_guards")]
    pub max_num_guards: usize,

    /// One-in-N odds of picking the favored unit when one is set.
    #[serde(default = "default_favored_selection_odds")]
    pub favored_selection_odds: u64,

    /// Execution budget. Missing means unbounded.
    #[serde(default)]
    pub runs: Option<u64>,

    /// Per-variant feature scores used by pool rescoring.
    #[serde(default)]
    pub feature_scores: FeatureScores,
}

fn default_max_num_guards() -> usize {
    1 << 21
}

fn default_favored_selection_odds() -> u64 {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: None,
            max_num_guards: default_max_num_guards(),
            favored_selection_odds: default_favored_selection_odds(),
            runs: None,
            feature_scores: FeatureScores::default(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<Config>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }
}
