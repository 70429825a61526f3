//! Configuration for PWLSAT.
//!
//! All tunables live in one [`Options`] value that is passed explicitly
//! into the engine and the portfolio; nothing reads process-wide state.
//! Options load from TOML and fall back to defaults field by field.
//!
//! ```
//! use pwlsat_config::Options;
//!
//! let options = Options::from_toml_str(r#"
//!     timeout = 60
//!     local_search = true
//!     branching = "polarity"
//! "#).unwrap();
//!
//! assert_eq!(options.timeout, 60);
//! assert!(options.local_search);
//! ```
//!
//! Use defaults when the file is missing:
//!
//! ```
//! use pwlsat_config::Options;
//!
//! let options = Options::load("pwlsat.toml").unwrap_or_default();
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which heuristic picks the constraint to split on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivideStrategy {
    /// Highest polarity-derived score.
    #[default]
    Polarity,
    /// Top of the pseudo-cost tracker.
    PseudoCost,
    /// Deepest violation under the sum-of-infeasibilities cost.
    Soi,
    /// Sum-of-infeasibilities violation, polarity tie-break.
    SoiPolarity,
}

/// The full option set consumed by the engine, the portfolio and the CLI.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Options {
    /// Path to a dumped query file.
    pub input_query_path: Option<PathBuf>,

    /// If set, dump the parsed query here and exit.
    pub query_dump_file: Option<PathBuf>,

    /// Path of the single-line result summary. If the file already exists
    /// the run short-circuits.
    pub summary_file: Option<PathBuf>,

    /// Per-worker timeout in seconds; 0 disables the budget.
    pub timeout: u64,

    /// Random flips tolerated before local search forces a split.
    pub constraint_violation_threshold: u32,

    /// Drive the search by sum-of-infeasibilities local search.
    pub local_search: bool,

    /// For classification queries: index of the output that should win.
    /// Negative means unset.
    pub max_output: i32,

    /// For classification queries: index of the correct label.
    /// Negative means unset.
    pub correct_output: i32,

    /// Log level, 0 = quiet.
    pub verbosity: u32,

    /// Seed for every randomized heuristic.
    pub seed: u64,

    /// Branching heuristic of the main engine.
    pub branching: DivideStrategy,

    /// Single-thread engines the portfolio spawns next to the managers.
    pub num_workers: usize,

    /// Leaf subqueries a divide-and-conquer manager partitions into.
    pub num_partitions: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            input_query_path: None,
            query_dump_file: None,
            summary_file: None,
            timeout: 0,
            constraint_violation_threshold: 20,
            local_search: false,
            max_output: -1,
            correct_output: -1,
            verbosity: 1,
            seed: 1,
            branching: DivideStrategy::Polarity,
            num_workers: 4,
            num_partitions: 4,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let options: Options = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_partitions == 0 {
            return Err(ConfigError::Invalid("num_partitions must be positive".into()));
        }
        Ok(())
    }

    /// Copy with a different seed, used to diversify portfolio workers.
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut options = self.clone();
        options.seed = seed;
        options
    }

    /// Copy with a different branching heuristic.
    pub fn with_branching(&self, branching: DivideStrategy) -> Self {
        let mut options = self.clone();
        options.branching = branching;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.timeout, 0);
        assert_eq!(options.constraint_violation_threshold, 20);
        assert_eq!(options.branching, DivideStrategy::Polarity);
        assert_eq!(options.correct_output, -1);
        assert!(!options.local_search);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let options = Options::from_toml_str("timeout = 30").unwrap();
        assert_eq!(options.timeout, 30);
        assert_eq!(options.num_partitions, 4);
    }

    #[test]
    fn test_branching_names() {
        let options = Options::from_toml_str("branching = \"soi_polarity\"").unwrap();
        assert_eq!(options.branching, DivideStrategy::SoiPolarity);
        assert!(Options::from_toml_str("branching = \"fanciest\"").is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut options = Options::default();
        options.timeout = 12;
        options.local_search = true;
        options.summary_file = Some(PathBuf::from("/tmp/summary.txt"));
        let text = toml::to_string(&options).unwrap();
        let back = Options::from_toml_str(&text).unwrap();
        assert_eq!(back.timeout, 12);
        assert!(back.local_search);
        assert_eq!(back.summary_file, options.summary_file);
    }

    #[test]
    fn test_zero_partitions_rejected() {
        assert!(Options::from_toml_str("num_partitions = 0").is_err());
    }
}
