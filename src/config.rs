//! Configuration types for circuit-sched

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Simulator mode selected on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Genetic search over full assignments
    Genetic,
    /// Greedy per-download candidate search
    Greedy,
    /// Single steady-state upper bound over the whole circuit universe
    MaxBw,
    /// Diverse Weighted Circuits online emulation
    Dwc,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "genetic" => Ok(Mode::Genetic),
            "greedy" => Ok(Mode::Greedy),
            "maxbw" => Ok(Mode::MaxBw),
            "dwc" => Ok(Mode::Dwc),
            other => Err(Error::Config {
                message: format!(
                    "unrecognized mode '{other}' (expected genetic, greedy, maxbw, or dwc)"
                ),
                key: Some("mode".into()),
            }),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Genetic => "genetic",
            Mode::Greedy => "greedy",
            Mode::MaxBw => "maxbw",
            Mode::Dwc => "dwc",
        };
        write!(f, "{name}")
    }
}

/// Order in which the greedy strategy processes downloads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// By end time, ascending
    #[default]
    Inorder,
    /// By duration, descending
    Longest,
    /// By duration, ascending
    Shortest,
}

impl SelectionPolicy {
    /// Parse a policy name, falling back to `Inorder` with a warning on
    /// unknown input (matching the tolerant CLI behavior for this option)
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "inorder" => SelectionPolicy::Inorder,
            "longest" => SelectionPolicy::Longest,
            "shortest" => SelectionPolicy::Shortest,
            other => {
                tracing::warn!(policy = other, "no selection mode, defaulting to inorder");
                SelectionPolicy::Inorder
            }
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SelectionPolicy::Inorder => "inorder",
            SelectionPolicy::Longest => "longest",
            SelectionPolicy::Shortest => "shortest",
        };
        write!(f, "{name}")
    }
}

/// Genetic algorithm parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneticConfig {
    /// Number of experiments per generation (default: 100)
    #[serde(default = "default_population")]
    pub population: usize,

    /// Draw the initial population from bandwidth-weighted candidate pools
    /// instead of uniformly (default: true)
    #[serde(default = "default_true")]
    pub initial_weighted: bool,

    /// Top fraction of the population eligible as parents (default: 0.2)
    #[serde(default = "default_breed_percentile")]
    pub breed_percentile: f64,

    /// Weight parent selection by experiment score instead of drawing
    /// uniformly from the breed pool (default: true)
    #[serde(default = "default_true")]
    pub breed_weighted: bool,

    /// Top fraction of the population copied verbatim into the next
    /// generation (default: 0.1)
    #[serde(default = "default_elite_percentile")]
    pub elite_percentile: f64,

    /// Probability of replacing any single download's inherited circuit
    /// with a uniformly random candidate (default: 0.01)
    #[serde(default = "default_mutation_probability")]
    pub mutation_probability: f64,

    /// Stop after this many rounds (None = run until killed)
    #[serde(default)]
    pub rounds: Option<u64>,

    /// Stop after this many consecutive rounds without improvement of the
    /// best score (None = never)
    #[serde(default)]
    pub stall_rounds: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population: default_population(),
            initial_weighted: true,
            breed_percentile: default_breed_percentile(),
            breed_weighted: true,
            elite_percentile: default_elite_percentile(),
            mutation_probability: default_mutation_probability(),
            rounds: None,
            stall_rounds: None,
        }
    }
}

impl GeneticConfig {
    /// Check that all parameters are within their documented ranges
    pub fn validate(&self) -> Result<()> {
        if self.population == 0 {
            return Err(config_error("population must be at least 1", "population"));
        }
        if !(self.breed_percentile > 0.0 && self.breed_percentile <= 1.0) {
            return Err(config_error(
                "breed_percentile must be within (0, 1]",
                "breed_percentile",
            ));
        }
        if !(0.0..=1.0).contains(&self.elite_percentile) {
            return Err(config_error(
                "elite_percentile must be within [0, 1]",
                "elite_percentile",
            ));
        }
        if !(0.0..=1.0).contains(&self.mutation_probability) {
            return Err(config_error(
                "mutation probability must be within [0, 1]",
                "mutate",
            ));
        }
        Ok(())
    }
}

/// Greedy strategy parameters
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GreedyConfig {
    /// Order in which downloads are committed
    #[serde(default)]
    pub selection: SelectionPolicy,
}

/// Top-level simulator configuration, populated by the CLI
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    /// Worker threads for parallel scoring and candidate scanning (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Directory where round snapshots and per-client files are written
    /// (default: "circuits")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Genetic algorithm parameters
    #[serde(default)]
    pub genetic: GeneticConfig,

    /// Greedy strategy parameters
    #[serde(default)]
    pub greedy: GreedyConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            output_dir: default_output_dir(),
            genetic: GeneticConfig::default(),
            greedy: GreedyConfig::default(),
        }
    }
}

impl SimConfig {
    /// Check that all parameters are within their documented ranges
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(config_error("threads must be at least 1", "threads"));
        }
        self.genetic.validate()
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.into()),
    }
}

fn default_true() -> bool {
    true
}

fn default_population() -> usize {
    100
}

fn default_breed_percentile() -> f64 {
    0.2
}

fn default_elite_percentile() -> f64 {
    0.1
}

fn default_mutation_probability() -> f64 {
    0.01
}

fn default_threads() -> usize {
    4
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("circuits")
}
