//! Configuration loading and typed config structures for the Contagion
//! simulator.
//!
//! The canonical configuration lives in `contagion-config.yaml` at the
//! project root. These structs mirror its layout. Parsing only checks
//! shape; value ranges are checked when the protocol is assembled
//! (see [`Protocol::from_config`](crate::protocol::Protocol::from_config)).

use std::path::{Path, PathBuf};

use contagion_types::EdgeOrientation;
use serde::Deserialize;

use crate::mechanisms::EdgeProbability;
use crate::mechanisms::selection::{Limit, Threshold};

/// Environment variable that overrides `simulation.seed`.
pub const SEED_ENV_VAR: &str = "CONTAGION_SEED";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {variable}")]
    Env {
        /// Name of the variable.
        variable: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Run parameters (seed, numbering, bounds).
    #[serde(default)]
    pub simulation: RunConfig,

    /// The diffusion protocol.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Where the dataset lives.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Where the iteration log goes.
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CONTAGION_SEED`, when set, overrides `simulation.seed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Env`] if the seed override is not a `u64`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides
    /// are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply environment overrides to the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(SEED_ENV_VAR) {
            self.simulation.seed = parse_seed(&value)?;
        }
        Ok(())
    }
}

fn parse_seed(value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().ok().ok_or_else(|| ConfigError::Env {
        variable: SEED_ENV_VAR,
        value: value.to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Seed of every random stream.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of the first iteration.
    #[serde(default)]
    pub initial_iteration: u64,

    /// Stop after this many iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Stop early after an iteration in which nobody sent anything.
    #[serde(default = "default_true")]
    pub stop_when_quiescent: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            initial_iteration: 0,
            max_iterations: default_max_iterations(),
            stop_when_quiescent: default_true(),
        }
    }
}

const fn default_seed() -> u64 {
    42
}

const fn default_max_iterations() -> u64 {
    100
}

const fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Mechanism configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct ProtocolConfig {
    /// Named protocol; replaces `selection` and `propagation` when set.
    #[serde(default)]
    pub preset: Option<PresetConfig>,

    /// Selection mechanism.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Propagation mechanism.
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Update mechanism.
    #[serde(default)]
    pub update: UpdateConfig,

    /// Expiration mechanism.
    #[serde(default)]
    pub expiration: ExpirationConfig,

    /// Sight mechanism.
    #[serde(default)]
    pub sight: SightConfig,
}

/// Named protocols with their own parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum PresetConfig {
    /// Push-pull rumor spreading.
    RumorSpreading {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Push gossip.
    Push {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Pull gossip.
    Pull {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Independent cascade.
    IndependentCascade {
        /// Activation probability per sender.
        probability: EdgeProbability,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Count threshold over all neighbors.
    CountThreshold {
        /// Distinct senders needed.
        threshold: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
}

/// Selection mechanism variants.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectionConfig {
    /// Fixed counts.
    Count {
        /// Own pieces per iteration.
        #[serde(default)]
        num_own: Limit,
        /// Received pieces per iteration.
        #[serde(default)]
        num_received: Limit,
        /// Already propagated pieces to send again.
        #[serde(default = "limit_nothing")]
        num_repropagated: Limit,
    },
    /// Sender-count or sender-proportion threshold.
    Threshold {
        /// Own pieces per iteration.
        #[serde(default)]
        num_own: Limit,
        /// When a received piece qualifies.
        threshold: Threshold,
        /// Cap on qualifying received pieces.
        #[serde(default)]
        num_received: Limit,
        /// Neighborhood used by proportion thresholds.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Independent cascade activation.
    IndependentCascade {
        /// Own pieces per iteration.
        #[serde(default)]
        num_own: Limit,
        /// Already propagated pieces to send again.
        #[serde(default = "limit_nothing")]
        num_repropagated: Limit,
        /// Activation probability per sender.
        probability: EdgeProbability,
    },
    /// Replay of real timestamps.
    Timestamp {
        /// Also send pieces whose time has passed.
        #[serde(default)]
        loose: bool,
        /// Cap on received pieces.
        #[serde(default)]
        num_received: Limit,
    },
    /// Bias toward recommended edges.
    Recommender {
        /// Own pieces per iteration.
        #[serde(default)]
        num_own: Limit,
        /// Received pieces per iteration.
        #[serde(default)]
        num_received: Limit,
        /// Probability of drawing from the recommended pool.
        prob: f64,
        /// Orientation of the recommended edges.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::Count {
            num_own: Limit::All,
            num_received: Limit::All,
            num_repropagated: Limit::Nothing,
        }
    }
}

const fn limit_nothing() -> Limit {
    Limit::Nothing
}

/// Propagation mechanism variants.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropagationConfig {
    /// Push-pull with a cool-down window.
    RumorSpreading {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Rumor spreading over recommended edges only.
    PureRecommender {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Orientation of the recommended edges.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Chooser sends to the chosen neighbor.
    Push {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Chosen neighbor sends to the chooser.
    Pull {
        /// Cool-down window length.
        #[serde(default = "default_wait_time")]
        wait_time: usize,
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Every neighbor, every iteration.
    AllNeighbors {
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
    /// Independent trial per neighbor and piece.
    IndependentCascade {
        /// Neighborhood orientation.
        #[serde(default)]
        orientation: EdgeOrientation,
        /// Transmission probability.
        probability: EdgeProbability,
    },
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self::RumorSpreading {
            wait_time: default_wait_time(),
            orientation: EdgeOrientation::Und,
        }
    }
}

const fn default_wait_time() -> usize {
    1
}

/// Update mechanism variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateConfig {
    /// Earliest timestamp, union of provenance.
    #[default]
    EarliestUnion,
    /// Latest timestamp, union of provenance.
    LatestUnion,
    /// Larger provenance set wins.
    LargestProvenance,
}

/// Expiration mechanism variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationConfig {
    /// Keep received pieces forever.
    #[default]
    Never,
    /// Drop received pieces older than `max_age` iterations.
    Age {
        /// Maximum age in iterations.
        max_age: u64,
    },
    /// Keep at most `capacity` received pieces.
    Capacity {
        /// Maximum number of received pieces.
        capacity: usize,
    },
}

/// Sight mechanism variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SightConfig {
    /// Perceive everything.
    #[default]
    All,
    /// Perceive at most `max_pieces` distinct pieces per iteration.
    Count {
        /// Distinct pieces perceived per iteration.
        max_pieces: usize,
    },
    /// Perceive by edge type.
    Recommended {
        /// Probability for pieces arriving over recommended edges.
        prob_recommended: f64,
        /// Probability for everything else.
        prob_other: f64,
        /// Orientation of the recommended edges.
        #[serde(default)]
        orientation: EdgeOrientation,
    },
}

// ---------------------------------------------------------------------------
// I/O and logging
// ---------------------------------------------------------------------------

/// Dataset location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetConfig {
    /// Path of the JSON dataset.
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
        }
    }
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("dataset.json")
}

/// Output location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Path of the JSON iteration log. Standard output when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}
