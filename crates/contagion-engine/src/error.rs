//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and simulation execution.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: contagion_core::config::ConfigError,
    },

    /// The configured protocol is invalid.
    #[error("protocol error: {source}")]
    Protocol {
        /// The underlying protocol error.
        #[from]
        source: contagion_core::protocol::ProtocolError,
    },

    /// The dataset could not be assembled.
    #[error("dataset error: {source}")]
    Data {
        /// The underlying dataset error.
        #[from]
        source: contagion_graph::DataError,
    },

    /// Simulator construction failed.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying simulation error.
        #[from]
        source: contagion_core::simulator::SimulationError,
    },

    /// Simulation runner failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: contagion_core::runner::RunnerError,
    },

    /// Reading the dataset or writing the output failed.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The dataset or output JSON was malformed.
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The logging subscriber could not be installed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the logging failure.
        message: String,
    },
}
