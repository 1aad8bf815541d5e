//! Batch engine binary for the Contagion diffusion simulator.
//!
//! Loads a YAML configuration and a JSON dataset, runs one bounded
//! simulation, and writes the resulting iteration log as JSON.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first CLI argument, else `contagion-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Load the dataset
//! 4. Build the protocol
//! 5. Create the simulator
//! 6. Run the simulation loop
//! 7. Write the iteration log
//! 8. Log the result

mod dataset;
mod error;
mod progress_callback;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use contagion_core::config::{LogFormat, LoggingConfig, SimulationConfig};
use contagion_core::protocol::Protocol;
use contagion_core::runner::{self, RunBounds};
use contagion_core::simulation::Simulation;
use contagion_core::simulator::Simulator;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::progress_callback::ProgressCallback;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "contagion-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the simulation itself fails.
fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!("contagion-engine starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        seed = config.simulation.seed,
        initial_iteration = config.simulation.initial_iteration,
        max_iterations = config.simulation.max_iterations,
        stop_when_quiescent = config.simulation.stop_when_quiescent,
        "Run parameters"
    );

    // 3. Load the dataset.
    let data = Arc::new(dataset::load(&config.dataset.path)?);

    // 4. Build the protocol.
    let protocol = Protocol::from_config(&config.protocol)?;
    info!(protocol = ?protocol, "Protocol built");

    // 5. Create the simulator.
    let mut simulator = Simulator::new(
        protocol,
        data,
        config.simulation.seed,
        config.simulation.initial_iteration,
    )?;

    // 6. Run the simulation loop.
    let mut callback = ProgressCallback::new();
    let bounds = RunBounds::from(&config.simulation);
    let result = runner::run_simulation(&mut simulator, bounds, &mut callback)?;
    progress_callback::log_final_state(simulator.state(), callback.totals());

    // 7. Write the iteration log.
    let simulation = simulator.into_simulation();
    write_simulation(&simulation, config.output.path.as_deref())?;

    // 8. Log the result.
    runner::log_simulation_end(&result);

    Ok(())
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist. The flag reports whether the file was read.
fn load_config(path: &Path) -> Result<(SimulationConfig, bool), EngineError> {
    if path.exists() {
        Ok((SimulationConfig::from_file(path)?, true))
    } else {
        let mut config = SimulationConfig::default();
        config.apply_env_overrides()?;
        Ok((config, false))
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), EngineError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let installed = match logging.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| EngineError::Logging {
        message: format!("{e}"),
    })
}

/// Write the log as JSON to `path`, or to stdout when no path is set.
fn write_simulation(simulation: &Simulation, path: Option<&Path>) -> Result<(), EngineError> {
    match path {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, simulation)?;
            writer.flush()?;
            info!(
                path = %path.display(),
                iterations = simulation.len(),
                "Simulation written"
            );
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, simulation)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
