//! Bounded run loop.
//!
//! [`run_simulation`] steps a [`Simulator`] until one of its stop
//! conditions holds:
//!
//! - **Iteration cap**: `max_iterations` iterations have run.
//! - **Quiescence**: (optional) an iteration in which nobody sent
//!   anything.
//!
//! The simulator itself never decides when to stop; this module is the
//! outer driver that does. A failed step ends the run with an error and
//! leaves every committed iteration in the simulator.

use tracing::{info, warn};

use crate::config::RunConfig;
use crate::simulator::{IterationSummary, SimulationError, Simulator};

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// An iteration failed.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying simulation error.
        #[from]
        source: SimulationError,
    },
}

/// When to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBounds {
    /// Maximum number of iterations in this run.
    pub max_iterations: u64,
    /// Stop after an iteration in which nobody propagated.
    pub stop_when_quiescent: bool,
}

impl From<&RunConfig> for RunBounds {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            stop_when_quiescent: config.stop_when_quiescent,
        }
    }
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The iteration cap was reached.
    MaxIterations,
    /// Nobody propagated in the last iteration.
    Quiescent,
}

/// Result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// The reason the run ended.
    pub end_reason: EndReason,
    /// Iterations executed by this call.
    pub iterations_run: u64,
    /// Summary of the last iteration, if any ran.
    pub final_summary: Option<IterationSummary>,
}

/// Callback invoked after each committed iteration.
pub trait IterationCallback {
    /// Called after an iteration is committed.
    fn on_iteration(&mut self, summary: &IterationSummary, simulator: &Simulator);
}

/// A no-op iteration callback.
pub struct NoOpCallback;

impl IterationCallback for NoOpCallback {
    fn on_iteration(&mut self, _summary: &IterationSummary, _simulator: &Simulator) {}
}

/// Run the simulator until a stop condition is met.
///
/// # Errors
///
/// Returns [`RunnerError`] if an iteration fails.
pub fn run_simulation(
    simulator: &mut Simulator,
    bounds: RunBounds,
    callback: &mut dyn IterationCallback,
) -> Result<RunResult, RunnerError> {
    let mut iterations_run: u64 = 0;
    let mut final_summary: Option<IterationSummary> = None;

    info!(
        first_iteration = simulator.clock().iteration(),
        max_iterations = bounds.max_iterations,
        stop_when_quiescent = bounds.stop_when_quiescent,
        "Simulation starting"
    );

    while iterations_run < bounds.max_iterations {
        let summary = simulator.step()?;
        iterations_run = iterations_run.saturating_add(1);
        callback.on_iteration(&summary, simulator);
        final_summary = Some(summary);

        if bounds.stop_when_quiescent && summary.propagated == 0 {
            info!(iteration = summary.number, "No propagation, simulation quiescent");
            return Ok(RunResult {
                end_reason: EndReason::Quiescent,
                iterations_run,
                final_summary,
            });
        }
    }

    info!(
        iterations_run,
        max_iterations = bounds.max_iterations,
        "Iteration limit reached"
    );
    Ok(RunResult {
        end_reason: EndReason::MaxIterations,
        iterations_run,
        final_summary,
    })
}

/// Log the end of a run.
pub fn log_simulation_end(result: &RunResult) {
    info!(
        reason = ?result.end_reason,
        iterations_run = result.iterations_run,
        final_iteration = result.final_summary.map(|s| s.number),
        "Simulation ended"
    );
    if result.final_summary.is_none() {
        warn!("Simulation ended with no iterations executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use contagion_graph::{AdjacencyGraph, DataBuilder};
    use contagion_types::{EdgeOrientation, InformationPiece, UserIdx};

    use super::*;
    use crate::protocol::Protocol;

    /// Counts callback invocations.
    struct Counter(u64);

    impl IterationCallback for Counter {
        fn on_iteration(&mut self, _summary: &IterationSummary, _simulator: &Simulator) {
            self.0 = self.0.saturating_add(1);
        }
    }

    fn simulator() -> Simulator {
        let mut builder = DataBuilder::new();
        for id in ["a", "b", "c", "d"] {
            builder.add_user(id, BTreeSet::new()).unwrap();
        }
        builder
            .add_piece(InformationPiece {
                id: "p".to_owned(),
                creator: "a".to_owned(),
                timestamp: 0,
                features: BTreeSet::new(),
            })
            .unwrap();
        let mut graph = AdjacencyGraph::builder(4, false);
        graph.add_link(UserIdx(0), UserIdx(1)).unwrap();
        graph.add_link(UserIdx(1), UserIdx(2)).unwrap();
        graph.add_link(UserIdx(2), UserIdx(3)).unwrap();
        let data = Arc::new(builder.build(graph.build()).unwrap());
        let protocol = Protocol::count_threshold(1, EdgeOrientation::Und).unwrap();
        Simulator::new(protocol, data, 0, 0).unwrap()
    }

    #[test]
    fn stops_at_iteration_cap() {
        let mut sim = simulator();
        let bounds = RunBounds {
            max_iterations: 2,
            stop_when_quiescent: false,
        };
        let mut counter = Counter(0);
        let result = run_simulation(&mut sim, bounds, &mut counter).unwrap();
        assert_eq!(result.end_reason, EndReason::MaxIterations);
        assert_eq!(result.iterations_run, 2);
        assert_eq!(counter.0, 2);
        assert_eq!(sim.simulation().len(), 2);
    }

    #[test]
    fn stops_when_quiescent() {
        // The piece walks a -> b -> c -> d; d has nobody new to tell but
        // still sends it back to c, so the fifth iteration is silent.
        let mut sim = simulator();
        let bounds = RunBounds {
            max_iterations: 50,
            stop_when_quiescent: true,
        };
        let result = run_simulation(&mut sim, bounds, &mut NoOpCallback).unwrap();
        assert_eq!(result.end_reason, EndReason::Quiescent);
        assert_eq!(result.iterations_run, 5);
        assert_eq!(result.final_summary.map(|s| s.propagated), Some(0));
    }

    #[test]
    fn zero_cap_runs_nothing() {
        let mut sim = simulator();
        let bounds = RunBounds {
            max_iterations: 0,
            stop_when_quiescent: true,
        };
        let result = run_simulation(&mut sim, bounds, &mut NoOpCallback).unwrap();
        assert_eq!(result.iterations_run, 0);
        assert!(result.final_summary.is_none());
        assert!(sim.simulation().is_empty());
    }
}
