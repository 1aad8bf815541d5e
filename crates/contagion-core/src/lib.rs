//! Information-diffusion simulation engine for the Contagion simulator.
//!
//! A [`Protocol`] bundles one instance of each of the five mechanisms
//! (selection, propagation, update, expiration, sight). The [`Simulator`]
//! drives it one iteration at a time over an immutable
//! [`Data`](contagion_graph::Data) snapshot, emitting an immutable
//! [`Iteration`] per step into a [`Simulation`] log. The per-user
//! [`SimulationState`] is always a fold of that log.
//!
//! # Modules
//!
//! - [`clock`] -- Iteration counter and iteration-to-timestamp mapping.
//! - [`config`] -- YAML configuration structures and loader.
//! - [`iteration`] -- The per-step event record.
//! - [`mechanisms`] -- The five mechanism traits and their variants.
//! - [`protocol`] -- Validated assembly of mechanisms from configuration.
//! - [`rng`] -- Seeded per-user random streams.
//! - [`runner`] -- Bounded run loop with stop conditions.
//! - [`simulation`] -- Iteration log and the replayed state projection.
//! - [`simulator`] -- The per-iteration state machine.
//! - [`user_state`] -- Per-user partition of known pieces.
//!
//! [`Protocol`]: protocol::Protocol
//! [`Simulator`]: simulator::Simulator
//! [`Iteration`]: iteration::Iteration
//! [`Simulation`]: simulation::Simulation
//! [`SimulationState`]: simulation::SimulationState

pub mod clock;
pub mod config;
pub mod iteration;
pub mod mechanisms;
pub mod protocol;
pub mod rng;
pub mod runner;
pub mod simulation;
pub mod simulator;
pub mod user_state;
