//! Social graph and dataset snapshot for the Contagion diffusion simulator.
//!
//! Everything in this crate is read-only for the duration of a simulation
//! run: the engine queries neighborhoods, edge types, creators and feature
//! tags, but never mutates them. All types are `Send + Sync` so the decide
//! phase of an iteration can read them from a worker pool without locking.
//!
//! # Modules
//!
//! - [`error`] -- Error types for lookups and dataset construction.
//! - [`graph`] -- The [`SocialGraph`] trait and the in-memory
//!   [`AdjacencyGraph`] implementation.
//! - [`index`] -- Bijective external-id to dense-index mapping.
//! - [`data`] -- The immutable [`Data`] snapshot and its [`DataBuilder`].
//!
//! [`SocialGraph`]: graph::SocialGraph
//! [`AdjacencyGraph`]: graph::AdjacencyGraph
//! [`Data`]: data::Data
//! [`DataBuilder`]: data::DataBuilder

pub mod data;
pub mod error;
pub mod graph;
pub mod index;

// Re-export primary types at crate root.
pub use data::{Data, DataBuilder};
pub use error::DataError;
pub use graph::{AdjacencyGraph, AdjacencyGraphBuilder, SocialGraph};
pub use index::Index;
