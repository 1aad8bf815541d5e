//! Shared type definitions for the Contagion diffusion simulator.
//!
//! This crate is the single source of truth for the value types that flow
//! between the data collaborator, the diffusion engine, and downstream
//! consumers of the iteration log.
//!
//! # Modules
//!
//! - [`ids`] -- Dense integer index wrappers for users and information pieces
//! - [`enums`] -- Edge orientation and edge type enumerations
//! - [`structs`] -- Information pieces, users, and propagated-information records

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EdgeOrientation, EdgeType};
pub use ids::{PieceIdx, UserIdx};
pub use structs::{FeatureTag, InformationPiece, PropagatedInformation, User};
