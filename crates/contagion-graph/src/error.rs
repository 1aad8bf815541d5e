//! Error types for the `contagion-graph` crate.
//!
//! A lookup that misses is a contract violation: the engine never retries
//! it and never swallows it. Construction errors are reported while the
//! dataset is assembled, before any simulation starts.

use contagion_types::{PieceIdx, UserIdx};

/// Errors raised by graph queries and dataset construction.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// A user index outside `0..num_users`.
    #[error("unknown user index: {0}")]
    UnknownUser(UserIdx),

    /// A piece index outside `0..num_pieces`.
    #[error("unknown piece index: {0}")]
    UnknownPiece(PieceIdx),

    /// An external user identifier that is not in the dataset.
    #[error("unknown user id: {0}")]
    UnknownUserId(String),

    /// An external piece identifier that is not in the dataset.
    #[error("unknown piece id: {0}")]
    UnknownPieceId(String),

    /// An external identifier was registered twice.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// What was being registered (`user` or `piece`).
        kind: &'static str,
        /// The repeated identifier.
        id: String,
    },

    /// An edge references a node outside the graph.
    #[error("edge {from} -> {to} references a node outside 0..{num_nodes}")]
    DanglingEdge {
        /// Edge origin.
        from: UserIdx,
        /// Edge destination.
        to: UserIdx,
        /// Number of nodes in the graph.
        num_nodes: usize,
    },

    /// An edge from a user to itself.
    #[error("self-loop on user {0}")]
    SelfLoop(UserIdx),

    /// An edge weight that is negative or not finite.
    #[error("invalid weight {weight} on edge {from} -> {to}")]
    InvalidWeight {
        /// Edge origin.
        from: UserIdx,
        /// Edge destination.
        to: UserIdx,
        /// The rejected weight.
        weight: f64,
    },

    /// The graph and the user index disagree on the number of users.
    #[error("graph has {graph_nodes} nodes but the dataset has {users} users")]
    NodeCountMismatch {
        /// Nodes in the graph.
        graph_nodes: usize,
        /// Users in the dataset.
        users: usize,
    },

    /// More entities than a dense `u32` index can address.
    #[error("too many {0} for a dense u32 index")]
    IndexOverflow(&'static str),
}
