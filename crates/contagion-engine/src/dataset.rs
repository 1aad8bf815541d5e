//! JSON dataset loader.
//!
//! The engine reads a single JSON document describing the network:
//!
//! ```json
//! {
//!   "directed": false,
//!   "users": [{ "id": "alice" }, { "id": "bob" }],
//!   "pieces": [{ "id": "p1", "creator": "alice", "timestamp": 10 }],
//!   "edges": [{ "from": "alice", "to": "bob" }],
//!   "real_propagations": [{ "user": "bob", "piece": "p1", "timestamp": 12 }]
//! }
//! ```
//!
//! Edges and propagations refer to users and pieces by external id. Edge
//! `weight` defaults to 1 and `type` to `original`.

use std::collections::HashMap;
use std::path::Path;

use contagion_graph::{AdjacencyGraph, Data, DataBuilder, DataError};
use contagion_types::{EdgeType, InformationPiece, User, UserIdx};
use serde::Deserialize;
use tracing::info;

use crate::error::EngineError;

/// The on-disk dataset document.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetFile {
    /// Whether edges are one-way.
    #[serde(default)]
    pub directed: bool,
    /// Users, in index order.
    #[serde(default)]
    pub users: Vec<User>,
    /// Pieces, in index order.
    #[serde(default)]
    pub pieces: Vec<InformationPiece>,
    /// Social links between users.
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
    /// Observed repropagations in the real network.
    #[serde(default)]
    pub real_propagations: Vec<RealPropagationRecord>,
}

/// One edge of the dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeRecord {
    /// Origin user id.
    pub from: String,
    /// Destination user id.
    pub to: String,
    /// Edge weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Edge type.
    #[serde(default, rename = "type")]
    pub edge_type: EdgeType,
}

/// A real-network repropagation.
#[derive(Debug, Clone, Deserialize)]
pub struct RealPropagationRecord {
    /// User id.
    pub user: String,
    /// Piece id.
    pub piece: String,
    /// When the user repropagated the piece.
    pub timestamp: u64,
}

const fn default_weight() -> f64 {
    1.0
}

impl DatasetFile {
    /// Parse a dataset document.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Assemble the immutable [`Data`] snapshot.
    pub fn into_data(self) -> Result<Data, DataError> {
        let mut builder = DataBuilder::new();
        let mut positions: HashMap<&str, UserIdx> = HashMap::with_capacity(self.users.len());
        for user in &self.users {
            let idx = builder.add_user(&user.id, user.features.clone())?;
            positions.insert(user.id.as_str(), idx);
        }

        let mut graph = AdjacencyGraph::builder(builder.num_users(), self.directed);
        for edge in &self.edges {
            let from = lookup(&positions, &edge.from)?;
            let to = lookup(&positions, &edge.to)?;
            graph.add_edge(from, to, edge.weight, edge.edge_type)?;
        }

        for piece in self.pieces {
            builder.add_piece(piece)?;
        }
        for record in &self.real_propagations {
            builder.add_real_propagation(&record.user, &record.piece, record.timestamp)?;
        }

        builder.build(graph.build())
    }
}

fn lookup(positions: &HashMap<&str, UserIdx>, id: &str) -> Result<UserIdx, DataError> {
    positions
        .get(id)
        .copied()
        .ok_or_else(|| DataError::UnknownUserId(id.to_owned()))
}

/// Load and assemble the dataset at `path`.
pub fn load(path: &Path) -> Result<Data, EngineError> {
    let contents = std::fs::read_to_string(path)?;
    let file = DatasetFile::parse(&contents)?;
    let edges = file.edges.len();
    let data = file.into_data()?;
    info!(
        path = %path.display(),
        users = data.num_users(),
        pieces = data.num_pieces(),
        edges,
        "Dataset loaded"
    );
    Ok(data)
}
