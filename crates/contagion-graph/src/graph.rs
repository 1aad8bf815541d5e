//! Social graph: users as nodes, typed weighted edges.
//!
//! The engine consumes the graph only through the [`SocialGraph`] trait, a
//! read-only neighborhood-query provider. [`AdjacencyGraph`] is the
//! in-memory implementation used by the engine binary and the tests.
//!
//! Neighborhood lists are precomputed per orientation when the graph is
//! built, so `neighborhood` is a slice borrow with no allocation.

use std::collections::HashMap;

use contagion_types::{EdgeOrientation, EdgeType, UserIdx};

use crate::error::DataError;

/// Read-only queries over a social graph with dense node indices.
///
/// Implementations must be safe to read from many threads at once.
pub trait SocialGraph: core::fmt::Debug + Send + Sync {
    /// Number of nodes. Valid node indices are `0..num_nodes()`.
    fn num_nodes(&self) -> usize;

    /// Whether edges have a direction.
    fn is_directed(&self) -> bool;

    /// Neighbors of `user` under `orientation`, sorted and without repeats.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownUser`] if `user` is not a node.
    fn neighborhood(
        &self,
        user: UserIdx,
        orientation: EdgeOrientation,
    ) -> Result<&[UserIdx], DataError>;

    /// Whether the edge `from -> to` exists. On an undirected graph the
    /// order of the endpoints does not matter.
    fn contains_edge(&self, from: UserIdx, to: UserIdx) -> bool;

    /// Type of the edge `from -> to`, if it exists.
    fn edge_type(&self, from: UserIdx, to: UserIdx) -> Option<EdgeType>;

    /// Weight of the edge `from -> to`, if it exists.
    fn edge_weight(&self, from: UserIdx, to: UserIdx) -> Option<f64>;

    /// Weight of the edge joining `user` and `neighbor` as seen from `user`
    /// under `orientation`: `In` reads `neighbor -> user`, `Out` reads
    /// `user -> neighbor`, `Und` takes whichever exists (outgoing first).
    fn oriented_weight(
        &self,
        user: UserIdx,
        neighbor: UserIdx,
        orientation: EdgeOrientation,
    ) -> Option<f64> {
        match orientation {
            EdgeOrientation::In => self.edge_weight(neighbor, user),
            EdgeOrientation::Out => self.edge_weight(user, neighbor),
            EdgeOrientation::Und => self
                .edge_weight(user, neighbor)
                .or_else(|| self.edge_weight(neighbor, user)),
        }
    }

    /// Whether the edge joining `user` and `neighbor` under `orientation`
    /// carries `edge_type`. For `Und`, either direction counts.
    fn has_oriented_type(
        &self,
        user: UserIdx,
        neighbor: UserIdx,
        orientation: EdgeOrientation,
        edge_type: EdgeType,
    ) -> bool {
        match orientation {
            EdgeOrientation::In => self.edge_type(neighbor, user) == Some(edge_type),
            EdgeOrientation::Out => self.edge_type(user, neighbor) == Some(edge_type),
            EdgeOrientation::Und => {
                self.edge_type(user, neighbor) == Some(edge_type)
                    || self.edge_type(neighbor, user) == Some(edge_type)
            }
        }
    }
}

/// Attributes stored per directed edge.
#[derive(Debug, Clone, Copy, PartialEq)]
struct EdgeAttrs {
    weight: f64,
    edge_type: EdgeType,
}

/// In-memory adjacency-list graph.
#[derive(Debug, Clone)]
pub struct AdjacencyGraph {
    directed: bool,
    /// Outgoing neighbors per node.
    outgoing: Vec<Vec<UserIdx>>,
    /// Incoming neighbors per node.
    incoming: Vec<Vec<UserIdx>>,
    /// Union of incoming and outgoing neighbors per node.
    either: Vec<Vec<UserIdx>>,
    /// Edge attributes keyed by `(from, to)`. Undirected edges are stored
    /// under both keys.
    edges: HashMap<(UserIdx, UserIdx), EdgeAttrs>,
}

impl AdjacencyGraph {
    /// Start building a graph with `num_nodes` nodes.
    pub fn builder(num_nodes: usize, directed: bool) -> AdjacencyGraphBuilder {
        AdjacencyGraphBuilder::new(num_nodes, directed)
    }

    /// Number of stored edges (an undirected edge counts once).
    pub fn num_edges(&self) -> usize {
        if self.directed {
            self.edges.len()
        } else {
            self.edges.len() / 2
        }
    }

    fn lists(&self, orientation: EdgeOrientation) -> &[Vec<UserIdx>] {
        if !self.directed {
            return &self.either;
        }
        match orientation {
            EdgeOrientation::In => &self.incoming,
            EdgeOrientation::Out => &self.outgoing,
            EdgeOrientation::Und => &self.either,
        }
    }
}

impl SocialGraph for AdjacencyGraph {
    fn num_nodes(&self) -> usize {
        self.either.len()
    }

    fn is_directed(&self) -> bool {
        self.directed
    }

    fn neighborhood(
        &self,
        user: UserIdx,
        orientation: EdgeOrientation,
    ) -> Result<&[UserIdx], DataError> {
        self.lists(orientation)
            .get(user.as_usize())
            .map(Vec::as_slice)
            .ok_or(DataError::UnknownUser(user))
    }

    fn contains_edge(&self, from: UserIdx, to: UserIdx) -> bool {
        self.edges.contains_key(&(from, to))
    }

    fn edge_type(&self, from: UserIdx, to: UserIdx) -> Option<EdgeType> {
        self.edges.get(&(from, to)).map(|attrs| attrs.edge_type)
    }

    fn edge_weight(&self, from: UserIdx, to: UserIdx) -> Option<f64> {
        self.edges.get(&(from, to)).map(|attrs| attrs.weight)
    }
}

/// Incremental builder for [`AdjacencyGraph`].
///
/// Adding the same edge twice keeps the last weight and type.
#[derive(Debug, Clone)]
pub struct AdjacencyGraphBuilder {
    num_nodes: usize,
    directed: bool,
    edges: HashMap<(UserIdx, UserIdx), EdgeAttrs>,
}

impl AdjacencyGraphBuilder {
    /// Create a builder for a graph with `num_nodes` nodes.
    pub fn new(num_nodes: usize, directed: bool) -> Self {
        Self {
            num_nodes,
            directed,
            edges: HashMap::new(),
        }
    }

    /// Add an edge with an explicit weight and type.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::DanglingEdge`] if an endpoint is not a node,
    /// [`DataError::SelfLoop`] if both endpoints are the same user, or
    /// [`DataError::InvalidWeight`] if the weight is negative or not finite.
    pub fn add_edge(
        &mut self,
        from: UserIdx,
        to: UserIdx,
        weight: f64,
        edge_type: EdgeType,
    ) -> Result<&mut Self, DataError> {
        if from.as_usize() >= self.num_nodes || to.as_usize() >= self.num_nodes {
            return Err(DataError::DanglingEdge {
                from,
                to,
                num_nodes: self.num_nodes,
            });
        }
        if from == to {
            return Err(DataError::SelfLoop(from));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(DataError::InvalidWeight { from, to, weight });
        }
        let attrs = EdgeAttrs { weight, edge_type };
        self.edges.insert((from, to), attrs);
        if !self.directed {
            self.edges.insert((to, from), attrs);
        }
        Ok(self)
    }

    /// Add an `Original` edge of weight 1.
    ///
    /// # Errors
    ///
    /// Same as [`add_edge`](Self::add_edge).
    pub fn add_link(&mut self, from: UserIdx, to: UserIdx) -> Result<&mut Self, DataError> {
        self.add_edge(from, to, 1.0, EdgeType::Original)
    }

    /// Freeze the graph and precompute neighborhood lists.
    pub fn build(self) -> AdjacencyGraph {
        let mut outgoing = vec![Vec::new(); self.num_nodes];
        let mut incoming = vec![Vec::new(); self.num_nodes];
        for &(from, to) in self.edges.keys() {
            if let Some(list) = outgoing.get_mut(from.as_usize()) {
                list.push(to);
            }
            if let Some(list) = incoming.get_mut(to.as_usize()) {
                list.push(from);
            }
        }
        for list in outgoing.iter_mut().chain(incoming.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }
        let either = outgoing
            .iter()
            .zip(&incoming)
            .map(|(out, inc)| {
                let mut merged: Vec<UserIdx> = out.iter().chain(inc).copied().collect();
                merged.sort_unstable();
                merged.dedup();
                merged
            })
            .collect();

        tracing::debug!(
            nodes = self.num_nodes,
            directed = self.directed,
            edges = self.edges.len(),
            "Social graph built"
        );

        AdjacencyGraph {
            directed: self.directed,
            outgoing,
            incoming,
            either,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn u(raw: u32) -> UserIdx {
        UserIdx(raw)
    }

    /// 0 -> 1, 0 -> 2, 2 -> 0 (recommended, weight 0.5)
    fn directed_fixture() -> AdjacencyGraph {
        let mut builder = AdjacencyGraph::builder(4, true);
        builder.add_link(u(0), u(1)).unwrap();
        builder.add_link(u(0), u(2)).unwrap();
        builder
            .add_edge(u(2), u(0), 0.5, EdgeType::Recommended)
            .unwrap();
        builder.build()
    }

    #[test]
    fn directed_neighborhoods_follow_orientation() {
        let graph = directed_fixture();
        assert_eq!(
            graph.neighborhood(u(0), EdgeOrientation::Out).unwrap(),
            &[u(1), u(2)]
        );
        assert_eq!(graph.neighborhood(u(0), EdgeOrientation::In).unwrap(), &[u(2)]);
        assert_eq!(
            graph.neighborhood(u(0), EdgeOrientation::Und).unwrap(),
            &[u(1), u(2)]
        );
        assert!(graph.neighborhood(u(3), EdgeOrientation::Und).unwrap().is_empty());
    }

    #[test]
    fn undirected_edges_are_symmetric() {
        let mut builder = AdjacencyGraph::builder(3, false);
        builder.add_link(u(0), u(1)).unwrap();
        let graph = builder.build();
        assert!(graph.contains_edge(u(1), u(0)));
        assert_eq!(graph.neighborhood(u(1), EdgeOrientation::In).unwrap(), &[u(0)]);
        assert_eq!(graph.num_edges(), 1);
    }

    #[test]
    fn unknown_user_is_an_error() {
        let graph = directed_fixture();
        let result = graph.neighborhood(u(9), EdgeOrientation::Out);
        assert!(matches!(result, Err(DataError::UnknownUser(idx)) if idx == u(9)));
    }

    #[test]
    fn dangling_and_self_edges_are_rejected() {
        let mut builder = AdjacencyGraph::builder(2, true);
        assert!(matches!(
            builder.add_link(u(0), u(5)),
            Err(DataError::DanglingEdge { .. })
        ));
        assert!(matches!(builder.add_link(u(1), u(1)), Err(DataError::SelfLoop(_))));
        assert!(matches!(
            builder.add_edge(u(0), u(1), -1.0, EdgeType::Original),
            Err(DataError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn oriented_queries_read_the_right_direction() {
        let graph = directed_fixture();
        // Edge 2 -> 0 is incoming for user 0.
        assert_eq!(graph.oriented_weight(u(0), u(2), EdgeOrientation::In), Some(0.5));
        assert_eq!(graph.oriented_weight(u(0), u(1), EdgeOrientation::In), None);
        assert!(graph.has_oriented_type(
            u(0),
            u(2),
            EdgeOrientation::In,
            EdgeType::Recommended
        ));
        // Outgoing 0 -> 2 is original, but Und accepts either direction.
        assert!(!graph.has_oriented_type(
            u(0),
            u(2),
            EdgeOrientation::Out,
            EdgeType::Recommended
        ));
        assert!(graph.has_oriented_type(
            u(0),
            u(2),
            EdgeOrientation::Und,
            EdgeType::Recommended
        ));
    }
}
