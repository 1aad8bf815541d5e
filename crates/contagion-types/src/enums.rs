//! Enumeration types for the social graph.

use serde::{Deserialize, Serialize};

/// Which edges of a directed graph define the neighborhood of a user.
///
/// For a user `u`:
/// - `In` -- users `v` with an edge `v -> u` (in a follow graph: followers).
/// - `Out` -- users `v` with an edge `u -> v` (followees).
/// - `Und` -- the union of both.
///
/// On an undirected graph all three coincide.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrientation {
    /// Incoming edges.
    In,
    /// Outgoing edges.
    Out,
    /// Incoming and outgoing edges.
    #[default]
    Und,
}

impl EdgeOrientation {
    /// The orientation seen from the other endpoint of an edge.
    pub const fn inverse(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
            Self::Und => Self::Und,
        }
    }
}

/// The type tag carried by an edge of the social graph.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// An edge present in the original network.
    #[default]
    Original,
    /// An edge added by a contact recommender.
    Recommended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_swaps_directed_orientations() {
        assert_eq!(EdgeOrientation::In.inverse(), EdgeOrientation::Out);
        assert_eq!(EdgeOrientation::Out.inverse(), EdgeOrientation::In);
        assert_eq!(EdgeOrientation::Und.inverse(), EdgeOrientation::Und);
    }

    #[test]
    fn orientation_uses_snake_case_names() {
        let parsed: EdgeOrientation = serde_json::from_str("\"und\"").unwrap_or(EdgeOrientation::In);
        assert_eq!(parsed, EdgeOrientation::Und);
        let parsed: EdgeType = serde_json::from_str("\"recommended\"").unwrap_or_default();
        assert_eq!(parsed, EdgeType::Recommended);
    }
}
