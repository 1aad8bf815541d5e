//! Core value structs: information pieces, users, and propagated records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{PieceIdx, UserIdx};

// ---------------------------------------------------------------------------
// Feature tags
// ---------------------------------------------------------------------------

/// A `(feature-name, value)` tag attached to a user or an information piece.
///
/// Examples: `("hashtag", "rust")`, `("topic", "sports")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureTag {
    /// Feature name.
    pub name: String,
    /// Feature value.
    pub value: String,
}

impl FeatureTag {
    /// Create a new feature tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Information pieces and users
// ---------------------------------------------------------------------------

/// An atomic unit of diffusable content. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationPiece {
    /// External identifier of the piece.
    pub id: String,
    /// External identifier of the user who created the piece.
    pub creator: String,
    /// Real creation timestamp.
    pub timestamp: u64,
    /// Feature tags of the piece.
    #[serde(default)]
    pub features: BTreeSet<FeatureTag>,
}

/// A user of the social network as described by the dataset.
///
/// The initial own-piece set of a user is every piece it created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// External identifier of the user.
    pub id: String,
    /// Feature tags of the user.
    #[serde(default)]
    pub features: BTreeSet<FeatureTag>,
}

// ---------------------------------------------------------------------------
// Propagated information
// ---------------------------------------------------------------------------

/// A piece known to a user, with evidence of who sent it and when.
///
/// `provenance` is the set of sender indices from which the user has
/// received the piece. For a user's own pieces it contains the creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedInformation {
    /// The piece.
    pub piece: PieceIdx,
    /// Iteration at which this record was produced.
    pub timestamp: u64,
    /// Users that sent the piece.
    pub provenance: BTreeSet<UserIdx>,
}

impl PropagatedInformation {
    /// A record with a single sender.
    pub fn new(piece: PieceIdx, timestamp: u64, sender: UserIdx) -> Self {
        Self {
            piece,
            timestamp,
            provenance: BTreeSet::from([sender]),
        }
    }

    /// A record with an explicit provenance set.
    pub const fn with_provenance(
        piece: PieceIdx,
        timestamp: u64,
        provenance: BTreeSet<UserIdx>,
    ) -> Self {
        Self {
            piece,
            timestamp,
            provenance,
        }
    }

    /// Number of distinct senders.
    pub fn sender_count(&self) -> usize {
        self.provenance.len()
    }

    /// Union of both provenance sets.
    pub fn provenance_union(&self, other: &Self) -> BTreeSet<UserIdx> {
        self.provenance.union(&other.provenance).copied().collect()
    }
}
