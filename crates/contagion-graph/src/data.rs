//! Immutable dataset snapshot consumed by the simulation engine.
//!
//! A [`Data`] bundles the social graph with the user and piece catalogues:
//! external-id mappings, feature tags, creators, the initial own-piece set
//! of every user, and the propagations observed in the real network. It is
//! assembled once through [`DataBuilder`] and never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};

use contagion_types::{FeatureTag, InformationPiece, PieceIdx, UserIdx};

use crate::error::DataError;
use crate::graph::SocialGraph;
use crate::index::Index;

/// Read-only snapshot of the social network and its information pieces.
#[derive(Debug)]
pub struct Data {
    graph: Box<dyn SocialGraph>,
    users: Index,
    pieces: Index,
    user_features: Vec<BTreeSet<FeatureTag>>,
    piece_info: Vec<InformationPiece>,
    creators: Vec<UserIdx>,
    own: Vec<BTreeSet<PieceIdx>>,
    real_propagated: Vec<BTreeMap<PieceIdx, u64>>,
    /// Sorted distinct creation timestamps.
    timestamps: Vec<u64>,
}

impl Data {
    /// The social graph.
    pub fn graph(&self) -> &dyn SocialGraph {
        self.graph.as_ref()
    }

    /// Number of users.
    pub const fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Number of information pieces.
    pub const fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    /// All user indices in ascending order.
    pub fn users(&self) -> impl Iterator<Item = UserIdx> + '_ {
        (0..self.users.len()).filter_map(UserIdx::from_usize)
    }

    /// All piece indices in ascending order.
    pub fn pieces(&self) -> impl Iterator<Item = PieceIdx> + '_ {
        (0..self.pieces.len()).filter_map(PieceIdx::from_usize)
    }

    /// Dense index of an external user id.
    pub fn user_index(&self, id: &str) -> Result<UserIdx, DataError> {
        self.users
            .position(id)
            .map(UserIdx)
            .ok_or_else(|| DataError::UnknownUserId(id.to_owned()))
    }

    /// External id of a user.
    pub fn user_id(&self, user: UserIdx) -> Result<&str, DataError> {
        self.users
            .id(user.into_inner())
            .ok_or(DataError::UnknownUser(user))
    }

    /// Dense index of an external piece id.
    pub fn piece_index(&self, id: &str) -> Result<PieceIdx, DataError> {
        self.pieces
            .position(id)
            .map(PieceIdx)
            .ok_or_else(|| DataError::UnknownPieceId(id.to_owned()))
    }

    /// External id of a piece.
    pub fn piece_id(&self, piece: PieceIdx) -> Result<&str, DataError> {
        self.pieces
            .id(piece.into_inner())
            .ok_or(DataError::UnknownPiece(piece))
    }

    /// Full description of a piece.
    pub fn piece(&self, piece: PieceIdx) -> Result<&InformationPiece, DataError> {
        self.piece_info
            .get(piece.as_usize())
            .ok_or(DataError::UnknownPiece(piece))
    }

    /// Creator of a piece.
    pub fn creator(&self, piece: PieceIdx) -> Result<UserIdx, DataError> {
        self.creators
            .get(piece.as_usize())
            .copied()
            .ok_or(DataError::UnknownPiece(piece))
    }

    /// Pieces created by `user`: its initial own-piece set.
    pub fn own_pieces(&self, user: UserIdx) -> Result<&BTreeSet<PieceIdx>, DataError> {
        self.own
            .get(user.as_usize())
            .ok_or(DataError::UnknownUser(user))
    }

    /// Feature tags of a user.
    pub fn user_features(&self, user: UserIdx) -> Result<&BTreeSet<FeatureTag>, DataError> {
        self.user_features
            .get(user.as_usize())
            .ok_or(DataError::UnknownUser(user))
    }

    /// Feature tags of a piece.
    pub fn piece_features(&self, piece: PieceIdx) -> Result<&BTreeSet<FeatureTag>, DataError> {
        self.piece(piece).map(|info| &info.features)
    }

    /// Creation timestamp of a piece.
    pub fn piece_timestamp(&self, piece: PieceIdx) -> Result<u64, DataError> {
        self.piece(piece).map(|info| info.timestamp)
    }

    /// Pieces the user really repropagated in the observed network, with
    /// the timestamp of the repropagation.
    pub fn real_propagated(&self, user: UserIdx) -> Result<&BTreeMap<PieceIdx, u64>, DataError> {
        self.real_propagated
            .get(user.as_usize())
            .ok_or(DataError::UnknownUser(user))
    }

    /// Sorted distinct creation timestamps of all pieces.
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }
}

/// Incremental builder for [`Data`].
///
/// Users must be added before the pieces they created and before any real
/// propagation that mentions them.
#[derive(Debug, Default)]
pub struct DataBuilder {
    users: Index,
    pieces: Index,
    user_features: Vec<BTreeSet<FeatureTag>>,
    piece_info: Vec<InformationPiece>,
    creators: Vec<UserIdx>,
    real_propagated: Vec<BTreeMap<PieceIdx, u64>>,
}

impl DataBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::DuplicateId`] if the id is already registered.
    pub fn add_user(
        &mut self,
        id: &str,
        features: BTreeSet<FeatureTag>,
    ) -> Result<UserIdx, DataError> {
        let position = self.users.insert("user", id)?;
        self.user_features.push(features);
        self.real_propagated.push(BTreeMap::new());
        Ok(UserIdx(position))
    }

    /// Register a piece. Its creator must already be a registered user.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownUserId`] if the creator is unknown, or
    /// [`DataError::DuplicateId`] if the piece id is already registered.
    pub fn add_piece(&mut self, piece: InformationPiece) -> Result<PieceIdx, DataError> {
        let creator = self
            .users
            .position(&piece.creator)
            .map(UserIdx)
            .ok_or_else(|| DataError::UnknownUserId(piece.creator.clone()))?;
        let position = self.pieces.insert("piece", &piece.id)?;
        self.piece_info.push(piece);
        self.creators.push(creator);
        Ok(PieceIdx(position))
    }

    /// Record that `user_id` repropagated `piece_id` at `timestamp` in the
    /// real network. A repeated record keeps the earliest timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownUserId`] or [`DataError::UnknownPieceId`]
    /// if either id is not registered.
    pub fn add_real_propagation(
        &mut self,
        user_id: &str,
        piece_id: &str,
        timestamp: u64,
    ) -> Result<(), DataError> {
        let user = self
            .users
            .position(user_id)
            .ok_or_else(|| DataError::UnknownUserId(user_id.to_owned()))?;
        let piece = self
            .pieces
            .position(piece_id)
            .map(PieceIdx)
            .ok_or_else(|| DataError::UnknownPieceId(piece_id.to_owned()))?;
        let records = self
            .real_propagated
            .get_mut(user as usize)
            .ok_or(DataError::UnknownUser(UserIdx(user)))?;
        records
            .entry(piece)
            .and_modify(|ts| *ts = (*ts).min(timestamp))
            .or_insert(timestamp);
        Ok(())
    }

    /// Number of users registered so far.
    pub const fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Freeze the dataset around `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::NodeCountMismatch`] if the graph does not have
    /// exactly one node per registered user.
    pub fn build(self, graph: impl SocialGraph + 'static) -> Result<Data, DataError> {
        if graph.num_nodes() != self.users.len() {
            return Err(DataError::NodeCountMismatch {
                graph_nodes: graph.num_nodes(),
                users: self.users.len(),
            });
        }

        let mut own = vec![BTreeSet::new(); self.users.len()];
        for (position, creator) in self.creators.iter().enumerate() {
            let piece = PieceIdx::from_usize(position).ok_or(DataError::IndexOverflow("pieces"))?;
            own.get_mut(creator.as_usize())
                .ok_or(DataError::UnknownUser(*creator))?
                .insert(piece);
        }

        let timestamps: Vec<u64> = self
            .piece_info
            .iter()
            .map(|info| info.timestamp)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        tracing::info!(
            users = self.users.len(),
            pieces = self.pieces.len(),
            timestamps = timestamps.len(),
            "Dataset assembled"
        );

        Ok(Data {
            graph: Box::new(graph),
            users: self.users,
            pieces: self.pieces,
            user_features: self.user_features,
            piece_info: self.piece_info,
            creators: self.creators,
            own,
            real_propagated: self.real_propagated,
            timestamps,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::graph::AdjacencyGraph;

    fn piece(id: &str, creator: &str, timestamp: u64) -> InformationPiece {
        InformationPiece {
            id: id.to_owned(),
            creator: creator.to_owned(),
            timestamp,
            features: BTreeSet::from([FeatureTag::new("topic", "news")]),
        }
    }

    fn fixture() -> Data {
        let mut builder = DataBuilder::new();
        builder.add_user("alice", BTreeSet::new()).unwrap();
        builder
            .add_user("bob", BTreeSet::from([FeatureTag::new("lang", "en")]))
            .unwrap();
        builder.add_piece(piece("p0", "alice", 20)).unwrap();
        builder.add_piece(piece("p1", "alice", 10)).unwrap();
        builder.add_piece(piece("p2", "bob", 20)).unwrap();
        builder.add_real_propagation("bob", "p0", 25).unwrap();
        builder.add_real_propagation("bob", "p0", 22).unwrap();

        let mut graph = AdjacencyGraph::builder(2, false);
        graph.add_link(UserIdx(0), UserIdx(1)).unwrap();
        builder.build(graph.build()).unwrap()
    }

    #[test]
    fn own_pieces_are_derived_from_creators() {
        let data = fixture();
        let alice = data.user_index("alice").unwrap();
        assert_eq!(
            data.own_pieces(alice).unwrap(),
            &BTreeSet::from([PieceIdx(0), PieceIdx(1)])
        );
        assert_eq!(data.creator(PieceIdx(2)).unwrap(), UserIdx(1));
    }

    #[test]
    fn timestamps_are_sorted_and_distinct() {
        let data = fixture();
        assert_eq!(data.timestamps(), &[10, 20]);
    }

    #[test]
    fn real_propagation_keeps_earliest_timestamp() {
        let data = fixture();
        let bob = data.user_index("bob").unwrap();
        assert_eq!(data.real_propagated(bob).unwrap().get(&PieceIdx(0)), Some(&22));
    }

    #[test]
    fn lookups_that_miss_are_errors() {
        let data = fixture();
        assert!(matches!(data.user_index("carol"), Err(DataError::UnknownUserId(_))));
        assert!(matches!(data.piece(PieceIdx(9)), Err(DataError::UnknownPiece(_))));
        assert!(matches!(data.own_pieces(UserIdx(5)), Err(DataError::UnknownUser(_))));
        assert_eq!(data.piece_id(PieceIdx(1)).unwrap(), "p1");
        assert_eq!(data.user_features(UserIdx(1)).unwrap().len(), 1);
    }

    #[test]
    fn piece_with_unknown_creator_is_rejected() {
        let mut builder = DataBuilder::new();
        let result = builder.add_piece(piece("p0", "ghost", 1));
        assert!(matches!(result, Err(DataError::UnknownUserId(id)) if id == "ghost"));
    }

    #[test]
    fn graph_must_match_user_count() {
        let mut builder = DataBuilder::new();
        builder.add_user("alice", BTreeSet::new()).unwrap();
        let graph = AdjacencyGraph::builder(3, true).build();
        assert!(matches!(
            builder.build(graph),
            Err(DataError::NodeCountMismatch { graph_nodes: 3, users: 1 })
        ));
    }
}
