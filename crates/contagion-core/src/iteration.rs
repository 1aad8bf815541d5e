//! Immutable record of one simulation step.
//!
//! An [`Iteration`] lists, per user, the pieces propagated, discarded,
//! newly received and re-received during the step, each with the record
//! (timestamp and provenance) involved. Once emitted it is never edited.
//!
//! The serialized layout is one object per iteration with four flat
//! collections of `{user, piece, timestamp, provenance}` entries. Entry
//! order inside a collection carries no meaning.

use std::collections::{BTreeMap, BTreeSet};

use contagion_types::{PieceIdx, PropagatedInformation, UserIdx};
use serde::{Deserialize, Serialize};

/// Per-user records of one event kind.
pub type UserRecords = BTreeMap<UserIdx, BTreeMap<PieceIdx, PropagatedInformation>>;

/// Errors raised while decoding a serialized iteration.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    /// The same `(user, piece)` appears twice in one collection.
    #[error("iteration {number}: duplicate {collection} entry for user {user}, piece {piece}")]
    DuplicateEntry {
        /// Iteration number.
        number: u64,
        /// Name of the offending collection.
        collection: &'static str,
        /// The user.
        user: UserIdx,
        /// The piece.
        piece: PieceIdx,
    },
}

/// The events of one simulation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "IterationRecord", try_from = "IterationRecord")]
pub struct Iteration {
    number: u64,
    propagating: UserRecords,
    discarding: UserRecords,
    receiving: UserRecords,
    rereceiving: UserRecords,
}

impl Iteration {
    /// An empty iteration.
    pub const fn new(number: u64) -> Self {
        Self {
            number,
            propagating: BTreeMap::new(),
            discarding: BTreeMap::new(),
            receiving: BTreeMap::new(),
            rereceiving: BTreeMap::new(),
        }
    }

    /// Iteration number.
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Pieces each user sent.
    pub const fn propagating(&self) -> &UserRecords {
        &self.propagating
    }

    /// Pieces each user dropped.
    pub const fn discarding(&self) -> &UserRecords {
        &self.discarding
    }

    /// Pieces each user received for the first time.
    pub const fn receiving(&self) -> &UserRecords {
        &self.receiving
    }

    /// Pieces each user received again.
    pub const fn rereceiving(&self) -> &UserRecords {
        &self.rereceiving
    }

    pub(crate) fn add_propagating(&mut self, user: UserIdx, record: PropagatedInformation) {
        insert(&mut self.propagating, user, record);
    }

    pub(crate) fn add_discarding(&mut self, user: UserIdx, record: PropagatedInformation) {
        insert(&mut self.discarding, user, record);
    }

    pub(crate) fn add_receiving(&mut self, user: UserIdx, record: PropagatedInformation) {
        insert(&mut self.receiving, user, record);
    }

    pub(crate) fn add_rereceiving(&mut self, user: UserIdx, record: PropagatedInformation) {
        insert(&mut self.rereceiving, user, record);
    }

    /// Whether nothing happened during the step.
    pub fn is_empty(&self) -> bool {
        self.propagating.is_empty()
            && self.discarding.is_empty()
            && self.receiving.is_empty()
            && self.rereceiving.is_empty()
    }

    /// Number of users that sent at least one piece.
    pub fn num_propagating_users(&self) -> usize {
        self.propagating.len()
    }

    /// Number of `(user, piece)` pairs sent.
    pub fn num_propagated(&self) -> usize {
        count_pieces(&self.propagating)
    }

    /// Number of users that dropped at least one piece.
    pub fn num_discarding_users(&self) -> usize {
        self.discarding.len()
    }

    /// Number of `(user, piece)` pairs dropped.
    pub fn num_discarded(&self) -> usize {
        count_pieces(&self.discarding)
    }

    /// Number of users that received at least one new piece.
    pub fn num_receiving_users(&self) -> usize {
        self.receiving.len()
    }

    /// Number of `(user, piece)` pairs received for the first time.
    pub fn num_received(&self) -> usize {
        count_pieces(&self.receiving)
    }

    /// Number of `(user, piece, sender)` triples behind the new receipts.
    pub fn num_received_deliveries(&self) -> usize {
        count_senders(&self.receiving)
    }

    /// Number of users that received at least one piece again.
    pub fn num_rereceiving_users(&self) -> usize {
        self.rereceiving.len()
    }

    /// Number of `(user, piece)` pairs received again.
    pub fn num_rereceived(&self) -> usize {
        count_pieces(&self.rereceiving)
    }

    /// Number of `(user, piece, sender)` triples behind the re-receipts.
    pub fn num_rereceived_deliveries(&self) -> usize {
        count_senders(&self.rereceiving)
    }
}

fn insert(records: &mut UserRecords, user: UserIdx, record: PropagatedInformation) {
    records.entry(user).or_default().insert(record.piece, record);
}

fn count_pieces(records: &UserRecords) -> usize {
    records.values().map(BTreeMap::len).sum()
}

fn count_senders(records: &UserRecords) -> usize {
    records
        .values()
        .flat_map(BTreeMap::values)
        .map(PropagatedInformation::sender_count)
        .sum()
}

// ---------------------------------------------------------------------------
// Serialized layout
// ---------------------------------------------------------------------------

/// One flat entry of a serialized iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationEntry {
    /// The user.
    pub user: UserIdx,
    /// The piece.
    pub piece: PieceIdx,
    /// Record timestamp.
    pub timestamp: u64,
    /// Senders of the piece.
    pub provenance: BTreeSet<UserIdx>,
}

/// Serialized form of an [`Iteration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration number.
    pub number: u64,
    /// Propagated pieces.
    #[serde(default)]
    pub propagating: Vec<IterationEntry>,
    /// Discarded pieces.
    #[serde(default)]
    pub discarding: Vec<IterationEntry>,
    /// Newly received pieces.
    #[serde(default)]
    pub receiving: Vec<IterationEntry>,
    /// Re-received pieces.
    #[serde(default)]
    pub rereceiving: Vec<IterationEntry>,
}

fn flatten(records: UserRecords) -> Vec<IterationEntry> {
    records
        .into_iter()
        .flat_map(|(user, pieces)| {
            pieces.into_values().map(move |record| IterationEntry {
                user,
                piece: record.piece,
                timestamp: record.timestamp,
                provenance: record.provenance,
            })
        })
        .collect()
}

fn nest(
    number: u64,
    collection: &'static str,
    entries: Vec<IterationEntry>,
) -> Result<UserRecords, IterationError> {
    let mut records = UserRecords::new();
    for entry in entries {
        let pieces = records.entry(entry.user).or_default();
        if pieces.contains_key(&entry.piece) {
            return Err(IterationError::DuplicateEntry {
                number,
                collection,
                user: entry.user,
                piece: entry.piece,
            });
        }
        pieces.insert(
            entry.piece,
            PropagatedInformation::with_provenance(entry.piece, entry.timestamp, entry.provenance),
        );
    }
    Ok(records)
}

impl From<Iteration> for IterationRecord {
    fn from(iteration: Iteration) -> Self {
        Self {
            number: iteration.number,
            propagating: flatten(iteration.propagating),
            discarding: flatten(iteration.discarding),
            receiving: flatten(iteration.receiving),
            rereceiving: flatten(iteration.rereceiving),
        }
    }
}

impl TryFrom<IterationRecord> for Iteration {
    type Error = IterationError;

    fn try_from(record: IterationRecord) -> Result<Self, Self::Error> {
        let number = record.number;
        Ok(Self {
            number,
            propagating: nest(number, "propagating", record.propagating)?,
            discarding: nest(number, "discarding", record.discarding)?,
            receiving: nest(number, "receiving", record.receiving)?,
            rereceiving: nest(number, "rereceiving", record.rereceiving)?,
        })
    }
}
