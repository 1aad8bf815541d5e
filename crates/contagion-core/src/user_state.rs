//! Per-user partition of known information pieces.
//!
//! Every piece a user knows sits in exactly one of four collections:
//!
//! - `own` -- created by the user and not yet sent.
//! - `received` -- delivered by someone else, pending a decision.
//! - `propagated` -- already sent onward.
//! - `discarded` -- seen and dropped (expired).
//!
//! Pieces move forward only (`own -> propagated`, `received -> propagated`,
//! `received -> discarded`), except that a re-delivered discarded piece is
//! merged and restored to `received`. A propagated or own piece ignores
//! re-deliveries.

use std::collections::BTreeMap;

use contagion_types::{PieceIdx, PropagatedInformation, UserIdx};

use crate::mechanisms::UpdateMechanism;

/// Which collection of a [`UserState`] holds a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceStatus {
    /// Created by the user, not yet sent.
    Own,
    /// Delivered and pending a decision.
    Received,
    /// Already sent onward.
    Propagated,
    /// Dropped without being sent.
    Discarded,
}

/// What [`UserState::receive`] did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// The piece was unknown and now sits in `received`.
    New,
    /// The piece was in `received` and the records were merged.
    Merged,
    /// The piece was in `discarded`; the merged record moved to `received`.
    Restored,
    /// The piece is own or propagated; nothing changed.
    Ignored,
}

/// Runtime state of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    own: BTreeMap<PieceIdx, PropagatedInformation>,
    received: BTreeMap<PieceIdx, PropagatedInformation>,
    propagated: BTreeMap<PieceIdx, PropagatedInformation>,
    discarded: BTreeMap<PieceIdx, PropagatedInformation>,
}

impl UserState {
    /// A user holding `pieces` as own pieces, each with provenance `{user}`.
    pub fn with_own(
        user: UserIdx,
        pieces: impl IntoIterator<Item = PieceIdx>,
        timestamp: u64,
    ) -> Self {
        let own = pieces
            .into_iter()
            .map(|piece| (piece, PropagatedInformation::new(piece, timestamp, user)))
            .collect();
        Self {
            own,
            ..Self::default()
        }
    }

    /// Own pieces not yet sent.
    pub const fn own(&self) -> &BTreeMap<PieceIdx, PropagatedInformation> {
        &self.own
    }

    /// Received pieces pending a decision.
    pub const fn received(&self) -> &BTreeMap<PieceIdx, PropagatedInformation> {
        &self.received
    }

    /// Pieces already sent onward.
    pub const fn propagated(&self) -> &BTreeMap<PieceIdx, PropagatedInformation> {
        &self.propagated
    }

    /// Pieces dropped without being sent.
    pub const fn discarded(&self) -> &BTreeMap<PieceIdx, PropagatedInformation> {
        &self.discarded
    }

    /// Collection currently holding `piece`, if any.
    pub fn status(&self, piece: PieceIdx) -> Option<PieceStatus> {
        if self.own.contains_key(&piece) {
            Some(PieceStatus::Own)
        } else if self.received.contains_key(&piece) {
            Some(PieceStatus::Received)
        } else if self.propagated.contains_key(&piece) {
            Some(PieceStatus::Propagated)
        } else if self.discarded.contains_key(&piece) {
            Some(PieceStatus::Discarded)
        } else {
            None
        }
    }

    /// Record held for `piece`, whichever collection it is in.
    pub fn get(&self, piece: PieceIdx) -> Option<&PropagatedInformation> {
        self.own
            .get(&piece)
            .or_else(|| self.received.get(&piece))
            .or_else(|| self.propagated.get(&piece))
            .or_else(|| self.discarded.get(&piece))
    }

    /// Total number of known pieces.
    pub fn len(&self) -> usize {
        self.own
            .len()
            .saturating_add(self.received.len())
            .saturating_add(self.propagated.len())
            .saturating_add(self.discarded.len())
    }

    /// Whether the user knows no piece at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether no piece occupies two collections.
    pub fn is_disjoint(&self) -> bool {
        let collections = [&self.own, &self.received, &self.propagated, &self.discarded];
        collections.iter().enumerate().all(|(i, a)| {
            collections
                .iter()
                .skip(i.saturating_add(1))
                .all(|b| a.keys().all(|piece| !b.contains_key(piece)))
        })
    }

    /// Move a piece into `propagated`.
    ///
    /// The held record is kept. A piece the user did not hold (only when
    /// replaying a foreign log) is inserted with `record`.
    pub(crate) fn propagate(&mut self, record: &PropagatedInformation) {
        let piece = record.piece;
        if self.propagated.contains_key(&piece) {
            return;
        }
        let held = self
            .own
            .remove(&piece)
            .or_else(|| self.received.remove(&piece))
            .or_else(|| self.discarded.remove(&piece))
            .unwrap_or_else(|| record.clone());
        self.propagated.insert(piece, held);
    }

    /// Move a received piece into `discarded`.
    ///
    /// Own and propagated pieces are never discarded.
    pub(crate) fn discard(&mut self, record: &PropagatedInformation) {
        let piece = record.piece;
        if self.own.contains_key(&piece) || self.propagated.contains_key(&piece) {
            return;
        }
        let held = self
            .received
            .remove(&piece)
            .unwrap_or_else(|| record.clone());
        self.discarded.insert(piece, held);
    }

    /// Apply one delivery of `record`.
    pub(crate) fn receive(
        &mut self,
        record: &PropagatedInformation,
        update: &dyn UpdateMechanism,
    ) -> Receipt {
        let piece = record.piece;
        if self.own.contains_key(&piece) || self.propagated.contains_key(&piece) {
            return Receipt::Ignored;
        }
        if let Some(held) = self.received.get_mut(&piece) {
            *held = update.update_seen(held, record);
            return Receipt::Merged;
        }
        if let Some(held) = self.discarded.remove(&piece) {
            let merged = update.update_discarded(&held, record);
            self.received.insert(piece, merged);
            return Receipt::Restored;
        }
        self.received.insert(piece, record.clone());
        Receipt::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanisms::update::EarliestUnion;

    fn record(piece: u32, timestamp: u64, sender: u32) -> PropagatedInformation {
        PropagatedInformation::new(PieceIdx(piece), timestamp, UserIdx(sender))
    }

    #[test]
    fn own_pieces_carry_the_creator() {
        let state = UserState::with_own(UserIdx(3), [PieceIdx(0), PieceIdx(1)], 0);
        assert_eq!(state.own().len(), 2);
        assert_eq!(state.status(PieceIdx(1)), Some(PieceStatus::Own));
        assert!(
            state
                .get(PieceIdx(0))
                .is_some_and(|info| info.provenance.contains(&UserIdx(3)))
        );
    }

    #[test]
    fn receive_then_merge_then_propagate() {
        let mut state = UserState::default();
        assert!(state.is_empty());
        assert_eq!(state.receive(&record(5, 1, 1), &EarliestUnion), Receipt::New);
        assert_eq!(state.receive(&record(5, 2, 2), &EarliestUnion), Receipt::Merged);
        assert_eq!(state.received().get(&PieceIdx(5)).map(|r| r.sender_count()), Some(2));

        state.propagate(&record(5, 3, 0));
        assert_eq!(state.status(PieceIdx(5)), Some(PieceStatus::Propagated));
        assert_eq!(state.len(), 1);
        // The held record survives the move.
        assert_eq!(state.propagated().get(&PieceIdx(5)).map(|r| r.timestamp), Some(1));
        assert!(state.is_disjoint());
    }

    #[test]
    fn own_and_propagated_pieces_ignore_deliveries() {
        let mut state = UserState::with_own(UserIdx(0), [PieceIdx(1)], 0);
        assert_eq!(state.receive(&record(1, 4, 2), &EarliestUnion), Receipt::Ignored);
        state.propagate(&record(1, 4, 0));
        assert_eq!(state.receive(&record(1, 5, 2), &EarliestUnion), Receipt::Ignored);
        assert_eq!(state.status(PieceIdx(1)), Some(PieceStatus::Propagated));
        assert!(state.own().is_empty());
    }

    #[test]
    fn discarded_piece_is_restored_on_redelivery() {
        let mut state = UserState::default();
        state.receive(&record(2, 1, 1), &EarliestUnion);
        state.discard(&record(2, 1, 1));
        assert_eq!(state.status(PieceIdx(2)), Some(PieceStatus::Discarded));

        assert_eq!(state.receive(&record(2, 6, 4), &EarliestUnion), Receipt::Restored);
        let held = state.received().get(&PieceIdx(2));
        assert_eq!(held.map(|r| r.timestamp), Some(1));
        assert_eq!(held.map(|r| r.sender_count()), Some(2));
        assert!(state.discarded().is_empty());
    }

    #[test]
    fn own_piece_is_never_discarded() {
        let mut state = UserState::with_own(UserIdx(0), [PieceIdx(1)], 0);
        state.discard(&record(1, 0, 0));
        assert_eq!(state.status(PieceIdx(1)), Some(PieceStatus::Own));
        assert_eq!(state.len(), 1);
    }
}
