//! Expiration mechanisms: which received pieces go stale.
//!
//! Expired pieces move from `received` to `discarded` and are logged as
//! discarded in the iteration. A later delivery can restore them.

use contagion_types::PieceIdx;

use super::MechanismContext;
use crate::protocol::ProtocolError;
use crate::user_state::UserState;

/// Chooses received pieces to drop.
pub trait ExpirationMechanism: core::fmt::Debug + Send + Sync {
    /// Pieces of `state.received()` to expire this iteration, excluding
    /// anything in `keep` (pieces just selected for sending).
    fn expire(
        &self,
        state: &UserState,
        keep: &[PieceIdx],
        ctx: &MechanismContext<'_>,
    ) -> Vec<PieceIdx>;
}

/// Never expire anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeverExpire;

impl ExpirationMechanism for NeverExpire {
    fn expire(
        &self,
        _state: &UserState,
        _keep: &[PieceIdx],
        _ctx: &MechanismContext<'_>,
    ) -> Vec<PieceIdx> {
        Vec::new()
    }
}

/// Drop pieces received more than `max_age` iterations ago.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeExpiration {
    max_age: u64,
}

impl AgeExpiration {
    /// Create the mechanism.
    pub const fn new(max_age: u64) -> Self {
        Self { max_age }
    }
}

impl ExpirationMechanism for AgeExpiration {
    fn expire(
        &self,
        state: &UserState,
        keep: &[PieceIdx],
        ctx: &MechanismContext<'_>,
    ) -> Vec<PieceIdx> {
        state
            .received()
            .values()
            .filter(|record| ctx.iteration.saturating_sub(record.timestamp) > self.max_age)
            .map(|record| record.piece)
            .filter(|piece| !keep.contains(piece))
            .collect()
    }
}

/// Keep at most `capacity` received pieces, dropping the oldest first.
/// Ties on timestamp drop the lower piece index first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExpiration {
    capacity: usize,
}

impl CapacityExpiration {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, ProtocolError> {
        if capacity == 0 {
            return Err(ProtocolError::InvalidParameter {
                mechanism: "capacity expiration",
                reason: "capacity must be at least 1".to_owned(),
            });
        }
        Ok(Self { capacity })
    }
}

impl ExpirationMechanism for CapacityExpiration {
    fn expire(
        &self,
        state: &UserState,
        keep: &[PieceIdx],
        _ctx: &MechanismContext<'_>,
    ) -> Vec<PieceIdx> {
        let mut pending: Vec<(u64, PieceIdx)> = state
            .received()
            .values()
            .filter(|record| !keep.contains(&record.piece))
            .map(|record| (record.timestamp, record.piece))
            .collect();
        let excess = pending.len().saturating_sub(self.capacity);
        if excess == 0 {
            return Vec::new();
        }
        pending.sort_unstable();
        let mut expired: Vec<PieceIdx> = pending
            .into_iter()
            .take(excess)
            .map(|(_, piece)| piece)
            .collect();
        expired.sort_unstable();
        expired
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use contagion_graph::{AdjacencyGraph, Data, DataBuilder};
    use contagion_types::{PropagatedInformation, UserIdx};

    use super::*;
    use crate::mechanisms::update::EarliestUnion;

    fn data() -> Data {
        let mut builder = DataBuilder::new();
        builder.add_user("solo", BTreeSet::new()).unwrap();
        builder.build(AdjacencyGraph::builder(1, false).build()).unwrap()
    }

    /// Pieces 0..4 received at iterations 1, 2, 2, 5.
    fn state() -> UserState {
        let mut state = UserState::default();
        for (piece, at) in [(0, 1), (1, 2), (2, 2), (3, 5)] {
            state.receive(
                &PropagatedInformation::new(PieceIdx(piece), at, UserIdx(9)),
                &EarliestUnion,
            );
        }
        state
    }

    #[test]
    fn never_expire_keeps_everything() {
        let data = data();
        let ctx = MechanismContext::new(&data, 100, 100);
        assert!(NeverExpire.expire(&state(), &[], &ctx).is_empty());
    }

    #[test]
    fn age_expiration_drops_old_pieces() {
        let data = data();
        let ctx = MechanismContext::new(&data, 5, 5);
        let expired = AgeExpiration::new(3).expire(&state(), &[], &ctx);
        // Ages are 4, 3, 3, 0.
        assert_eq!(expired, vec![PieceIdx(0)]);
    }

    #[test]
    fn age_expiration_skips_kept_pieces() {
        let data = data();
        let ctx = MechanismContext::new(&data, 10, 10);
        let expired = AgeExpiration::new(3).expire(&state(), &[PieceIdx(1)], &ctx);
        assert_eq!(expired, vec![PieceIdx(0), PieceIdx(2), PieceIdx(3)]);
    }

    #[test]
    fn capacity_expiration_drops_oldest_with_index_tiebreak() {
        let data = data();
        let ctx = MechanismContext::new(&data, 6, 6);
        let expired = CapacityExpiration::new(2).unwrap().expire(&state(), &[], &ctx);
        assert_eq!(expired, vec![PieceIdx(0), PieceIdx(1)]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(CapacityExpiration::new(0).is_err());
    }
}
