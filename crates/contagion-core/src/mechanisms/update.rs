//! Update mechanisms: merging two records of the same piece for one user.
//!
//! A merge happens whenever a piece the user already holds in `received`
//! (`update_seen`) or in `discarded` (`update_discarded`) is delivered
//! again. Every policy unions provenance; they differ only in which
//! timestamp survives.

use contagion_types::PropagatedInformation;

/// Pairwise merge of two records for the same `(user, piece)`.
///
/// Both functions are pure. Callers only ever merge records of the same
/// piece; the result carries the piece of the first argument.
pub trait UpdateMechanism: core::fmt::Debug + Send + Sync {
    /// Merge a held `received` record with a newly delivered one.
    fn update_seen(
        &self,
        held: &PropagatedInformation,
        incoming: &PropagatedInformation,
    ) -> PropagatedInformation;

    /// Merge a `discarded` record with a newly delivered one. The piece
    /// moves back to `received` with the merged record.
    fn update_discarded(
        &self,
        held: &PropagatedInformation,
        incoming: &PropagatedInformation,
    ) -> PropagatedInformation {
        self.update_seen(held, incoming)
    }
}

/// Keep the earliest timestamp and the union of provenance.
///
/// Commutative: `update_seen(a, b) == update_seen(b, a)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EarliestUnion;

impl UpdateMechanism for EarliestUnion {
    fn update_seen(
        &self,
        held: &PropagatedInformation,
        incoming: &PropagatedInformation,
    ) -> PropagatedInformation {
        PropagatedInformation::with_provenance(
            held.piece,
            held.timestamp.min(incoming.timestamp),
            held.provenance_union(incoming),
        )
    }
}

/// Keep the latest timestamp and the union of provenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatestUnion;

impl UpdateMechanism for LatestUnion {
    fn update_seen(
        &self,
        held: &PropagatedInformation,
        incoming: &PropagatedInformation,
    ) -> PropagatedInformation {
        PropagatedInformation::with_provenance(
            held.piece,
            held.timestamp.max(incoming.timestamp),
            held.provenance_union(incoming),
        )
    }
}

/// The record with the larger provenance set wins the timestamp; ties go
/// to the earlier one. Provenance is still unioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LargestProvenance;

impl UpdateMechanism for LargestProvenance {
    fn update_seen(
        &self,
        held: &PropagatedInformation,
        incoming: &PropagatedInformation,
    ) -> PropagatedInformation {
        let timestamp = match held.sender_count().cmp(&incoming.sender_count()) {
            core::cmp::Ordering::Greater => held.timestamp,
            core::cmp::Ordering::Less => incoming.timestamp,
            core::cmp::Ordering::Equal => held.timestamp.min(incoming.timestamp),
        };
        PropagatedInformation::with_provenance(held.piece, timestamp, held.provenance_union(incoming))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use contagion_types::{PieceIdx, UserIdx};

    use super::*;

    fn record(timestamp: u64, senders: &[u32]) -> PropagatedInformation {
        PropagatedInformation::with_provenance(
            PieceIdx(0),
            timestamp,
            senders.iter().copied().map(UserIdx).collect::<BTreeSet<_>>(),
        )
    }

    #[test]
    fn earliest_union_is_commutative() {
        let a = record(3, &[1, 2]);
        let b = record(1, &[2, 4]);
        let ab = EarliestUnion.update_seen(&a, &b);
        let ba = EarliestUnion.update_seen(&b, &a);
        assert_eq!(ab, ba);
        assert_eq!(ab.timestamp, 1);
        assert_eq!(ab.sender_count(), 3);
    }

    #[test]
    fn latest_union_keeps_latest_timestamp() {
        let merged = LatestUnion.update_seen(&record(3, &[1]), &record(8, &[2]));
        assert_eq!(merged.timestamp, 8);
        assert_eq!(merged.sender_count(), 2);
    }

    #[test]
    fn largest_provenance_picks_timestamp_of_larger_set() {
        let big = record(9, &[1, 2, 3]);
        let small = record(2, &[4]);
        let merged = LargestProvenance.update_seen(&small, &big);
        assert_eq!(merged.timestamp, 9);
        // No sender is lost.
        assert_eq!(merged.sender_count(), 4);

        let tie = LargestProvenance.update_seen(&record(5, &[1]), &record(4, &[2]));
        assert_eq!(tie.timestamp, 4);
    }

    #[test]
    fn discarded_merge_defaults_to_seen_merge() {
        let a = record(3, &[1]);
        let b = record(5, &[2]);
        assert_eq!(
            EarliestUnion.update_discarded(&a, &b),
            EarliestUnion.update_seen(&a, &b)
        );
    }
}
