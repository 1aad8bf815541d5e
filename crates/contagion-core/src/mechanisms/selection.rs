//! Selection mechanisms: which held pieces a user sends this iteration.
//!
//! A [`Selection`] has three disjoint parts: pieces taken from `own`,
//! pieces taken from `received`, and pieces already in `propagated` that
//! are sent again. The simulator moves the first two into `propagated`;
//! the third stays where it is.

use std::collections::BTreeSet;

use contagion_graph::DataError;
use contagion_types::{EdgeOrientation, EdgeType, PieceIdx, PropagatedInformation, UserIdx};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{EdgeProbability, MechanismContext};
use crate::protocol::{ProtocolError, check_probability};
use crate::rng::SimRng;
use crate::user_state::UserState;

/// Pieces a user sends in one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Taken from `own`.
    pub own: Vec<PieceIdx>,
    /// Taken from `received`.
    pub received: Vec<PieceIdx>,
    /// Already in `propagated`, sent again.
    pub repropagated: Vec<PieceIdx>,
}

impl Selection {
    /// Whether nothing is sent.
    pub const fn is_empty(&self) -> bool {
        self.own.is_empty() && self.received.is_empty() && self.repropagated.is_empty()
    }

    /// Number of pieces sent.
    pub const fn len(&self) -> usize {
        self.own
            .len()
            .saturating_add(self.received.len())
            .saturating_add(self.repropagated.len())
    }

    /// Every piece sent.
    pub fn all(&self) -> impl Iterator<Item = PieceIdx> + '_ {
        self.own
            .iter()
            .chain(&self.received)
            .chain(&self.repropagated)
            .copied()
    }
}

/// Chooses the pieces a user sends.
pub trait SelectionMechanism: core::fmt::Debug + Send + Sync {
    /// Select from `state` for `user`. Must only return pieces from the
    /// matching collections of `state`.
    fn select(
        &self,
        user: UserIdx,
        state: &UserState,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Selection, DataError>;
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// How many pieces of a collection may be taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Take nothing.
    #[serde(rename = "none")]
    Nothing,
    /// Take everything.
    #[default]
    All,
    /// Take everything if there are at most `n`, else `n` chosen uniformly.
    #[serde(untagged)]
    AtMost(usize),
}

impl Limit {
    /// Apply the limit to `candidates` (sorted). The result is sorted.
    pub fn pick(self, candidates: Vec<PieceIdx>, rng: &mut SimRng) -> Vec<PieceIdx> {
        match self {
            Self::Nothing => Vec::new(),
            Self::All => candidates,
            Self::AtMost(n) if candidates.len() <= n => candidates,
            Self::AtMost(n) => {
                let mut chosen: Vec<PieceIdx> =
                    rand::seq::index::sample(rng, candidates.len(), n)
                        .into_iter()
                        .filter_map(|i| candidates.get(i).copied())
                        .collect();
                chosen.sort_unstable();
                chosen
            }
        }
    }
}

fn keys(records: &std::collections::BTreeMap<PieceIdx, PropagatedInformation>) -> Vec<PieceIdx> {
    records.keys().copied().collect()
}

// ---------------------------------------------------------------------------
// Fixed count
// ---------------------------------------------------------------------------

/// Up to a fixed number of own, received and already propagated pieces,
/// chosen uniformly when there are more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSelection {
    num_own: Limit,
    num_received: Limit,
    num_repropagated: Limit,
}

impl CountSelection {
    /// Create the mechanism.
    pub const fn new(num_own: Limit, num_received: Limit, num_repropagated: Limit) -> Self {
        Self {
            num_own,
            num_received,
            num_repropagated,
        }
    }
}

impl SelectionMechanism for CountSelection {
    fn select(
        &self,
        _user: UserIdx,
        state: &UserState,
        _ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Selection, DataError> {
        Ok(Selection {
            own: self.num_own.pick(keys(state.own()), rng),
            received: self.num_received.pick(keys(state.received()), rng),
            repropagated: self.num_repropagated.pick(keys(state.propagated()), rng),
        })
    }
}

// ---------------------------------------------------------------------------
// Threshold
// ---------------------------------------------------------------------------

/// When a received piece has enough distinct senders to be sent on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// At least this many distinct senders.
    Count(usize),
    /// At least this fraction of the user's neighborhood. The denominator
    /// is the neighborhood size plus one, so an isolated user has a
    /// fraction of zero.
    Proportion(f64),
}

/// Sends on every received piece whose senders reach a threshold, up to a
/// cap, plus a bounded number of own pieces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSelection {
    num_own: Limit,
    threshold: Threshold,
    num_received: Limit,
    orientation: EdgeOrientation,
}

impl ThresholdSelection {
    /// Create the mechanism. `orientation` defines the neighborhood used
    /// by proportion thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidThreshold`] if the threshold is a
    /// zero count or a proportion outside `[0, 1]`.
    pub fn new(
        num_own: Limit,
        threshold: Threshold,
        num_received: Limit,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        match threshold {
            Threshold::Count(0) => {
                return Err(ProtocolError::InvalidThreshold {
                    reason: "count threshold must be at least 1".to_owned(),
                });
            }
            Threshold::Proportion(p) if !(0.0..=1.0).contains(&p) => {
                return Err(ProtocolError::InvalidThreshold {
                    reason: format!("proportion threshold {p} is outside [0, 1]"),
                });
            }
            _ => {}
        }
        Ok(Self {
            num_own,
            threshold,
            num_received,
            orientation,
        })
    }

    fn qualifies(&self, senders: usize, degree: usize) -> bool {
        match self.threshold {
            Threshold::Count(n) => senders >= n,
            Threshold::Proportion(p) => {
                let fraction = ratio(senders, degree.saturating_add(1));
                fraction >= p
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

impl SelectionMechanism for ThresholdSelection {
    fn select(
        &self,
        user: UserIdx,
        state: &UserState,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Selection, DataError> {
        let degree = ctx.data.graph().neighborhood(user, self.orientation)?.len();
        let qualifying = state
            .received()
            .values()
            .filter(|record| self.qualifies(record.sender_count(), degree))
            .map(|record| record.piece)
            .collect();
        Ok(Selection {
            own: self.num_own.pick(keys(state.own()), rng),
            received: self.num_received.pick(qualifying, rng),
            repropagated: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Independent cascade
// ---------------------------------------------------------------------------

/// Every received piece is sent on if at least one of its senders
/// activates the user: one independent trial per sender, so the piece
/// goes on with probability `1 - prod(1 - p(sender, user))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSelection {
    num_own: Limit,
    num_repropagated: Limit,
    probability: EdgeProbability,
}

impl CascadeSelection {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidProbability`] for a fixed
    /// probability outside `[0, 1]`.
    pub fn new(
        num_own: Limit,
        num_repropagated: Limit,
        probability: EdgeProbability,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            num_own,
            num_repropagated,
            probability: probability.validated("independent_cascade selection")?,
        })
    }
}

impl SelectionMechanism for CascadeSelection {
    fn select(
        &self,
        user: UserIdx,
        state: &UserState,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Selection, DataError> {
        let graph = ctx.data.graph();
        let received = state
            .received()
            .values()
            .filter(|record| {
                record
                    .provenance
                    .iter()
                    .any(|&sender| self.probability.trial(graph, user, sender, rng))
            })
            .map(|record| record.piece)
            .collect();
        Ok(Selection {
            own: self.num_own.pick(keys(state.own()), rng),
            received,
            repropagated: self.num_repropagated.pick(keys(state.propagated()), rng),
        })
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Replays the real network: own pieces go out at their creation time,
/// received pieces at the time the user really repropagated them.
///
/// Strict mode matches timestamps exactly; loose mode also sends anything
/// whose time has already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampSelection {
    loose: bool,
    num_received: Limit,
}

impl TimestampSelection {
    /// Create the mechanism.
    pub const fn new(loose: bool, num_received: Limit) -> Self {
        Self {
            loose,
            num_received,
        }
    }

    const fn due(&self, at: u64, now: u64) -> bool {
        if self.loose { at <= now } else { at == now }
    }
}

impl SelectionMechanism for TimestampSelection {
    fn select(
        &self,
        user: UserIdx,
        state: &UserState,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Selection, DataError> {
        let mut own = Vec::new();
        for &piece in state.own().keys() {
            if self.due(ctx.data.piece_timestamp(piece)?, ctx.timestamp) {
                own.push(piece);
            }
        }
        let real = ctx.data.real_propagated(user)?;
        let due: Vec<PieceIdx> = state
            .received()
            .keys()
            .copied()
            .filter(|piece| real.get(piece).is_some_and(|&at| self.due(at, ctx.timestamp)))
            .collect();
        Ok(Selection {
            own,
            received: self.num_received.pick(due, rng),
            repropagated: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Recommender-biased
// ---------------------------------------------------------------------------

/// Prefers received pieces that reached the user over recommended edges.
///
/// Received pieces split into two pools: those with at least one sender
/// joined to the user by a `Recommended` edge (under `orientation`), and
/// the rest. Pieces are drawn without replacement: from the recommended
/// pool with probability `prob`, otherwise from the other pool, falling
/// back to whichever pool still has pieces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommenderSelection {
    num_own: Limit,
    num_received: Limit,
    prob: f64,
    orientation: EdgeOrientation,
}

impl RecommenderSelection {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidProbability`] if `prob` is outside `[0, 1]`.
    pub fn new(
        num_own: Limit,
        num_received: Limit,
        prob: f64,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        check_probability("recommender selection", "prob", prob)?;
        Ok(Self {
            num_own,
            num_received,
            prob,
            orientation,
        })
    }

    fn biased_draw(
        &self,
        user: UserIdx,
        state: &UserState,
        ctx: &MechanismContext<'_>,
        count: usize,
        rng: &mut SimRng,
    ) -> Vec<PieceIdx> {
        let graph = ctx.data.graph();
        let mut recommended = Vec::new();
        let mut other = Vec::new();
        for record in state.received().values() {
            let via_recommendation = record.provenance.iter().any(|&sender| {
                graph.has_oriented_type(user, sender, self.orientation, EdgeType::Recommended)
            });
            if via_recommendation {
                recommended.push(record.piece);
            } else {
                other.push(record.piece);
            }
        }

        let mut chosen = BTreeSet::new();
        while chosen.len() < count && !(recommended.is_empty() && other.is_empty()) {
            let r: f64 = rng.random();
            let pool = if other.is_empty() || (r < self.prob && !recommended.is_empty()) {
                &mut recommended
            } else {
                &mut other
            };
            let index = rng.random_range(0..pool.len());
            chosen.insert(pool.swap_remove(index));
        }
        chosen.into_iter().collect()
    }
}

impl SelectionMechanism for RecommenderSelection {
    fn select(
        &self,
        user: UserIdx,
        state: &UserState,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Selection, DataError> {
        let received = match self.num_received {
            Limit::AtMost(n) if state.received().len() > n => {
                self.biased_draw(user, state, ctx, n, rng)
            }
            limit => limit.pick(keys(state.received()), rng),
        };
        Ok(Selection {
            own: self.num_own.pick(keys(state.own()), rng),
            received,
            repropagated: Vec::new(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use contagion_graph::{AdjacencyGraph, Data, DataBuilder};
    use contagion_types::InformationPiece;
    use rand::SeedableRng;

    use super::*;
    use crate::mechanisms::update::EarliestUnion;

    /// Star around user 0: 1 -> 0 original, 2 -> 0 recommended, 3 -> 0 original.
    /// Pieces p0..p5, p0 and p1 owned by user 0.
    fn data() -> Data {
        let mut builder = DataBuilder::new();
        for id in ["u0", "u1", "u2", "u3"] {
            builder.add_user(id, BTreeSet::new()).unwrap();
        }
        for (i, creator) in ["u0", "u0", "u1", "u2", "u3", "u1"].iter().enumerate() {
            builder
                .add_piece(InformationPiece {
                    id: format!("p{i}"),
                    creator: (*creator).to_owned(),
                    timestamp: u64::try_from(i).unwrap().saturating_mul(10),
                    features: BTreeSet::new(),
                })
                .unwrap();
        }
        builder.add_real_propagation("u0", "p2", 30).unwrap();
        builder.add_real_propagation("u0", "p3", 50).unwrap();
        let mut graph = AdjacencyGraph::builder(4, true);
        graph.add_link(UserIdx(1), UserIdx(0)).unwrap();
        graph
            .add_edge(UserIdx(2), UserIdx(0), 0.5, EdgeType::Recommended)
            .unwrap();
        graph.add_link(UserIdx(3), UserIdx(0)).unwrap();
        builder.build(graph.build()).unwrap()
    }

    fn state_of_user0() -> UserState {
        let mut state = UserState::with_own(UserIdx(0), [PieceIdx(0), PieceIdx(1)], 0);
        let deliveries = [(2, 1), (3, 2), (4, 3), (5, 1), (5, 3)];
        for (piece, sender) in deliveries {
            state.receive(
                &PropagatedInformation::new(PieceIdx(piece), 1, UserIdx(sender)),
                &EarliestUnion,
            );
        }
        state
    }

    fn rng() -> SimRng {
        SimRng::seed_from_u64(11)
    }

    #[test]
    fn limit_picks_sorted_subsets() {
        let candidates: Vec<PieceIdx> = (0..10).map(PieceIdx).collect();
        let picked = Limit::AtMost(3).pick(candidates.clone(), &mut rng());
        assert_eq!(picked.len(), 3);
        assert!(picked.is_sorted());
        assert!(Limit::Nothing.pick(candidates.clone(), &mut rng()).is_empty());
        assert_eq!(Limit::All.pick(candidates.clone(), &mut rng()), candidates);
        assert_eq!(Limit::AtMost(20).pick(candidates.clone(), &mut rng()), candidates);
    }

    #[test]
    fn limit_parses_keywords_and_counts() {
        let none: Limit = serde_json::from_str("\"none\"").unwrap();
        let all: Limit = serde_json::from_str("\"all\"").unwrap();
        let two: Limit = serde_json::from_str("2").unwrap();
        assert_eq!(none, Limit::Nothing);
        assert_eq!(all, Limit::All);
        assert_eq!(two, Limit::AtMost(2));
    }

    #[test]
    fn count_selection_respects_each_limit() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mut state = state_of_user0();
        state.propagate(&PropagatedInformation::new(PieceIdx(2), 1, UserIdx(1)));
        let mechanism = CountSelection::new(Limit::AtMost(1), Limit::All, Limit::Nothing);
        let selection = mechanism.select(UserIdx(0), &state, &ctx, &mut rng()).unwrap();
        assert_eq!(selection.own.len(), 1);
        assert_eq!(selection.received.len(), 3);
        assert!(selection.repropagated.is_empty());
        assert_eq!(selection.len(), 4);
    }

    #[test]
    fn count_selection_can_resend_propagated_pieces() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mut state = state_of_user0();
        state.propagate(&PropagatedInformation::new(PieceIdx(2), 1, UserIdx(1)));
        let mechanism = CountSelection::new(Limit::Nothing, Limit::Nothing, Limit::All);
        let selection = mechanism.select(UserIdx(0), &state, &ctx, &mut rng()).unwrap();
        assert_eq!(selection.repropagated, vec![PieceIdx(2)]);
    }

    #[test]
    fn count_threshold_needs_enough_distinct_senders() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mechanism = ThresholdSelection::new(
            Limit::Nothing,
            Threshold::Count(2),
            Limit::All,
            EdgeOrientation::In,
        )
        .unwrap();
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &ctx, &mut rng())
            .unwrap();
        // Only p5 came from two senders.
        assert_eq!(selection.received, vec![PieceIdx(5)]);
    }

    #[test]
    fn proportion_threshold_uses_smoothed_degree() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        // In-degree of user 0 is 3, so one sender is 1/4, two senders 2/4.
        let mechanism = ThresholdSelection::new(
            Limit::Nothing,
            Threshold::Proportion(0.5),
            Limit::All,
            EdgeOrientation::In,
        )
        .unwrap();
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &ctx, &mut rng())
            .unwrap();
        assert_eq!(selection.received, vec![PieceIdx(5)]);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let zero = ThresholdSelection::new(
            Limit::All,
            Threshold::Count(0),
            Limit::All,
            EdgeOrientation::Und,
        );
        let negative = ThresholdSelection::new(
            Limit::All,
            Threshold::Proportion(-0.2),
            Limit::All,
            EdgeOrientation::Und,
        );
        assert!(matches!(zero, Err(ProtocolError::InvalidThreshold { .. })));
        assert!(matches!(negative, Err(ProtocolError::InvalidThreshold { .. })));
    }

    #[test]
    fn cascade_with_zero_probability_sends_nothing_received() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mechanism =
            CascadeSelection::new(Limit::All, Limit::Nothing, EdgeProbability::Fixed(0.0)).unwrap();
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &ctx, &mut rng())
            .unwrap();
        assert!(selection.received.is_empty());
        assert_eq!(selection.own, vec![PieceIdx(0), PieceIdx(1)]);
    }

    #[test]
    fn cascade_with_certain_edges_sends_everything_received() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mechanism =
            CascadeSelection::new(Limit::Nothing, Limit::Nothing, EdgeProbability::Fixed(1.0)).unwrap();
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &ctx, &mut rng())
            .unwrap();
        assert_eq!(selection.received.len(), 4);
    }

    #[test]
    fn cascade_rejects_probability_above_one() {
        let result = CascadeSelection::new(Limit::All, Limit::All, EdgeProbability::Fixed(1.2));
        assert!(matches!(result, Err(ProtocolError::InvalidProbability { .. })));
    }

    #[test]
    fn strict_timestamp_matches_exactly() {
        let data = data();
        let mechanism = TimestampSelection::new(false, Limit::All);
        // p1 was created at 10; p2 was really repropagated by u0 at 30.
        let at_10 = MechanismContext::new(&data, 1, 10);
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &at_10, &mut rng())
            .unwrap();
        assert_eq!(selection.own, vec![PieceIdx(1)]);
        assert!(selection.received.is_empty());

        let at_30 = MechanismContext::new(&data, 3, 30);
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &at_30, &mut rng())
            .unwrap();
        assert!(selection.own.is_empty());
        assert_eq!(selection.received, vec![PieceIdx(2)]);
    }

    #[test]
    fn loose_timestamp_catches_up() {
        let data = data();
        let mechanism = TimestampSelection::new(true, Limit::All);
        let at_60 = MechanismContext::new(&data, 6, 60);
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &at_60, &mut rng())
            .unwrap();
        assert_eq!(selection.own, vec![PieceIdx(0), PieceIdx(1)]);
        assert_eq!(selection.received, vec![PieceIdx(2), PieceIdx(3)]);
    }

    #[test]
    fn recommender_with_certain_bias_prefers_recommended_pool() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mechanism =
            RecommenderSelection::new(Limit::Nothing, Limit::AtMost(1), 1.0, EdgeOrientation::In)
                .unwrap();
        for seed in 0..20 {
            let mut rng = SimRng::seed_from_u64(seed);
            let selection = mechanism
                .select(UserIdx(0), &state_of_user0(), &ctx, &mut rng)
                .unwrap();
            // p3 is the only piece sent by user 2 over the recommended edge.
            assert_eq!(selection.received, vec![PieceIdx(3)]);
        }
    }

    #[test]
    fn recommender_falls_back_when_a_pool_empties() {
        let data = data();
        let ctx = MechanismContext::new(&data, 1, 10);
        let mechanism =
            RecommenderSelection::new(Limit::Nothing, Limit::AtMost(3), 1.0, EdgeOrientation::In)
                .unwrap();
        let selection = mechanism
            .select(UserIdx(0), &state_of_user0(), &ctx, &mut rng())
            .unwrap();
        assert_eq!(selection.received.len(), 3);
        assert!(selection.received.contains(&PieceIdx(3)));
        let unique: BTreeSet<_> = selection.received.iter().collect();
        assert_eq!(unique.len(), 3);
    }
}
