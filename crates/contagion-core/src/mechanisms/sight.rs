//! Sight mechanisms: what a contacted user actually perceives.
//!
//! After routing, every receiver gets the list of `(sender, piece)`
//! deliveries addressed to it this iteration. The sight mechanism returns
//! the subset it perceives; the rest are lost for this round.

use std::collections::BTreeSet;

use contagion_graph::DataError;
use contagion_types::{EdgeOrientation, EdgeType, PieceIdx, UserIdx};
use rand::Rng;

use super::MechanismContext;
use crate::protocol::{ProtocolError, check_probability};
use crate::rng::SimRng;
use crate::user_state::UserState;

/// One piece sent by one user to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Delivery {
    /// Who sent it.
    pub sender: UserIdx,
    /// What was sent.
    pub piece: PieceIdx,
}

/// Filters the deliveries a receiver perceives.
pub trait SightMechanism: core::fmt::Debug + Send + Sync {
    /// Subset of `incoming` that `receiver` perceives.
    fn perceive(
        &self,
        receiver: UserIdx,
        state: &UserState,
        incoming: Vec<Delivery>,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Vec<Delivery>, DataError>;
}

/// Perceive everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllSight;

impl SightMechanism for AllSight {
    fn perceive(
        &self,
        _receiver: UserIdx,
        _state: &UserState,
        incoming: Vec<Delivery>,
        _ctx: &MechanismContext<'_>,
        _rng: &mut SimRng,
    ) -> Result<Vec<Delivery>, DataError> {
        Ok(incoming)
    }
}

/// Perceive at most `max_pieces` distinct pieces, chosen uniformly. Every
/// delivery of a perceived piece is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSight {
    max_pieces: usize,
}

impl CountSight {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] if `max_pieces` is zero.
    pub fn new(max_pieces: usize) -> Result<Self, ProtocolError> {
        if max_pieces == 0 {
            return Err(ProtocolError::InvalidParameter {
                mechanism: "count sight",
                reason: "max_pieces must be at least 1".to_owned(),
            });
        }
        Ok(Self { max_pieces })
    }
}

impl SightMechanism for CountSight {
    fn perceive(
        &self,
        _receiver: UserIdx,
        _state: &UserState,
        incoming: Vec<Delivery>,
        _ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Vec<Delivery>, DataError> {
        let pieces: Vec<PieceIdx> = incoming
            .iter()
            .map(|delivery| delivery.piece)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if pieces.len() <= self.max_pieces {
            return Ok(incoming);
        }
        let seen: BTreeSet<PieceIdx> = rand::seq::index::sample(rng, pieces.len(), self.max_pieces)
            .into_iter()
            .filter_map(|i| pieces.get(i).copied())
            .collect();
        Ok(incoming
            .into_iter()
            .filter(|delivery| seen.contains(&delivery.piece))
            .collect())
    }
}

/// Perceive each delivery with a probability that depends on whether the
/// sender reaches the receiver over a `Recommended` edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommendedSight {
    prob_recommended: f64,
    prob_other: f64,
    orientation: EdgeOrientation,
}

impl RecommendedSight {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidProbability`] if either probability
    /// is outside `[0, 1]`.
    pub fn new(
        prob_recommended: f64,
        prob_other: f64,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        check_probability("recommended sight", "prob_recommended", prob_recommended)?;
        check_probability("recommended sight", "prob_other", prob_other)?;
        Ok(Self {
            prob_recommended,
            prob_other,
            orientation,
        })
    }
}

impl SightMechanism for RecommendedSight {
    fn perceive(
        &self,
        receiver: UserIdx,
        _state: &UserState,
        incoming: Vec<Delivery>,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Vec<Delivery>, DataError> {
        let graph = ctx.data.graph();
        Ok(incoming
            .into_iter()
            .filter(|delivery| {
                let recommended = graph.has_oriented_type(
                    receiver,
                    delivery.sender,
                    self.orientation,
                    EdgeType::Recommended,
                );
                let p = if recommended {
                    self.prob_recommended
                } else {
                    self.prob_other
                };
                rng.random::<f64>() < p
            })
            .collect())
    }
}
