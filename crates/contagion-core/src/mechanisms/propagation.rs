//! Propagation mechanisms: which neighbors a user contacts.
//!
//! Once per iteration, before any piece is chosen, `reset_selections`
//! fixes the contact set of every user. Piece-independent mechanisms then
//! deliver everything a user sends to that one set. Piece-dependent
//! mechanisms (independent cascade) run a fresh trial for every piece.
//!
//! Per-user runtime state (cool-down windows, contact sets, cached
//! candidate lists) lives in a [`ContactBook`] owned by the simulator and
//! addressed by dense user index, so the mechanisms stay immutable.
//!
//! # Windowed contact
//!
//! Rumor spreading, push, pull and the pure-recommender variant share one
//! algorithm. Independently for each user `u`:
//!
//! 1. Draw `v` uniformly from `u`'s candidates minus every neighbor in
//!    `u`'s cool-down window.
//! 2. Append `v` to the window, or an empty slot if nobody was eligible.
//! 3. Evict the oldest slots while the window is longer than `wait_time`.
//!
//! The chosen pair is registered both ways (rumor spreading), `u -> v`
//! only (push), or `v -> u` only (pull).

use std::collections::VecDeque;

use contagion_graph::{Data, DataError};
use contagion_types::{EdgeOrientation, EdgeType, PieceIdx, UserIdx};
use rand::seq::IndexedRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{EdgeProbability, MechanismContext};
use crate::protocol::ProtocolError;
use crate::rng::{RngStreams, SimRng, Stage};

/// Per-user contact state addressed by dense user index.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    /// Cool-down window per user, oldest slot first. `None` is a round
    /// without an eligible neighbor.
    windows: Vec<VecDeque<Option<UserIdx>>>,
    /// Users each user sends to this iteration, sorted.
    targets: Vec<Vec<UserIdx>>,
    /// Candidate neighbors per user, computed on first use.
    candidates: Option<Vec<Vec<UserIdx>>>,
}

impl ContactBook {
    /// An empty book for `num_users` users.
    pub fn new(num_users: usize) -> Self {
        Self {
            windows: vec![VecDeque::new(); num_users],
            targets: vec![Vec::new(); num_users],
            candidates: None,
        }
    }

    /// Users that `user` sends to this iteration.
    pub fn targets(&self, user: UserIdx) -> &[UserIdx] {
        self.targets
            .get(user.as_usize())
            .map_or(&[], Vec::as_slice)
    }

    /// Cool-down window of `user`, oldest slot first.
    pub fn window(&self, user: UserIdx) -> Option<&VecDeque<Option<UserIdx>>> {
        self.windows.get(user.as_usize())
    }

    /// Neighbor `user` chose in the latest round, if any.
    pub fn last_choice(&self, user: UserIdx) -> Option<UserIdx> {
        self.window(user).and_then(|w| w.back().copied().flatten())
    }

    fn fit(&mut self, num_users: usize) {
        self.windows.resize_with(num_users, VecDeque::new);
        self.targets.resize_with(num_users, Vec::new);
    }

    fn register(&mut self, from: UserIdx, to: UserIdx) {
        if let Some(list) = self.targets.get_mut(from.as_usize()) {
            list.push(to);
        }
    }
}

/// Chooses the receivers of a user's pieces.
pub trait PropagationMechanism: core::fmt::Debug + Send + Sync {
    /// Whether receivers may differ from piece to piece.
    fn depends_on_piece(&self) -> bool {
        false
    }

    /// Recompute every user's contact set for the iteration in `ctx`.
    fn reset_selections(
        &self,
        book: &mut ContactBook,
        ctx: &MechanismContext<'_>,
        streams: RngStreams,
    ) -> Result<(), DataError>;

    /// Receivers of `piece` sent by `sender`.
    fn users_to_propagate(
        &self,
        book: &ContactBook,
        sender: UserIdx,
        _piece: PieceIdx,
        _ctx: &MechanismContext<'_>,
        _rng: &mut SimRng,
    ) -> Result<Vec<UserIdx>, DataError> {
        Ok(book.targets(sender).to_vec())
    }
}

// ---------------------------------------------------------------------------
// Windowed contact (rumor spreading, push, pull, pure recommender)
// ---------------------------------------------------------------------------

/// Which directions of a chosen contact are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    /// Both users send to each other (push-pull).
    Symmetric,
    /// The chooser sends to the chosen neighbor.
    Push,
    /// The chosen neighbor sends to the chooser.
    Pull,
}

/// One random contact per user per iteration with a cool-down window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowedContact {
    wait_time: usize,
    orientation: EdgeOrientation,
    pairing: Pairing,
    /// Restrict candidates to edges of this type.
    edge_filter: Option<EdgeType>,
}

impl WindowedContact {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidWaitTime`] if `wait_time` is zero.
    pub const fn new(
        wait_time: usize,
        orientation: EdgeOrientation,
        pairing: Pairing,
        edge_filter: Option<EdgeType>,
    ) -> Result<Self, ProtocolError> {
        if wait_time == 0 {
            return Err(ProtocolError::InvalidWaitTime);
        }
        Ok(Self {
            wait_time,
            orientation,
            pairing,
            edge_filter,
        })
    }

    /// Push-pull rumor spreading.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidWaitTime`] if `wait_time` is zero.
    pub const fn rumor_spreading(
        wait_time: usize,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        Self::new(wait_time, orientation, Pairing::Symmetric, None)
    }

    /// Rumor spreading restricted to recommended edges.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidWaitTime`] if `wait_time` is zero.
    pub const fn pure_recommender(
        wait_time: usize,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        Self::new(
            wait_time,
            orientation,
            Pairing::Symmetric,
            Some(EdgeType::Recommended),
        )
    }

    fn candidate_lists(&self, data: &Data) -> Result<Vec<Vec<UserIdx>>, DataError> {
        let graph = data.graph();
        data.users()
            .map(|user| {
                let neighbors = graph.neighborhood(user, self.orientation)?;
                Ok(match self.edge_filter {
                    None => neighbors.to_vec(),
                    Some(edge_type) => neighbors
                        .iter()
                        .copied()
                        .filter(|&v| graph.has_oriented_type(user, v, self.orientation, edge_type))
                        .collect(),
                })
            })
            .collect()
    }
}

impl PropagationMechanism for WindowedContact {
    fn reset_selections(
        &self,
        book: &mut ContactBook,
        ctx: &MechanismContext<'_>,
        streams: RngStreams,
    ) -> Result<(), DataError> {
        book.fit(ctx.data.num_users());
        if book.candidates.is_none() {
            book.candidates = Some(self.candidate_lists(ctx.data)?);
        }

        let ContactBook {
            windows,
            candidates,
            ..
        } = book;
        let candidates = candidates.as_deref().unwrap_or_default();
        let wait_time = self.wait_time;
        let iteration = ctx.iteration;

        let choices: Vec<(UserIdx, Option<UserIdx>)> = windows
            .par_iter_mut()
            .enumerate()
            .filter_map(|(position, window)| {
                let user = UserIdx::from_usize(position)?;
                let mut rng = streams.stream(iteration, Stage::Contact, user);
                let eligible: Vec<UserIdx> = candidates
                    .get(position)
                    .map(|list| {
                        list.iter()
                            .copied()
                            .filter(|v| !window.contains(&Some(*v)))
                            .collect()
                    })
                    .unwrap_or_default();
                let choice = eligible.choose(&mut rng).copied();
                window.push_back(choice);
                while window.len() > wait_time {
                    window.pop_front();
                }
                Some((user, choice))
            })
            .collect();

        for list in &mut book.targets {
            list.clear();
        }
        for (user, choice) in choices {
            let Some(neighbor) = choice else { continue };
            match self.pairing {
                Pairing::Symmetric => {
                    book.register(user, neighbor);
                    book.register(neighbor, user);
                }
                Pairing::Push => book.register(user, neighbor),
                Pairing::Pull => book.register(neighbor, user),
            }
        }
        for list in &mut book.targets {
            list.sort_unstable();
            list.dedup();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// All neighbors
// ---------------------------------------------------------------------------

/// Every neighbor under `orientation`, every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllNeighbors {
    orientation: EdgeOrientation,
}

impl AllNeighbors {
    /// Create the mechanism.
    pub const fn new(orientation: EdgeOrientation) -> Self {
        Self { orientation }
    }
}

impl PropagationMechanism for AllNeighbors {
    fn reset_selections(
        &self,
        _book: &mut ContactBook,
        _ctx: &MechanismContext<'_>,
        _streams: RngStreams,
    ) -> Result<(), DataError> {
        Ok(())
    }

    fn users_to_propagate(
        &self,
        _book: &ContactBook,
        sender: UserIdx,
        _piece: PieceIdx,
        ctx: &MechanismContext<'_>,
        _rng: &mut SimRng,
    ) -> Result<Vec<UserIdx>, DataError> {
        Ok(ctx
            .data
            .graph()
            .neighborhood(sender, self.orientation)?
            .to_vec())
    }
}

// ---------------------------------------------------------------------------
// Independent cascade
// ---------------------------------------------------------------------------

/// Every neighbor receives each piece independently with the link's
/// transmission probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadePropagation {
    orientation: EdgeOrientation,
    probability: EdgeProbability,
}

impl CascadePropagation {
    /// Create the mechanism.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidProbability`] for a fixed
    /// probability outside `[0, 1]`.
    pub fn new(
        orientation: EdgeOrientation,
        probability: EdgeProbability,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            orientation,
            probability: probability.validated("independent_cascade propagation")?,
        })
    }
}

impl PropagationMechanism for CascadePropagation {
    fn depends_on_piece(&self) -> bool {
        true
    }

    fn reset_selections(
        &self,
        _book: &mut ContactBook,
        _ctx: &MechanismContext<'_>,
        _streams: RngStreams,
    ) -> Result<(), DataError> {
        Ok(())
    }

    fn users_to_propagate(
        &self,
        _book: &ContactBook,
        sender: UserIdx,
        _piece: PieceIdx,
        ctx: &MechanismContext<'_>,
        rng: &mut SimRng,
    ) -> Result<Vec<UserIdx>, DataError> {
        let graph = ctx.data.graph();
        Ok(graph
            .neighborhood(sender, self.orientation)?
            .iter()
            .copied()
            .filter(|&v| self.probability.trial(graph, sender, v, rng))
            .collect())
    }
}
