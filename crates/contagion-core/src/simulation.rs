//! The iteration log and its replayed projection.
//!
//! A [`Simulation`] is the ordered, contiguous list of emitted
//! [`Iteration`]s: the source of truth of a run. A [`SimulationState`] is
//! the per-user state obtained by folding a prefix of that log over the
//! initial state of a dataset. It is never edited directly.

use contagion_graph::{Data, DataError};
use contagion_types::UserIdx;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::iteration::Iteration;
use crate::mechanisms::UpdateMechanism;
use crate::simulator::SimulationError;
use crate::user_state::{Receipt, UserState};

/// Ordered log of the iterations of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SimulationRecord")]
pub struct Simulation {
    initial_number: u64,
    iterations: Vec<Iteration>,
}

/// Unchecked serialized form of a [`Simulation`].
#[derive(Debug, Deserialize)]
struct SimulationRecord {
    initial_number: u64,
    #[serde(default)]
    iterations: Vec<Iteration>,
}

impl TryFrom<SimulationRecord> for Simulation {
    type Error = SimulationError;

    fn try_from(record: SimulationRecord) -> Result<Self, Self::Error> {
        let mut simulation = Self::new(record.initial_number);
        for iteration in record.iterations {
            simulation.push(iteration)?;
        }
        Ok(simulation)
    }
}

impl Simulation {
    /// An empty log whose first iteration will be `initial_number`.
    pub const fn new(initial_number: u64) -> Self {
        Self {
            initial_number,
            iterations: Vec::new(),
        }
    }

    /// Number of the first iteration.
    pub const fn initial_number(&self) -> u64 {
        self.initial_number
    }

    /// Number of iterations in the log.
    pub const fn len(&self) -> usize {
        self.iterations.len()
    }

    /// Whether the log is empty.
    pub const fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Number the next appended iteration must carry.
    pub fn next_number(&self) -> u64 {
        let len = u64::try_from(self.iterations.len()).unwrap_or(u64::MAX);
        self.initial_number.saturating_add(len)
    }

    /// All iterations in order.
    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    /// The most recent iteration.
    pub fn last(&self) -> Option<&Iteration> {
        self.iterations.last()
    }

    /// Iteration with the given number.
    pub fn get(&self, number: u64) -> Option<&Iteration> {
        let offset = number.checked_sub(self.initial_number)?;
        usize::try_from(offset)
            .ok()
            .and_then(|i| self.iterations.get(i))
    }

    /// Append an iteration.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::NonContiguous`] if its number is not
    /// [`next_number`](Self::next_number).
    pub fn push(&mut self, iteration: Iteration) -> Result<(), SimulationError> {
        let expected = self.next_number();
        if iteration.number() != expected {
            return Err(SimulationError::NonContiguous {
                expected,
                found: iteration.number(),
            });
        }
        self.iterations.push(iteration);
        Ok(())
    }

    /// Fold every iteration over the initial state of `data`.
    pub fn final_state(
        &self,
        data: &Data,
        update: &dyn UpdateMechanism,
    ) -> Result<SimulationState, DataError> {
        self.fold(data, update, usize::MAX)
    }

    /// Fold the iterations numbered up to and including `number`.
    ///
    /// A number before the first iteration yields the initial state.
    pub fn state_at(
        &self,
        number: u64,
        data: &Data,
        update: &dyn UpdateMechanism,
    ) -> Result<SimulationState, DataError> {
        let count = number
            .checked_sub(self.initial_number)
            .map_or(0, |offset| {
                usize::try_from(offset.saturating_add(1)).unwrap_or(usize::MAX)
            });
        self.fold(data, update, count)
    }

    fn fold(
        &self,
        data: &Data,
        update: &dyn UpdateMechanism,
        count: usize,
    ) -> Result<SimulationState, DataError> {
        let mut state = SimulationState::initial(data, self.initial_number)?;
        for iteration in self.iterations.iter().take(count) {
            state.apply(iteration, update)?;
        }
        Ok(state)
    }
}

/// Per-user state of every user, addressed by dense user index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationState {
    users: Vec<UserState>,
}

impl SimulationState {
    /// Every user holding its created pieces as own pieces, stamped with
    /// `timestamp`.
    pub fn initial(data: &Data, timestamp: u64) -> Result<Self, DataError> {
        let users = data
            .users()
            .map(|user| {
                let own = data.own_pieces(user)?;
                Ok(UserState::with_own(user, own.iter().copied(), timestamp))
            })
            .collect::<Result<Vec<_>, DataError>>()?;
        Ok(Self { users })
    }

    /// Number of users.
    pub const fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether there are no users.
    pub const fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// State of one user.
    pub fn user(&self, user: UserIdx) -> Result<&UserState, DataError> {
        self.users
            .get(user.as_usize())
            .ok_or(DataError::UnknownUser(user))
    }

    /// All user states in index order.
    pub fn users(&self) -> &[UserState] {
        &self.users
    }

    fn user_mut(&mut self, user: UserIdx) -> Result<&mut UserState, DataError> {
        self.users
            .get_mut(user.as_usize())
            .ok_or(DataError::UnknownUser(user))
    }

    /// Whether every user's collections are pairwise disjoint.
    pub fn is_disjoint(&self) -> bool {
        self.users.iter().all(UserState::is_disjoint)
    }

    /// Apply one iteration: propagations, then discards, then new
    /// receipts, then re-receipts.
    pub fn apply(
        &mut self,
        iteration: &Iteration,
        update: &dyn UpdateMechanism,
    ) -> Result<(), DataError> {
        for (&user, records) in iteration.propagating() {
            let state = self.user_mut(user)?;
            for record in records.values() {
                state.propagate(record);
            }
        }
        for (&user, records) in iteration.discarding() {
            let state = self.user_mut(user)?;
            for record in records.values() {
                state.discard(record);
            }
        }
        let mut mismatched: usize = 0;
        for (&user, records) in iteration.receiving() {
            let state = self.user_mut(user)?;
            for record in records.values() {
                if state.receive(record, update) != Receipt::New {
                    mismatched = mismatched.saturating_add(1);
                }
            }
        }
        for (&user, records) in iteration.rereceiving() {
            let state = self.user_mut(user)?;
            for record in records.values() {
                if !matches!(
                    state.receive(record, update),
                    Receipt::Merged | Receipt::Restored
                ) {
                    mismatched = mismatched.saturating_add(1);
                }
            }
        }
        if mismatched > 0 {
            warn!(
                iteration = iteration.number(),
                mismatched,
                "Receipts disagree with the state they were applied to"
            );
        }
        Ok(())
    }
}
