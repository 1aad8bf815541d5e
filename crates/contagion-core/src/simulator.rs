//! The per-iteration state machine.
//!
//! Each call to [`Simulator::step`] runs one iteration through these
//! phases:
//!
//! 1. **Contact** -- the propagation mechanism fixes every user's contact
//!    set for the iteration.
//!
//! 2. **Decide** -- in parallel, per user: the selection mechanism picks
//!    the pieces to send and the expiration mechanism picks the received
//!    pieces to drop. Selected pieces are never expired.
//!
//! 3. **Route** -- in parallel, per sender: every selected piece is
//!    addressed to the contact set, or to the receivers of a fresh
//!    per-piece trial when the propagation mechanism depends on the piece.
//!
//! 4. **Perceive** -- in parallel, per receiver: the sight mechanism
//!    filters what arrived.
//!
//! 5. **Commit** -- sequentially: perceived deliveries of the same piece
//!    are merged into one record (union of senders, stamped with the
//!    iteration number) and classified as new or re-received against the
//!    state before the step. The resulting [`Iteration`] is applied to the
//!    state, appended to the log, and the clock advances.
//!
//! Parallel phases only read shared state and write into buffers; every
//! mutation happens in the commit phase. Each user draws from its own
//! random stream, so a run depends on the seed alone.
//!
//! A failed step terminates the simulator. Iterations committed before the
//! failure stay in the log and the state is rebuilt from them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use contagion_graph::{Data, DataError};
use contagion_types::{PieceIdx, PropagatedInformation, UserIdx};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::clock::{ClockError, IterationClock};
use crate::iteration::Iteration;
use crate::mechanisms::{ContactBook, Delivery, MechanismContext, Selection};
use crate::protocol::Protocol;
use crate::rng::{RngStreams, Stage};
use crate::simulation::{Simulation, SimulationState};
use crate::user_state::PieceStatus;

/// Errors that can occur while running a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// A user, piece or edge lookup missed in the dataset.
    #[error("data error: {source}")]
    Data {
        /// The underlying data error.
        #[from]
        source: DataError,
    },

    /// The iteration clock failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// An iteration number does not follow the log.
    #[error("non-contiguous iteration: expected {expected}, found {found}")]
    NonContiguous {
        /// The number the log expected.
        expected: u64,
        /// The number that was supplied.
        found: u64,
    },

    /// The simulator was stepped after a failed iteration.
    #[error("simulator is terminated")]
    Terminated,
}

/// Where the simulator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Built, no iteration run yet.
    Idle,
    /// Computing contact sets and selections.
    Selecting,
    /// Routing and perceiving deliveries.
    Delivering,
    /// The last iteration was committed.
    Committed,
    /// A step failed; no further iteration will run.
    Terminated,
}

/// Counters of one committed iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Iteration number.
    pub number: u64,
    /// Users that sent at least one piece.
    pub propagating_users: usize,
    /// `(user, piece)` pairs sent.
    pub propagated: usize,
    /// Users that dropped at least one piece.
    pub discarding_users: usize,
    /// `(user, piece)` pairs dropped.
    pub discarded: usize,
    /// Users that learned at least one new piece.
    pub receiving_users: usize,
    /// `(user, piece)` pairs learned.
    pub received: usize,
    /// Users that got at least one known piece again.
    pub rereceiving_users: usize,
    /// `(user, piece)` pairs received again.
    pub rereceived: usize,
}

impl From<&Iteration> for IterationSummary {
    fn from(iteration: &Iteration) -> Self {
        Self {
            number: iteration.number(),
            propagating_users: iteration.num_propagating_users(),
            propagated: iteration.num_propagated(),
            discarding_users: iteration.num_discarding_users(),
            discarded: iteration.num_discarded(),
            receiving_users: iteration.num_receiving_users(),
            received: iteration.num_received(),
            rereceiving_users: iteration.num_rereceiving_users(),
            rereceived: iteration.num_rereceived(),
        }
    }
}

/// What one user decided in the decide phase.
#[derive(Debug)]
struct Decision {
    user: UserIdx,
    selection: Selection,
    expired: Vec<PieceIdx>,
}

/// Drives a protocol over a dataset, one iteration at a time.
#[derive(Debug)]
pub struct Simulator {
    protocol: Protocol,
    data: Arc<Data>,
    streams: RngStreams,
    clock: IterationClock,
    state: SimulationState,
    simulation: Simulation,
    contacts: ContactBook,
    phase: Phase,
}

impl Simulator {
    /// A fresh simulation whose first iteration is `initial_iteration`.
    ///
    /// Every user starts holding the pieces it created.
    pub fn new(
        protocol: Protocol,
        data: Arc<Data>,
        seed: u64,
        initial_iteration: u64,
    ) -> Result<Self, SimulationError> {
        let state = SimulationState::initial(&data, initial_iteration)?;
        let contacts = ContactBook::new(data.num_users());
        info!(
            users = data.num_users(),
            pieces = data.num_pieces(),
            seed,
            initial_iteration,
            "Simulator created"
        );
        Ok(Self {
            protocol,
            data,
            streams: RngStreams::new(seed),
            clock: IterationClock::new(initial_iteration),
            state,
            simulation: Simulation::new(initial_iteration),
            contacts,
            phase: Phase::Idle,
        })
    }

    /// Continue a previous run from the end of its log.
    ///
    /// The state is replayed from `simulation`. Cool-down windows are not
    /// part of the log and start empty.
    pub fn resume(
        protocol: Protocol,
        data: Arc<Data>,
        simulation: Simulation,
        seed: u64,
    ) -> Result<Self, SimulationError> {
        let state = simulation.final_state(&data, protocol.update())?;
        let clock = IterationClock::from_parts(simulation.initial_number(), simulation.next_number());
        info!(
            users = data.num_users(),
            committed = simulation.len(),
            next_iteration = clock.iteration(),
            seed,
            "Simulator resumed"
        );
        Ok(Self {
            protocol,
            contacts: ContactBook::new(data.num_users()),
            data,
            streams: RngStreams::new(seed),
            clock,
            state,
            simulation,
            phase: Phase::Idle,
        })
    }

    /// The protocol being run.
    pub const fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// The dataset.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// The iteration clock.
    pub const fn clock(&self) -> &IterationClock {
        &self.clock
    }

    /// Current per-user state: the fold of the log so far.
    pub const fn state(&self) -> &SimulationState {
        &self.state
    }

    /// The iteration log.
    pub const fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Contact sets and cool-down windows of the latest iteration.
    pub const fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Consume the simulator and keep the log.
    pub fn into_simulation(self) -> Simulation {
        self.simulation
    }

    /// Run one iteration.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Terminated`] if an earlier step failed,
    /// or the error that aborted this step, after which the simulator is
    /// terminated.
    pub fn step(&mut self) -> Result<IterationSummary, SimulationError> {
        if self.phase == Phase::Terminated {
            return Err(SimulationError::Terminated);
        }
        let number = self.clock.iteration();
        match self.run_iteration() {
            Ok(summary) => Ok(summary),
            Err(err) => {
                warn!(iteration = number, %err, "Iteration aborted, simulator terminated");
                self.terminate();
                Err(err)
            }
        }
    }

    fn terminate(&mut self) {
        self.phase = Phase::Terminated;
        match self.simulation.final_state(&self.data, self.protocol.update()) {
            Ok(state) => self.state = state,
            Err(err) => warn!(
                committed = self.simulation.len(),
                %err,
                "Replaying the committed log failed, state may be stale"
            ),
        }
    }

    fn run_iteration(&mut self) -> Result<IterationSummary, SimulationError> {
        let number = self.clock.iteration();
        let timestamp = self.clock.timestamp(self.data.timestamps());
        let ctx = MechanismContext::new(&self.data, number, timestamp);

        // --- Contact + decide ---
        self.phase = Phase::Selecting;
        self.protocol
            .propagation()
            .reset_selections(&mut self.contacts, &ctx, self.streams)?;
        let decisions = decide(&self.protocol, &self.state, &ctx, self.streams)?;

        let mut iteration = Iteration::new(number);
        for decision in &decisions {
            record_decision(&mut iteration, &self.state, decision)?;
        }
        debug!(
            iteration = number,
            timestamp,
            senders = iteration.num_propagating_users(),
            "Selections made"
        );

        // --- Route + perceive ---
        self.phase = Phase::Delivering;
        let inbox = route(&self.protocol, &self.contacts, &decisions, &ctx, self.streams)?;
        let deliveries: usize = inbox.values().map(Vec::len).sum();
        let perceived = perceive(&self.protocol, &self.state, inbox, &ctx, self.streams)?;
        debug!(iteration = number, deliveries, "Deliveries routed");

        for (receiver, seen) in perceived {
            classify(&mut iteration, &self.state, receiver, seen)?;
        }

        // --- Commit ---
        self.state.apply(&iteration, self.protocol.update())?;
        let summary = IterationSummary::from(&iteration);
        self.simulation.push(iteration)?;
        self.clock.advance()?;
        self.phase = Phase::Committed;

        info!(
            iteration = number,
            propagating_users = summary.propagating_users,
            propagated = summary.propagated,
            receiving_users = summary.receiving_users,
            received = summary.received,
            rereceived = summary.rereceived,
            discarded = summary.discarded,
            "Iteration committed"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

fn decide(
    protocol: &Protocol,
    state: &SimulationState,
    ctx: &MechanismContext<'_>,
    streams: RngStreams,
) -> Result<Vec<Decision>, DataError> {
    state
        .users()
        .par_iter()
        .enumerate()
        .map(|(position, user_state)| -> Result<Decision, DataError> {
            let user = UserIdx::from_usize(position).ok_or(DataError::IndexOverflow("user"))?;
            let mut rng = streams.stream(ctx.iteration, Stage::Selection, user);
            let selection = protocol.selection().select(user, user_state, ctx, &mut rng)?;
            let keep: Vec<PieceIdx> = selection.all().collect();
            let expired = protocol.expiration().expire(user_state, &keep, ctx);
            Ok(Decision {
                user,
                selection,
                expired,
            })
        })
        .collect()
}

/// Log the sent and dropped pieces of one user with the records it holds.
fn record_decision(
    iteration: &mut Iteration,
    state: &SimulationState,
    decision: &Decision,
) -> Result<(), DataError> {
    let user_state = state.user(decision.user)?;
    for piece in decision.selection.all() {
        let record = user_state.get(piece).ok_or(DataError::UnknownPiece(piece))?;
        iteration.add_propagating(decision.user, record.clone());
    }
    for &piece in &decision.expired {
        let record = user_state
            .received()
            .get(&piece)
            .ok_or(DataError::UnknownPiece(piece))?;
        iteration.add_discarding(decision.user, record.clone());
    }
    Ok(())
}

/// Address every selected piece and group the deliveries by receiver.
fn route(
    protocol: &Protocol,
    contacts: &ContactBook,
    decisions: &[Decision],
    ctx: &MechanismContext<'_>,
    streams: RngStreams,
) -> Result<BTreeMap<UserIdx, Vec<Delivery>>, DataError> {
    let propagation = protocol.propagation();
    let per_piece = propagation.depends_on_piece();
    let addressed: Vec<Vec<(UserIdx, Delivery)>> = decisions
        .par_iter()
        .filter(|decision| !decision.selection.is_empty())
        .map(|decision| -> Result<Vec<(UserIdx, Delivery)>, DataError> {
            let sender = decision.user;
            let mut rng = streams.stream(ctx.iteration, Stage::Routing, sender);
            let mut out = Vec::new();
            let mut shared: Option<Vec<UserIdx>> = None;
            for piece in decision.selection.all() {
                let receivers = match &shared {
                    Some(receivers) => receivers.clone(),
                    None => {
                        let receivers = propagation
                            .users_to_propagate(contacts, sender, piece, ctx, &mut rng)?;
                        if !per_piece {
                            shared = Some(receivers.clone());
                        }
                        receivers
                    }
                };
                out.extend(
                    receivers
                        .into_iter()
                        .map(|receiver| (receiver, Delivery { sender, piece })),
                );
            }
            Ok(out)
        })
        .collect::<Result<_, DataError>>()?;

    let mut inbox: BTreeMap<UserIdx, Vec<Delivery>> = BTreeMap::new();
    for (receiver, delivery) in addressed.into_iter().flatten() {
        inbox.entry(receiver).or_default().push(delivery);
    }
    Ok(inbox)
}

fn perceive(
    protocol: &Protocol,
    state: &SimulationState,
    inbox: BTreeMap<UserIdx, Vec<Delivery>>,
    ctx: &MechanismContext<'_>,
    streams: RngStreams,
) -> Result<Vec<(UserIdx, Vec<Delivery>)>, DataError> {
    let mut perceived: Vec<(UserIdx, Vec<Delivery>)> = inbox
        .into_par_iter()
        .map(|(receiver, incoming)| -> Result<(UserIdx, Vec<Delivery>), DataError> {
            let user_state = state.user(receiver)?;
            let mut rng = streams.stream(ctx.iteration, Stage::Sight, receiver);
            let seen = protocol
                .sight()
                .perceive(receiver, user_state, incoming, ctx, &mut rng)?;
            Ok((receiver, seen))
        })
        .collect::<Result<_, DataError>>()?;
    perceived.sort_unstable_by_key(|(receiver, _)| *receiver);
    Ok(perceived)
}

/// Merge what `receiver` perceived into one record per piece and log it
/// as new or re-received.
///
/// Own pieces, propagated pieces and pieces the receiver sends in this
/// same iteration ignore deliveries. A piece still in `received` or
/// `discarded` before the step is re-received.
fn classify(
    iteration: &mut Iteration,
    state: &SimulationState,
    receiver: UserIdx,
    seen: Vec<Delivery>,
) -> Result<(), DataError> {
    let user_state = state.user(receiver)?;
    let mut senders: BTreeMap<PieceIdx, BTreeSet<UserIdx>> = BTreeMap::new();
    for delivery in seen {
        senders
            .entry(delivery.piece)
            .or_default()
            .insert(delivery.sender);
    }
    let number = iteration.number();
    for (piece, provenance) in senders {
        let sending = iteration
            .propagating()
            .get(&receiver)
            .is_some_and(|records| records.contains_key(&piece));
        if sending {
            continue;
        }
        let record = PropagatedInformation::with_provenance(piece, number, provenance);
        match user_state.status(piece) {
            Some(PieceStatus::Own | PieceStatus::Propagated) => {}
            Some(PieceStatus::Received | PieceStatus::Discarded) => {
                iteration.add_rereceiving(receiver, record);
            }
            None => iteration.add_receiving(receiver, record),
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use contagion_graph::{AdjacencyGraph, DataBuilder};
    use contagion_types::{EdgeOrientation, InformationPiece};

    use super::*;
    use crate::mechanisms::EdgeProbability;
    use crate::mechanisms::update::EarliestUnion;

    /// Path a - b - c; `a` created piece `p0`.
    fn data() -> Arc<Data> {
        let mut builder = DataBuilder::new();
        for id in ["a", "b", "c"] {
            builder.add_user(id, BTreeSet::new()).unwrap();
        }
        builder
            .add_piece(InformationPiece {
                id: "p0".to_owned(),
                creator: "a".to_owned(),
                timestamp: 0,
                features: BTreeSet::new(),
            })
            .unwrap();
        let mut graph = AdjacencyGraph::builder(3, false);
        graph.add_link(UserIdx(0), UserIdx(1)).unwrap();
        graph.add_link(UserIdx(1), UserIdx(2)).unwrap();
        Arc::new(builder.build(graph.build()).unwrap())
    }

    fn flood() -> Protocol {
        Protocol::independent_cascade(EdgeProbability::Fixed(1.0), EdgeOrientation::Und).unwrap()
    }

    #[test]
    fn piece_floods_along_the_path() {
        let mut simulator = Simulator::new(flood(), data(), 1, 0).unwrap();
        assert_eq!(simulator.phase(), Phase::Idle);

        let first = simulator.step().unwrap();
        assert_eq!(first.number, 0);
        assert_eq!(first.propagated, 1);
        assert_eq!(first.received, 1);
        let b = simulator.state().user(UserIdx(1)).unwrap();
        assert_eq!(b.status(PieceIdx(0)), Some(PieceStatus::Received));

        let second = simulator.step().unwrap();
        assert_eq!(second.number, 1);
        let c = simulator.state().user(UserIdx(2)).unwrap();
        assert!(c.received().get(&PieceIdx(0)).is_some_and(|r| r.timestamp == 1));
        // `a` already propagated the piece and ignores it coming back.
        assert_eq!(second.rereceived, 0);
        assert_eq!(simulator.phase(), Phase::Committed);
        assert_eq!(simulator.clock().iteration(), 2);
    }

    #[test]
    fn state_always_matches_the_replayed_log() {
        let mut simulator = Simulator::new(flood(), data(), 3, 10).unwrap();
        for _ in 0..4 {
            simulator.step().unwrap();
        }
        let replayed = simulator
            .simulation()
            .final_state(simulator.data(), simulator.protocol().update())
            .unwrap();
        assert_eq!(&replayed, simulator.state());
        assert_eq!(simulator.simulation().initial_number(), 10);
        assert_eq!(simulator.simulation().next_number(), 14);
    }

    #[test]
    fn same_seed_gives_same_log() {
        let run = |seed| {
            let protocol = Protocol::rumor_spreading(1, EdgeOrientation::Und).unwrap();
            let mut simulator = Simulator::new(protocol, data(), seed, 0).unwrap();
            for _ in 0..5 {
                simulator.step().unwrap();
            }
            simulator.into_simulation()
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn resume_continues_numbering() {
        let mut simulator = Simulator::new(flood(), data(), 1, 0).unwrap();
        simulator.step().unwrap();
        let log = simulator.into_simulation();

        let mut resumed = Simulator::resume(flood(), data(), log, 1).unwrap();
        let summary = resumed.step().unwrap();
        assert_eq!(summary.number, 1);
        assert_eq!(resumed.simulation().len(), 2);
        let c = resumed.state().user(UserIdx(2)).unwrap();
        assert_eq!(c.status(PieceIdx(0)), Some(PieceStatus::Received));
    }

    /// Selects nothing until `fail_from`, then reports a missing piece.
    #[derive(Debug)]
    struct FailingSelection {
        fail_from: u64,
    }

    impl crate::mechanisms::SelectionMechanism for FailingSelection {
        fn select(
            &self,
            _user: UserIdx,
            _state: &crate::user_state::UserState,
            ctx: &MechanismContext<'_>,
            _rng: &mut crate::rng::SimRng,
        ) -> Result<Selection, DataError> {
            if ctx.iteration >= self.fail_from {
                Err(DataError::UnknownPiece(PieceIdx(99)))
            } else {
                Ok(Selection::default())
            }
        }
    }

    #[test]
    fn failed_step_terminates_and_keeps_the_log() {
        let failing = Protocol::new(
            Box::new(FailingSelection { fail_from: 2 }),
            Box::new(crate::mechanisms::propagation::AllNeighbors::new(
                EdgeOrientation::Und,
            )),
            Box::new(EarliestUnion),
            Box::new(crate::mechanisms::expiration::NeverExpire),
            Box::new(crate::mechanisms::sight::AllSight),
        );
        let mut simulator = Simulator::new(failing, data(), 1, 0).unwrap();
        simulator.step().unwrap();
        simulator.step().unwrap();

        let err = simulator.step().unwrap_err();
        assert!(matches!(err, SimulationError::Data { .. }));
        assert_eq!(simulator.phase(), Phase::Terminated);
        assert_eq!(simulator.simulation().len(), 2);
        let replayed = simulator
            .simulation()
            .final_state(simulator.data(), simulator.protocol().update())
            .unwrap();
        assert_eq!(&replayed, simulator.state());

        assert!(matches!(simulator.step(), Err(SimulationError::Terminated)));
        assert_eq!(simulator.simulation().len(), 2);
    }

    #[test]
    fn sending_user_ignores_the_same_piece_arriving() {
        // `c` holds piece 0 as received, sends it, and gets it from `b`
        // in the same iteration.
        let data = data();
        let held = PropagatedInformation::new(PieceIdx(0), 0, UserIdx(1));
        let mut log = Simulation::new(0);
        let mut first = Iteration::new(0);
        first.add_receiving(UserIdx(2), held.clone());
        log.push(first).unwrap();
        let state = log.final_state(&data, &EarliestUnion).unwrap();

        let mut iteration = Iteration::new(1);
        iteration.add_propagating(UserIdx(2), held);
        let arriving = vec![Delivery {
            sender: UserIdx(1),
            piece: PieceIdx(0),
        }];
        classify(&mut iteration, &state, UserIdx(2), arriving.clone()).unwrap();
        assert!(iteration.receiving().is_empty());
        assert!(iteration.rereceiving().is_empty());

        // Without the send it counts as a re-receipt.
        let mut iteration = Iteration::new(1);
        classify(&mut iteration, &state, UserIdx(2), arriving).unwrap();
        assert_eq!(iteration.num_rereceived(), 1);
    }
}
