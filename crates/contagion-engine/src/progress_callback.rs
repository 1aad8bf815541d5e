//! Iteration callback that logs progress and keeps running totals.

use contagion_core::runner::IterationCallback;
use contagion_core::simulation::SimulationState;
use contagion_core::simulator::{IterationSummary, Simulator};
use tracing::{debug, info};

/// Cumulative event counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// `(user, piece)` pairs sent.
    pub propagated: usize,
    /// `(user, piece)` pairs dropped.
    pub discarded: usize,
    /// `(user, piece)` pairs learned for the first time.
    pub received: usize,
    /// `(user, piece)` pairs received again.
    pub rereceived: usize,
}

impl Totals {
    const fn add(&mut self, summary: &IterationSummary) {
        self.propagated = self.propagated.saturating_add(summary.propagated);
        self.discarded = self.discarded.saturating_add(summary.discarded);
        self.received = self.received.saturating_add(summary.received);
        self.rereceived = self.rereceived.saturating_add(summary.rereceived);
    }
}

/// Logs every committed iteration at debug level.
#[derive(Debug, Default)]
pub struct ProgressCallback {
    totals: Totals,
}

impl ProgressCallback {
    /// Create a callback with zeroed totals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals accumulated so far.
    pub const fn totals(&self) -> Totals {
        self.totals
    }
}

impl IterationCallback for ProgressCallback {
    fn on_iteration(&mut self, summary: &IterationSummary, _simulator: &Simulator) {
        self.totals.add(summary);
        debug!(
            iteration = summary.number,
            propagating_users = summary.propagating_users,
            propagated = summary.propagated,
            received = summary.received,
            rereceived = summary.rereceived,
            discarded = summary.discarded,
            "Iteration"
        );
    }
}

/// Log how many pieces sit in each partition of the final state.
pub fn log_final_state(state: &SimulationState, totals: Totals) {
    let mut own: usize = 0;
    let mut received: usize = 0;
    let mut propagated: usize = 0;
    let mut discarded: usize = 0;
    let mut reached: usize = 0;
    for user in state.users() {
        own = own.saturating_add(user.own().len());
        received = received.saturating_add(user.received().len());
        propagated = propagated.saturating_add(user.propagated().len());
        discarded = discarded.saturating_add(user.discarded().len());
        if !user.received().is_empty() || !user.propagated().is_empty() {
            reached = reached.saturating_add(1);
        }
    }
    info!(
        users = state.users().len(),
        reached,
        own,
        received,
        propagated,
        discarded,
        total_sent = totals.propagated,
        total_learned = totals.received,
        total_rereceived = totals.rereceived,
        total_dropped = totals.discarded,
        "Final state"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate() {
        let summary = IterationSummary {
            number: 3,
            propagating_users: 2,
            propagated: 4,
            discarding_users: 1,
            discarded: 1,
            receiving_users: 3,
            received: 3,
            rereceiving_users: 1,
            rereceived: 1,
        };
        let mut totals = Totals::default();
        totals.add(&summary);
        totals.add(&summary);
        assert_eq!(
            totals,
            Totals {
                propagated: 8,
                discarded: 2,
                received: 6,
                rereceived: 2,
            }
        );
    }
}
