//! The five pluggable mechanisms of a diffusion protocol.
//!
//! - [`selection`] -- which held pieces a user sends this iteration.
//! - [`propagation`] -- which neighbors a user contacts (the gossip topology).
//! - [`update`] -- how a re-delivered piece merges with the held record.
//! - [`expiration`] -- which received pieces go stale.
//! - [`sight`] -- which deliveries a receiver actually perceives.
//!
//! Every mechanism is immutable once built and is shared by reference
//! across the worker pool. Randomness is always injected as a [`SimRng`]
//! drawn from the run's [`RngStreams`](crate::rng::RngStreams).
//!
//! [`SimRng`]: crate::rng::SimRng

pub mod expiration;
pub mod propagation;
pub mod selection;
pub mod sight;
pub mod update;

use contagion_graph::{Data, SocialGraph};
use contagion_types::{EdgeOrientation, UserIdx};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::protocol::{ProtocolError, check_probability};
use crate::rng::SimRng;

pub use expiration::ExpirationMechanism;
pub use propagation::{ContactBook, PropagationMechanism};
pub use selection::{Selection, SelectionMechanism};
pub use sight::{Delivery, SightMechanism};
pub use update::UpdateMechanism;

/// What every mechanism may read about the current iteration.
#[derive(Debug, Clone, Copy)]
pub struct MechanismContext<'a> {
    /// The dataset.
    pub data: &'a Data,
    /// Number of the iteration being run.
    pub iteration: u64,
    /// Timestamp of the iteration in the dataset's time line.
    pub timestamp: u64,
}

impl<'a> MechanismContext<'a> {
    /// Context for one iteration.
    pub const fn new(data: &'a Data, iteration: u64, timestamp: u64) -> Self {
        Self {
            data,
            iteration,
            timestamp,
        }
    }
}

/// Probability that a piece crosses the link between a user and one of
/// its neighbors, as used by the independent cascade model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeProbability {
    /// The same probability for every link.
    Fixed(f64),
    /// The weight of the edge, read from the user's side under the given
    /// orientation. A missing edge never transmits.
    EdgeWeight(EdgeOrientation),
}

impl EdgeProbability {
    /// Check that a fixed probability lies in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidProbability`] otherwise.
    pub fn validated(self, mechanism: &'static str) -> Result<Self, ProtocolError> {
        if let Self::Fixed(p) = self {
            check_probability(mechanism, "probability", p)?;
        }
        Ok(self)
    }

    /// Run the transmission trial between `user` and `neighbor`.
    ///
    /// With `EdgeWeight(Und)` every existing direction of the link gets
    /// its own draw and one success is enough. Weights above 1 always
    /// transmit.
    pub fn trial(
        self,
        graph: &dyn SocialGraph,
        user: UserIdx,
        neighbor: UserIdx,
        rng: &mut SimRng,
    ) -> bool {
        match self {
            Self::Fixed(p) => rng.random::<f64>() < p,
            Self::EdgeWeight(orientation @ (EdgeOrientation::In | EdgeOrientation::Out)) => {
                draw_weight(graph.oriented_weight(user, neighbor, orientation), rng)
            }
            Self::EdgeWeight(EdgeOrientation::Und) => {
                draw_weight(graph.edge_weight(user, neighbor), rng)
                    || draw_weight(graph.edge_weight(neighbor, user), rng)
            }
        }
    }
}

fn draw_weight(weight: Option<f64>, rng: &mut SimRng) -> bool {
    weight.is_some_and(|w| rng.random::<f64>() < w)
}
