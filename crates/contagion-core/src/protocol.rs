//! Validated assembly of the five mechanisms into a protocol.
//!
//! A [`Protocol`] is built once, from configuration or from one of the
//! named presets, and is immutable afterwards. Every parameter check
//! happens here: a protocol that exists is a protocol that can run.

use contagion_types::EdgeOrientation;
use tracing::debug;

use crate::config::{
    ExpirationConfig, PresetConfig, PropagationConfig, ProtocolConfig, SelectionConfig,
    SightConfig, UpdateConfig,
};
use crate::mechanisms::expiration::{AgeExpiration, CapacityExpiration, NeverExpire};
use crate::mechanisms::propagation::{AllNeighbors, CascadePropagation, Pairing, WindowedContact};
use crate::mechanisms::selection::{
    CascadeSelection, CountSelection, Limit, RecommenderSelection, Threshold, ThresholdSelection,
    TimestampSelection,
};
use crate::mechanisms::sight::{AllSight, CountSight, RecommendedSight};
use crate::mechanisms::update::{EarliestUnion, LargestProvenance, LatestUnion};
use crate::mechanisms::{
    EdgeProbability, ExpirationMechanism, PropagationMechanism, SelectionMechanism,
    SightMechanism, UpdateMechanism,
};

/// Invalid protocol configuration. Raised before any iteration runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// A probability parameter is outside `[0, 1]` or not a number.
    #[error("{mechanism}: {parameter} = {value} is not a probability")]
    InvalidProbability {
        /// Mechanism being configured.
        mechanism: &'static str,
        /// Name of the offending parameter.
        parameter: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A selection threshold cannot be satisfied meaningfully.
    #[error("invalid threshold: {reason}")]
    InvalidThreshold {
        /// What is wrong with it.
        reason: String,
    },

    /// A contact mechanism was given a cool-down window of zero slots.
    #[error("wait time must be at least 1")]
    InvalidWaitTime,

    /// Any other out-of-range mechanism parameter.
    #[error("{mechanism}: {reason}")]
    InvalidParameter {
        /// Mechanism being configured.
        mechanism: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Reject `value` unless it lies in `[0, 1]`.
pub(crate) fn check_probability(
    mechanism: &'static str,
    parameter: &'static str,
    value: f64,
) -> Result<(), ProtocolError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidProbability {
            mechanism,
            parameter,
            value,
        })
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// One instance of each mechanism.
#[derive(Debug)]
pub struct Protocol {
    selection: Box<dyn SelectionMechanism>,
    propagation: Box<dyn PropagationMechanism>,
    update: Box<dyn UpdateMechanism>,
    expiration: Box<dyn ExpirationMechanism>,
    sight: Box<dyn SightMechanism>,
}

impl Protocol {
    /// Bundle already validated mechanisms.
    pub const fn new(
        selection: Box<dyn SelectionMechanism>,
        propagation: Box<dyn PropagationMechanism>,
        update: Box<dyn UpdateMechanism>,
        expiration: Box<dyn ExpirationMechanism>,
        sight: Box<dyn SightMechanism>,
    ) -> Self {
        Self {
            selection,
            propagation,
            update,
            expiration,
            sight,
        }
    }

    /// Build and validate a protocol from configuration.
    ///
    /// A preset, when present, replaces the configured selection and
    /// propagation mechanisms. The independent cascade preset also
    /// replaces the expiration mechanism, since a user gets a single
    /// activation trial per receipt. Update and sight always come from
    /// their own sections.
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, ProtocolError> {
        let expiration = build_expiration(config.expiration)?;
        let (selection, propagation, expiration) = match &config.preset {
            Some(preset) => {
                let preset = preset_mechanisms(preset)?;
                let expiration = preset.expiration.unwrap_or(expiration);
                (preset.selection, preset.propagation, expiration)
            }
            None => (
                build_selection(&config.selection)?,
                build_propagation(&config.propagation)?,
                expiration,
            ),
        };
        let protocol = Self {
            selection,
            propagation,
            update: build_update(config.update),
            expiration,
            sight: build_sight(config.sight)?,
        };
        debug!(
            preset = ?config.preset,
            selection = ?protocol.selection,
            propagation = ?protocol.propagation,
            "Protocol assembled"
        );
        Ok(protocol)
    }

    /// Push-pull rumor spreading: every user sends everything it holds
    /// to one random neighbor per iteration, with a cool-down window.
    pub fn rumor_spreading(
        wait_time: usize,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::gossip(Box::new(WindowedContact::rumor_spreading(
            wait_time,
            orientation,
        )?)))
    }

    /// Push gossip: the chooser sends to the chosen neighbor.
    pub fn push(wait_time: usize, orientation: EdgeOrientation) -> Result<Self, ProtocolError> {
        Ok(Self::gossip(Box::new(WindowedContact::new(
            wait_time,
            orientation,
            Pairing::Push,
            None,
        )?)))
    }

    /// Pull gossip: the chosen neighbor sends to the chooser.
    pub fn pull(wait_time: usize, orientation: EdgeOrientation) -> Result<Self, ProtocolError> {
        Ok(Self::gossip(Box::new(WindowedContact::new(
            wait_time,
            orientation,
            Pairing::Pull,
            None,
        )?)))
    }

    /// Independent cascade: own pieces go to every neighbor once, and a
    /// received piece is sent on if one of its senders activates the user.
    ///
    /// Each receipt gets one trial. A piece that is not sent in the
    /// iteration after it arrived is discarded, and only a later delivery
    /// brings it back for another trial.
    pub fn independent_cascade(
        probability: EdgeProbability,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::with_defaults(
            Box::new(CascadeSelection::new(
                Limit::All,
                Limit::Nothing,
                probability,
            )?),
            Box::new(AllNeighbors::new(orientation)),
        )
        .with_expiration(Box::new(AgeExpiration::new(0))))
    }

    /// Linear threshold on sender counts: a received piece is sent to
    /// every neighbor once `threshold` distinct senders have delivered it.
    pub fn count_threshold(
        threshold: usize,
        orientation: EdgeOrientation,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::with_defaults(
            Box::new(ThresholdSelection::new(
                Limit::All,
                Threshold::Count(threshold),
                Limit::All,
                orientation,
            )?),
            Box::new(AllNeighbors::new(orientation)),
        ))
    }

    fn gossip(propagation: Box<dyn PropagationMechanism>) -> Self {
        Self::with_defaults(
            Box::new(CountSelection::new(Limit::All, Limit::All, Limit::Nothing)),
            propagation,
        )
    }

    fn with_defaults(
        selection: Box<dyn SelectionMechanism>,
        propagation: Box<dyn PropagationMechanism>,
    ) -> Self {
        Self::new(
            selection,
            propagation,
            Box::new(EarliestUnion),
            Box::new(NeverExpire),
            Box::new(AllSight),
        )
    }

    /// Replace the update mechanism.
    #[must_use]
    pub fn with_update(mut self, update: Box<dyn UpdateMechanism>) -> Self {
        self.update = update;
        self
    }

    /// Replace the expiration mechanism.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Box<dyn ExpirationMechanism>) -> Self {
        self.expiration = expiration;
        self
    }

    /// Replace the sight mechanism.
    #[must_use]
    pub fn with_sight(mut self, sight: Box<dyn SightMechanism>) -> Self {
        self.sight = sight;
        self
    }

    /// The selection mechanism.
    pub fn selection(&self) -> &dyn SelectionMechanism {
        self.selection.as_ref()
    }

    /// The propagation mechanism.
    pub fn propagation(&self) -> &dyn PropagationMechanism {
        self.propagation.as_ref()
    }

    /// The update mechanism.
    pub fn update(&self) -> &dyn UpdateMechanism {
        self.update.as_ref()
    }

    /// The expiration mechanism.
    pub fn expiration(&self) -> &dyn ExpirationMechanism {
        self.expiration.as_ref()
    }

    /// The sight mechanism.
    pub fn sight(&self) -> &dyn SightMechanism {
        self.sight.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Mechanisms a preset fixes. `expiration` is `None` when the preset
/// leaves the configured one in place.
struct PresetMechanisms {
    selection: Box<dyn SelectionMechanism>,
    propagation: Box<dyn PropagationMechanism>,
    expiration: Option<Box<dyn ExpirationMechanism>>,
}

fn preset_mechanisms(preset: &PresetConfig) -> Result<PresetMechanisms, ProtocolError> {
    let single_trial = matches!(preset, PresetConfig::IndependentCascade { .. });
    let protocol = match *preset {
        PresetConfig::RumorSpreading {
            wait_time,
            orientation,
        } => Protocol::rumor_spreading(wait_time, orientation)?,
        PresetConfig::Push {
            wait_time,
            orientation,
        } => Protocol::push(wait_time, orientation)?,
        PresetConfig::Pull {
            wait_time,
            orientation,
        } => Protocol::pull(wait_time, orientation)?,
        PresetConfig::IndependentCascade {
            probability,
            orientation,
        } => Protocol::independent_cascade(probability, orientation)?,
        PresetConfig::CountThreshold {
            threshold,
            orientation,
        } => Protocol::count_threshold(threshold, orientation)?,
    };
    Ok(PresetMechanisms {
        selection: protocol.selection,
        propagation: protocol.propagation,
        expiration: single_trial.then_some(protocol.expiration),
    })
}

fn build_selection(config: &SelectionConfig) -> Result<Box<dyn SelectionMechanism>, ProtocolError> {
    Ok(match *config {
        SelectionConfig::Count {
            num_own,
            num_received,
            num_repropagated,
        } => Box::new(CountSelection::new(num_own, num_received, num_repropagated)),
        SelectionConfig::Threshold {
            num_own,
            threshold,
            num_received,
            orientation,
        } => Box::new(ThresholdSelection::new(
            num_own,
            threshold,
            num_received,
            orientation,
        )?),
        SelectionConfig::IndependentCascade {
            num_own,
            num_repropagated,
            probability,
        } => Box::new(CascadeSelection::new(num_own, num_repropagated, probability)?),
        SelectionConfig::Timestamp {
            loose,
            num_received,
        } => Box::new(TimestampSelection::new(loose, num_received)),
        SelectionConfig::Recommender {
            num_own,
            num_received,
            prob,
            orientation,
        } => Box::new(RecommenderSelection::new(
            num_own,
            num_received,
            prob,
            orientation,
        )?),
    })
}

fn build_propagation(
    config: &PropagationConfig,
) -> Result<Box<dyn PropagationMechanism>, ProtocolError> {
    Ok(match *config {
        PropagationConfig::RumorSpreading {
            wait_time,
            orientation,
        } => Box::new(WindowedContact::rumor_spreading(wait_time, orientation)?),
        PropagationConfig::PureRecommender {
            wait_time,
            orientation,
        } => Box::new(WindowedContact::pure_recommender(wait_time, orientation)?),
        PropagationConfig::Push {
            wait_time,
            orientation,
        } => Box::new(WindowedContact::new(
            wait_time,
            orientation,
            Pairing::Push,
            None,
        )?),
        PropagationConfig::Pull {
            wait_time,
            orientation,
        } => Box::new(WindowedContact::new(
            wait_time,
            orientation,
            Pairing::Pull,
            None,
        )?),
        PropagationConfig::AllNeighbors { orientation } => {
            Box::new(AllNeighbors::new(orientation))
        }
        PropagationConfig::IndependentCascade {
            orientation,
            probability,
        } => Box::new(CascadePropagation::new(orientation, probability)?),
    })
}

fn build_update(config: UpdateConfig) -> Box<dyn UpdateMechanism> {
    match config {
        UpdateConfig::EarliestUnion => Box::new(EarliestUnion),
        UpdateConfig::LatestUnion => Box::new(LatestUnion),
        UpdateConfig::LargestProvenance => Box::new(LargestProvenance),
    }
}

fn build_expiration(
    config: ExpirationConfig,
) -> Result<Box<dyn ExpirationMechanism>, ProtocolError> {
    Ok(match config {
        ExpirationConfig::Never => Box::new(NeverExpire),
        ExpirationConfig::Age { max_age } => Box::new(AgeExpiration::new(max_age)),
        ExpirationConfig::Capacity { capacity } => Box::new(CapacityExpiration::new(capacity)?),
    })
}

fn build_sight(config: SightConfig) -> Result<Box<dyn SightMechanism>, ProtocolError> {
    Ok(match config {
        SightConfig::All => Box::new(AllSight),
        SightConfig::Count { max_pieces } => Box::new(CountSight::new(max_pieces)?),
        SightConfig::Recommended {
            prob_recommended,
            prob_other,
            orientation,
        } => Box::new(RecommendedSight::new(
            prob_recommended,
            prob_other,
            orientation,
        )?),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn probability_bounds_are_inclusive() {
        assert!(check_probability("m", "p", 0.0).is_ok());
        assert!(check_probability("m", "p", 1.0).is_ok());
        assert!(check_probability("m", "p", 1.000_1).is_err());
        assert!(check_probability("m", "p", f64::NAN).is_err());
    }

    #[test]
    fn default_config_builds() {
        let protocol = Protocol::from_config(&ProtocolConfig::default());
        assert!(protocol.is_ok());
    }

    #[test]
    fn zero_wait_time_fails_at_construction() {
        let config = ProtocolConfig {
            propagation: PropagationConfig::RumorSpreading {
                wait_time: 0,
                orientation: EdgeOrientation::Und,
            },
            ..ProtocolConfig::default()
        };
        assert!(matches!(
            Protocol::from_config(&config),
            Err(ProtocolError::InvalidWaitTime)
        ));
    }

    #[test]
    fn preset_overrides_selection_and_propagation() {
        let config = ProtocolConfig {
            preset: Some(PresetConfig::IndependentCascade {
                probability: EdgeProbability::Fixed(0.5),
                orientation: EdgeOrientation::Out,
            }),
            propagation: PropagationConfig::RumorSpreading {
                wait_time: 0,
                orientation: EdgeOrientation::Und,
            },
            ..ProtocolConfig::default()
        };
        // The invalid propagation section is ignored under a preset.
        let protocol = Protocol::from_config(&config);
        assert!(protocol.is_ok_and(|p| !p.propagation().depends_on_piece()));
    }

    #[test]
    fn cascade_preset_gives_one_trial_per_receipt() {
        let config = ProtocolConfig {
            preset: Some(PresetConfig::IndependentCascade {
                probability: EdgeProbability::Fixed(0.5),
                orientation: EdgeOrientation::Und,
            }),
            ..ProtocolConfig::default()
        };
        let protocol = Protocol::from_config(&config).unwrap();
        assert_eq!(
            format!("{:?}", protocol.expiration()),
            format!("{:?}", AgeExpiration::new(0))
        );

        // Other presets keep the configured expiration.
        let config = ProtocolConfig {
            preset: Some(PresetConfig::CountThreshold {
                threshold: 2,
                orientation: EdgeOrientation::Und,
            }),
            ..ProtocolConfig::default()
        };
        let protocol = Protocol::from_config(&config).unwrap();
        assert_eq!(format!("{:?}", protocol.expiration()), "NeverExpire");
    }

    #[test]
    fn invalid_sections_are_reported() {
        let config = ProtocolConfig {
            sight: SightConfig::Recommended {
                prob_recommended: 2.0,
                prob_other: 0.1,
                orientation: EdgeOrientation::Und,
            },
            ..ProtocolConfig::default()
        };
        let error = Protocol::from_config(&config).err();
        assert!(matches!(
            error,
            Some(ProtocolError::InvalidProbability {
                parameter: "prob_recommended",
                ..
            })
        ));

        let config = ProtocolConfig {
            expiration: ExpirationConfig::Capacity { capacity: 0 },
            ..ProtocolConfig::default()
        };
        assert!(matches!(
            Protocol::from_config(&config),
            Err(ProtocolError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn presets_validate_their_parameters() {
        assert!(Protocol::rumor_spreading(0, EdgeOrientation::Und).is_err());
        assert!(Protocol::push(2, EdgeOrientation::Out).is_ok());
        assert!(Protocol::pull(2, EdgeOrientation::In).is_ok());
        assert!(Protocol::count_threshold(0, EdgeOrientation::Und).is_err());
        assert!(
            Protocol::independent_cascade(EdgeProbability::Fixed(-0.5), EdgeOrientation::Und)
                .is_err()
        );
    }
}
