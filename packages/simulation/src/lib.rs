#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! What-if simulation of urban interventions.
//!
//! A [`SimulationEngine`] wraps an immutable [`healthy_city_scoring::Baseline`]
//! and an [`ActionCatalog`]. Each request is validated, intersected with
//! the region set, applied to a private copy of the raw feature table (and
//! facility list), and re-scored over the entire population. The baseline
//! is only ever read, so any number of simulations may run against it at
//! once. [`SimulationEngine::optimize_parks`] builds on this to choose park
//! sites greedily.

pub mod catalog;
pub mod engine;
pub mod optimize;
pub mod validate;

pub use catalog::{
    ActionCatalog, ActionInfo, ActionRecipe, FeatureDelta, OptimizerSettings, SimulationPolicy,
};
pub use engine::{SimulationEngine, SimulationStage};

use healthy_city_scoring::ConfigError;
use thiserror::Error;

/// Errors that can occur while running a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The request was rejected before any work was done.
    #[error("Invalid action: {reason}")]
    InvalidAction {
        /// Why the action was rejected.
        reason: String,
    },

    /// The action catalog is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SimulationError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            reason: reason.into(),
        }
    }
}
