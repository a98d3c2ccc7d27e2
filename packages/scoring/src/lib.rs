#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Environmental health scoring engine.
//!
//! Raw per-region feature values (sampled from rasters, plus gravity
//! accessibility to facilities) are normalized to population z-scores,
//! combined into signed derived indices, and projected onto a bounded
//! display scale. All weights and bounds come from [`ScoringConfig`].
//!
//! The pipeline is pure computation over in-memory inputs. A
//! [`ScoringSession`] owns the inputs and a generation-stamped
//! [`cache::SamplingCache`]; [`ScoringSession::score_baseline`] produces an
//! immutable [`Baseline`] that simulations share by reference.

pub mod cache;
pub mod composite;
pub mod config;
pub mod gravity;
pub mod normalize;
pub mod session;

pub use composite::{CompositeScorer, FeatureStats, feature_stats};
pub use config::{ConfigError, DisplayScale, FeatureBounds, ScoringConfig};
pub use gravity::{AccessProfile, DistanceMetric, GravityParams, accessibility, accessibility_all};
pub use normalize::{PopulationStats, population_stats, zscore};
pub use session::{Baseline, ScoringSession, validate_facility};

use healthy_city_scoring_models::{Feature, RegionId};
use thiserror::Error;

/// Errors that can occur while assembling or running a scoring pass.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// A derived index needs a raster that was never attached.
    #[error("No raster attached for feature {0}")]
    MissingField(Feature),

    /// A raster was offered for a feature that is computed, not sampled.
    #[error("Feature {0} is not raster-derived")]
    NotARasterFeature(Feature),

    /// Rasters in one session must share a coordinate reference.
    #[error("Raster CRS {actual} does not match session CRS {expected}")]
    CrsMismatch {
        /// CRS of the rasters already attached.
        expected: String,
        /// CRS of the rejected raster.
        actual: String,
    },

    /// A facility cannot take part in the gravity model.
    #[error("Invalid facility #{index}: {message}")]
    InvalidFacility {
        /// Position in the facility list.
        index: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// A region cannot be scored.
    #[error("Invalid region {id}: {message}")]
    InvalidRegion {
        /// Region identifier.
        id: RegionId,
        /// Description of what went wrong.
        message: String,
    },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
