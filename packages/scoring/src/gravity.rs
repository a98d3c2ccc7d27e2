//! Gravity (spatial-interaction) accessibility to point facilities.
//!
//! A facility at distance `d` from a region's representative point
//! contributes `capacity / (1 + decay * d^2)` when `d <= cutoff_radius`.
//! The sum over all facilities in range is the region's accessibility;
//! no facility in range is a legitimate score of zero.
//!
//! Distances are planar (Euclidean in CRS units) by default, which
//! assumes a projected CRS in metres. [`DistanceMetric::Haversine`] is for
//! longitude/latitude inputs and yields metres. Either way `cutoff_radius`
//! and `decay` are expressed in the same units as the distance.

use std::collections::BTreeMap;

use geo::{Distance, Euclidean, Haversine, Point};
use healthy_city_scoring_models::{Facility, Region, RegionId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::{ConfigError, finite, invalid};

/// Upper edges of the distance bands reported by [`AccessProfile`].
pub const ACCESS_BANDS: [f64; 5] = [500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0];

/// How distance between two points is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistanceMetric {
    /// Straight-line distance in CRS units.
    Planar,
    /// Great-circle distance in metres between lon/lat points.
    Haversine,
}

impl DistanceMetric {
    /// Distance between `a` and `b`.
    #[must_use]
    pub fn distance(self, a: Point<f64>, b: Point<f64>) -> f64 {
        match self {
            Self::Planar => Euclidean.distance(a, b),
            Self::Haversine => Haversine.distance(a, b),
        }
    }
}

/// Parameters of the gravity model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GravityParams {
    /// Facilities farther than this contribute nothing.
    pub cutoff_radius: f64,
    /// Distance-decay coefficient, per squared distance unit.
    pub decay: f64,
    /// Distance metric.
    pub metric: DistanceMetric,
}

impl GravityParams {
    /// Checks the constants are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a non-positive cutoff or a
    /// negative decay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        finite("gravity.cutoff_radius", self.cutoff_radius)?;
        finite("gravity.decay", self.decay)?;
        if self.cutoff_radius <= 0.0 {
            return Err(invalid("gravity.cutoff_radius", "must be positive"));
        }
        if self.decay < 0.0 {
            return Err(invalid("gravity.decay", "must not be negative"));
        }
        Ok(())
    }
}

/// Contribution of one facility of `capacity` at `distance`.
#[must_use]
pub fn contribution(capacity: f64, distance: f64, decay: f64) -> f64 {
    capacity / decay.mul_add(distance * distance, 1.0)
}

/// Accessibility of `origin` to `facilities`.
#[must_use]
pub fn accessibility(origin: Point<f64>, facilities: &[Facility], params: &GravityParams) -> f64 {
    facilities
        .iter()
        .filter_map(|facility| {
            let d = params.metric.distance(origin, facility.location);
            (d <= params.cutoff_radius).then(|| contribution(facility.capacity, d, params.decay))
        })
        .fold(0.0, |acc, c| acc + c)
}

/// Accessibility of every region's centroid.
///
/// Regions without a centroid (empty geometry) are undefined.
pub fn accessibility_all(
    regions: &[Region],
    facilities: &[Facility],
    params: &GravityParams,
) -> BTreeMap<RegionId, Option<f64>> {
    let scores: Vec<(RegionId, Option<f64>)> = regions
        .par_iter()
        .map(|region| {
            let value = region
                .centroid()
                .map(|c| accessibility(c, facilities, params));
            (region.id.clone(), value)
        })
        .collect();

    log::debug!(
        "Computed accessibility for {} regions against {} facilities",
        scores.len(),
        facilities.len()
    );

    scores.into_iter().collect()
}

/// Distance-band summary of facilities around a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessProfile {
    /// Distance to the nearest facility, if any exist.
    pub nearest_distance: Option<f64>,
    /// Number of facilities within each of [`ACCESS_BANDS`].
    pub within: Vec<BandCount>,
    /// Gravity accessibility at the same point.
    pub accessibility: f64,
}

/// Facility count within one distance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandCount {
    /// Band upper edge.
    pub radius: f64,
    /// Facilities at or inside the radius.
    pub count: usize,
}

impl AccessProfile {
    /// Builds the profile for `origin`.
    #[must_use]
    pub fn at(origin: Point<f64>, facilities: &[Facility], params: &GravityParams) -> Self {
        let distances: Vec<f64> = facilities
            .iter()
            .map(|f| params.metric.distance(origin, f.location))
            .collect();

        let within = ACCESS_BANDS
            .iter()
            .map(|&radius| BandCount {
                radius,
                count: distances.iter().filter(|&&d| d <= radius).count(),
            })
            .collect();

        Self {
            nearest_distance: distances.iter().copied().reduce(f64::min),
            within,
            accessibility: accessibility(origin, facilities, params),
        }
    }
}
