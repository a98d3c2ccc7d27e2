#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region, feature, and score types shared across the scoring engine.
//!
//! A [`Region`] is the unit of scoring (usually a census tract). Raw
//! per-region feature values flow through normalization and the composite
//! scorer into a [`ScoreBreakdown`]. Every numeric output is an
//! `Option<f64>`: `None` is the explicit "undefined" marker and is what
//! crosses the crate boundary instead of `NaN`.

use std::collections::BTreeMap;

use geo::{Area, Centroid, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Raw (or normalized) values for every feature of one region.
pub type FeatureValues = BTreeMap<Feature, Option<f64>>;

/// Per-region feature values for a whole population.
pub type FeatureTable = BTreeMap<RegionId, FeatureValues>;

/// Stable identifier of a [`Region`] (e.g. a tract GEOID).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Wraps an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RegionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A scored input variable.
///
/// Raster features are sampled from a gridded field over each region's
/// footprint. [`Feature::HealthcareAccess`] is derived from the gravity
/// accessibility model instead.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    /// Normalized difference vegetation index, in `[-1, 1]`.
    Ndvi,
    /// Land-surface temperature.
    Temperature,
    /// Pollutant concentration (e.g. NO2 column density).
    Pollutant,
    /// Gravity-model access to healthcare facilities.
    HealthcareAccess,
}

impl Feature {
    /// Every feature, in canonical order.
    pub const ALL: [Self; 4] = [
        Self::Ndvi,
        Self::Temperature,
        Self::Pollutant,
        Self::HealthcareAccess,
    ];

    /// Features that are sampled from raster fields.
    pub const RASTER: [Self; 3] = [Self::Ndvi, Self::Temperature, Self::Pollutant];

    /// Whether this feature is sampled from a raster field.
    #[must_use]
    pub const fn is_raster(self) -> bool {
        !matches!(self, Self::HealthcareAccess)
    }
}

/// A derived sub-index of the composite score.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexKind {
    /// Heat exposure. Higher is worse.
    Heat,
    /// Air-quality risk. Higher is worse.
    AirRisk,
    /// Access to green space. Higher is better.
    GreenAccess,
    /// Access to healthcare. Higher is better.
    HealthcareAccess,
}

impl IndexKind {
    /// Every index, in canonical order.
    pub const ALL: [Self; 4] = [
        Self::Heat,
        Self::AirRisk,
        Self::GreenAccess,
        Self::HealthcareAccess,
    ];

    /// Whether a larger value of this index means a healthier region.
    #[must_use]
    pub const fn higher_is_better(self) -> bool {
        matches!(self, Self::GreenAccess | Self::HealthcareAccess)
    }
}

/// How undefined z-scores are treated by the composite scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UndefinedPolicy {
    /// Any undefined input makes the dependent index and the composite
    /// undefined.
    Propagate,
    /// Undefined z-scores are replaced by `0.0` (the population mean).
    SubstituteZero,
    /// Regions with any undefined input are omitted from the output.
    ExcludeRegion,
}

/// An immutable scoring unit with a stable identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Stable identifier.
    pub id: RegionId,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// Footprint in the session's coordinate reference system.
    pub geometry: MultiPolygon<f64>,
    /// Social vulnerability factor in `[0, 1]` used for equity adjustment.
    pub vulnerability: Option<f64>,
    /// Resident population, used to rank where interventions are needed.
    pub population: Option<f64>,
}

impl Region {
    /// Creates a region with no name and no vulnerability factor.
    #[must_use]
    pub fn new(id: impl Into<RegionId>, geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            id: id.into(),
            name: None,
            geometry: geometry.into(),
            vulnerability: None,
            population: None,
        }
    }

    /// Sets the vulnerability factor.
    #[must_use]
    pub const fn with_vulnerability(mut self, vulnerability: f64) -> Self {
        self.vulnerability = Some(vulnerability);
        self
    }

    /// Sets the resident population.
    #[must_use]
    pub const fn with_population(mut self, population: f64) -> Self {
        self.population = Some(population);
        self
    }

    /// Intervention need: population scaled up by vulnerability.
    ///
    /// A region with no population figure counts as one resident.
    #[must_use]
    pub fn need(&self) -> f64 {
        self.population.unwrap_or(1.0) * (1.0 + self.vulnerability.unwrap_or(0.0))
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Footprint area in squared CRS units.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Representative point used by the gravity model.
    #[must_use]
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }
}

/// A point facility (e.g. a clinic) with a positive capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    /// Optional source identifier.
    pub id: Option<String>,
    /// Location in the same CRS as the regions.
    pub location: Point<f64>,
    /// Capacity weight (beds, staff, ...). Must be positive.
    pub capacity: f64,
}

impl Facility {
    /// Creates an anonymous facility.
    #[must_use]
    pub const fn new(location: Point<f64>, capacity: f64) -> Self {
        Self {
            id: None,
            location,
            capacity,
        }
    }
}

/// Category of a region relative to the population's mean composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScoreBand {
    /// Clearly above the population mean.
    Good,
    /// Within the margin of the mean.
    Moderate,
    /// Clearly below the population mean.
    Poor,
}

impl ScoreBand {
    /// Bands `composite_z` against `mean`, with `margin` in z units on either
    /// side of the mean counting as [`ScoreBand::Moderate`].
    #[must_use]
    pub fn classify(composite_z: f64, mean: f64, margin: f64) -> Self {
        if composite_z > mean + margin {
            Self::Good
        } else if composite_z < mean - margin {
            Self::Poor
        } else {
            Self::Moderate
        }
    }
}

/// Full scoring output for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Raw per-feature values.
    pub raw: FeatureValues,
    /// Per-feature z-scores relative to the region population.
    pub z_scores: FeatureValues,
    /// Derived sub-indices.
    pub indices: BTreeMap<IndexKind, Option<f64>>,
    /// Weighted combination of the indices, in z units.
    pub composite_z: Option<f64>,
    /// Composite projected onto the display scale.
    pub score: Option<f64>,
    /// Display score after equity adjustment.
    pub equity_score: Option<f64>,
    /// Band relative to the population; undefined with the composite.
    pub band: Option<ScoreBand>,
}

/// Population-level summary of a scoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
    /// Number of regions in the output.
    pub region_count: usize,
    /// Regions with a defined display score.
    pub scored_count: usize,
    /// Mean display score.
    pub score_mean: Option<f64>,
    /// Lowest display score.
    pub score_min: Option<f64>,
    /// Highest display score.
    pub score_max: Option<f64>,
    /// Mean equity-adjusted score.
    pub equity_mean: Option<f64>,
    /// Mean of each derived index over regions where it is defined.
    pub index_means: BTreeMap<IndexKind, Option<f64>>,
}

impl ScoreSummary {
    /// Summarizes a set of breakdowns, skipping undefined values.
    #[must_use]
    pub fn from_breakdowns(breakdowns: &BTreeMap<RegionId, ScoreBreakdown>) -> Self {
        let scores: Vec<f64> = breakdowns.values().filter_map(|b| b.score).collect();
        let equity: Vec<f64> = breakdowns.values().filter_map(|b| b.equity_score).collect();

        let index_means = IndexKind::ALL
            .iter()
            .map(|&kind| {
                let values: Vec<f64> = breakdowns
                    .values()
                    .filter_map(|b| b.indices.get(&kind).copied().flatten())
                    .collect();
                (kind, mean(&values))
            })
            .collect();

        Self {
            region_count: breakdowns.len(),
            scored_count: scores.len(),
            score_mean: mean(&scores),
            score_min: scores.iter().copied().reduce(f64::min),
            score_max: scores.iter().copied().reduce(f64::max),
            equity_mean: mean(&equity),
            index_means,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
