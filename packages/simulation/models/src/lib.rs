#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Intervention actions and simulation results.
//!
//! [`InterventionAction`] is a closed set of kinds, each carrying the
//! payload its effect needs. Requests arrive as loosely-typed
//! [`ActionRequest`]s and are validated into actions before any work is
//! done. A [`SimulationResult`] is a what-if projection and is never fed
//! back into the baseline.

use std::collections::BTreeMap;

use geo::{Point, Polygon};
use healthy_city_scoring_models::{Feature, RegionId};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The closed set of intervention kinds.
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
pub enum ActionKind {
    /// New park or green space.
    AddPark,
    /// Street or area tree planting.
    AddTrees,
    /// Reflective roof surfaces.
    CoolRoof,
    /// New healthcare clinic.
    AddClinic,
    /// Electric-vehicle-only (emission reduction) zone.
    EvZone,
    /// Rain gardens, bioswales and similar.
    GreenInfrastructure,
}

impl ActionKind {
    /// Every kind, in canonical order.
    pub const ALL: [Self; 6] = [
        Self::AddPark,
        Self::AddTrees,
        Self::CoolRoof,
        Self::AddClinic,
        Self::EvZone,
        Self::GreenInfrastructure,
    ];
}

/// Geometry type an action expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeometryType {
    /// A single location.
    Point,
    /// An area footprint.
    Polygon,
}

/// Geometry of a submitted action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionGeometry {
    /// A single location.
    Point(Point<f64>),
    /// An area footprint.
    Polygon(Polygon<f64>),
}

impl ActionGeometry {
    /// The geometry's type.
    #[must_use]
    pub const fn geometry_type(&self) -> GeometryType {
        match self {
            Self::Point(_) => GeometryType::Point,
            Self::Polygon(_) => GeometryType::Polygon,
        }
    }
}

/// Payload of an action that perturbs raster-derived features over an
/// area (or at a point).
#[derive(Debug, Clone, PartialEq)]
pub struct AreaAction {
    /// Where the intervention happens.
    pub geometry: ActionGeometry,
    /// Multiplier on the recipe's deltas. `1.0` is the nominal effect.
    pub intensity: f64,
}

/// Payload of an action that adds a facility.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityAction {
    /// Facility location.
    pub location: Point<f64>,
    /// Capacity; the catalog default applies when absent.
    pub capacity: Option<f64>,
}

/// A fully specified intervention.
#[derive(Debug, Clone, PartialEq)]
pub enum InterventionAction {
    /// New park or green space.
    AddPark(AreaAction),
    /// Tree planting.
    AddTrees(AreaAction),
    /// Reflective roofs.
    CoolRoof(AreaAction),
    /// New healthcare clinic.
    AddClinic(FacilityAction),
    /// Emission reduction zone.
    EvZone(AreaAction),
    /// Green infrastructure.
    GreenInfrastructure(AreaAction),
}

impl InterventionAction {
    /// The action's kind.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::AddPark(_) => ActionKind::AddPark,
            Self::AddTrees(_) => ActionKind::AddTrees,
            Self::CoolRoof(_) => ActionKind::CoolRoof,
            Self::AddClinic(_) => ActionKind::AddClinic,
            Self::EvZone(_) => ActionKind::EvZone,
            Self::GreenInfrastructure(_) => ActionKind::GreenInfrastructure,
        }
    }

    /// The action's geometry.
    #[must_use]
    pub fn geometry(&self) -> ActionGeometry {
        match self {
            Self::AddClinic(facility) => ActionGeometry::Point(facility.location),
            Self::AddPark(area)
            | Self::AddTrees(area)
            | Self::CoolRoof(area)
            | Self::EvZone(area)
            | Self::GreenInfrastructure(area) => area.geometry.clone(),
        }
    }

    /// Builds the variant for `kind` around an area payload.
    ///
    /// Returns `None` for [`ActionKind::AddClinic`], which takes a
    /// [`FacilityAction`].
    #[must_use]
    pub fn area(kind: ActionKind, payload: AreaAction) -> Option<Self> {
        Some(match kind {
            ActionKind::AddPark => Self::AddPark(payload),
            ActionKind::AddTrees => Self::AddTrees(payload),
            ActionKind::CoolRoof => Self::CoolRoof(payload),
            ActionKind::EvZone => Self::EvZone(payload),
            ActionKind::GreenInfrastructure => Self::GreenInfrastructure(payload),
            ActionKind::AddClinic => return None,
        })
    }
}

/// Wire form of an action as submitted by a caller.
///
/// `kind` stays a string so that an unknown kind is reported as an invalid
/// action rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    /// Action kind name, e.g. `"add_park"`.
    pub kind: String,
    /// `GeoJSON` point or polygon.
    pub geometry: Option<geojson::Geometry>,
    /// Effect multiplier (defaults to `1.0`).
    #[serde(default)]
    pub intensity: Option<f64>,
    /// Facility capacity for facility actions.
    #[serde(default)]
    pub capacity: Option<f64>,
}

/// Which region a point action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PointPolicy {
    /// Only the region containing the point; none if it is outside all.
    ContainingOnly,
    /// The containing region, or else the nearest one.
    NearestRegion,
}

/// How per-region deltas are combined into the aggregate delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AggregateMode {
    /// Simple mean over affected regions.
    Mean,
    /// Mean weighted by each region's overlap weight.
    OverlapWeightedMean,
    /// Sum over affected regions.
    Sum,
}

/// Before/after scores of one affected region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionDelta {
    /// Region identifier.
    pub id: RegionId,
    /// Share of the region covered by the action, or `1.0` for point
    /// effects.
    pub weight: f64,
    /// Baseline display score.
    pub pre_score: Option<f64>,
    /// Post-intervention display score.
    pub post_score: Option<f64>,
    /// `post_score - pre_score`; undefined if either side is.
    pub delta: Option<f64>,
    /// Raw feature changes applied to this region across all actions.
    pub feature_deltas: BTreeMap<Feature, f64>,
}

/// What one action of a request did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    /// Action kind.
    pub kind: ActionKind,
    /// Regions the action touched.
    pub affected: Vec<RegionId>,
    /// Raw feature deltas at full weight and the given intensity.
    pub feature_deltas: BTreeMap<Feature, f64>,
    /// Facilities added by the action.
    pub facilities_added: usize,
}

/// What-if projection of one simulation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// Per-action records, in submission order.
    pub actions: Vec<ActionOutcome>,
    /// Every affected region, ordered by identifier.
    pub affected: Vec<RegionDelta>,
    /// Aggregate of the defined per-region deltas; `0.0` if none.
    pub aggregate_delta: f64,
    /// How `aggregate_delta` was computed.
    pub aggregate_mode: AggregateMode,
}

impl SimulationResult {
    /// Whether no region was affected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

/// Why a park placement search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// The best remaining candidate no longer pays for itself.
    NoGain,
    /// The iteration limit was reached while parks still helped.
    IterationLimit,
    /// Every candidate was placed or already covered.
    NoCandidates,
}

/// One accepted park in a placement search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkStep {
    /// Index of the chosen candidate in the submitted list.
    pub candidate: usize,
    /// Residual need the candidate covered when it was chosen.
    pub need: f64,
    /// Population mean equity score after this step.
    pub equity_mean: f64,
    /// Change in mean equity score relative to the previous step.
    pub equity_delta: f64,
    /// Fixed maintenance cost charged for the park.
    pub maintenance_penalty: f64,
    /// Cost of overlapping parks already placed.
    pub overlap_penalty: f64,
    /// `equity_delta` minus both penalties.
    pub marginal_gain: f64,
    /// Regions whose scores the park changed.
    pub affected: usize,
}

/// Outcome of a greedy park placement search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkPlan {
    /// Accepted parks, in placement order.
    pub steps: Vec<ParkStep>,
    /// Number of parks worth building; equals `steps.len()`.
    pub optimal_parks: usize,
    /// Why the search ended.
    pub stop: StopReason,
    /// Simulation of every accepted park together, if any were accepted.
    pub result: Option<SimulationResult>,
}
