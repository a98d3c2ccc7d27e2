//! Loading command inputs from disk.

use std::collections::BTreeMap;
use std::path::Path;

use geo::Point;
use healthy_city_raster::{RasterField, RasterSummary};
use healthy_city_raster::ascii::read_ascii_grid;
use healthy_city_scoring::{Baseline, ScoringConfig, ScoringError, ScoringSession};
use healthy_city_scoring_models::{
    Facility, Feature, Region, RegionId, ScoreBreakdown, ScoreSummary,
};
use healthy_city_simulation::SimulationError;
use healthy_city_simulation_models::{ActionRequest, SimulationResult};
use healthy_city_spatial::regions_from_geojson;
use serde::{Deserialize, Serialize};

/// Everything needed to build a scoring session.
pub struct Inputs {
    config: ScoringConfig,
    regions: Vec<Region>,
    rasters: Vec<(Feature, RasterField)>,
    facilities: Vec<Facility>,
}

impl Inputs {
    pub fn load(
        config: ScoringConfig,
        regions: &Path,
        ndvi: Option<&Path>,
        temperature: Option<&Path>,
        pollutant: Option<&Path>,
        facilities: Option<&Path>,
        crs: &str,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(regions)?;
        let regions = regions_from_geojson(&text)?;
        log::info!("Loaded {} region(s)", regions.len());

        let mut rasters = Vec::new();
        for (feature, path) in [
            (Feature::Ndvi, ndvi),
            (Feature::Temperature, temperature),
            (Feature::Pollutant, pollutant),
        ] {
            if let Some(path) = path {
                let field = read_ascii_grid(path, crs)?;
                log::info!(
                    "Loaded {feature} raster {}x{} from {}",
                    field.width(),
                    field.height(),
                    path.display()
                );
                rasters.push((feature, field));
            }
        }

        let facilities = match facilities {
            Some(path) => read_facilities(path)?,
            None => {
                log::warn!("No facilities given; healthcare access will be zero everywhere");
                Vec::new()
            }
        };

        Ok(Self {
            config,
            regions,
            rasters,
            facilities,
        })
    }

    pub fn into_session(self) -> Result<ScoringSession, Box<dyn std::error::Error>> {
        let mut session = ScoringSession::new(self.config)?;
        session.set_regions(self.regions)?;
        for (feature, field) in self.rasters {
            session.set_field(feature, field)?;
        }
        session.set_facilities(self.facilities)?;
        Ok(session)
    }
}

#[derive(Deserialize)]
struct FacilityRow {
    #[serde(default)]
    id: Option<String>,
    x: f64,
    y: f64,
    capacity: f64,
}

fn read_facilities(path: &Path) -> Result<Vec<Facility>, Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut facilities = Vec::new();
    for row in reader.deserialize() {
        let row: FacilityRow = row?;
        let mut facility = Facility::new(Point::new(row.x, row.y), row.capacity);
        facility.id = row.id.filter(|id| !id.is_empty());
        facilities.push(facility);
    }
    log::info!("Loaded {} facilit(ies) from {}", facilities.len(), path.display());
    Ok(facilities)
}

/// Contents of a `--request` file.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RequestFile {
    /// Actions applied together.
    Single(Vec<ActionRequest>),
    /// Independent requests, each against the same baseline.
    Batch(Vec<Vec<ActionRequest>>),
}

impl RequestFile {
    pub fn read(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Result of one request in a batch: either the projection or the reason
/// it was rejected.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SimulationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<SimulationResult, SimulationError>> for BatchOutcome {
    fn from(outcome: Result<SimulationResult, SimulationError>) -> Self {
        match outcome {
            Ok(result) => Self {
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Field-wide statistics of one input raster.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RasterReport {
    count: usize,
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
}

impl From<RasterSummary> for RasterReport {
    fn from(summary: RasterSummary) -> Self {
        Self {
            count: summary.count,
            mean: summary.mean,
            std_dev: summary.std_dev,
            min: summary.min,
            max: summary.max,
        }
    }
}

/// Summaries of every raster attached to `session`.
///
/// Features without a raster are left out; a raster with no valid cell
/// maps to `None`.
pub fn raster_reports(
    session: &mut ScoringSession,
) -> Result<BTreeMap<Feature, Option<RasterReport>>, Box<dyn std::error::Error>> {
    let mut reports = BTreeMap::new();
    for feature in Feature::RASTER {
        match session.raster_summary(feature) {
            Ok(summary) => {
                reports.insert(feature, summary.map(RasterReport::from));
            }
            Err(ScoringError::MissingField(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(reports)
}

/// JSON form of a scored baseline.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineReport<'a> {
    summary: &'a ScoreSummary,
    rasters: BTreeMap<Feature, Option<RasterReport>>,
    regions: &'a BTreeMap<RegionId, ScoreBreakdown>,
}

impl<'a> BaselineReport<'a> {
    pub const fn new(
        baseline: &'a Baseline,
        rasters: BTreeMap<Feature, Option<RasterReport>>,
    ) -> Self {
        Self {
            summary: baseline.summary(),
            rasters,
            regions: baseline.scores(),
        }
    }
}
