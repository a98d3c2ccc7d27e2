#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for the healthy city toolchain.
//!
//! ```text
//! healthy_city score --regions tracts.geojson --ndvi ndvi.asc \
//!     --temperature lst.asc --pollutant no2.asc --facilities clinics.csv
//! healthy_city simulate <same inputs> --request actions.json
//! healthy_city optimize <same inputs> --candidates sites.geojson
//! healthy_city actions
//! ```
//!
//! Results are written as JSON to stdout, or to `--output` when given.
//! Log lines go through [`healthy_city_cli_utils::init_logger`] so they
//! never tear the progress bars.

mod inputs;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use healthy_city_cli_utils::IndicatifProgress;
use healthy_city_scoring::ScoringConfig;
use healthy_city_simulation::{ActionCatalog, SimulationEngine};
use healthy_city_spatial::polygons_from_geojson;
use serde::Serialize;

use crate::inputs::{BaselineReport, BatchOutcome, Inputs, RequestFile};

#[derive(Parser)]
#[command(
    name = "healthy_city",
    about = "Score regions for environmental health and simulate interventions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every region and print the baseline
    Score {
        #[command(flatten)]
        inputs: InputArgs,
        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Apply intervention requests to the baseline and print the projection
    Simulate {
        #[command(flatten)]
        inputs: InputArgs,
        /// JSON file holding one request (an array of actions) or a batch
        /// (an array of such arrays)
        #[arg(long)]
        request: PathBuf,
        /// Action catalog TOML (defaults to the built-in catalog)
        #[arg(long)]
        actions: Option<PathBuf>,
        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Choose parks greedily from candidate sites until another park no
    /// longer pays for itself
    Optimize {
        #[command(flatten)]
        inputs: InputArgs,
        /// Candidate park footprints as a `GeoJSON` `FeatureCollection`
        #[arg(long)]
        candidates: PathBuf,
        /// Most parks to place
        #[arg(long, default_value_t = 12)]
        max_iterations: usize,
        /// Action catalog TOML (defaults to the built-in catalog)
        #[arg(long)]
        actions: Option<PathBuf>,
        /// Write JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the configured intervention actions
    Actions {
        /// Action catalog TOML (defaults to the built-in catalog)
        #[arg(long)]
        actions: Option<PathBuf>,
    },
}

/// Inputs shared by every command that builds a baseline.
#[derive(Args)]
struct InputArgs {
    /// Region boundaries as a `GeoJSON` `FeatureCollection`
    #[arg(long)]
    regions: PathBuf,
    /// Vegetation index raster (ESRI ASCII grid)
    #[arg(long)]
    ndvi: Option<PathBuf>,
    /// Land surface temperature raster (ESRI ASCII grid)
    #[arg(long)]
    temperature: Option<PathBuf>,
    /// Pollutant concentration raster (ESRI ASCII grid)
    #[arg(long)]
    pollutant: Option<PathBuf>,
    /// Healthcare facilities CSV with `x`, `y`, `capacity` and optional `id`
    #[arg(long)]
    facilities: Option<PathBuf>,
    /// Coordinate reference system shared by all inputs
    #[arg(long, default_value = "EPSG:3857")]
    crs: String,
    /// Scoring configuration TOML (defaults to the built-in configuration)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl InputArgs {
    fn load(&self) -> Result<Inputs, Box<dyn std::error::Error>> {
        let config = match &self.config {
            Some(path) => ScoringConfig::from_path(path)?,
            None => ScoringConfig::embedded()?,
        };
        Inputs::load(
            config,
            &self.regions,
            self.ndvi.as_deref(),
            self.temperature.as_deref(),
            self.pollutant.as_deref(),
            self.facilities.as_deref(),
            &self.crs,
        )
    }
}

fn load_catalog(path: Option<&Path>) -> Result<ActionCatalog, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => ActionCatalog::from_path(path)?,
        None => ActionCatalog::embedded()?,
    })
}

fn write_json<T: Serialize>(
    value: &T,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = healthy_city_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Score { inputs, output } => {
            let mut session = inputs.load()?.into_session()?;
            let progress = IndicatifProgress::regions_bar(&multi, "Scoring regions");
            let rasters = inputs::raster_reports(&mut session)?;
            let baseline = session.score_baseline(progress.as_ref())?;
            write_json(&BaselineReport::new(&baseline, rasters), output.as_deref())?;
        }
        Commands::Simulate {
            inputs,
            request,
            actions,
            output,
        } => {
            let catalog = load_catalog(actions.as_deref())?;
            let requests = RequestFile::read(&request)?;
            let mut session = inputs.load()?.into_session()?;
            let progress = IndicatifProgress::regions_bar(&multi, "Scoring baseline");
            let baseline = session.score_baseline(progress.as_ref())?;
            let engine = SimulationEngine::new(&baseline, &catalog)?;

            match requests {
                RequestFile::Single(actions) => {
                    let result = engine.simulate(&actions)?;
                    log::info!(
                        "{} region(s) affected, aggregate delta {:.3}",
                        result.affected.len(),
                        result.aggregate_delta
                    );
                    write_json(&result, output.as_deref())?;
                }
                RequestFile::Batch(batch) => {
                    let outcomes: Vec<BatchOutcome> = engine
                        .simulate_many(&batch)
                        .into_iter()
                        .map(BatchOutcome::from)
                        .collect();
                    let rejected = outcomes.iter().filter(|o| o.error.is_some()).count();
                    log::info!(
                        "Simulated {} independent request(s), {rejected} rejected",
                        outcomes.len()
                    );
                    write_json(&outcomes, output.as_deref())?;
                }
            }
        }
        Commands::Optimize {
            inputs,
            candidates,
            max_iterations,
            actions,
            output,
        } => {
            let catalog = load_catalog(actions.as_deref())?;
            let candidates = polygons_from_geojson(&std::fs::read_to_string(&candidates)?)?;
            let mut session = inputs.load()?.into_session()?;
            let progress = IndicatifProgress::regions_bar(&multi, "Scoring baseline");
            let baseline = session.score_baseline(progress.as_ref())?;
            let engine = SimulationEngine::new(&baseline, &catalog)?;

            let plan = engine.optimize_parks(&candidates, max_iterations)?;
            log::info!(
                "{} of {} candidate park(s) worth building ({})",
                plan.optimal_parks,
                candidates.len(),
                plan.stop
            );
            write_json(&plan, output.as_deref())?;
        }
        Commands::Actions { actions } => {
            let catalog = load_catalog(actions.as_deref())?;
            for info in catalog.describe() {
                println!("{:<22} {:<8} {}", info.kind, info.geometry, info.description);
            }
        }
    }

    Ok(())
}
