//! Scoring session and the immutable baseline it produces.
//!
//! A [`ScoringSession`] owns the loaded regions, rasters and facilities for
//! one scoring context together with its [`SamplingCache`]. Replacing any
//! input bumps a generation counter so cached samples computed from the
//! old input are never reused. [`ScoringSession::score_baseline`] freezes
//! the current state into a [`Baseline`] that can be shared read-only
//! across concurrent simulations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use healthy_city_raster::progress::ProgressCallback;
use healthy_city_raster::{RasterField, RasterSummary, sample_all};
use healthy_city_scoring_models::{
    Facility, Feature, FeatureTable, Region, RegionId, ScoreBreakdown, ScoreSummary,
};

use crate::ScoringError;
use crate::cache::{SamplingCache, Stamp};
use crate::composite::{CompositeScorer, FeatureStats, feature_stats};
use crate::config::ScoringConfig;
use crate::gravity::{AccessProfile, accessibility_all};

/// Owns the inputs of one scoring context.
#[derive(Debug)]
pub struct ScoringSession {
    config: ScoringConfig,
    regions: Arc<[Region]>,
    region_generation: u64,
    rasters: BTreeMap<Feature, (u64, Arc<RasterField>)>,
    next_raster_generation: u64,
    facilities: Arc<[Facility]>,
    cache: SamplingCache,
}

impl ScoringSession {
    /// Creates an empty session.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringError> {
        config.validate()?;
        Ok(Self {
            config,
            regions: Arc::from(Vec::new()),
            region_generation: 0,
            rasters: BTreeMap::new(),
            next_raster_generation: 1,
            facilities: Arc::from(Vec::new()),
            cache: SamplingCache::new(),
        })
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// The current region set.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The session's sampling cache.
    #[must_use]
    pub const fn cache(&self) -> &SamplingCache {
        &self.cache
    }

    /// Replaces the region set.
    ///
    /// # Errors
    ///
    /// Returns an error if two regions share an identifier, a
    /// vulnerability factor is outside `[0, 1]`, or a population is negative
    /// or not finite.
    pub fn set_regions(&mut self, regions: Vec<Region>) -> Result<(), ScoringError> {
        let mut seen = BTreeSet::new();
        for region in &regions {
            if !seen.insert(&region.id) {
                return Err(ScoringError::InvalidRegion {
                    id: region.id.clone(),
                    message: "duplicate region identifier".to_string(),
                });
            }
            if let Some(v) = region.vulnerability
                && !(0.0..=1.0).contains(&v)
            {
                return Err(ScoringError::InvalidRegion {
                    id: region.id.clone(),
                    message: format!("vulnerability {v} is outside [0, 1]"),
                });
            }
            if let Some(p) = region.population
                && !(p.is_finite() && p >= 0.0)
            {
                return Err(ScoringError::InvalidRegion {
                    id: region.id.clone(),
                    message: format!("population {p} must be finite and non-negative"),
                });
            }
        }

        log::info!("Loaded {} regions", regions.len());
        self.regions = Arc::from(regions);
        self.region_generation += 1;
        self.cache.invalidate_regions();
        Ok(())
    }

    /// Attaches (or replaces) the raster for a raster-derived feature.
    ///
    /// # Errors
    ///
    /// Returns an error if `feature` is not raster-derived or the field's
    /// coordinate reference differs from rasters already attached.
    pub fn set_field(&mut self, feature: Feature, field: RasterField) -> Result<(), ScoringError> {
        if !feature.is_raster() {
            return Err(ScoringError::NotARasterFeature(feature));
        }
        let conflicting = self
            .rasters
            .iter()
            .find(|(other, (_, f))| **other != feature && f.crs() != field.crs());
        if let Some((_, (_, existing))) = conflicting {
            return Err(ScoringError::CrsMismatch {
                expected: existing.crs().to_string(),
                actual: field.crs().to_string(),
            });
        }

        let generation = self.next_raster_generation;
        self.next_raster_generation += 1;
        log::info!(
            "Attached {}x{} {feature} raster (generation {generation})",
            field.width(),
            field.height()
        );
        self.rasters.insert(feature, (generation, Arc::new(field)));
        self.cache.invalidate_feature(feature);
        Ok(())
    }

    /// Replaces the facility set.
    ///
    /// # Errors
    ///
    /// Returns an error if a facility has a non-positive capacity or a
    /// non-finite location.
    pub fn set_facilities(&mut self, facilities: Vec<Facility>) -> Result<(), ScoringError> {
        for (index, facility) in facilities.iter().enumerate() {
            validate_facility(index, facility)?;
        }
        log::info!("Loaded {} facilities", facilities.len());
        self.facilities = Arc::from(facilities);
        Ok(())
    }

    /// Field-wide summary of a feature's raster, cached per raster
    /// generation.
    ///
    /// # Errors
    ///
    /// Returns an error if no raster is attached for `feature`.
    pub fn raster_summary(&mut self, feature: Feature) -> Result<Option<RasterSummary>, ScoringError> {
        let (stamp, field) = self.field(feature)?;
        if let Some(summary) = self.cache.summary(feature, stamp) {
            return Ok(summary);
        }
        let summary = RasterSummary::of(&field);
        self.cache.store_summary(feature, stamp, summary);
        Ok(summary)
    }

    /// Samples one raster feature over every region, reusing the cached
    /// column when neither the raster nor the regions changed.
    ///
    /// # Errors
    ///
    /// Returns an error if no raster is attached for `feature`.
    pub fn sample_feature(
        &mut self,
        feature: Feature,
        progress: &dyn ProgressCallback,
    ) -> Result<BTreeMap<RegionId, Option<f64>>, ScoringError> {
        let (stamp, field) = self.field(feature)?;
        if let Some(column) = self.cache.column(feature, stamp) {
            log::debug!("Reusing cached {feature} samples");
            return Ok(column.clone());
        }

        progress.set_message(format!("Sampling {feature}"));
        let polygons: Vec<(RegionId, &geo::MultiPolygon<f64>)> = self
            .regions
            .iter()
            .map(|r| (r.id.clone(), &r.geometry))
            .collect();
        let column = sample_all(&field, &polygons, progress);
        self.cache.store_column(feature, stamp, column.clone());
        Ok(column)
    }

    /// Scores the current inputs and freezes them into a [`Baseline`].
    ///
    /// Every raster feature referenced by a derived index must have a
    /// raster attached. Unreferenced raster features are left undefined.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::MissingField`] if a referenced raster is
    /// absent.
    pub fn score_baseline(
        &mut self,
        progress: &dyn ProgressCallback,
    ) -> Result<Baseline, ScoringError> {
        let required: Vec<Feature> = Feature::RASTER
            .into_iter()
            .filter(|f| self.config.indices.values().any(|c| c.contains_key(f)))
            .collect();

        let mut raw: FeatureTable = self
            .regions
            .iter()
            .map(|r| (r.id.clone(), BTreeMap::new()))
            .collect();

        for feature in Feature::RASTER {
            let column = if required.contains(&feature) || self.rasters.contains_key(&feature) {
                self.sample_feature(feature, progress)?
            } else {
                BTreeMap::new()
            };
            for (id, row) in &mut raw {
                row.insert(feature, column.get(id).copied().flatten());
            }
        }

        progress.set_message("Computing healthcare access".to_string());
        let access = accessibility_all(&self.regions, &self.facilities, &self.config.gravity);
        for (id, row) in &mut raw {
            row.insert(Feature::HealthcareAccess, access.get(id).copied().flatten());
        }

        let baseline = Baseline::new(
            self.config.clone(),
            Arc::clone(&self.regions),
            Arc::clone(&self.facilities),
            raw,
        );
        progress.finish(format!(
            "Scored {} of {} regions",
            baseline.summary().scored_count,
            baseline.summary().region_count
        ));
        Ok(baseline)
    }

    fn field(&self, feature: Feature) -> Result<(Stamp, Arc<RasterField>), ScoringError> {
        let (generation, field) = self
            .rasters
            .get(&feature)
            .ok_or(ScoringError::MissingField(feature))?;
        let stamp = Stamp {
            raster: *generation,
            regions: self.region_generation,
        };
        Ok((stamp, Arc::clone(field)))
    }
}

/// Checks a facility can take part in the gravity model.
///
/// # Errors
///
/// Returns [`ScoringError::InvalidFacility`] describing the first problem.
pub fn validate_facility(index: usize, facility: &Facility) -> Result<(), ScoringError> {
    if !(facility.capacity.is_finite() && facility.capacity > 0.0) {
        return Err(ScoringError::InvalidFacility {
            index,
            message: format!("capacity {} must be positive", facility.capacity),
        });
    }
    if !(facility.location.x().is_finite() && facility.location.y().is_finite()) {
        return Err(ScoringError::InvalidFacility {
            index,
            message: "location is not finite".to_string(),
        });
    }
    Ok(())
}

/// Frozen result of a baseline scoring pass.
///
/// Immutable once built: simulations read it through shared references
/// and perturb their own copies of [`Baseline::raw`] and
/// [`Baseline::facilities`].
#[derive(Debug, Clone)]
pub struct Baseline {
    config: ScoringConfig,
    regions: Arc<[Region]>,
    facilities: Arc<[Facility]>,
    raw: FeatureTable,
    stats: FeatureStats,
    vulnerability: BTreeMap<RegionId, f64>,
    scores: BTreeMap<RegionId, ScoreBreakdown>,
    summary: ScoreSummary,
}

impl Baseline {
    /// Scores `raw` and freezes it with its inputs.
    #[must_use]
    pub fn new(
        config: ScoringConfig,
        regions: Arc<[Region]>,
        facilities: Arc<[Facility]>,
        raw: FeatureTable,
    ) -> Self {
        let vulnerability = regions
            .iter()
            .filter_map(|r| r.vulnerability.map(|v| (r.id.clone(), v)))
            .collect();
        let stats = feature_stats(&raw);
        let scores = CompositeScorer::new(&config).score_with_equity(&raw, &vulnerability);
        let summary = ScoreSummary::from_breakdowns(&scores);
        log::info!(
            "Baseline scored {} of {} regions (mean score {:?})",
            summary.scored_count,
            summary.region_count,
            summary.score_mean
        );

        Self {
            config,
            regions,
            facilities,
            raw,
            stats,
            vulnerability,
            scores,
            summary,
        }
    }

    /// Re-scores a (perturbed) copy of the raw feature table against the
    /// full population it describes.
    #[must_use]
    pub fn rescore(&self, raw: &FeatureTable) -> BTreeMap<RegionId, ScoreBreakdown> {
        CompositeScorer::new(&self.config).score_with_equity(raw, &self.vulnerability)
    }

    /// Configuration the baseline was scored with.
    #[must_use]
    pub const fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Scored regions.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Facilities used for healthcare access.
    #[must_use]
    pub fn facilities(&self) -> &[Facility] {
        &self.facilities
    }

    /// Raw per-region feature values.
    #[must_use]
    pub const fn raw(&self) -> &FeatureTable {
        &self.raw
    }

    /// Population statistics of each feature.
    #[must_use]
    pub const fn stats(&self) -> &FeatureStats {
        &self.stats
    }

    /// Per-region score breakdowns.
    #[must_use]
    pub const fn scores(&self) -> &BTreeMap<RegionId, ScoreBreakdown> {
        &self.scores
    }

    /// Population summary.
    #[must_use]
    pub const fn summary(&self) -> &ScoreSummary {
        &self.summary
    }

    /// Population standard deviation of `feature`, if defined and
    /// non-degenerate.
    #[must_use]
    pub fn std_dev(&self, feature: Feature) -> Option<f64> {
        self.stats
            .get(&feature)
            .copied()
            .flatten()
            .filter(|s| !s.degenerate)
            .map(|s| s.std_dev)
    }

    /// Facility access profile at a region's centroid.
    #[must_use]
    pub fn access_profile(&self, id: &RegionId) -> Option<AccessProfile> {
        let region = self.regions.iter().find(|r| &r.id == id)?;
        let centroid = region.centroid()?;
        Some(AccessProfile::at(
            centroid,
            &self.facilities,
            &self.config.gravity,
        ))
    }
}

#[cfg(test)]
mod tests {
    use geo::{Coord, MultiPolygon, point, polygon};
    use healthy_city_raster::GridSpec;
    use healthy_city_raster::progress::NullProgress;
    use healthy_city_scoring_models::IndexKind;

    use super::*;

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]])
    }

    fn grid(values: Vec<f64>) -> RasterField {
        RasterField::new(
            GridSpec {
                width: 3,
                height: 1,
                origin: Coord { x: 0.0, y: 100.0 },
                cell_width: 100.0,
                cell_height: 100.0,
                crs: "EPSG:32616".to_string(),
                no_data: Some(-9999.0),
            },
            values,
        )
        .unwrap()
    }

    fn session() -> ScoringSession {
        let mut session = ScoringSession::new(ScoringConfig::embedded().unwrap()).unwrap();
        session
            .set_regions(vec![
                Region::new("a", square(0.0, 0.0, 100.0)),
                Region::new("b", square(100.0, 0.0, 100.0)).with_vulnerability(0.5),
                Region::new("c", square(200.0, 0.0, 100.0)),
            ])
            .unwrap();
        session.set_field(Feature::Ndvi, grid(vec![0.2, 0.2, 0.2])).unwrap();
        session
            .set_field(Feature::Temperature, grid(vec![30.0, 32.0, 34.0]))
            .unwrap();
        session
            .set_field(Feature::Pollutant, grid(vec![10.0, 12.0, -9999.0]))
            .unwrap();
        session
            .set_facilities(vec![Facility::new(point!(x: 150.0, y: 50.0), 100.0)])
            .unwrap();
        session
    }

    #[test]
    fn baseline_samples_every_feature() {
        let baseline = session().score_baseline(&NullProgress).unwrap();
        let b = &baseline.raw()[&RegionId::from("b")];
        assert!((b[&Feature::Temperature].unwrap() - 32.0).abs() < 1e-9);
        assert!(b[&Feature::HealthcareAccess].unwrap() > 0.0);

        let c = &baseline.scores()[&RegionId::from("c")];
        assert_eq!(c.raw[&Feature::Pollutant], None);
        assert_eq!(c.score, None);

        let b = &baseline.scores()[&RegionId::from("b")];
        assert_eq!(b.indices[&IndexKind::Heat], Some(0.0));
        assert_eq!(baseline.summary().region_count, 3);
        assert_eq!(baseline.summary().scored_count, 2);
    }

    #[test]
    fn missing_required_raster_is_an_error() {
        let mut session = ScoringSession::new(ScoringConfig::embedded().unwrap()).unwrap();
        session
            .set_regions(vec![Region::new("a", square(0.0, 0.0, 100.0))])
            .unwrap();
        assert!(matches!(
            session.score_baseline(&NullProgress),
            Err(ScoringError::MissingField(Feature::Ndvi))
        ));
    }

    #[test]
    fn computed_feature_cannot_take_a_raster() {
        let mut session = session();
        assert!(matches!(
            session.set_field(Feature::HealthcareAccess, grid(vec![1.0; 3])),
            Err(ScoringError::NotARasterFeature(Feature::HealthcareAccess))
        ));
    }

    #[test]
    fn crs_mismatch_is_rejected() {
        let mut session = session();
        let mut field = grid(vec![1.0; 3]).spec().clone();
        field.crs = "EPSG:4326".to_string();
        let other = RasterField::new(field, vec![1.0; 3]).unwrap();
        assert!(matches!(
            session.set_field(Feature::Ndvi, other),
            Err(ScoringError::CrsMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_regions_are_rejected() {
        let mut session = session();
        let result = session.set_regions(vec![
            Region::new("a", square(0.0, 0.0, 1.0)),
            Region::new("a", square(1.0, 0.0, 1.0)),
        ]);
        assert!(matches!(result, Err(ScoringError::InvalidRegion { .. })));
    }

    #[test]
    fn negative_population_is_rejected() {
        let mut session = session();
        let result = session.set_regions(vec![
            Region::new("a", square(0.0, 0.0, 1.0)).with_population(-3.0),
        ]);
        assert!(matches!(result, Err(ScoringError::InvalidRegion { .. })));
    }

    #[test]
    fn non_positive_capacity_is_rejected() {
        let mut session = session();
        let result = session.set_facilities(vec![Facility::new(point!(x: 0.0, y: 0.0), 0.0)]);
        assert!(matches!(
            result,
            Err(ScoringError::InvalidFacility { index: 0, .. })
        ));
    }

    #[test]
    fn cache_reuses_samples_until_inputs_change() {
        let mut session = session();
        session.score_baseline(&NullProgress).unwrap();
        let misses = session.cache().misses();

        session.score_baseline(&NullProgress).unwrap();
        assert_eq!(session.cache().misses(), misses);

        session
            .set_field(Feature::Temperature, grid(vec![40.0, 40.0, 40.0]))
            .unwrap();
        let baseline = session.score_baseline(&NullProgress).unwrap();
        assert_eq!(session.cache().misses(), misses + 1);
        let a = &baseline.raw()[&RegionId::from("a")];
        assert!((a[&Feature::Temperature].unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn replacing_regions_invalidates_columns() {
        let mut session = session();
        session.score_baseline(&NullProgress).unwrap();
        session
            .set_regions(vec![Region::new("z", square(0.0, 0.0, 300.0))])
            .unwrap();
        let baseline = session.score_baseline(&NullProgress).unwrap();
        let z = &baseline.raw()[&RegionId::from("z")];
        assert!((z[&Feature::Temperature].unwrap() - 32.0).abs() < 1e-9);
        assert!(!baseline.raw().contains_key(&RegionId::from("a")));
    }

    #[test]
    fn raster_summary_is_cached_per_generation() {
        let mut session = session();
        let first = session.raster_summary(Feature::Temperature).unwrap().unwrap();
        assert!((first.mean - 32.0).abs() < 1e-9);
        let hits = session.cache().hits();
        session.raster_summary(Feature::Temperature).unwrap();
        assert_eq!(session.cache().hits(), hits + 1);
    }

    #[test]
    fn rescoring_is_bit_identical() {
        let baseline = session().score_baseline(&NullProgress).unwrap();
        let again = baseline.rescore(baseline.raw());
        for (id, breakdown) in baseline.scores() {
            assert_eq!(
                breakdown.score.map(f64::to_bits),
                again[id].score.map(f64::to_bits)
            );
        }
    }

    #[test]
    fn equity_score_uses_region_vulnerability() {
        let baseline = session().score_baseline(&NullProgress).unwrap();
        let b = &baseline.scores()[&RegionId::from("b")];
        let expected = b.score.unwrap() * 0.8;
        assert!((b.equity_score.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn access_profile_at_centroid() {
        let baseline = session().score_baseline(&NullProgress).unwrap();
        let profile = baseline.access_profile(&RegionId::from("b")).unwrap();
        assert_eq!(profile.nearest_distance, Some(0.0));
        assert!((profile.accessibility - 100.0).abs() < 1e-9);
    }
}
