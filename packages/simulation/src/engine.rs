//! The simulation engine.
//!
//! Each request moves through
//! `Received -> Validated -> GeometryIntersected -> FeaturesPerturbed ->
//! Rescored -> Reported`, or `Received -> Rejected` when validation fails.
//! Stage transitions are logged at debug level. All work happens on a copy
//! of the baseline's raw feature table (and, for facility actions, its
//! facility list); the baseline itself is only borrowed.

use std::collections::BTreeMap;

use healthy_city_raster::sampler::overlap_fraction;
use healthy_city_scoring::{Baseline, accessibility_all};
use healthy_city_scoring_models::{Facility, Feature, FeatureTable, RegionId, ScoreBreakdown};
use healthy_city_simulation_models::{
    ActionGeometry, ActionKind, ActionOutcome, ActionRequest, AggregateMode, AreaAction,
    FacilityAction, InterventionAction, PointPolicy, RegionDelta, SimulationResult,
};
use healthy_city_spatial::RegionIndex;
use rayon::prelude::*;
use strum_macros::Display;

use crate::SimulationError;
use crate::catalog::{ActionCatalog, ActionRecipe, FeatureDelta};
use crate::validate::{parse_request, validate_action};

/// Lifecycle stage of one simulation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SimulationStage {
    /// Request accepted for processing.
    Received,
    /// Every action passed validation.
    Validated,
    /// Affected regions identified.
    GeometryIntersected,
    /// Shadow feature table perturbed.
    FeaturesPerturbed,
    /// Population re-scored.
    Rescored,
    /// Result assembled.
    Reported,
    /// Request refused.
    Rejected,
}

/// Runs simulations against one baseline.
pub struct SimulationEngine<'a> {
    pub(crate) baseline: &'a Baseline,
    pub(crate) catalog: &'a ActionCatalog,
    pub(crate) index: RegionIndex,
}

/// A simulation result together with the full post-intervention scoring.
pub(crate) struct Projection {
    pub result: SimulationResult,
    /// `None` when no region was affected and the baseline scores stand.
    pub scores: Option<BTreeMap<RegionId, ScoreBreakdown>>,
}

/// Mutable working set of one request.
struct Scratch {
    raw: FeatureTable,
    facilities: Option<Vec<Facility>>,
    weights: BTreeMap<RegionId, f64>,
    applied: BTreeMap<RegionId, BTreeMap<Feature, f64>>,
}

impl<'a> SimulationEngine<'a> {
    /// Indexes the baseline's regions for simulation.
    ///
    /// # Errors
    ///
    /// Returns an error if `catalog` fails validation.
    pub fn new(baseline: &'a Baseline, catalog: &'a ActionCatalog) -> Result<Self, SimulationError> {
        catalog.validate()?;
        let index = RegionIndex::build(baseline.regions());
        Ok(Self {
            baseline,
            catalog,
            index,
        })
    }

    /// Parses, validates and simulates wire requests applied together.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidAction`] if any request is
    /// malformed; nothing is computed in that case.
    pub fn simulate(&self, requests: &[ActionRequest]) -> Result<SimulationResult, SimulationError> {
        stage(SimulationStage::Received);
        let actions = requests
            .iter()
            .map(parse_request)
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(reject)?;
        self.run(&actions)
    }

    /// Simulates typed actions applied cumulatively.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidAction`] if any action fails
    /// validation.
    pub fn simulate_actions(
        &self,
        actions: &[InterventionAction],
    ) -> Result<SimulationResult, SimulationError> {
        stage(SimulationStage::Received);
        self.run(actions)
    }

    /// Simulates independent requests in parallel, each on its own copy of
    /// the baseline inputs.
    pub fn simulate_many(
        &self,
        requests: &[Vec<ActionRequest>],
    ) -> Vec<Result<SimulationResult, SimulationError>> {
        requests.par_iter().map(|r| self.simulate(r)).collect()
    }

    fn run(&self, actions: &[InterventionAction]) -> Result<SimulationResult, SimulationError> {
        self.project(actions).map(|projection| projection.result)
    }

    pub(crate) fn project(
        &self,
        actions: &[InterventionAction],
    ) -> Result<Projection, SimulationError> {
        if actions.is_empty() {
            let err = SimulationError::invalid("request contains no actions");
            reject(&err);
            return Err(err);
        }
        for action in actions {
            validate_action(action, self.catalog).inspect_err(reject)?;
        }
        stage(SimulationStage::Validated);

        let mut scratch = Scratch {
            raw: self.baseline.raw().clone(),
            facilities: None,
            weights: BTreeMap::new(),
            applied: BTreeMap::new(),
        };

        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let hits = self.intersect(&action.geometry());
            stage(SimulationStage::GeometryIntersected);
            log::debug!("{} intersects {} regions", action.kind(), hits.len());
            let outcome = match action {
                InterventionAction::AddClinic(facility) => {
                    self.add_facility(facility, &hits, &mut scratch)
                }
                InterventionAction::AddPark(area)
                | InterventionAction::AddTrees(area)
                | InterventionAction::CoolRoof(area)
                | InterventionAction::EvZone(area)
                | InterventionAction::GreenInfrastructure(area) => {
                    self.perturb(action.kind(), area, &hits, &mut scratch)?
                }
            };
            stage(SimulationStage::FeaturesPerturbed);
            outcomes.push(outcome);
        }

        if scratch.weights.is_empty() {
            log::info!("Simulation affected no regions");
            stage(SimulationStage::Reported);
            return Ok(Projection {
                result: SimulationResult {
                    actions: outcomes,
                    affected: Vec::new(),
                    aggregate_delta: 0.0,
                    aggregate_mode: self.catalog.policy.aggregate,
                },
                scores: None,
            });
        }

        let post = self.baseline.rescore(&scratch.raw);
        stage(SimulationStage::Rescored);

        let affected: Vec<RegionDelta> = scratch
            .weights
            .into_iter()
            .map(|(id, weight)| {
                let pre_score = self.baseline.scores().get(&id).and_then(|b| b.score);
                let post_score = post.get(&id).and_then(|b| b.score);
                let delta = pre_score.zip(post_score).map(|(pre, post)| post - pre);
                let feature_deltas = scratch.applied.remove(&id).unwrap_or_default();
                RegionDelta {
                    id,
                    weight,
                    pre_score,
                    post_score,
                    delta,
                    feature_deltas,
                }
            })
            .collect();

        let aggregate_delta = aggregate(&affected, self.catalog.policy.aggregate);
        log::info!(
            "Simulated {} action(s): {} regions affected, aggregate delta {aggregate_delta:.4}",
            outcomes.len(),
            affected.len()
        );
        stage(SimulationStage::Reported);

        Ok(Projection {
            result: SimulationResult {
                actions: outcomes,
                affected,
                aggregate_delta,
                aggregate_mode: self.catalog.policy.aggregate,
            },
            scores: Some(post),
        })
    }

    /// Regions hit by `geometry` with their overlap weight.
    fn intersect(&self, geometry: &ActionGeometry) -> Vec<(usize, f64)> {
        let regions = self.baseline.regions();
        match geometry {
            ActionGeometry::Polygon(polygon) => self
                .index
                .overlapping(polygon)
                .into_iter()
                .map(|idx| (idx, overlap_fraction(&regions[idx].geometry, polygon)))
                .filter(|(_, overlap)| *overlap > 0.0)
                .collect(),
            ActionGeometry::Point(point) => {
                let hit = self.index.containing(*point).or_else(|| {
                    match self.catalog.policy.point_policy {
                        PointPolicy::NearestRegion => self.index.nearest(*point),
                        PointPolicy::ContainingOnly => None,
                    }
                });
                hit.map(|idx| vec![(idx, 1.0)]).unwrap_or_default()
            }
        }
    }

    fn recipe(&self, kind: ActionKind) -> Result<&ActionRecipe, SimulationError> {
        self.catalog
            .recipe(kind)
            .ok_or_else(|| SimulationError::invalid(format!("no recipe configured for {kind}")))
    }

    /// Applies a recipe's feature deltas to the hit regions.
    fn perturb(
        &self,
        kind: ActionKind,
        area: &AreaAction,
        hits: &[(usize, f64)],
        scratch: &mut Scratch,
    ) -> Result<ActionOutcome, SimulationError> {
        let recipe = self.recipe(kind)?;
        let config = self.baseline.config();

        let mut deltas = BTreeMap::new();
        for (&feature, &delta) in &recipe.deltas {
            let amount = match delta {
                FeatureDelta::Absolute(v) => Some(v),
                FeatureDelta::StdDevs(k) => self.baseline.std_dev(feature).map(|s| k * s),
            };
            match amount {
                Some(amount) => {
                    deltas.insert(feature, amount * area.intensity);
                }
                None => log::debug!("No baseline spread for {feature}; {kind} leaves it unchanged"),
            }
        }

        let regions = self.baseline.regions();
        let mut affected = Vec::with_capacity(hits.len());
        for &(idx, overlap) in hits {
            let id = &regions[idx].id;
            let weight = if recipe.scale_by_overlap { overlap } else { 1.0 };
            affected.push(id.clone());
            note_weight(&mut scratch.weights, id, weight);

            let Some(row) = scratch.raw.get_mut(id) else {
                continue;
            };
            for (&feature, &amount) in &deltas {
                let Some(Some(value)) = row.get_mut(&feature) else {
                    continue;
                };
                let old = *value;
                let new = config.bounds_for(feature).step(old, amount * weight);
                *value = new;
                *scratch
                    .applied
                    .entry(id.clone())
                    .or_default()
                    .entry(feature)
                    .or_insert(0.0) += new - old;
            }
        }

        Ok(ActionOutcome {
            kind,
            affected,
            feature_deltas: deltas,
            facilities_added: 0,
        })
    }

    /// Adds a facility to the working copy and recomputes healthcare access
    /// for every region.
    fn add_facility(
        &self,
        facility: &FacilityAction,
        hits: &[(usize, f64)],
        scratch: &mut Scratch,
    ) -> ActionOutcome {
        let capacity = facility
            .capacity
            .unwrap_or(self.catalog.policy.default_capacity);
        let facilities = scratch
            .facilities
            .get_or_insert_with(|| self.baseline.facilities().to_vec());
        facilities.push(Facility {
            id: Some(format!("simulated-{}", facilities.len())),
            location: facility.location,
            capacity,
        });

        let regions = self.baseline.regions();
        let access = accessibility_all(regions, facilities, &self.baseline.config().gravity);

        let mut affected: Vec<RegionId> = hits
            .iter()
            .map(|&(idx, _)| regions[idx].id.clone())
            .collect();
        for id in &affected {
            note_weight(&mut scratch.weights, id, 1.0);
        }

        for (id, new) in access {
            let Some(row) = scratch.raw.get_mut(&id) else {
                continue;
            };
            let slot = row.entry(Feature::HealthcareAccess).or_insert(None);
            let old = *slot;
            *slot = new;

            if let (Some(old), Some(new)) = (old, new)
                && old.to_bits() != new.to_bits()
            {
                *scratch
                    .applied
                    .entry(id.clone())
                    .or_default()
                    .entry(Feature::HealthcareAccess)
                    .or_insert(0.0) += new - old;
                if !affected.contains(&id) {
                    note_weight(&mut scratch.weights, &id, 1.0);
                    affected.push(id);
                }
            }
        }
        affected.sort();

        ActionOutcome {
            kind: ActionKind::AddClinic,
            affected,
            feature_deltas: BTreeMap::new(),
            facilities_added: 1,
        }
    }
}

/// Records a region's weight, keeping the largest across actions.
fn note_weight(weights: &mut BTreeMap<RegionId, f64>, id: &RegionId, weight: f64) {
    let entry = weights.entry(id.clone()).or_insert(0.0);
    *entry = entry.max(weight);
}

/// Combines the defined per-region deltas; `0.0` when none are defined.
#[allow(clippy::cast_precision_loss)]
fn aggregate(affected: &[RegionDelta], mode: AggregateMode) -> f64 {
    let defined: Vec<(f64, f64)> = affected
        .iter()
        .filter_map(|r| r.delta.map(|d| (d, r.weight)))
        .collect();
    if defined.is_empty() {
        return 0.0;
    }

    match mode {
        AggregateMode::Sum => defined.iter().map(|(d, _)| d).sum(),
        AggregateMode::Mean => defined.iter().map(|(d, _)| d).sum::<f64>() / defined.len() as f64,
        AggregateMode::OverlapWeightedMean => {
            let total: f64 = defined.iter().map(|(_, w)| w).sum();
            if total > 0.0 {
                defined.iter().map(|(d, w)| d * w).sum::<f64>() / total
            } else {
                0.0
            }
        }
    }
}

fn stage(stage: SimulationStage) {
    log::debug!("Simulation stage: {stage}");
}

fn reject(err: &SimulationError) {
    log::debug!("Simulation stage: {}", SimulationStage::Rejected);
    log::warn!("Rejected simulation request: {err}");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use geo::{MultiPolygon, Polygon, point, polygon};
    use healthy_city_scoring::ScoringConfig;
    use healthy_city_scoring_models::{FeatureValues, Region};

    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
    }

    fn row(ndvi: f64, temperature: f64, pollutant: f64, access: f64) -> FeatureValues {
        BTreeMap::from([
            (Feature::Ndvi, Some(ndvi)),
            (Feature::Temperature, Some(temperature)),
            (Feature::Pollutant, Some(pollutant)),
            (Feature::HealthcareAccess, Some(access)),
        ])
    }

    /// Five 1 km tracts in a row. The middle one sits at the ndvi mean.
    fn baseline() -> Baseline {
        let ids = ["t1", "t2", "t3", "t4", "t5"];
        let ndvi = [0.1, 0.3, 0.2, 0.1, 0.3];
        let temperature = [31.0, 29.0, 30.0, 32.0, 28.0];
        let pollutant = [12.0, 10.0, 11.0, 13.0, 9.0];

        let regions: Vec<Region> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Region::new(*id, MultiPolygon(vec![square(f64::from(i as u32) * 1_000.0, 0.0, 1_000.0)]))
            })
            .collect();

        let facilities = vec![Facility::new(point!(x: 500.0, y: 500.0), 100.0)];
        let config = ScoringConfig::embedded().unwrap();
        let access = accessibility_all(&regions, &facilities, &config.gravity);

        let raw: FeatureTable = regions
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let a = access[&r.id].unwrap();
                (r.id.clone(), row(ndvi[i], temperature[i], pollutant[i], a))
            })
            .collect();

        Baseline::new(config, Arc::from(regions), Arc::from(facilities), raw)
    }

    fn catalog() -> ActionCatalog {
        ActionCatalog::embedded().unwrap()
    }

    fn park(polygon: Polygon<f64>) -> InterventionAction {
        InterventionAction::AddPark(AreaAction {
            geometry: ActionGeometry::Polygon(polygon),
            intensity: 1.0,
        })
    }

    #[test]
    fn vegetation_over_full_footprint_raises_score() {
        let baseline = baseline();
        let mut catalog = catalog();
        let recipe = catalog.actions.get_mut(&ActionKind::AddPark).unwrap();
        recipe.deltas = BTreeMap::from([(Feature::Ndvi, FeatureDelta::Absolute(0.15))]);

        let t3 = RegionId::from("t3");
        let pre_z = baseline.scores()[&t3].z_scores[&Feature::Ndvi].unwrap();
        assert!(pre_z.abs() < 1e-9);

        let engine = SimulationEngine::new(&baseline, &catalog).unwrap();
        let result = engine
            .simulate_actions(&[park(square(2_000.0, 0.0, 1_000.0))])
            .unwrap();

        assert_eq!(result.affected.len(), 1);
        let region = &result.affected[0];
        assert_eq!(region.id, t3);
        assert!((region.weight - 1.0).abs() < 1e-9);
        assert!((region.feature_deltas[&Feature::Ndvi] - 0.15).abs() < 1e-9);
        assert!(region.delta.unwrap() > 0.0);
        assert!(result.aggregate_delta > 0.0);

        let mut shadow = baseline.raw().clone();
        shadow.get_mut(&t3).unwrap().insert(Feature::Ndvi, Some(0.35));
        let post = baseline.rescore(&shadow);
        assert!(post[&t3].z_scores[&Feature::Ndvi].unwrap() > 0.0);
        assert!(post[&t3].score.unwrap() > baseline.scores()[&t3].score.unwrap());
    }

    #[test]
    fn half_overlap_scales_the_delta() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let result = engine
            .simulate_actions(&[park(polygon![
                (x: 2_000.0, y: 0.0),
                (x: 2_500.0, y: 0.0),
                (x: 2_500.0, y: 1_000.0),
                (x: 2_000.0, y: 1_000.0),
            ])])
            .unwrap();

        let region = &result.affected[0];
        assert!((region.weight - 0.5).abs() < 1e-9);
        assert!((region.feature_deltas[&Feature::Ndvi] - 0.04).abs() < 1e-9);
        assert!(region.feature_deltas[&Feature::Temperature] < 0.0);
    }

    #[test]
    fn baseline_is_not_mutated() {
        let baseline = baseline();
        let before_raw = baseline.raw().clone();
        let before_scores = baseline.scores().clone();

        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        engine
            .simulate_actions(&[
                park(square(0.0, 0.0, 3_000.0)),
                InterventionAction::AddClinic(FacilityAction {
                    location: point!(x: 4_500.0, y: 500.0),
                    capacity: None,
                }),
            ])
            .unwrap();

        assert_eq!(baseline.raw(), &before_raw);
        assert_eq!(baseline.scores(), &before_scores);
        assert_eq!(baseline.facilities().len(), 1);
        assert_eq!(baseline.rescore(baseline.raw()), before_scores);
    }

    #[test]
    fn ndvi_is_clamped_to_its_range() {
        let baseline = baseline();
        let mut catalog = catalog();
        catalog.actions.get_mut(&ActionKind::AddPark).unwrap().deltas =
            BTreeMap::from([(Feature::Ndvi, FeatureDelta::Absolute(5.0))]);

        let engine = SimulationEngine::new(&baseline, &catalog).unwrap();
        let result = engine
            .simulate_actions(&[park(square(0.0, 0.0, 1_000.0))])
            .unwrap();
        let region = &result.affected[0];
        assert!((region.feature_deltas[&Feature::Ndvi] - 0.9).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_baseline_moves_by_the_recipe_delta() {
        let celsius = baseline();
        let mut raw = celsius.raw().clone();
        for (row, kelvin) in raw.values_mut().zip([301.0, 303.0, 305.0, 302.0, 304.0]) {
            row.insert(Feature::Temperature, Some(kelvin));
        }
        let kelvin = Baseline::new(
            celsius.config().clone(),
            Arc::from(celsius.regions().to_vec()),
            Arc::from(celsius.facilities().to_vec()),
            raw,
        );

        let actions = catalog();
        let engine = SimulationEngine::new(&kelvin, &actions).unwrap();
        let cool = InterventionAction::CoolRoof(AreaAction {
            geometry: ActionGeometry::Polygon(square(1_000.0, 0.0, 1_000.0)),
            intensity: 1.0,
        });
        let result = engine.simulate_actions(&[cool]).unwrap();

        let t2 = &result.affected[0];
        assert_eq!(t2.id.as_str(), "t2");
        assert!((t2.feature_deltas[&Feature::Temperature] + 0.8).abs() < 1e-9);
        assert!(t2.delta.unwrap() > 0.0);
    }

    #[test]
    fn no_affected_regions_is_an_empty_result() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let result = engine
            .simulate_actions(&[park(square(50_000.0, 50_000.0, 10.0))])
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.aggregate_delta.to_bits(), 0.0f64.to_bits());
        assert_eq!(result.actions.len(), 1);
    }

    #[test]
    fn neighbour_sharing_an_edge_is_not_affected() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let result = engine
            .simulate_actions(&[park(square(1_000.0, 0.0, 1_000.0))])
            .unwrap();
        let ids: Vec<&str> = result.affected.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["t2"]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let request: ActionRequest = serde_json::from_str(
            r#"{ "kind": "teleport_river", "geometry": { "type": "Point", "coordinates": [500, 500] } }"#,
        )
        .unwrap();
        assert!(matches!(
            engine.simulate(&[request]),
            Err(SimulationError::InvalidAction { .. })
        ));
    }

    #[test]
    fn empty_request_is_rejected() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        assert!(engine.simulate(&[]).is_err());
    }

    #[test]
    fn point_outside_regions_follows_policy() {
        let baseline = baseline();
        let cool = InterventionAction::CoolRoof(AreaAction {
            geometry: ActionGeometry::Point(point!(x: 5_200.0, y: 500.0)),
            intensity: 1.0,
        });

        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let result = engine.simulate_actions(std::slice::from_ref(&cool)).unwrap();
        assert!(result.is_empty());

        let mut nearest = catalog();
        nearest.policy.point_policy = PointPolicy::NearestRegion;
        let engine = SimulationEngine::new(&baseline, &nearest).unwrap();
        let result = engine.simulate_actions(&[cool]).unwrap();
        assert_eq!(result.affected.len(), 1);
        assert_eq!(result.affected[0].id.as_str(), "t5");
        assert!((result.affected[0].feature_deltas[&Feature::Temperature] + 0.8).abs() < 1e-9);
    }

    #[test]
    fn clinic_recomputes_access_for_every_region() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let result = engine
            .simulate_actions(&[InterventionAction::AddClinic(FacilityAction {
                location: point!(x: 3_500.0, y: 500.0),
                capacity: Some(500.0),
            })])
            .unwrap();

        let outcome = &result.actions[0];
        assert_eq!(outcome.facilities_added, 1);
        assert!(outcome.affected.contains(&RegionId::from("t4")));
        assert!(outcome.affected.len() > 1);

        let t4 = result.affected.iter().find(|r| r.id.as_str() == "t4").unwrap();
        assert!((t4.feature_deltas[&Feature::HealthcareAccess] - 500.0).abs() < 1e-9);
        assert!(t4.delta.unwrap() > 0.0);
    }

    #[test]
    fn multiple_actions_accumulate() {
        let baseline = baseline();
        let actions = catalog();
        let engine = SimulationEngine::new(&baseline, &actions).unwrap();
        let cool = InterventionAction::CoolRoof(AreaAction {
            geometry: ActionGeometry::Polygon(square(0.0, 0.0, 1_000.0)),
            intensity: 1.0,
        });
        let result = engine.simulate_actions(&[cool.clone(), cool]).unwrap();
        assert_eq!(result.actions.len(), 2);
        let t1 = &result.affected[0];
        assert!((t1.feature_deltas[&Feature::Temperature] + 1.6).abs() < 1e-9);
    }

    #[test]
    fn simulation_is_idempotent_and_thread_safe() {
        let baseline = baseline();
        let catalog = catalog();
        let engine = SimulationEngine::new(&baseline, &catalog).unwrap();
        let action = park(square(500.0, 0.0, 2_000.0));
        let expected = engine.simulate_actions(std::slice::from_ref(&action)).unwrap();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| engine.simulate_actions(std::slice::from_ref(&action))))
                .collect();
            for handle in handles {
                let result = handle.join().unwrap().unwrap();
                assert_eq!(result, expected);
                assert_eq!(
                    result.aggregate_delta.to_bits(),
                    expected.aggregate_delta.to_bits()
                );
            }
        });
    }

    #[test]
    fn simulate_many_keeps_requests_independent() {
        let baseline = baseline();
        let catalog = catalog();
        let engine = SimulationEngine::new(&baseline, &catalog).unwrap();
        let park: ActionRequest = serde_json::from_str(
            r#"{ "kind": "add_park", "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1000,0],[1000,1000],[0,1000],[0,0]]] } }"#,
        )
        .unwrap();
        let bogus: ActionRequest = serde_json::from_str(r#"{ "kind": "nope" }"#).unwrap();

        let results = engine.simulate_many(&[vec![park.clone()], vec![bogus], vec![park]]);
        assert!(results[1].is_err());
        assert_eq!(results[0].as_ref().unwrap(), results[2].as_ref().unwrap());
    }

    #[test]
    fn aggregate_modes() {
        let delta = |d: f64, w: f64| RegionDelta {
            id: RegionId::from("x"),
            weight: w,
            pre_score: Some(50.0),
            post_score: Some(50.0 + d),
            delta: Some(d),
            feature_deltas: BTreeMap::new(),
        };
        let rows = [delta(2.0, 1.0), delta(4.0, 0.5)];
        assert!((aggregate(&rows, AggregateMode::Sum) - 6.0).abs() < 1e-12);
        assert!((aggregate(&rows, AggregateMode::Mean) - 3.0).abs() < 1e-12);
        let weighted = 4.0f64.mul_add(0.5, 2.0) / 1.5;
        assert!((aggregate(&rows, AggregateMode::OverlapWeightedMean) - weighted).abs() < 1e-12);
        assert_eq!(aggregate(&[], AggregateMode::Mean).to_bits(), 0.0f64.to_bits());
    }
}
