//! Greedy park placement.
//!
//! Each iteration ranks the candidate footprints not yet chosen by the
//! residual need they cover, simulates the most needy of them on top of the
//! parks already accepted, and keeps the one with the best marginal gain.
//! The search ends when the best gain is no longer positive, when no
//! candidate adds new ground, or at the iteration limit.
//!
//! Because scores are standardized over the whole population, the plain
//! mean score barely moves when one region improves. Equity is therefore
//! measured as the need-weighted mean equity score, where a region's need
//! is its population scaled up by its vulnerability.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, MultiPolygon, Polygon};
use healthy_city_raster::sampler::overlap_fraction;
use healthy_city_scoring_models::{RegionId, ScoreBreakdown};
use healthy_city_simulation_models::{
    ActionGeometry, AreaAction, InterventionAction, ParkPlan, ParkStep, StopReason,
};
use rayon::prelude::*;

use crate::SimulationError;
use crate::engine::SimulationEngine;
use crate::validate::validate_action;

/// Share above which a candidate adds no new ground.
const FULLY_COVERED: f64 = 1.0 - 1e-9;

/// A candidate simulated on top of the current plan.
struct Trial {
    candidate: usize,
    need: f64,
    affected: usize,
    equity_mean: f64,
    overlap: f64,
}

impl SimulationEngine<'_> {
    /// Places parks from `candidates` one at a time for as long as another
    /// park raises the need-weighted equity score by more than it costs.
    ///
    /// At most `max_iterations` parks are placed. The catalog's optimizer
    /// settings bound how many candidates are simulated per iteration and
    /// price maintenance and overlap with parks already chosen.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidAction`] if a candidate is not a
    /// usable park footprint; nothing is simulated in that case.
    pub fn optimize_parks(
        &self,
        candidates: &[Polygon<f64>],
        max_iterations: usize,
    ) -> Result<ParkPlan, SimulationError> {
        let parks: Vec<InterventionAction> = candidates.iter().cloned().map(park).collect();
        for (i, action) in parks.iter().enumerate() {
            validate_action(action, self.catalog).map_err(|err| match err {
                SimulationError::InvalidAction { reason } => {
                    SimulationError::invalid(format!("candidate {i}: {reason}"))
                }
                other => other,
            })?;
        }

        let Some(mut current) = self.weighted_equity(self.baseline.scores()) else {
            log::warn!("No region has a defined equity score and a positive need; placing no parks");
            return Ok(ParkPlan {
                steps: Vec::new(),
                optimal_parks: 0,
                stop: StopReason::NoGain,
                result: None,
            });
        };

        let settings = self.catalog.optimizer;
        let regions = self.baseline.regions();
        let mut covered = vec![0.0; regions.len()];
        let mut footprint = MultiPolygon::<f64>::new(Vec::new());
        let mut chosen: Vec<usize> = Vec::new();
        let mut placed: Vec<InterventionAction> = Vec::new();
        let mut steps = Vec::new();
        let mut stop = StopReason::IterationLimit;

        for iteration in 0..max_iterations {
            let mut ranked: Vec<(usize, f64, usize)> = (0..candidates.len())
                .filter(|i| !chosen.contains(i))
                .map(|i| {
                    let (need, affected) = self.residual_need(&candidates[i], &covered);
                    (i, need, affected)
                })
                .collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            ranked.truncate(settings.candidate_count);

            let trials = ranked
                .par_iter()
                .filter_map(|&(candidate, need, affected)| {
                    let overlap = covered_share(&candidates[candidate], &footprint);
                    if overlap >= FULLY_COVERED {
                        return None;
                    }
                    let mut actions = placed.clone();
                    actions.push(parks[candidate].clone());
                    Some(self.project(&actions).map(|projection| Trial {
                        candidate,
                        need,
                        affected,
                        equity_mean: projection
                            .scores
                            .as_ref()
                            .and_then(|scores| self.weighted_equity(scores))
                            .unwrap_or(current),
                        overlap,
                    }))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let best = trials
                .into_iter()
                .map(|trial| {
                    let gain = settings.overlap_penalty.mul_add(
                        -trial.overlap,
                        trial.equity_mean - current - settings.maintenance_penalty,
                    );
                    (gain, trial)
                })
                .fold(None, |best: Option<(f64, Trial)>, (gain, trial)| match best {
                    Some((best_gain, best))
                        if best_gain
                            .total_cmp(&gain)
                            .then_with(|| trial.candidate.cmp(&best.candidate))
                            .is_gt() =>
                    {
                        Some((best_gain, best))
                    }
                    _ => Some((gain, trial)),
                });

            let Some((gain, trial)) = best else {
                log::info!("Park search iteration {iteration}: every candidate is already covered");
                stop = StopReason::NoCandidates;
                break;
            };
            if gain <= 0.0 {
                log::info!(
                    "Park search iteration {iteration}: best gain {gain:.4} from candidate {} does not pay",
                    trial.candidate
                );
                stop = StopReason::NoGain;
                break;
            }

            log::info!(
                "Park search iteration {iteration}: placing candidate {} for a gain of {gain:.4}",
                trial.candidate
            );
            let polygon = &candidates[trial.candidate];
            for idx in self.index.overlapping(polygon) {
                let share = overlap_fraction(&regions[idx].geometry, polygon);
                covered[idx] = (covered[idx] + share).min(1.0);
            }
            footprint = footprint.union(polygon);
            chosen.push(trial.candidate);
            placed.push(parks[trial.candidate].clone());

            steps.push(ParkStep {
                candidate: trial.candidate,
                need: trial.need,
                equity_mean: trial.equity_mean,
                equity_delta: trial.equity_mean - current,
                maintenance_penalty: settings.maintenance_penalty,
                overlap_penalty: settings.overlap_penalty * trial.overlap,
                marginal_gain: gain,
                affected: trial.affected,
            });
            current = trial.equity_mean;
        }

        let result = if placed.is_empty() {
            None
        } else {
            Some(self.project(&placed)?.result)
        };
        log::info!("Park search placed {} park(s), stopped by {stop}", steps.len());

        Ok(ParkPlan {
            optimal_parks: steps.len(),
            steps,
            stop,
            result,
        })
    }

    /// Need of the regions `polygon` overlaps that no accepted park covers
    /// yet, with the number of regions it overlaps.
    fn residual_need(&self, polygon: &Polygon<f64>, covered: &[f64]) -> (f64, usize) {
        let regions = self.baseline.regions();
        self.index
            .overlapping(polygon)
            .into_iter()
            .map(|idx| {
                let share = overlap_fraction(&regions[idx].geometry, polygon);
                (share * regions[idx].need() * (1.0 - covered[idx]), share)
            })
            .filter(|&(_, share)| share > 0.0)
            .fold((0.0, 0), |(total, count), (need, _)| (total + need, count + 1))
    }

    /// Mean equity score weighted by regional need; `None` when no scored
    /// region carries any need.
    fn weighted_equity(&self, scores: &BTreeMap<RegionId, ScoreBreakdown>) -> Option<f64> {
        let (sum, total) = self
            .baseline
            .regions()
            .iter()
            .filter_map(|region| {
                let equity = scores.get(&region.id)?.equity_score?;
                Some((region.need(), equity))
            })
            .fold((0.0, 0.0), |(sum, total), (need, equity)| {
                (need.mul_add(equity, sum), total + need)
            });
        (total > 0.0).then(|| sum / total)
    }
}

fn park(polygon: Polygon<f64>) -> InterventionAction {
    InterventionAction::AddPark(AreaAction {
        geometry: ActionGeometry::Polygon(polygon),
        intensity: 1.0,
    })
}

/// Share of `polygon` already under an accepted park.
fn covered_share(polygon: &Polygon<f64>, footprint: &MultiPolygon<f64>) -> f64 {
    let area = polygon.unsigned_area();
    if footprint.0.is_empty() || area <= 0.0 {
        return 0.0;
    }
    (footprint.intersection(polygon).unsigned_area() / area).clamp(0.0, 1.0)
}
