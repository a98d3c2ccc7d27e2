//! Composite scorer: z-scores to derived indices to a display score.
//!
//! Every region's breakdown is a pure function of the feature table it is
//! given and the configuration. Population statistics are recomputed from
//! that table on every call, so a perturbed copy never reuses a stale
//! population.

use std::collections::BTreeMap;

use healthy_city_scoring_models::{
    Feature, FeatureTable, FeatureValues, IndexKind, RegionId, ScoreBand, ScoreBreakdown,
    UndefinedPolicy,
};

use crate::config::ScoringConfig;
use crate::normalize::{PopulationStats, population_stats, zscore_with};

/// Per-feature statistics of a feature table.
pub type FeatureStats = BTreeMap<Feature, Option<PopulationStats>>;

/// Statistics of every feature over the defined values in `features`.
#[must_use]
pub fn feature_stats(features: &FeatureTable) -> FeatureStats {
    Feature::ALL
        .iter()
        .map(|&feature| {
            let column = features.values().map(|row| row.get(&feature).copied().flatten());
            let values: Vec<Option<f64>> = column.collect();
            (feature, population_stats(&values))
        })
        .collect()
}

/// Applies a [`ScoringConfig`] to feature tables.
#[derive(Debug, Clone, Copy)]
pub struct CompositeScorer<'a> {
    config: &'a ScoringConfig,
}

impl<'a> CompositeScorer<'a> {
    /// Creates a scorer over `config`.
    #[must_use]
    pub const fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    /// Scores every region in `features` without equity adjustment.
    #[must_use]
    pub fn score(&self, features: &FeatureTable) -> BTreeMap<RegionId, ScoreBreakdown> {
        self.score_with_equity(features, &BTreeMap::new())
    }

    /// Scores every region, applying the equity adjustment to regions that
    /// have a vulnerability factor.
    ///
    /// Under [`UndefinedPolicy::ExcludeRegion`] regions with any undefined
    /// z-score feeding an index are left out of the result.
    #[must_use]
    pub fn score_with_equity(
        &self,
        features: &FeatureTable,
        vulnerability: &BTreeMap<RegionId, f64>,
    ) -> BTreeMap<RegionId, ScoreBreakdown> {
        let stats = feature_stats(features);
        let columns = z_columns(features, &stats);
        let used = self.used_features();

        let mut out = BTreeMap::new();
        for (id, row) in features {
            let raw: FeatureValues = Feature::ALL
                .iter()
                .map(|&f| (f, row.get(&f).copied().flatten().filter(|v| v.is_finite())))
                .collect();

            let z_scores: FeatureValues = Feature::ALL
                .iter()
                .map(|&f| (f, columns.get(&f).and_then(|c| c.get(id).copied().flatten())))
                .collect();

            let has_gap = used.iter().any(|f| z_scores.get(f).copied().flatten().is_none());
            if has_gap && self.config.undefined_policy == UndefinedPolicy::ExcludeRegion {
                log::debug!("Excluding region {id} with undefined inputs");
                continue;
            }

            let indices = self.indices(&z_scores);
            let composite_z = self.composite(&indices);
            let score = composite_z.map(|z| self.config.display.project(z));
            let equity_score = score.map(|s| {
                vulnerability
                    .get(id)
                    .map_or(s, |&v| s * self.config.equity_weight.mul_add(-v.clamp(0.0, 1.0), 1.0))
            });

            out.insert(
                id.clone(),
                ScoreBreakdown {
                    raw,
                    z_scores,
                    indices,
                    composite_z,
                    score,
                    equity_score,
                    band: None,
                },
            );
        }

        self.assign_bands(&mut out);
        out
    }

    /// Bands every defined composite against the mean of the scored
    /// population.
    #[allow(clippy::cast_precision_loss)]
    fn assign_bands(&self, breakdowns: &mut BTreeMap<RegionId, ScoreBreakdown>) {
        let defined: Vec<f64> = breakdowns.values().filter_map(|b| b.composite_z).collect();
        if defined.is_empty() {
            return;
        }
        let mean = defined.iter().sum::<f64>() / defined.len() as f64;
        let margin = self.config.display.band_margin;
        for breakdown in breakdowns.values_mut() {
            breakdown.band = breakdown
                .composite_z
                .map(|z| ScoreBand::classify(z, mean, margin));
        }
    }

    fn used_features(&self) -> Vec<Feature> {
        let mut used: Vec<Feature> = self
            .config
            .indices
            .values()
            .flat_map(|coefficients| coefficients.keys().copied())
            .collect();
        used.sort_unstable();
        used.dedup();
        used
    }

    /// Resolves an undefined z-score per the configured policy.
    fn resolve(&self, z: Option<f64>) -> Option<f64> {
        match self.config.undefined_policy {
            UndefinedPolicy::SubstituteZero => Some(z.unwrap_or(0.0)),
            UndefinedPolicy::Propagate | UndefinedPolicy::ExcludeRegion => z,
        }
    }

    fn indices(&self, z_scores: &FeatureValues) -> BTreeMap<IndexKind, Option<f64>> {
        self.config
            .indices
            .iter()
            .map(|(&kind, coefficients)| {
                let value = coefficients.iter().try_fold(0.0, |acc, (feature, &coef)| {
                    let z = self.resolve(z_scores.get(feature).copied().flatten())?;
                    Some(coef.mul_add(z, acc))
                });
                (kind, value)
            })
            .collect()
    }

    fn composite(&self, indices: &BTreeMap<IndexKind, Option<f64>>) -> Option<f64> {
        self.config
            .composite
            .iter()
            .try_fold(0.0, |acc, (kind, &weight)| {
                let index = indices.get(kind).copied().flatten()?;
                Some(weight.mul_add(index, acc))
            })
            .filter(|z| z.is_finite())
    }
}

fn z_columns(
    features: &FeatureTable,
    stats: &FeatureStats,
) -> BTreeMap<Feature, BTreeMap<RegionId, Option<f64>>> {
    Feature::ALL
        .iter()
        .map(|&feature| {
            let column: BTreeMap<RegionId, Option<f64>> = features
                .iter()
                .map(|(id, row)| (id.clone(), row.get(&feature).copied().flatten()))
                .collect();
            let stats = stats.get(&feature).copied().flatten();
            (feature, zscore_with(&column, stats.as_ref()))
        })
        .collect()
}
