//! Population z-score normalization of one feature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Mean and spread of the defined values of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationStats {
    /// Number of defined values.
    pub count: usize,
    /// Population mean.
    pub mean: f64,
    /// Population standard deviation (divides by `count`).
    pub std_dev: f64,
    /// Whether every defined value is identical; all z-scores are then 0.
    pub degenerate: bool,
}

impl PopulationStats {
    /// Z-score of `value`, or exactly `0.0` for a degenerate population.
    #[must_use]
    pub fn z(&self, value: f64) -> f64 {
        if self.degenerate {
            0.0
        } else {
            (value - self.mean) / self.std_dev
        }
    }
}

/// Statistics over the defined, finite values of `values`.
///
/// Returns `None` when no value is defined.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn population_stats<'a, I>(values: I) -> Option<PopulationStats>
where
    I: IntoIterator<Item = &'a Option<f64>>,
{
    let defined: Vec<f64> = values
        .into_iter()
        .filter_map(|v| v.filter(|x| x.is_finite()))
        .collect();
    let first = *defined.first()?;

    let count = defined.len();
    let mean = defined.iter().sum::<f64>() / count as f64;
    let variance = defined.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count as f64;
    let std_dev = variance.sqrt();

    let identical = defined.iter().all(|v| v.to_bits() == first.to_bits());
    let degenerate = identical || !std_dev.is_finite() || std_dev <= 0.0;

    Some(PopulationStats {
        count,
        mean,
        std_dev,
        degenerate,
    })
}

/// Z-scores of one feature across the whole region population.
///
/// Undefined (or non-finite) raw values keep an undefined z-score and are
/// excluded from the statistics.
#[must_use]
pub fn zscore<K: Ord + Clone>(values: &BTreeMap<K, Option<f64>>) -> BTreeMap<K, Option<f64>> {
    let stats = population_stats(values.values());
    zscore_with(values, stats.as_ref())
}

/// Z-scores against precomputed statistics.
#[must_use]
pub fn zscore_with<K: Ord + Clone>(
    values: &BTreeMap<K, Option<f64>>,
    stats: Option<&PopulationStats>,
) -> BTreeMap<K, Option<f64>> {
    values
        .iter()
        .map(|(key, value)| {
            let z = match (value, stats) {
                (Some(v), Some(stats)) if v.is_finite() => Some(stats.z(*v)),
                _ => None,
            };
            (key.clone(), z)
        })
        .collect()
}
