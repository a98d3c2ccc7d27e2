//! Area-weighted sampling of a [`RasterField`] over polygon footprints.
//!
//! Each cell's weight is the fraction of its area that lies inside the
//! polygon, computed with an exact polygon/rectangle intersection rather
//! than a centroid-in-polygon test, so small or irregular polygons are not
//! biased toward whichever cells happen to contain their centre. No-data
//! cells contribute nothing to either the numerator or the denominator.

use std::collections::BTreeMap;

use geo::{Area, BooleanOps, BoundingRect, Intersects, MultiPolygon, Polygon};
use rayon::prelude::*;

use crate::field::RasterField;
use crate::progress::ProgressCallback;

/// Area-weighted statistics of a field under one polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZonalStats {
    /// Area-weighted mean of the valid cells.
    pub mean: f64,
    /// Smallest valid cell value with non-zero overlap.
    pub min: f64,
    /// Largest valid cell value with non-zero overlap.
    pub max: f64,
    /// Number of valid cells with non-zero overlap.
    pub valid_cells: usize,
    /// Sum of overlap weights, in cell units.
    pub coverage: f64,
}

/// Area-weighted mean of `field` over `polygon`.
///
/// Returns `None` when no valid cell overlaps the polygon; a polygon that
/// only covers no-data cells is undefined, never zero.
#[must_use]
pub fn sample(field: &RasterField, polygon: &MultiPolygon<f64>) -> Option<f64> {
    zonal_stats(field, polygon).map(|stats| stats.mean)
}

/// Area-weighted statistics of `field` over `polygon`.
///
/// Cells are visited in row-major order so the accumulation is
/// reproducible for identical inputs.
#[must_use]
pub fn zonal_stats(field: &RasterField, polygon: &MultiPolygon<f64>) -> Option<ZonalStats> {
    let bounds = polygon.bounding_rect()?;
    let rows = field.row_range(bounds.min().y, bounds.max().y)?;
    let cols = field.col_range(bounds.min().x, bounds.max().x)?;
    let cell_area = field.cell_area();

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut valid_cells = 0;

    for row in rows {
        for col in cols.clone() {
            let Some(value) = field.value(row, col) else {
                continue;
            };

            let cell = field.cell_bounds(row, col);
            if !polygon.intersects(&cell) {
                continue;
            }

            let overlap = polygon.intersection(&cell.to_polygon()).unsigned_area();
            let weight = overlap / cell_area;
            if weight <= 0.0 {
                continue;
            }

            weighted_sum += weight * value;
            weight_total += weight;
            min = min.min(value);
            max = max.max(value);
            valid_cells += 1;
        }
    }

    if weight_total > 0.0 {
        Some(ZonalStats {
            mean: weighted_sum / weight_total,
            min,
            max,
            valid_cells,
            coverage: weight_total,
        })
    } else {
        None
    }
}

/// Samples `field` over many polygons in parallel.
///
/// Polygons are independent, so the work is spread across the `rayon`
/// pool. The result is keyed by the caller's identifiers and therefore
/// independent of scheduling order.
pub fn sample_all<K>(
    field: &RasterField,
    polygons: &[(K, &MultiPolygon<f64>)],
    progress: &dyn ProgressCallback,
) -> BTreeMap<K, Option<f64>>
where
    K: Ord + Clone + Send + Sync,
{
    progress.set_total(polygons.len() as u64);

    let sampled: Vec<(K, Option<f64>)> = polygons
        .par_iter()
        .map(|(key, polygon)| {
            let value = sample(field, polygon);
            progress.inc(1);
            (key.clone(), value)
        })
        .collect();

    let undefined = sampled.iter().filter(|(_, v)| v.is_none()).count();
    if undefined > 0 {
        log::debug!(
            "{undefined} of {} polygons have no valid raster coverage",
            sampled.len()
        );
    }

    sampled.into_iter().collect()
}

/// Fraction of `region`'s area covered by `footprint`, in `[0, 1]`.
///
/// Returns `0.0` for degenerate (zero-area) regions.
#[must_use]
pub fn overlap_fraction(region: &MultiPolygon<f64>, footprint: &Polygon<f64>) -> f64 {
    let area = region.unsigned_area();
    if area <= 0.0 {
        return 0.0;
    }
    (region.intersection(footprint).unsigned_area() / area).clamp(0.0, 1.0)
}
