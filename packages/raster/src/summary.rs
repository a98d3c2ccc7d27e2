//! Field-wide statistics over every valid cell.

use crate::field::RasterField;

/// Mean, spread and range of a field's valid samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSummary {
    /// Number of valid cells.
    pub count: usize,
    /// Mean of valid cells.
    pub mean: f64,
    /// Population standard deviation of valid cells.
    pub std_dev: f64,
    /// Smallest valid value.
    pub min: f64,
    /// Largest valid value.
    pub max: f64,
}

impl RasterSummary {
    /// Summarizes every valid cell of `field`.
    ///
    /// Returns `None` when the field has no valid cells.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(field: &RasterField) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for value in field.valid_values() {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }

        if count == 0 {
            return None;
        }

        let mean = sum / count as f64;
        let variance = field
            .valid_values()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / count as f64;

        Some(Self {
            count,
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use geo::Coord;

    use super::*;
    use crate::field::GridSpec;

    fn field(values: Vec<f64>) -> RasterField {
        RasterField::new(
            GridSpec {
                width: values.len(),
                height: 1,
                origin: Coord { x: 0.0, y: 1.0 },
                cell_width: 1.0,
                cell_height: 1.0,
                crs: "EPSG:4326".to_string(),
                no_data: Some(0.0),
            },
            values,
        )
        .unwrap()
    }

    #[test]
    fn summary_skips_no_data() {
        let summary = RasterSummary::of(&field(vec![2.0, 0.0, 4.0, f64::NAN])).unwrap();
        assert_eq!(summary.count, 2);
        assert!((summary.mean - 3.0).abs() < f64::EPSILON);
        assert!((summary.std_dev - 1.0).abs() < f64::EPSILON);
        assert!((summary.min - 2.0).abs() < f64::EPSILON);
        assert!((summary.max - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_summary_is_none() {
        assert_eq!(RasterSummary::of(&field(vec![0.0, 0.0])), None);
    }
}
