//! The [`RasterField`] grid type and its georeferencing.

use std::ops::Range;

use geo::{Coord, Rect};

use crate::RasterError;

/// Georeferencing and shape of a north-up grid.
///
/// Row 0 is the northernmost row; `origin` is the top-left corner of the
/// top-left cell.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Top-left corner of the grid.
    pub origin: Coord<f64>,
    /// Cell extent along x.
    pub cell_width: f64,
    /// Cell extent along y.
    pub cell_height: f64,
    /// Coordinate reference label (e.g. `"EPSG:3857"`).
    pub crs: String,
    /// Sentinel marking cells without data.
    pub no_data: Option<f64>,
}

/// An immutable 2D grid of scalar samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterField {
    spec: GridSpec,
    values: Vec<f64>,
}

impl RasterField {
    /// Builds a field from a grid spec and row-major samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid is empty, the sample buffer length does
    /// not equal `width * height` (or that product overflows), or the
    /// georeferencing is not finite with positive cell sizes.
    pub fn new(spec: GridSpec, values: Vec<f64>) -> Result<Self, RasterError> {
        if spec.width == 0 || spec.height == 0 {
            return Err(RasterError::EmptyGrid {
                width: spec.width,
                height: spec.height,
            });
        }

        let expected = spec
            .width
            .checked_mul(spec.height)
            .ok_or_else(|| RasterError::Georeference {
                message: format!("{}x{} grid is too large", spec.width, spec.height),
            })?;
        if values.len() != expected {
            return Err(RasterError::ShapeMismatch {
                expected,
                actual: values.len(),
            });
        }

        for (name, size) in [("cell_width", spec.cell_width), ("cell_height", spec.cell_height)] {
            if !(size.is_finite() && size > 0.0) {
                return Err(RasterError::Georeference {
                    message: format!("{name} must be positive and finite, got {size}"),
                });
            }
        }

        if !(spec.origin.x.is_finite() && spec.origin.y.is_finite()) {
            return Err(RasterError::Georeference {
                message: format!("origin must be finite, got {:?}", spec.origin),
            });
        }

        Ok(Self { spec, values })
    }

    /// Grid georeferencing.
    #[must_use]
    pub const fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Number of columns.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.spec.width
    }

    /// Number of rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.spec.height
    }

    /// Coordinate reference label.
    #[must_use]
    pub fn crs(&self) -> &str {
        &self.spec.crs
    }

    /// Area of one cell in squared CRS units.
    #[must_use]
    pub fn cell_area(&self) -> f64 {
        self.spec.cell_width * self.spec.cell_height
    }

    /// Whether `value` is the no-data sentinel (or `NaN`).
    #[must_use]
    pub fn is_no_data(&self, value: f64) -> bool {
        value.is_nan() || self.spec.no_data.is_some_and(|nd| nd == value)
    }

    /// The sample at `(row, col)`, or `None` for no-data and out-of-range
    /// cells.
    #[must_use]
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.spec.height || col >= self.spec.width {
            return None;
        }
        let value = self.values[row * self.spec.width + col];
        if self.is_no_data(value) {
            None
        } else {
            Some(value)
        }
    }

    /// Iterates over every valid (non-no-data) sample.
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|&v| !self.is_no_data(v))
    }

    /// Footprint of the cell at `(row, col)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_bounds(&self, row: usize, col: usize) -> Rect<f64> {
        let x0 = self.spec.origin.x + col as f64 * self.spec.cell_width;
        let y1 = self.spec.origin.y - row as f64 * self.spec.cell_height;
        Rect::new(
            Coord {
                x: x0,
                y: y1 - self.spec.cell_height,
            },
            Coord {
                x: x0 + self.spec.cell_width,
                y: y1,
            },
        )
    }

    /// Bounding rectangle of the whole grid.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn extent(&self) -> Rect<f64> {
        let max_x = self.spec.origin.x + self.spec.width as f64 * self.spec.cell_width;
        let min_y = self.spec.origin.y - self.spec.height as f64 * self.spec.cell_height;
        Rect::new(
            Coord {
                x: self.spec.origin.x,
                y: min_y,
            },
            Coord {
                x: max_x,
                y: self.spec.origin.y,
            },
        )
    }

    /// Columns whose footprint may overlap `[min_x, max_x]`.
    #[must_use]
    pub fn col_range(&self, min_x: f64, max_x: f64) -> Option<Range<usize>> {
        let start = (min_x - self.spec.origin.x) / self.spec.cell_width;
        let end = (max_x - self.spec.origin.x) / self.spec.cell_width;
        index_range(start, end, self.spec.width)
    }

    /// Rows whose footprint may overlap `[min_y, max_y]`.
    #[must_use]
    pub fn row_range(&self, min_y: f64, max_y: f64) -> Option<Range<usize>> {
        let start = (self.spec.origin.y - max_y) / self.spec.cell_height;
        let end = (self.spec.origin.y - min_y) / self.spec.cell_height;
        index_range(start, end, self.spec.height)
    }
}

/// Clamps a fractional cell span to valid indices. Cells touched only at
/// the boundary are included; the overlap computation gives them zero
/// weight.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn index_range(start: f64, end: f64, len: usize) -> Option<Range<usize>> {
    if !(start.is_finite() && end.is_finite()) || end < 0.0 || start >= len as f64 {
        return None;
    }
    let lo = start.floor().max(0.0) as usize;
    let hi = (end.ceil().max(0.0) as usize).min(len);
    (lo < hi).then_some(lo..hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: usize, height: usize) -> GridSpec {
        GridSpec {
            width,
            height,
            origin: Coord { x: 0.0, y: 2.0 },
            cell_width: 1.0,
            cell_height: 1.0,
            crs: "EPSG:3857".to_string(),
            no_data: Some(-9999.0),
        }
    }

    #[test]
    fn rejects_shape_mismatch() {
        let err = RasterField::new(spec(2, 2), vec![1.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            RasterError::ShapeMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn rejects_overflowing_dimensions() {
        let err = RasterField::new(spec(usize::MAX, 2), vec![1.0]).unwrap_err();
        assert!(matches!(err, RasterError::Georeference { .. }), "{err}");
    }

    #[test]
    fn rejects_empty_and_bad_cells() {
        assert!(RasterField::new(spec(0, 2), vec![]).is_err());
        let mut bad = spec(1, 1);
        bad.cell_width = 0.0;
        assert!(RasterField::new(bad, vec![1.0]).is_err());
    }

    #[test]
    fn no_data_and_nan_are_missing() {
        let field = RasterField::new(spec(2, 1), vec![-9999.0, f64::NAN]).unwrap();
        assert_eq!(field.value(0, 0), None);
        assert_eq!(field.value(0, 1), None);
        assert_eq!(field.value(5, 5), None);
        assert_eq!(field.valid_values().count(), 0);
    }

    #[test]
    fn cell_bounds_are_north_up() {
        let field = RasterField::new(spec(2, 2), vec![0.0; 4]).unwrap();
        let top_left = field.cell_bounds(0, 0);
        assert_eq!(top_left.min(), Coord { x: 0.0, y: 1.0 });
        assert_eq!(top_left.max(), Coord { x: 1.0, y: 2.0 });
        let bottom_right = field.cell_bounds(1, 1);
        assert_eq!(bottom_right.min(), Coord { x: 1.0, y: 0.0 });

        let extent = field.extent();
        assert_eq!(extent.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(extent.max(), Coord { x: 2.0, y: 2.0 });
    }

    #[test]
    fn index_ranges_clamp_to_grid() {
        let field = RasterField::new(spec(2, 2), vec![0.0; 4]).unwrap();
        assert_eq!(field.col_range(-5.0, 0.5), Some(0..1));
        assert_eq!(field.col_range(0.5, 10.0), Some(0..2));
        assert_eq!(field.col_range(3.0, 4.0), None);
        assert_eq!(field.row_range(1.5, 1.8), Some(0..1));
        assert_eq!(field.row_range(-3.0, -1.0), None);
    }
}
