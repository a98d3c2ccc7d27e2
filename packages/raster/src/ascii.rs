//! Reader for ESRI ASCII grid (`.asc`) rasters.
//!
//! The format is a short `key value` header followed by whitespace
//! separated samples in row-major order, north row first:
//!
//! ```text
//! ncols         3
//! nrows         2
//! xllcorner     0.0
//! yllcorner     0.0
//! cellsize      30.0
//! NODATA_value  -9999
//! 0.1 0.2 0.3
//! 0.4 -9999 0.6
//! ```

use std::path::Path;

use geo::Coord;

use crate::RasterError;
use crate::field::{GridSpec, RasterField};

/// Reads an ASCII grid file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid ASCII
/// grid.
pub fn read_ascii_grid(path: &Path, crs: &str) -> Result<RasterField, RasterError> {
    let text = std::fs::read_to_string(path)?;
    let field = parse_ascii_grid(&text, crs)?;
    log::info!(
        "Loaded {}x{} raster from {}",
        field.width(),
        field.height(),
        path.display()
    );
    Ok(field)
}

/// Parses ASCII grid text.
///
/// # Errors
///
/// Returns an error on missing or malformed header keys, non-numeric
/// samples, or a sample count that does not match `ncols * nrows`.
pub fn parse_ascii_grid(text: &str, crs: &str) -> Result<RasterField, RasterError> {
    let mut header = Header::default();
    let mut values = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let first = trimmed.split_whitespace().next().unwrap_or_default();
        let is_header = first.chars().next().is_some_and(char::is_alphabetic);

        if is_header && values.is_empty() {
            header.apply(trimmed, line_no)?;
            continue;
        }

        for token in trimmed.split_whitespace() {
            let value = token.parse::<f64>().map_err(|e| RasterError::Parse {
                line: line_no,
                message: format!("invalid sample {token:?}: {e}"),
            })?;
            values.push(value);
        }
    }

    let spec = header.into_spec(crs)?;
    RasterField::new(spec, values)
}

#[derive(Default)]
struct Header {
    ncols: Option<usize>,
    nrows: Option<usize>,
    xll: Option<(f64, bool)>,
    yll: Option<(f64, bool)>,
    cellsize: Option<f64>,
    no_data: Option<f64>,
}

impl Header {
    fn apply(&mut self, line: &str, line_no: usize) -> Result<(), RasterError> {
        let mut parts = line.split_whitespace();
        let key = parts.next().unwrap_or_default().to_ascii_lowercase();
        let raw = parts.next().ok_or_else(|| RasterError::Parse {
            line: line_no,
            message: format!("header key {key:?} has no value"),
        })?;

        let number = |raw: &str| {
            raw.parse::<f64>().map_err(|e| RasterError::Parse {
                line: line_no,
                message: format!("invalid value for {key}: {e}"),
            })
        };
        let count = |raw: &str| {
            raw.parse::<usize>().map_err(|e| RasterError::Parse {
                line: line_no,
                message: format!("invalid value for {key}: {e}"),
            })
        };

        match key.as_str() {
            "ncols" => self.ncols = Some(count(raw)?),
            "nrows" => self.nrows = Some(count(raw)?),
            "xllcorner" => self.xll = Some((number(raw)?, false)),
            "xllcenter" => self.xll = Some((number(raw)?, true)),
            "yllcorner" => self.yll = Some((number(raw)?, false)),
            "yllcenter" => self.yll = Some((number(raw)?, true)),
            "cellsize" => self.cellsize = Some(number(raw)?),
            "nodata_value" => self.no_data = Some(number(raw)?),
            _ => {
                return Err(RasterError::Parse {
                    line: line_no,
                    message: format!("unknown header key {key:?}"),
                });
            }
        }

        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn into_spec(self, crs: &str) -> Result<GridSpec, RasterError> {
        let missing = |key: &str| RasterError::Parse {
            line: 0,
            message: format!("missing header key {key}"),
        };

        let width = self.ncols.ok_or_else(|| missing("ncols"))?;
        let height = self.nrows.ok_or_else(|| missing("nrows"))?;
        let cellsize = self.cellsize.ok_or_else(|| missing("cellsize"))?;
        let (xll, x_center) = self.xll.ok_or_else(|| missing("xllcorner"))?;
        let (yll, y_center) = self.yll.ok_or_else(|| missing("yllcorner"))?;

        let half = cellsize / 2.0;
        let min_x = if x_center { xll - half } else { xll };
        let min_y = if y_center { yll - half } else { yll };

        Ok(GridSpec {
            width,
            height,
            origin: Coord {
                x: min_x,
                y: (height as f64).mul_add(cellsize, min_y),
            },
            cell_width: cellsize,
            cell_height: cellsize,
            crs: crs.to_string(),
            no_data: self.no_data,
        })
    }
}
