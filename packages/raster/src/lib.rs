#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Georeferenced raster fields and polygon sampling.
//!
//! A [`RasterField`] is an immutable north-up grid of scalar samples with a
//! no-data sentinel. [`sampler::sample`] computes the area-weighted mean of
//! a field over a polygon footprint using exact cell/polygon overlap, and
//! [`sampler::sample_all`] fans that out across many polygons on the
//! `rayon` thread pool.

pub mod ascii;
pub mod field;
pub mod progress;
pub mod sampler;
pub mod summary;

pub use field::{GridSpec, RasterField};
pub use sampler::{ZonalStats, sample, sample_all, zonal_stats};
pub use summary::RasterSummary;

use thiserror::Error;

/// Errors that can occur while building or reading raster fields.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Grid has zero rows or columns.
    #[error("Raster grid must have at least one row and column (got {width}x{height})")]
    EmptyGrid {
        /// Number of columns.
        width: usize,
        /// Number of rows.
        height: usize,
    },

    /// Sample buffer length does not match the grid shape.
    #[error("Raster expects {expected} samples but {actual} were provided")]
    ShapeMismatch {
        /// `width * height`.
        expected: usize,
        /// Length of the provided buffer.
        actual: usize,
    },

    /// Cell size or origin is not a positive finite number.
    #[error("Invalid raster georeferencing: {message}")]
    Georeference {
        /// Description of what went wrong.
        message: String,
    },

    /// ASCII grid text could not be parsed.
    #[error("ASCII grid parse error on line {line}: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Reading the raster file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
