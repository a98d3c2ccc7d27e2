//! Scoring configuration loaded from TOML.
//!
//! The default configuration is baked into the binary from
//! `config/scoring.toml` via [`include_str!`]. Every key is required: a
//! missing weight or cutoff is a broken deployment, so loading fails
//! instead of falling back to a default.

use std::collections::BTreeMap;
use std::path::Path;

use healthy_city_scoring_models::{Feature, IndexKind, UndefinedPolicy};
use serde::Deserialize;
use thiserror::Error;

use crate::gravity::GravityParams;

/// Default configuration embedded at compile time.
const DEFAULT_SCORING_TOML: &str = include_str!("../config/scoring.toml");

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML text could not be deserialized (includes missing keys).
    #[error("Invalid scoring config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Reading the config file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No coefficient table for a derived index.
    #[error("No coefficients configured for index {0}")]
    MissingIndex(IndexKind),

    /// No composite weight for a derived index.
    #[error("No composite weight configured for index {0}")]
    MissingWeight(IndexKind),

    /// A constant is out of its valid range.
    #[error("Invalid value for {key}: {message}")]
    Invalid {
        /// Dotted config key.
        key: String,
        /// Description of what went wrong.
        message: String,
    },
}

/// Linear projection of composite z-scores onto the display scale.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayScale {
    /// Composite z mapped to `score_min`; lower values are clamped.
    pub z_min: f64,
    /// Composite z mapped to `score_max`; higher values are clamped.
    pub z_max: f64,
    /// Bottom of the display range.
    pub score_min: f64,
    /// Top of the display range.
    pub score_max: f64,
    /// Half-width, in composite z units, of the moderate band around the
    /// population mean.
    pub band_margin: f64,
}

impl DisplayScale {
    /// Maps a composite z-score onto the display range, clamping rather
    /// than extrapolating.
    #[must_use]
    pub fn project(&self, z: f64) -> f64 {
        let t = (z.clamp(self.z_min, self.z_max) - self.z_min) / (self.z_max - self.z_min);
        t.mul_add(self.score_max - self.score_min, self.score_min)
    }
}

/// Physically plausible range for a raw feature value.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureBounds {
    /// Lower bound, if any.
    pub min: Option<f64>,
    /// Upper bound, if any.
    pub max: Option<f64>,
}

impl FeatureBounds {
    /// Applies `delta` to `old` without leaving the bounds.
    ///
    /// A value already outside the bounds is never pulled across them; it
    /// may only move back toward the range, or stay put.
    #[must_use]
    pub fn step(&self, old: f64, delta: f64) -> f64 {
        let new = old + delta;
        let new = self.min.map_or(new, |lo| new.max(lo.min(old)));
        self.max.map_or(new, |hi| new.min(hi.max(old)))
    }
}

/// Complete scoring configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringConfig {
    /// Treatment of undefined z-scores at the composite boundary.
    pub undefined_policy: UndefinedPolicy,
    /// Share of the score removed for a fully vulnerable region.
    pub equity_weight: f64,
    /// Display projection.
    pub display: DisplayScale,
    /// Feature coefficients for each derived index.
    pub indices: BTreeMap<IndexKind, BTreeMap<Feature, f64>>,
    /// Index weights for the composite.
    pub composite: BTreeMap<IndexKind, f64>,
    /// Gravity accessibility parameters.
    pub gravity: GravityParams,
    /// Plausible raw ranges, per feature.
    #[serde(default)]
    pub bounds: BTreeMap<Feature, FeatureBounds>,
}

impl ScoringConfig {
    /// Loads the configuration embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_SCORING_TOML)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded scoring config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, a required key is
    /// missing, or a constant fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every index and weight is present and every constant is
    /// in range.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        finite("equity_weight", self.equity_weight)?;
        if !(0.0..=1.0).contains(&self.equity_weight) {
            return Err(invalid("equity_weight", "must be within [0, 1]"));
        }

        let d = &self.display;
        for (key, value) in [
            ("display.z_min", d.z_min),
            ("display.z_max", d.z_max),
            ("display.score_min", d.score_min),
            ("display.score_max", d.score_max),
            ("display.band_margin", d.band_margin),
        ] {
            finite(key, value)?;
        }
        if d.band_margin < 0.0 {
            return Err(invalid("display.band_margin", "must not be negative"));
        }
        if d.z_min >= d.z_max {
            return Err(invalid("display", "z_min must be below z_max"));
        }
        if d.score_min >= d.score_max {
            return Err(invalid("display", "score_min must be below score_max"));
        }

        for kind in IndexKind::ALL {
            let coefficients = self
                .indices
                .get(&kind)
                .filter(|c| !c.is_empty())
                .ok_or(ConfigError::MissingIndex(kind))?;
            for (feature, &coef) in coefficients {
                finite(&format!("indices.{kind}.{feature}"), coef)?;
            }

            let weight = self
                .composite
                .get(&kind)
                .ok_or(ConfigError::MissingWeight(kind))?;
            finite(&format!("composite.{kind}"), *weight)?;
        }

        self.gravity.validate()?;

        for (feature, bounds) in &self.bounds {
            if let (Some(lo), Some(hi)) = (bounds.min, bounds.max)
                && lo > hi
            {
                return Err(invalid(&format!("bounds.{feature}"), "min exceeds max"));
            }
        }

        Ok(())
    }

    /// Plausible range for `feature`, unbounded if not configured.
    #[must_use]
    pub fn bounds_for(&self, feature: Feature) -> FeatureBounds {
        self.bounds.get(&feature).copied().unwrap_or(FeatureBounds {
            min: None,
            max: None,
        })
    }
}

pub(crate) fn finite(key: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(key, "must be a finite number"))
    }
}

pub(crate) fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}
