//! Action recipes and simulation policy loaded from TOML.
//!
//! The default catalog is baked into the binary from
//! `config/actions.toml`. Every [`ActionKind`] must have a recipe; a
//! missing one is a configuration error, not a runtime lookup failure.

use std::collections::BTreeMap;
use std::path::Path;

use healthy_city_scoring::ConfigError;
use healthy_city_scoring_models::Feature;
use healthy_city_simulation_models::{ActionKind, AggregateMode, GeometryType, PointPolicy};
use serde::{Deserialize, Serialize};

/// Default catalog embedded at compile time.
const DEFAULT_ACTIONS_TOML: &str = include_str!("../config/actions.toml");

/// Change applied to one raw feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDelta {
    /// Raw feature units.
    Absolute(f64),
    /// Multiples of the baseline population standard deviation.
    StdDevs(f64),
}

impl FeatureDelta {
    const fn magnitude(self) -> f64 {
        match self {
            Self::Absolute(v) | Self::StdDevs(v) => v,
        }
    }
}

/// How one action kind perturbs features.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRecipe {
    /// Human-readable description.
    pub description: String,
    /// Geometry type the action is normally drawn with.
    pub geometry: GeometryType,
    /// Whether deltas scale with the share of a region the action covers.
    pub scale_by_overlap: bool,
    /// Feature deltas at full overlap and intensity `1.0`.
    pub deltas: BTreeMap<Feature, FeatureDelta>,
}

/// Engine-wide simulation settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationPolicy {
    /// Handling of point actions that fall outside every region.
    pub point_policy: PointPolicy,
    /// How per-region deltas are aggregated.
    pub aggregate: AggregateMode,
    /// Capacity of a simulated facility when none is given.
    pub default_capacity: f64,
}

/// Tuning of the greedy park placement search.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizerSettings {
    /// Highest-need candidates evaluated per iteration.
    pub candidate_count: usize,
    /// Fixed cost of one more park, in equity score points.
    pub maintenance_penalty: f64,
    /// Cost per unit share of a candidate already covered by placed parks.
    pub overlap_penalty: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            candidate_count: 25,
            maintenance_penalty: 0.5,
            overlap_penalty: 2.0,
        }
    }
}

/// The full action table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionCatalog {
    /// Simulation settings.
    pub policy: SimulationPolicy,
    /// Park placement search settings.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// One recipe per action kind.
    pub actions: BTreeMap<ActionKind, ActionRecipe>,
}

/// Catalog entry as listed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    /// Action kind.
    pub kind: ActionKind,
    /// Human-readable description.
    pub description: String,
    /// Default geometry type.
    pub geometry: GeometryType,
    /// Feature deltas at full overlap and intensity `1.0`.
    pub deltas: BTreeMap<Feature, FeatureDelta>,
}

impl ActionCatalog {
    /// Loads the catalog embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_ACTIONS_TOML)
    }

    /// Loads a catalog file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&text)?;
        log::info!("Loaded action catalog from {}", path.display());
        Ok(catalog)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or fails
    /// [`ActionCatalog::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let catalog: Self = toml::from_str(text)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Checks every kind has a usable recipe.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a missing recipe, a delta on a
    /// computed feature, a non-finite delta, a facility recipe that is not
    /// point-based, a non-positive default capacity, or unusable optimizer
    /// settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.policy.default_capacity;
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(invalid("policy.default_capacity", "must be positive"));
        }

        if self.optimizer.candidate_count == 0 {
            return Err(invalid("optimizer.candidate_count", "must be at least 1"));
        }
        for (key, penalty) in [
            ("optimizer.maintenance_penalty", self.optimizer.maintenance_penalty),
            ("optimizer.overlap_penalty", self.optimizer.overlap_penalty),
        ] {
            if !(penalty.is_finite() && penalty >= 0.0) {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }

        for kind in ActionKind::ALL {
            let key = format!("actions.{kind}");
            let recipe = self
                .actions
                .get(&kind)
                .ok_or_else(|| invalid(&key, "no recipe configured"))?;

            if kind == ActionKind::AddClinic && recipe.geometry != GeometryType::Point {
                return Err(invalid(&key, "facility actions must be point-based"));
            }

            for (feature, delta) in &recipe.deltas {
                if !feature.is_raster() {
                    return Err(invalid(
                        &format!("{key}.deltas.{feature}"),
                        "computed features cannot be perturbed directly",
                    ));
                }
                if !delta.magnitude().is_finite() {
                    return Err(invalid(
                        &format!("{key}.deltas.{feature}"),
                        "must be a finite number",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Recipe for `kind`.
    #[must_use]
    pub fn recipe(&self, kind: ActionKind) -> Option<&ActionRecipe> {
        self.actions.get(&kind)
    }

    /// Lists every configured action.
    #[must_use]
    pub fn describe(&self) -> Vec<ActionInfo> {
        self.actions
            .iter()
            .map(|(&kind, recipe)| ActionInfo {
                kind,
                description: recipe.description.clone(),
                geometry: recipe.geometry,
                deltas: recipe.deltas.clone(),
            })
            .collect()
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.to_string(),
    }
}
