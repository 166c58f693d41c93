//! Configuration for link and exposure attribution.
//!
//! Loaded from `attribution_config.json` with support for an environment
//! variable override.

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;

use crate::field::Species;

pub const BUILTIN_ATTRIBUTION_CONFIG: &str = include_str!("data/attribution_config.json");

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Width of every time bucket, in seconds.
    pub time_bin_size: f64,
    pub time_bin_start: f64,
    pub link_attribution: LinkAttributionConfig,
    pub costs: CostConfig,
    pub radius_estimate: RadiusEstimateConfig,
    pub exposure: ExposureConfig,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            time_bin_size: 3600.0,
            time_bin_start: 0.0,
            link_attribution: LinkAttributionConfig::default(),
            costs: CostConfig::default(),
            radius_estimate: RadiusEstimateConfig::default(),
            exposure: ExposureConfig::default(),
        }
    }
}

impl AttributionConfig {
    pub fn builtin() -> Arc<Self> {
        let config = serde_json::from_str(BUILTIN_ATTRIBUTION_CONFIG).unwrap_or_else(|err| {
            tracing::error!(
                target: "attribution::config",
                error = %err,
                "attribution_config.builtin_invalid"
            );
            Self::default()
        });
        Arc::new(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("time_bin_size", self.time_bin_size)?;
        finite("time_bin_start", self.time_bin_start)?;

        let links = &self.link_attribution;
        positive("link_attribution.smoothing_radius", links.smoothing_radius)?;
        positive("link_attribution.search_radius", links.search_radius)?;
        if links.buffer_segments == 0 {
            return Err(ConfigError::invalid(
                "link_attribution.buffer_segments",
                "must be at least 1",
            ));
        }

        positive("costs.scale_factor", self.costs.scale_factor)?;
        for (species, factor) in &self.costs.factors {
            finite(&format!("costs.factors.{species}"), *factor)?;
        }

        let solver = &self.radius_estimate;
        positive("radius_estimate.initial_radius", solver.initial_radius)?;
        positive("radius_estimate.tolerance", solver.tolerance)?;
        positive("radius_estimate.derivative_step", solver.derivative_step)?;
        if solver.max_iterations == 0 {
            return Err(ConfigError::invalid(
                "radius_estimate.max_iterations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn finite(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be finite, got {value}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkAttributionConfig {
    pub smoothing_radius: f64,
    /// Reach of a link: cells farther away than this never see the link.
    pub search_radius: f64,
    pub buffer_segments: usize,
}

impl Default for LinkAttributionConfig {
    fn default() -> Self {
        Self {
            smoothing_radius: 20.0,
            search_radius: 100.0,
            buffer_segments: 8,
        }
    }
}

/// Monetary valuation of attributed pollutant mass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Multiplier applied to every amount, e.g. 10 for a 10% population sample.
    pub scale_factor: f64,
    pub factors: BTreeMap<Species, f64>,
}

impl Default for CostConfig {
    fn default() -> Self {
        let mut factors = BTreeMap::new();
        factors.insert(Species::from("NO2"), 0.0873);
        factors.insert(Species::from("PM10"), 0.3642);
        Self {
            scale_factor: 1.0,
            factors,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadiusEstimateConfig {
    pub initial_radius: f64,
    /// Absolute residual at which the solver stops.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Step for the central-difference derivative.
    pub derivative_step: f64,
}

impl Default for RadiusEstimateConfig {
    fn default() -> Self {
        Self {
            initial_radius: 20.0,
            tolerance: 1e-6,
            max_iterations: 100,
            derivative_step: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub snap_to_locations: bool,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            snap_to_locations: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse attribution config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read attribution config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid attribution config field {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone)]
pub struct ConfigMetadata {
    path: Option<PathBuf>,
}

impl ConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// `None` when the builtin document is in use.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load the attribution configuration from `ATTRIBUTION_CONFIG_PATH`, falling
/// back to the builtin document.
pub fn load_attribution_config_from_env() -> (Arc<AttributionConfig>, ConfigMetadata) {
    if let Some(path) = env::var("ATTRIBUTION_CONFIG_PATH").ok().map(PathBuf::from) {
        match AttributionConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "attribution::config",
                    path = %path.display(),
                    "attribution_config.loaded=file"
                );
                return (Arc::new(config), ConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "attribution::config",
                    path = %path.display(),
                    error = %err,
                    "attribution_config.load_failed"
                );
            }
        }
    }

    let config = AttributionConfig::builtin();
    tracing::info!(
        target: "attribution::config",
        "attribution_config.loaded=builtin"
    );
    (config, ConfigMetadata::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_parses_and_validates() {
        let parsed = AttributionConfig::from_json_str(BUILTIN_ATTRIBUTION_CONFIG).unwrap();
        assert_eq!(parsed.time_bin_size, 3600.0);
        assert_eq!(parsed.link_attribution.buffer_segments, 8);
        assert!(parsed.costs.factors.contains_key(&Species::from("NO2")));
        assert!(AttributionConfig::builtin().validate().is_ok());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config =
            AttributionConfig::from_json_str(r#"{ "link_attribution": { "smoothing_radius": 35.0 } }"#)
                .unwrap();
        assert_eq!(config.link_attribution.smoothing_radius, 35.0);
        assert_eq!(config.link_attribution.search_radius, 100.0);
        assert_eq!(config.radius_estimate.max_iterations, 100);
        assert!(config.exposure.snap_to_locations);
    }

    #[test]
    fn non_positive_values_are_rejected() {
        let err = AttributionConfig::from_json_str(r#"{ "time_bin_size": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "time_bin_size"));

        let err = AttributionConfig::from_json_str(
            r#"{ "radius_estimate": { "max_iterations": 0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            AttributionConfig::from_json_str("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn unreadable_file_reports_path() {
        let path = Path::new("/definitely/not/here/attribution.json");
        let err = AttributionConfig::from_file(path).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed { .. }));
        assert!(err.to_string().contains("attribution.json"));
    }
}
