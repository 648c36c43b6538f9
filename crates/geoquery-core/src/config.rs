//! Pipeline configuration.
//!
//! Every knob the pipeline reads lives in [`PipelineConfig`], which is passed
//! explicitly to the controller at construction time. Nothing is read from
//! ambient process state. Configuration files are TOML; every field has a
//! default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Location extraction and geocoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocationConfig {
    /// Extracted locations below this confidence are discarded.
    pub confidence_threshold: f64,
    /// At most this many locations are geocoded per query.
    pub max_locations: usize,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_locations: 5,
        }
    }
}

/// Pixel budget and tiling limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TilingConfig {
    /// Maximum pixels a single backend call may cover.
    pub max_pixels: u64,
    /// Ground resolution in metres per pixel.
    pub scale_m: f64,
    /// Clipped pieces smaller than this fraction of the parent are dropped.
    pub min_tile_fraction: f64,
    /// Upper bound on tiles per region.
    pub max_tiles: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            max_pixels: 10_000_000,
            scale_m: 30.0,
            min_tile_fraction: 1e-9,
            max_tiles: 4096,
        }
    }
}

/// Task planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// How many matched capabilities are planned per region.
    pub max_capabilities_per_region: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_capabilities_per_region: 1,
        }
    }
}

/// Backend dispatch concurrency, timeouts and retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Concurrent tile calls per task.
    pub tile_concurrency: usize,
    /// Concurrent tasks per query.
    pub task_concurrency: usize,
    pub tile_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    /// Attempts per tile for retryable errors (1 = no retry).
    pub max_tile_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tile_concurrency: 4,
            task_concurrency: 4,
            tile_timeout_ms: 30_000,
            fallback_timeout_ms: 20_000,
            max_tile_attempts: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl DispatchConfig {
    pub fn tile_timeout(&self) -> Duration {
        Duration::from_millis(self.tile_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Default whole-run deadline.
    pub deadline_ms: u64,
    pub max_query_chars: usize,
    pub location: LocationConfig,
    pub tiling: TilingConfig,
    pub planner: PlannerConfig,
    pub dispatch: DispatchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 120_000,
            max_query_chars: 2000,
            location: LocationConfig::default(),
            tiling: TilingConfig::default(),
            planner: PlannerConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.location.confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(invalid("location.confidence_threshold", format!("{t} not in [0, 1]")));
        }
        if self.location.max_locations == 0 {
            return Err(invalid("location.max_locations", "must be at least 1"));
        }
        if self.tiling.max_pixels == 0 {
            return Err(invalid("tiling.max_pixels", "must be positive"));
        }
        if !(self.tiling.scale_m.is_finite() && self.tiling.scale_m > 0.0) {
            return Err(invalid(
                "tiling.scale_m",
                format!("{} is not a positive number", self.tiling.scale_m),
            ));
        }
        if !(0.0..0.5).contains(&self.tiling.min_tile_fraction) {
            return Err(invalid("tiling.min_tile_fraction", "must be in [0, 0.5)"));
        }
        if self.tiling.max_tiles == 0 {
            return Err(invalid("tiling.max_tiles", "must be at least 1"));
        }
        if self.planner.max_capabilities_per_region == 0 {
            return Err(invalid("planner.max_capabilities_per_region", "must be at least 1"));
        }
        if self.dispatch.tile_concurrency == 0 {
            return Err(invalid("dispatch.tile_concurrency", "must be at least 1"));
        }
        if self.dispatch.task_concurrency == 0 {
            return Err(invalid("dispatch.task_concurrency", "must be at least 1"));
        }
        if self.dispatch.max_tile_attempts == 0 {
            return Err(invalid("dispatch.max_tile_attempts", "must be at least 1"));
        }
        if self.dispatch.tile_timeout_ms == 0 {
            return Err(invalid("dispatch.tile_timeout_ms", "must be positive"));
        }
        if self.deadline_ms == 0 {
            return Err(invalid("deadline_ms", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.dispatch.tile_concurrency, 4);
        assert_eq!(config.location.confidence_threshold, 0.5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            deadline_ms = 5000

            [tiling]
            max_pixels = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.deadline(), Duration::from_secs(5));
        assert_eq!(config.tiling.max_pixels, 1000);
        assert_eq!(config.tiling.scale_m, 30.0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = PipelineConfig::from_toml_str("[tiling]\nmax_pixel = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let err = PipelineConfig::from_toml_str("[location]\nconfidence_threshold = 1.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("location.confidence_threshold"));

        let err =
            PipelineConfig::from_toml_str("[dispatch]\ntile_concurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("dispatch.tile_concurrency"));
    }

    #[test]
    fn pretty_toml_round_trips() {
        let config = PipelineConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text).unwrap(), config);
    }
}
