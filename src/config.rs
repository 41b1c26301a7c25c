use crate::error::{SResult, SurveyError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Fix-to-fix movement below which two fixes count as the same spot (meters)
pub const STABILITY_DISTANCE_THRESHOLD_METERS: f64 = 1.0;

/// Consecutive near-duplicate fixes needed before a stable point is recorded
pub const DEFAULT_REQUIRED_STABILITY_COUNT: u32 = 4;

/// How stable points are combined into the mean location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragingMode {
    /// Independent arithmetic mean of latitude and longitude degrees.
    /// Small-area approximation: wrong near the poles and the antimeridian.
    #[default]
    Planar,
    /// Normalized sum of earth-centered unit vectors
    Spherical,
}

/// Stabilization engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    pub required_stability_count: u32,
    pub stability_distance_threshold_meters: f64,
    pub averaging: AveragingMode,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            required_stability_count: DEFAULT_REQUIRED_STABILITY_COUNT,
            stability_distance_threshold_meters: STABILITY_DISTANCE_THRESHOLD_METERS,
            averaging: AveragingMode::Planar,
        }
    }
}

impl StabilizerConfig {
    pub fn validate(&self) -> SResult<()> {
        if self.required_stability_count == 0 {
            return Err(SurveyError::InvalidParameters(
                "required_stability_count must be at least 1".to_string(),
            ));
        }

        let threshold = self.stability_distance_threshold_meters;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(SurveyError::InvalidParameters(format!(
                "stability_distance_threshold_meters must be positive, got {}",
                threshold
            )));
        }

        Ok(())
    }

    /// Parse and validate a JSON config; missing fields take their defaults
    pub fn from_json_str(json: &str) -> SResult<Self> {
        let config: StabilizerConfig = serde_json::from_str(json)
            .map_err(|e| SurveyError::InvalidParameters(format!("config parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SResult<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!(
            "Loaded stabilizer config from {}: {:?}",
            path.as_ref().display(),
            config
        );
        Ok(config)
    }
}
