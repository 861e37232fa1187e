use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Active fusion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    SensorOnly,
    CameraOnly,
    Auto,
    Fusion,
}

impl FusionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMode::SensorOnly => "sensor_only",
            FusionMode::CameraOnly => "camera_only",
            FusionMode::Auto => "auto",
            FusionMode::Fusion => "fusion",
        }
    }

    /// Whether a frame should be captured before predicting in this mode
    pub fn may_use_camera(&self) -> bool {
        !matches!(self, FusionMode::SensorOnly)
    }
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FusionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sensor_only" => Ok(FusionMode::SensorOnly),
            "camera_only" => Ok(FusionMode::CameraOnly),
            "auto" => Ok(FusionMode::Auto),
            "fusion" => Ok(FusionMode::Fusion),
            other => Err(Error::InvalidConfig(format!("unknown mode '{}'", other))),
        }
    }
}

/// Per-adapter weights for fusion mode. Only their relative magnitude matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    #[serde(default = "default_sensor_weight")]
    pub sensor: f32,
    #[serde(default = "default_camera_weight")]
    pub camera: f32,
}

fn default_sensor_weight() -> f32 { 0.4 }
fn default_camera_weight() -> f32 { 0.6 }

impl FusionWeights {
    pub fn new(sensor: f32, camera: f32) -> Self {
        Self { sensor, camera }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("sensor", self.sensor), ("camera", self.camera)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, w
                )));
            }
        }
        if self.sensor + self.camera <= 0.0 {
            return Err(Error::InvalidConfig(
                "at least one fusion weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self::new(default_sensor_weight(), default_camera_weight())
    }
}

/// Externally owned fusion settings, read before every prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_mode")]
    pub mode: FusionMode,
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: f32,
    #[serde(default)]
    pub weights: FusionWeights,
}

fn default_mode() -> FusionMode { FusionMode::Auto }
fn default_auto_threshold() -> f32 { 0.70 }

impl FusionConfig {
    pub fn new(mode: FusionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.auto_threshold)?;
        self.weights.validate()
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            auto_threshold: default_auto_threshold(),
            weights: FusionWeights::default(),
        }
    }
}

pub(crate) fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::InvalidConfig(format!(
            "auto threshold must lie in [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

/// What `camera_only` mode does when no camera result can be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraOnlyPolicy {
    /// Degrade to the sensor result and flag the fallback in metadata
    #[default]
    FallbackToSensor,
    /// Surface the camera problem to the caller
    Reject,
}

/// Where the monitor reads its fusion settings from on every sample
pub trait ConfigSource: Send + Sync {
    fn fusion_config(&self) -> FusionConfig;
}

impl ConfigSource for FusionConfig {
    fn fusion_config(&self) -> FusionConfig {
        *self
    }
}

/// Cloneable handle to a fusion config that a config store can update at any time
#[derive(Debug, Clone, Default)]
pub struct SharedFusionConfig {
    inner: Arc<RwLock<FusionConfig>>,
}

impl SharedFusionConfig {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Replace the stored config. Invalid configs are rejected and the old one kept.
    pub fn set(&self, config: FusionConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// Partial update: mode always, threshold and weights when given
    pub fn update(
        &self,
        mode: FusionMode,
        auto_threshold: Option<f32>,
        weights: Option<FusionWeights>,
    ) -> Result<FusionConfig> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = *guard;
        next.mode = mode;
        if let Some(t) = auto_threshold {
            next.auto_threshold = t;
        }
        if let Some(w) = weights {
            next.weights = w;
        }
        next.validate()?;
        *guard = next;
        Ok(next)
    }
}

impl ConfigSource for SharedFusionConfig {
    fn fusion_config(&self) -> FusionConfig {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = FusionConfig::default();
        assert_eq!(config.mode, FusionMode::Auto);
        assert!((config.auto_threshold - 0.70).abs() < 1e-6);
        assert!((config.weights.sensor - 0.4).abs() < 1e-6);
        assert!((config.weights.camera - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_mode_parse_and_display() {
        for mode in [
            FusionMode::SensorOnly,
            FusionMode::CameraOnly,
            FusionMode::Auto,
            FusionMode::Fusion,
        ] {
            assert_eq!(mode.to_string().parse::<FusionMode>().unwrap(), mode);
        }
        assert!("hybrid".parse::<FusionMode>().is_err());
    }

    #[test]
    fn test_only_sensor_mode_skips_camera() {
        assert!(!FusionMode::SensorOnly.may_use_camera());
        assert!(FusionMode::CameraOnly.may_use_camera());
        assert!(FusionMode::Auto.may_use_camera());
        assert!(FusionMode::Fusion.may_use_camera());
    }

    #[test]
    fn test_weights_validation() {
        assert!(FusionWeights::new(0.0, 2.5).validate().is_ok());
        assert!(FusionWeights::new(-0.1, 0.5).validate().is_err());
        assert!(FusionWeights::new(0.5, f32::NAN).validate().is_err());
        assert!(FusionWeights::new(0.0, 0.0).validate().is_err());
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = FusionConfig::default();
        config.auto_threshold = 1.2;
        assert!(config.validate().is_err());
        config.auto_threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_update_is_partial() {
        let shared = SharedFusionConfig::default();
        let next = shared.update(FusionMode::Fusion, None, None).unwrap();
        assert_eq!(next.mode, FusionMode::Fusion);
        assert!((next.auto_threshold - 0.70).abs() < 1e-6);

        shared
            .update(FusionMode::Auto, Some(0.9), Some(FusionWeights::new(1.0, 1.0)))
            .unwrap();
        let read = shared.fusion_config();
        assert_eq!(read.mode, FusionMode::Auto);
        assert!((read.auto_threshold - 0.9).abs() < 1e-6);
        assert_eq!(read.weights, FusionWeights::new(1.0, 1.0));
    }

    #[test]
    fn test_shared_rejects_invalid_and_keeps_previous() {
        let shared = SharedFusionConfig::new(FusionConfig::new(FusionMode::SensorOnly));
        assert!(shared.update(FusionMode::Fusion, Some(1.5), None).is_err());
        assert_eq!(shared.fusion_config().mode, FusionMode::SensorOnly);

        let err = shared
            .update(FusionMode::Fusion, None, Some(FusionWeights::new(0.0, 0.0)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(shared.fusion_config(), FusionConfig::new(FusionMode::SensorOnly));
    }

    #[test]
    fn test_clones_share_state() {
        let a = SharedFusionConfig::default();
        let b = a.clone();
        a.set(FusionConfig::new(FusionMode::CameraOnly)).unwrap();
        assert_eq!(b.fusion_config().mode, FusionMode::CameraOnly);
    }

    #[test]
    fn test_toml_section_defaults() {
        let config: FusionConfig = toml::from_str("mode = \"fusion\"").unwrap();
        assert_eq!(config.mode, FusionMode::Fusion);
        assert_eq!(config.weights, FusionWeights::default());

        let config: FusionConfig =
            toml::from_str("[weights]\nsensor = 1.0\n").unwrap();
        assert_eq!(config.mode, FusionMode::Auto);
        assert!((config.weights.sensor - 1.0).abs() < 1e-6);
        assert!((config.weights.camera - 0.6).abs() < 1e-6);
    }
}
