use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use super::config::{CameraOnlyPolicy, FusionConfig, FusionMode, FusionWeights};
use crate::camera::Frame;
use crate::classifier::{ClassificationResult, Distribution, PostureClassifier, SensorSample};
use crate::error::{Error, Result};
use crate::posture::{BadPostures, Posture};

pub type SensorAdapter = Box<dyn PostureClassifier<Input = SensorSample>>;
pub type CameraAdapter = Box<dyn PostureClassifier<Input = Frame>>;

/// Why the arbiter settled on its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// auto: sensor confidence reached the threshold, camera skipped
    ThresholdMet,
    /// auto: sensor was unsure and the camera answered
    SensorLowCameraUsed,
    /// Camera was wanted but produced nothing; sensor result used
    CameraFallback,
    /// fusion: both adapters picked the same label
    Agreement,
    /// fusion: adapters disagreed, weighted scores decided
    Conflict,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionReason::ThresholdMet => "sensor confident",
            DecisionReason::SensorLowCameraUsed => "sensor low, camera activated",
            DecisionReason::CameraFallback => "camera unavailable, sensor fallback",
            DecisionReason::Agreement => "both models agree",
            DecisionReason::Conflict => "conflict resolved by weights",
        })
    }
}

/// Label and confidence of one adapter
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdapterOutcome {
    pub label: Posture,
    pub confidence: f32,
}

impl From<&ClassificationResult> for AdapterOutcome {
    fn from(r: &ClassificationResult) -> Self {
        Self {
            label: r.label,
            confidence: r.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedOutcome {
    pub label: Posture,
    pub score: f32,
    pub weights: FusionWeights,
    /// Weighted score of every label either adapter knows
    pub scores: Distribution,
}

/// How a decision was reached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionMetadata {
    pub mode: FusionMode,
    pub sensor: Option<AdapterOutcome>,
    pub camera: Option<AdapterOutcome>,
    /// The camera produced a result that took part in the decision
    pub camera_used: bool,
    pub fused: Option<FusedOutcome>,
    /// Set for auto, fusion, and any fallback
    pub reason: Option<DecisionReason>,
    pub camera_error: Option<String>,
    pub fallback: bool,
}

impl DecisionMetadata {
    fn new(mode: FusionMode) -> Self {
        Self {
            mode,
            sensor: None,
            camera: None,
            camera_used: false,
            fused: None,
            reason: None,
            camera_error: None,
            fallback: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub label: Posture,
    pub confidence: f32,
    pub metadata: DecisionMetadata,
}

/// Routes a sample through the sensor and/or camera classifier according to
/// the active [`FusionMode`].
///
/// Sensor failures propagate. Per-sample camera failures (see
/// [`Error::is_camera_recoverable`]) are recorded in the metadata and answered
/// with the sensor result, except in `camera_only` under
/// [`CameraOnlyPolicy::Reject`]. Any other camera error propagates.
pub struct FusionArbiter {
    sensor: SensorAdapter,
    camera: CameraAdapter,
    config: FusionConfig,
    bad_postures: BadPostures,
    camera_only_policy: CameraOnlyPolicy,
}

impl FusionArbiter {
    pub fn new(sensor: SensorAdapter, camera: CameraAdapter, bad_postures: BadPostures) -> Self {
        Self {
            sensor,
            camera,
            config: FusionConfig::default(),
            bad_postures,
            camera_only_policy: CameraOnlyPolicy::default(),
        }
    }

    pub fn with_config(mut self, config: FusionConfig) -> Result<Self> {
        self.apply_config(config)?;
        Ok(self)
    }

    pub fn with_camera_only_policy(mut self, policy: CameraOnlyPolicy) -> Self {
        self.camera_only_policy = policy;
        self
    }

    pub fn config(&self) -> FusionConfig {
        self.config
    }

    pub fn camera_only_policy(&self) -> CameraOnlyPolicy {
        self.camera_only_policy
    }

    /// Replace the whole config; an invalid one is rejected and the old one kept
    pub fn apply_config(&mut self, config: FusionConfig) -> Result<()> {
        config.validate()?;
        if config != self.config {
            info!(
                "[fusion] config: mode={} threshold={:.2} weights=({:.2}, {:.2})",
                config.mode,
                config.auto_threshold,
                config.weights.sensor,
                config.weights.camera
            );
        }
        self.config = config;
        Ok(())
    }

    /// Switch mode, and threshold or weights when given
    pub fn update_config(
        &mut self,
        mode: FusionMode,
        auto_threshold: Option<f32>,
        weights: Option<FusionWeights>,
    ) -> Result<()> {
        let mut next = self.config;
        next.mode = mode;
        if let Some(t) = auto_threshold {
            next.auto_threshold = t;
        }
        if let Some(w) = weights {
            next.weights = w;
        }
        self.apply_config(next)
    }

    pub fn is_bad_posture(&self, label: Posture) -> bool {
        self.bad_postures.contains(label)
    }

    pub fn bad_postures(&self) -> &BadPostures {
        &self.bad_postures
    }

    pub fn predict(&mut self, sample: &SensorSample, frame: Option<&Frame>) -> Result<Decision> {
        let config = self.config;
        let decision = match config.mode {
            FusionMode::SensorOnly => self.predict_sensor_only(sample)?,
            FusionMode::CameraOnly => self.predict_camera_only(sample, frame)?,
            FusionMode::Auto => self.predict_auto(sample, frame, config.auto_threshold)?,
            FusionMode::Fusion => self.predict_fusion(sample, frame, config.weights)?,
        };

        let meta = &decision.metadata;
        if meta.fallback {
            warn!(
                "[fusion] {} fell back to sensor: {}",
                config.mode,
                meta.camera_error.as_deref().unwrap_or("no camera result")
            );
        }
        info!(
            "[fusion] mode={} label={} confidence={:.2} camera_used={} reason={}",
            config.mode,
            decision.label,
            decision.confidence,
            meta.camera_used,
            meta.reason.map_or_else(|| "-".to_string(), |r| r.to_string())
        );
        Ok(decision)
    }

    fn classify_sensor(&mut self, sample: &SensorSample) -> Result<ClassificationResult> {
        self.sensor.classify(sample)
    }

    /// Outer error: camera failure that must reach the caller.
    /// Inner error: per-sample problem the sensor result can stand in for.
    fn classify_camera(
        &mut self,
        frame: Option<&Frame>,
    ) -> Result<std::result::Result<ClassificationResult, Error>> {
        let Some(frame) = frame else {
            return Ok(Err(Error::DeviceUnavailable("no frame available".to_string())));
        };
        match self.camera.classify(frame) {
            Ok(result) => Ok(Ok(result)),
            Err(e) if e.is_camera_recoverable() => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }

    fn predict_sensor_only(&mut self, sample: &SensorSample) -> Result<Decision> {
        let sensor = self.classify_sensor(sample)?;
        let mut metadata = DecisionMetadata::new(FusionMode::SensorOnly);
        metadata.sensor = Some((&sensor).into());
        Ok(Decision {
            label: sensor.label,
            confidence: sensor.confidence,
            metadata,
        })
    }

    fn predict_camera_only(&mut self, sample: &SensorSample, frame: Option<&Frame>) -> Result<Decision> {
        let mut metadata = DecisionMetadata::new(FusionMode::CameraOnly);
        match self.classify_camera(frame)? {
            Ok(camera) => {
                metadata.camera = Some((&camera).into());
                metadata.camera_used = true;
                Ok(Decision {
                    label: camera.label,
                    confidence: camera.confidence,
                    metadata,
                })
            }
            Err(e) if self.camera_only_policy == CameraOnlyPolicy::Reject => Err(e),
            Err(e) => {
                let sensor = self.classify_sensor(sample)?;
                metadata.sensor = Some((&sensor).into());
                Ok(Self::sensor_fallback(sensor, metadata, e))
            }
        }
    }

    fn predict_auto(
        &mut self,
        sample: &SensorSample,
        frame: Option<&Frame>,
        threshold: f32,
    ) -> Result<Decision> {
        let sensor = self.classify_sensor(sample)?;
        let mut metadata = DecisionMetadata::new(FusionMode::Auto);
        metadata.sensor = Some((&sensor).into());

        if sensor.confidence >= threshold {
            metadata.reason = Some(DecisionReason::ThresholdMet);
            return Ok(Decision {
                label: sensor.label,
                confidence: sensor.confidence,
                metadata,
            });
        }

        match self.classify_camera(frame)? {
            Ok(camera) => {
                metadata.camera = Some((&camera).into());
                metadata.camera_used = true;
                metadata.reason = Some(DecisionReason::SensorLowCameraUsed);
                Ok(Decision {
                    label: camera.label,
                    confidence: camera.confidence,
                    metadata,
                })
            }
            Err(e) => Ok(Self::sensor_fallback(sensor, metadata, e)),
        }
    }

    fn predict_fusion(
        &mut self,
        sample: &SensorSample,
        frame: Option<&Frame>,
        weights: FusionWeights,
    ) -> Result<Decision> {
        let sensor = self.classify_sensor(sample)?;
        let mut metadata = DecisionMetadata::new(FusionMode::Fusion);
        metadata.sensor = Some((&sensor).into());

        let camera = match self.classify_camera(frame)? {
            Ok(camera) => camera,
            Err(e) => return Ok(Self::sensor_fallback(sensor, metadata, e)),
        };
        metadata.camera = Some((&camera).into());
        metadata.camera_used = true;

        let scores = Distribution::weighted_sum(
            &sensor.distribution,
            weights.sensor,
            &camera.distribution,
            weights.camera,
        );
        let (label, score) = scores
            .argmax()
            .ok_or_else(|| Error::Inference("fusion produced no labels".to_string()))?;

        metadata.fused = Some(FusedOutcome {
            label,
            score,
            weights,
            scores,
        });
        metadata.reason = Some(if sensor.label == camera.label {
            DecisionReason::Agreement
        } else {
            DecisionReason::Conflict
        });

        Ok(Decision {
            label,
            confidence: score,
            metadata,
        })
    }

    fn sensor_fallback(sensor: ClassificationResult, mut metadata: DecisionMetadata, error: Error) -> Decision {
        metadata.camera_used = false;
        metadata.fallback = true;
        metadata.reason = Some(DecisionReason::CameraFallback);
        metadata.camera_error = Some(error.to_string());
        Decision {
            label: sensor.label,
            confidence: sensor.confidence,
            metadata,
        }
    }
}
