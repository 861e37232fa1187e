//! Per-sample detection pipeline: config → frame → arbiter → warning.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::camera::{DeviceFactory, FrameSource, FrameSourceStatus};
use crate::classifier::{CameraClassifier, SensorClassifier, SensorSample};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fusion::{
    ConfigSource, DecisionMetadata, FusionArbiter, FusionConfig, FusionMode, FusionWeights,
    SharedFusionConfig, WarningHysteresis, WarningState,
};
use crate::posture::Posture;

/// Outcome for one sensor sample, handed to whoever persists or serves it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: Posture,
    pub confidence: f32,
    pub is_bad: bool,
    pub warning: bool,
    pub mode: FusionMode,
    pub metadata: DecisionMetadata,
    pub timestamp: DateTime<Utc>,
}

/// State mutated by every sample; always locked as a unit
struct Pipeline {
    arbiter: FusionArbiter,
    warnings: WarningHysteresis,
}

pub struct PostureMonitor {
    pipeline: Mutex<Pipeline>,
    config: Arc<dyn ConfigSource>,
    shared_config: Option<SharedFusionConfig>,
    frames: Option<Arc<FrameSource>>,
}

impl PostureMonitor {
    pub fn new(arbiter: FusionArbiter, warnings: WarningHysteresis, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            pipeline: Mutex::new(Pipeline { arbiter, warnings }),
            config,
            shared_config: None,
            frames: None,
        }
    }

    /// Read settings from `shared` and allow [`update_config`](Self::update_config)
    pub fn with_shared_config(mut self, shared: SharedFusionConfig) -> Self {
        self.config = Arc::new(shared.clone());
        self.shared_config = Some(shared);
        self
    }

    pub fn with_frame_source(mut self, frames: Arc<FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Startup path: loads both classifiers and opens the camera.
    ///
    /// Missing model artifacts abort; a missing camera does not.
    pub fn from_config(config: &Config, factory: Arc<dyn DeviceFactory>) -> Result<Self> {
        let sensor = SensorClassifier::from_config(&config.models)?;
        let camera = CameraClassifier::from_config(&config.models)?;

        let initial = config.fusion.initial;
        let arbiter = FusionArbiter::new(Box::new(sensor), Box::new(camera), config.labels.bad_set())
            .with_config(initial)?
            .with_camera_only_policy(config.fusion.camera_only_policy);
        let warnings = WarningHysteresis::new(config.warning.threshold);

        let frames = Arc::new(FrameSource::new(config.camera.clone(), factory));
        frames.start();
        if !frames.is_available() {
            warn!("Starting without camera; camera modes will use the sensor result");
        }

        info!(
            "Posture monitor ready: mode={} warning threshold={}",
            initial.mode,
            warnings.threshold()
        );

        Ok(Self::new(arbiter, warnings, Arc::new(initial))
            .with_shared_config(SharedFusionConfig::new(initial))
            .with_frame_source(frames))
    }

    /// Classify one sample and advance the warning state.
    ///
    /// Only sensor-side failures come back as errors; camera trouble is in
    /// the returned metadata.
    pub fn process(&self, sample: &SensorSample) -> Result<Detection> {
        let config = self.config.fusion_config();
        let frame = if config.mode.may_use_camera() {
            self.frames.as_ref().and_then(|f| f.capture_for_inference())
        } else {
            None
        };

        let (decision, is_bad, warning) = {
            let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
            pipeline.arbiter.apply_config(config)?;
            let decision = pipeline.arbiter.predict(sample, frame.as_ref())?;
            let is_bad = pipeline.arbiter.is_bad_posture(decision.label);
            let warning = pipeline.warnings.advance(decision.label, is_bad);
            (decision, is_bad, warning)
        };

        if warning {
            warn!("Bad posture warning: {} ({:.2})", decision.label, decision.confidence);
        }

        Ok(Detection {
            label: decision.label,
            confidence: decision.confidence,
            is_bad,
            warning,
            mode: config.mode,
            metadata: decision.metadata,
            timestamp: Utc::now(),
        })
    }

    /// Change the shared fusion settings; fails when the config source is fixed
    pub fn update_config(
        &self,
        mode: FusionMode,
        auto_threshold: Option<f32>,
        weights: Option<FusionWeights>,
    ) -> Result<FusionConfig> {
        let shared = self.shared_config.as_ref().ok_or_else(|| {
            Error::InvalidConfig("fusion settings are fixed for this monitor".to_string())
        })?;
        let updated = shared.update(mode, auto_threshold, weights)?;
        info!("Fusion settings updated: mode={}", updated.mode);
        Ok(updated)
    }

    pub fn fusion_config(&self) -> FusionConfig {
        self.config.fusion_config()
    }

    /// Handle for the config store, when settings are shared
    pub fn shared_config(&self) -> Option<&SharedFusionConfig> {
        self.shared_config.as_ref()
    }

    pub fn frame_source(&self) -> Option<&Arc<FrameSource>> {
        self.frames.as_ref()
    }

    pub fn frame_status(&self) -> Option<FrameSourceStatus> {
        self.frames.as_ref().map(|f| f.status())
    }

    pub fn warning_state(&self) -> WarningState {
        self.lock_pipeline().warnings.state().clone()
    }

    pub fn reset_warnings(&self) {
        self.lock_pipeline().warnings.reset();
    }

    fn lock_pipeline(&self) -> std::sync::MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
