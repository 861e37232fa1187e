use super::distribution::Distribution;
use super::model::{load_labels, OnnxModel, ProbabilityModel};
use super::PostureClassifier;
use crate::camera::Frame;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::pose::{feature_vector, KeypointExtractor, KeypointSet, YoloPoseExtractor};
use crate::posture::Posture;

/// Frame → keypoints → geometric features → posture probabilities
pub struct CameraClassifier {
    extractor: Box<dyn KeypointExtractor>,
    model: Box<dyn ProbabilityModel>,
    labels: Vec<Posture>,
}

impl CameraClassifier {
    pub fn new(
        extractor: Box<dyn KeypointExtractor>,
        model: Box<dyn ProbabilityModel>,
        labels: Vec<Posture>,
    ) -> Self {
        Self {
            extractor,
            model,
            labels,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let extractor = YoloPoseExtractor::from_config(config)?;
        let labels = load_labels(&config.camera_labels)?;
        let model = OnnxModel::load(
            &config.camera_model,
            &config.camera_input,
            &config.camera_output,
        )?;
        tracing::info!("Camera classifier ready ({} labels)", labels.len());
        Ok(Self::new(Box::new(extractor), Box::new(model), labels))
    }

    /// Keypoints of the person in `frame`
    pub fn keypoints(&mut self, frame: &Frame) -> Result<KeypointSet> {
        let points = self
            .extractor
            .extract(frame)?
            .ok_or(Error::NoSubjectDetected)?;
        KeypointSet::from_points(&points)
    }
}

impl PostureClassifier for CameraClassifier {
    type Input = Frame;

    fn distribution(&mut self, frame: &Frame) -> Result<Distribution> {
        let pose = self.keypoints(frame)?;
        let features = feature_vector(&pose);
        let probabilities = self.model.predict_proba(&features)?;
        Distribution::from_probabilities(&self.labels, &probabilities)
    }

    fn labels(&self) -> &[Posture] {
        &self.labels
    }
}
