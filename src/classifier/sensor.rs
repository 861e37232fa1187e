use serde::Serialize;

use super::distribution::Distribution;
use super::model::{load_labels, OnnxModel, ProbabilityModel};
use super::PostureClassifier;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::posture::Posture;

/// Number of pressure channels on the seat
pub const SENSOR_COUNT: usize = 7;

/// One reading of the seat pressure sensors, in the order the model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSample([f32; SENSOR_COUNT]);

impl SensorSample {
    pub fn new(values: [f32; SENSOR_COUNT]) -> Self {
        Self(values)
    }

    pub fn from_slice(values: &[f32]) -> Result<Self> {
        let values: [f32; SENSOR_COUNT] = values.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "expected {} sensor values, got {}",
                SENSOR_COUNT,
                values.len()
            ))
        })?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput("non-finite sensor value".to_string()));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f32; SENSOR_COUNT] {
        &self.0
    }
}

impl TryFrom<&[f32]> for SensorSample {
    type Error = Error;

    fn try_from(values: &[f32]) -> Result<Self> {
        Self::from_slice(values)
    }
}

impl TryFrom<Vec<f32>> for SensorSample {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self> {
        Self::from_slice(&values)
    }
}

/// Posture classifier over seat pressure readings
pub struct SensorClassifier {
    model: Box<dyn ProbabilityModel>,
    labels: Vec<Posture>,
}

impl SensorClassifier {
    pub fn new(model: Box<dyn ProbabilityModel>, labels: Vec<Posture>) -> Self {
        Self { model, labels }
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let labels = load_labels(&config.sensor_labels)?;
        let model = OnnxModel::load(
            &config.sensor_model,
            &config.sensor_input,
            &config.sensor_output,
        )?;
        tracing::info!("Sensor classifier ready ({} labels)", labels.len());
        Ok(Self::new(Box::new(model), labels))
    }
}

impl PostureClassifier for SensorClassifier {
    type Input = SensorSample;

    fn distribution(&mut self, sample: &SensorSample) -> Result<Distribution> {
        let probabilities = self.model.predict_proba(sample.values())?;
        Distribution::from_probabilities(&self.labels, &probabilities)
    }

    fn labels(&self) -> &[Posture] {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [Posture; 3] = [Posture::Correct, Posture::LeaningLeft, Posture::LeaningRight];

    /// Left-heavy readings lean left, otherwise correct
    fn balance_model(features: &[f32]) -> Result<Vec<f32>> {
        let left: f32 = features[..3].iter().sum();
        let right: f32 = features[4..].iter().sum();
        if left > right * 1.5 {
            Ok(vec![0.1, 0.8, 0.1])
        } else {
            Ok(vec![0.9, 0.05, 0.05])
        }
    }

    fn classifier() -> SensorClassifier {
        SensorClassifier::new(Box::new(balance_model), LABELS.to_vec())
    }

    #[test]
    fn test_sample_requires_seven_values() {
        assert!(SensorSample::from_slice(&[0.0; 7]).is_ok());
        for n in [0, 6, 8] {
            let err = SensorSample::try_from(vec![0.0; n]).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }
        let mut values = [1.0; 7];
        values[3] = f32::INFINITY;
        assert!(SensorSample::from_slice(&values).is_err());
    }

    #[test]
    fn test_classify_reports_argmax() {
        let mut c = classifier();
        let sample = SensorSample::new([30.0, 30.0, 30.0, 10.0, 5.0, 5.0, 5.0]);
        let result = c.classify(&sample).unwrap();
        assert_eq!(result.label, Posture::LeaningLeft);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert_eq!(result.distribution.len(), 3);

        let balanced = SensorSample::new([10.0; 7]);
        assert_eq!(c.classify(&balanced).unwrap().label, Posture::Correct);
    }

    #[test]
    fn test_confidence_in_unit_range() {
        let mut c = SensorClassifier::new(
            Box::new(|_: &[f32]| -> Result<Vec<f32>> { Ok(vec![3.0, 1.0, 0.0]) }),
            LABELS.to_vec(),
        );
        let result = c.classify(&SensorSample::new([0.0; 7])).unwrap();
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!((result.distribution.total() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_label_count_mismatch_is_inference_error() {
        let mut c = SensorClassifier::new(
            Box::new(|_: &[f32]| -> Result<Vec<f32>> { Ok(vec![0.5, 0.5]) }),
            LABELS.to_vec(),
        );
        let err = c.classify(&SensorSample::new([0.0; 7])).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[test]
    fn test_from_config_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            sensor_model: dir.path().join("sensor.onnx"),
            sensor_labels: dir.path().join("labels.json"),
            ..ModelConfig::default()
        };
        let err = SensorClassifier::from_config(&config).err().unwrap();
        assert!(matches!(err, Error::ModelLoad { .. }));
    }
}
