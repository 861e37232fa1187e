//! Posture classifiers behind one capability: input → probability per label.
//!
//! [`SensorClassifier`] consumes seat pressure readings, [`CameraClassifier`]
//! consumes frames. Both wrap a [`ProbabilityModel`], so tests and alternative
//! backends can swap the ONNX model for anything with the same contract.

pub mod camera;
pub mod distribution;
pub mod model;
pub mod sensor;

pub use camera::CameraClassifier;
pub use distribution::{ClassificationResult, Distribution};
pub use model::{load_labels, OnnxModel, ProbabilityModel};
pub use sensor::{SensorClassifier, SensorSample, SENSOR_COUNT};

use crate::error::Result;
use crate::posture::Posture;

pub trait PostureClassifier: Send {
    type Input: ?Sized;

    /// Full probability distribution over [`labels`](Self::labels)
    fn distribution(&mut self, input: &Self::Input) -> Result<Distribution>;

    /// Labels the underlying model was trained on
    fn labels(&self) -> &[Posture];

    /// Most probable label with its probability
    fn classify(&mut self, input: &Self::Input) -> Result<ClassificationResult> {
        ClassificationResult::from_distribution(self.distribution(input)?)
    }
}
