//! Error taxonomy for the detection pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Camera absent, disconnected, or no frame held
    #[error("Camera device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Keypoint extraction found no person in the frame
    #[error("No subject detected in frame")]
    NoSubjectDetected,

    /// Keypoint extraction returned the wrong number of points
    #[error("Malformed keypoints: expected 17, got {found}")]
    MalformedKeypoints { found: usize },

    /// Wrong-sized sensor vector or otherwise unusable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A model artifact is missing or unreadable
    #[error("Failed to load model artifact {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// Runtime failure inside a classifier or the pose model
    #[error("Inference error: {0}")]
    Inference(String),

    /// Rejected fusion configuration update
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn model_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Per-sample camera failures the arbiter may recover from
    pub fn is_camera_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_)
                | Self::NoSubjectDetected
                | Self::MalformedKeypoints { .. }
                | Self::Inference(_)
        )
    }
}

impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Self::Inference(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_load_message_names_path() {
        let e = Error::model_load("models/sensor.onnx", "not found");
        let msg = e.to_string();
        assert!(msg.contains("models/sensor.onnx"), "{}", msg);
        assert!(msg.contains("not found"), "{}", msg);
    }

    #[test]
    fn test_camera_recoverable() {
        assert!(Error::NoSubjectDetected.is_camera_recoverable());
        assert!(Error::MalformedKeypoints { found: 3 }.is_camera_recoverable());
        assert!(Error::DeviceUnavailable("gone".into()).is_camera_recoverable());
        assert!(!Error::InvalidInput("x".into()).is_camera_recoverable());
        assert!(!Error::model_load("a", "b").is_camera_recoverable());
    }
}
