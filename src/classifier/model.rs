use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayViewD};
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::posture::Posture;

/// A fitted classifier mapping a feature vector to one probability per label
pub trait ProbabilityModel: Send {
    fn predict_proba(&mut self, features: &[f32]) -> Result<Vec<f32>>;
}

impl<F> ProbabilityModel for F
where
    F: FnMut(&[f32]) -> Result<Vec<f32>> + Send,
{
    fn predict_proba(&mut self, features: &[f32]) -> Result<Vec<f32>> {
        self(features)
    }
}

/// sklearn classifier exported to ONNX (zipmap disabled), run through ort
pub struct OnnxModel {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    pub fn load(path: &Path, input_name: &str, output_name: &str) -> Result<Self> {
        let session = crate::onnx::load_session(path, input_name, output_name)?;
        Ok(Self {
            session,
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
        })
    }
}

impl ProbabilityModel for OnnxModel {
    fn predict_proba(&mut self, features: &[f32]) -> Result<Vec<f32>> {
        let input = Array2::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| Error::Inference(e.to_string()))?;
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])?;
        let probabilities: ArrayViewD<f32> =
            crate::onnx::output(&outputs, &self.output_name)?.try_extract_array()?;
        Ok(probabilities.iter().copied().collect())
    }
}

/// Read a label encoder dump: a JSON array of label strings in class-index order
pub fn load_labels(path: &Path) -> Result<Vec<Posture>> {
    let text = fs::read_to_string(path).map_err(|e| Error::model_load(path, e))?;
    let raw: Vec<String> = serde_json::from_str(&text).map_err(|e| Error::model_load(path, e))?;
    if raw.is_empty() {
        return Err(Error::model_load(path, "label list is empty"));
    }
    raw.iter()
        .map(|s| s.parse::<Posture>().map_err(|e| Error::model_load(path, e)))
        .collect()
}
