use ndarray::{Array4, ArrayViewD};
use ort::session::Session;
use ort::value::Tensor;

use super::keypoint::Keypoint;
use crate::camera::Frame;
use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// フレームから最も目立つ人物のキーポイントを取り出す
pub trait KeypointExtractor: Send {
    /// 誰も映っていなければ `Ok(None)`
    fn extract(&mut self, frame: &Frame) -> Result<Option<Vec<Keypoint>>>;
}

/// YOLOレターボックスのパディング値（114グレー）
const PAD_VALUE: f32 = 114.0 / 255.0;

/// フレーム画素と正方形レターボックス入力の対応
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl LetterboxInfo {
    pub fn new(frame_width: u32, frame_height: u32, input_size: u32) -> Self {
        let size = input_size as f32;
        let scale = (size / frame_width as f32).min(size / frame_height as f32);
        let scaled_w = (frame_width as f32 * scale).round();
        let scaled_h = (frame_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((size - scaled_w) / 2.0).floor(),
            pad_y: ((size - scaled_h) / 2.0).floor(),
            frame_width,
            frame_height,
        }
    }

    /// モデル入力の画素座標を正規化フレーム座標に変換（[0, 1] にクランプ）
    pub fn to_normalized(&self, x: f32, y: f32) -> (f32, f32) {
        let fx = (x - self.pad_x) / self.scale / self.frame_width as f32;
        let fy = (y - self.pad_y) / self.scale / self.frame_height as f32;
        (fx.clamp(0.0, 1.0), fy.clamp(0.0, 1.0))
    }
}

/// フレーム → NCHW RGBテンソル [1, 3, size, size]、値域 [0, 1]。アスペクト比を保ちグレーでパディング。
///
/// 最近傍サンプリング。1チャンネルのフレームはRGBに複製する。
pub fn letterbox(frame: &Frame, input_size: u32) -> (Array4<f32>, LetterboxInfo) {
    let info = LetterboxInfo::new(frame.width(), frame.height(), input_size);
    let s = input_size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, s, s), PAD_VALUE);

    let (fw, fh) = (frame.width() as usize, frame.height() as usize);
    let channels = frame.channels() as usize;
    let data = frame.data();

    let x0 = info.pad_x as usize;
    let y0 = info.pad_y as usize;
    let x1 = (s - x0).min(s);
    let y1 = (s - y0).min(s);

    for ty in y0..y1 {
        let sy = (((ty - y0) as f32 + 0.5) / info.scale) as usize;
        if sy >= fh {
            continue;
        }
        for tx in x0..x1 {
            let sx = (((tx - x0) as f32 + 0.5) / info.scale) as usize;
            if sx >= fw {
                continue;
            }
            let base = (sy * fw + sx) * channels;
            let (r, g, b) = if channels >= 3 {
                // BGR → RGB
                (data[base + 2], data[base + 1], data[base])
            } else {
                (data[base], data[base], data[base])
            };
            tensor[[0, 0, ty, tx]] = r as f32 / 255.0;
            tensor[[0, 1, ty, tx]] = g as f32 / 255.0;
            tensor[[0, 2, ty, tx]] = b as f32 / 255.0;
        }
    }

    (tensor, info)
}

/// YOLOv8-pose出力 [1, 5 + 3K, N] をデコード: bbox (4)、人物スコア、K × (x, y, conf)。
///
/// `threshold` 以上で人物スコアが最大の検出を選ぶ。
pub fn decode_pose_output(
    output: &ArrayViewD<f32>,
    threshold: f32,
    info: &LetterboxInfo,
) -> Result<Option<Vec<Keypoint>>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 || (shape[1] - 5) % 3 != 0 {
        return Err(Error::Inference(format!("unexpected pose output shape {:?}", shape)));
    }
    let n_keypoints = (shape[1] - 5) / 3;
    let n_detections = shape[2];

    let mut best_score = f32::NEG_INFINITY;
    let mut best_idx = None;
    for i in 0..n_detections {
        let score = output[[0, 4, i]];
        if score >= threshold && score > best_score {
            best_score = score;
            best_idx = Some(i);
        }
    }

    let Some(idx) = best_idx else {
        return Ok(None);
    };

    let keypoints = (0..n_keypoints)
        .map(|k| {
            let row = 5 + k * 3;
            let (x, y) = info.to_normalized(output[[0, row, idx]], output[[0, row + 1, idx]]);
            Keypoint::new(x, y, output[[0, row + 2, idx]])
        })
        .collect();

    Ok(Some(keypoints))
}

/// YOLOv8-pose ONNXによるキーポイント抽出
pub struct YoloPoseExtractor {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: u32,
    person_threshold: f32,
}

impl YoloPoseExtractor {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let session =
            crate::onnx::load_session(&config.pose_model, &config.pose_input, &config.pose_output)?;
        Ok(Self {
            session,
            input_name: config.pose_input.clone(),
            output_name: config.pose_output.clone(),
            input_size: config.pose_input_size,
            person_threshold: config.person_threshold,
        })
    }
}

impl KeypointExtractor for YoloPoseExtractor {
    fn extract(&mut self, frame: &Frame) -> Result<Option<Vec<Keypoint>>> {
        let (input, info) = letterbox(frame, self.input_size);
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])?;
        let output: ArrayViewD<f32> =
            crate::onnx::output(&outputs, &self.output_name)?.try_extract_array()?;
        decode_pose_output(&output, self.person_threshold, &info)
    }
}
