use crate::error::{Error, Result};

/// YOLOv8-poseが出力するCOCO 17キーポイントの並び
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;

    pub const ALL: [KeypointIndex; Self::COUNT] = [
        Self::Nose,
        Self::LeftEye,
        Self::RightEye,
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// 正規化画像座標でのキーポイント1点
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Keypoint {
    /// 0.0（左）〜 1.0（右）
    pub x: f32,
    /// 0.0（上）〜 1.0（下）
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn distance(&self, other: &Keypoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// 中点。信頼度は2点のうち低い方
    pub fn midpoint(&self, other: &Keypoint) -> Keypoint {
        Keypoint::new(
            (self.x + other.x) / 2.0,
            (self.y + other.y) / 2.0,
            self.confidence.min(other.confidence),
        )
    }
}

/// 1人分のキーポイント（ちょうど17点）
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointSet {
    points: [Keypoint; KeypointIndex::COUNT],
}

impl KeypointSet {
    pub fn new(points: [Keypoint; KeypointIndex::COUNT]) -> Self {
        Self { points }
    }

    /// モデル出力から構築する。17点以外はエラー
    pub fn from_points(points: &[Keypoint]) -> Result<Self> {
        let points: [Keypoint; KeypointIndex::COUNT] = points
            .try_into()
            .map_err(|_| Error::MalformedKeypoints { found: points.len() })?;
        Ok(Self { points })
    }

    pub fn get(&self, index: KeypointIndex) -> &Keypoint {
        &self.points[index as usize]
    }

    pub fn points(&self) -> &[Keypoint] {
        &self.points
    }
}
