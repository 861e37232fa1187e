use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fusion::{CameraOnlyPolicy, FusionConfig};
use crate::posture::{BadPostures, Posture};

/// `posture_monitor.toml` から読む全体設定
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub warning: WarningConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// キャプチャデバイス番号
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// 読み込み失敗後の最初の待ち時間。連続失敗ごとに倍になる
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// デバイスを開き直すまでの連続読み込み失敗回数
    #[serde(default = "default_reconnect_after_failures")]
    pub reconnect_after_failures: u32,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// この時間フレームが保存されなければ利用不可とみなす
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    /// release() 時にキャプチャスレッドを待つ上限。超えたらスレッドを切り離す
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> u32 { 30 }
fn default_retry_interval_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 2000 }
fn default_reconnect_after_failures() -> u32 { 10 }
fn default_reconnect_interval_ms() -> u64 { 1000 }
fn default_stall_timeout_ms() -> u64 { 5000 }
fn default_jpeg_quality() -> i32 { 85 }
fn default_release_timeout_ms() -> u64 { 2000 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            retry_interval_ms: default_retry_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reconnect_after_failures: default_reconnect_after_failures(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            jpeg_quality: default_jpeg_quality(),
            release_timeout_ms: default_release_timeout_ms(),
        }
    }
}

/// 学習済みモデルのパスとテンソル名
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_sensor_model")]
    pub sensor_model: PathBuf,
    #[serde(default = "default_sensor_labels")]
    pub sensor_labels: PathBuf,
    #[serde(default = "default_camera_model")]
    pub camera_model: PathBuf,
    #[serde(default = "default_camera_labels")]
    pub camera_labels: PathBuf,
    /// YOLOv8-poseのONNXエクスポート
    #[serde(default = "default_pose_model")]
    pub pose_model: PathBuf,
    #[serde(default = "default_pose_input_size")]
    pub pose_input_size: u32,
    #[serde(default = "default_person_threshold")]
    pub person_threshold: f32,
    /// センサー分類器の入力テンソル名
    #[serde(default = "default_classifier_input")]
    pub sensor_input: String,
    /// センサー分類器の確率出力 (zipmap 無効でエクスポート)
    #[serde(default = "default_classifier_output")]
    pub sensor_output: String,
    #[serde(default = "default_classifier_input")]
    pub camera_input: String,
    #[serde(default = "default_classifier_output")]
    pub camera_output: String,
    #[serde(default = "default_pose_input")]
    pub pose_input: String,
    #[serde(default = "default_pose_output")]
    pub pose_output: String,
}

fn default_sensor_model() -> PathBuf { PathBuf::from("trained_models/sensor/posture_sensor.onnx") }
fn default_sensor_labels() -> PathBuf { PathBuf::from("trained_models/sensor/labels.json") }
fn default_camera_model() -> PathBuf { PathBuf::from("trained_models/camera/posture_camera.onnx") }
fn default_camera_labels() -> PathBuf { PathBuf::from("trained_models/camera/labels.json") }
fn default_pose_model() -> PathBuf { PathBuf::from("trained_models/camera/yolov8n-pose.onnx") }
fn default_pose_input_size() -> u32 { 640 }
fn default_person_threshold() -> f32 { 0.25 }
fn default_classifier_input() -> String { "float_input".to_string() }
fn default_classifier_output() -> String { "probabilities".to_string() }
fn default_pose_input() -> String { "images".to_string() }
fn default_pose_output() -> String { "output0".to_string() }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sensor_model: default_sensor_model(),
            sensor_labels: default_sensor_labels(),
            camera_model: default_camera_model(),
            camera_labels: default_camera_labels(),
            pose_model: default_pose_model(),
            pose_input_size: default_pose_input_size(),
            person_threshold: default_person_threshold(),
            sensor_input: default_classifier_input(),
            sensor_output: default_classifier_output(),
            camera_input: default_classifier_input(),
            camera_output: default_classifier_output(),
            pose_input: default_pose_input(),
            pose_output: default_pose_output(),
        }
    }
}

/// `[fusion]`: 初期フュージョン設定とカメラ単独時のポリシー
#[derive(Debug, Default, Deserialize, Clone)]
pub struct FusionSection {
    #[serde(flatten)]
    pub initial: FusionConfig,
    #[serde(default)]
    pub camera_only_policy: CameraOnlyPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarningConfig {
    /// 最初の警告までに必要な同一の悪い姿勢の連続検出回数
    #[serde(default = "default_warning_threshold")]
    pub threshold: u32,
}

fn default_warning_threshold() -> u32 { 5 }

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            threshold: default_warning_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelConfig {
    #[serde(default = "default_bad_postures")]
    pub bad_postures: Vec<Posture>,
}

fn default_bad_postures() -> Vec<Posture> {
    BadPostures::default().iter().collect()
}

impl LabelConfig {
    pub fn bad_set(&self) -> BadPostures {
        BadPostures::new(self.bad_postures.iter().copied())
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            bad_postures: default_bad_postures(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// ファイルが無い・読めない場合はデフォルト値
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default config ({}: {})", path.display(), e);
                Self::default()
            }
        }
    }
}
